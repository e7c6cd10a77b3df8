//! Utility functions for parsing and validation

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, instrument};

use crate::error::{UpdateResult, UpdateServiceError};

/// Directory holding one subdirectory per runtime version.
pub const UPDATES_DIR: &str = "updates";

/// ISO-8601 in UTC, e.g. `2024-01-01T00:00:00Z`.
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Runtime versions become a path segment, so they must be exactly one.
#[instrument]
pub fn validate_runtime_version(runtime_version: &str) -> UpdateResult<()> {
    if runtime_version.is_empty() {
        return Err(UpdateServiceError::MissingRuntimeVersion);
    }
    if !is_plain_segment(runtime_version) {
        debug!("Rejecting runtime version: {}", runtime_version);
        return Err(UpdateServiceError::InvalidRuntimeVersion(
            runtime_version.to_string(),
        ));
    }
    Ok(())
}

/// Relative path made only of plain segments (no `.`, `..`, empty or
/// backslash-separated parts).
pub fn is_safe_relative_path(path: &str) -> bool {
    !path.is_empty() && path.split('/').all(is_plain_segment)
}

fn is_plain_segment(segment: &str) -> bool {
    !segment.is_empty() && segment != "." && segment != ".." && !segment.contains(['/', '\\'])
}

/// Logical directory holding all generations of a runtime version.
pub fn runtime_version_dir(runtime_version: &str) -> String {
    format!("{}/{}", UPDATES_DIR, runtime_version)
}

/// Split an asset URL path `updates/{runtimeVersion}/{generation}/{relative}`
/// into its generation and bundle-relative path.
pub fn split_asset_path<'a>(
    asset: &'a str,
    runtime_version: &str,
) -> UpdateResult<(u64, &'a str)> {
    let prefix = format!("{}/", runtime_version_dir(runtime_version));
    let rest = asset
        .strip_prefix(&prefix)
        .ok_or_else(|| UpdateServiceError::invalid_asset_path(asset))?;
    let (generation, relative) = rest
        .split_once('/')
        .ok_or_else(|| UpdateServiceError::invalid_asset_path(asset))?;
    let generation = generation
        .parse::<u64>()
        .map_err(|_| UpdateServiceError::invalid_asset_path(asset))?;

    if !is_safe_relative_path(relative) {
        return Err(UpdateServiceError::invalid_asset_path(asset));
    }
    Ok((generation, relative))
}
