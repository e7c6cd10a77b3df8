//! Locating the active update bundle for a runtime version

use tracing::{debug, instrument};

use crate::{
    error::{UpdateResult, UpdateServiceError},
    store::BundleStore,
    utils::{runtime_version_dir, validate_runtime_version},
};

/// Location of one bundle generation, e.g. `updates/1.0.0/7`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlePath {
    runtime_version: String,
    generation: u64,
    path: String,
}

impl BundlePath {
    pub fn new(runtime_version: &str, generation: u64) -> Self {
        Self {
            runtime_version: runtime_version.to_string(),
            generation,
            path: format!("{}/{}", runtime_version_dir(runtime_version), generation),
        }
    }

    pub fn runtime_version(&self) -> &str {
        &self.runtime_version
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Forward-slash path as it appears in asset URLs.
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Path of a file inside this bundle.
    pub fn join(&self, relative: &str) -> String {
        format!("{}/{}", self.path, relative)
    }
}

impl std::fmt::Display for BundlePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path)
    }
}

/// Find the generation with the numerically greatest name.
///
/// Entries that are not directories or whose names are not non-negative
/// integers are ignored.
#[instrument(skip(store), fields(runtime_version = %runtime_version))]
pub async fn resolve_latest_bundle(
    store: &dyn BundleStore,
    runtime_version: &str,
) -> UpdateResult<BundlePath> {
    validate_runtime_version(runtime_version)?;

    let dir = runtime_version_dir(runtime_version);
    let exists = store
        .is_dir(&dir)
        .await
        .map_err(|source| UpdateServiceError::BundleUnreadable {
            path: dir.clone(),
            source,
        })?;
    if !exists {
        debug!("No updates directory for runtime version {}", runtime_version);
        return Err(UpdateServiceError::UnsupportedRuntimeVersion(
            runtime_version.to_string(),
        ));
    }

    let entries = store
        .entries(&dir)
        .await
        .map_err(|source| UpdateServiceError::BundleUnreadable {
            path: dir.clone(),
            source,
        })?;

    let latest = entries
        .iter()
        .filter(|entry| entry.is_dir())
        .filter_map(|entry| {
            let generation = parse_generation(&entry.name);
            if generation.is_none() {
                debug!("Ignoring non-numeric entry {}/{}", dir, entry.name);
            }
            generation
        })
        .max();

    match latest {
        Some(generation) => {
            debug!("Latest generation for {} is {}", runtime_version, generation);
            Ok(BundlePath::new(runtime_version, generation))
        }
        None => Err(UpdateServiceError::NoBundleGenerations(dir)),
    }
}

fn parse_generation(name: &str) -> Option<u64> {
    // `u64::from_str` accepts a leading '+'; generation names are digits only.
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}
