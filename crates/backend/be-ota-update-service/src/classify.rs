//! Telling update bundles apart from rollback instructions

use tracing::{debug, instrument};

use crate::{
    bundle::BundlePath,
    error::{UpdateResult, UpdateServiceError},
    store::BundleStore,
    types::UpdateKind,
};

/// File whose presence turns a bundle into a rollback instruction.
pub const ROLLBACK_MARKER: &str = "rollback";

/// Whether the bundle directory directly contains a file named `marker`.
pub async fn has_marker(
    store: &dyn BundleStore,
    bundle: &BundlePath,
    marker: &str,
) -> UpdateResult<bool> {
    let entries = store.entries(bundle.as_str()).await.map_err(|source| {
        UpdateServiceError::BundleUnreadable {
            path: bundle.to_string(),
            source,
        }
    })?;
    Ok(entries
        .iter()
        .any(|entry| entry.is_file() && entry.name == marker))
}

/// Evaluated on every request; bundle contents may change between requests.
#[instrument(skip(store), fields(bundle = %bundle))]
pub async fn classify_bundle(
    store: &dyn BundleStore,
    bundle: &BundlePath,
) -> UpdateResult<UpdateKind> {
    let kind = if has_marker(store, bundle, ROLLBACK_MARKER).await? {
        UpdateKind::Rollback
    } else {
        UpdateKind::Normal
    };
    debug!("Bundle {} classified as {:?}", bundle, kind);
    Ok(kind)
}
