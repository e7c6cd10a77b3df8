//! Rollback and no-update directives

use tracing::{debug, instrument};

use crate::{
    bundle::BundlePath,
    classify::ROLLBACK_MARKER,
    error::{UpdateResult, UpdateServiceError},
    store::BundleStore,
    types::{NoUpdateDirective, ProtocolVersion, Resolution, RollbackDirective},
    utils::format_timestamp,
};

/// Build the directive for a bundle carrying a rollback marker.
///
/// The commit time is the marker file's creation time. A client whose
/// current update is already its embedded one gets
/// [`Resolution::NoUpdateAvailable`].
#[instrument(skip(store), fields(bundle = %bundle, protocol_version = %protocol_version))]
pub async fn build_rollback(
    store: &dyn BundleStore,
    bundle: &BundlePath,
    protocol_version: ProtocolVersion,
    embedded_update_id: Option<&str>,
    current_update_id: Option<&str>,
) -> UpdateResult<Resolution<RollbackDirective>> {
    if !protocol_version.supports_directives() {
        return Err(UpdateServiceError::RollbackUnsupported);
    }

    let embedded_update_id = embedded_update_id
        .filter(|id| !id.is_empty())
        .ok_or(UpdateServiceError::MissingEmbeddedId)?;

    if current_update_id == Some(embedded_update_id) {
        debug!("Client already runs its embedded update {}", embedded_update_id);
        return Ok(Resolution::NoUpdateAvailable);
    }

    let marker = bundle.join(ROLLBACK_MARKER);
    let commit_time = store.created_at(&marker).await.map_err(|source| {
        UpdateServiceError::RollbackMarkerUnreadable {
            path: marker.clone(),
            source,
        }
    })?;

    Ok(Resolution::Ready(RollbackDirective::new(format_timestamp(
        commit_time,
    ))))
}

/// Directive telling the client it is up to date. Needs protocol 1.
pub fn build_no_update_available(
    protocol_version: ProtocolVersion,
) -> UpdateResult<NoUpdateDirective> {
    if !protocol_version.supports_directives() {
        return Err(UpdateServiceError::NoUpdateUnsupported);
    }
    Ok(NoUpdateDirective::default())
}
