//! Request orchestration for the manifest and asset endpoints

use std::sync::Arc;

use anyhow::{Context, Result};
use bon::bon;
use tracing::{debug, info, instrument};

use crate::{
    asset::{LAUNCH_ASSET_CONTENT_TYPE, content_type_for_extension},
    bundle::{BundlePath, resolve_latest_bundle},
    classify::classify_bundle,
    config::UpdateServiceConfig,
    directive::{build_no_update_available, build_rollback},
    error::{UpdateResult, UpdateServiceError},
    manifest::{ManifestRequest, build_manifest, load_metadata},
    signature::{ManifestSigner, sign_if_requested},
    store::{BundleStore, LocalBundleStore},
    types::{
        AssetPayload, AssetQuery, Platform, Resolution, UpdateKind, UpdateOutcome, UpdatePayload,
        UpdateRequest,
    },
    utils::split_asset_path,
};

/// Shared, read-only state of the update service
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn BundleStore>,
    hostname: String,
    signer: Option<ManifestSigner>,
}

#[bon]
impl AppState {
    #[builder]
    pub fn new(
        store: Arc<dyn BundleStore>,
        #[builder(into)] hostname: String,
        signer: Option<ManifestSigner>,
    ) -> Self {
        Self {
            store,
            hostname,
            signer,
        }
    }
}

impl AppState {
    /// Build state backed by the local filesystem. Fails if a configured
    /// signing key cannot be loaded.
    #[instrument(skip_all, fields(updates_root = %config.updates_root.display()))]
    pub async fn from_config(config: &UpdateServiceConfig) -> Result<Self> {
        let signer = match &config.private_key_path {
            Some(path) => Some(
                ManifestSigner::from_file(path)
                    .await
                    .with_context(|| format!("Failed to load signing key {}", path.display()))?,
            ),
            None => {
                info!("PRIVATE_KEY_PATH not set, code signing requests will fail");
                None
            }
        };

        Ok(Self::builder()
            .store(Arc::new(LocalBundleStore::new(&config.updates_root)))
            .hostname(config.hostname.clone())
            .maybe_signer(signer)
            .build())
    }

    pub fn can_sign(&self) -> bool {
        self.signer.is_some()
    }

    /// Resolve, classify and assemble the response to a manifest request.
    ///
    /// The payload is serialized once; the signature covers exactly the
    /// returned body bytes.
    #[instrument(skip(self, request), fields(
        platform = %request.platform,
        runtime_version = %request.runtime_version,
        protocol_version = %request.protocol_version
    ))]
    pub async fn get_update(&self, request: &UpdateRequest) -> UpdateResult<UpdatePayload> {
        let store = self.store.as_ref();
        let bundle = resolve_latest_bundle(store, &request.runtime_version).await?;

        let outcome = match classify_bundle(store, &bundle).await? {
            UpdateKind::Normal => {
                let manifest_request = ManifestRequest {
                    host: &self.hostname,
                    platform: request.platform,
                    protocol_version: request.protocol_version,
                    current_update_id: request.current_update_id.as_deref(),
                };
                match build_manifest(store, &bundle, manifest_request).await? {
                    Resolution::Ready(manifest) => UpdateOutcome::Manifest(manifest),
                    Resolution::NoUpdateAvailable => UpdateOutcome::NoUpdateAvailable(
                        build_no_update_available(request.protocol_version)?,
                    ),
                }
            }
            UpdateKind::Rollback => {
                match build_rollback(
                    store,
                    &bundle,
                    request.protocol_version,
                    request.embedded_update_id.as_deref(),
                    request.current_update_id.as_deref(),
                )
                .await?
                {
                    Resolution::Ready(directive) => UpdateOutcome::Rollback(directive),
                    Resolution::NoUpdateAvailable => UpdateOutcome::NoUpdateAvailable(
                        build_no_update_available(request.protocol_version)?,
                    ),
                }
            }
        };

        let body = outcome.to_json_bytes()?;
        let signature = sign_if_requested(&body, request.expect_signature, self.signer.as_ref())?
            .map(|envelope| envelope.to_header_value())
            .transpose()?;

        debug!(
            "Responding with {} part ({} bytes, signed: {})",
            outcome.part_name(),
            body.len(),
            signature.is_some()
        );

        Ok(UpdatePayload {
            protocol_version: request.protocol_version,
            part_name: outcome.part_name(),
            body,
            signature,
        })
    }

    /// Serve one file of a published bundle.
    ///
    /// Only the platform's launch bundle and its declared assets are served.
    #[instrument(skip(self, query), fields(asset = ?query.asset))]
    pub async fn get_asset(&self, query: &AssetQuery) -> UpdateResult<AssetPayload> {
        let asset = query
            .asset
            .as_deref()
            .filter(|a| !a.is_empty())
            .ok_or(UpdateServiceError::MissingAssetName)?;
        let platform: Platform = query.platform.as_deref().unwrap_or_default().parse()?;
        let runtime_version = query.runtime_version.as_deref().unwrap_or_default();

        let store = self.store.as_ref();
        resolve_latest_bundle(store, runtime_version).await?;

        let (generation, relative) = split_asset_path(asset, runtime_version)?;
        let bundle = BundlePath::new(runtime_version, generation);

        let loaded = load_metadata(store, &bundle).await.map_err(|e| match e {
            UpdateServiceError::MetadataRead { source, .. }
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                UpdateServiceError::asset_not_found(asset)
            }
            other => other,
        })?;
        let platform_metadata = loaded.platform(&bundle, platform)?;

        let content_type = if relative == platform_metadata.bundle {
            LAUNCH_ASSET_CONTENT_TYPE.to_string()
        } else if let Some(declaration) = platform_metadata.find_asset(relative) {
            content_type_for_extension(&declaration.ext)
        } else {
            debug!("{} is not declared by {}", relative, bundle);
            return Err(UpdateServiceError::asset_not_found(asset));
        };

        let path = bundle.join(relative);
        let bytes = store.read(&path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                UpdateServiceError::asset_not_found(asset)
            } else {
                UpdateServiceError::AssetRead { path, source }
            }
        })?;

        debug!("Serving {} as {} ({} bytes)", asset, content_type, bytes.len());
        Ok(AssetPayload {
            content_type,
            bytes,
        })
    }
}
