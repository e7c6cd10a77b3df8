//! Assembling update manifests from bundle contents

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    asset::{AssetLocation, AssetRole, build_asset_record},
    bundle::BundlePath,
    error::{UpdateResult, UpdateServiceError},
    store::BundleStore,
    types::{
        BundleMetadata, Manifest, ManifestExtra, Platform, PlatformMetadata, ProtocolVersion,
        Resolution,
    },
    utils::format_timestamp,
};

pub const METADATA_FILE: &str = "metadata.json";
pub const APP_CONFIG_FILE: &str = "expoConfig.json";

/// Manifest id for the raw bytes of a metadata descriptor.
///
/// The first 16 bytes of the SHA-256 digest, written as a UUID
/// (`8-4-4-4-12` lowercase hex).
pub fn manifest_id(metadata_bytes: &[u8]) -> String {
    let digest = Sha256::digest(metadata_bytes);
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).hyphenated().to_string()
}

/// A bundle's parsed metadata descriptor
#[derive(Debug, Clone)]
pub struct LoadedMetadata {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub metadata: BundleMetadata,
}

impl LoadedMetadata {
    pub fn platform(
        &self,
        bundle: &BundlePath,
        platform: Platform,
    ) -> UpdateResult<&PlatformMetadata> {
        self.metadata
            .file_metadata
            .for_platform(platform)
            .ok_or_else(|| UpdateServiceError::MissingPlatformMetadata {
                bundle: bundle.to_string(),
                platform: platform.to_string(),
            })
    }
}

#[instrument(skip(store), fields(bundle = %bundle))]
pub async fn load_metadata(
    store: &dyn BundleStore,
    bundle: &BundlePath,
) -> UpdateResult<LoadedMetadata> {
    let path = bundle.join(METADATA_FILE);
    let raw = store
        .read(&path)
        .await
        .map_err(|source| UpdateServiceError::MetadataRead {
            path: path.clone(),
            source,
        })?;
    let metadata: BundleMetadata =
        serde_json::from_slice(&raw).map_err(|source| UpdateServiceError::InvalidMetadata {
            path: path.clone(),
            source,
        })?;
    let created_at = store
        .created_at(&path)
        .await
        .map_err(|source| UpdateServiceError::MetadataRead {
            path: path.clone(),
            source,
        })?;

    Ok(LoadedMetadata {
        id: manifest_id(&raw),
        created_at,
        metadata,
    })
}

/// The bundle's app config, kept opaque.
#[instrument(skip(store), fields(bundle = %bundle))]
pub async fn load_app_config(
    store: &dyn BundleStore,
    bundle: &BundlePath,
) -> UpdateResult<serde_json::Value> {
    let path = bundle.join(APP_CONFIG_FILE);
    let raw = store
        .read(&path)
        .await
        .map_err(|e| UpdateServiceError::MissingAppConfig {
            path: path.clone(),
            reason: e.to_string(),
        })?;
    serde_json::from_slice(&raw).map_err(|e| UpdateServiceError::MissingAppConfig {
        path,
        reason: e.to_string(),
    })
}

/// Inputs to [`build_manifest`] besides the bundle itself
#[derive(Debug, Clone, Copy)]
pub struct ManifestRequest<'a> {
    /// Base URL asset URLs are built on
    pub host: &'a str,
    pub platform: Platform,
    pub protocol_version: ProtocolVersion,
    pub current_update_id: Option<&'a str>,
}

/// Build the manifest of a normal update bundle.
///
/// A protocol 1 client whose current update id equals the manifest id gets
/// [`Resolution::NoUpdateAvailable`]; protocol 0 always gets the manifest.
/// Any failure loading metadata, app config or an asset fails the whole build.
#[instrument(skip(store, request), fields(
    bundle = %bundle,
    platform = %request.platform,
    protocol_version = %request.protocol_version
))]
pub async fn build_manifest(
    store: &dyn BundleStore,
    bundle: &BundlePath,
    request: ManifestRequest<'_>,
) -> UpdateResult<Resolution<Manifest>> {
    let loaded = load_metadata(store, bundle).await?;

    if request.protocol_version == ProtocolVersion::V1
        && request.current_update_id == Some(loaded.id.as_str())
    {
        debug!("Client already runs update {}", loaded.id);
        return Ok(Resolution::NoUpdateAvailable);
    }

    let platform_metadata = loaded.platform(bundle, request.platform)?;
    let location = AssetLocation {
        host: request.host,
        bundle,
        platform: request.platform,
    };

    let launch_asset = build_asset_record(
        store,
        &location,
        &platform_metadata.bundle,
        AssetRole::Launch,
    );
    // try_join_all keeps declaration order whatever order reads finish in.
    let assets = try_join_all(platform_metadata.assets.iter().map(|asset| {
        build_asset_record(
            store,
            &location,
            &asset.path,
            AssetRole::Regular { ext: &asset.ext },
        )
    }));
    let app_config = load_app_config(store, bundle);

    let (launch_asset, assets, expo_client) =
        futures::try_join!(launch_asset, assets, app_config)?;

    debug!(
        "Built manifest {} with {} assets",
        loaded.id,
        assets.len()
    );

    Ok(Resolution::Ready(Manifest {
        id: loaded.id,
        created_at: format_timestamp(loaded.created_at),
        runtime_version: bundle.runtime_version().to_string(),
        launch_asset,
        assets,
        metadata: serde_json::Map::new(),
        extra: ManifestExtra { expo_client },
    }))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::store::MemoryBundleStore;

    const HOST: &str = "http://localhost:3000";

    const METADATA: &str = concat!(
        r#"{"version":0,"bundler":"metro","fileMetadata":{"#,
        r#""ios":{"bundle":"bundles/ios-abc.js","#,
        r#""assets":[{"path":"assets/b","ext":"png"},{"path":"assets/a","ext":"ttf"}]},"#,
        r#""android":{"bundle":"bundles/android-abc.js","assets":[]}}}"#
    );

    fn seeded_store(bundle: &BundlePath) -> MemoryBundleStore {
        let store = MemoryBundleStore::new();
        let created = Utc.with_ymd_and_hms(2024, 3, 5, 12, 30, 0).unwrap();
        store.insert_file_created_at(&bundle.join(METADATA_FILE), METADATA, created);
        store.insert_file(
            &bundle.join(APP_CONFIG_FILE),
            concat!(
                r#"{"name":"demo","slug":"demo","runtimeVersion":"1.0.0","#,
                r#""ios":{"supportsTablet":true}}"#
            ),
        );
        store.insert_file(&bundle.join("bundles/ios-abc.js"), "ios launch code");
        store.insert_file(&bundle.join("bundles/android-abc.js"), "android launch code");
        store.insert_file(&bundle.join("assets/b"), "image bytes");
        store.insert_file(&bundle.join("assets/a"), "font bytes");
        store
    }

    fn request(protocol_version: ProtocolVersion, current: Option<&str>) -> ManifestRequest<'_> {
        ManifestRequest {
            host: HOST,
            platform: Platform::Ios,
            protocol_version,
            current_update_id: current,
        }
    }

    #[test]
    fn test_manifest_id_is_uuid_shaped_and_deterministic() {
        let id = manifest_id(br#"{"version":0}"#);
        assert_eq!(id, "8a4d9669-945d-c4f8-b42e-982d9fd1f7e6");
        assert_eq!(id, manifest_id(br#"{"version":0}"#));

        let lengths: Vec<usize> = id.split('-').map(str::len).collect();
        assert_eq!(lengths, vec![8, 4, 4, 4, 12]);

        assert_ne!(manifest_id(br#"{"version":1}"#), id);
    }

    #[tokio::test]
    async fn test_builds_full_manifest() {
        let bundle = BundlePath::new("1.0.0", 7);
        let store = seeded_store(&bundle);

        let Resolution::Ready(manifest) =
            build_manifest(&store, &bundle, request(ProtocolVersion::V1, None))
                .await
                .unwrap()
        else {
            panic!("expected a manifest");
        };

        assert_eq!(manifest.id, manifest_id(METADATA.as_bytes()));
        assert_eq!(manifest.created_at, "2024-03-05T12:30:00Z");
        assert_eq!(manifest.runtime_version, "1.0.0");
        assert_eq!(manifest.launch_asset.content_type, "application/javascript");
        assert_eq!(manifest.launch_asset.file_extension, ".bundle");

        // Declaration order, not path order.
        let exts: Vec<&str> = manifest
            .assets
            .iter()
            .map(|a| a.file_extension.as_str())
            .collect();
        assert_eq!(exts, vec![".png", ".ttf"]);
        assert!(manifest.assets[0].url.contains("asset=updates/1.0.0/7/assets/b&"));
        assert_eq!(manifest.extra.expo_client["slug"], "demo");
        assert!(manifest.metadata.is_empty());
    }

    /// Holds back reads of `held` until `release` has been read.
    struct ReorderingStore {
        inner: MemoryBundleStore,
        held: String,
        release: String,
        released: tokio::sync::Notify,
        completed: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl BundleStore for ReorderingStore {
        async fn is_dir(&self, path: &str) -> std::io::Result<bool> {
            self.inner.is_dir(path).await
        }

        async fn entries(&self, path: &str) -> std::io::Result<Vec<crate::store::StoreEntry>> {
            self.inner.entries(path).await
        }

        async fn read(&self, path: &str) -> std::io::Result<Vec<u8>> {
            if path == self.held {
                self.released.notified().await;
            }
            let bytes = self.inner.read(path).await?;
            if path == self.release {
                self.released.notify_one();
            }
            self.completed.lock().push(path.to_string());
            Ok(bytes)
        }

        async fn created_at(&self, path: &str) -> std::io::Result<DateTime<Utc>> {
            self.inner.created_at(path).await
        }
    }

    #[tokio::test]
    async fn test_asset_order_ignores_completion_order() {
        let bundle = BundlePath::new("1.0.0", 7);
        let store = ReorderingStore {
            inner: seeded_store(&bundle),
            held: bundle.join("assets/b"),
            release: bundle.join("assets/a"),
            released: tokio::sync::Notify::new(),
            completed: parking_lot::Mutex::new(Vec::new()),
        };

        let Resolution::Ready(manifest) =
            build_manifest(&store, &bundle, request(ProtocolVersion::V1, None))
                .await
                .unwrap()
        else {
            panic!("expected a manifest");
        };

        let completed = store.completed.lock().clone();
        let a = completed.iter().position(|p| p.ends_with("assets/a")).unwrap();
        let b = completed.iter().position(|p| p.ends_with("assets/b")).unwrap();
        assert!(a < b, "{:?}", completed);

        let exts: Vec<&str> = manifest
            .assets
            .iter()
            .map(|a| a.file_extension.as_str())
            .collect();
        assert_eq!(exts, vec![".png", ".ttf"]);
    }

    #[tokio::test]
    async fn test_manifest_is_byte_stable() {
        let bundle = BundlePath::new("1.0.0", 7);
        let store = seeded_store(&bundle);

        let first = build_manifest(&store, &bundle, request(ProtocolVersion::V0, None))
            .await
            .unwrap();
        let second = build_manifest(&store, &bundle, request(ProtocolVersion::V0, None))
            .await
            .unwrap();

        let (Resolution::Ready(first), Resolution::Ready(second)) = (first, second) else {
            panic!("expected manifests");
        };
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn test_current_update_short_circuits_only_on_v1() {
        let bundle = BundlePath::new("1.0.0", 7);
        let store = seeded_store(&bundle);
        let id = manifest_id(METADATA.as_bytes());

        let v1 = build_manifest(&store, &bundle, request(ProtocolVersion::V1, Some(id.as_str())))
            .await
            .unwrap();
        assert_eq!(v1, Resolution::NoUpdateAvailable);

        let v0 = build_manifest(&store, &bundle, request(ProtocolVersion::V0, Some(id.as_str())))
            .await
            .unwrap();
        assert!(matches!(v0, Resolution::Ready(m) if m.id == id));

        let other = build_manifest(
            &store,
            &bundle,
            request(ProtocolVersion::V1, Some("00000000-0000-0000-0000-000000000000")),
        )
        .await
        .unwrap();
        assert!(matches!(other, Resolution::Ready(_)));
    }

    #[tokio::test]
    async fn test_short_circuit_skips_asset_reads() {
        let bundle = BundlePath::new("1.0.0", 7);
        let store = seeded_store(&bundle);
        store.remove_file(&bundle.join("assets/a"));
        let id = manifest_id(METADATA.as_bytes());

        let resolution =
            build_manifest(&store, &bundle, request(ProtocolVersion::V1, Some(id.as_str())))
                .await
                .unwrap();
        assert_eq!(resolution, Resolution::NoUpdateAvailable);
    }

    #[tokio::test]
    async fn test_missing_asset_fails_whole_manifest() {
        let bundle = BundlePath::new("1.0.0", 7);
        let store = seeded_store(&bundle);
        store.remove_file(&bundle.join("assets/a"));

        let err = build_manifest(&store, &bundle, request(ProtocolVersion::V1, None))
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateServiceError::AssetRead { .. }));
    }

    #[tokio::test]
    async fn test_missing_app_config_fails_manifest() {
        let bundle = BundlePath::new("1.0.0", 7);
        let store = seeded_store(&bundle);
        store.remove_file(&bundle.join(APP_CONFIG_FILE));

        let err = build_manifest(&store, &bundle, request(ProtocolVersion::V1, None))
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateServiceError::MissingAppConfig { .. }));

        store.insert_file(&bundle.join(APP_CONFIG_FILE), "{not json");
        let err = build_manifest(&store, &bundle, request(ProtocolVersion::V1, None))
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateServiceError::MissingAppConfig { .. }));
    }

    #[tokio::test]
    async fn test_platform_without_metadata() {
        let bundle = BundlePath::new("1.0.0", 7);
        let store = MemoryBundleStore::new();
        store.insert_file(
            &bundle.join(METADATA_FILE),
            r#"{"fileMetadata":{"android":{"bundle":"bundles/android.js","assets":[]}}}"#,
        );

        let err = build_manifest(&store, &bundle, request(ProtocolVersion::V1, None))
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateServiceError::MissingPlatformMetadata { .. }));
    }

    #[tokio::test]
    async fn test_invalid_metadata() {
        let bundle = BundlePath::new("1.0.0", 7);
        let store = MemoryBundleStore::new();
        store.insert_file(&bundle.join(METADATA_FILE), "not json");

        let err = load_metadata(&store, &bundle).await.unwrap_err();
        assert!(matches!(err, UpdateServiceError::InvalidMetadata { .. }));
    }
}
