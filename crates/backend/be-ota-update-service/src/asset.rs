//! Content addressing of update assets

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use md5::Md5;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::{
    bundle::BundlePath,
    error::{UpdateResult, UpdateServiceError},
    store::BundleStore,
    types::{AssetRecord, Platform},
};

/// Launch bundles are always executable code, whatever their extension.
pub const LAUNCH_ASSET_CONTENT_TYPE: &str = "application/javascript";

/// URL-safe base64 SHA-256 of `bytes`, without padding.
pub fn content_hash(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(bytes))
}

/// Lowercase hex MD5 of `bytes`. A cache key, not an integrity check.
pub fn content_key(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// MIME type for a declared extension (without the leading dot).
pub fn content_type_for_extension(ext: &str) -> String {
    mime_guess::from_ext(ext.trim_start_matches('.'))
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Which asset of a platform's metadata is being addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetRole<'a> {
    Launch,
    Regular { ext: &'a str },
}

/// Where asset URLs point: the configured host plus the request's identity.
#[derive(Debug, Clone, Copy)]
pub struct AssetLocation<'a> {
    pub host: &'a str,
    pub bundle: &'a BundlePath,
    pub platform: Platform,
}

impl AssetLocation<'_> {
    pub fn fetch_url(&self, relative_path: &str) -> String {
        format!(
            "{}/api/assets?asset={}&runtimeVersion={}&platform={}",
            self.host,
            self.bundle.join(relative_path),
            self.bundle.runtime_version(),
            self.platform
        )
    }
}

/// Build the record for already loaded asset bytes.
pub fn address_asset(
    bytes: &[u8],
    role: AssetRole<'_>,
    location: &AssetLocation<'_>,
    relative_path: &str,
) -> AssetRecord {
    let (file_extension, content_type) = match role {
        AssetRole::Launch => (".bundle".to_string(), LAUNCH_ASSET_CONTENT_TYPE.to_string()),
        AssetRole::Regular { ext } => {
            let ext = ext.trim_start_matches('.');
            (format!(".{}", ext), content_type_for_extension(ext))
        }
    };

    AssetRecord {
        hash: content_hash(bytes),
        key: content_key(bytes),
        file_extension,
        content_type,
        url: location.fetch_url(relative_path),
    }
}

/// Read an asset from its bundle and address it.
#[instrument(skip(store, location), fields(bundle = %location.bundle))]
pub async fn build_asset_record(
    store: &dyn BundleStore,
    location: &AssetLocation<'_>,
    relative_path: &str,
    role: AssetRole<'_>,
) -> UpdateResult<AssetRecord> {
    let path = location.bundle.join(relative_path);
    let bytes = store
        .read(&path)
        .await
        .map_err(|source| UpdateServiceError::AssetRead {
            path: path.clone(),
            source,
        })?;

    debug!("Addressing asset {} ({} bytes)", path, bytes.len());
    Ok(address_asset(&bytes, role, location, relative_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBundleStore;

    const HOST: &str = "https://updates.example.com";

    #[test]
    fn test_content_hash_and_key() {
        assert_eq!(
            content_hash(b"hello world"),
            "uU0nuZNNPgilLlLX2n2r-sSE7-N6U4DukIj3rOLvzek"
        );
        assert_eq!(content_key(b"hello world"), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn test_addressing_depends_only_on_bytes() {
        let bundle = BundlePath::new("1.0.0", 7);
        let location = AssetLocation {
            host: HOST,
            bundle: &bundle,
            platform: Platform::Ios,
        };
        let role = AssetRole::Regular { ext: "png" };

        let a = address_asset(b"\x89PNG body", role, &location, "assets/first");
        let b = address_asset(b"\x89PNG body", role, &location, "assets/copy-of-first");
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.key, b.key);
        assert_ne!(a.url, b.url);

        // One flipped bit.
        let c = address_asset(b"\x88PNG body", role, &location, "assets/first");
        assert_ne!(a.hash, c.hash);
        assert_ne!(a.key, c.key);
    }

    #[test]
    fn test_hash_is_url_safe_and_unpadded() {
        for input in [&b""[..], b"a", b"ab", b"\xfb\xff\xfe", b"some longer asset body"] {
            let hash = content_hash(input);
            assert!(!hash.contains(['+', '/', '=']), "{}", hash);
            assert_eq!(hash.len(), 43);
        }
    }

    #[test]
    fn test_launch_asset_is_javascript() {
        let bundle = BundlePath::new("1.0.0", 7);
        let location = AssetLocation {
            host: HOST,
            bundle: &bundle,
            platform: Platform::Android,
        };

        let record = address_asset(
            b"__d(function(){})",
            AssetRole::Launch,
            &location,
            "bundles/android-1a2b.hbc",
        );
        assert_eq!(record.file_extension, ".bundle");
        assert_eq!(record.content_type, "application/javascript");
        assert_eq!(
            record.url,
            concat!(
                "https://updates.example.com/api/assets",
                "?asset=updates/1.0.0/7/bundles/android-1a2b.hbc",
                "&runtimeVersion=1.0.0&platform=android"
            )
        );
    }

    #[test]
    fn test_content_type_for_extension() {
        assert_eq!(content_type_for_extension("png"), "image/png");
        assert_eq!(content_type_for_extension(".jpg"), "image/jpeg");
        assert_eq!(content_type_for_extension("json"), "application/json");
        assert_eq!(
            content_type_for_extension("definitely-not-an-extension"),
            "application/octet-stream"
        );
    }

    #[tokio::test]
    async fn test_unreadable_asset_fails() {
        let store = MemoryBundleStore::new();
        let bundle = BundlePath::new("1.0.0", 7);
        let location = AssetLocation {
            host: HOST,
            bundle: &bundle,
            platform: Platform::Ios,
        };

        let role = AssetRole::Regular { ext: "png" };
        let err = build_asset_record(&store, &location, "assets/missing", role)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UpdateServiceError::AssetRead { path, .. } if path == "updates/1.0.0/7/assets/missing"
        ));
    }
}
