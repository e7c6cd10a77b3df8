//! Data types and structures for the update service

use serde::{Deserialize, Serialize};

use crate::error::{UpdateResult, UpdateServiceError};

/// Platforms the update protocol serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = UpdateServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            _ => Err(UpdateServiceError::invalid_platform(s)),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Version of the update protocol spoken by the client.
///
/// Version 0 can only carry manifests; version 1 adds directives
/// (roll back to embedded, no update available).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ProtocolVersion {
    #[default]
    V0,
    V1,
}

impl ProtocolVersion {
    /// Parse the `expo-protocol-version` header. Absent means version 0.
    pub fn parse(value: Option<&str>) -> UpdateResult<Self> {
        let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(ProtocolVersion::V0);
        };
        match raw.parse::<i64>() {
            Ok(0) => Ok(ProtocolVersion::V0),
            Ok(1) => Ok(ProtocolVersion::V1),
            _ => Err(UpdateServiceError::InvalidProtocolVersion(raw.to_string())),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            ProtocolVersion::V0 => 0,
            ProtocolVersion::V1 => 1,
        }
    }

    pub fn supports_directives(&self) -> bool {
        *self >= ProtocolVersion::V1
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

// ============================================================================
// Bundle contents
// ============================================================================

/// Parsed `metadata.json` of an update bundle
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BundleMetadata {
    pub file_metadata: FileMetadata,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct FileMetadata {
    #[serde(default)]
    pub ios: Option<PlatformMetadata>,
    #[serde(default)]
    pub android: Option<PlatformMetadata>,
}

impl FileMetadata {
    pub fn for_platform(&self, platform: Platform) -> Option<&PlatformMetadata> {
        match platform {
            Platform::Ios => self.ios.as_ref(),
            Platform::Android => self.android.as_ref(),
        }
    }
}

/// Launch bundle and assets declared for one platform
#[derive(Deserialize, Debug, Clone)]
pub struct PlatformMetadata {
    /// Bundle-relative path of the launch bundle
    pub bundle: String,
    #[serde(default)]
    pub assets: Vec<AssetDeclaration>,
}

impl PlatformMetadata {
    pub fn find_asset(&self, relative_path: &str) -> Option<&AssetDeclaration> {
        self.assets.iter().find(|a| a.path == relative_path)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AssetDeclaration {
    /// Bundle-relative path of the asset file
    pub path: String,
    /// Declared extension, without the leading dot
    pub ext: String,
}

/// Whether a bundle carries an update or a rollback instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Normal,
    Rollback,
}

// ============================================================================
// Wire payloads
// ============================================================================

/// Content-addressed reference to one asset of an update
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    /// URL-safe base64 SHA-256 of the asset bytes, unpadded
    pub hash: String,
    /// Lowercase hex MD5 of the asset bytes
    pub key: String,
    pub file_extension: String,
    pub content_type: String,
    pub url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestExtra {
    /// The bundle's app config, passed through untouched
    pub expo_client: serde_json::Value,
}

/// Full description of an update
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub id: String,
    pub created_at: String,
    pub runtime_version: String,
    pub launch_asset: AssetRecord,
    pub assets: Vec<AssetRecord>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub extra: ManifestExtra,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DirectiveType {
    RollBackToEmbedded,
    NoUpdateAvailable,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RollbackParameters {
    pub commit_time: String,
}

/// Instructs the client to run its embedded bundle
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RollbackDirective {
    #[serde(rename = "type")]
    pub directive_type: DirectiveType,
    pub parameters: RollbackParameters,
}

impl RollbackDirective {
    pub fn new(commit_time: String) -> Self {
        Self {
            directive_type: DirectiveType::RollBackToEmbedded,
            parameters: RollbackParameters { commit_time },
        }
    }
}

/// Tells the client it already runs the latest update
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NoUpdateDirective {
    #[serde(rename = "type")]
    pub directive_type: DirectiveType,
}

impl Default for NoUpdateDirective {
    fn default() -> Self {
        Self {
            directive_type: DirectiveType::NoUpdateAvailable,
        }
    }
}

/// Result of an assembler that may find the client already up to date
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    Ready(T),
    NoUpdateAvailable,
}

/// What the manifest endpoint answers with
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Manifest(Manifest),
    Rollback(RollbackDirective),
    NoUpdateAvailable(NoUpdateDirective),
}

impl UpdateOutcome {
    /// Name of the multipart part carrying the payload
    pub fn part_name(&self) -> &'static str {
        match self {
            UpdateOutcome::Manifest(_) => "manifest",
            UpdateOutcome::Rollback(_) | UpdateOutcome::NoUpdateAvailable(_) => "directive",
        }
    }

    /// Serialize the payload exactly as it goes on the wire.
    pub fn to_json_bytes(&self) -> UpdateResult<Vec<u8>> {
        let bytes = match self {
            UpdateOutcome::Manifest(manifest) => serde_json::to_vec(manifest)?,
            UpdateOutcome::Rollback(directive) => serde_json::to_vec(directive)?,
            UpdateOutcome::NoUpdateAvailable(directive) => serde_json::to_vec(directive)?,
        };
        Ok(bytes)
    }
}

/// A serialized, optionally signed, manifest endpoint response
#[derive(Debug, Clone)]
pub struct UpdatePayload {
    pub protocol_version: ProtocolVersion,
    pub part_name: &'static str,
    pub body: Vec<u8>,
    /// Value of the `expo-signature` header
    pub signature: Option<String>,
}

/// Raw bytes of an asset and the type to serve them as
#[derive(Debug, Clone)]
pub struct AssetPayload {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

// ============================================================================
// Request parameters
// ============================================================================

/// Query fallbacks for the manifest endpoint
#[derive(Deserialize, Debug, Default)]
pub struct ManifestQuery {
    pub platform: Option<String>,
    #[serde(rename = "expo-runtime-version")]
    pub runtime_version: Option<String>,
}

/// Query parameters for the asset endpoint
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct AssetQuery {
    pub asset: Option<String>,
    pub runtime_version: Option<String>,
    pub platform: Option<String>,
}

/// A validated manifest request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub platform: Platform,
    pub runtime_version: String,
    pub protocol_version: ProtocolVersion,
    pub current_update_id: Option<String>,
    pub embedded_update_id: Option<String>,
    pub expect_signature: bool,
}
