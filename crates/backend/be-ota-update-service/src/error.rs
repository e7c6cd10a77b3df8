use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::{error, warn};

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum UpdateServiceError {
    #[error("Unsupported platform: {0}")]
    InvalidPlatform(String),

    #[error("No runtime version provided")]
    MissingRuntimeVersion,

    #[error("Invalid runtime version: {0}")]
    InvalidRuntimeVersion(String),

    #[error("Invalid protocol version: {0}")]
    InvalidProtocolVersion(String),

    #[error("No asset name provided")]
    MissingAssetName,

    #[error("Invalid asset path: {0}")]
    InvalidAssetPath(String),

    #[error("Expected GET, got {0}")]
    MethodNotAllowed(String),

    #[error("Unsupported runtime version: {0}")]
    UnsupportedRuntimeVersion(String),

    #[error("No update bundle generations found in {0}")]
    NoBundleGenerations(String),

    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Bundle {bundle} has no metadata for platform {platform}")]
    MissingPlatformMetadata { bundle: String, platform: String },

    #[error("Rollbacks not supported on protocol version 0")]
    RollbackUnsupported,

    #[error("NoUpdateAvailable directive not available in protocol version 0")]
    NoUpdateUnsupported,

    #[error("Invalid expo-embedded-update-id request header specified")]
    MissingEmbeddedId,

    #[error("Code signing requested but no key supplied when starting server")]
    SigningKeyMissing,

    #[error("Failed to sign payload: {0}")]
    Signing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read bundle directory {path}: {source}")]
    BundleUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read update metadata {path}: {source}")]
    MetadataRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid update metadata {path}: {source}")]
    InvalidMetadata {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("No expo config json found at {path}: {reason}")]
    MissingAppConfig { path: String, reason: String },

    #[error("Failed to read asset {path}: {source}")]
    AssetRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No rollback found at {path}: {source}")]
    RollbackMarkerUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl UpdateServiceError {
    pub fn invalid_platform(platform: impl Into<String>) -> Self {
        Self::InvalidPlatform(platform.into())
    }

    pub fn invalid_asset_path(path: impl Into<String>) -> Self {
        Self::InvalidAssetPath(path.into())
    }

    pub fn asset_not_found(path: impl Into<String>) -> Self {
        Self::AssetNotFound(path.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Errors the client can fix by changing its request.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            Self::InvalidPlatform(_)
                | Self::MissingRuntimeVersion
                | Self::InvalidRuntimeVersion(_)
                | Self::InvalidProtocolVersion(_)
                | Self::MissingAssetName
                | Self::InvalidAssetPath(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedRuntimeVersion(_)
                | Self::NoBundleGenerations(_)
                | Self::AssetNotFound(_)
                | Self::MissingPlatformMetadata { .. }
        )
    }

    /// Requests a protocol version cannot express.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::RollbackUnsupported | Self::NoUpdateUnsupported | Self::MissingEmbeddedId
        )
    }

    pub fn status_code(&self) -> StatusCode {
        if self.is_bad_request() || self.is_protocol_error() {
            StatusCode::BAD_REQUEST
        } else if self.is_not_found() {
            StatusCode::NOT_FOUND
        } else if matches!(self, Self::MethodNotAllowed(_)) {
            StatusCode::METHOD_NOT_ALLOWED
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidPlatform(_) => "invalid_platform",
            Self::MissingRuntimeVersion => "missing_runtime_version",
            Self::InvalidRuntimeVersion(_) => "invalid_runtime_version",
            Self::InvalidProtocolVersion(_) => "invalid_protocol_version",
            Self::MissingAssetName => "missing_asset_name",
            Self::InvalidAssetPath(_) => "invalid_asset_path",
            Self::MethodNotAllowed(_) => "method_not_allowed",
            Self::UnsupportedRuntimeVersion(_) => "unsupported_runtime_version",
            Self::NoBundleGenerations(_) => "no_bundle_generations",
            Self::AssetNotFound(_) => "asset_not_found",
            Self::MissingPlatformMetadata { .. } => "missing_platform_metadata",
            Self::RollbackUnsupported => "rollback_unsupported",
            Self::NoUpdateUnsupported => "no_update_unsupported",
            Self::MissingEmbeddedId => "missing_embedded_update_id",
            Self::SigningKeyMissing => "signing_key_missing",
            Self::Signing(_) => "signing_failed",
            Self::Config(_) => "configuration_error",
            Self::BundleUnreadable { .. } => "bundle_unreadable",
            Self::MetadataRead { .. } | Self::InvalidMetadata { .. } => "metadata_unreadable",
            Self::MissingAppConfig { .. } => "missing_app_config",
            Self::AssetRead { .. } => "asset_unreadable",
            Self::RollbackMarkerUnreadable { .. } => "rollback_marker_unreadable",
            Self::Serialization(_) => "serialization_failed",
        }
    }
}

pub type UpdateResult<T> = std::result::Result<T, UpdateServiceError>;

impl IntoResponse for UpdateServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Server-side failures keep their filesystem details out of the body.
        let message = if status.is_server_error() {
            error!("Update service error: {}", self);
            "Internal server error".to_owned()
        } else {
            warn!("Rejected update request: {}", self);
            self.to_string()
        };

        let details = match &self {
            Self::SigningKeyMissing => Some(self.to_string()),
            Self::UnsupportedRuntimeVersion(v) => Some(format!(
                "No updates are published for runtime version '{}'",
                v
            )),
            Self::InvalidPlatform(_) => Some("Expected either ios or android".to_owned()),
            _ => None,
        };

        (
            status,
            Json(ErrorResponse {
                error: self.error_code().to_owned(),
                message,
                details,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_follow_taxonomy() {
        assert_eq!(
            UpdateServiceError::invalid_platform("web").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            UpdateServiceError::UnsupportedRuntimeVersion("9.9.9".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            UpdateServiceError::NoBundleGenerations("updates/1.0.0".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            UpdateServiceError::RollbackUnsupported.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            UpdateServiceError::SigningKeyMissing.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            UpdateServiceError::MethodNotAllowed("POST".into()).status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = UpdateServiceError::AssetRead {
            path: "updates/1.0.0/7/assets/a".into(),
            source: io,
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_protocol_errors_are_not_server_errors() {
        for err in [
            UpdateServiceError::RollbackUnsupported,
            UpdateServiceError::NoUpdateUnsupported,
            UpdateServiceError::MissingEmbeddedId,
        ] {
            assert!(err.is_protocol_error());
            assert!(!err.status_code().is_server_error());
        }
    }

    #[test]
    fn test_server_errors_hide_details() {
        let response = UpdateServiceError::config("PRIVATE_KEY_PATH unreadable").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
