//! Eurora OTA Update Service
//!
//! Serves over-the-air updates to mobile apps speaking the Expo Updates
//! protocol (versions 0 and 1). Update bundles are published on disk as
//! `updates/{runtimeVersion}/{generation}/`; the newest generation of a
//! runtime version is served either as a manifest of content-addressed
//! assets or, when it carries a `rollback` marker, as a directive to fall
//! back to the embedded bundle.
//!
//! Responses are optionally signed with an RSA key when the client asks
//! for code signing.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info};

pub mod asset;
pub mod bundle;
pub mod classify;
pub mod config;
pub mod directive;
pub mod error;
pub mod handlers;
pub mod manifest;
pub mod multipart;
pub mod service;
pub mod signature;
pub mod store;
pub mod types;
pub mod utils;

use service::AppState;

/// Create the axum router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/manifest",
            get(handlers::manifest_handler).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/assets",
            get(handlers::asset_handler).fallback(handlers::method_not_allowed),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Initialize the update service and return the router
pub async fn init_update_service(config: &UpdateServiceConfig) -> Result<Router> {
    debug!(
        "Initializing update service for {} serving {}",
        config.hostname,
        config.updates_root.display()
    );

    let state = Arc::new(
        AppState::from_config(config)
            .await
            .context("Failed to create application state")?,
    );

    if state.can_sign() {
        info!("Code signing enabled");
    }

    Ok(create_router(state))
}

// Re-export commonly used types
pub use config::UpdateServiceConfig;
pub use error::{ErrorResponse, UpdateResult, UpdateServiceError};
pub use signature::{ManifestSigner, SignatureEnvelope};
pub use store::{BundleStore, LocalBundleStore, MemoryBundleStore};
pub use types::{
    AssetRecord, Manifest, NoUpdateDirective, Platform, ProtocolVersion, RollbackDirective,
    UpdateOutcome, UpdateRequest,
};
