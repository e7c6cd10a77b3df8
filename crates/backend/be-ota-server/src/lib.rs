use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{Router, http::StatusCode, routing::get};
use be_ota_update_service::{UpdateServiceConfig, init_update_service};

pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:3000";

/// Configuration for running the update server.
pub struct ServerConfig {
    pub http_addr: SocketAddr,
    pub update: UpdateServiceConfig,
    /// When this receiver gets a value, the server shuts down gracefully.
    pub shutdown: tokio::sync::watch::Receiver<()>,
}

impl ServerConfig {
    /// Reads `HTTP_ADDR` plus the update service variables.
    pub fn from_env(shutdown: tokio::sync::watch::Receiver<()>) -> Result<Self> {
        let http_addr = std::env::var("HTTP_ADDR")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string());

        Ok(Self {
            http_addr: http_addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid HTTP_ADDR format: {}", http_addr))?,
            update: UpdateServiceConfig::from_env().context("Invalid update service config")?,
            shutdown,
        })
    }
}

/// Mount the update routes next to `/health`.
pub fn build_http_router(update_router: Router) -> Router {
    let health_route = Router::new().route("/health", get(|| async { StatusCode::OK }));
    update_router.merge(health_route)
}

pub async fn run_server(config: ServerConfig) -> Result<()> {
    let update_router = init_update_service(&config.update)
        .await
        .context("Failed to initialize update service")?;
    let http_router = build_http_router(update_router);

    tracing::info!(
        "Serving updates from {} as {}",
        config.update.updates_root.display(),
        config.update.hostname
    );
    tracing::info!("Starting HTTP server at {}", config.http_addr);

    let mut http_shutdown = config.shutdown.clone();
    let http_listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.http_addr))?;

    axum::serve(
        http_listener,
        http_router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = http_shutdown.changed().await;
        tracing::info!("Shutting down HTTP server...");
    })
    .await
    .context("HTTP server error")?;

    Ok(())
}
