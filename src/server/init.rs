//! Server initialization
//!
//! Builds the shared state and router, then runs the HTTP server until a
//! shutdown signal arrives.

use super::config::AppConfig;
use super::validation::validate_config;
use crate::api::{api_router, AppState};
use anyhow::{Context, Result};
use axum::Router;
use cmdrelay_core::{
    shutdown_signal_with_controller, SessionRegistry, ShutdownController, StreamMultiplexer,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Build the handler state from configuration.
pub fn build_state(config: &AppConfig, shutdown: &Arc<ShutdownController>) -> AppState {
    let registry = SessionRegistry::new(config.sessions.registry_config(), shutdown.token());
    let multiplexer = StreamMultiplexer::new(config.sessions.multiplexer_config(), shutdown.token());
    AppState {
        registry,
        multiplexer,
        shutdown: Arc::clone(shutdown),
    }
}

/// Build the router with all endpoints and layers.
pub fn build_router(state: AppState) -> Router {
    api_router(state)
        .route("/", axum::routing::get(|| async { "cmdrelay" }))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Run the server
pub async fn run(config: AppConfig) -> Result<()> {
    info!("Starting cmdrelay v{}", env!("CARGO_PKG_VERSION"));
    validate_config(&config)?;

    let shutdown = ShutdownController::new();
    let state = build_state(&config, &shutdown);
    let registry = Arc::clone(&state.registry);
    let streams = state.multiplexer.config();
    info!(
        keep_alive_secs = streams.keep_alive.as_secs(),
        max_batch = streams.max_batch,
        "Stream multiplexer ready"
    );
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!(
        retention_secs = config.sessions.retention_secs,
        "HTTP server listening on http://{}",
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_controller(Arc::clone(&shutdown)))
        .await
        .context("HTTP server error")?;

    registry.shutdown().await;
    info!("cmdrelay shutdown complete");
    Ok(())
}
