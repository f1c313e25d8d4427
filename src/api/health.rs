//! Health check endpoint (`/health`, for load balancers)

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;

use super::AppState;

/// Simple health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub sessions: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.shutdown.is_shutting_down() {
        "shutting_down"
    } else {
        "healthy"
    };
    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        sessions: state.registry.len().await,
    })
}

/// Health routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
