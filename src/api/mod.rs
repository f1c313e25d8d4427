//! HTTP API
//!
//! - `POST /api/command/run`: start or reattach to a command session (event stream)
//! - `GET /api/command/runs`: list sessions, newest first
//! - `GET /api/command/runs/:id`: session detail
//! - `GET /health`: liveness

pub mod command;
pub mod health;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use cmdrelay_core::{Error, SessionRegistry, ShutdownController, StreamMultiplexer};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

pub use command::command_routes;
pub use health::health_routes;

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub multiplexer: StreamMultiplexer,
    pub shutdown: Arc<ShutdownController>,
}

/// JSON envelope for non-stream responses
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> ApiResponse<T> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Core error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::UnknownSession(_) => StatusCode::NOT_FOUND,
            Error::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if !self.0.is_client_error() && !matches!(self.0, Error::ShuttingDown) {
            error!(error = %self.0, "Request failed");
        }
        (status, Json(ApiResponse::<()>::error(self.0.to_string()))).into_response()
    }
}

/// All API routes with state applied.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(command_routes())
        .with_state(state)
}
