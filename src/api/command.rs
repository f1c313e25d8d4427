//! Command session endpoints
//!
//! POST /api/command/run       - Start a command, or reattach with `sessionId`
//! GET  /api/command/runs      - List sessions, newest first
//! GET  /api/command/runs/:id  - Session detail

use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::{get, post},
    Json, Router,
};
use cmdrelay_core::{SessionDetail, SessionSummary, StreamGuard, StreamItem, Subscription};
use futures::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use tracing::{info, warn};

use super::{ApiError, ApiResponse, AppState};

/// Body of a run request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCommandRequest {
    /// Shell command text; ignored when reattaching
    #[serde(default)]
    pub text: String,
    /// Session to reattach to
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Start or reattach, then stream the session's events.
async fn run_command(
    State(state): State<AppState>,
    Json(request): Json<RunCommandRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let attachment = state
        .registry
        .start_or_attach(&request.text, request.session_id.as_deref())
        .await?;
    let session = attachment.session();

    if !attachment.is_new() {
        info!(
            session_id = %session.id(),
            complete = session.is_complete(),
            "Client reattached"
        );
    }

    let subscription = state.multiplexer.attach(session, 0, attachment.is_new());
    let guard = state.shutdown.track_stream();
    Ok(Sse::new(event_stream(subscription, guard)))
}

fn event_stream(
    subscription: Subscription,
    guard: StreamGuard,
) -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::unfold((subscription, guard), |(mut sub, guard)| async move {
        loop {
            let item = sub.next().await?;
            if let Some(event) = to_sse_event(&sub, item) {
                return Some((Ok(event), (sub, guard)));
            }
        }
    })
}

fn to_sse_event(sub: &Subscription, item: StreamItem) -> Option<Event> {
    match item {
        StreamItem::KeepAlive => Some(Event::default().comment("keep-alive")),
        StreamItem::Event(event) => match event.to_json() {
            Ok(json) => Some(Event::default().data(json)),
            Err(e) => {
                warn!(session_id = %sub.session_id(), error = %e, "Failed to encode event");
                None
            }
        },
    }
}

/// List every known session, newest first.
async fn list_runs(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.registry.list().await)
}

/// Detail of one session.
async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<SessionDetail>>, ApiError> {
    let session = state.registry.get(&id).await?;
    Ok(Json(ApiResponse::success(session.detail().await)))
}

/// Command routes
pub fn command_routes() -> Router<AppState> {
    Router::new()
        .route("/api/command/run", post(run_command))
        .route("/api/command/runs", get(list_runs))
        .route("/api/command/runs/:id", get(get_run))
}
