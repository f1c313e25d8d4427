//! HTTP API tests
//!
//! Drive the full router in-process with `tower::ServiceExt::oneshot` and
//! parse the event-stream bodies.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use cmdrelay::server::{build_router, build_state, config::AppConfig};
use cmdrelay_core::ShutdownController;
use futures::StreamExt;
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> Router {
    app_with(AppConfig::default())
}

fn app_with(config: AppConfig) -> Router {
    let shutdown = ShutdownController::new();
    build_router(build_state(&config, &shutdown))
}

fn run_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/command/run")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Parse `data:` payloads of an SSE body, skipping comments.
fn parse_events(text: &str) -> Vec<Value> {
    text.split("\n\n")
        .flat_map(|frame| frame.lines())
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect()
}

async fn body_text(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn run(app: &Router, body: Value) -> Vec<Value> {
    let response = app.clone().oneshot(run_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    parse_events(&body_text(response.into_body()).await)
}

async fn runs(app: &Router) -> Vec<Value> {
    let response = app
        .clone()
        .oneshot(get_request("/api/command/runs"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let value: Value = serde_json::from_str(&body_text(response.into_body()).await).unwrap();
    value.as_array().cloned().unwrap()
}

#[cfg(unix)]
#[tokio::test]
async fn test_echo_hello_stream() {
    let app = app();
    let response = app
        .clone()
        .oneshot(run_request(json!({ "text": "echo hello" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));

    let events = parse_events(&body_text(response.into_body()).await);
    assert_eq!(events.len(), 3);
    assert_eq!(events[0]["type"], "session");
    assert!(events[0]["data"].as_str().is_some_and(|id| !id.is_empty()));
    assert_eq!(events[1], json!({ "type": "stdout", "data": "hello\n" }));
    assert_eq!(
        events[2],
        json!({ "type": "exit", "data": "Process exited", "code": 0 })
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_invalid_command_reports_error() {
    let app = app();
    let events = run(&app, json!({ "text": "cmdrelay-no-such-program" })).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["type"], "session");
    assert_eq!(events[1]["type"], "error");

    let listed = runs(&app).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["isComplete"], true);
    assert!(listed[0].get("exitCode").is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn test_running_session_listed_incomplete() {
    let app = app();
    // Keep the response alive so the stream stays attached.
    let response = app
        .clone()
        .oneshot(run_request(json!({ "text": "sleep 1" })))
        .await
        .unwrap();

    let listed = runs(&app).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["command"], "sleep 1");
    assert_eq!(listed[0]["isComplete"], false);
    assert!(listed[0].get("exitCode").is_none());
    assert!(listed[0]["startTime"].is_i64());
    drop(response);
}

#[cfg(unix)]
#[tokio::test]
async fn test_runs_newest_first() {
    let app = app();
    let mut ids = Vec::new();
    for text in ["echo t1", "echo t2", "echo t3"] {
        let events = run(&app, json!({ "text": text })).await;
        ids.push(events[0]["data"].as_str().unwrap().to_string());
    }

    let listed: Vec<String> = runs(&app)
        .await
        .iter()
        .map(|r| r["sessionId"].as_str().unwrap().to_string())
        .collect();
    ids.reverse();
    assert_eq!(listed, ids);
}

#[cfg(unix)]
#[tokio::test]
async fn test_reconnect_replays_without_gap() {
    let app = app();
    let response = app
        .clone()
        .oneshot(run_request(
            json!({ "text": "echo first; sleep 0.3; echo second" }),
        ))
        .await
        .unwrap();

    // Read until the session id is known, then disconnect.
    let mut frames = response.into_body().into_data_stream();
    let mut seen = String::new();
    let session_id = loop {
        let bytes = frames.next().await.unwrap().unwrap();
        seen.push_str(std::str::from_utf8(&bytes).unwrap());
        if let Some(event) = parse_events(&seen).first() {
            break event["data"].as_str().unwrap().to_string();
        }
    };
    drop(frames);

    let events = run(&app, json!({ "text": "ignored", "sessionId": session_id })).await;
    assert_ne!(events[0]["type"], "session");
    let stdout: String = events
        .iter()
        .filter(|e| e["type"] == "stdout")
        .map(|e| e["data"].as_str().unwrap())
        .collect();
    assert_eq!(stdout, "first\nsecond\n");
    assert_eq!(events.last().unwrap()["type"], "exit");

    // Reconnecting to a finished session replays the same history.
    let again = run(&app, json!({ "sessionId": session_id })).await;
    assert_eq!(again, events);
    assert_eq!(runs(&app).await.len(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_unknown_session_id_starts_new_session() {
    let app = app();
    let events = run(
        &app,
        json!({ "text": "echo fresh", "sessionId": "not-a-known-session" }),
    )
    .await;
    assert_eq!(events[0]["type"], "session");
    assert_ne!(events[0]["data"], "not-a-known-session");
    assert_eq!(events[1], json!({ "type": "stdout", "data": "fresh\n" }));
}

#[cfg(unix)]
#[tokio::test]
async fn test_idle_stream_sends_keep_alive_comment() {
    let mut config = AppConfig::default();
    config.sessions.keep_alive_secs = 1;
    let app = app_with(config);

    let response = app
        .oneshot(run_request(json!({ "text": "sleep 2.5; echo x" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response.into_body()).await;

    let keep_alive = text.find(": keep-alive\n\n").expect("keep-alive comment");
    let stdout = text.find("\"type\":\"stdout\"").expect("stdout event");
    assert!(keep_alive < stdout);

    let events = parse_events(&text);
    assert_eq!(events[1], json!({ "type": "stdout", "data": "x\n" }));
    assert_eq!(events.last().unwrap()["code"], 0);
}

#[tokio::test]
async fn test_blank_text_is_bad_request() {
    let app = app();
    let response = app
        .oneshot(run_request(json!({ "text": "   " })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_str(&body_text(response.into_body()).await).unwrap();
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("required"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_detail() {
    let app = app();
    let events = run(&app, json!({ "text": "echo detail" })).await;
    let id = events[0]["data"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(get_request(&format!("/api/command/runs/{id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response.into_body()).await).unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["sessionId"], id);
    assert_eq!(body["data"]["exitCode"], 0);
    assert_eq!(body["data"]["chunks"], 2);
    assert_eq!(body["data"]["subscribers"], 0);
}

#[tokio::test]
async fn test_unknown_run_detail_is_not_found() {
    let response = app()
        .oneshot(get_request("/api/command/runs/missing"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health() {
    let response = app().oneshot(get_request("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response.into_body()).await).unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["sessions"], 0);
}
