//! API route definitions.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error};

use crate::broadcast::Event;
use crate::engine::{Admission, AdmissionError};
use crate::probes::{TestConfig, TestKind, TestParams};

use super::state::AppState;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/tests", post(start_test))
        .route("/tests/stop-all", post(stop_all))
        .route("/tests/{id}", get(get_test).delete(stop_test))
        .route("/tests/{id}/results", get(get_results))
        .route("/schedules", get(list_schedules).post(add_schedule))
        .route("/schedules/dry-run", get(schedule_dry_run))
        .route("/schedules/{name}", delete(remove_schedule))
        .route("/live", get(live_stream))
}

fn envelope(data: Value) -> Json<Value> {
    Json(json!({
        "data": data,
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

async fn health() -> Json<Value> {
    envelope(json!({ "status": "ok" }))
}

async fn stats(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.engine.stats().await;
    envelope(json!(snapshot))
}

#[derive(Debug, Deserialize)]
struct StartTestRequest {
    kind: TestKind,
    #[serde(default)]
    params: TestParams,
}

async fn start_test(
    State(state): State<AppState>,
    Json(req): Json<StartTestRequest>,
) -> (StatusCode, Json<Value>) {
    let config = TestConfig::new(req.kind, req.params);

    if let Err(e) = state.store.save_config(&config).await {
        error!(test_id = %config.test_id, error = %e, "failed to persist test config");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "failed to persist test config" })),
        );
    }

    match state.engine.start(config.clone()).await {
        Ok(Admission::Started) => (
            StatusCode::ACCEPTED,
            envelope(json!({ "test_id": config.test_id, "state": "running" })),
        ),
        Ok(Admission::Queued { position }) => (
            StatusCode::ACCEPTED,
            envelope(json!({
                "test_id": config.test_id,
                "state": "queued",
                "position": position
            })),
        ),
        Err(e) => {
            let status = match &e {
                AdmissionError::Duplicate { .. } => StatusCode::CONFLICT,
                AdmissionError::QueueFull { .. } => StatusCode::TOO_MANY_REQUESTS,
                AdmissionError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            };
            (status, Json(json!({ "error": e.to_string() })))
        }
    }
}

async fn stop_test(State(state): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    let stopped = state.engine.stop(&id).await;
    envelope(json!({ "test_id": id, "stopped": stopped }))
}

async fn stop_all(State(state): State<AppState>) -> Json<Value> {
    let stopped = state.engine.stop_all().await;
    envelope(json!({ "stopped": stopped }))
}

async fn get_test(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.store.get_config(&id).await {
        Ok(Some(config)) => (StatusCode::OK, envelope(json!(config))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("test {} not found", id) })),
        ),
        Err(e) => {
            error!(test_id = %id, error = %e, "failed to load test config");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "failed to load test" })),
            )
        }
    }
}

async fn get_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.store.get_results(&id).await {
        Ok(samples) => {
            let total = samples.len();
            (
                StatusCode::OK,
                Json(json!({ "data": samples, "meta": { "total": total } })),
            )
        }
        Err(e) => {
            error!(test_id = %id, error = %e, "failed to load samples");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "failed to load results" })),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
struct AddScheduleRequest {
    name: String,
    cron: String,
    kind: TestKind,
    #[serde(default)]
    params: TestParams,
}

async fn list_schedules(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.scheduler.list().await {
        Ok(entries) => {
            let total = entries.len();
            (
                StatusCode::OK,
                Json(json!({ "data": entries, "meta": { "total": total } })),
            )
        }
        Err(e) => {
            error!(error = %e, "failed to list schedules");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "failed to list schedules" })),
            )
        }
    }
}

async fn add_schedule(
    State(state): State<AppState>,
    Json(req): Json<AddScheduleRequest>,
) -> (StatusCode, Json<Value>) {
    match state
        .scheduler
        .add(&req.name, &req.cron, req.kind, &req.params)
        .await
    {
        Ok(()) => (
            StatusCode::CREATED,
            envelope(json!({ "name": req.name })),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

async fn remove_schedule(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.scheduler.remove(&name).await {
        Ok(()) => (StatusCode::OK, envelope(json!({ "removed": name }))),
        Err(e) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

#[derive(Debug, Deserialize)]
struct DryRunQuery {
    hours: Option<u64>,
}

async fn schedule_dry_run(
    State(state): State<AppState>,
    Query(query): Query<DryRunQuery>,
) -> (StatusCode, Json<Value>) {
    let hours = query.hours.unwrap_or(24);
    match state.scheduler.preview_next_runs(hours).await {
        Ok(upcoming) => {
            let runs: Vec<Value> = upcoming
                .into_iter()
                .map(|(time, name, kind)| json!({ "time": time, "name": name, "kind": kind }))
                .collect();
            (
                StatusCode::OK,
                envelope(json!({ "hours": hours, "upcoming": runs })),
            )
        }
        Err(e) => {
            error!(error = %e, "failed to preview schedules");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "failed to preview schedules" })),
            )
        }
    }
}

/// Upgrade to a WebSocket and forward live engine events as JSON frames.
async fn live_stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let rx = state.broadcaster.subscribe();
    ws.on_upgrade(move |socket| forward_events(socket, rx))
}

async fn forward_events(
    mut socket: WebSocket,
    mut rx: tokio::sync::broadcast::Receiver<Event>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                let Ok(payload) = serde_json::to_string(&event) else {
                    continue;
                };
                if socket.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            // A slow subscriber misses events rather than slowing the engine.
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "live subscriber lagging");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
