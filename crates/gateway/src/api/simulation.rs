//! Simulation lifecycle + undo/redo API.
//!
//! - `POST /simulation/start`       — begin (optionally with auto-advance)
//! - `POST /simulation/stop`        — halt; idempotent
//! - `POST /simulation/reset`       — all events back to pending
//! - `POST /simulation/clear`       — drop events + wipe modality state
//! - `GET  /simulation/status`      — engine/clock/queue overview
//! - `POST /simulation/undo|redo`   — reverse / re-apply executions
//! - `GET  /simulation/undo/status` — stack depths and digests

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use es_engine::auto_advance;

use crate::api::parse_body;
use crate::error::{api_error, ApiError};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /simulation/start
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub auto_advance: bool,
    #[serde(default = "default_time_scale")]
    pub time_scale: f64,
}

impl Default for StartRequest {
    fn default() -> Self {
        Self {
            auto_advance: false,
            time_scale: default_time_scale(),
        }
    }
}

fn default_time_scale() -> f64 {
    1.0
}

pub async fn start(
    State(state): State<AppState>,
    body: Option<Json<Value>>,
) -> Result<Response, Response> {
    let req: StartRequest = match body {
        Some(Json(value)) => parse_body(value)?,
        None => StartRequest::default(),
    };
    let (summary, newly_started) = {
        let mut engine = state.engine.lock();
        let was_running = engine.is_running();
        let summary = engine
            .start(req.auto_advance, req.time_scale)
            .map_err(|e| ApiError(e).into_response())?;
        (summary, !was_running)
    };
    // a redundant start must not spawn a second worker
    if newly_started && summary.auto_advance {
        auto_advance::spawn(
            state.engine.clone(),
            state.config.simulation.base_tick_ms,
        );
    }
    Ok(Json(serde_json::json!(summary)).into_response())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /simulation/stop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn stop(State(state): State<AppState>) -> impl IntoResponse {
    let summary = state.engine.lock().stop();
    Json(serde_json::json!(summary))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /simulation/reset
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn reset(State(state): State<AppState>) -> impl IntoResponse {
    let summary = state.engine.lock().reset();
    Json(serde_json::json!(summary))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /simulation/clear
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Deserialize)]
pub struct ClearRequest {
    #[serde(default)]
    pub reset_time_to: Option<String>,
}

pub async fn clear(
    State(state): State<AppState>,
    body: Option<Json<Value>>,
) -> Result<Response, Response> {
    let req: ClearRequest = match body {
        Some(Json(value)) => parse_body(value)?,
        None => ClearRequest::default(),
    };
    let reset_time_to = match req.reset_time_to {
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(&raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| {
                    api_error(
                        StatusCode::BAD_REQUEST,
                        format!("reset_time_to is not a valid ISO-8601 instant: {e}"),
                    )
                })?,
        ),
        None => None,
    };
    let summary = state.engine.lock().clear(reset_time_to);
    Ok(Json(serde_json::json!(summary)).into_response())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /simulation/status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.engine.lock().status();
    Json(serde_json::json!(status))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /simulation/undo, POST /simulation/redo
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct UndoRequest {
    #[serde(default = "default_count")]
    pub count: usize,
}

impl Default for UndoRequest {
    fn default() -> Self {
        Self { count: default_count() }
    }
}

fn default_count() -> usize {
    1
}

pub async fn undo(
    State(state): State<AppState>,
    body: Option<Json<Value>>,
) -> Result<Response, Response> {
    let req: UndoRequest = match body {
        Some(Json(value)) => parse_body(value)?,
        None => UndoRequest::default(),
    };
    let outcome = state
        .engine
        .lock()
        .undo(req.count)
        .map_err(|e| ApiError(e).into_response())?;
    Ok(Json(serde_json::json!({
        "undone": outcome.undone,
        "entries": outcome.entries,
    }))
    .into_response())
}

pub async fn redo(
    State(state): State<AppState>,
    body: Option<Json<Value>>,
) -> Result<Response, Response> {
    let req: UndoRequest = match body {
        Some(Json(value)) => parse_body(value)?,
        None => UndoRequest::default(),
    };
    let outcome = state
        .engine
        .lock()
        .redo(req.count)
        .map_err(|e| ApiError(e).into_response())?;
    Ok(Json(serde_json::json!({
        "redone": outcome.redone,
        "entries": outcome.entries,
    }))
    .into_response())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /simulation/undo/status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn undo_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.engine.lock().undo_status();
    Json(serde_json::json!(status))
}
