//! Clock control API.
//!
//! - `GET  /simulator/time`              — current clock state
//! - `POST /simulator/time/advance`      — execute due events, move forward
//! - `POST /simulator/time/set`          — jump forward, skipping events
//! - `POST /simulator/time/skip-to-next` — land exactly on the next event
//! - `POST /simulator/time/pause|resume` — gate the auto-advance worker
//! - `POST /simulator/time/set-scale`    — auto-advance speed factor
//!
//! Also hosts the time-preferences convenience routes (`/time/update`,
//! `/time/state`) since they share this module's vocabulary.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::{execute_immediate, parse_body};
use crate::error::{api_error, conflict_as_bad_request, ApiError};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /simulator/time
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_time(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.engine.lock();
    Json(json!({
        "current_time": engine.current_time(),
        "time_scale": engine.time_scale(),
        "is_paused": engine.is_paused(),
        "auto_advance": engine.auto_advance(),
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /simulator/time/advance
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct AdvanceRequest {
    pub seconds: f64,
}

pub async fn advance(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Response, Response> {
    let req: AdvanceRequest = parse_body(body)?;
    let result = state
        .engine
        .lock()
        .advance(req.seconds)
        .map_err(conflict_as_bad_request)?;
    Ok(Json(json!(result)).into_response())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /simulator/time/set
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct SetTimeRequest {
    pub target_time: DateTime<Utc>,
}

pub async fn set_time(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Response, Response> {
    let req: SetTimeRequest = parse_body(body)?;
    let result = state
        .engine
        .lock()
        .set_time(req.target_time)
        .map_err(conflict_as_bad_request)?;
    Ok(Json(json!(result)).into_response())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /simulator/time/skip-to-next
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn skip_to_next(State(state): State<AppState>) -> Result<Response, Response> {
    let result = state
        .engine
        .lock()
        .skip_to_next()
        .map_err(|e| ApiError(e).into_response())?;
    Ok(Json(json!(result)).into_response())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /simulator/time/pause, POST /simulator/time/resume
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn pause(State(state): State<AppState>) -> impl IntoResponse {
    let mut engine = state.engine.lock();
    engine.pause();
    Json(json!({ "is_paused": true }))
}

pub async fn resume(State(state): State<AppState>) -> impl IntoResponse {
    let mut engine = state.engine.lock();
    engine.resume();
    Json(json!({ "is_paused": false }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /simulator/time/set-scale
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct SetScaleRequest {
    pub scale: f64,
}

pub async fn set_scale(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Response, Response> {
    let req: SetScaleRequest = parse_body(body)?;
    let scale = state
        .engine
        .lock()
        .set_time_scale(req.scale)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok(Json(json!({ "time_scale": scale })).into_response())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /time/update, GET /time/state (time preferences modality)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn update_preferences(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Response {
    execute_immediate(&state, "time", body, "time preferences updated")
}

pub async fn preferences_state(State(state): State<AppState>) -> Result<Response, Response> {
    let snapshot = state
        .engine
        .lock()
        .modality_snapshot("time")
        .map_err(|e| ApiError(e).into_response())?;
    Ok(Json(snapshot).into_response())
}
