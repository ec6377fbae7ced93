//! Calendar convenience routes.
//!
//! - `POST /calendar/create|update|delete` — scoped event operations
//!   (`recurrence_scope` ∈ this / this_and_future / all)
//! - `POST /calendar/query` — window queries, optionally expanding
//!   recurring events into occurrences
//! - `GET  /calendar/state` — full modality snapshot

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};

use crate::api::{execute_immediate, tag_operation};
use crate::error::{api_error, status_for, ApiError};
use crate::state::AppState;

const MODALITY: &str = "calendar";

fn run(state: &AppState, body: Value, operation: &str, message: &str) -> Response {
    match tag_operation(body, "operation", operation) {
        Ok(data) => execute_immediate(state, MODALITY, data, message),
        Err(response) => response,
    }
}

pub async fn create(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    run(&state, body, "create", "calendar event created")
}

pub async fn update(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    run(&state, body, "update", "calendar event updated")
}

pub async fn delete_event(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    run(&state, body, "delete", "calendar event deleted")
}

pub async fn query(
    State(state): State<AppState>,
    body: Option<Json<Value>>,
) -> Response {
    let params = body.map(|Json(v)| v).unwrap_or(Value::Null);
    let engine = state.engine.lock();
    match engine.query_modality(MODALITY, &params) {
        Ok(results) => Json(json!({
            "modality_type": MODALITY,
            "query": params,
            "results": results,
        }))
        .into_response(),
        Err(e) => api_error(status_for(&e), e.to_string()),
    }
}

pub async fn state(State(state): State<AppState>) -> Result<Response, Response> {
    let snapshot = state
        .engine
        .lock()
        .modality_snapshot(MODALITY)
        .map_err(|e| ApiError(e).into_response())?;
    Ok(Json(snapshot).into_response())
}
