//! SMS convenience routes.
//!
//! - `POST /sms/send|receive` — add a message (bare fields, wrapped into
//!   `message_data` here)
//! - `POST /sms/read|unread|delete` — flag operations on `message_ids`
//! - `POST /sms/react` — emoji reaction (empty emoji removes)
//! - `GET  /sms/state` — full modality snapshot

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};

use crate::api::{execute_immediate, tag_operation};
use crate::error::{api_error, ApiError};
use crate::state::AppState;

const MODALITY: &str = "sms";

/// send/receive accept the message fields at the top level; the modality
/// input nests them under `message_data`.
fn wrap_message(body: Value, action: &str) -> Result<Value, Response> {
    if !body.is_object() {
        return Err(api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "request body must be a JSON object",
        ));
    }
    Ok(json!({
        "action": action,
        "message_data": body,
    }))
}

pub async fn send(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    match wrap_message(body, "send_message") {
        Ok(data) => execute_immediate(&state, MODALITY, data, "message sent"),
        Err(response) => response,
    }
}

pub async fn receive(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    match wrap_message(body, "receive_message") {
        Ok(data) => execute_immediate(&state, MODALITY, data, "message received"),
        Err(response) => response,
    }
}

fn run(state: &AppState, body: Value, action: &str, message: &str) -> Response {
    match tag_operation(body, "action", action) {
        Ok(data) => execute_immediate(state, MODALITY, data, message),
        Err(response) => response,
    }
}

pub async fn read(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    run(&state, body, "read", "messages marked read")
}

pub async fn unread(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    run(&state, body, "unread", "messages marked unread")
}

pub async fn delete_message(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    run(&state, body, "delete", "messages deleted")
}

pub async fn react(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    run(&state, body, "react", "reaction updated")
}

pub async fn state(State(state): State<AppState>) -> Result<Response, Response> {
    let snapshot = state
        .engine
        .lock()
        .modality_snapshot(MODALITY)
        .map_err(|e| ApiError(e).into_response())?;
    Ok(Json(snapshot).into_response())
}
