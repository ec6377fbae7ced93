//! Email convenience routes. Each POST synthesizes an immediate event and
//! reports its execution outcome.
//!
//! - `POST /email/send|receive`                — add an email
//! - `POST /email/read|unread|star|unstar`     — flag operations
//! - `POST /email/archive|delete|move`         — folder operations
//! - `POST /email/label|unlabel`               — label operations
//! - `GET  /email/state`                       — full modality snapshot

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;

use crate::api::{execute_immediate, tag_operation};
use crate::error::ApiError;
use crate::state::AppState;

const MODALITY: &str = "email";

fn run(state: &AppState, body: Value, operation: &str, message: &str) -> Response {
    match tag_operation(body, "operation", operation) {
        Ok(data) => execute_immediate(state, MODALITY, data, message),
        Err(response) => response,
    }
}

pub async fn send(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    run(&state, body, "send", "email sent")
}

pub async fn receive(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    run(&state, body, "receive", "email received")
}

pub async fn read(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    run(&state, body, "read", "emails marked read")
}

pub async fn unread(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    run(&state, body, "unread", "emails marked unread")
}

pub async fn star(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    run(&state, body, "star", "emails starred")
}

pub async fn unstar(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    run(&state, body, "unstar", "emails unstarred")
}

pub async fn archive(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    run(&state, body, "archive", "emails archived")
}

pub async fn delete_email(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    run(&state, body, "delete", "emails moved to trash")
}

pub async fn move_email(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    run(&state, body, "move", "emails moved")
}

pub async fn label(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    run(&state, body, "label", "labels added")
}

pub async fn unlabel(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    run(&state, body, "unlabel", "labels removed")
}

pub async fn state(State(state): State<AppState>) -> Result<Response, Response> {
    let snapshot = state
        .engine
        .lock()
        .modality_snapshot(MODALITY)
        .map_err(|e| ApiError(e).into_response())?;
    Ok(Json(snapshot).into_response())
}
