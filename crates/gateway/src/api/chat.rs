//! Chat convenience routes.
//!
//! - `POST /chat/send`  — append a message (role defaults to "user")
//! - `POST /chat/query` — filter the transcript
//! - `GET  /chat/state` — full modality snapshot

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};

use crate::api::{execute_immediate, tag_operation};
use crate::error::{status_for, api_error, ApiError};
use crate::state::AppState;

const MODALITY: &str = "chat";

pub async fn send(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let data = match tag_operation(body, "operation", "send_message") {
        Ok(Value::Object(mut map)) => {
            map.entry("role").or_insert(Value::String("user".into()));
            Value::Object(map)
        }
        Ok(other) => other,
        Err(response) => return response,
    };
    execute_immediate(&state, MODALITY, data, "chat message sent")
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
