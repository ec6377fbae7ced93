//! Location convenience routes.
//!
//! - `POST /location/update` — move to a new fix (appends to history)
//! - `POST /location/query`  — history window queries
//! - `GET  /location/state`  — current fix + history

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};

use crate::api::execute_immediate;
use crate::error::{api_error, status_for, ApiError};
use crate::state::AppState;

const MODALITY: &str = "location";

pub async fn update(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    execute_immediate(&state, MODALITY, body, "location updated")
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
