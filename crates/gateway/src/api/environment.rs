//! Environment inspection API.
//!
//! - `GET  /environment/state`                  — clock + every modality snapshot
//! - `GET  /environment/modalities`             — registered modality names
//! - `GET  /environment/modalities/:name`       — single modality snapshot
//! - `POST /environment/modalities/:name/query` — modality-defined query
//! - `POST /environment/validate`               — cross-state consistency check

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};

use crate::error::{api_error, status_for};
use crate::state::AppState;

/// 404 carrying the list of valid names, so callers can self-correct.
fn modality_not_found(name: &str, available: Vec<String>) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "detail": format!("unknown modality '{name}'"),
            "available_modalities": available,
        })),
    )
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /environment/state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn state(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.engine.lock();
    Json(engine.environment_state())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /environment/modalities
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_modalities(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.engine.lock();
    let names = engine.environment().modality_names();
    let count = names.len();
    Json(json!({
        "modalities": names,
        "count": count,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /environment/modalities/:name
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn modality_state(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    let engine = state.engine.lock();
    match engine.modality_snapshot(&name) {
        Ok(snapshot) => Json(json!({
            "modality_type": name,
            "current_time": engine.current_time(),
            "state": snapshot,
        }))
        .into_response(),
        Err(_) => modality_not_found(&name, engine.environment().modality_names()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /environment/modalities/:name/query
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn query_modality(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Option<Json<Value>>,
) -> Response {
    let params = body.map(|Json(v)| v).unwrap_or(Value::Null);
    let engine = state.engine.lock();
    if !engine.environment().contains(&name) {
        return modality_not_found(&name, engine.environment().modality_names());
    }
    match engine.query_modality(&name, &params) {
        Ok(results) => Json(json!({
            "modality_type": name,
            "query": params,
            "results": results,
        }))
        .into_response(),
        Err(e) => api_error(status_for(&e), e.to_string()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /environment/validate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn validate(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.engine.lock();
    let errors = engine.validate_environment();
    Json(json!({
        "valid": errors.is_empty(),
        "errors": errors,
        "checked_at": engine.current_time(),
    }))
}
