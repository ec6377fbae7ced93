//! Event scheduling and inspection API.
//!
//! - `POST   /events`           — schedule a future event
//! - `POST   /events/immediate` — schedule at the current instant, top priority
//! - `GET    /events`           — filtered listing with counts
//! - `GET    /events/next`      — earliest pending event
//! - `GET    /events/summary`   — totals by status and modality
//! - `GET    /events/:id`       — event detail (any status)
//! - `DELETE /events/:id`       — cancel a pending event

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use es_domain::event::{EventRequest, EventStatus};
use es_engine::queue::EventFilter;

use crate::api::parse_body;
use crate::error::{api_error, conflict_as_bad_request, ApiError};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn event_view(event: &es_domain::event::SimEvent) -> Value {
    json!({
        "event_id": event.event_id,
        "modality": event.modality,
        "status": event.status,
        "priority": event.priority,
        "scheduled_time": event.scheduled_time,
        "created_at": event.created_at,
    })
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Response, Response> {
    let req: EventRequest = parse_body(body)?;
    let event = state
        .engine
        .lock()
        .schedule(req)
        .map_err(|e| ApiError(e).into_response())?;
    Ok(Json(event_view(&event)).into_response())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /events/immediate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ImmediateEventRequest {
    pub modality: String,
    pub data: Value,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, Value>,
    #[serde(default)]
    pub agent_id: Option<String>,
}

pub async fn create_immediate(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Response, Response> {
    let req: ImmediateEventRequest = parse_body(body)?;
    let mut engine = state.engine.lock();
    let request = EventRequest {
        scheduled_time: engine.current_time(),
        modality: req.modality,
        data: req.data,
        priority: 50,
        metadata: req.metadata,
        agent_id: req.agent_id,
    };
    let event = engine
        .schedule_immediate(request)
        .map_err(|e| ApiError(e).into_response())?;
    Ok(Json(event_view(&event)).into_response())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Deserialize)]
pub struct ListEventsQuery {
    pub status: Option<EventStatus>,
    pub modality: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListEventsQuery>,
) -> impl IntoResponse {
    let filter = EventFilter {
        status: query.status,
        modality: query.modality,
        start_time: query.start_time,
        end_time: query.end_time,
        limit: query.limit,
        offset: query.offset,
    };
    let engine = state.engine.lock();
    let (events, total) = engine.list_events(&filter);
    let summary = engine.queue_summary();
    Json(json!({
        "events": events,
        "total": total,
        "pending": summary.pending,
        "executed": summary.executed,
        "failed": summary.failed,
        "skipped": summary.skipped,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /events/next
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn next(State(state): State<AppState>) -> Response {
    match state.engine.lock().next_pending() {
        Some(event) => Json(json!(event)).into_response(),
        None => api_error(StatusCode::NOT_FOUND, "no pending events"),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /events/summary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn summary(State(state): State<AppState>) -> impl IntoResponse {
    let summary = state.engine.lock().queue_summary();
    Json(json!({
        "total": summary.total,
        "pending": summary.pending,
        "executed": summary.executed,
        "failed": summary.failed,
        "skipped": summary.skipped,
        "cancelled": summary.cancelled,
        "by_modality": summary.by_modality,
        "next_event_time": summary.next_event_time,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /events/:id, DELETE /events/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_event_id(raw: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(raw).map_err(|_| api_error(StatusCode::NOT_FOUND, format!("event '{raw}' not found")))
}

pub async fn detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let event_id = parse_event_id(&id)?;
    match state.engine.lock().get_event(&event_id) {
        Some(event) => Ok(Json(json!(event)).into_response()),
        None => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("event '{id}' not found"),
        )),
    }
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let event_id = parse_event_id(&id)?;
    let event = state
        .engine
        .lock()
        .cancel_event(&event_id)
        .map_err(conflict_as_bad_request)?;
    Ok(Json(json!({
        "cancelled": true,
        "event_id": event.event_id,
    }))
    .into_response())
}
