pub mod calendar;
pub mod chat;
pub mod email;
pub mod environment;
pub mod events;
pub mod location;
pub mod simulation;
pub mod sms;
pub mod time;
pub mod weather;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};

use es_domain::event::EventRequest;
use es_domain::Error;

use crate::error::{api_error, status_for};
use crate::state::AppState;

/// Build the full API router.
pub fn router() -> Router<AppState> {
    Router::new()
        // Simulation lifecycle
        .route("/simulation/start", post(simulation::start))
        .route("/simulation/stop", post(simulation::stop))
        .route("/simulation/reset", post(simulation::reset))
        .route("/simulation/clear", post(simulation::clear))
        .route("/simulation/status", get(simulation::status))
        // Undo / redo
        .route("/simulation/undo", post(simulation::undo))
        .route("/simulation/redo", post(simulation::redo))
        .route("/simulation/undo/status", get(simulation::undo_status))
        // Clock
        .route("/simulator/time", get(time::get_time))
        .route("/simulator/time/advance", post(time::advance))
        .route("/simulator/time/set", post(time::set_time))
        .route("/simulator/time/skip-to-next", post(time::skip_to_next))
        .route("/simulator/time/pause", post(time::pause))
        .route("/simulator/time/resume", post(time::resume))
        .route("/simulator/time/set-scale", post(time::set_scale))
        // Events
        .route("/events", post(events::create).get(events::list))
        .route("/events/immediate", post(events::create_immediate))
        .route("/events/next", get(events::next))
        .route("/events/summary", get(events::summary))
        .route("/events/:id", get(events::detail).delete(events::cancel))
        // Environment
        .route("/environment/state", get(environment::state))
        .route("/environment/modalities", get(environment::list_modalities))
        .route("/environment/modalities/:name", get(environment::modality_state))
        .route(
            "/environment/modalities/:name/query",
            post(environment::query_modality),
        )
        .route("/environment/validate", post(environment::validate))
        // Email convenience routes
        .route("/email/send", post(email::send))
        .route("/email/receive", post(email::receive))
        .route("/email/read", post(email::read))
        .route("/email/unread", post(email::unread))
        .route("/email/star", post(email::star))
        .route("/email/unstar", post(email::unstar))
        .route("/email/archive", post(email::archive))
        .route("/email/delete", post(email::delete_email))
        .route("/email/move", post(email::move_email))
        .route("/email/label", post(email::label))
        .route("/email/unlabel", post(email::unlabel))
        .route("/email/state", get(email::state))
        // SMS convenience routes
        .route("/sms/send", post(sms::send))
        .route("/sms/receive", post(sms::receive))
        .route("/sms/read", post(sms::read))
        .route("/sms/unread", post(sms::unread))
        .route("/sms/delete", post(sms::delete_message))
        .route("/sms/react", post(sms::react))
        .route("/sms/state", get(sms::state))
        // Chat convenience routes
        .route("/chat/send", post(chat::send))
        .route("/chat/query", post(chat::query))
        .route("/chat/state", get(chat::state))
        // Calendar convenience routes
        .route("/calendar/create", post(calendar::create))
        .route("/calendar/update", post(calendar::update))
        .route("/calendar/delete", post(calendar::delete_event))
        .route("/calendar/query", post(calendar::query))
        .route("/calendar/state", get(calendar::state))
        // Location convenience routes
        .route("/location/update", post(location::update))
        .route("/location/query", post(location::query))
        .route("/location/state", get(location::state))
        // Weather convenience routes
        .route("/weather/update", post(weather::update))
        .route("/weather/query", post(weather::query))
        .route("/weather/state", get(weather::state))
        // Time preference convenience routes
        .route("/time/update", post(time::update_preferences))
        .route("/time/state", get(time::preferences_state))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared handler plumbing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Smallest advance that executes an already-due immediate event.
pub(crate) const IMMEDIATE_TICK_SECONDS: f64 = 0.001;

/// Map schema-level failures of convenience routes onto 422, everything
/// else onto its default status.
fn convenience_status(error: &Error) -> StatusCode {
    match error {
        Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => status_for(error),
    }
}

/// Synthesize an immediate event for `modality`, nudge the clock so it
/// executes, and report the outcome. All per-modality convenience routes
/// funnel through here.
pub(crate) fn execute_immediate(
    state: &AppState,
    modality: &str,
    data: Value,
    message: &str,
) -> Response {
    let mut engine = state.engine.lock();
    let request = EventRequest {
        scheduled_time: engine.current_time(),
        modality: modality.to_string(),
        data,
        priority: 50,
        metadata: Default::default(),
        agent_id: None,
    };
    let event = match engine.schedule_immediate(request) {
        Ok(event) => event,
        Err(e) => return api_error(convenience_status(&e), e.to_string()),
    };
    if let Err(e) = engine.advance(IMMEDIATE_TICK_SECONDS) {
        return api_error(StatusCode::BAD_REQUEST, e.to_string());
    }
    let executed = engine
        .get_event(&event.event_id)
        .cloned()
        .expect("event was just scheduled");
    if executed.status == es_domain::event::EventStatus::Executed {
        Json(json!({
            "event_id": executed.event_id,
            "scheduled_time": executed.scheduled_time,
            "status": executed.status,
            "message": message,
            "modality": modality,
        }))
        .into_response()
    } else {
        let detail = executed
            .error_message
            .unwrap_or_else(|| "event execution failed".to_string());
        api_error(StatusCode::BAD_REQUEST, detail)
    }
}

/// Deserialize a request body, mapping schema errors onto 422 `{detail}`.
pub(crate) fn parse_body<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, Response> {
    serde_json::from_value(body)
        .map_err(|e| api_error(StatusCode::UNPROCESSABLE_ENTITY, format!("invalid request: {e}")))
}

/// Tag an object body with the modality operation discriminator
/// (convenience routes accept the bare fields).
pub(crate) fn tag_operation(body: Value, key: &str, operation: &str) -> Result<Value, Response> {
    let mut map = match body {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        _ => {
            return Err(api_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "request body must be a JSON object",
            ))
        }
    };
    map.insert(key.to_string(), Value::String(operation.to_string()));
    Ok(Value::Object(map))
}
