//! Weather convenience routes.
//!
//! - `POST /weather/update` — store a report for a coordinate pair
//! - `POST /weather/query`  — read reports with unit conversion;
//!   `real=true` fetches live data from OpenWeather instead
//! - `GET  /weather/state`  — full modality snapshot

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};

use es_modality::weather::{convert_report, WeatherQuery};

use crate::api::execute_immediate;
use crate::error::{api_error, status_for, ApiError};
use crate::state::AppState;

const MODALITY: &str = "weather";

pub async fn update(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    execute_immediate(&state, MODALITY, body, "weather report stored")
}

pub async fn query(
    State(state): State<AppState>,
    body: Option<Json<Value>>,
) -> Response {
    let params = body.map(|Json(v)| v).unwrap_or(Value::Null);
    let q: WeatherQuery = match serde_json::from_value(params.clone()) {
        Ok(q) => q,
        Err(e) => {
            return api_error(
                StatusCode::BAD_REQUEST,
                format!("weather query requires 'lat' and 'lon': {e}"),
            )
        }
    };

    if q.real {
        // live lookup: fetch in standard units, convert exactly like a
        // simulated report
        let report = match state.weather.fetch_report(q.lat, q.lon).await {
            Ok(report) => report,
            Err(e) => return api_error(status_for(&e), e.to_string()),
        };
        let converted = convert_report(&report, q.units);
        return Json(json!({
            "reports": [converted],
            "count": 1,
            "total_count": 1,
            "units": q.units,
            "source": "openweather",
        }))
        .into_response();
    }

    let engine = state.engine.lock();
    match engine.query_modality(MODALITY, &params) {
        Ok(results) => Json(results).into_response(),
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
