//! HTTP mapping for domain errors.
//!
//! Every error response carries `{ "detail": "<message>" }`, with status
//! codes following REST conventions: 400 validation, 404 not found,
//! 409 state conflict, 500 internal/inconsistent/external.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use es_domain::Error;

/// Build a standardized JSON error response: `{ "detail": "<message>" }`.
pub fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "detail": message.into() }))).into_response()
}

/// Default status for a domain error.
pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::Inconsistent(_) | Error::External(_) | Error::Io(_) | Error::Json(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Wrapper so handlers can use `?` on engine results.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        api_error(status_for(&self.0), self.0.to_string())
    }
}

/// Some time-control endpoints surface state conflicts as plain 400s
/// (advance while paused, backwards set, cancel of a non-pending event).
pub fn conflict_as_bad_request(error: Error) -> Response {
    let status = match &error {
        Error::Conflict(_) => StatusCode::BAD_REQUEST,
        _ => status_for(&error),
    };
    api_error(status, error.to_string())
}
