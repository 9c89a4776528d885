//! HTTP error mapping for the session API.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use silc_core::SilcError;

/// API-facing errors; each maps to one status code.
#[derive(Debug)]
pub enum ApiError {
    /// Missing or malformed credentials.
    Unauthorized(String),
    /// Wrong token, or a local-only endpoint hit remotely.
    Forbidden(String),
    /// Operation on a session that has ended.
    Gone,
    BadRequest(String),
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Unauthorized(detail) => (StatusCode::UNAUTHORIZED, detail),
            ApiError::Forbidden(detail) => (StatusCode::FORBIDDEN, detail),
            ApiError::Gone => (StatusCode::GONE, "Session has ended".to_string()),
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail),
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, detail),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

impl From<SilcError> for ApiError {
    fn from(err: SilcError) -> Self {
        match err {
            SilcError::StreamExists(_) | SilcError::InvalidName(_) => {
                ApiError::BadRequest(err.to_string())
            }
            SilcError::StreamNotFound(_) => ApiError::NotFound(err.to_string()),
            SilcError::SessionClosed => ApiError::Gone,
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}
