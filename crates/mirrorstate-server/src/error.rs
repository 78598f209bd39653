//! Error types for the REST surface.
//!
//! [`ApiError`] converts into a JSON response body of the form
//! `{"error": ..., "status": ...}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Errors returned by REST handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No state with the requested name.
    #[error("not found: {0}")]
    NotFound(String),

    /// The requested name is not a valid state name.
    #[error("invalid name: {0}")]
    InvalidName(#[from] mirrorstate_types::NameError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidName(_) => StatusCode::BAD_REQUEST,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
