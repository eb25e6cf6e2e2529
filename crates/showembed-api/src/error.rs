use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Failures returned to HTTP clients as `{ "error": ... }` JSON bodies.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    /// `context` is the client-facing message, `details` the underlying cause.
    #[error("{context}: {details}")]
    Embedding { context: &'static str, details: String },
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Embedding { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::Validation(message) => json!({ "error": message }),
            ApiError::Embedding { context, details } => json!({ "error": context, "details": details }),
        };
        (status, Json(body)).into_response()
    }
}
