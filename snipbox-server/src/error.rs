use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use snipbox_sandbox::ValidationError;
use snipbox_store::StoreError;
use thiserror::Error;

/// Errors returned by HTTP handlers, rendered as `{"error": message}`
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("No code provided!")]
    MissingCode,

    #[error("Code not found.")]
    NotFound,

    #[error("Code is too large ({size} bytes, limit is {limit} bytes)")]
    TooLarge { size: usize, limit: usize },

    #[error("Snippet storage is full, try again later")]
    StoreFull,

    /// Message is already safe to show to callers
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingCode => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::StoreFull => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        match e {
            ValidationError::EmptySource => ApiError::MissingCode,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => ApiError::NotFound,
            StoreError::EmptySource => ApiError::MissingCode,
            StoreError::TooLarge { size, limit } => ApiError::TooLarge { size, limit },
            StoreError::CapacityExhausted { .. } | StoreError::IdSpaceExhausted { .. } => {
                ApiError::StoreFull
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
