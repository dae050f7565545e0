//! Error types for the response cache
//!
//! Provides unified error handling using thiserror. Errors are `Clone` so a
//! single failed request can be handed to every caller waiting on it.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache and the fetch layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    /// Request never produced a response (connect failure, timeout, I/O)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Upstream answered with a non-success status
    #[error("Upstream returned {status}: {message}")]
    Status { status: u16, message: String },

    /// Response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Request parameters could not be serialized into a cache key
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => CacheError::Status {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None if err.is_decode() => CacheError::Decode(err.to_string()),
            None => CacheError::Transport(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Decode(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::Status { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            CacheError::Transport(_) | CacheError::Decode(_) => StatusCode::BAD_GATEWAY,
            CacheError::InvalidParams(_) | CacheError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            CacheError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the crate.
pub type Result<T> = std::result::Result<T, CacheError>;
