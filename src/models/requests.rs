//! Request DTOs for the gateway API
//!
//! Defines the structure of incoming HTTP request bodies.

use serde::Deserialize;
use serde_json::Value;

use crate::cache::HttpMethod;

/// Request body for POST /cache/invalidate
///
/// # Fields
/// - `method`: Verb of the cached request (default: GET)
/// - `path`: Upstream path of the cached request
/// - `params`: Params the request was cached with
#[derive(Debug, Clone, Deserialize)]
pub struct InvalidateRequest {
    #[serde(default)]
    pub method: HttpMethod,
    pub path: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl InvalidateRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.path.trim().is_empty() {
            return Some("Path cannot be empty".to_string());
        }
        None
    }

    /// Path in the form used for cache keys, always with a leading slash.
    pub fn normalized_path(&self) -> String {
        format!("/{}", self.path.trim().trim_start_matches('/'))
    }
}
