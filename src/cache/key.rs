//! Cache Key Module
//!
//! Derives deterministic cache keys from a request descriptor.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CacheError, Result};

// == HTTP Method ==
/// The fixed set of verbs a cached request can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(CacheError::InvalidRequest(format!(
                "Unsupported method: {}",
                other
            ))),
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

// == Cache Key ==
/// Identifies one request shape: `"{METHOD}:{url}:{params}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    // == Derive ==
    /// Derives the key for a request.
    ///
    /// Object keys inside `params` are sorted before serialization, so two
    /// parameter sets with the same pairs in a different order share a key.
    /// Absent or null params serialize as `{}`.
    ///
    /// # Errors
    /// Returns `CacheError::InvalidParams` when `params` cannot be
    /// represented as JSON (for example a map with non-string keys).
    pub fn derive<P>(method: HttpMethod, url: &str, params: Option<&P>) -> Result<Self>
    where
        P: Serialize + ?Sized,
    {
        let params = match params {
            Some(params) => serde_json::to_value(params)
                .map_err(|e| CacheError::InvalidParams(e.to_string()))?,
            None => Value::Null,
        };

        Ok(Self::from_value(method, url, &params))
    }

    /// Derives the key from params that are already a JSON value.
    pub fn from_value(method: HttpMethod, url: &str, params: &Value) -> Self {
        let serialized = match params {
            Value::Null => "{}".to_string(),
            other => canonicalize(other).to_string(),
        };

        Self(format!("{}:{}:{}", method, url, serialized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Rebuilds every object in `value` with its keys in sorted order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<(&String, &Value)> = map.iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(b.0));

            let mut sorted = Map::new();
            for (k, v) in pairs {
                sorted.insert(k.clone(), canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
