//! HTTP transport used by the cached fetch layer.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::cache::HttpMethod;
use crate::error::{CacheError, Result};

/// A request as seen by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub method: HttpMethod,
    pub url: String,
    pub params: Option<Value>,
}

impl FetchRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method,
            url: url.into(),
            params,
        }
    }
}

/// Performs the network call behind a cache miss.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &FetchRequest) -> Result<Value>;
}

// == HTTP Transport ==
/// reqwest-backed transport rooted at a base URL.
///
/// `GET` and `DELETE` send params as a query string, other verbs as a JSON
/// body. Non-success statuses become `CacheError::Status`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CacheError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn resolve(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", self.base_url, url.trim_start_matches('/'))
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &FetchRequest) -> Result<Value> {
        let url = self.resolve(&request.url);
        let mut builder = self.client.request(request.method.into(), &url);

        if let Some(params) = &request.params {
            builder = match request.method {
                HttpMethod::Get | HttpMethod::Delete => builder.query(&query_pairs(params)?),
                _ => builder.json(params),
            };
        }

        let response = builder.send().await.map_err(|e| {
            warn!(url = %url, error = %e, "request failed");
            CacheError::from(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(url = %url, status = status.as_u16(), "upstream returned error status");
            return Err(CacheError::Status {
                status: status.as_u16(),
                message,
            });
        }

        // Empty success bodies (204 and friends) read as null
        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Flattens a params object into query pairs. Non-string scalars use their
/// JSON text, nested values their compact JSON.
fn query_pairs(params: &Value) -> Result<Vec<(String, String)>> {
    match params {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => Ok(map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| {
                let value = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect()),
        other => Err(CacheError::InvalidParams(format!(
            "query params must be an object, got {}",
            other
        ))),
    }
}
