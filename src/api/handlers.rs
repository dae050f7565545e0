//! API Handlers
//!
//! HTTP request handlers for each gateway endpoint.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderValue,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

use crate::cache::{CacheKey, CacheManager, FetchOutcome, HttpMethod, TtlPreset};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::fetch::{CachedFetch, FetchRequest, HttpTransport, Transport};
use crate::models::{
    ClearResponse, HealthResponse, InvalidateRequest, InvalidateResponse, StatsResponse,
};

/// Query parameter selecting a TTL preset for one proxied read. It is
/// consumed by the gateway and never forwarded upstream.
pub const TTL_PARAM: &str = "ttl";
/// Response header reporting whether a read was served from cache.
pub const CACHE_STATUS_HEADER: &str = "x-cache";

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub fetch: CachedFetch,
}

impl AppState {
    pub fn new(cache: Arc<CacheManager<Value>>, transport: Arc<dyn Transport>) -> Self {
        Self {
            fetch: CachedFetch::new(cache, transport),
        }
    }

    /// Creates the state from configuration, with an HTTP transport to the
    /// configured upstream.
    pub fn from_config(config: &Config) -> Result<Self> {
        let cache = Arc::new(CacheManager::with_limits(
            config.default_ttl(),
            config.max_entries,
        ));
        let transport = HttpTransport::new(&config.upstream_url, config.request_timeout())?;
        Ok(Self::new(cache, Arc::new(transport)))
    }

    pub fn cache(&self) -> &Arc<CacheManager<Value>> {
        self.fetch.cache()
    }
}

/// Handler for GET /api/*path
///
/// Read-through cached proxy to `{upstream}/{path}`. Query parameters,
/// apart from `ttl`, become the request params and part of the cache key.
pub async fn proxy_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(mut query): Query<BTreeMap<String, String>>,
) -> Result<Response> {
    let ttl = match query.remove(TTL_PARAM) {
        Some(preset) => preset.parse::<TtlPreset>()?.duration(),
        None => state.cache().default_ttl(),
    };

    let params = if query.is_empty() {
        None
    } else {
        Some(serde_json::to_value(query)?)
    };
    let request = FetchRequest::new(HttpMethod::Get, format!("/{}", path), params);

    let (body, outcome) = state.fetch.fetch_request_traced(request, ttl).await?;

    let mut response = Json(body).into_response();
    response.headers_mut().insert(
        CACHE_STATUS_HEADER,
        HeaderValue::from_static(cache_status(outcome)),
    );
    Ok(response)
}

fn cache_status(outcome: FetchOutcome) -> &'static str {
    match outcome {
        FetchOutcome::Hit => "HIT",
        FetchOutcome::Fetched => "MISS",
        FetchOutcome::Coalesced => "COALESCED",
    }
}

/// Handler for POST /cache/invalidate
///
/// Drops the cached response for one request descriptor.
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Json(req): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let key = CacheKey::from_value(
        req.method,
        &req.normalized_path(),
        req.params.as_ref().unwrap_or(&Value::Null),
    );
    let removed = state.cache().invalidate(&key);

    Ok(Json(InvalidateResponse::new(key.as_str(), removed)))
}

/// Handler for DELETE /cache
pub async fn clear_handler(State(state): State<AppState>) -> Json<ClearResponse> {
    let cleared = state.cache().len();
    state.cache().clear();
    Json(ClearResponse::new(cleared))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(state.cache().stats().into())
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
