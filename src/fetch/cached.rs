//! Cached Fetch
//!
//! Key derivation, cache lookup, request de-duplication and cache fill in a
//! single call.

use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::cache::{CacheKey, CacheManager, FetchOutcome, HttpMethod};
use crate::error::{CacheError, Result};
use crate::fetch::{FetchRequest, Transport};

// == Cached Fetch ==
/// Read-through cache in front of a [`Transport`].
///
/// Within one TTL window a given (method, url, params) reaches the network
/// at most once, and never more than once at the same time. Failures are
/// neither cached nor retried.
#[derive(Clone)]
pub struct CachedFetch {
    cache: Arc<CacheManager<Value>>,
    transport: Arc<dyn Transport>,
}

impl CachedFetch {
    pub fn new(cache: Arc<CacheManager<Value>>, transport: Arc<dyn Transport>) -> Self {
        Self { cache, transport }
    }

    pub fn cache(&self) -> &Arc<CacheManager<Value>> {
        &self.cache
    }

    // == Fetch ==
    /// Returns the response for a request, from cache when valid.
    ///
    /// # Arguments
    /// * `method` - Request verb
    /// * `url` - Request URL, relative to the transport's base URL
    /// * `params` - Query/body params; part of the cache key
    /// * `ttl` - Lifetime of the cached response
    pub async fn fetch<P>(
        &self,
        method: HttpMethod,
        url: &str,
        params: Option<&P>,
        ttl: Duration,
    ) -> Result<Value>
    where
        P: Serialize + ?Sized,
    {
        let params = params
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| CacheError::InvalidParams(e.to_string()))?;

        self.fetch_request(FetchRequest::new(method, url, params), ttl)
            .await
    }

    /// Like [`fetch`](Self::fetch) with the cache's default TTL.
    pub async fn fetch_default<P>(
        &self,
        method: HttpMethod,
        url: &str,
        params: Option<&P>,
    ) -> Result<Value>
    where
        P: Serialize + ?Sized,
    {
        self.fetch(method, url, params, self.cache.default_ttl())
            .await
    }

    /// Fetches and decodes the response into `T`.
    pub async fn fetch_as<T, P>(
        &self,
        method: HttpMethod,
        url: &str,
        params: Option<&P>,
        ttl: Duration,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let value = self.fetch(method, url, params, ttl).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Fetch for a request whose params are already JSON.
    pub async fn fetch_request(&self, request: FetchRequest, ttl: Duration) -> Result<Value> {
        let (data, _) = self.fetch_request_traced(request, ttl).await?;
        Ok(data)
    }

    /// Like [`fetch_request`](Self::fetch_request), also reporting whether
    /// the response came from cache, a new call or a joined call.
    pub async fn fetch_request_traced(
        &self,
        request: FetchRequest,
        ttl: Duration,
    ) -> Result<(Value, FetchOutcome)> {
        let key = Self::key_for(&request);

        if let Some(data) = self.cache.get(&key) {
            return Ok((data, FetchOutcome::Hit));
        }

        let cache = Arc::clone(&self.cache);
        let transport = Arc::clone(&self.transport);
        let fill_key = key.clone();

        self.cache
            .get_or_fetch(&key, move || async move {
                let data = transport.send(&request).await?;
                // Filled before the in-flight registration is released
                cache.set(fill_key, data.clone(), ttl);
                debug!(url = %request.url, "response cached");
                Ok(data)
            })
            .await
    }

    // == Invalidate ==
    /// Drops the cached response for a request, typically after a mutation.
    pub fn invalidate<P>(&self, method: HttpMethod, url: &str, params: Option<&P>) -> Result<bool>
    where
        P: Serialize + ?Sized,
    {
        let key = CacheKey::derive(method, url, params)?;
        Ok(self.cache.invalidate(&key))
    }

    pub fn key_for(request: &FetchRequest) -> CacheKey {
        CacheKey::from_value(
            request.method,
            &request.url,
            request.params.as_ref().unwrap_or(&Value::Null),
        )
    }
}
