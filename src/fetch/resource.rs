//! Resource handle
//!
//! Binds one request to the cached fetch layer and keeps the
//! data/loading/error view a UI data-fetching call site needs.

use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};

use crate::cache::{CacheKey, EntryStatus, HttpMethod};
use crate::error::{CacheError, Result};
use crate::fetch::{CachedFetch, FetchRequest};

/// Snapshot of a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<CacheError>,
}

impl<T> Default for ResourceState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
        }
    }
}

/// View plus the number of `load` calls still running.
struct Tracked<T> {
    view: ResourceState<T>,
    active_loads: usize,
}

// == Resource ==
/// A cached request plus the last outcome of loading it.
///
/// The previous `data` is kept when a reload fails, so callers can fall
/// back to it while showing `error`. `loading` stays set until every
/// overlapping `load` has finished.
pub struct Resource<T> {
    fetch: CachedFetch,
    request: FetchRequest,
    key: CacheKey,
    ttl: Duration,
    state: Mutex<Tracked<T>>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Resource<T>
where
    T: DeserializeOwned + Clone,
{
    pub fn new<P>(
        fetch: CachedFetch,
        method: HttpMethod,
        url: &str,
        params: Option<&P>,
        ttl: Duration,
    ) -> Result<Self>
    where
        P: Serialize + ?Sized,
    {
        let params = params
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| CacheError::InvalidParams(e.to_string()))?;
        let request = FetchRequest::new(method, url, params);
        let key = CachedFetch::key_for(&request);

        Ok(Self {
            fetch,
            request,
            key,
            ttl,
            state: Mutex::new(Tracked {
                view: ResourceState::default(),
                active_loads: 0,
            }),
            _payload: PhantomData,
        })
    }

    // == Load ==
    /// Loads through the cache, recording loading, data and error.
    pub async fn load(&self) -> Result<T> {
        {
            let mut state = self.state();
            state.active_loads += 1;
            state.view.loading = true;
            state.view.error = None;
        }
        let _active = ActiveLoad { state: &self.state };

        let outcome = self
            .fetch
            .fetch_request(self.request.clone(), self.ttl)
            .await
            .and_then(|value| serde_json::from_value::<T>(value).map_err(CacheError::from));

        let mut state = self.state();
        match &outcome {
            Ok(data) => state.view.data = Some(data.clone()),
            Err(err) => state.view.error = Some(err.clone()),
        }
        drop(state);
        outcome
    }

    // == Refresh ==
    /// Drops the cached response and loads again.
    pub async fn refresh(&self) -> Result<T> {
        self.invalidate();
        self.load().await
    }

    /// Drops the cached response without loading.
    pub fn invalidate(&self) -> bool {
        self.fetch.cache().invalidate(&self.key)
    }

    pub fn data(&self) -> Option<T> {
        self.state().view.data.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state().view.loading
    }

    pub fn error(&self) -> Option<CacheError> {
        self.state().view.error.clone()
    }

    pub fn snapshot(&self) -> ResourceState<T> {
        self.state().view.clone()
    }

    /// Cache-side status of the underlying key.
    pub fn cache_status(&self) -> Option<EntryStatus> {
        self.fetch.cache().status(&self.key)
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    fn state(&self) -> MutexGuard<'_, Tracked<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Ends one `load`, also when its future is dropped early.
struct ActiveLoad<'a, T> {
    state: &'a Mutex<Tracked<T>>,
}

impl<T> Drop for ActiveLoad<'_, T> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.active_loads -= 1;
        state.view.loading = state.active_loads > 0;
    }
}
