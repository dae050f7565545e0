//! Cache Manager Module
//!
//! Main cache engine: TTL-checked storage plus a registry of in-flight
//! requests so concurrent callers for the same key share one call.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

use crate::cache::{ttl, CacheEntry, CacheKey, CacheStats, EntryStatus, LruTracker};
use crate::error::Result;

type SharedRequest<V> = Shared<BoxFuture<'static, Result<V>>>;
type PendingMap<V> = HashMap<CacheKey, PendingRequest<V>>;

/// How a `get_or_fetch` call was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Served from a valid cache entry
    Hit,
    /// This caller started the request
    Fetched,
    /// Joined a request already in flight
    Coalesced,
}

struct PendingRequest<V> {
    id: u64,
    future: SharedRequest<V>,
}

/// Storage side of the manager.
#[derive(Debug)]
struct Store<V> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    lru: LruTracker,
    stats: CacheStats,
}

// == Cache Manager ==
/// Response cache with per-entry TTL and request de-duplication.
///
/// `get`, `set`, `invalidate` and `clear` never suspend. Build one per
/// application and share it behind an `Arc`; separate instances are fully
/// independent.
pub struct CacheManager<V> {
    store: Mutex<Store<V>>,
    pending: Arc<Mutex<PendingMap<V>>>,
    next_request_id: AtomicU64,
    default_ttl: Duration,
    /// 0 = unbounded
    max_entries: usize,
}

impl<V> CacheManager<V>
where
    V: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates an unbounded cache with the default five minute TTL.
    pub fn new() -> Self {
        Self::with_limits(ttl::DEFAULT_TTL, 0)
    }

    /// Creates a cache with an explicit default TTL and size cap.
    ///
    /// # Arguments
    /// * `default_ttl` - TTL used by `set_default`
    /// * `max_entries` - Least recently used entries are evicted beyond this
    ///   many; 0 disables the cap
    pub fn with_limits(default_ttl: Duration, max_entries: usize) -> Self {
        Self {
            store: Mutex::new(Store {
                entries: HashMap::new(),
                lru: LruTracker::new(),
                stats: CacheStats::new(),
            }),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_request_id: AtomicU64::new(0),
            default_ttl,
            max_entries,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn is_bounded(&self) -> bool {
        self.max_entries > 0
    }

    // == Get ==
    /// Returns the cached data if an entry exists and is still valid.
    ///
    /// Expired entries read as a miss and are left in place until they are
    /// overwritten or purged.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let mut store = lock(&self.store);
        let Store {
            entries,
            lru,
            stats,
        } = &mut *store;

        match entries.get(key) {
            Some(entry) if entry.is_valid() => {
                stats.record_hit();
                if self.is_bounded() {
                    lru.touch(key);
                }
                debug!(key = %key, "cache hit");
                Some(entry.data.clone())
            }
            _ => {
                stats.record_miss();
                debug!(key = %key, "cache miss");
                None
            }
        }
    }

    // == Set ==
    /// Inserts or overwrites an entry stamped with the current time.
    ///
    /// When a size cap is configured and a new key arrives at a full cache,
    /// the least recently used entry is evicted first.
    pub fn set(&self, key: CacheKey, data: V, ttl: Duration) {
        let mut store = lock(&self.store);

        let is_overwrite = store.entries.contains_key(&key);
        if !is_overwrite && self.max_entries > 0 && store.entries.len() >= self.max_entries {
            if let Some(evicted) = store.lru.evict_oldest() {
                store.entries.remove(&evicted);
                store.stats.record_eviction();
                debug!(key = %evicted, "evicted least recently used entry");
            }
        }

        if self.is_bounded() {
            store.lru.touch(&key);
        }
        store.entries.insert(key, CacheEntry::new(data, ttl));
    }

    /// `set` with the configured default TTL.
    pub fn set_default(&self, key: CacheKey, data: V) {
        self.set(key, data, self.default_ttl);
    }

    // == Invalidate ==
    /// Removes an entry so the next `get` misses. Returns whether one existed.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut store = lock(&self.store);
        if self.is_bounded() {
            store.lru.remove(key);
        }
        let removed = store.entries.remove(key).is_some();
        debug!(key = %key, removed, "invalidated");
        removed
    }

    // == Clear ==
    /// Removes every entry. Requests in flight are left untouched.
    pub fn clear(&self) {
        let mut store = lock(&self.store);
        store.entries.clear();
        store.lru.clear();
        debug!("cache cleared");
    }

    // == Get Pending ==
    /// Runs `request_fn` for `key` unless a request for it is already in
    /// flight, in which case the caller joins that request.
    ///
    /// Every caller of one request receives the same value or the same
    /// error. The registration is removed as soon as the request settles,
    /// success or failure, so a later call starts a new request.
    pub async fn get_pending<F, Fut>(&self, key: &CacheKey, request_fn: F) -> Result<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let (request, _) = {
            let mut pending = lock(&self.pending);
            self.join_or_start(&mut pending, key, request_fn)
        };

        request.await
    }

    // == Get Or Fetch ==
    /// Read-through variant of [`get_pending`](Self::get_pending).
    ///
    /// The cache is checked again while the in-flight registry is locked, so
    /// a request that filled the entry and released its registration in
    /// between is never repeated. Callers that already missed on `get` use
    /// this to start or join the request.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &CacheKey,
        request_fn: F,
    ) -> Result<(V, FetchOutcome)>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let (request, outcome) = {
            let mut pending = lock(&self.pending);

            if !pending.contains_key(key) {
                if let Some(data) = self.peek(key) {
                    debug!(key = %key, "filled while waiting for registry");
                    return Ok((data, FetchOutcome::Hit));
                }
            }
            self.join_or_start(&mut pending, key, request_fn)
        };

        Ok((request.await?, outcome))
    }

    /// Valid entry lookup that leaves stats and recency untouched.
    fn peek(&self, key: &CacheKey) -> Option<V> {
        lock(&self.store)
            .entries
            .get(key)
            .filter(|entry| entry.is_valid())
            .map(|entry| entry.data.clone())
    }

    /// Joins the request registered for `key` or registers a new one.
    /// Called with the pending map locked.
    fn join_or_start<F, Fut>(
        &self,
        pending: &mut PendingMap<V>,
        key: &CacheKey,
        request_fn: F,
    ) -> (SharedRequest<V>, FetchOutcome)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        if let Some(existing) = pending.get(key) {
            lock(&self.store).stats.record_coalesced();
            debug!(key = %key, "joining in-flight request");
            return (existing.future.clone(), FetchOutcome::Coalesced);
        }

        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let guard = PendingGuard {
            registry: Arc::clone(&self.pending),
            key: key.clone(),
            id,
        };

        let future = async move {
            let _guard = guard;
            request_fn().await
        }
        .boxed()
        .shared();

        pending.insert(
            key.clone(),
            PendingRequest {
                id,
                future: future.clone(),
            },
        );
        lock(&self.store).stats.record_fetch();
        debug!(key = %key, "starting request");
        (future, FetchOutcome::Fetched)
    }

    // == Status ==
    /// Descriptive state of a key: `Loading` while a request is in flight,
    /// otherwise the entry's status, or `None` if nothing is known.
    pub fn status(&self, key: &CacheKey) -> Option<EntryStatus> {
        if lock(&self.pending).contains_key(key) {
            return Some(EntryStatus::Loading);
        }

        lock(&self.store)
            .entries
            .get(key)
            .map(CacheEntry::current_status)
    }

    // == Purge Expired ==
    /// Removes all expired entries. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let mut store = lock(&self.store);
        let Store { entries, lru, .. } = &mut *store;

        let bounded = self.is_bounded();

        let before = entries.len();
        entries.retain(|key, entry| {
            let keep = entry.is_valid();
            if !keep && bounded {
                lru.remove(key);
            }
            keep
        });
        before - entries.len()
    }

    // == Stats ==
    /// Returns a snapshot of the cache statistics.
    pub fn stats(&self) -> CacheStats {
        let pending_requests = self.pending_len();
        let store = lock(&self.store);

        let mut stats = store.stats.clone();
        stats.total_entries = store.entries.len();
        stats.pending_requests = pending_requests;
        stats
    }

    /// Number of entries held, expired ones included.
    pub fn len(&self) -> usize {
        lock(&self.store).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of requests currently in flight.
    pub fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }
}

impl<V> Default for CacheManager<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

// == Pending Guard ==
/// Drops the registration of one request once its future finishes or is
/// dropped. Only removes the entry it created.
struct PendingGuard<V> {
    registry: Arc<Mutex<PendingMap<V>>>,
    key: CacheKey,
    id: u64,
}

impl<V> Drop for PendingGuard<V> {
    fn drop(&mut self) {
        let removed = {
            let mut pending = lock(&self.registry);
            match pending.get(&self.key) {
                Some(request) if request.id == self.id => pending.remove(&self.key),
                _ => None,
            }
        };
        // Dropped outside the lock
        drop(removed);
    }
}

/// Map state stays consistent across a panic in another holder, so a
/// poisoned lock is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;
    use tokio::time::advance;
    use tokio_test::{assert_pending, assert_ready, task};

    fn key(s: &str) -> CacheKey {
        CacheKey::from(s)
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_and_get() {
        let cache = CacheManager::new();

        cache.set(key("k"), "v1".to_string(), Duration::from_secs(10));
        assert_eq!(cache.get(&key("k")), Some("v1".to_string()));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_missing_returns_none() {
        let cache: CacheManager<String> = CacheManager::new();
        assert_eq!(cache.get(&key("never-set")), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let cache = CacheManager::new();

        cache.set(key("k"), 42u32, Duration::from_millis(200));
        assert_eq!(cache.get(&key("k")), Some(42));

        advance(Duration::from_millis(201)).await;
        assert_eq!(cache.get(&key("k")), None);
        // Expired entries are not deleted by reads
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.status(&key("k")), Some(EntryStatus::Stale));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pros_listing_scenario() {
        let cache: CacheManager<Value> = CacheManager::new();
        let k = key("GET:/api/pros:{}");

        cache.set(k.clone(), json!([{ "id": "1" }]), Duration::from_millis(1000));

        advance(Duration::from_millis(500)).await;
        assert_eq!(cache.get(&k), Some(json!([{ "id": "1" }])));

        advance(Duration::from_millis(1000)).await;
        assert_eq!(cache.get(&k), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_resets_timestamp() {
        let cache = CacheManager::new();

        cache.set(key("k"), 1u32, Duration::from_millis(100));
        advance(Duration::from_millis(80)).await;
        cache.set(key("k"), 2u32, Duration::from_millis(100));
        advance(Duration::from_millis(80)).await;

        assert_eq!(cache.get(&key("k")), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_default_uses_configured_ttl() {
        let cache = CacheManager::with_limits(Duration::from_secs(1), 0);

        cache.set_default(key("k"), 1u32);
        advance(Duration::from_millis(999)).await;
        assert!(cache.get(&key("k")).is_some());
        advance(Duration::from_millis(1)).await;
        assert!(cache.get(&key("k")).is_none());
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = CacheManager::new();

        cache.set_default(key("k"), 1u32);
        assert!(cache.invalidate(&key("k")));
        assert_eq!(cache.get(&key("k")), None);
        assert!(!cache.invalidate(&key("k")));
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = CacheManager::new();

        for name in ["a", "b", "c"] {
            cache.set_default(key(name), name.to_string());
        }
        cache.clear();

        for name in ["a", "b", "c"] {
            assert_eq!(cache.get(&key(name)), None);
        }
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_size_cap_evicts_least_recently_used() {
        let cache = CacheManager::with_limits(ttl::MEDIUM, 2);

        cache.set_default(key("a"), 1u32);
        cache.set_default(key("b"), 2u32);
        cache.get(&key("a"));
        cache.set_default(key("c"), 3u32);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&key("a")), Some(1));
        assert_eq!(cache.get(&key("b")), None);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_unbounded_by_default() {
        let cache = CacheManager::new();
        for i in 0..500u32 {
            cache.set_default(key(&format!("k{}", i)), i);
        }
        assert_eq!(cache.len(), 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_cache_skips_recency_tracking() {
        let cache = CacheManager::new();
        for i in 0..100u32 {
            cache.set(key(&format!("k{}", i)), i, Duration::from_secs(1));
            cache.get(&key(&format!("k{}", i)));
        }
        cache.invalidate(&key("k0"));
        advance(Duration::from_secs(2)).await;
        cache.purge_expired();

        assert!(lock(&cache.store).lru.is_empty());
    }

    #[tokio::test]
    async fn test_bounded_cache_tracks_every_entry() {
        let cache = CacheManager::with_limits(ttl::MEDIUM, 10);
        for i in 0..5u32 {
            cache.set_default(key(&format!("k{}", i)), i);
        }
        cache.invalidate(&key("k0"));

        assert_eq!(lock(&cache.store).lru.len(), 4);
    }

    #[tokio::test]
    async fn test_get_or_fetch_serves_entry_filled_after_miss() {
        let cache: CacheManager<u32> = CacheManager::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key("k");

        // Another caller's request fills the entry and settles between
        // this caller's miss and its registry lookup.
        assert_eq!(cache.get(&k), None);
        cache.set_default(k.clone(), 7);

        let counted = Arc::clone(&calls);
        let result = cache
            .get_or_fetch(&k, move || async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(0)
            })
            .await;

        assert_eq!(result, Ok((7, FetchOutcome::Hit)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.stats().fetches, 0);
    }

    #[tokio::test]
    async fn test_get_or_fetch_reports_how_each_caller_was_served() {
        let cache: CacheManager<String> = CacheManager::new();
        let (tx, rx) = oneshot::channel::<String>();
        let k = key("k");

        let mut first = task::spawn(cache.get_or_fetch(&k, move || async move {
            rx.await.map_err(|e| CacheError::Internal(e.to_string()))
        }));
        let mut second = task::spawn(cache.get_or_fetch(&k, || async {
            Ok::<_, CacheError>("unused".to_string())
        }));
        assert_pending!(first.poll());
        assert_pending!(second.poll());

        tx.send("done".to_string()).unwrap();

        let first = assert_ready!(first.poll());
        let second = assert_ready!(second.poll());
        assert_eq!(first, Ok(("done".to_string(), FetchOutcome::Fetched)));
        assert_eq!(second, Ok(("done".to_string(), FetchOutcome::Coalesced)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = CacheManager::new();

        cache.set(key("short"), 1u32, Duration::from_secs(1));
        cache.set(key("long"), 2u32, Duration::from_secs(60));
        advance(Duration::from_secs(2)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key("long")), Some(2));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_request() {
        let cache: CacheManager<String> = CacheManager::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel::<String>();
        let k = key("k");

        let first_calls = Arc::clone(&calls);
        let mut first = task::spawn(cache.get_pending(&k, move || {
            first_calls.fetch_add(1, Ordering::SeqCst);
            async move { rx.await.map_err(|e| CacheError::Internal(e.to_string())) }
        }));
        assert_pending!(first.poll());

        let second_calls = Arc::clone(&calls);
        let mut second = task::spawn(cache.get_pending(&k, move || {
            second_calls.fetch_add(1, Ordering::SeqCst);
            async { Ok("never used".to_string()) }
        }));
        assert_pending!(second.poll());
        assert_eq!(cache.status(&key("k")), Some(EntryStatus::Loading));

        tx.send("shared".to_string()).unwrap();

        let a = assert_ready!(first.poll());
        let b = assert_ready!(second.poll());
        assert_eq!(a, Ok("shared".to_string()));
        assert_eq!(b, Ok("shared".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats();
        assert_eq!(stats.fetches, 1);
        assert_eq!(stats.coalesced, 1);
        assert_eq!(stats.pending_requests, 0);
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter() {
        let cache: CacheManager<String> = CacheManager::new();
        let (tx, rx) = oneshot::channel::<()>();
        let k = key("k");

        let mut first = task::spawn(cache.get_pending(&k, move || async move {
            let _ = rx.await;
            Err::<String, _>(CacheError::Transport("connection reset".to_string()))
        }));
        let mut second = task::spawn(cache.get_pending(&k, || async {
            Ok("never used".to_string())
        }));
        assert_pending!(first.poll());
        assert_pending!(second.poll());

        tx.send(()).unwrap();

        let expected = Err(CacheError::Transport("connection reset".to_string()));
        assert_eq!(assert_ready!(first.poll()), expected);
        assert_eq!(assert_ready!(second.poll()), expected);
    }

    #[tokio::test]
    async fn test_settled_request_is_not_reused() {
        let cache: CacheManager<u32> = CacheManager::new();

        let first = cache.get_pending(&key("k"), || async { Ok(1) }).await;
        assert_eq!(first, Ok(1));
        assert_eq!(cache.pending_len(), 0);

        let second = cache.get_pending(&key("k"), || async { Ok(2) }).await;
        assert_eq!(second, Ok(2));
    }

    #[tokio::test]
    async fn test_failed_request_is_retried_by_next_caller() {
        let cache: CacheManager<u32> = CacheManager::new();

        let failed = cache
            .get_pending(&key("k"), || async {
                Err::<u32, _>(CacheError::Transport("timeout".to_string()))
            })
            .await;
        assert!(failed.is_err());
        assert_eq!(cache.pending_len(), 0);

        let retried = cache.get_pending(&key("k"), || async { Ok(7) }).await;
        assert_eq!(retried, Ok(7));
    }

    #[tokio::test]
    async fn test_different_keys_do_not_coalesce() {
        let cache: CacheManager<u32> = CacheManager::new();

        let (ka, kb) = (key("a"), key("b"));

        let (a, b) = tokio::join!(
            cache.get_pending(&ka, || async { Ok(1) }),
            cache.get_pending(&kb, || async { Ok(2) }),
        );
        assert_eq!((a, b), (Ok(1), Ok(2)));
        assert_eq!(cache.stats().fetches, 2);
    }

    #[tokio::test]
    async fn test_abandoned_request_is_resumed_by_next_caller() {
        let cache: CacheManager<String> = CacheManager::new();
        let (tx, rx) = oneshot::channel::<String>();
        let k = key("k");

        let mut abandoned = task::spawn(cache.get_pending(&k, move || async move {
            rx.await.map_err(|e| CacheError::Internal(e.to_string()))
        }));
        assert_pending!(abandoned.poll());
        drop(abandoned);
        assert_eq!(cache.pending_len(), 1);

        tx.send("late".to_string()).unwrap();
        let resumed = cache
            .get_pending(&k, || async { Ok("fresh".to_string()) })
            .await;
        assert_eq!(resumed, Ok("late".to_string()));
        assert_eq!(cache.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_instances_are_independent() {
        let a: CacheManager<u32> = CacheManager::new();
        let b: CacheManager<u32> = CacheManager::new();

        a.set_default(key("k"), 1);
        assert_eq!(b.get(&key("k")), None);
        b.set_default(key("k"), 2);
        a.invalidate(&key("k"));
        assert_eq!(b.get(&key("k")), Some(2));
    }
}
