//! Coalescing read-through cache.
//!
//! A miss on a key starts exactly one load for that key; every caller that
//! misses on the same key while the load runs joins it and receives the
//! same result or the same error.
//!
//! # Coordination
//!
//! A single mutex guards the map of in-flight keys and is held only for map
//! operations. The loader runs on its own Tokio task, so a caller that gives
//! up waiting never cancels the load: the result is still written to the
//! store for later callers. The result is published through a `watch`
//! channel in the same critical section that removes the in-flight record,
//! so a caller that joins just before removal still sees the value.
//!
//! # Invalidation
//!
//! [`CoalescingReadCache::invalidate`] and
//! [`CoalescingReadCache::invalidate_prefix`] detach matching in-flight
//! loads before deleting from the store. A detached load still answers the
//! callers already waiting on it but never leaves its value in the store.
//!
//! The detached record stays in the map until its load has published, and
//! publishing happens only after the load's write-back and any follow-up
//! delete have finished. A caller arriving after the invalidation waits for
//! the detached load to finish without taking its result, then reads the
//! store and starts its own load. So a key never has two loaders running at
//! once, and a read that starts after an invalidation returned cannot see
//! the detached load's value.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dueline_core::{CacheError, DuelineError, DuelineResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::fetched::Fetched;
use super::traits::CacheStore;

/// TTL applied to cached query results unless configured otherwise.
pub const DEFAULT_ENTRY_TTL: Duration = Duration::from_secs(60);

/// Configuration for the coalescing cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL for cached entries. Zero disables cache writes; loads are still
    /// coalesced.
    pub entry_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entry_ttl: DEFAULT_ENTRY_TTL,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the entry TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }

    pub fn writes_enabled(&self) -> bool {
        !self.entry_ttl.is_zero()
    }
}

/// Point-in-time counters of a [`CoalescingReadCache`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoalescingStats {
    /// Fetches answered from the store.
    pub hits: u64,
    /// Fetches that found nothing usable in the store.
    pub misses: u64,
    /// Loader executions started.
    pub loads: u64,
    /// Fetches that joined a load already in flight.
    pub coalesced: u64,
    /// Loader executions that returned an error.
    pub loader_failures: u64,
    /// Store calls that failed and were degraded.
    pub backend_errors: u64,
    /// In-flight loads detached by invalidation.
    pub detached_loads: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    coalesced: AtomicU64,
    loader_failures: AtomicU64,
    backend_errors: AtomicU64,
    detached_loads: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CoalescingStats {
        CoalescingStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            loader_failures: self.loader_failures.load(Ordering::Relaxed),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
            detached_loads: self.detached_loads.load(Ordering::Relaxed),
        }
    }
}

/// `None` until the load finishes.
type Published<T> = Option<DuelineResult<T>>;

/// One running load. Lives in the in-flight map from the first miss until
/// the result is published, including after it has been detached.
struct InFlightCall<T> {
    id: u64,
    result: watch::Receiver<Published<T>>,
    detached: Arc<AtomicBool>,
}

struct Shared<T> {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
    in_flight: Mutex<HashMap<String, InFlightCall<T>>>,
    next_call_id: AtomicU64,
    counters: Counters,
}

impl<T> Shared<T> {
    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<String, InFlightCall<T>>> {
        // The map stays consistent even if a holder panicked mid-operation.
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove the record for `key` only if it still belongs to `call_id`.
    fn forget_call(&self, key: &str, call_id: u64) {
        let mut in_flight = self.lock_in_flight();
        if in_flight.get(key).is_some_and(|call| call.id == call_id) {
            in_flight.remove(key);
        }
    }

    fn publish(
        &self,
        key: &str,
        call_id: u64,
        sender: &watch::Sender<Published<T>>,
        result: DuelineResult<T>,
    ) {
        let mut in_flight = self.lock_in_flight();
        if in_flight.get(key).is_some_and(|call| call.id == call_id) {
            in_flight.remove(key);
        }
        sender.send_replace(Some(result));
    }

    /// Mark matching loads detached. Records stay in the map until their
    /// load publishes. Returns how many loads were newly detached.
    fn detach_matching(&self, matches: impl Fn(&str) -> bool) -> u64 {
        let in_flight = self.lock_in_flight();
        let detached = in_flight
            .iter()
            .filter(|(key, _)| matches(key))
            .filter(|(_, call)| !call.detached.swap(true, Ordering::SeqCst))
            .count() as u64;
        self.counters
            .detached_loads
            .fetch_add(detached, Ordering::Relaxed);
        detached
    }

    fn detached_call(&self, key: &str) -> Option<watch::Receiver<Published<T>>> {
        let in_flight = self.lock_in_flight();
        in_flight
            .get(key)
            .filter(|call| call.detached.load(Ordering::SeqCst))
            .map(|call| call.result.clone())
    }

    /// Wait until no detached load is running for `key`. The detached
    /// result is ignored.
    async fn wait_for_detached(&self, key: &str) {
        while let Some(mut pending) = self.detached_call(key) {
            debug!(cache_key = %key, "Waiting for invalidated load to finish");
            // A closed channel means the load task is gone and its record
            // has been removed.
            let _ = pending.wait_for(Option::is_some).await;
        }
    }
}

impl<T> Shared<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn read_cached(&self, key: &str) -> Option<T> {
        match self.store.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<T>(&bytes) {
                Ok(value) => {
                    Counters::bump(&self.counters.hits);
                    debug!(cache_key = %key, "Cache hit");
                    Some(value)
                }
                Err(e) => {
                    Counters::bump(&self.counters.misses);
                    warn!(cache_key = %key, error = %e, "Ignoring undecodable cache entry");
                    None
                }
            },
            Ok(None) => {
                Counters::bump(&self.counters.misses);
                None
            }
            Err(e) => {
                Counters::bump(&self.counters.misses);
                Counters::bump(&self.counters.backend_errors);
                warn!(cache_key = %key, error = %e, "Cache read failed, falling back to loader");
                None
            }
        }
    }

    async fn write_back(&self, key: &str, value: &T, detached: &AtomicBool) {
        if !self.config.writes_enabled() {
            return;
        }
        if detached.load(Ordering::SeqCst) {
            debug!(cache_key = %key, "Load was invalidated, skipping cache write");
            return;
        }

        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(cache_key = %key, error = %e, "Failed to encode value for cache");
                return;
            }
        };

        if let Err(e) = self.store.set(key, bytes, self.config.entry_ttl).await {
            Counters::bump(&self.counters.backend_errors);
            warn!(cache_key = %key, error = %e, "Cache write failed, result served uncached");
            return;
        }

        // Invalidated while the write was in progress: the invalidation's
        // delete may have run before our set landed.
        if detached.load(Ordering::SeqCst) {
            debug!(cache_key = %key, "Load invalidated during cache write, removing entry");
            if let Err(e) = self.store.delete(&[key.to_string()]).await {
                Counters::bump(&self.counters.backend_errors);
                warn!(cache_key = %key, error = %e, "Failed to remove invalidated cache entry");
            }
        }
    }
}

/// Clears the in-flight record if the load task unwinds before publishing.
/// Dropping the sender then wakes every waiter with a closed channel.
struct InFlightGuard<T> {
    shared: Arc<Shared<T>>,
    key: String,
    call_id: u64,
}

impl<T> Drop for InFlightGuard<T> {
    fn drop(&mut self) {
        self.shared.forget_call(&self.key, self.call_id);
    }
}

async fn run_load<T, F, Fut>(
    shared: Arc<Shared<T>>,
    key: String,
    call_id: u64,
    detached: Arc<AtomicBool>,
    sender: watch::Sender<Published<T>>,
    loader: F,
) where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = DuelineResult<T>>,
{
    let _guard = InFlightGuard {
        shared: Arc::clone(&shared),
        key: key.clone(),
        call_id,
    };

    Counters::bump(&shared.counters.loads);
    let result = loader().await;

    match &result {
        Ok(value) => shared.write_back(&key, value, &detached).await,
        Err(e) => {
            Counters::bump(&shared.counters.loader_failures);
            warn!(cache_key = %key, error = %e, "Loader failed, nothing cached");
        }
    }

    shared.publish(&key, call_id, &sender, result);
}

/// Outcome of claiming a key in the in-flight map.
enum Claim<T, F> {
    Joined(watch::Receiver<Published<T>>),
    Started(watch::Receiver<Published<T>>),
    /// A detached load still holds the key; the loader is handed back.
    Detached(F),
}

/// Read-through cache that collapses concurrent misses per key.
///
/// One instance caches one value type `T`; values are stored as JSON in the
/// underlying [`CacheStore`]. Cloning is cheap and clones share state.
///
/// # Example
///
/// ```ignore
/// let cache: CoalescingReadCache<Vec<Todo>> =
///     CoalescingReadCache::new(store, CacheConfig::new().with_ttl(ttl));
///
/// let store = Arc::clone(&todo_store);
/// let todos = cache
///     .fetch(&CacheKey::list(owner).encode(), move || async move {
///         store.list(owner).await
///     })
///     .await?
///     .into_value();
/// ```
pub struct CoalescingReadCache<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for CoalescingReadCache<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for CoalescingReadCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoalescingReadCache")
            .field("config", &self.shared.config)
            .field("in_flight", &self.shared.lock_in_flight().len())
            .finish()
    }
}

impl<T> CoalescingReadCache<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                config,
                in_flight: Mutex::new(HashMap::new()),
                next_call_id: AtomicU64::new(1),
                counters: Counters::default(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.shared.store
    }

    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    /// Return the cached value for `key`, or run `loader` at most once
    /// across all concurrent callers missing on `key`.
    ///
    /// Store failures degrade to a miss. Loader errors reach every waiter
    /// and are never cached. If the load task panics, waiters receive
    /// `DuelineError::Internal`.
    pub async fn fetch<F, Fut>(&self, key: &str, loader: F) -> DuelineResult<Fetched<T>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = DuelineResult<T>> + Send + 'static,
    {
        let mut loader = loader;
        let (mut receiver, joined) = loop {
            self.shared.wait_for_detached(key).await;

            if let Some(value) = self.shared.read_cached(key).await {
                return Ok(Fetched::from_cache(value));
            }

            match self.join_or_start(key, loader) {
                Claim::Joined(receiver) => break (receiver, true),
                Claim::Started(receiver) => break (receiver, false),
                // Detached between the wait and the claim.
                Claim::Detached(returned) => loader = returned,
            }
        };

        let published = receiver
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|published| (*published).clone());

        match published {
            Some(Ok(value)) if joined => Ok(Fetched::coalesced(value)),
            Some(Ok(value)) => Ok(Fetched::from_loader(value)),
            Some(Err(e)) => Err(e),
            None => Err(DuelineError::internal(format!(
                "load for cache key {key} ended without a result"
            ))),
        }
    }

    fn join_or_start<F, Fut>(&self, key: &str, loader: F) -> Claim<T, F>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = DuelineResult<T>> + Send + 'static,
    {
        let mut in_flight = self.shared.lock_in_flight();

        if let Some(call) = in_flight.get(key) {
            if call.detached.load(Ordering::SeqCst) {
                return Claim::Detached(loader);
            }
            Counters::bump(&self.shared.counters.coalesced);
            debug!(cache_key = %key, call_id = call.id, "Joining in-flight load");
            return Claim::Joined(call.result.clone());
        }

        let call_id = self.shared.next_call_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = watch::channel(None);
        let detached = Arc::new(AtomicBool::new(false));
        in_flight.insert(
            key.to_string(),
            InFlightCall {
                id: call_id,
                result: receiver.clone(),
                detached: Arc::clone(&detached),
            },
        );
        drop(in_flight);

        debug!(cache_key = %key, call_id, "Cache miss, starting load");
        tokio::spawn(run_load(
            Arc::clone(&self.shared),
            key.to_string(),
            call_id,
            detached,
            sender,
            loader,
        ));

        Claim::Started(receiver)
    }

    /// Delete exact keys, detaching any in-flight loads for them first.
    pub async fn invalidate(&self, keys: &[String]) -> Result<u64, CacheError> {
        let detached = self
            .shared
            .detach_matching(|key| keys.iter().any(|k| k == key));
        if detached > 0 {
            debug!(detached, "Detached in-flight loads for invalidated keys");
        }
        self.count_backend_error(self.shared.store.delete(keys).await)
    }

    /// Delete every key under `prefix`, detaching matching in-flight loads
    /// first.
    pub async fn invalidate_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let detached = self.shared.detach_matching(|key| key.starts_with(prefix));
        if detached > 0 {
            debug!(prefix = %prefix, detached, "Detached in-flight loads under prefix");
        }
        self.count_backend_error(self.shared.store.delete_by_prefix(prefix).await)
    }

    fn count_backend_error(&self, result: Result<u64, CacheError>) -> Result<u64, CacheError> {
        if result.is_err() {
            Counters::bump(&self.shared.counters.backend_errors);
        }
        result
    }

    /// Number of keys with a load currently running, detached ones
    /// included.
    pub fn in_flight_count(&self) -> usize {
        self.shared.lock_in_flight().len()
    }

    pub fn stats(&self) -> CoalescingStats {
        self.shared.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fetched::FetchSource;
    use crate::cache::memory_backend::InMemoryCacheStore;
    use crate::cache::traits::CacheStats;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;
    use tokio::sync::Notify;

    /// Store that fails every call.
    struct UnreachableStore;

    #[async_trait]
    impl CacheStore for UnreachableStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            Err(CacheError::Unavailable {
                reason: "connection refused".into(),
            })
        }

        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable {
                reason: "connection refused".into(),
            })
        }

        async fn delete(&self, _keys: &[String]) -> Result<u64, CacheError> {
            Err(CacheError::Unavailable {
                reason: "connection refused".into(),
            })
        }

        async fn delete_by_prefix(&self, _prefix: &str) -> Result<u64, CacheError> {
            Err(CacheError::Unavailable {
                reason: "connection refused".into(),
            })
        }

        async fn stats(&self) -> Result<CacheStats, CacheError> {
            Ok(CacheStats::default())
        }
    }

    fn memory_cache() -> (Arc<InMemoryCacheStore>, CoalescingReadCache<Vec<i64>>) {
        let store = Arc::new(InMemoryCacheStore::new());
        let cache = CoalescingReadCache::new(store.clone(), CacheConfig::new());
        (store, cache)
    }

    async fn must_not_load() -> DuelineResult<Vec<i64>> {
        panic!("loader must not run when the value is cached");
    }

    async fn exploding_loader() -> DuelineResult<Vec<i64>> {
        panic!("loader exploded");
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn test_miss_loads_and_populates_store() {
        let (store, cache) = memory_cache();

        let fetched = cache
            .fetch("k", || async { Ok(vec![1, 2, 3]) })
            .await
            .unwrap();
        assert_eq!(fetched.source(), FetchSource::Loader);
        assert_eq!(fetched.into_value(), vec![1, 2, 3]);

        let raw = store.get("k").await.unwrap().expect("entry should be cached");
        assert_eq!(serde_json::from_slice::<Vec<i64>>(&raw).unwrap(), vec![1, 2, 3]);
        assert_eq!(cache.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_hit_skips_loader() {
        let (_store, cache) = memory_cache();
        cache.fetch("k", || async { Ok(vec![7]) }).await.unwrap();

        let fetched = cache
            .fetch("k", must_not_load)
            .await
            .unwrap();
        assert!(fetched.was_cache_hit());
        assert_eq!(fetched.into_value(), vec![7]);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.loads, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_run_loader_once() {
        let (_store, cache) = memory_cache();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .fetch("shared", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(vec![42])
                    })
                    .await
            }));
        }

        let mut loader_sources = 0;
        for handle in handles {
            let fetched = handle.await.unwrap().unwrap();
            if fetched.source() == FetchSource::Loader {
                loader_sources += 1;
            }
            assert_eq!(fetched.into_value(), vec![42]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(loader_sources, 1);
        assert_eq!(cache.in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_load_in_parallel() {
        let (_store, cache) = memory_cache();
        let started = tokio::time::Instant::now();

        let mut handles = Vec::new();
        for i in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .fetch(&format!("key-{i}"), move || async move {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok(vec![i])
                    })
                    .await
            }));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            let value = handle.await.unwrap().unwrap().into_value();
            assert_eq!(value, vec![i as i64]);
        }

        // Eight sequential loads would take 1600ms of virtual time.
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(cache.stats().loads, 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_loader_error_reaches_all_waiters_and_is_not_cached() {
        let (store, cache) = memory_cache();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .fetch("failing", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err(DuelineError::internal("store exploded"))
                    })
                    .await
            }));
        }
        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert_eq!(err, DuelineError::internal("store exploded"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.get("failing").await.unwrap().is_none());

        let retried = cache
            .fetch("failing", || async { Ok(vec![1]) })
            .await
            .unwrap();
        assert_eq!(retried.source(), FetchSource::Loader);
        assert_eq!(cache.stats().loader_failures, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_caller_does_not_cancel_load() {
        let (store, cache) = memory_cache();
        let calls = Arc::new(AtomicUsize::new(0));

        let loader_calls = Arc::clone(&calls);
        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            cache.fetch("slow", move || async move {
                loader_calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(vec![5])
            }),
        )
        .await;
        assert!(abandoned.is_err());

        wait_until(|| cache.in_flight_count() == 0).await;
        assert!(store.get("slow").await.unwrap().is_some());

        let fetched = cache
            .fetch("slow", must_not_load)
            .await
            .unwrap();
        assert!(fetched.was_cache_hit());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unreachable_store_degrades_to_loader() {
        let cache: CoalescingReadCache<Vec<i64>> =
            CoalescingReadCache::new(Arc::new(UnreachableStore), CacheConfig::new());

        for _ in 0..3 {
            let fetched = cache.fetch("k", || async { Ok(vec![9]) }).await.unwrap();
            assert_eq!(fetched.source(), FetchSource::Loader);
            assert_eq!(fetched.into_value(), vec![9]);
        }

        assert!(cache.invalidate(&["k".to_string()]).await.is_err());
        let stats = cache.stats();
        assert_eq!(stats.loads, 3);
        // Three failed reads, three failed writes, one failed delete.
        assert_eq!(stats.backend_errors, 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_invalidation_detaches_in_flight_load() {
        let (store, cache) = memory_cache();
        let release = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let first = {
            let cache = cache.clone();
            let release = Arc::clone(&release);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cache
                    .fetch("todo:1:list", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        release.notified().await;
                        Ok(vec![1])
                    })
                    .await
            })
        };

        wait_until(|| cache.in_flight_count() == 1).await;
        cache
            .invalidate(&["todo:1:list".to_string()])
            .await
            .unwrap();
        assert_eq!(cache.in_flight_count(), 1);

        let second = {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cache
                    .fetch("todo:1:list", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(vec![1, 2])
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!second.is_finished());

        release.notify_one();
        let stale = first.await.unwrap().unwrap();
        assert_eq!(stale.into_value(), vec![1]);

        let fresh = second.await.unwrap().unwrap();
        assert_eq!(fresh.source(), FetchSource::Loader);
        assert_eq!(fresh.into_value(), vec![1, 2]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let raw = store.get("todo:1:list").await.unwrap().expect("fresh entry cached");
        assert_eq!(serde_json::from_slice::<Vec<i64>>(&raw).unwrap(), vec![1, 2]);
        assert_eq!(cache.stats().detached_loads, 1);
        assert_eq!(cache.in_flight_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_one_active_loader_per_key_across_invalidations() {
        let (_store, cache) = memory_cache();
        let release = Arc::new(Notify::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let first = {
            let cache = cache.clone();
            let release = Arc::clone(&release);
            let active = Arc::clone(&active);
            let max_active = Arc::clone(&max_active);
            tokio::spawn(async move {
                cache
                    .fetch("todo:1:list", move || async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_active.fetch_max(now, Ordering::SeqCst);
                        release.notified().await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(vec![1])
                    })
                    .await
            })
        };
        wait_until(|| active.load(Ordering::SeqCst) == 1).await;

        let mut later = Vec::new();
        for round in 0..3 {
            cache.invalidate_prefix("todo:1:").await.unwrap();
            for _ in 0..4 {
                let cache = cache.clone();
                let active = Arc::clone(&active);
                let max_active = Arc::clone(&max_active);
                later.push(tokio::spawn(async move {
                    cache
                        .fetch("todo:1:list", move || async move {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            max_active.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                            Ok(vec![2, round])
                        })
                        .await
                }));
            }
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(max_active.load(Ordering::SeqCst), 1);

        release.notify_one();
        assert_eq!(first.await.unwrap().unwrap().into_value(), vec![1]);
        for handle in later {
            let value = handle.await.unwrap().unwrap().into_value();
            assert_eq!(value.first(), Some(&2));
        }

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().loads, 2);
        assert_eq!(cache.stats().detached_loads, 1);
    }

    /// Store whose writes stall before and after landing, so a write-back
    /// can be caught with its value visible but not yet cleaned up.
    #[derive(Default)]
    struct StallingStore {
        inner: InMemoryCacheStore,
        set_entered: Notify,
        set_release: Notify,
        cleanup_release: Notify,
        landed: AtomicBool,
    }

    #[async_trait]
    impl CacheStore for StallingStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
            self.set_entered.notify_one();
            self.set_release.notified().await;
            self.inner.set(key, value, ttl).await?;
            self.landed.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
            if self.landed.load(Ordering::SeqCst) {
                self.cleanup_release.notified().await;
            }
            self.inner.delete(keys).await
        }

        async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
            self.inner.delete_by_prefix(prefix).await
        }

        async fn stats(&self) -> Result<CacheStats, CacheError> {
            self.inner.stats().await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_read_after_invalidation_never_sees_late_write_back() {
        let store = Arc::new(StallingStore::default());
        let cache: CoalescingReadCache<Vec<i64>> =
            CoalescingReadCache::new(store.clone(), CacheConfig::new());

        let first = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.fetch("todo:1:list", || async { Ok(vec![1]) }).await })
        };

        // The load finished and its write-back is waiting to set.
        store.set_entered.notified().await;
        cache.invalidate_prefix("todo:1:").await.unwrap();

        // The stale set lands after the invalidation's delete.
        store.set_release.notify_one();
        wait_until(|| store.landed.load(Ordering::SeqCst)).await;
        assert!(store.inner.get("todo:1:list").await.unwrap().is_some());

        let reader = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.fetch("todo:1:list", || async { Ok(vec![2]) }).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!reader.is_finished());

        store.cleanup_release.notify_one();
        // The reader's own write-back goes through the same gate.
        store.set_release.notify_one();
        assert_eq!(first.await.unwrap().unwrap().into_value(), vec![1]);

        let fresh = reader.await.unwrap().unwrap();
        assert_eq!(fresh.source(), FetchSource::Loader);
        assert_eq!(fresh.into_value(), vec![2]);
    }

    #[tokio::test]
    async fn test_invalidate_prefix_only_touches_matching_keys() {
        let (store, cache) = memory_cache();
        for key in ["todo:1:search:a", "todo:1:search:b", "todo:1:list", "todo:2:search:a"] {
            cache.fetch(key, || async { Ok(vec![0]) }).await.unwrap();
        }

        let removed = cache.invalidate_prefix("todo:1:search:").await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.get("todo:1:list").await.unwrap().is_some());
        assert!(store.get("todo:2:search:a").await.unwrap().is_some());
        assert!(store.get("todo:1:search:a").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_loader_fails_waiters_and_clears_record() {
        let (_store, cache) = memory_cache();

        let err = cache.fetch("boom", exploding_loader).await.unwrap_err();
        assert!(matches!(err, DuelineError::Internal { .. }));

        wait_until(|| cache.in_flight_count() == 0).await;
        let fetched = cache.fetch("boom", || async { Ok(vec![3]) }).await.unwrap();
        assert_eq!(fetched.into_value(), vec![3]);
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_writes() {
        let store = Arc::new(InMemoryCacheStore::new());
        let cache: CoalescingReadCache<Vec<i64>> = CoalescingReadCache::new(
            store.clone(),
            CacheConfig::new().with_ttl(Duration::ZERO),
        );

        cache.fetch("k", || async { Ok(vec![1]) }).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let (store, cache) = memory_cache();
        store
            .set("k", b"not json".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        let fetched = cache.fetch("k", || async { Ok(vec![4]) }).await.unwrap();
        assert_eq!(fetched.source(), FetchSource::Loader);
        assert_eq!(fetched.into_value(), vec![4]);
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::new().with_ttl(Duration::from_secs(5));
        assert_eq!(config.entry_ttl, Duration::from_secs(5));
        assert!(config.writes_enabled());
        assert_eq!(CacheConfig::default().entry_ttl, DEFAULT_ENTRY_TTL);
    }
}
