//! Cached todo service.
//!
//! Decides what is cached and when it is dropped. Reads of list, overdue
//! and search results go through a [`CoalescingReadCache`]; `get` is served
//! straight from the store. Every successful write invalidates all cached
//! queries of the writing owner: the exact list and overdue keys plus every
//! search key under the owner's search prefix.
//!
//! Cache failures never fail a call. Reads fall back to the store and a
//! failed invalidation is logged while the write still succeeds; the
//! affected entries then live at most one TTL.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dueline_core::{
    normalize_new_todo, normalize_patch, CacheError, DuelineResult, NewTodo, OwnerId, Todo,
    TodoId, TodoPatch,
};
use dueline_storage::{
    CacheConfig, CacheKey, CacheStore, CoalescingReadCache, CoalescingStats, TodoStore,
};
use tracing::{debug, info, warn};

use crate::telemetry::metrics;

/// Time a store call and record it.
async fn timed<T, Fut>(operation: &'static str, call: Fut) -> DuelineResult<T>
where
    Fut: Future<Output = DuelineResult<T>>,
{
    let start = Instant::now();
    let result = call.await;
    if let Some(metrics) = metrics() {
        metrics.record_store_operation(operation, result.is_ok(), start.elapsed().as_secs_f64());
    }
    result
}

/// Todo operations with read-through caching and write invalidation.
#[derive(Clone)]
pub struct TodoService {
    store: Arc<dyn TodoStore>,
    cache: CoalescingReadCache<Vec<Todo>>,
}

impl std::fmt::Debug for TodoService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TodoService")
            .field("cache", &self.cache)
            .finish()
    }
}

impl TodoService {
    pub fn new(store: Arc<dyn TodoStore>, cache: CoalescingReadCache<Vec<Todo>>) -> Self {
        Self { store, cache }
    }

    /// Build the service and its read cache over `cache_store`.
    pub fn with_cache_store(
        store: Arc<dyn TodoStore>,
        cache_store: Arc<dyn CacheStore>,
        config: CacheConfig,
    ) -> Self {
        Self::new(store, CoalescingReadCache::new(cache_store, config))
    }

    pub fn store(&self) -> &Arc<dyn TodoStore> {
        &self.store
    }

    pub fn cache(&self) -> &CoalescingReadCache<Vec<Todo>> {
        &self.cache
    }

    pub fn cache_stats(&self) -> CoalescingStats {
        self.cache.stats()
    }

    pub fn in_flight_loads(&self) -> usize {
        self.cache.in_flight_count()
    }

    // ========================================================================
    // CACHED READS
    // ========================================================================

    /// Non-deleted todos of `owner_id`, newest first.
    pub async fn list(&self, owner_id: OwnerId) -> DuelineResult<Vec<Todo>> {
        let store = Arc::clone(&self.store);
        self.cached_read(CacheKey::list(owner_id), move || async move {
            timed("list", store.list(owner_id)).await
        })
        .await
    }

    /// Open todos past their due date, earliest first.
    pub async fn overdue(&self, owner_id: OwnerId) -> DuelineResult<Vec<Todo>> {
        let store = Arc::clone(&self.store);
        self.cached_read(CacheKey::overdue(owner_id), move || async move {
            timed("overdue", store.overdue(owner_id)).await
        })
        .await
    }

    /// Todos whose title or description contains `query`, ignoring case.
    ///
    /// Queries differing only in case or surrounding whitespace share one
    /// cache entry. The store receives the trimmed text.
    pub async fn search(&self, owner_id: OwnerId, query: &str) -> DuelineResult<Vec<Todo>> {
        let store = Arc::clone(&self.store);
        let text = query.trim().to_string();
        self.cached_read(CacheKey::search(owner_id, query), move || async move {
            timed("search", store.search(owner_id, &text)).await
        })
        .await
    }

    async fn cached_read<F, Fut>(&self, key: CacheKey, loader: F) -> DuelineResult<Vec<Todo>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = DuelineResult<Vec<Todo>>> + Send + 'static,
    {
        let encoded = key.encode();
        let fetched = self.cache.fetch(&encoded, loader).await?;

        if let Some(metrics) = metrics() {
            metrics.record_cache_fetch(key.kind(), fetched.source());
        }
        debug!(
            owner_id = %key.owner_id(),
            cache_key = %encoded,
            source = %fetched.source(),
            count = fetched.value().len(),
            "Served todo query"
        );

        Ok(fetched.into_value())
    }

    // ========================================================================
    // UNCACHED READS
    // ========================================================================

    pub async fn get(&self, owner_id: OwnerId, id: TodoId) -> DuelineResult<Todo> {
        timed("get", self.store.get(owner_id, id)).await
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Validate and persist a new todo. A past `due_at` is rejected.
    pub async fn create(&self, owner_id: OwnerId, new: NewTodo) -> DuelineResult<Todo> {
        let new = normalize_new_todo(new, Utc::now())?;
        let todo = timed("create", self.store.create(owner_id, new)).await?;
        info!(owner_id = %owner_id, todo_id = %todo.id, "Todo created");

        self.invalidate_after_write(owner_id, "create").await;
        Ok(todo)
    }

    /// Validate and apply a partial update.
    pub async fn update(
        &self,
        owner_id: OwnerId,
        id: TodoId,
        patch: TodoPatch,
    ) -> DuelineResult<Todo> {
        let patch = normalize_patch(patch, Utc::now())?;
        let todo = timed("update", self.store.update(owner_id, id, patch)).await?;
        info!(owner_id = %owner_id, todo_id = %id, "Todo updated");

        self.invalidate_after_write(owner_id, "update").await;
        Ok(todo)
    }

    /// Soft-delete a todo.
    pub async fn delete(&self, owner_id: OwnerId, id: TodoId) -> DuelineResult<()> {
        timed("delete", self.store.soft_delete(owner_id, id)).await?;
        info!(owner_id = %owner_id, todo_id = %id, "Todo deleted");

        self.invalidate_after_write(owner_id, "delete").await;
        Ok(())
    }

    /// Set or clear the done flag.
    pub async fn mark_done(&self, owner_id: OwnerId, id: TodoId, done: bool) -> DuelineResult<Todo> {
        let todo = timed("mark_done", self.store.mark_done(owner_id, id, done)).await?;
        info!(owner_id = %owner_id, todo_id = %id, done, "Todo done flag set");

        self.invalidate_after_write(owner_id, "mark_done").await;
        Ok(todo)
    }

    /// Mark a todo done.
    pub async fn complete(&self, owner_id: OwnerId, id: TodoId) -> DuelineResult<Todo> {
        self.mark_done(owner_id, id, true).await
    }

    // ========================================================================
    // INVALIDATION
    // ========================================================================

    /// Drop every cached query of `owner_id`.
    ///
    /// Deletes the exact list and overdue keys, then everything under the
    /// owner's search prefix. Both steps run even if the first fails; the
    /// first error is returned. Other owners' entries are untouched.
    pub async fn invalidate_all(&self, owner_id: OwnerId) -> Result<u64, CacheError> {
        let exact = [
            CacheKey::list(owner_id).encode(),
            CacheKey::overdue(owner_id).encode(),
        ];
        let exact_result = self.cache.invalidate(&exact).await;
        let search_result = self
            .cache
            .invalidate_prefix(&CacheKey::search_prefix(owner_id))
            .await;

        match (exact_result, search_result) {
            (Ok(exact), Ok(search)) => Ok(exact + search),
            (Err(e), _) | (_, Err(e)) => Err(e),
        }
    }

    async fn invalidate_after_write(&self, owner_id: OwnerId, operation: &'static str) {
        let result = self.invalidate_all(owner_id).await;
        if let Some(metrics) = metrics() {
            metrics.record_invalidation(result.is_ok());
        }

        match result {
            Ok(removed) => {
                debug!(owner_id = %owner_id, operation, removed, "Invalidated cached queries");
            }
            Err(e) => {
                warn!(
                    owner_id = %owner_id,
                    operation,
                    error = %e,
                    "Cache invalidation failed, stale entries expire by TTL"
                );
            }
        }
    }
}
