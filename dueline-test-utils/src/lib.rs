//! Dueline Test Utilities
//!
//! Shared test infrastructure for the dueline workspace:
//! - Fault-injecting doubles for the cache store and the todo store
//! - Proptest generators for domain types
//! - Fixtures for common scenarios
//! - Assertions for dueline error variants

// Re-export in-memory implementations from their source crate
pub use dueline_storage::{InMemoryCacheStore, InMemoryTodoStore};

// Re-export core types for convenience
pub use dueline_core::{
    CacheError, DuelineError, DuelineResult, NewTodo, OwnerId, StorageError, Timestamp, Todo,
    TodoId, TodoPatch, ValidationError,
};

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dueline_storage::{CacheStats, CacheStore, TodoStore};

// ============================================================================
// CACHE STORE DOUBLES
// ============================================================================

/// Cache store whose calls can be switched to fail.
///
/// Wraps an [`InMemoryCacheStore`]; while failing, every call returns
/// `CacheError::Unavailable` without touching the inner store.
#[derive(Debug)]
pub struct FailingCacheStore {
    inner: InMemoryCacheStore,
    failing: AtomicBool,
    gets: AtomicUsize,
    sets: AtomicUsize,
    deletes: AtomicUsize,
    prefix_deletes: AtomicUsize,
}

impl FailingCacheStore {
    /// A store that fails every call until told otherwise.
    pub fn always_failing() -> Self {
        let store = Self::healthy();
        store.set_failing(true);
        store
    }

    /// A store that behaves like [`InMemoryCacheStore`] until told to fail.
    pub fn healthy() -> Self {
        Self {
            inner: InMemoryCacheStore::new(),
            failing: AtomicBool::new(false),
            gets: AtomicUsize::new(0),
            sets: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            prefix_deletes: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &InMemoryCacheStore {
        &self.inner
    }

    pub fn get_calls(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn prefix_delete_calls(&self) -> usize {
        self.prefix_deletes.load(Ordering::SeqCst)
    }

    fn check(&self, counter: &AtomicUsize) -> Result<(), CacheError> {
        counter.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(CacheError::Unavailable {
                reason: "injected cache outage".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheStore for FailingCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.check(&self.gets)?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.check(&self.sets)?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        self.check(&self.deletes)?;
        self.inner.delete(keys).await
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        self.check(&self.prefix_deletes)?;
        self.inner.delete_by_prefix(prefix).await
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        self.inner.stats().await
    }
}

// ============================================================================
// TODO STORE DOUBLES
// ============================================================================

/// Per-operation call counts of an [`InstrumentedTodoStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub list: usize,
    pub search: usize,
    pub overdue: usize,
    pub get: usize,
    pub writes: usize,
}

/// [`InMemoryTodoStore`] with call counting, read latency and failure
/// injection.
#[derive(Debug, Default)]
pub struct InstrumentedTodoStore {
    inner: InMemoryTodoStore,
    read_delay_ms: AtomicU64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    list_calls: AtomicUsize,
    search_calls: AtomicUsize,
    overdue_calls: AtomicUsize,
    get_calls: AtomicUsize,
    write_calls: AtomicUsize,
    search_queries: Mutex<Vec<String>>,
}

impl InstrumentedTodoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn inner(&self) -> &InMemoryTodoStore {
        &self.inner
    }

    /// Delay applied to list, search and overdue before answering.
    pub fn set_read_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.read_delay_ms.store(millis, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> StoreCalls {
        StoreCalls {
            list: self.list_calls.load(Ordering::SeqCst),
            search: self.search_calls.load(Ordering::SeqCst),
            overdue: self.overdue_calls.load(Ordering::SeqCst),
            get: self.get_calls.load(Ordering::SeqCst),
            writes: self.write_calls.load(Ordering::SeqCst),
        }
    }

    /// Query strings received by `search`, in call order.
    pub fn search_queries(&self) -> Vec<String> {
        self.search_queries
            .lock()
            .map(|queries| queries.clone())
            .unwrap_or_default()
    }

    async fn enter_read(&self, counter: &AtomicUsize) -> DuelineResult<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::QueryFailed {
                reason: "injected read failure".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn enter_write(&self) -> DuelineResult<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                reason: "injected write failure".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl TodoStore for InstrumentedTodoStore {
    async fn create(&self, owner_id: OwnerId, new: NewTodo) -> DuelineResult<Todo> {
        self.enter_write()?;
        self.inner.create(owner_id, new).await
    }

    async fn update(
        &self,
        owner_id: OwnerId,
        id: TodoId,
        patch: TodoPatch,
    ) -> DuelineResult<Todo> {
        self.enter_write()?;
        self.inner.update(owner_id, id, patch).await
    }

    async fn soft_delete(&self, owner_id: OwnerId, id: TodoId) -> DuelineResult<()> {
        self.enter_write()?;
        self.inner.soft_delete(owner_id, id).await
    }

    async fn mark_done(&self, owner_id: OwnerId, id: TodoId, done: bool) -> DuelineResult<Todo> {
        self.enter_write()?;
        self.inner.mark_done(owner_id, id, done).await
    }

    async fn get(&self, owner_id: OwnerId, id: TodoId) -> DuelineResult<Todo> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get(owner_id, id).await
    }

    async fn list(&self, owner_id: OwnerId) -> DuelineResult<Vec<Todo>> {
        self.enter_read(&self.list_calls).await?;
        self.inner.list(owner_id).await
    }

    async fn search(&self, owner_id: OwnerId, query: &str) -> DuelineResult<Vec<Todo>> {
        if let Ok(mut queries) = self.search_queries.lock() {
            queries.push(query.to_string());
        }
        self.enter_read(&self.search_calls).await?;
        self.inner.search(owner_id, query).await
    }

    async fn overdue(&self, owner_id: OwnerId) -> DuelineResult<Vec<Todo>> {
        self.enter_read(&self.overdue_calls).await?;
        self.inner.overdue(owner_id).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for dueline domain types.

    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    pub fn arb_owner_id() -> impl Strategy<Value = OwnerId> {
        (1i64..1_000_000).prop_map(OwnerId::new)
    }

    pub fn arb_todo_id() -> impl Strategy<Value = TodoId> {
        (1i64..1_000_000).prop_map(TodoId::new)
    }

    /// Generate a Timestamp (DateTime<Utc>).
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        // Generate timestamps within a reasonable range (2020-2030)
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    /// Search text with random case and surrounding whitespace.
    pub fn arb_search_query() -> impl Strategy<Value = String> {
        ("[ \t]{0,3}", "[a-zA-Z0-9 ]{0,20}", "[ \t]{0,3}")
            .prop_map(|(lead, body, trail)| format!("{lead}{body}{trail}"))
    }

    /// A title that passes validation.
    pub fn arb_valid_title() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9][a-zA-Z0-9 ]{0,60}"
    }

    pub fn arb_new_todo() -> impl Strategy<Value = NewTodo> {
        (arb_valid_title(), "[a-z ]{0,40}")
            .prop_map(|(title, description)| NewTodo::new(title).with_description(description))
    }

    pub fn arb_todo() -> impl Strategy<Value = Todo> {
        (
            arb_todo_id(),
            arb_owner_id(),
            arb_valid_title(),
            any::<bool>(),
            proptest::option::of(arb_timestamp()),
            arb_timestamp(),
        )
            .prop_map(|(id, owner_id, title, is_done, due_at, created_at)| Todo {
                id,
                owner_id,
                title,
                description: String::new(),
                is_done,
                due_at,
                created_at,
                updated_at: created_at,
                deleted_at: None,
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made todos and stores for common scenarios.

    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};

    /// An open todo owned by `owner_id`, due `due_in` from now (negative for
    /// overdue).
    pub fn todo_due_in(id: i64, owner_id: OwnerId, title: &str, due_in: ChronoDuration) -> Todo {
        let now = Utc::now();
        Todo {
            id: TodoId::new(id),
            owner_id,
            title: title.to_string(),
            description: String::new(),
            is_done: false,
            due_at: Some(now + due_in),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Three plain todos created through `store` for `owner_id`.
    pub async fn create_three<S: TodoStore + ?Sized>(
        store: &S,
        owner_id: OwnerId,
    ) -> DuelineResult<Vec<Todo>> {
        let mut created = Vec::with_capacity(3);
        for title in ["Buy milk", "Call the plumber", "File taxes"] {
            created.push(store.create(owner_id, NewTodo::new(title)).await?);
        }
        Ok(created)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for dueline error variants.

    use super::*;

    /// Assert that a DuelineResult is a NotFound storage error.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &DuelineResult<T>) {
        match result {
            Err(err) if err.is_not_found() => {}
            other => panic!("Expected NotFound, got: {:?}", other),
        }
    }

    /// Assert that a DuelineResult is a validation error.
    #[track_caller]
    pub fn assert_invalid_input<T: std::fmt::Debug>(result: &DuelineResult<T>) {
        match result {
            Err(err) if err.is_invalid_input() => {}
            other => panic!("Expected invalid input, got: {:?}", other),
        }
    }

    /// Assert that two todo slices hold the same ids in the same order.
    #[track_caller]
    pub fn assert_same_ids(actual: &[Todo], expected: &[Todo]) {
        let actual: Vec<_> = actual.iter().map(|t| t.id).collect();
        let expected: Vec<_> = expected.iter().map(|t| t.id).collect();
        assert_eq!(actual, expected, "todo ids differ");
    }
}
