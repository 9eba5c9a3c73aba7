//! Owner-scoped todo persistence contract.
//!
//! The relational implementation lives in dueline-api (`PgTodoStore`);
//! this module carries the trait and an in-memory store used by tests and
//! by the `memory` store mode.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use dueline_core::{
    DuelineResult, NewTodo, OwnerId, StorageError, Todo, TodoId, TodoPatch,
};

/// Durable CRUD and query operations over todos.
///
/// Every method is scoped by owner: implementations never return, modify or
/// acknowledge another owner's rows. A todo that exists but belongs to a
/// different owner is reported exactly like a missing one.
#[async_trait]
pub trait TodoStore: Send + Sync {
    // ========================================================================
    // WRITES
    // ========================================================================

    /// Persist a new todo. Input is expected to be normalized already.
    async fn create(&self, owner_id: OwnerId, new: NewTodo) -> DuelineResult<Todo>;

    /// Apply the present patch fields and bump `updated_at`.
    async fn update(&self, owner_id: OwnerId, id: TodoId, patch: TodoPatch)
        -> DuelineResult<Todo>;

    /// Mark a todo deleted. Already-deleted rows report `NotFound`.
    async fn soft_delete(&self, owner_id: OwnerId, id: TodoId) -> DuelineResult<()>;

    /// Set the done flag.
    async fn mark_done(&self, owner_id: OwnerId, id: TodoId, done: bool) -> DuelineResult<Todo>;

    // ========================================================================
    // READS
    // ========================================================================

    async fn get(&self, owner_id: OwnerId, id: TodoId) -> DuelineResult<Todo>;

    /// Non-deleted todos, newest first.
    async fn list(&self, owner_id: OwnerId) -> DuelineResult<Vec<Todo>>;

    /// Case-insensitive substring match on title or description, newest first.
    async fn search(&self, owner_id: OwnerId, query: &str) -> DuelineResult<Vec<Todo>>;

    /// Open todos whose due date has passed, earliest due first.
    async fn overdue(&self, owner_id: OwnerId) -> DuelineResult<Vec<Todo>>;
}

/// In-memory [`TodoStore`].
///
/// Rows are kept in id order so equal `created_at` values still sort
/// deterministically (newer id first).
#[derive(Debug)]
pub struct InMemoryTodoStore {
    rows: RwLock<BTreeMap<TodoId, Todo>>,
    next_id: AtomicI64,
}

impl Default for InMemoryTodoStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTodoStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Insert a fully-formed row, bypassing validation.
    ///
    /// Lets tests place todos with past due dates or explicit timestamps.
    /// The id counter moves past the seeded id.
    pub fn seed(&self, todo: Todo) -> DuelineResult<()> {
        let mut rows = self.rows.write().map_err(|_| StorageError::LockPoisoned)?;
        self.next_id.fetch_max(todo.id.get() + 1, Ordering::SeqCst);
        rows.insert(todo.id, todo);
        Ok(())
    }

    /// Number of rows, soft-deleted ones included.
    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_live_row<R>(
        &self,
        owner_id: OwnerId,
        id: TodoId,
        apply: impl FnOnce(&mut Todo) -> R,
    ) -> DuelineResult<R> {
        let mut rows = self.rows.write().map_err(|_| StorageError::LockPoisoned)?;
        let row = rows
            .get_mut(&id)
            .filter(|row| row.owner_id == owner_id && !row.is_deleted())
            .ok_or(StorageError::NotFound { owner_id, id })?;
        Ok(apply(row))
    }

    fn collect_live(
        &self,
        owner_id: OwnerId,
        keep: impl Fn(&Todo) -> bool,
    ) -> DuelineResult<Vec<Todo>> {
        let rows = self.rows.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(rows
            .values()
            .rev()
            .filter(|row| row.owner_id == owner_id && !row.is_deleted() && keep(row))
            .cloned()
            .collect())
    }
}

fn newest_first(todos: &mut [Todo]) {
    // Stable sort keeps the id-descending order for equal timestamps.
    todos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[async_trait]
impl TodoStore for InMemoryTodoStore {
    async fn create(&self, owner_id: OwnerId, new: NewTodo) -> DuelineResult<Todo> {
        let now = Utc::now();
        let id = TodoId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let todo = Todo {
            id,
            owner_id,
            title: new.title,
            description: new.description,
            is_done: false,
            due_at: new.due_at,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let mut rows = self.rows.write().map_err(|_| StorageError::LockPoisoned)?;
        if rows.contains_key(&id) {
            return Err(StorageError::InsertFailed {
                reason: format!("todo {id} already exists"),
            }
            .into());
        }
        rows.insert(id, todo.clone());
        Ok(todo)
    }

    async fn update(
        &self,
        owner_id: OwnerId,
        id: TodoId,
        patch: TodoPatch,
    ) -> DuelineResult<Todo> {
        self.with_live_row(owner_id, id, |row| {
            patch.apply_to(row);
            row.updated_at = Utc::now();
            row.clone()
        })
    }

    async fn soft_delete(&self, owner_id: OwnerId, id: TodoId) -> DuelineResult<()> {
        self.with_live_row(owner_id, id, |row| {
            let now = Utc::now();
            row.deleted_at = Some(now);
            row.updated_at = now;
        })
    }

    async fn mark_done(&self, owner_id: OwnerId, id: TodoId, done: bool) -> DuelineResult<Todo> {
        self.with_live_row(owner_id, id, |row| {
            row.is_done = done;
            row.updated_at = Utc::now();
            row.clone()
        })
    }

    async fn get(&self, owner_id: OwnerId, id: TodoId) -> DuelineResult<Todo> {
        self.with_live_row(owner_id, id, |row| row.clone())
    }

    async fn list(&self, owner_id: OwnerId) -> DuelineResult<Vec<Todo>> {
        let mut todos = self.collect_live(owner_id, |_| true)?;
        newest_first(&mut todos);
        Ok(todos)
    }

    async fn search(&self, owner_id: OwnerId, query: &str) -> DuelineResult<Vec<Todo>> {
        let needle = query.trim().to_lowercase();
        let mut todos = self.collect_live(owner_id, |row| row.matches_query(&needle))?;
        newest_first(&mut todos);
        Ok(todos)
    }

    async fn overdue(&self, owner_id: OwnerId) -> DuelineResult<Vec<Todo>> {
        let now = Utc::now();
        let mut todos = self.collect_live(owner_id, |row| row.is_overdue(now))?;
        todos.sort_by(|a, b| a.due_at.cmp(&b.due_at));
        Ok(todos)
    }
}
