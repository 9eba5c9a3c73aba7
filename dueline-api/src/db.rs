//! Database Connection Pool Module
//!
//! PostgreSQL connection pooling with deadpool-postgres and the
//! [`PgTodoStore`] implementation of [`TodoStore`].
//!
//! Every statement filters on `user_id`, so a row owned by someone else is
//! indistinguishable from a missing one. The schema itself is managed
//! outside this crate; `sql/schema.sql` documents the expected shape.

use crate::error::{ApiError, ApiResult};
use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, PoolError, RecyclingMethod, Runtime};
use dueline_core::{
    DuelineError, DuelineResult, NewTodo, OwnerId, StorageError, Todo, TodoId, TodoPatch,
};
use dueline_storage::TodoStore;
use std::time::Duration;
use tokio_postgres::{NoTls, Row};

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full connection URL; overrides the discrete fields when set
    pub url: Option<String>,
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// How long a caller waits for a pooled connection
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            dbname: "dueline".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(5),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("DUELINE_DB_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            host: std::env::var("DUELINE_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("DUELINE_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("DUELINE_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("DUELINE_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("DUELINE_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("DUELINE_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: Duration::from_secs(
                std::env::var("DUELINE_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.timeout.as_secs()),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    ///
    /// No connection is opened until the first checkout.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        match &self.url {
            Some(url) => cfg.url = Some(url.clone()),
            None => {
                cfg.host = Some(self.host.clone());
                cfg.port = Some(self.port);
                cfg.dbname = Some(self.dbname.clone());
                cfg.user = Some(self.user.clone());
                cfg.password = Some(self.password.clone());
            }
        }

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::database_error(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

fn pool_error(err: PoolError) -> DuelineError {
    tracing::error!("Connection pool error: {:?}", err);
    let reason = match err {
        PoolError::Timeout(_) => "timed out waiting for a database connection".to_string(),
        PoolError::Closed => "database connection pool is closed".to_string(),
        other => other.to_string(),
    };
    StorageError::Unavailable { reason }.into()
}

fn query_failed(err: tokio_postgres::Error) -> DuelineError {
    tracing::error!("Database error: {:?}", err);
    StorageError::QueryFailed {
        reason: err.to_string(),
    }
    .into()
}

fn insert_failed(err: tokio_postgres::Error) -> DuelineError {
    tracing::error!("Database insert error: {:?}", err);
    StorageError::InsertFailed {
        reason: err.to_string(),
    }
    .into()
}

/// Escape `LIKE` metacharacters so the query text matches literally.
fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

// ============================================================================
// POSTGRES TODO STORE
// ============================================================================

const TODO_COLUMNS: &str =
    "id, user_id, title, description, is_done, due_at, created_at, updated_at, deleted_at";

/// [`TodoStore`] over the `todos` table.
#[derive(Clone)]
pub struct PgTodoStore {
    pool: Pool,
}

impl std::fmt::Debug for PgTodoStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgTodoStore")
            .field("pool_size", &self.pool_size())
            .finish()
    }
}

impl PgTodoStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    /// Round-trip a trivial query; used by the readiness probe.
    pub async fn ping(&self) -> DuelineResult<()> {
        let conn = self.get_conn().await?;
        conn.execute("SELECT 1", &[]).await.map_err(query_failed)?;
        Ok(())
    }

    async fn get_conn(&self) -> DuelineResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(pool_error)
    }

    fn row_to_todo(row: &Row) -> DuelineResult<Todo> {
        let todo = Todo {
            id: TodoId::new(row.try_get("id").map_err(query_failed)?),
            owner_id: OwnerId::new(row.try_get("user_id").map_err(query_failed)?),
            title: row.try_get("title").map_err(query_failed)?,
            description: row.try_get("description").map_err(query_failed)?,
            is_done: row.try_get("is_done").map_err(query_failed)?,
            due_at: row.try_get("due_at").map_err(query_failed)?,
            created_at: row.try_get("created_at").map_err(query_failed)?,
            updated_at: row.try_get("updated_at").map_err(query_failed)?,
            deleted_at: row.try_get("deleted_at").map_err(query_failed)?,
        };
        Ok(todo)
    }

    fn rows_to_todos(rows: &[Row]) -> DuelineResult<Vec<Todo>> {
        rows.iter().map(Self::row_to_todo).collect()
    }

    /// Run a statement returning at most one todo row; no row is `NotFound`.
    async fn returning_one(
        &self,
        owner_id: OwnerId,
        id: TodoId,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> DuelineResult<Todo> {
        let conn = self.get_conn().await?;
        let row = conn.query_opt(sql, params).await.map_err(query_failed)?;
        match row {
            Some(row) => Self::row_to_todo(&row),
            None => Err(StorageError::NotFound { owner_id, id }.into()),
        }
    }
}

#[async_trait]
impl TodoStore for PgTodoStore {
    // ========================================================================
    // WRITES
    // ========================================================================

    async fn create(&self, owner_id: OwnerId, new: NewTodo) -> DuelineResult<Todo> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "INSERT INTO todos (user_id, title, description, due_at) \
             VALUES ($1, $2, $3, $4) RETURNING {TODO_COLUMNS}"
        );
        let row = conn
            .query_one(
                &sql,
                &[&owner_id.get(), &new.title, &new.description, &new.due_at],
            )
            .await
            .map_err(insert_failed)?;
        Self::row_to_todo(&row)
    }

    async fn update(
        &self,
        owner_id: OwnerId,
        id: TodoId,
        patch: TodoPatch,
    ) -> DuelineResult<Todo> {
        let sql = format!(
            "UPDATE todos SET \
                title = COALESCE($3, title), \
                description = COALESCE($4, description), \
                due_at = COALESCE($5, due_at), \
                is_done = COALESCE($6, is_done), \
                updated_at = NOW() \
             WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL \
             RETURNING {TODO_COLUMNS}"
        );
        self.returning_one(
            owner_id,
            id,
            &sql,
            &[
                &id.get(),
                &owner_id.get(),
                &patch.title,
                &patch.description,
                &patch.due_at,
                &patch.is_done,
            ],
        )
        .await
    }

    async fn soft_delete(&self, owner_id: OwnerId, id: TodoId) -> DuelineResult<()> {
        let conn = self.get_conn().await?;
        let affected = conn
            .execute(
                "UPDATE todos SET deleted_at = NOW(), updated_at = NOW() \
                 WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL",
                &[&id.get(), &owner_id.get()],
            )
            .await
            .map_err(query_failed)?;

        if affected == 0 {
            return Err(StorageError::NotFound { owner_id, id }.into());
        }
        Ok(())
    }

    async fn mark_done(&self, owner_id: OwnerId, id: TodoId, done: bool) -> DuelineResult<Todo> {
        let sql = format!(
            "UPDATE todos SET is_done = $3, updated_at = NOW() \
             WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL \
             RETURNING {TODO_COLUMNS}"
        );
        self.returning_one(owner_id, id, &sql, &[&id.get(), &owner_id.get(), &done])
            .await
    }

    // ========================================================================
    // READS
    // ========================================================================

    async fn get(&self, owner_id: OwnerId, id: TodoId) -> DuelineResult<Todo> {
        let sql = format!(
            "SELECT {TODO_COLUMNS} FROM todos \
             WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL"
        );
        self.returning_one(owner_id, id, &sql, &[&id.get(), &owner_id.get()])
            .await
    }

    async fn list(&self, owner_id: OwnerId) -> DuelineResult<Vec<Todo>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {TODO_COLUMNS} FROM todos \
             WHERE user_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at DESC, id DESC"
        );
        let rows = conn
            .query(&sql, &[&owner_id.get()])
            .await
            .map_err(query_failed)?;
        Self::rows_to_todos(&rows)
    }

    async fn search(&self, owner_id: OwnerId, query: &str) -> DuelineResult<Vec<Todo>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {TODO_COLUMNS} FROM todos \
             WHERE user_id = $1 AND deleted_at IS NULL \
               AND (title ILIKE $2 OR description ILIKE $2) \
             ORDER BY created_at DESC, id DESC"
        );
        let pattern = like_pattern(query.trim());
        let rows = conn
            .query(&sql, &[&owner_id.get(), &pattern])
            .await
            .map_err(query_failed)?;
        Self::rows_to_todos(&rows)
    }

    async fn overdue(&self, owner_id: OwnerId) -> DuelineResult<Vec<Todo>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {TODO_COLUMNS} FROM todos \
             WHERE user_id = $1 AND deleted_at IS NULL AND is_done = FALSE \
               AND due_at IS NOT NULL AND due_at < NOW() \
             ORDER BY due_at ASC"
        );
        let rows = conn
            .query(&sql, &[&owner_id.get()])
            .await
            .map_err(query_failed)?;
        Self::rows_to_todos(&rows)
    }
}
