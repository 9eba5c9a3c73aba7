//! Redis-backed cache store.
//!
//! Entries are plain Redis strings written with `SET ... PX`, so Redis owns
//! expiry. Prefix deletion walks the keyspace with `SCAN MATCH` and deletes
//! each batch; keys written while the scan runs may survive until their TTL.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dueline_core::CacheError;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError};
use tracing::debug;

use super::traits::{CacheStats, CacheStore};

/// Keys requested per `SCAN` round trip.
const SCAN_BATCH: usize = 200;

/// Default per-command timeout.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(500);

fn backend_error(e: RedisError) -> CacheError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_timeout() {
        CacheError::Unavailable {
            reason: e.to_string(),
        }
    } else {
        CacheError::Backend {
            reason: e.to_string(),
        }
    }
}

/// Escape glob metacharacters so a literal prefix can be used with `MATCH`.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('*');
    escaped
}

/// [`CacheStore`] on a shared Redis connection manager.
pub struct RedisCacheStore {
    connection: ConnectionManager,
    command_timeout: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for RedisCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheStore")
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

impl RedisCacheStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str, command_timeout: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(backend_error)?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(backend_error)?;

        debug!(timeout_ms = command_timeout.as_millis() as u64, "Redis cache store connected");

        Ok(Self {
            connection,
            command_timeout,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, RedisError>>,
    ) -> Result<T, CacheError> {
        match tokio::time::timeout(self.command_timeout, op).await {
            Ok(result) => result.map_err(backend_error),
            Err(_) => Err(CacheError::Unavailable {
                reason: format!(
                    "redis command timed out after {}ms",
                    self.command_timeout.as_millis()
                ),
            }),
        }
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.connection.clone();
        let value: Option<Vec<u8>> = self.bounded(conn.get(key)).await?;

        let counter = if value.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("PX").arg(ttl_ms);
        let _: () = self.bounded(cmd.query_async(&mut conn)).await?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection.clone();
        self.bounded(conn.del(keys)).await
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let pattern = escape_glob(prefix);
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;
        let mut deleted = 0u64;

        loop {
            let mut cmd = redis::cmd("SCAN");
            cmd.arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH);
            let (next, keys): (u64, Vec<String>) =
                self.bounded(cmd.query_async(&mut conn)).await?;

            if !keys.is_empty() {
                let removed: u64 = self.bounded(conn.del(keys.as_slice())).await?;
                deleted += removed;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(prefix = %prefix, deleted, "Deleted cache keys by prefix");
        Ok(deleted)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let mut conn = self.connection.clone();
        let entry_count: u64 = self
            .bounded(redis::cmd("DBSIZE").query_async(&mut conn))
            .await?;

        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count,
            memory_bytes: 0,
            expirations: 0,
        })
    }
}
