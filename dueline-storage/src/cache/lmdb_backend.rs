//! LMDB-backed cache store.
//!
//! Uses the heed crate (Rust bindings for LMDB) so cached query results
//! survive process restarts and can be shared by processes on one host.
//!
//! # Value Layout
//!
//! `[expires_at_ms: u64 big-endian][payload]`. Expired entries read as a
//! miss; they are replaced by the next `set` for the key or removed by
//! [`LmdbCacheStore::purge_expired`].
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The store uses:
//! - Read transactions for `get` and `stats`
//! - One write transaction per `set`, `delete` and `delete_by_prefix`
//! - Atomic counters for hit/miss statistics

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dueline_core::CacheError;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use super::traits::{CacheStats, CacheStore};

const HEADER_LEN: usize = 8;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored value shorter than its header.
    #[error("Corrupt entry for key {key}")]
    CorruptEntry { key: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::EnvOpen(reason) | LmdbCacheError::DbOpen(reason) => {
                CacheError::Unavailable { reason }
            }
            other => CacheError::Backend {
                reason: other.to_string(),
            },
        }
    }
}

fn transaction_error(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

fn encode_entry(payload: &[u8], ttl: Duration) -> Vec<u8> {
    let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    let expires_at = now_millis().saturating_add(ttl_ms);

    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&expires_at.to_be_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

/// Split a stored value into its expiry and payload.
fn decode_entry(bytes: &[u8]) -> Option<(u64, &[u8])> {
    if bytes.len() < HEADER_LEN {
        return None;
    }
    let (header, payload) = bytes.split_at(HEADER_LEN);
    let expires_at = u64::from_be_bytes(header.try_into().ok()?);
    Some((expires_at, payload))
}

/// LMDB-backed [`CacheStore`].
///
/// # Example
///
/// ```ignore
/// use dueline_storage::cache::LmdbCacheStore;
///
/// let store = LmdbCacheStore::new("/var/cache/dueline", 256)?;
/// store.set("todo:42:list", payload, Duration::from_secs(60)).await?;
/// ```
pub struct LmdbCacheStore {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
}

impl std::fmt::Debug for LmdbCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbCacheStore")
            .field("path", &self.env.path())
            .finish()
    }
}

impl LmdbCacheStore {
    /// Open (or create) an LMDB cache store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process and
        // the files are not modified by anything other than LMDB.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(transaction_error)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(transaction_error)?;

        Ok(Self {
            env,
            db,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        })
    }

    /// Remove every expired entry in one write transaction.
    pub fn purge_expired(&self) -> Result<u64, LmdbCacheError> {
        let now = now_millis();
        let mut wtxn = self.env.write_txn().map_err(transaction_error)?;

        let mut expired: Vec<Vec<u8>> = Vec::new();
        for entry in self.db.iter(&wtxn).map_err(transaction_error)? {
            let (key, value) = entry.map_err(transaction_error)?;
            if decode_entry(value).map_or(true, |(expires_at, _)| expires_at <= now) {
                expired.push(key.to_vec());
            }
        }

        let mut purged = 0u64;
        for key in &expired {
            if self.db.delete(&mut wtxn, key).map_err(transaction_error)? {
                purged += 1;
            }
        }
        wtxn.commit().map_err(transaction_error)?;

        self.expirations.fetch_add(purged, Ordering::Relaxed);
        Ok(purged)
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(transaction_error)?;
        let Some(bytes) = self.db.get(&rtxn, key.as_bytes()).map_err(transaction_error)? else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        let (expires_at, payload) = decode_entry(bytes).ok_or_else(|| {
            LmdbCacheError::CorruptEntry {
                key: key.to_string(),
            }
        })?;

        if expires_at <= now_millis() {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        Ok(Some(payload.to_vec()))
    }

    fn write(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), LmdbCacheError> {
        let entry = encode_entry(value, ttl);
        let mut wtxn = self.env.write_txn().map_err(transaction_error)?;
        self.db
            .put(&mut wtxn, key.as_bytes(), &entry)
            .map_err(transaction_error)?;
        wtxn.commit().map_err(transaction_error)
    }

    fn remove(&self, keys: &[String]) -> Result<u64, LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(transaction_error)?;
        let mut deleted = 0u64;
        for key in keys {
            if self
                .db
                .delete(&mut wtxn, key.as_bytes())
                .map_err(transaction_error)?
            {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(transaction_error)?;
        Ok(deleted)
    }

    fn remove_prefix(&self, prefix: &str) -> Result<u64, LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(transaction_error)?;

        let matching: Vec<Vec<u8>> = self
            .db
            .prefix_iter(&wtxn, prefix.as_bytes())
            .map_err(transaction_error)?
            .map(|entry| entry.map(|(key, _)| key.to_vec()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(transaction_error)?;

        let mut deleted = 0u64;
        for key in &matching {
            if self.db.delete(&mut wtxn, key).map_err(transaction_error)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(transaction_error)?;
        Ok(deleted)
    }

    fn snapshot(&self) -> Result<CacheStats, LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(transaction_error)?;
        let mut entry_count = 0u64;
        let mut memory_bytes = 0u64;
        for (key, value) in self.db.iter(&rtxn).map_err(transaction_error)?.flatten() {
            entry_count += 1;
            memory_bytes += (key.len() + value.len()) as u64;
        }

        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count,
            memory_bytes,
            expirations: self.expirations.load(Ordering::Relaxed),
        })
    }
}

#[async_trait]
impl CacheStore for LmdbCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.read(key)?)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        Ok(self.write(key, &value, ttl)?)
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        Ok(self.remove(keys)?)
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        Ok(self.remove_prefix(prefix)?)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(self.snapshot()?)
    }
}
