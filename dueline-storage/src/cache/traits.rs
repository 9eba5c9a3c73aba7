//! Cache store contract and statistics.

use std::time::Duration;

use async_trait::async_trait;
use dueline_core::CacheError;

/// Byte-oriented key/value store with per-entry TTL.
///
/// Implementations must be safe for concurrent use. Callers treat every
/// error as "cache unavailable": a failed `get` is a miss and a failed
/// write is dropped, so a backend may fail every call without breaking
/// reads or writes of the service above it.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Live value for `key`, `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value` under `key` for `ttl`, replacing any previous entry.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Remove exact keys. Returns how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError>;

    /// Remove every key starting with `prefix`. Returns how many existed.
    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, CacheError>;

    async fn stats(&self) -> Result<CacheStats, CacheError>;
}

/// Backend-level cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses, expired entries included.
    pub misses: u64,
    /// Number of entries currently stored, expired ones not yet swept included.
    pub entry_count: u64,
    /// Approximate size of stored keys and values in bytes.
    pub memory_bytes: u64,
    /// Number of entries dropped because their TTL elapsed.
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
