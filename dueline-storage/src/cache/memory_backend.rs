//! Process-local cache store.
//!
//! Entries live in an ordered map so prefix deletion is a range scan rather
//! than a full walk. Expiry is lazy: an expired entry reads as a miss and is
//! dropped on that read, or by [`InMemoryCacheStore::purge_expired`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dueline_core::CacheError;

use super::traits::{CacheStats, CacheStore};

#[derive(Debug, Clone)]
struct MemoryEntry {
    bytes: Vec<u8>,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    fn footprint(key: &str, bytes: &[u8]) -> u64 {
        (key.len() + bytes.len()) as u64
    }
}

/// In-memory [`CacheStore`] with per-entry TTL.
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: RwLock<BTreeMap<String, MemoryEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_entries(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, MemoryEntry>>, CacheError> {
        self.entries.read().map_err(|_| CacheError::LockPoisoned)
    }

    fn write_entries(
        &self,
    ) -> Result<RwLockWriteGuard<'_, BTreeMap<String, MemoryEntry>>, CacheError> {
        self.entries.write().map_err(|_| CacheError::LockPoisoned)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<u64, CacheError> {
        let now = Instant::now();
        let mut entries = self.write_entries()?;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let purged = (before - entries.len()) as u64;
        self.expirations.fetch_add(purged, Ordering::Relaxed);
        Ok(purged)
    }

    /// Number of stored entries, expired ones not yet dropped included.
    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys currently stored, in order.
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn drop_if_expired(&self, key: &str) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.write_entries()?;
        // Another writer may have replaced the entry since it was read.
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let expired = {
            let entries = self.read_entries()?;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(Instant::now()) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(entry.bytes.clone()));
                }
                Some(_) => true,
                None => false,
            }
        };

        self.misses.fetch_add(1, Ordering::Relaxed);
        if expired {
            self.drop_if_expired(key)?;
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        // A TTL too large to represent means the entry never expires in practice.
        let expires_at = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365));

        let mut entries = self.write_entries()?;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                bytes: value,
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        let mut entries = self.write_entries()?;
        let removed = keys
            .iter()
            .filter(|key| entries.remove(key.as_str()).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let mut entries = self.write_entries()?;
        let matching: Vec<String> = entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &matching {
            entries.remove(key);
        }
        Ok(matching.len() as u64)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let entries = self.read_entries()?;
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: entries.len() as u64,
            memory_bytes: entries
                .iter()
                .map(|(key, entry)| MemoryEntry::footprint(key, &entry.bytes))
                .sum(),
            expirations: self.expirations.load(Ordering::Relaxed),
        })
    }
}
