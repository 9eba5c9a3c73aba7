//! Cache store used when caching is turned off.

use std::time::Duration;

use async_trait::async_trait;
use dueline_core::CacheError;

use super::traits::{CacheStats, CacheStore};

/// Every read misses and every write is dropped.
///
/// Loads are still coalesced by the `CoalescingReadCache` in front of it.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledCacheStore;

#[async_trait]
impl CacheStore for DisabledCacheStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }

    async fn delete(&self, _keys: &[String]) -> Result<u64, CacheError> {
        Ok(0)
    }

    async fn delete_by_prefix(&self, _prefix: &str) -> Result<u64, CacheError> {
        Ok(0)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(CacheStats::default())
    }
}
