//! Coalescing read-through cache over pluggable key/value stores.
//!
//! [`CoalescingReadCache`] sits in front of a [`CacheStore`] and guarantees
//! at most one loader per key in flight. Keys are built with [`CacheKey`],
//! which always leads with the owner so one owner's entries can be dropped
//! by prefix.
//!
//! # Backends
//!
//! - [`InMemoryCacheStore`]: process-local, ordered map
//! - [`LmdbCacheStore`]: memory-mapped LMDB file via heed
//! - `RedisCacheStore`: shared Redis (feature `redis`)
//! - [`DisabledCacheStore`]: always misses
//!
//! A store failure never fails a read: the cache degrades to the loader.

pub mod coalesce;
pub mod disabled;
pub mod fetched;
pub mod key;
pub mod lmdb_backend;
pub mod memory_backend;
#[cfg(feature = "redis")]
pub mod redis_backend;
pub mod traits;

pub use coalesce::{CacheConfig, CoalescingReadCache, CoalescingStats, DEFAULT_ENTRY_TTL};
pub use disabled::DisabledCacheStore;
pub use fetched::{FetchSource, Fetched};
pub use key::{normalize_query, CacheKey, QueryKind, RESOURCE_KIND};
pub use lmdb_backend::{LmdbCacheError, LmdbCacheStore};
pub use memory_backend::InMemoryCacheStore;
#[cfg(feature = "redis")]
pub use redis_backend::{RedisCacheStore, DEFAULT_COMMAND_TIMEOUT};
pub use traits::{CacheStats, CacheStore};
