//! Dueline Storage - Todo Store and Query Cache
//!
//! The `TodoStore` contract every persistence backend implements, an
//! in-memory store, and the `cache` module with the coalescing read-through
//! cache used for list, search and overdue queries.

pub mod cache;
pub mod todo_store;

pub use todo_store::{InMemoryTodoStore, TodoStore};

// Re-export cache types for API integration
pub use cache::{
    normalize_query, CacheConfig, CacheKey, CacheStats, CacheStore, CoalescingReadCache,
    CoalescingStats, DisabledCacheStore, FetchSource, Fetched, InMemoryCacheStore,
    LmdbCacheError, LmdbCacheStore, QueryKind,
};
#[cfg(feature = "redis")]
pub use cache::RedisCacheStore;
