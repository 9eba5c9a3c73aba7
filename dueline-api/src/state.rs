//! Shared application state for Axum routers.
//!
//! Assembles the todo store, the cache backend and the [`TodoService`]
//! from [`ApiConfig`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use dueline_storage::{
    CacheStore, DisabledCacheStore, InMemoryCacheStore, InMemoryTodoStore, LmdbCacheStore,
    TodoStore,
};
use tracing::{debug, info, warn};

use crate::config::{ApiConfig, CacheBackend, CacheSettings, StoreBackend};
use crate::db::{DbConfig, PgTodoStore};
use crate::error::{ApiError, ApiResult};
use crate::service::TodoService;

/// How often expired entries are swept from local cache backends.
pub const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TodoService>,
    /// Present when todos live in PostgreSQL; used by the readiness probe.
    pub db: Option<PgTodoStore>,
    pub start_time: Instant,
}

crate::impl_from_ref!(Arc<TodoService>, service);
crate::impl_from_ref!(Option<PgTodoStore>, db);
crate::impl_from_ref!(Instant, start_time);

impl AppState {
    pub fn new(service: Arc<TodoService>, db: Option<PgTodoStore>) -> Self {
        Self {
            service,
            db,
            start_time: Instant::now(),
        }
    }

    /// State over a bare store and cache, as used by tests and embedders.
    pub fn with_stores(
        store: Arc<dyn TodoStore>,
        cache_store: Arc<dyn CacheStore>,
        settings: &CacheSettings,
    ) -> Self {
        let service = TodoService::with_cache_store(store, cache_store, settings.cache_config());
        Self::new(Arc::new(service), None)
    }

    /// Build every component named by `config`.
    ///
    /// Must run inside a Tokio runtime: local cache backends get a
    /// background expiry sweeper.
    pub async fn from_config(config: &ApiConfig) -> ApiResult<Self> {
        let (store, db) = build_todo_store(config.store)?;
        let cache_store = build_cache_store(&config.cache).await?;
        let service = TodoService::with_cache_store(store, cache_store, config.cache.cache_config());

        info!(
            store = ?config.store,
            cache = ?config.cache.backend,
            ttl_ms = config.cache.ttl.as_millis() as u64,
            "Todo service ready"
        );
        Ok(Self::new(Arc::new(service), db))
    }
}

/// Pick the todo store. PostgreSQL settings come from `DbConfig::from_env`.
pub fn build_todo_store(
    backend: StoreBackend,
) -> ApiResult<(Arc<dyn TodoStore>, Option<PgTodoStore>)> {
    match backend {
        StoreBackend::Postgres => {
            let pg = PgTodoStore::from_config(&DbConfig::from_env())?;
            let store: Arc<dyn TodoStore> = Arc::new(pg.clone());
            Ok((store, Some(pg)))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory todo store, data is lost on restart");
            let store: Arc<dyn TodoStore> = Arc::new(InMemoryTodoStore::new());
            Ok((store, None))
        }
    }
}

/// Open the configured cache backend.
///
/// An unreachable Redis does not stop startup: the service runs uncached
/// and logs the failure. LMDB open failures are fatal.
pub async fn build_cache_store(settings: &CacheSettings) -> ApiResult<Arc<dyn CacheStore>> {
    match settings.backend {
        CacheBackend::Memory => {
            let store = Arc::new(InMemoryCacheStore::new());
            let sweeper = Arc::clone(&store);
            spawn_expiry_sweeper("memory", move || {
                sweeper.purge_expired().map_err(|e| e.to_string())
            });
            let store: Arc<dyn CacheStore> = store;
            Ok(store)
        }
        CacheBackend::Lmdb => {
            let store = Arc::new(
                LmdbCacheStore::new(&settings.lmdb_path, settings.lmdb_size_mb).map_err(|e| {
                    ApiError::internal_error(format!(
                        "Failed to open LMDB cache at {}: {}",
                        settings.lmdb_path.display(),
                        e
                    ))
                })?,
            );
            let sweeper = Arc::clone(&store);
            spawn_expiry_sweeper("lmdb", move || {
                sweeper.purge_expired().map_err(|e| e.to_string())
            });
            let store: Arc<dyn CacheStore> = store;
            Ok(store)
        }
        CacheBackend::Redis => build_redis_store(settings).await,
        CacheBackend::Disabled => {
            info!("Query cache disabled");
            Ok(Arc::new(DisabledCacheStore))
        }
    }
}

#[cfg(feature = "redis")]
async fn build_redis_store(settings: &CacheSettings) -> ApiResult<Arc<dyn CacheStore>> {
    use dueline_storage::RedisCacheStore;

    let url = settings
        .redis_url
        .as_deref()
        .ok_or_else(|| ApiError::invalid_input("REDIS_URL is required for the redis cache"))?;

    match RedisCacheStore::connect(url, settings.redis_timeout).await {
        Ok(store) => {
            let store: Arc<dyn CacheStore> = Arc::new(store);
            Ok(store)
        }
        Err(e) => {
            warn!(error = %e, "Redis unreachable, running without the query cache");
            Ok(Arc::new(DisabledCacheStore))
        }
    }
}

#[cfg(not(feature = "redis"))]
async fn build_redis_store(_settings: &CacheSettings) -> ApiResult<Arc<dyn CacheStore>> {
    Err(ApiError::invalid_input(
        "redis cache backend requested but dueline-api was built without the redis feature",
    ))
}

/// Periodically drop expired entries from a local backend.
fn spawn_expiry_sweeper<F>(backend: &'static str, purge: F)
where
    F: Fn() -> Result<u64, String> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(EXPIRY_SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            match purge() {
                Ok(0) => {}
                Ok(removed) => debug!(backend, removed, "Purged expired cache entries"),
                Err(e) => warn!(backend, error = %e, "Cache expiry sweep failed"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use dueline_core::{NewTodo, OwnerId};

    #[tokio::test]
    async fn test_memory_store_and_cache_from_config() -> ApiResult<()> {
        let config = ApiConfig {
            store: StoreBackend::Memory,
            ..ApiConfig::default()
        };
        let state = AppState::from_config(&config).await?;
        assert!(state.db.is_none());

        let owner = OwnerId::new(3);
        state.service.create(owner, NewTodo::new("wire")).await?;
        assert_eq!(state.service.list(owner).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_lmdb_cache_from_settings() -> ApiResult<()> {
        let dir = tempfile::tempdir().map_err(|e| ApiError::internal_error(e.to_string()))?;
        let settings = CacheSettings {
            backend: CacheBackend::Lmdb,
            lmdb_path: dir.path().join("cache"),
            lmdb_size_mb: 16,
            ..CacheSettings::default()
        };
        let store = build_cache_store(&settings).await?;
        store
            .set("todo:1:list", b"[]".to_vec(), Duration::from_secs(5))
            .await
            .map_err(|e| ApiError::internal_error(e.to_string()))?;
        assert!(dir.path().join("cache").exists());
        Ok(())
    }

    #[cfg(not(feature = "redis"))]
    #[tokio::test]
    async fn test_redis_backend_needs_feature() {
        let settings = CacheSettings {
            backend: CacheBackend::Redis,
            redis_url: Some("redis://localhost:6379".to_string()),
            ..CacheSettings::default()
        };
        assert!(build_cache_store(&settings).await.is_err());
    }

    #[tokio::test]
    async fn test_disabled_cache_never_stores() -> ApiResult<()> {
        let settings = CacheSettings {
            backend: CacheBackend::Disabled,
            ..CacheSettings::default()
        };
        let store = build_cache_store(&settings).await?;
        store
            .set("k", b"v".to_vec(), Duration::from_secs(5))
            .await
            .map_err(|e| ApiError::internal_error(e.to_string()))?;
        let cached = store
            .get("k")
            .await
            .map_err(|e| ApiError::internal_error(e.to_string()))?;
        assert!(cached.is_none());
        Ok(())
    }
}
