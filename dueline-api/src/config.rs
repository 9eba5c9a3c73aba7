//! API Configuration Module
//!
//! Server, store, cache and logging settings loaded from environment
//! variables with defaults suitable for local development. Parsing goes
//! through [`ApiConfig::from_lookup`] so tests never touch the process
//! environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use dueline_core::{parse_duration, ConfigError};
use dueline_storage::cache::DEFAULT_ENTRY_TTL;
use dueline_storage::CacheConfig;

// ============================================================================
// BACKEND SELECTION
// ============================================================================

/// Where todos are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// Process-local store; data is lost on restart.
    Memory,
}

/// Which [`dueline_storage::CacheStore`] backs the query cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Memory,
    Lmdb,
    Redis,
    Disabled,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "pg" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            _ => Err("expected postgres or memory".to_string()),
        }
    }
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "lmdb" => Ok(Self::Lmdb),
            "redis" => Ok(Self::Redis),
            "disabled" | "off" | "none" => Ok(Self::Disabled),
            _ => Err("expected memory, lmdb, redis or disabled".to_string()),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            _ => Err("expected json or pretty".to_string()),
        }
    }
}

// ============================================================================
// CACHE SETTINGS
// ============================================================================

/// Query cache settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    /// Entry TTL. Zero keeps coalescing but never writes entries.
    pub ttl: Duration,
    /// Directory of the LMDB environment.
    pub lmdb_path: PathBuf,
    /// LMDB map size in megabytes.
    pub lmdb_size_mb: usize,
    /// `redis://` or `rediss://` URL, required for the Redis backend.
    pub redis_url: Option<String>,
    /// Per-command timeout for Redis calls.
    pub redis_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            ttl: DEFAULT_ENTRY_TTL,
            lmdb_path: PathBuf::from("./data/cache"),
            lmdb_size_mb: 256,
            redis_url: None,
            redis_timeout: Duration::from_millis(500),
        }
    }
}

impl CacheSettings {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new().with_ttl(self.ttl)
    }
}

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// Top-level configuration of the API process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub bind_host: String,
    pub port: u16,
    /// Upper bound on a single request, including store latency.
    pub request_timeout: Duration,
    pub store: StoreBackend,
    pub cache: CacheSettings,
    pub log_format: LogFormat,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(10),
            store: StoreBackend::Postgres,
            cache: CacheSettings::default(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `DUELINE_API_BIND`: Bind host (default: 0.0.0.0)
    /// - `PORT` / `DUELINE_API_PORT`: Listen port (default: 8080)
    /// - `DUELINE_HTTP_TIMEOUT`: Per-request timeout (default: 10s)
    /// - `DUELINE_STORE`: `postgres` or `memory` (default: postgres)
    /// - `DUELINE_CACHE_BACKEND`: `memory`, `lmdb`, `redis` or `disabled` (default: memory)
    /// - `DUELINE_CACHE_TTL`: `60`, `60s`, `5m`, `250ms` (default: 60s)
    /// - `DUELINE_CACHE_LMDB_PATH`: LMDB directory (default: ./data/cache)
    /// - `DUELINE_CACHE_LMDB_SIZE_MB`: LMDB map size (default: 256)
    /// - `REDIS_URL`: Redis URL, required when the backend is `redis`
    /// - `DUELINE_REDIS_TIMEOUT`: Redis command timeout (default: 500ms)
    /// - `DUELINE_LOG_FORMAT`: `json` or `pretty` (default: pretty)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let bind_host = var("DUELINE_API_BIND").unwrap_or(defaults.bind_host);

        let port = match var("PORT").or_else(|| var("DUELINE_API_PORT")) {
            Some(raw) => parse_value("PORT", &raw)?,
            None => defaults.port,
        };

        let request_timeout = match var("DUELINE_HTTP_TIMEOUT") {
            Some(raw) => parse_duration("DUELINE_HTTP_TIMEOUT", &raw)?,
            None => defaults.request_timeout,
        };

        let store = match var("DUELINE_STORE") {
            Some(raw) => parse_value("DUELINE_STORE", &raw)?,
            None => defaults.store,
        };

        let cache = Self::cache_from_lookup(&var)?;

        let log_format = match var("DUELINE_LOG_FORMAT") {
            Some(raw) => parse_value("DUELINE_LOG_FORMAT", &raw)?,
            None => defaults.log_format,
        };

        Ok(Self {
            bind_host,
            port,
            request_timeout,
            store,
            cache,
            log_format,
        })
    }

    fn cache_from_lookup<F>(var: &F) -> Result<CacheSettings, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = CacheSettings::default();

        let backend = match var("DUELINE_CACHE_BACKEND") {
            Some(raw) => parse_value("DUELINE_CACHE_BACKEND", &raw)?,
            None => defaults.backend,
        };

        let ttl = match var("DUELINE_CACHE_TTL") {
            Some(raw) => parse_duration("DUELINE_CACHE_TTL", &raw)?,
            None => defaults.ttl,
        };

        let lmdb_path = var("DUELINE_CACHE_LMDB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.lmdb_path);

        let lmdb_size_mb = match var("DUELINE_CACHE_LMDB_SIZE_MB") {
            Some(raw) => parse_value("DUELINE_CACHE_LMDB_SIZE_MB", &raw)?,
            None => defaults.lmdb_size_mb,
        };

        let redis_url = var("REDIS_URL").map(|url| url.trim().to_string());
        if let Some(url) = &redis_url {
            check_redis_url(url)?;
        }

        let redis_timeout = match var("DUELINE_REDIS_TIMEOUT") {
            Some(raw) => parse_duration("DUELINE_REDIS_TIMEOUT", &raw)?,
            None => defaults.redis_timeout,
        };

        if backend == CacheBackend::Redis {
            if redis_url.is_none() {
                return Err(ConfigError::MissingRequired {
                    field: "REDIS_URL".to_string(),
                });
            }
            if !cfg!(feature = "redis") {
                return Err(ConfigError::InvalidValue {
                    field: "DUELINE_CACHE_BACKEND".to_string(),
                    value: "redis".to_string(),
                    reason: "this build does not include the redis feature".to_string(),
                });
            }
        }

        Ok(CacheSettings {
            backend,
            ttl,
            lmdb_path,
            lmdb_size_mb,
            redis_url,
            redis_timeout,
        })
    }

    /// Socket address to bind.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.bind_host, self.port);
        addr.parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue {
                field: "DUELINE_API_BIND".to_string(),
                value: addr.clone(),
                reason: e.to_string(),
            })
    }
}

fn parse_value<T>(field: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue {
            field: field.to_string(),
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

fn check_redis_url(url: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidValue {
        field: "REDIS_URL".to_string(),
        value: url.to_string(),
        reason: reason.to_string(),
    };

    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| invalid("expected redis://host:port"))?;
    if scheme != "redis" && scheme != "rediss" {
        return Err(invalid("scheme must be redis or rediss"));
    }
    let authority = rest.split('/').next().unwrap_or_default();
    let host = authority.rsplit('@').next().unwrap_or_default();
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    Ok(())
}
