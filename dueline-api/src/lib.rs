//! Dueline API - Cached Todo Service over HTTP
//!
//! The `TodoService` that puts a coalescing read-through cache in front of
//! a todo store, the PostgreSQL store, and a thin Axum REST surface with
//! structured logging and Prometheus metrics.

pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod macros;
pub mod routes;
pub mod service;
pub mod state;
pub mod telemetry;
pub mod types;

// Re-export commonly used types
pub use config::{ApiConfig, CacheBackend, CacheSettings, LogFormat, StoreBackend};
pub use db::{DbConfig, PgTodoStore};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use extractors::{OwnerIdentity, PathTodoId, OWNER_HEADER};
pub use routes::create_api_router;
pub use service::TodoService;
pub use state::AppState;
pub use types::*;
