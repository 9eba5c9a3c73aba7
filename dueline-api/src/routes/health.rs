//! Health Check Endpoints
//!
//! - /health/ping - Simple liveness check
//! - /health/ready - Store connectivity check
//!
//! No owner header required for health endpoints.

use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use crate::db::PgTodoStore;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub store: ComponentHealth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /health/ping - Simple pong response
pub async fn ping() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

/// GET /health/ready - 503 while PostgreSQL is unreachable.
///
/// The in-memory store is always ready.
pub async fn readiness(
    State(db): State<Option<PgTodoStore>>,
    State(start_time): State<Instant>,
) -> impl IntoResponse {
    let store = match db {
        Some(db) => {
            let started = Instant::now();
            match db.ping().await {
                Ok(()) => ComponentHealth {
                    status: HealthStatus::Healthy,
                    latency_ms: Some(started.elapsed().as_millis() as u64),
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Readiness check failed");
                    ComponentHealth {
                        status: HealthStatus::Unhealthy,
                        latency_ms: None,
                        error: Some(e.to_string()),
                    }
                }
            }
        }
        None => ComponentHealth {
            status: HealthStatus::Healthy,
            latency_ms: None,
            error: None,
        },
    };

    let status = store.status;
    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: start_time.elapsed().as_secs(),
        store,
    };
    let code = match status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(response))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/ping", get(ping))
        .route("/ready", get(readiness))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status_serializes_lowercase() -> Result<(), serde_json::Error> {
        assert_eq!(serde_json::to_string(&HealthStatus::Unhealthy)?, "\"unhealthy\"");
        Ok(())
    }

    #[test]
    fn test_component_health_skips_empty_fields() -> Result<(), serde_json::Error> {
        let json = serde_json::to_value(ComponentHealth {
            status: HealthStatus::Healthy,
            latency_ms: None,
            error: None,
        })?;
        assert_eq!(json, serde_json::json!({ "status": "healthy" }));
        Ok(())
    }
}
