//! REST API Routes Module
//!
//! - `/todos` CRUD, search and overdue routes
//! - `/health` probes
//! - `/metrics` Prometheus scrape endpoint

pub mod health;
pub mod todos;

use std::time::Duration;

use axum::{
    http::Uri,
    middleware::from_fn,
    routing::get,
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::error::ApiError;
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

async fn route_not_found(uri: Uri) -> ApiError {
    ApiError::route_not_found(uri.path())
}

/// Assemble the full router with tracing, timeout and metrics layers.
pub fn create_api_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .nest("/todos", todos::create_router())
        .nest("/health", health::create_router())
        .route("/metrics", get(metrics_handler))
        .fallback(route_not_found)
        .layer(from_fn(observability_middleware))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
