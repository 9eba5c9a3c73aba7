//! Axum Middleware for HTTP Metrics
//!
//! Records a Prometheus sample for every request. Request spans and
//! completion logs come from `tower_http::trace::TraceLayer`.

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use super::metrics::metrics;

/// Label used for requests that matched no route.
const UNMATCHED_ROUTE: &str = "unmatched";

/// Route template for metrics labels.
///
/// Uses the matched route (`/todos/:id`) rather than the raw path so ids
/// never become label values.
fn route_label(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string())
}

/// Observability middleware for Axum.
pub async fn observability_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let route = route_label(&request);

    let response = next.run(request).await;

    let status = response.status();
    if let Some(metrics) = metrics() {
        metrics.record_http_request(
            method.as_str(),
            &route,
            status.as_u16(),
            start.elapsed().as_secs_f64(),
        );
    }
    if status.is_server_error() {
        tracing::warn!(method = %method, route = %route, status = status.as_u16(), "Request failed");
    }

    response
}
