//! Prometheus Metrics Definitions
//!
//! Defines the dueline metrics with their labels and exposes them at
//! `GET /metrics`. Metrics live in a dedicated registry so registration
//! never collides with other collectors in the process.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use dueline_storage::{CoalescingStats, FetchSource, QueryKind};
use once_cell::sync::Lazy;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::error::{ApiError, ApiResult};
use crate::service::TodoService;

/// HTTP request latency buckets (seconds)
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Store operation latency buckets (seconds)
const STORE_LATENCY_BUCKETS: &[f64] =
    &[0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0];

/// Global metrics instance - initialized on first use
pub static METRICS: Lazy<ApiResult<DuelineMetrics>> = Lazy::new(DuelineMetrics::new);

/// The registered metrics, or `None` if registration failed.
pub fn metrics() -> Option<&'static DuelineMetrics> {
    METRICS.as_ref().ok()
}

/// Container for all dueline metrics.
#[derive(Clone)]
pub struct DuelineMetrics {
    registry: Registry,

    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Query cache reads - labels: query, source (cache/loader/coalesced)
    pub cache_fetches_total: CounterVec,

    /// Post-write invalidations - labels: outcome (ok/failed)
    pub cache_invalidations_total: CounterVec,

    /// Coalescing cache counters, refreshed on scrape - labels: event
    pub read_cache_events: GaugeVec,

    /// Loads currently in flight
    pub read_cache_in_flight: IntGauge,

    /// Todo store operations - labels: operation, status
    pub store_operations_total: CounterVec,

    /// Todo store latency - labels: operation
    pub store_operation_duration_seconds: HistogramVec,
}

fn registered<C>(registry: &Registry, name: &str, collector: C) -> ApiResult<C>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|e| ApiError::internal_error(format!("Failed to register {}: {}", name, e)))?;
    Ok(collector)
}

fn build_error(name: &str, e: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to create {}: {}", name, e))
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> ApiResult<CounterVec> {
    let counter = CounterVec::new(Opts::new(name, help), labels).map_err(|e| build_error(name, e))?;
    registered(registry, name, counter)
}

fn histogram_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
    buckets: &[f64],
) -> ApiResult<HistogramVec> {
    let histogram = HistogramVec::new(HistogramOpts::new(name, help).buckets(buckets.to_vec()), labels)
        .map_err(|e| build_error(name, e))?;
    registered(registry, name, histogram)
}

impl DuelineMetrics {
    /// Create and register all metrics.
    pub fn new() -> ApiResult<Self> {
        let registry = Registry::new();

        let read_cache_events = GaugeVec::new(
            Opts::new(
                "dueline_read_cache_events",
                "Coalescing cache counters since process start",
            ),
            &["event"],
        )
        .map_err(|e| build_error("dueline_read_cache_events", e))?;
        let read_cache_in_flight = IntGauge::new(
            "dueline_read_cache_in_flight",
            "Cache loads currently running",
        )
        .map_err(|e| build_error("dueline_read_cache_in_flight", e))?;

        Ok(Self {
            http_requests_total: counter_vec(
                &registry,
                "dueline_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"],
            )?,
            http_request_duration_seconds: histogram_vec(
                &registry,
                "dueline_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS,
            )?,
            cache_fetches_total: counter_vec(
                &registry,
                "dueline_cache_fetches_total",
                "Query cache reads by answer source",
                &["query", "source"],
            )?,
            cache_invalidations_total: counter_vec(
                &registry,
                "dueline_cache_invalidations_total",
                "Owner cache invalidations after writes",
                &["outcome"],
            )?,
            read_cache_events: registered(&registry, "dueline_read_cache_events", read_cache_events)?,
            read_cache_in_flight: registered(
                &registry,
                "dueline_read_cache_in_flight",
                read_cache_in_flight,
            )?,
            store_operations_total: counter_vec(
                &registry,
                "dueline_store_operations_total",
                "Todo store operations",
                &["operation", "status"],
            )?,
            store_operation_duration_seconds: histogram_vec(
                &registry,
                "dueline_store_operation_duration_seconds",
                "Todo store operation duration in seconds",
                &["operation"],
                STORE_LATENCY_BUCKETS,
            )?,
            registry,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, status_str.as_str()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    pub fn record_cache_fetch(&self, kind: QueryKind, source: FetchSource) {
        self.cache_fetches_total
            .with_label_values(&[kind.as_str(), source.as_str()])
            .inc();
    }

    pub fn record_invalidation(&self, success: bool) {
        let outcome = if success { "ok" } else { "failed" };
        self.cache_invalidations_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Record a todo store operation.
    pub fn record_store_operation(&self, operation: &str, success: bool, duration_secs: f64) {
        let status = if success { "success" } else { "error" };
        self.store_operations_total
            .with_label_values(&[operation, status])
            .inc();
        self.store_operation_duration_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    /// Copy a coalescing cache snapshot into the scrape gauges.
    pub fn observe_read_cache(&self, stats: &CoalescingStats, in_flight: usize) {
        for (event, value) in [
            ("hits", stats.hits),
            ("misses", stats.misses),
            ("loads", stats.loads),
            ("coalesced", stats.coalesced),
            ("loader_failures", stats.loader_failures),
            ("backend_errors", stats.backend_errors),
            ("detached_loads", stats.detached_loads),
        ] {
            self.read_cache_events
                .with_label_values(&[event])
                .set(value as f64);
        }
        self.read_cache_in_flight
            .set(i64::try_from(in_flight).unwrap_or(i64::MAX));
    }

    /// Encode every registered metric in the Prometheus text format.
    pub fn encode(&self) -> ApiResult<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| ApiError::internal_error(format!("Failed to encode metrics: {}", e)))?;
        Ok(buffer)
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler(State(service): State<Arc<TodoService>>) -> impl IntoResponse {
    let encoded = match METRICS.as_ref() {
        Ok(metrics) => {
            metrics.observe_read_cache(&service.cache_stats(), service.in_flight_loads());
            metrics.encode()
        }
        Err(e) => Err(e.clone()),
    };

    match encoded {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.message.into_bytes(),
            )
        }
    }
}
