//! Dueline API Server Entry Point
//!
//! Reads configuration from the environment, wires the store and cache,
//! and starts the Axum HTTP server.

use dueline_api::telemetry::{init_tracing, TelemetryConfig};
use dueline_api::{create_api_router, ApiConfig, ApiError, ApiResult, AppState};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let config = ApiConfig::from_env()?;

    let telemetry_config = TelemetryConfig::default().with_log_format(config.log_format);
    init_tracing(&telemetry_config)?;

    let state = AppState::from_config(&config).await?;
    let app = create_api_router(state, config.request_timeout);

    let addr = config.socket_addr()?;
    tracing::info!(
        %addr,
        service = %telemetry_config.service_name,
        version = %telemetry_config.service_version,
        "Starting dueline API server"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
