//! Health Forecaster - predictive health scoring for RPC load balancing
//!
//! Serves per-node health scores built from Prometheus latency and error
//! rates, latency forecasts and anomaly detection.

use anyhow::{Context, Result};
use forecaster_lib::{Orchestrator, PrometheusClient, SERVICE_VERSION};
use health_forecaster::{api, config::ServiceConfig};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = SERVICE_VERSION, "Starting health-forecaster");

    let config = ServiceConfig::load()?;
    let settings = config.to_settings()?;
    info!(
        instance = %config.instance_name,
        prometheus_url = %config.prometheus_url,
        api_port = config.api_port,
        "Forecaster configured"
    );

    let source = Arc::new(
        PrometheusClient::new(&config.prometheus_url).context("Invalid Prometheus URL")?,
    );
    let (orchestrator, retrain_worker) = Orchestrator::new(source, settings);
    let orchestrator = Arc::new(orchestrator);

    let logger = orchestrator.logger().clone();
    let connected = orchestrator.source_available().await;
    logger.log_startup(SERVICE_VERSION, &config.prometheus_url, connected);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let worker_handle = tokio::spawn(retrain_worker.run(shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState::new(Arc::clone(&orchestrator)));
    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            match result {
                Ok(Ok(())) => logger.log_shutdown("API server stopped"),
                Ok(Err(e)) => error!(error = %e, "API server failed"),
                Err(e) => error!(error = %e, "API server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(());
    if let Err(e) = worker_handle.await {
        error!(error = %e, "Retrain worker task failed");
    }

    info!("Shutting down");
    Ok(())
}
