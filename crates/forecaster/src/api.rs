//! HTTP API for scoring, training and Prometheus metrics

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use forecaster_lib::{models::NodeId, Orchestrator};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

/// Default history window of manual training requests
const DEFAULT_TRAIN_HISTORY_HOURS: u32 = 24;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

/// Query parameters of a manual training request
#[derive(Debug, Deserialize)]
pub struct TrainParams {
    pub node: String,
    #[serde(default = "default_history_hours")]
    pub history_hours: u32,
}

fn default_history_hours() -> u32 {
    DEFAULT_TRAIN_HISTORY_HOURS
}

/// Bare `{node: score}` map for load balancer clients
async fn predict(
    State(state): State<Arc<AppState>>,
    Json(nodes): Json<Vec<NodeId>>,
) -> impl IntoResponse {
    let scores = state.orchestrator.predict_scores(&nodes).await;
    info!(scores = ?scores, "Prediction results");
    Json(scores)
}

/// Full diagnostics per node
async fn predict_detailed(
    State(state): State<Arc<AppState>>,
    Json(nodes): Json<Vec<NodeId>>,
) -> impl IntoResponse {
    Json(state.orchestrator.predict_detailed(&nodes).await)
}

async fn train(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TrainParams>,
) -> impl IntoResponse {
    let outcome = state
        .orchestrator
        .train_node(&params.node, params.history_hours)
        .await;
    Json(outcome)
}

/// Service health; degraded still answers 200 since scoring stays available
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.orchestrator.service_health().await)
}

async fn models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.orchestrator.model_summaries())
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/predict", post(predict))
        .route("/predict/detailed", post(predict_detailed))
        .route("/train", post(train))
        .route("/health", get(health))
        .route("/models", get(models))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server, stopping when `shutdown` fires
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
