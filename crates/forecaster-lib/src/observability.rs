//! Observability infrastructure for the health forecaster
//!
//! Provides:
//! - Prometheus metrics (scoring latency, scoring paths, anomalies, retraining)
//! - Structured JSON logging with tracing

use crate::models::{ScoringPath, TrainOutcome};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Buckets for a whole scoring request (in seconds)
const SCORING_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Buckets for one model fit (in seconds)
const TRAINING_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ForecasterMetricsInner> = OnceLock::new();

struct ForecasterMetricsInner {
    scoring_latency_seconds: Histogram,
    nodes_scored: IntCounterVec,
    anomalies_detected: IntCounter,
    source_unavailable: IntCounter,
    retrain_queued: IntCounter,
    retrain_rejected: IntCounter,
    trainings: IntCounterVec,
    training_duration_seconds: Histogram,
    models_loaded: IntGauge,
}

impl ForecasterMetricsInner {
    fn new() -> Self {
        Self {
            scoring_latency_seconds: register_histogram!(
                "health_forecaster_scoring_latency_seconds",
                "Time spent scoring one batch of nodes",
                SCORING_BUCKETS.to_vec()
            )
            .expect("Failed to register scoring_latency_seconds"),

            nodes_scored: register_int_counter_vec!(
                "health_forecaster_nodes_scored_total",
                "Nodes scored, by scoring path",
                &["path"]
            )
            .expect("Failed to register nodes_scored"),

            anomalies_detected: register_int_counter!(
                "health_forecaster_anomalies_detected_total",
                "Observations classified as anomalous"
            )
            .expect("Failed to register anomalies_detected"),

            source_unavailable: register_int_counter!(
                "health_forecaster_source_unavailable_total",
                "Scoring requests answered with neutral scores"
            )
            .expect("Failed to register source_unavailable"),

            retrain_queued: register_int_counter!(
                "health_forecaster_retrain_queued_total",
                "Nodes queued for background retraining"
            )
            .expect("Failed to register retrain_queued"),

            retrain_rejected: register_int_counter!(
                "health_forecaster_retrain_rejected_total",
                "Retrain requests dropped because the queue was full"
            )
            .expect("Failed to register retrain_rejected"),

            trainings: register_int_counter_vec!(
                "health_forecaster_trainings_total",
                "Forecast model trainings, by outcome",
                &["outcome"]
            )
            .expect("Failed to register trainings"),

            training_duration_seconds: register_histogram!(
                "health_forecaster_training_duration_seconds",
                "Time spent fitting one forecast model",
                TRAINING_BUCKETS.to_vec()
            )
            .expect("Failed to register training_duration_seconds"),

            models_loaded: register_int_gauge!(
                "health_forecaster_models_loaded",
                "Forecast models currently held in memory"
            )
            .expect("Failed to register models_loaded"),
        }
    }
}

/// Forecaster metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance. Clones share the same
/// underlying metrics.
#[derive(Clone)]
pub struct ForecasterMetrics {
    _private: (),
}

impl Default for ForecasterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ForecasterMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ForecasterMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ForecasterMetricsInner {
        GLOBAL_METRICS.get_or_init(ForecasterMetricsInner::new)
    }

    pub fn observe_scoring_latency(&self, duration_secs: f64) {
        self.inner().scoring_latency_seconds.observe(duration_secs);
    }

    pub fn inc_nodes_scored(&self, path: ScoringPath) {
        self.inner()
            .nodes_scored
            .with_label_values(&[path.as_str()])
            .inc();
    }

    pub fn inc_anomalies_detected(&self) {
        self.inner().anomalies_detected.inc();
    }

    pub fn inc_source_unavailable(&self) {
        self.inner().source_unavailable.inc();
    }

    pub fn inc_retrain_queued(&self) {
        self.inner().retrain_queued.inc();
    }

    pub fn inc_retrain_rejected(&self) {
        self.inner().retrain_rejected.inc();
    }

    /// Record one training attempt and its duration
    pub fn record_training(&self, outcome: &TrainOutcome, duration_secs: f64) {
        self.inner()
            .trainings
            .with_label_values(&[outcome_label(outcome)])
            .inc();
        self.inner().training_duration_seconds.observe(duration_secs);
    }

    pub fn set_models_loaded(&self, count: usize) {
        self.inner().models_loaded.set(count as i64);
    }
}

fn outcome_label(outcome: &TrainOutcome) -> &'static str {
    match outcome {
        TrainOutcome::InsufficientData { .. } => "insufficient_data",
        TrainOutcome::Trained { .. } => "trained",
        TrainOutcome::Failed => "failed",
    }
}

/// Structured logger for forecaster events
///
/// Emits event-tagged records for startup, degraded scoring, anomalies and
/// retraining.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, prometheus_url: &str, prometheus_connected: bool) {
        if prometheus_connected {
            info!(
                event = "forecaster_started",
                instance = %self.instance,
                version = %version,
                prometheus_url = %prometheus_url,
                prometheus_connected = true,
                "Health forecaster started"
            );
        } else {
            warn!(
                event = "forecaster_started",
                instance = %self.instance,
                version = %version,
                prometheus_url = %prometheus_url,
                prometheus_connected = false,
                "Health forecaster started without Prometheus, serving neutral scores"
            );
        }
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "forecaster_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Health forecaster shutting down"
        );
    }

    /// Scoring answered with neutral defaults
    pub fn log_degraded_scoring(&self, node_count: usize, reason: &str) {
        warn!(
            event = "scoring_degraded",
            instance = %self.instance,
            node_count = node_count,
            reason = %reason,
            "Metrics unavailable, returning neutral scores"
        );
    }

    pub fn log_anomaly(&self, node: &str, latency: f64, error_rate: f64, anomaly_score: f64) {
        warn!(
            event = "anomaly_detected",
            instance = %self.instance,
            node = %node,
            latency = latency,
            error_rate = error_rate,
            anomaly_score = anomaly_score,
            "Anomalous node behaviour detected"
        );
    }

    pub fn log_retrain_scheduled(&self, nodes: &[String]) {
        info!(
            event = "retrain_scheduled",
            instance = %self.instance,
            nodes = ?nodes,
            count = nodes.len(),
            "Scheduled background retraining"
        );
    }

    pub fn log_training(&self, node: &str, outcome: &TrainOutcome) {
        match outcome {
            TrainOutcome::Trained { data_points, mape } => {
                info!(
                    event = "model_trained",
                    instance = %self.instance,
                    node = %node,
                    data_points = data_points,
                    mape = mape,
                    "Forecast model trained"
                );
            }
            TrainOutcome::InsufficientData {
                data_points,
                required,
            } => {
                info!(
                    event = "model_training_skipped",
                    instance = %self.instance,
                    node = %node,
                    data_points = data_points,
                    required = required,
                    "Not enough history to train forecast model"
                );
            }
            TrainOutcome::Failed => {
                warn!(
                    event = "model_training_failed",
                    instance = %self.instance,
                    node = %node,
                    "Forecast model training failed, keeping previous state"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forecaster_metrics_creation() {
        // Metrics live in the global registry, so handles created by other
        // tests share the same instance
        let metrics = ForecasterMetrics::new();

        metrics.observe_scoring_latency(0.002);
        metrics.inc_nodes_scored(ScoringPath::Fallback);
        metrics.inc_anomalies_detected();
        metrics.inc_source_unavailable();
        metrics.inc_retrain_queued();
        metrics.inc_retrain_rejected();
        metrics.record_training(&TrainOutcome::Failed, 0.01);
        metrics.set_models_loaded(3);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "health_forecaster_nodes_scored_total"));
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(outcome_label(&TrainOutcome::Failed), "failed");
        assert_eq!(
            outcome_label(&TrainOutcome::Trained {
                data_points: 60,
                mape: 0.1
            }),
            "trained"
        );
        assert_eq!(
            outcome_label(&TrainOutcome::InsufficientData {
                data_points: 5,
                required: 60
            }),
            "insufficient_data"
        );
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-instance");
        assert_eq!(logger.instance, "test-instance");
    }
}
