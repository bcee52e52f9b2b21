//! Scoring orchestration
//!
//! Ties the metrics source, the per-node models and the scorer together:
//! - One batched latency read and one batched error-rate read per request
//! - Sequential per-node anomaly update, forecast and scoring
//! - Neutral scores for every node when the metrics source is down
//! - Background retraining for nodes whose forecast is missing or stale

use crate::anomaly::{AnomalyModel, AnomalyVerdict, IsolationForest, OutlierDetector};
use crate::capability::Capability;
use crate::forecast::{ForecastModel, Forecaster, HoltForecaster, LatencyForecast};
use crate::models::{
    round_to, ModelSummary, NodeHealth, NodeId, ScoringPath, ServiceHealth, ServiceStatus,
    TrainOutcome, Trend,
};
use crate::observability::{ForecasterMetrics, StructuredLogger};
use crate::registry::ModelRegistry;
use crate::retrain::{retrain_channel, ModelTrainer, RetrainQueue, RetrainWorker};
use crate::scorer::{HealthScorer, ScoringInputs};
use crate::settings::ForecasterSettings;
use crate::source::{MetricsReader, MetricsSource};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};


/// Forecast state of one node at scoring time
enum ForecastStep {
    Trained(LatencyForecast, Trend),
    Untrained { needs_retrain: bool },
}

/// Version reported by the service health endpoint
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Entry point for scoring, training and model introspection
pub struct Orchestrator {
    reader: MetricsReader,
    forecasts: ModelRegistry<NodeId, ForecastModel>,
    anomalies: ModelRegistry<NodeId, AnomalyModel>,
    scorer: HealthScorer,
    trainer: ModelTrainer,
    retrain: RetrainQueue,
    settings: ForecasterSettings,
    metrics: ForecasterMetrics,
    logger: StructuredLogger,
}

impl Orchestrator {
    /// Build an orchestrator with the built-in engines
    ///
    /// The returned worker must be spawned for background retraining to run.
    pub fn new(
        source: Arc<dyn MetricsSource>,
        settings: ForecasterSettings,
    ) -> (Self, RetrainWorker) {
        let forecaster: Arc<dyn Forecaster> = Arc::new(HoltForecaster::new());
        let detector: Arc<dyn OutlierDetector> = Arc::new(IsolationForest::new(
            settings.anomaly.estimators,
            settings.anomaly.contamination,
            settings.anomaly.seed,
        ));
        Self::with_engines(
            source,
            settings,
            Capability::Available(forecaster),
            Capability::Available(detector),
        )
    }

    /// Build an orchestrator with explicit, possibly missing, engines
    pub fn with_engines(
        source: Arc<dyn MetricsSource>,
        settings: ForecasterSettings,
        forecaster: Capability<Arc<dyn Forecaster>>,
        detector: Capability<Arc<dyn OutlierDetector>>,
    ) -> (Self, RetrainWorker) {
        let metrics = ForecasterMetrics::new();
        let logger = StructuredLogger::new(settings.instance_name.clone());
        let reader = MetricsReader::new(source, settings.scrape_job.clone());

        let min_data_points = settings.min_data_points;
        let forecasts = ModelRegistry::new(move |node: &NodeId| {
            ForecastModel::new(node.clone(), forecaster.clone(), min_data_points)
        });

        let (capacity, min_samples) = (
            settings.anomaly.window_capacity,
            settings.anomaly.min_samples,
        );
        let anomalies = ModelRegistry::new(move |node: &NodeId| {
            AnomalyModel::new(node.clone(), detector.clone(), capacity, min_samples)
        });

        let trainer = ModelTrainer::new(
            reader.clone(),
            forecasts.clone(),
            min_data_points,
            metrics.clone(),
            logger.clone(),
        );
        let (retrain, worker) = retrain_channel(
            settings.retrain_queue_capacity,
            trainer.clone(),
            settings.history_window,
            settings.retrain_delay,
            metrics.clone(),
        );

        let orchestrator = Self {
            reader,
            forecasts,
            anomalies,
            scorer: HealthScorer::new(settings.latency_sensitivity, settings.weights),
            trainer,
            retrain,
            settings,
            metrics,
            logger,
        };
        (orchestrator, worker)
    }

    pub fn settings(&self) -> &ForecasterSettings {
        &self.settings
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    /// Whether the metrics source answers its health probe
    pub async fn source_available(&self) -> bool {
        self.reader.is_available().await
    }

    /// Full health assessment for every requested node
    pub async fn score_nodes(&self, nodes: &[NodeId]) -> BTreeMap<NodeId, NodeHealth> {
        let started = Instant::now();
        info!(nodes = ?nodes, "Scoring request");

        let results = match self.read_current(nodes).await {
            Some((latencies, error_rates)) => {
                self.score_with(nodes, &latencies, &error_rates).await
            }
            None => {
                self.metrics.inc_source_unavailable();
                nodes
                    .iter()
                    .map(|node| {
                        self.metrics.inc_nodes_scored(ScoringPath::Default);
                        (node.clone(), NodeHealth::neutral(node.clone()))
                    })
                    .collect()
            }
        };

        self.metrics.set_models_loaded(self.forecasts.len());
        self.metrics
            .observe_scoring_latency(started.elapsed().as_secs_f64());
        results
    }

    /// Bare scores rounded to 4 decimals
    pub async fn predict_scores(&self, nodes: &[NodeId]) -> BTreeMap<NodeId, f64> {
        self.score_nodes(nodes)
            .await
            .into_iter()
            .map(|(node, health)| (node, round_to(health.health_score, 4)))
            .collect()
    }

    /// Full assessments with every numeric field rounded for output
    pub async fn predict_detailed(&self, nodes: &[NodeId]) -> BTreeMap<NodeId, NodeHealth> {
        self.score_nodes(nodes)
            .await
            .into_iter()
            .map(|(node, health)| (node, health.rounded()))
            .collect()
    }

    /// Train one node's forecast on the last `history_hours` of latency
    pub async fn train_node(&self, node: &str, history_hours: u32) -> TrainOutcome {
        info!(node = %node, history_hours, "Manual training request");
        let window = Duration::from_secs(u64::from(history_hours) * 3600);
        self.trainer.train_node(node, window).await
    }

    /// Status of every forecast model created so far
    pub fn model_summaries(&self) -> BTreeMap<NodeId, ModelSummary> {
        self.forecasts
            .keys()
            .into_iter()
            .filter_map(|node| {
                let model = self.forecasts.get(&node)?;
                let snapshot = model.snapshot();
                let summary = ModelSummary {
                    is_trained: snapshot.trained,
                    data_points: snapshot.data_point_count,
                    last_trained: snapshot.last_trained_at.map(|t| t.to_rfc3339()),
                    mape: snapshot
                        .trained
                        .then(|| round_to(snapshot.last_error_metric, 4)),
                    needs_retrain: model.needs_retrain(self.settings.retrain_interval),
                };
                Some((node, summary))
            })
            .collect()
    }

    pub async fn service_health(&self) -> ServiceHealth {
        let connected = self.reader.is_available().await;
        ServiceHealth {
            status: if connected {
                ServiceStatus::Ok
            } else {
                ServiceStatus::Degraded
            },
            prometheus_connected: connected,
            models_loaded: self.forecasts.len(),
            version: SERVICE_VERSION.to_string(),
        }
    }

    /// Batched latency and error-rate reads, or `None` when scoring must degrade
    async fn read_current(
        &self,
        nodes: &[NodeId],
    ) -> Option<(HashMap<NodeId, f64>, HashMap<NodeId, f64>)> {
        if !self.reader.is_available().await {
            self.logger
                .log_degraded_scoring(nodes.len(), "metrics source unavailable");
            return None;
        }

        let latencies = match self.reader.current_latency(nodes).await {
            Ok(latencies) => latencies,
            Err(e) => {
                self.logger
                    .log_degraded_scoring(nodes.len(), &format!("latency query failed: {e}"));
                return None;
            }
        };

        let error_rates = match self.reader.error_rates(nodes).await {
            Ok(rates) => rates,
            Err(e) => {
                warn!(error = %e, "Error rate query failed, assuming no errors");
                HashMap::new()
            }
        };

        Some((latencies, error_rates))
    }

    async fn score_with(
        &self,
        nodes: &[NodeId],
        latencies: &HashMap<NodeId, f64>,
        error_rates: &HashMap<NodeId, f64>,
    ) -> BTreeMap<NodeId, NodeHealth> {
        let mut results = BTreeMap::new();
        let mut due_for_training = Vec::new();

        for node in nodes {
            let current_latency = latencies.get(node).copied().unwrap_or(0.0);
            let error_rate = error_rates.get(node).copied().unwrap_or(0.0);

            let forecast = self.forecasts.get_or_create(node);
            let anomaly = self.anomalies.get_or_create(node);

            let verdict = self.observe_and_classify(anomaly, current_latency, error_rate).await;
            if verdict.is_anomaly {
                self.metrics.inc_anomalies_detected();
                self.logger
                    .log_anomaly(node, current_latency, error_rate, verdict.anomaly_score);
            }

            let (predicted_latency, confidence, trend) = match self.forecast_step(forecast).await {
                ForecastStep::Trained(prediction, trend) => {
                    (prediction.predicted_latency, prediction.confidence, trend)
                }
                ForecastStep::Untrained { needs_retrain } => {
                    if needs_retrain {
                        due_for_training.push(node.clone());
                    }
                    (current_latency, 0.0, Trend::Unknown)
                }
            };

            let health = if HealthScorer::uses_full_path(confidence) {
                let inputs = ScoringInputs {
                    current_latency,
                    predicted_latency,
                    error_rate,
                    is_anomaly: verdict.is_anomaly,
                    anomaly_score: verdict.anomaly_score,
                    trend,
                    confidence,
                };
                self.metrics.inc_nodes_scored(ScoringPath::Full);
                NodeHealth {
                    node: node.clone(),
                    health_score: self.scorer.score(&inputs),
                    current_latency,
                    predicted_latency,
                    error_rate,
                    is_anomaly: verdict.is_anomaly,
                    anomaly_score: verdict.anomaly_score,
                    trend,
                    confidence,
                }
            } else {
                self.metrics.inc_nodes_scored(ScoringPath::Fallback);
                NodeHealth {
                    node: node.clone(),
                    health_score: self.scorer.fallback(current_latency, error_rate),
                    current_latency,
                    predicted_latency: current_latency,
                    error_rate,
                    is_anomaly: verdict.is_anomaly,
                    anomaly_score: verdict.anomaly_score,
                    trend: Trend::Unknown,
                    confidence: 0.0,
                }
            };

            debug!(
                node = %node,
                health_score = health.health_score,
                confidence = health.confidence,
                trend = %health.trend,
                "Node scored"
            );
            results.insert(node.clone(), health);
        }

        if !due_for_training.is_empty() {
            let scheduled = self.retrain.schedule(due_for_training);
            if !scheduled.is_empty() {
                self.logger.log_retrain_scheduled(&scheduled);
            }
        }

        results
    }

    /// Prediction, trend and retrain due-ness read off the async workers
    async fn forecast_step(&self, model: Arc<ForecastModel>) -> ForecastStep {
        let horizon = self.settings.prediction_horizon_minutes;
        let interval = self.settings.retrain_interval;
        let step = tokio::task::spawn_blocking(move || match model.forecast_with_trend(horizon) {
            Some((prediction, trend)) => ForecastStep::Trained(prediction, trend),
            None => ForecastStep::Untrained {
                needs_retrain: model.needs_retrain(interval),
            },
        })
        .await;

        step.unwrap_or_else(|e| {
            warn!(error = %e, "Forecast task aborted");
            ForecastStep::Untrained {
                needs_retrain: false,
            }
        })
    }

    /// Feed the observation to the node's detector, then classify it
    async fn observe_and_classify(
        &self,
        model: Arc<AnomalyModel>,
        latency: f64,
        error_rate: f64,
    ) -> AnomalyVerdict {
        // Refitting the forest is CPU bound
        let verdict = tokio::task::spawn_blocking(move || {
            model.add_observation(latency, error_rate);
            model.classify(latency, error_rate)
        })
        .await;

        verdict.unwrap_or_else(|e| {
            warn!(error = %e, "Anomaly detection task aborted");
            AnomalyVerdict::NORMAL
        })
    }
}
