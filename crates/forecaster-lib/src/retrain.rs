//! Background forecast retraining
//!
//! Scoring requests hand nodes with stale or missing forecasts to a bounded
//! queue and return immediately. A single worker drains the queue, fetching
//! history and fitting one node at a time with a fixed pause in between.

use crate::forecast::ForecastModel;
use crate::models::{round_to, NodeId, TrainOutcome};
use crate::observability::{ForecasterMetrics, StructuredLogger};
use crate::registry::ModelRegistry;
use crate::source::MetricsReader;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Nodes to retrain, collected from one scoring request
#[derive(Debug, Clone, PartialEq)]
pub struct RetrainJob {
    pub nodes: Vec<NodeId>,
}

/// Fetches history and trains forecast models
///
/// Shared by the background worker and manual training requests.
#[derive(Clone)]
pub struct ModelTrainer {
    reader: MetricsReader,
    forecasts: ModelRegistry<NodeId, ForecastModel>,
    min_data_points: usize,
    metrics: ForecasterMetrics,
    logger: StructuredLogger,
}

impl ModelTrainer {
    pub fn new(
        reader: MetricsReader,
        forecasts: ModelRegistry<NodeId, ForecastModel>,
        min_data_points: usize,
        metrics: ForecasterMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            reader,
            forecasts,
            min_data_points,
            metrics,
            logger,
        }
    }

    /// Train `node` on the last `window` of latency history
    ///
    /// A history read failure counts as an empty history.
    pub async fn train_node(&self, node: &str, window: Duration) -> TrainOutcome {
        let started = Instant::now();

        let history = match self.reader.historical_latency(node, window).await {
            Ok(history) => history,
            Err(e) => {
                warn!(node = %node, error = %e, "Failed to fetch latency history");
                Vec::new()
            }
        };

        let outcome = if history.len() < self.min_data_points {
            TrainOutcome::InsufficientData {
                data_points: history.len(),
                required: self.min_data_points,
            }
        } else {
            let model = self.forecasts.get_or_create(node);
            self.metrics.set_models_loaded(self.forecasts.len());

            let data_points = history.len();
            // Fitting is CPU bound; keep it off the async workers
            let fit = tokio::task::spawn_blocking(move || {
                let trained = model.train(&history);
                (trained, model.snapshot())
            })
            .await;

            match fit {
                Ok((true, snapshot)) => TrainOutcome::Trained {
                    data_points,
                    mape: round_to(snapshot.last_error_metric, 4),
                },
                Ok((false, _)) => TrainOutcome::Failed,
                Err(e) => {
                    warn!(node = %node, error = %e, "Training task aborted");
                    TrainOutcome::Failed
                }
            }
        };

        self.metrics
            .record_training(&outcome, started.elapsed().as_secs_f64());
        self.logger.log_training(node, &outcome);
        outcome
    }
}

/// Producer side of the retrain queue
///
/// Never blocks. Nodes already queued or being trained are skipped, and a
/// full queue drops the job.
#[derive(Clone)]
pub struct RetrainQueue {
    sender: mpsc::Sender<RetrainJob>,
    pending: Arc<Mutex<HashSet<NodeId>>>,
    metrics: ForecasterMetrics,
}

impl RetrainQueue {
    /// Queue `nodes`; returns the nodes actually scheduled
    pub fn schedule(&self, nodes: Vec<NodeId>) -> Vec<NodeId> {
        let fresh: Vec<NodeId> = {
            let mut pending = lock(&self.pending);
            nodes
                .into_iter()
                .filter(|node| pending.insert(node.clone()))
                .collect()
        };

        if fresh.is_empty() {
            return fresh;
        }

        match self.sender.try_send(RetrainJob {
            nodes: fresh.clone(),
        }) {
            Ok(()) => {
                for _ in &fresh {
                    self.metrics.inc_retrain_queued();
                }
                debug!(nodes = ?fresh, "Queued retrain job");
                fresh
            }
            Err(e) => {
                let mut pending = lock(&self.pending);
                for node in &fresh {
                    pending.remove(node);
                    self.metrics.inc_retrain_rejected();
                }
                warn!(nodes = ?fresh, error = %e, "Retrain queue rejected job");
                Vec::new()
            }
        }
    }

    /// Whether `node` is queued or being trained
    pub fn is_pending(&self, node: &str) -> bool {
        lock(&self.pending).contains(node)
    }
}

/// Consumer side of the retrain queue
pub struct RetrainWorker {
    receiver: mpsc::Receiver<RetrainJob>,
    pending: Arc<Mutex<HashSet<NodeId>>>,
    trainer: ModelTrainer,
    history_window: Duration,
    delay: Duration,
    /// When the previous node finished, across jobs
    last_fetch: Option<Instant>,
}

/// Create a connected queue and worker
pub fn retrain_channel(
    capacity: usize,
    trainer: ModelTrainer,
    history_window: Duration,
    delay: Duration,
    metrics: ForecasterMetrics,
) -> (RetrainQueue, RetrainWorker) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let pending = Arc::new(Mutex::new(HashSet::new()));

    let queue = RetrainQueue {
        sender,
        pending: Arc::clone(&pending),
        metrics,
    };
    let worker = RetrainWorker {
        receiver,
        pending,
        trainer,
        history_window,
        delay,
        last_fetch: None,
    };
    (queue, worker)
}

impl RetrainWorker {
    /// Drain jobs until shutdown or until every queue handle is dropped
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            history_secs = self.history_window.as_secs(),
            delay_ms = self.delay.as_millis() as u64,
            "Starting retrain worker"
        );

        loop {
            tokio::select! {
                job = self.receiver.recv() => {
                    match job {
                        Some(job) => self.process_job(job).await,
                        None => {
                            info!("Retrain queue closed");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down retrain worker");
                    break;
                }
            }
        }
    }

    /// Train every node in `job`, keeping `delay` between consecutive nodes
    pub async fn process_job(&mut self, job: RetrainJob) {
        for node in job.nodes {
            self.pace().await;
            info!(node = %node, "Background training");
            // One node's outcome never stops the rest of the job
            let outcome = self.trainer.train_node(&node, self.history_window).await;
            debug!(node = %node, outcome = ?outcome, "Background training finished");
            lock(&self.pending).remove(&node);
            self.last_fetch = Some(Instant::now());
        }
    }

    /// Wait out whatever remains of `delay` since the previous node
    async fn pace(&self) {
        let Some(last) = self.last_fetch else {
            return;
        };
        let remaining = self.delay.saturating_sub(last.elapsed());
        if !remaining.is_zero() {
            tokio::time::sleep(remaining).await;
        }
    }

    /// Process whatever is already queued without waiting for more
    pub async fn drain(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(job) = self.receiver.try_recv() {
            self.process_job(job).await;
            processed += 1;
        }
        processed
    }
}

fn lock(pending: &Mutex<HashSet<NodeId>>) -> MutexGuard<'_, HashSet<NodeId>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Capability;
    use crate::error::SourceError;
    use crate::forecast::{Forecaster, HoltForecaster};
    use crate::source::{InstantSample, MetricsSource, RangeSeries};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Source serving a fixed latency history to every range query
    struct HistorySource {
        points: usize,
        fail: bool,
        range_queries: AtomicUsize,
        fetched_at: Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl MetricsSource for HistorySource {
        async fn instant_query(&self, _expr: &str) -> Result<Vec<InstantSample>, SourceError> {
            Ok(Vec::new())
        }

        async fn range_query(
            &self,
            _expr: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _step: Duration,
        ) -> Result<Vec<RangeSeries>, SourceError> {
            self.range_queries.fetch_add(1, Ordering::SeqCst);
            self.fetched_at.lock().unwrap().push(Instant::now());
            if self.fail {
                return Err(SourceError::Unavailable);
            }
            let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
            Ok(vec![RangeSeries {
                instance: String::new(),
                points: (0..self.points)
                    .map(|i| {
                        (
                            base + chrono::Duration::minutes(i as i64),
                            0.02 + (i % 5) as f64 * 0.001,
                        )
                    })
                    .collect(),
            }])
        }

        async fn is_available(&self) -> bool {
            !self.fail
        }
    }

    fn registry() -> ModelRegistry<NodeId, ForecastModel> {
        let engine: Arc<dyn Forecaster> = Arc::new(HoltForecaster::new());
        ModelRegistry::new(move |node: &NodeId| {
            ForecastModel::new(node.clone(), Capability::Available(engine.clone()), 60)
        })
    }

    fn trainer(
        source: Arc<HistorySource>,
        forecasts: ModelRegistry<NodeId, ForecastModel>,
    ) -> ModelTrainer {
        ModelTrainer::new(
            MetricsReader::new(source, "rpc_provider"),
            forecasts,
            60,
            ForecasterMetrics::new(),
            StructuredLogger::new("test"),
        )
    }

    fn history_source(points: usize, fail: bool) -> Arc<HistorySource> {
        Arc::new(HistorySource {
            points,
            fail,
            range_queries: AtomicUsize::new(0),
            fetched_at: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_train_node_insufficient_data() {
        let forecasts = registry();
        let trainer = trainer(history_source(10, false), forecasts.clone());

        let outcome = trainer.train_node("n1", Duration::from_secs(3600)).await;

        assert_eq!(
            outcome,
            TrainOutcome::InsufficientData {
                data_points: 10,
                required: 60
            }
        );
        assert!(forecasts.get("n1").is_none());
    }

    #[tokio::test]
    async fn test_train_node_source_failure_reads_as_empty() {
        let trainer = trainer(history_source(100, true), registry());

        let outcome = trainer.train_node("n1", Duration::from_secs(3600)).await;
        assert_eq!(
            outcome,
            TrainOutcome::InsufficientData {
                data_points: 0,
                required: 60
            }
        );
    }

    #[tokio::test]
    async fn test_train_node_trains_model() {
        let forecasts = registry();
        let trainer = trainer(history_source(120, false), forecasts.clone());

        let outcome = trainer.train_node("n1", Duration::from_secs(7200)).await;

        match outcome {
            TrainOutcome::Trained { data_points, mape } => {
                assert_eq!(data_points, 120);
                assert!((0.0..=1.0).contains(&mape));
            }
            other => panic!("expected trained, got {:?}", other),
        }
        assert!(forecasts.get("n1").unwrap().is_trained());
    }

    #[tokio::test]
    async fn test_queue_skips_pending_nodes() {
        let source = history_source(120, false);
        let (queue, mut worker) = retrain_channel(
            4,
            trainer(source.clone(), registry()),
            Duration::from_secs(3600),
            Duration::from_millis(1),
            ForecasterMetrics::new(),
        );

        let first = queue.schedule(vec!["n1".to_string(), "n2".to_string()]);
        assert_eq!(first, vec!["n1".to_string(), "n2".to_string()]);
        assert!(queue.is_pending("n1"));

        let second = queue.schedule(vec!["n1".to_string(), "n3".to_string()]);
        assert_eq!(second, vec!["n3".to_string()]);

        assert_eq!(worker.drain().await, 2);
        assert_eq!(source.range_queries.load(Ordering::SeqCst), 3);
        assert!(!queue.is_pending("n1"));
        assert!(!queue.is_pending("n3"));
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_blocking() {
        let (queue, _worker) = retrain_channel(
            1,
            trainer(history_source(120, false), registry()),
            Duration::from_secs(3600),
            Duration::from_millis(1),
            ForecasterMetrics::new(),
        );

        assert_eq!(queue.schedule(vec!["n1".to_string()]).len(), 1);
        assert!(queue.schedule(vec!["n2".to_string()]).is_empty());
        // A rejected node can be scheduled again later
        assert!(!queue.is_pending("n2"));
    }

    #[tokio::test]
    async fn test_failing_node_does_not_stop_job() {
        let source = history_source(120, false);
        // A model without an engine always fails to train
        let broken = ModelRegistry::new(|node: &NodeId| {
            ForecastModel::new(node.clone(), Capability::Unavailable, 60)
        });
        let (_queue, mut worker) = retrain_channel(
            4,
            trainer(source.clone(), broken.clone()),
            Duration::from_secs(3600),
            Duration::from_millis(1),
            ForecasterMetrics::new(),
        );

        worker
            .process_job(RetrainJob {
                nodes: vec!["a".to_string(), "b".to_string()],
            })
            .await;

        assert_eq!(source.range_queries.load(Ordering::SeqCst), 2);
        assert!(!broken.get("a").unwrap().is_trained());
        assert!(!broken.get("b").unwrap().is_trained());
    }

    #[tokio::test]
    async fn test_delay_spans_separate_jobs() {
        let source = history_source(120, false);
        let delay = Duration::from_millis(100);
        let (queue, mut worker) = retrain_channel(
            4,
            trainer(source.clone(), registry()),
            Duration::from_secs(3600),
            delay,
            ForecasterMetrics::new(),
        );

        // One node per job, as single scoring requests produce
        for node in ["a", "b", "c"] {
            assert_eq!(queue.schedule(vec![node.to_string()]).len(), 1);
        }
        assert_eq!(worker.drain().await, 3);

        let fetched_at = source.fetched_at.lock().unwrap().clone();
        assert_eq!(fetched_at.len(), 3);
        for pair in fetched_at.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= delay);
        }
    }

    #[tokio::test]
    async fn test_first_node_is_not_delayed() {
        let source = history_source(120, false);
        let (_queue, mut worker) = retrain_channel(
            4,
            trainer(source.clone(), registry()),
            Duration::from_secs(3600),
            Duration::from_secs(30),
            ForecasterMetrics::new(),
        );

        let job = RetrainJob {
            nodes: vec!["a".to_string()],
        };
        tokio::time::timeout(Duration::from_secs(5), worker.process_job(job))
            .await
            .unwrap();
        assert_eq!(source.range_queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_worker_stops_on_shutdown() {
        let (_queue, worker) = retrain_channel(
            4,
            trainer(history_source(120, false), registry()),
            Duration::from_secs(3600),
            Duration::from_millis(1),
            ForecasterMetrics::new(),
        );
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(worker.run(shutdown_rx));
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
