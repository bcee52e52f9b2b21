//! RPC latency and error-rate queries

use super::{InstantSample, MetricsSource};
use crate::error::SourceError;
use crate::models::{NodeId, Observation};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Resolution of historical latency series
const HISTORY_STEP: Duration = Duration::from_secs(60);

const LATENCY_SUM_METRIC: &str = "rpc_server_processing_seconds_sum";
const LATENCY_COUNT_METRIC: &str = "rpc_server_processing_seconds_count";
const REQUESTS_METRIC: &str = "rpc_server_requests_total";

/// Builds the forecaster's PromQL and reshapes the answers per node
#[derive(Clone)]
pub struct MetricsReader {
    source: Arc<dyn MetricsSource>,
    job: String,
}

impl MetricsReader {
    pub fn new(source: Arc<dyn MetricsSource>, job: impl Into<String>) -> Self {
        Self {
            source,
            job: job.into(),
        }
    }

    pub async fn is_available(&self) -> bool {
        self.source.is_available().await
    }

    /// Mean latency (seconds) over the last minute for every node, in one query
    pub async fn current_latency(
        &self,
        nodes: &[NodeId],
    ) -> Result<HashMap<NodeId, f64>, SourceError> {
        let expr = format!(
            "sum(rate({sum}{{job=\"{job}\"}}[1m])) by (instance) / sum(rate({count}{{job=\"{job}\"}}[1m])) by (instance)",
            sum = LATENCY_SUM_METRIC,
            count = LATENCY_COUNT_METRIC,
            job = escape(&self.job),
        );
        let samples = self.source.instant_query(&expr).await?;
        Ok(per_node(nodes, &samples, |v| v.max(0.0)))
    }

    /// Fraction of failed requests over the last minute for every node, in one query
    pub async fn error_rates(&self, nodes: &[NodeId]) -> Result<HashMap<NodeId, f64>, SourceError> {
        let expr = format!(
            "sum(rate({requests}{{job=\"{job}\",status=\"error\"}}[1m])) by (instance) / sum(rate({requests}{{job=\"{job}\"}}[1m])) by (instance)",
            requests = REQUESTS_METRIC,
            job = escape(&self.job),
        );
        let samples = self.source.instant_query(&expr).await?;
        Ok(per_node(nodes, &samples, |v| v.clamp(0.0, 1.0)))
    }

    /// Latency history of one node over `window`, ordered by time
    ///
    /// Error rate is not part of the history and reads as 0.
    pub async fn historical_latency(
        &self,
        node: &str,
        window: Duration,
    ) -> Result<Vec<Observation>, SourceError> {
        let node = escape(node);
        let expr = format!(
            "sum(rate({sum}{{job=\"{job}\",instance=~\".*{node}.*\"}}[1m])) / sum(rate({count}{{job=\"{job}\",instance=~\".*{node}.*\"}}[1m]))",
            sum = LATENCY_SUM_METRIC,
            count = LATENCY_COUNT_METRIC,
            job = escape(&self.job),
        );

        let end = Utc::now();
        let span =
            chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::hours(24));
        let start = end - span;
        let series = self
            .source
            .range_query(&expr, start, end, HISTORY_STEP)
            .await?;

        let mut history: Vec<Observation> = series
            .into_iter()
            .flat_map(|s| s.points)
            .filter(|(_, value)| value.is_finite())
            .map(|(timestamp, value)| Observation::new(value, 0.0, timestamp))
            .collect();
        history.sort_by_key(|o| o.timestamp);

        debug!(node = %node, points = history.len(), "Fetched latency history");
        Ok(history)
    }
}

/// Value per requested node; nodes missing from the answer or with a
/// non-finite value read as 0
fn per_node(
    nodes: &[NodeId],
    samples: &[InstantSample],
    bound: impl Fn(f64) -> f64,
) -> HashMap<NodeId, f64> {
    let by_instance: HashMap<&str, f64> = samples
        .iter()
        .map(|s| (s.instance.as_str(), s.value))
        .collect();

    nodes
        .iter()
        .map(|node| {
            let value = by_instance
                .get(node.as_str())
                .copied()
                .filter(|v| v.is_finite())
                .map(&bound)
                .unwrap_or(0.0);
            (node.clone(), value)
        })
        .collect()
}

/// Escape a value for use inside a double-quoted PromQL string
fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
