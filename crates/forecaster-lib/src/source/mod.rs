//! Metrics source abstraction
//!
//! The forecaster reads latency and error-rate series from a time-series
//! database. [`MetricsSource`] is the seam; [`PrometheusClient`] talks to the
//! Prometheus HTTP API and [`MetricsReader`] builds the queries the
//! orchestrator needs.

mod client;
mod reader;

pub use client::PrometheusClient;
pub use reader::MetricsReader;

use crate::error::SourceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Docker-for-desktop host alias reported by some scrape targets
const DOCKER_HOST_ALIAS: &str = "host.docker.internal";
const LOOPBACK: &str = "127.0.0.1";

/// One value of an instant query
#[derive(Debug, Clone, PartialEq)]
pub struct InstantSample {
    pub instance: String,
    pub value: f64,
}

/// Ordered points of a ranged query for one series
#[derive(Debug, Clone, PartialEq)]
pub struct RangeSeries {
    pub instance: String,
    pub points: Vec<(DateTime<Utc>, f64)>,
}

/// Time-series database the forecaster reads from
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Evaluate `expr` at the current time
    async fn instant_query(&self, expr: &str) -> Result<Vec<InstantSample>, SourceError>;

    /// Evaluate `expr` over `[start, end]` at `step` resolution
    async fn range_query(
        &self,
        expr: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<RangeSeries>, SourceError>;

    /// Cheap reachability probe, never errors
    async fn is_available(&self) -> bool;
}

/// Map the docker host alias in an instance label to the loopback address
pub fn normalize_instance(instance: &str) -> String {
    instance.replace(DOCKER_HOST_ALIAS, LOOPBACK)
}
