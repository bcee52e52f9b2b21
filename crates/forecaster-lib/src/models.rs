//! Core data models for the health forecaster

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a backend instance (usually `host:port`)
pub type NodeId = String;

/// A single latency/error-rate sample for a node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub latency: f64,
    pub error_rate: f64,
    pub timestamp: DateTime<Utc>,
}

impl Observation {
    pub fn new(latency: f64, error_rate: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latency,
            error_rate,
            timestamp,
        }
    }

    /// Observation stamped with the current time
    pub fn now(latency: f64, error_rate: f64) -> Self {
        Self::new(latency, error_rate, Utc::now())
    }
}

/// Coarse direction of recent latency relative to the training history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Stable,
    Degrading,
    Unknown,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Improving => write!(f, "improving"),
            Trend::Stable => write!(f, "stable"),
            Trend::Degrading => write!(f, "degrading"),
            Trend::Unknown => write!(f, "unknown"),
        }
    }
}

/// Which formula produced a node's score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringPath {
    /// Confidence-weighted multi-signal formula
    Full,
    /// Current-latency formula used while the forecast is missing or weak
    Fallback,
    /// Neutral score returned when the metrics source is unavailable
    Default,
}

impl ScoringPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringPath::Full => "full",
            ScoringPath::Fallback => "fallback",
            ScoringPath::Default => "default",
        }
    }
}

/// Score returned for every node while the metrics source is unavailable
pub const NEUTRAL_HEALTH_SCORE: f64 = 0.5;

/// Complete health assessment for a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeHealth {
    pub node: NodeId,
    pub health_score: f64,
    pub current_latency: f64,
    pub predicted_latency: f64,
    pub error_rate: f64,
    pub is_anomaly: bool,
    pub anomaly_score: f64,
    pub trend: Trend,
    pub confidence: f64,
}

impl NodeHealth {
    /// Neutral assessment used when no metrics could be read
    pub fn neutral(node: impl Into<NodeId>) -> Self {
        Self {
            node: node.into(),
            health_score: NEUTRAL_HEALTH_SCORE,
            current_latency: 0.0,
            predicted_latency: 0.0,
            error_rate: 0.0,
            is_anomaly: false,
            anomaly_score: 0.0,
            trend: Trend::Unknown,
            confidence: 0.0,
        }
    }

    /// Copy with every numeric field rounded for API output
    pub fn rounded(&self) -> Self {
        Self {
            node: self.node.clone(),
            health_score: round_to(self.health_score, 4),
            current_latency: round_to(self.current_latency, 6),
            predicted_latency: round_to(self.predicted_latency, 6),
            error_rate: round_to(self.error_rate, 4),
            is_anomaly: self.is_anomaly,
            anomaly_score: round_to(self.anomaly_score, 4),
            trend: self.trend,
            confidence: round_to(self.confidence, 4),
        }
    }
}

/// Round `value` to `decimals` decimal places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Result of a manual training request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrainOutcome {
    InsufficientData { data_points: usize, required: usize },
    Trained { data_points: usize, mape: f64 },
    Failed,
}

/// Per-node forecast model status for the `/models` listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub is_trained: bool,
    pub data_points: usize,
    pub last_trained: Option<String>,
    pub mape: Option<f64>,
    pub needs_retrain: bool,
}

/// Overall service status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Ok,
    Degraded,
}

/// Service health report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: ServiceStatus,
    pub prometheus_connected: bool,
    pub models_loaded: usize,
    pub version: String,
}
