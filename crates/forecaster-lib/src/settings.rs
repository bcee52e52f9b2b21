//! Immutable runtime settings for the forecaster core

use crate::error::SettingsError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Minimum history points before a forecast model is trained (one hour at 1m resolution)
pub const DEFAULT_MIN_DATA_POINTS: usize = 60;

/// Forecast horizon in minutes
pub const DEFAULT_PREDICTION_HORIZON_MINUTES: u32 = 5;

/// Age after which a trained forecast model is considered stale
pub const DEFAULT_RETRAIN_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// History window fetched for training
pub const DEFAULT_HISTORY_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Pause between nodes in a background retrain job
pub const DEFAULT_RETRAIN_DELAY: Duration = Duration::from_secs(1);

/// Tolerance when checking that the scoring weights sum to one
const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

/// Relative weights of the four scoring signals
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub latency: f64,
    pub error: f64,
    pub trend: f64,
    pub anomaly: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            latency: 0.35,
            error: 0.25,
            trend: 0.25,
            anomaly: 0.15,
        }
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.latency + self.error + self.trend + self.anomaly
    }
}

/// Sliding-window outlier detection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalySettings {
    /// Expected fraction of outliers in the window
    pub contamination: f64,
    /// Sliding window capacity
    pub window_capacity: usize,
    /// Observations required before detection starts
    pub min_samples: usize,
    /// Trees in the isolation forest
    pub estimators: usize,
    /// Seed for reproducible forests
    pub seed: u64,
}

impl Default for AnomalySettings {
    fn default() -> Self {
        Self {
            contamination: 0.1,
            window_capacity: 100,
            min_samples: 20,
            estimators: 100,
            seed: 42,
        }
    }
}

/// Settings shared by the orchestrator, the models and the retrain worker
#[derive(Debug, Clone, PartialEq)]
pub struct ForecasterSettings {
    /// Name used in structured log records
    pub instance_name: String,
    /// Prometheus `job` label of the RPC providers
    pub scrape_job: String,
    pub min_data_points: usize,
    pub prediction_horizon_minutes: u32,
    pub retrain_interval: Duration,
    pub history_window: Duration,
    pub weights: ScoringWeights,
    /// Exponential decay factor applied to latency (seconds)
    pub latency_sensitivity: f64,
    pub anomaly: AnomalySettings,
    pub retrain_delay: Duration,
    pub retrain_queue_capacity: usize,
}

impl Default for ForecasterSettings {
    fn default() -> Self {
        Self {
            instance_name: "health-forecaster".to_string(),
            scrape_job: "rpc_provider".to_string(),
            min_data_points: DEFAULT_MIN_DATA_POINTS,
            prediction_horizon_minutes: DEFAULT_PREDICTION_HORIZON_MINUTES,
            retrain_interval: DEFAULT_RETRAIN_INTERVAL,
            history_window: DEFAULT_HISTORY_WINDOW,
            weights: ScoringWeights::default(),
            latency_sensitivity: 20.0,
            anomaly: AnomalySettings::default(),
            retrain_delay: DEFAULT_RETRAIN_DELAY,
            retrain_queue_capacity: 64,
        }
    }
}

impl ForecasterSettings {
    /// Reject combinations the scoring and detection code cannot honor
    pub fn validate(&self) -> Result<(), SettingsError> {
        let sum = self.weights.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(SettingsError::WeightsSum(sum));
        }

        let contamination = self.anomaly.contamination;
        if !(contamination > 0.0 && contamination <= 0.5) {
            return Err(SettingsError::Contamination(contamination));
        }

        if self.anomaly.min_samples > self.anomaly.window_capacity {
            return Err(SettingsError::AnomalyWindow {
                min_samples: self.anomaly.min_samples,
                capacity: self.anomaly.window_capacity,
            });
        }

        if self.min_data_points < 2 {
            return Err(SettingsError::MinDataPoints(self.min_data_points));
        }

        Ok(())
    }
}
