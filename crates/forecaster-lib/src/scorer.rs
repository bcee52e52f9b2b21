//! Health scoring
//!
//! Combines current latency, error rate, forecast and anomaly signals into a
//! single score in [0.01, 1.0]. Higher is healthier.

use crate::models::Trend;
use crate::settings::ScoringWeights;

/// Confidence above which the full multi-signal formula is used
pub const FULL_SCORING_MIN_CONFIDENCE: f64 = 0.2;

/// Confidence above which the predicted latency is blended into the trend signal
pub const BLEND_MIN_CONFIDENCE: f64 = 0.3;

/// Error rate above which the fallback score is penalized
const FALLBACK_ERROR_THRESHOLD: f64 = 0.1;

const MIN_SCORE: f64 = 0.01;
const MAX_SCORE: f64 = 1.0;

const ANOMALY_MULTIPLIER: f64 = 0.5;
const DEGRADING_MULTIPLIER: f64 = 0.9;
const IMPROVING_MULTIPLIER: f64 = 1.05;

/// Signals for one node at scoring time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringInputs {
    pub current_latency: f64,
    pub predicted_latency: f64,
    pub error_rate: f64,
    pub is_anomaly: bool,
    pub anomaly_score: f64,
    pub trend: Trend,
    pub confidence: f64,
}

/// Stateless scorer holding the configured weights
#[derive(Debug, Clone)]
pub struct HealthScorer {
    sensitivity: f64,
    weights: ScoringWeights,
}

impl Default for HealthScorer {
    fn default() -> Self {
        Self::new(20.0, ScoringWeights::default())
    }
}

impl HealthScorer {
    pub fn new(sensitivity: f64, weights: ScoringWeights) -> Self {
        Self {
            sensitivity,
            weights,
        }
    }

    /// Map a latency in seconds to (0, 1]; non-positive latency scores 1.0
    pub fn latency_to_score(&self, latency: f64) -> f64 {
        if latency <= 0.0 {
            return 1.0;
        }
        (-self.sensitivity * latency).exp()
    }

    /// Whether `confidence` qualifies for the full formula
    pub fn uses_full_path(confidence: f64) -> bool {
        confidence > FULL_SCORING_MIN_CONFIDENCE
    }

    /// Full multi-signal score
    pub fn score(&self, inputs: &ScoringInputs) -> f64 {
        let current_score = self.latency_to_score(inputs.current_latency);
        let error_score = (1.0 - inputs.error_rate).max(0.0);

        let trend_score = if inputs.confidence > BLEND_MIN_CONFIDENCE {
            (1.0 - inputs.confidence) * current_score
                + inputs.confidence * self.latency_to_score(inputs.predicted_latency)
        } else {
            current_score
        };

        let stability_score = (1.0 - inputs.anomaly_score).max(0.0);

        let mut raw = self.weights.latency * current_score
            + self.weights.error * error_score
            + self.weights.trend * trend_score
            + self.weights.anomaly * stability_score;

        if inputs.is_anomaly {
            raw *= ANOMALY_MULTIPLIER;
        }
        match inputs.trend {
            Trend::Degrading => raw *= DEGRADING_MULTIPLIER,
            Trend::Improving => raw *= IMPROVING_MULTIPLIER,
            Trend::Stable | Trend::Unknown => {}
        }

        clamp_score(raw)
    }

    /// Current-latency score used while the forecast is missing or weak
    pub fn fallback(&self, current_latency: f64, error_rate: f64) -> f64 {
        let mut score = self.latency_to_score(current_latency);
        if error_rate > FALLBACK_ERROR_THRESHOLD {
            score *= 1.0 - error_rate;
        }
        clamp_score(score)
    }
}

fn clamp_score(raw: f64) -> f64 {
    if raw.is_nan() {
        return MIN_SCORE;
    }
    raw.clamp(MIN_SCORE, MAX_SCORE)
}
