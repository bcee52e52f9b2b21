//! Per-node forecast model lifecycle
//!
//! A model starts untrained and becomes trained after the first successful
//! fit. It never goes back: a failed retrain keeps whatever state was there
//! before, so a node that once had a forecast keeps serving it.

use super::{FittedForecast, Forecaster};
use crate::capability::Capability;
use crate::error::guarded;
use crate::models::{NodeId, Observation, Trend};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Observations at or below this latency are excluded from the error metric
pub const ERROR_EPSILON: f64 = 0.001;

/// Number of most recent observations compared against the overall mean
pub const RECENT_WINDOW: usize = 10;

/// Error metric used when no observation clears `ERROR_EPSILON`
const FALLBACK_ERROR_METRIC: f64 = 0.5;

const MIN_CONFIDENCE: f64 = 0.1;
const MAX_CONFIDENCE: f64 = 0.99;

const IMPROVING_RATIO: f64 = 0.9;
const DEGRADING_RATIO: f64 = 1.1;

/// Predicted latency and how much it should be trusted
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyForecast {
    pub predicted_latency: f64,
    pub confidence: f64,
}

impl LatencyForecast {
    /// Returned whenever no usable prediction exists
    pub const NONE: LatencyForecast = LatencyForecast {
        predicted_latency: 0.0,
        confidence: 0.0,
    };

    pub fn is_none(&self) -> bool {
        self.confidence == 0.0
    }
}

/// Read-only view of a model's training state
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastSnapshot {
    pub trained: bool,
    pub data_point_count: usize,
    pub last_trained_at: Option<DateTime<Utc>>,
    pub last_error_metric: f64,
}

struct ForecastState {
    fitted: Option<Box<dyn FittedForecast>>,
    last_trained_at: Option<DateTime<Utc>>,
    data_point_count: usize,
    last_error_metric: f64,
    training_history: Vec<Observation>,
}

impl Default for ForecastState {
    fn default() -> Self {
        Self {
            fitted: None,
            last_trained_at: None,
            data_point_count: 0,
            last_error_metric: 1.0,
            training_history: Vec::new(),
        }
    }
}

/// Forecast model for a single node
///
/// `train` and `predict` take the same lock, so a prediction never observes
/// a half-trained model.
pub struct ForecastModel {
    node: NodeId,
    engine: Capability<Arc<dyn Forecaster>>,
    min_data_points: usize,
    state: Mutex<ForecastState>,
}

impl ForecastModel {
    pub fn new(
        node: impl Into<NodeId>,
        engine: Capability<Arc<dyn Forecaster>>,
        min_data_points: usize,
    ) -> Self {
        Self {
            node: node.into(),
            engine,
            min_data_points,
            state: Mutex::new(ForecastState::default()),
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn min_data_points(&self) -> usize {
        self.min_data_points
    }

    // State is only replaced wholesale after a successful fit, so a guard
    // recovered from a poisoned lock is still consistent.
    fn lock_state(&self) -> MutexGuard<'_, ForecastState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fit the engine on `history`; returns false without touching state on any failure
    pub fn train(&self, history: &[Observation]) -> bool {
        if history.len() < self.min_data_points {
            info!(
                node = %self.node,
                data_points = history.len(),
                required = self.min_data_points,
                "Insufficient data for training"
            );
            return false;
        }

        let Some(engine) = self.engine.as_available() else {
            warn!(node = %self.node, "Forecast engine unavailable, skipping training");
            return false;
        };

        let series: Vec<f64> = history.iter().map(|o| o.latency).collect();

        let mut state = self.lock_state();
        let fitted = match guarded(|| engine.fit(&series)) {
            Ok(fitted) => fitted,
            Err(e) => {
                error!(node = %self.node, error = %e, "Training failed");
                return false;
            }
        };

        let error_metric = in_sample_error(&series, fitted.as_ref());

        *state = ForecastState {
            fitted: Some(fitted),
            last_trained_at: Some(Utc::now()),
            data_point_count: history.len(),
            last_error_metric: error_metric,
            training_history: history.to_vec(),
        };

        info!(
            node = %self.node,
            data_points = history.len(),
            mape = error_metric,
            "Forecast model trained"
        );
        true
    }

    /// Forecast latency `horizon_minutes` ahead, or [`LatencyForecast::NONE`]
    pub fn predict(&self, horizon_minutes: u32) -> LatencyForecast {
        let state = self.lock_state();
        self.predict_locked(&state, horizon_minutes)
    }

    /// Direction of the most recent latency compared to the training history
    pub fn trend(&self) -> Trend {
        trend_of(&self.lock_state())
    }

    /// Prediction and trend read under one lock, or `None` while untrained
    pub fn forecast_with_trend(&self, horizon_minutes: u32) -> Option<(LatencyForecast, Trend)> {
        let state = self.lock_state();
        state.fitted.as_ref()?;
        Some((self.predict_locked(&state, horizon_minutes), trend_of(&state)))
    }

    fn predict_locked(&self, state: &ForecastState, horizon_minutes: u32) -> LatencyForecast {
        if !self.engine.is_available() {
            return LatencyForecast::NONE;
        }
        let Some(fitted) = state.fitted.as_ref() else {
            return LatencyForecast::NONE;
        };

        let steps = horizon_minutes.max(1) as usize;
        let interval = match guarded(|| fitted.forecast(steps)) {
            Ok(interval) => interval,
            Err(e) => {
                error!(node = %self.node, error = %e, "Prediction failed");
                return LatencyForecast::NONE;
            }
        };

        let predicted_latency = interval.yhat.max(0.0);
        let base_confidence =
            (1.0 - interval.width() / (predicted_latency + ERROR_EPSILON)).max(0.0);
        let data_conf = data_confidence(state.data_point_count);
        let error_confidence = (1.0 - state.last_error_metric).max(0.0);

        let raw = base_confidence * data_conf * error_confidence;
        let confidence = if raw.is_finite() {
            raw.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
        } else {
            MIN_CONFIDENCE
        };

        debug!(
            node = %self.node,
            predicted_latency,
            base_confidence,
            data_confidence = data_conf,
            error_confidence,
            confidence,
            "Latency forecast"
        );

        LatencyForecast {
            predicted_latency,
            confidence,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.lock_state().fitted.is_some()
    }

    /// True if never trained or the last training is older than `interval`
    pub fn needs_retrain(&self, interval: Duration) -> bool {
        self.needs_retrain_at(Utc::now(), interval)
    }

    pub fn needs_retrain_at(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        let state = self.lock_state();
        match state.last_trained_at {
            None => true,
            Some(trained_at) => now
                .signed_duration_since(trained_at)
                .to_std()
                .map(|elapsed| elapsed > interval)
                .unwrap_or(false),
        }
    }

    pub fn snapshot(&self) -> ForecastSnapshot {
        let state = self.lock_state();
        ForecastSnapshot {
            trained: state.fitted.is_some(),
            data_point_count: state.data_point_count,
            last_trained_at: state.last_trained_at,
            last_error_metric: state.last_error_metric,
        }
    }
}

fn trend_of(state: &ForecastState) -> Trend {
    if state.fitted.is_none() || state.training_history.is_empty() {
        return Trend::Unknown;
    }

    let history = &state.training_history;
    let overall = mean(history.iter().map(|o| o.latency));
    let recent_start = history.len().saturating_sub(RECENT_WINDOW);
    let recent = mean(history[recent_start..].iter().map(|o| o.latency));

    let ratio = if overall > 0.0 { recent / overall } else { 1.0 };

    if ratio < IMPROVING_RATIO {
        Trend::Improving
    } else if ratio > DEGRADING_RATIO {
        Trend::Degrading
    } else {
        Trend::Stable
    }
}

/// Confidence contributed by the amount of training data
///
/// One hour of minute samples gives 0.5, a day gives 0.9, and beyond that the
/// value approaches 0.99 without reaching it.
pub fn data_confidence(data_points: usize) -> f64 {
    let n = data_points as f64;
    if data_points == 0 {
        0.0
    } else if data_points < 60 {
        0.1 + (n / 60.0) * 0.4
    } else if data_points < 1440 {
        0.5 + ((n - 60.0) / 1380.0) * 0.4
    } else {
        MAX_CONFIDENCE - 0.09 * (-(n - 1440.0) / 2160.0).exp()
    }
}

/// In-sample mean absolute percentage error, clipped to [0, 1]
fn in_sample_error(series: &[f64], fitted: &dyn FittedForecast) -> f64 {
    let predicted = match guarded(|| fitted.in_sample()) {
        Ok(values) if values.len() == series.len() => values,
        _ => return FALLBACK_ERROR_METRIC,
    };

    let errors: Vec<f64> = series
        .iter()
        .zip(predicted.iter())
        .filter(|(actual, _)| **actual > ERROR_EPSILON)
        .map(|(actual, p)| ((actual - p) / actual).abs())
        .collect();

    if errors.is_empty() {
        return FALLBACK_ERROR_METRIC;
    }

    let mape = errors.iter().sum::<f64>() / errors.len() as f64;
    if mape.is_finite() {
        mape.clamp(0.0, 1.0)
    } else {
        1.0
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
