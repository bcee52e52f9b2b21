//! Latency forecasting
//!
//! The per-node [`ForecastModel`] owns training state, confidence estimation,
//! trend classification and retrain policy. The statistical engine behind it
//! is opaque and reached through the [`Forecaster`] trait.

mod holt;
mod model;

pub use holt::HoltForecaster;
pub use model::{
    data_confidence, ForecastModel, ForecastSnapshot, LatencyForecast, ERROR_EPSILON,
    RECENT_WINDOW,
};

use crate::error::ModelError;

/// Point forecast with its uncertainty interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastInterval {
    pub yhat: f64,
    pub lower: f64,
    pub upper: f64,
}

impl ForecastInterval {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Trainable time-series engine
pub trait Forecaster: Send + Sync {
    /// Fit a model on an evenly spaced series (one point per minute)
    fn fit(&self, series: &[f64]) -> Result<Box<dyn FittedForecast>, ModelError>;
}

/// A fitted time-series model
pub trait FittedForecast: Send + Sync {
    /// Forecast `steps` points past the end of the training series
    fn forecast(&self, steps: usize) -> Result<ForecastInterval, ModelError>;

    /// One-step-ahead fitted values aligned with the training series
    fn in_sample(&self) -> Result<Vec<f64>, ModelError>;
}
