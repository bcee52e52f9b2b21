//! Error types shared by the forecaster components

use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;

/// Failures raised by an opaque forecast or outlier engine
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("fit failed: {0}")]
    Fit(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("engine panicked: {0}")]
    Panicked(String),
}

/// Failures talking to the metrics source
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("metrics source returned HTTP {0}")]
    Status(u16),

    #[error("query failed: {0}")]
    Query(String),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("metrics source unavailable")]
    Unavailable,
}

/// Rejected configuration values
#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("scoring weights must sum to 1.0, got {0:.3}")]
    WeightsSum(f64),

    #[error("anomaly contamination must be in (0, 0.5], got {0}")]
    Contamination(f64),

    #[error("anomaly min_samples ({min_samples}) exceeds window capacity ({capacity})")]
    AnomalyWindow { min_samples: usize, capacity: usize },

    #[error("min_data_points must be at least 2, got {0}")]
    MinDataPoints(usize),
}

/// Run an engine call, converting a panic inside it into a `ModelError`
pub(crate) fn guarded<T>(op: impl FnOnce() -> Result<T, ModelError>) -> Result<T, ModelError> {
    match panic::catch_unwind(AssertUnwindSafe(op)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(ModelError::Panicked(message))
        }
    }
}
