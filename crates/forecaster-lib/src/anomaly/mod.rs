//! Anomaly detection for (latency, error rate) observations
//!
//! This module provides:
//! - A per-node sliding window model that refits once it holds enough samples
//! - An isolation forest engine behind the opaque [`OutlierDetector`] trait

mod isolation_forest;
mod model;

pub use isolation_forest::{average_path_length, IsolationForest};
pub use model::{AnomalyModel, AnomalyVerdict};

use crate::error::ModelError;

/// Raw verdict for one point from a fitted detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierScore {
    pub is_outlier: bool,
    /// More negative means more anomalous
    pub raw_score: f64,
}

/// Trainable outlier detector over two-feature points
pub trait OutlierDetector: Send + Sync {
    fn fit(&self, samples: &[[f64; 2]]) -> Result<Box<dyn FittedDetector>, ModelError>;
}

/// A fitted outlier detector
pub trait FittedDetector: Send + Sync {
    fn score(&self, point: [f64; 2]) -> Result<OutlierScore, ModelError>;
}
