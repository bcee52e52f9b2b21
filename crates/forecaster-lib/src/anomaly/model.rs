//! Per-node sliding window anomaly model

use super::{FittedDetector, OutlierDetector};
use crate::capability::Capability;
use crate::error::guarded;
use crate::models::{NodeId, Observation};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error};

/// Offset applied to the negated raw score before clamping to [0, 1]
const SCORE_OFFSET: f64 = 0.3;

/// Anomaly classification of one observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalyVerdict {
    pub is_anomaly: bool,
    /// 0 for normal up to 1 for highly anomalous
    pub anomaly_score: f64,
}

impl AnomalyVerdict {
    /// Returned while the detector is untrained, missing or failing
    pub const NORMAL: AnomalyVerdict = AnomalyVerdict {
        is_anomaly: false,
        anomaly_score: 0.0,
    };
}

struct AnomalyState {
    window: VecDeque<Observation>,
    fitted: Option<Box<dyn FittedDetector>>,
}

/// Outlier model over a bounded window of recent observations
pub struct AnomalyModel {
    node: NodeId,
    detector: Capability<Arc<dyn OutlierDetector>>,
    capacity: usize,
    min_samples: usize,
    state: Mutex<AnomalyState>,
}

impl AnomalyModel {
    pub fn new(
        node: impl Into<NodeId>,
        detector: Capability<Arc<dyn OutlierDetector>>,
        capacity: usize,
        min_samples: usize,
    ) -> Self {
        Self {
            node: node.into(),
            detector,
            capacity,
            min_samples,
            state: Mutex::new(AnomalyState {
                window: VecDeque::with_capacity(capacity),
                fitted: None,
            }),
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    fn lock_state(&self) -> MutexGuard<'_, AnomalyState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record an observation and refit once the window holds `min_samples`
    ///
    /// Every qualifying addition refits from scratch on the whole window. A
    /// failed refit keeps the previously fitted detector.
    pub fn add_observation(&self, latency: f64, error_rate: f64) {
        let mut state = self.lock_state();

        state.window.push_back(Observation::now(latency, error_rate));
        while state.window.len() > self.capacity {
            state.window.pop_front();
        }

        if state.window.len() < self.min_samples {
            return;
        }

        let Some(detector) = self.detector.as_available() else {
            return;
        };

        let samples: Vec<[f64; 2]> = state
            .window
            .iter()
            .map(|o| [o.latency, o.error_rate])
            .collect();

        match guarded(|| detector.fit(&samples)) {
            Ok(fitted) => {
                state.fitted = Some(fitted);
                debug!(node = %self.node, samples = samples.len(), "Anomaly detector refit");
            }
            Err(e) => {
                error!(node = %self.node, error = %e, "Anomaly detector training failed");
            }
        }
    }

    /// Classify a point against the fitted detector
    pub fn classify(&self, latency: f64, error_rate: f64) -> AnomalyVerdict {
        if !self.detector.is_available() {
            return AnomalyVerdict::NORMAL;
        }

        let state = self.lock_state();
        let Some(fitted) = state.fitted.as_ref() else {
            return AnomalyVerdict::NORMAL;
        };

        match guarded(|| fitted.score([latency, error_rate])) {
            Ok(score) => AnomalyVerdict {
                is_anomaly: score.is_outlier,
                anomaly_score: (-score.raw_score - SCORE_OFFSET).clamp(0.0, 1.0),
            },
            Err(e) => {
                error!(node = %self.node, error = %e, "Anomaly detection failed");
                AnomalyVerdict::NORMAL
            }
        }
    }

    pub fn is_trained(&self) -> bool {
        self.lock_state().fitted.is_some()
    }

    pub fn window_len(&self) -> usize {
        self.lock_state().window.len()
    }
}
