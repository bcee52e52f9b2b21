//! Double exponential smoothing engine
//!
//! Additive Holt model with level and trend components. The smoothing
//! parameters are picked from a small grid by one-step-ahead squared error,
//! and the prediction interval widens with the horizon using the standard
//! Holt forecast-variance expansion.

use super::{FittedForecast, ForecastInterval, Forecaster};
use crate::error::ModelError;

/// z-score of the central 80% prediction interval
const INTERVAL_Z_80: f64 = 1.2816;

const ALPHA_GRID: &[f64] = &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9];
const BETA_GRID: &[f64] = &[0.01, 0.05, 0.1, 0.2, 0.3];

/// Points used to seed the initial trend estimate
const TREND_SEED_POINTS: usize = 10;

/// Holt linear-trend forecaster
#[derive(Debug, Clone)]
pub struct HoltForecaster {
    interval_z: f64,
}

impl Default for HoltForecaster {
    fn default() -> Self {
        Self {
            interval_z: INTERVAL_Z_80,
        }
    }
}

impl HoltForecaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different interval width (z-score of the two-sided interval)
    pub fn with_interval_z(mut self, z: f64) -> Self {
        self.interval_z = z;
        self
    }
}

impl Forecaster for HoltForecaster {
    fn fit(&self, series: &[f64]) -> Result<Box<dyn FittedForecast>, ModelError> {
        if series.len() < 2 {
            return Err(ModelError::InvalidInput(format!(
                "need at least 2 points, got {}",
                series.len()
            )));
        }
        if series.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::InvalidInput(
                "series contains non-finite values".to_string(),
            ));
        }

        let mut best: Option<SmoothingRun> = None;
        for &alpha in ALPHA_GRID {
            for &beta in BETA_GRID {
                let run = SmoothingRun::execute(series, alpha, beta);
                if best.as_ref().map_or(true, |b| run.sse < b.sse) {
                    best = Some(run);
                }
            }
        }

        let run = best.ok_or_else(|| ModelError::Fit("empty parameter grid".to_string()))?;
        if !run.level.is_finite() || !run.trend.is_finite() {
            return Err(ModelError::Fit("smoothing diverged".to_string()));
        }

        let sigma = (run.sse / (series.len() - 1) as f64).sqrt();

        Ok(Box::new(HoltFit {
            alpha: run.alpha,
            beta: run.beta,
            level: run.level,
            trend: run.trend,
            sigma,
            interval_z: self.interval_z,
            fitted: run.fitted,
        }))
    }
}

/// One pass of the smoothing recursion for a parameter pair
struct SmoothingRun {
    alpha: f64,
    beta: f64,
    level: f64,
    trend: f64,
    sse: f64,
    fitted: Vec<f64>,
}

impl SmoothingRun {
    fn execute(series: &[f64], alpha: f64, beta: f64) -> Self {
        let seed = TREND_SEED_POINTS.min(series.len() - 1);
        let mut level = series[0];
        let mut trend = (series[seed] - series[0]) / seed as f64;

        let mut fitted = Vec::with_capacity(series.len());
        fitted.push(series[0]);
        let mut sse = 0.0;

        for &y in &series[1..] {
            let predicted = level + trend;
            fitted.push(predicted);
            sse += (y - predicted).powi(2);

            let prev_level = level;
            level = alpha * y + (1.0 - alpha) * (level + trend);
            trend = beta * (level - prev_level) + (1.0 - beta) * trend;
        }

        Self {
            alpha,
            beta,
            level,
            trend,
            sse,
            fitted,
        }
    }
}

/// Fitted Holt model state
#[derive(Debug, Clone)]
struct HoltFit {
    alpha: f64,
    beta: f64,
    level: f64,
    trend: f64,
    sigma: f64,
    interval_z: f64,
    fitted: Vec<f64>,
}

impl FittedForecast for HoltFit {
    fn forecast(&self, steps: usize) -> Result<ForecastInterval, ModelError> {
        let h = steps.max(1);
        let yhat = self.level + self.trend * h as f64;

        let variance_factor = 1.0
            + (1..h)
                .map(|j| (self.alpha * (1.0 + j as f64 * self.beta)).powi(2))
                .sum::<f64>();
        let half_width = self.interval_z * self.sigma * variance_factor.sqrt();

        if !yhat.is_finite() || !half_width.is_finite() {
            return Err(ModelError::Inference("non-finite forecast".to_string()));
        }

        Ok(ForecastInterval {
            yhat,
            lower: yhat - half_width,
            upper: yhat + half_width,
        })
    }

    fn in_sample(&self) -> Result<Vec<f64>, ModelError> {
        Ok(self.fitted.clone())
    }
}
