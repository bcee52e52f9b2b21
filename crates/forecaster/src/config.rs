//! Service configuration

use anyhow::{Context, Result};
use forecaster_lib::settings::{AnomalySettings, ForecasterSettings, ScoringWeights};
use serde::Deserialize;
use std::time::Duration;

/// Optional configuration file, looked up as `forecaster.{toml,yaml,json,...}`
const CONFIG_FILE: &str = "forecaster";

/// Prefix of environment overrides, e.g. `FORECASTER_API_PORT`
const ENV_PREFIX: &str = "FORECASTER";

/// Service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Port of the scoring API
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Name attached to structured log records
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Prometheus base URL
    #[serde(default = "default_prometheus_url")]
    pub prometheus_url: String,

    /// `job` label of the scraped RPC providers
    #[serde(default = "default_scrape_job")]
    pub scrape_job: String,

    #[serde(default = "default_min_data_points")]
    pub min_data_points: usize,

    #[serde(default = "default_prediction_horizon_minutes")]
    pub prediction_horizon_minutes: u32,

    #[serde(default = "default_retrain_interval_hours")]
    pub retrain_interval_hours: u64,

    /// History fetched for background retraining
    #[serde(default = "default_history_hours")]
    pub history_hours: u64,

    #[serde(default = "default_weight_latency")]
    pub weight_latency: f64,

    #[serde(default = "default_weight_error")]
    pub weight_error: f64,

    #[serde(default = "default_weight_trend")]
    pub weight_trend: f64,

    #[serde(default = "default_weight_anomaly")]
    pub weight_anomaly: f64,

    /// Exponential decay applied to latency in seconds
    #[serde(default = "default_latency_sensitivity")]
    pub latency_sensitivity: f64,

    #[serde(default = "default_anomaly_contamination")]
    pub anomaly_contamination: f64,

    #[serde(default = "default_anomaly_window_size")]
    pub anomaly_window_size: usize,

    #[serde(default = "default_anomaly_min_samples")]
    pub anomaly_min_samples: usize,

    /// Pause between nodes in a background retrain job
    #[serde(default = "default_retrain_delay_ms")]
    pub retrain_delay_ms: u64,

    #[serde(default = "default_retrain_queue_capacity")]
    pub retrain_queue_capacity: usize,
}

fn default_api_port() -> u16 {
    8000
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "health-forecaster".to_string())
}

fn default_prometheus_url() -> String {
    "http://localhost:9090".to_string()
}

fn default_scrape_job() -> String {
    "rpc_provider".to_string()
}

fn default_min_data_points() -> usize {
    60
}

fn default_prediction_horizon_minutes() -> u32 {
    5
}

fn default_retrain_interval_hours() -> u64 {
    6
}

fn default_history_hours() -> u64 {
    24
}

fn default_weight_latency() -> f64 {
    0.35
}

fn default_weight_error() -> f64 {
    0.25
}

fn default_weight_trend() -> f64 {
    0.25
}

fn default_weight_anomaly() -> f64 {
    0.15
}

fn default_latency_sensitivity() -> f64 {
    20.0
}

fn default_anomaly_contamination() -> f64 {
    0.1
}

fn default_anomaly_window_size() -> usize {
    100
}

fn default_anomaly_min_samples() -> usize {
    20
}

fn default_retrain_delay_ms() -> u64 {
    1000
}

fn default_retrain_queue_capacity() -> usize {
    64
}

impl ServiceConfig {
    /// Load configuration from the optional config file and the environment
    pub fn load() -> Result<Self> {
        Self::from_builder(
            ::config::Config::builder()
                .add_source(::config::File::with_name(CONFIG_FILE).required(false))
                .add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true)),
        )
    }

    fn from_builder(
        builder: ::config::ConfigBuilder<::config::builder::DefaultState>,
    ) -> Result<Self> {
        let config = builder.build().context("Failed to read configuration")?;
        config
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// Library settings, validated
    pub fn to_settings(&self) -> Result<ForecasterSettings> {
        let settings = ForecasterSettings {
            instance_name: self.instance_name.clone(),
            scrape_job: self.scrape_job.clone(),
            min_data_points: self.min_data_points,
            prediction_horizon_minutes: self.prediction_horizon_minutes,
            retrain_interval: Duration::from_secs(self.retrain_interval_hours * 3600),
            history_window: Duration::from_secs(self.history_hours * 3600),
            weights: ScoringWeights {
                latency: self.weight_latency,
                error: self.weight_error,
                trend: self.weight_trend,
                anomaly: self.weight_anomaly,
            },
            latency_sensitivity: self.latency_sensitivity,
            anomaly: AnomalySettings {
                contamination: self.anomaly_contamination,
                window_capacity: self.anomaly_window_size,
                min_samples: self.anomaly_min_samples,
                ..AnomalySettings::default()
            },
            retrain_delay: Duration::from_millis(self.retrain_delay_ms),
            retrain_queue_capacity: self.retrain_queue_capacity,
        };

        settings.validate().context("Invalid forecaster settings")?;
        Ok(settings)
    }
}
