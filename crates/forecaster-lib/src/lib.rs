//! Health forecasting library for RPC load balancing
//!
//! This crate provides the core functionality for:
//! - Reading latency and error rates from Prometheus
//! - Per-node latency forecasting with progressive confidence
//! - Sliding-window anomaly detection
//! - Multi-signal health scoring with neutral degradation
//! - Background model retraining and observability

pub mod anomaly;
pub mod capability;
pub mod error;
pub mod forecast;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod registry;
pub mod retrain;
pub mod scorer;
pub mod settings;
pub mod source;

pub use capability::Capability;
pub use error::{ModelError, SettingsError, SourceError};
pub use models::*;
pub use observability::{ForecasterMetrics, StructuredLogger};
pub use orchestrator::{Orchestrator, SERVICE_VERSION};
pub use registry::ModelRegistry;
pub use retrain::RetrainWorker;
pub use scorer::HealthScorer;
pub use settings::ForecasterSettings;
pub use source::{MetricsReader, MetricsSource, PrometheusClient};
