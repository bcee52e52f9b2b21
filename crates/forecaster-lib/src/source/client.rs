//! Prometheus HTTP API client

use super::{normalize_instance, InstantSample, MetricsSource, RangeSeries};
use crate::error::SourceError;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const INSTANT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const RANGE_QUERY_TIMEOUT: Duration = Duration::from_secs(30);
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

const QUERY_PATH: &str = "api/v1/query";
const QUERY_RANGE_PATH: &str = "api/v1/query_range";
const HEALTH_PATH: &str = "-/healthy";

/// Client for the Prometheus query API
#[derive(Debug, Clone)]
pub struct PrometheusClient {
    client: Client,
    base_url: Url,
}

impl PrometheusClient {
    /// Create a client for the Prometheus server at `base_url`
    pub fn new(base_url: &str) -> Result<Self, SourceError> {
        let client = Client::builder()
            .connect_timeout(HEALTH_CHECK_TIMEOUT)
            .build()?;

        let mut base_url = Url::parse(base_url)?;
        // Url::join drops the last path segment unless it ends with a slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn get_api<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
        timeout: Duration,
    ) -> Result<T, SourceError> {
        let url = self.base_url.join(path)?;

        let response = self
            .client
            .get(url)
            .query(params)
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        // Prometheus reports bad queries as 4xx with an error envelope
        let envelope: ApiResponse<T> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => return Err(SourceError::Status(status.as_u16())),
            Err(e) => return Err(SourceError::Decode(e.to_string())),
        };

        if envelope.status != "success" {
            let message = envelope
                .error
                .unwrap_or_else(|| format!("status {}", envelope.status));
            return Err(SourceError::Query(match envelope.error_type {
                Some(kind) => format!("{kind}: {message}"),
                None => message,
            }));
        }
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        envelope
            .data
            .ok_or_else(|| SourceError::Decode("missing data field".to_string()))
    }
}

#[async_trait]
impl MetricsSource for PrometheusClient {
    async fn instant_query(&self, expr: &str) -> Result<Vec<InstantSample>, SourceError> {
        let data: ResultData<VectorResult> = self
            .get_api(QUERY_PATH, &[("query", expr.to_string())], INSTANT_QUERY_TIMEOUT)
            .await?;

        let samples: Vec<InstantSample> = data
            .result
            .into_iter()
            .filter_map(|r| {
                let value = parse_value(&r.value.1)?;
                Some(InstantSample {
                    instance: instance_label(&r.metric),
                    value,
                })
            })
            .collect();

        debug!(samples = samples.len(), "Instant query completed");
        Ok(samples)
    }

    async fn range_query(
        &self,
        expr: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<RangeSeries>, SourceError> {
        let params = [
            ("query", expr.to_string()),
            ("start", start.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("end", end.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("step", format!("{}s", step.as_secs().max(1))),
        ];
        let data: ResultData<MatrixResult> = self
            .get_api(QUERY_RANGE_PATH, &params, RANGE_QUERY_TIMEOUT)
            .await?;

        let series: Vec<RangeSeries> = data
            .result
            .into_iter()
            .map(|r| RangeSeries {
                instance: instance_label(&r.metric),
                points: r
                    .values
                    .iter()
                    .filter_map(|(ts, raw)| Some((timestamp(*ts)?, parse_value(raw)?)))
                    .collect(),
            })
            .collect();

        debug!(series = series.len(), "Range query completed");
        Ok(series)
    }

    async fn is_available(&self) -> bool {
        let url = match self.base_url.join(HEALTH_PATH) {
            Ok(url) => url,
            Err(_) => return false,
        };

        match self.client.get(url).timeout(HEALTH_CHECK_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!(error = %e, "Prometheus health check failed");
                false
            }
        }
    }
}

fn instance_label(metric: &HashMap<String, String>) -> String {
    metric
        .get("instance")
        .map(|i| normalize_instance(i))
        .unwrap_or_default()
}

fn parse_value(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok()
}

fn timestamp(seconds: f64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt((seconds * 1000.0).round() as i64).single()
}

// Prometheus API response types

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    status: String,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
    #[serde(rename = "errorType", default)]
    error_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultData<R> {
    result: Vec<R>,
}

#[derive(Debug, Deserialize)]
struct VectorResult {
    #[serde(default)]
    metric: HashMap<String, String>,
    value: (f64, String),
}

#[derive(Debug, Deserialize)]
struct MatrixResult {
    #[serde(default)]
    metric: HashMap<String, String>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const VECTOR_BODY: &str = r#"{
        "status": "success",
        "data": {
            "resultType": "vector",
            "result": [
                {"metric": {"instance": "host.docker.internal:8081"}, "value": [1700000000.0, "0.012"]},
                {"metric": {"instance": "10.0.0.2:8081"}, "value": [1700000000.0, "NaN"]},
                {"metric": {"instance": "10.0.0.3:8081"}, "value": [1700000000.0, "not-a-number"]}
            ]
        }
    }"#;

    const MATRIX_BODY: &str = r#"{
        "status": "success",
        "data": {
            "resultType": "matrix",
            "result": [
                {"metric": {}, "values": [[1700000000, "0.010"], [1700000060, "0.011"], [1700000120, "0.013"]]}
            ]
        }
    }"#;

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let client = PrometheusClient::new("http://prometheus:9090/prom").unwrap();
        assert_eq!(
            client.base_url().join(QUERY_PATH).unwrap().as_str(),
            "http://prometheus:9090/prom/api/v1/query"
        );
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(matches!(
            PrometheusClient::new("not a url"),
            Err(SourceError::Url(_))
        ));
    }

    #[tokio::test]
    async fn test_instant_query_normalizes_instances() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::UrlEncoded("query".into(), "up".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(VECTOR_BODY)
            .create_async()
            .await;

        let client = PrometheusClient::new(&server.url()).unwrap();
        let samples = client.instant_query("up").await.unwrap();

        mock.assert_async().await;
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].instance, "127.0.0.1:8081");
        assert_eq!(samples[0].value, 0.012);
        assert!(samples[1].value.is_nan());
    }

    #[tokio::test]
    async fn test_range_query_parses_points() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/query_range")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("query".into(), "latency".into()),
                Matcher::UrlEncoded("step".into(), "60s".into()),
                Matcher::UrlEncoded("start".into(), "2023-11-14T22:13:20Z".into()),
            ]))
            .with_status(200)
            .with_body(MATRIX_BODY)
            .create_async()
            .await;

        let client = PrometheusClient::new(&server.url()).unwrap();
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let end = Utc.timestamp_opt(1_700_000_120, 0).unwrap();
        let series = client
            .range_query("latency", start, end, Duration::from_secs(60))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].instance, "");
        assert_eq!(series[0].points.len(), 3);
        assert_eq!(series[0].points[0], (start, 0.010));
        assert_eq!(series[0].points[2], (end, 0.013));
    }

    #[tokio::test]
    async fn test_query_error_envelope() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#)
            .create_async()
            .await;

        let client = PrometheusClient::new(&server.url()).unwrap();
        match client.instant_query("sum(").await {
            Err(SourceError::Query(message)) => assert!(message.contains("parse error")),
            other => panic!("expected query error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_http_error_without_envelope() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("service unavailable")
            .create_async()
            .await;

        let client = PrometheusClient::new(&server.url()).unwrap();
        assert!(matches!(
            client.instant_query("up").await,
            Err(SourceError::Status(503))
        ));
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("{not json")
            .create_async()
            .await;

        let client = PrometheusClient::new(&server.url()).unwrap();
        assert!(matches!(
            client.instant_query("up").await,
            Err(SourceError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_is_available() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/-/healthy")
            .with_status(200)
            .with_body("Prometheus Server is Healthy.")
            .create_async()
            .await;

        let client = PrometheusClient::new(&server.url()).unwrap();
        assert!(client.is_available().await);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        // Port 9 (discard) is closed on test hosts
        let client = PrometheusClient::new("http://127.0.0.1:9").unwrap();
        assert!(!client.is_available().await);
        assert!(matches!(
            client.instant_query("up").await,
            Err(SourceError::Transport(_))
        ));
    }
}
