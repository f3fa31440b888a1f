//! Prometheus client for range and instant queries.
//!
//! The family-specific helpers encode the PromQL the collectors depend on;
//! all of them are best-effort and bubble errors up for the caller to
//! append to `Investigation.errors`.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use tarka_core::model::evidence::{PromSample, PromSeries};

/// Default Prometheus service URL (internal Kubernetes DNS)
const DEFAULT_PROMETHEUS_URL: &str = "http://prometheus-server.observability.svc.cluster.local:80";

/// Configuration for the Prometheus client
#[derive(Debug, Clone)]
pub struct PromConfig {
    /// Base URL for the Prometheus API
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Range query step
    pub step: String,
}

impl Default for PromConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_PROMETHEUS_URL.to_string(),
            timeout_secs: 30,
            step: "60s".to_string(),
        }
    }
}

impl PromConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("PROMETHEUS_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_PROMETHEUS_URL.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct PromResponse {
    status: String,
    #[serde(default)]
    data: Option<PromData>,
}

#[derive(Debug, Deserialize)]
struct PromData {
    #[serde(default)]
    result: Vec<PromResult>,
}

#[derive(Debug, Deserialize)]
struct PromResult {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    /// Instant queries: `[ts, "value"]`
    #[serde(default)]
    value: Option<(f64, String)>,
    /// Range queries: `[[ts, "value"], ...]`
    #[serde(default)]
    values: Option<Vec<(f64, String)>>,
}

/// Prometheus client for querying metrics.
#[derive(Debug, Clone)]
pub struct PromClient {
    config: PromConfig,
    client: reqwest::Client,
}

impl PromClient {
    #[must_use]
    pub fn new(config: PromConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .expect("reqwest client");
        Self { config, client }
    }

    /// Execute an instant query at `at`.
    pub async fn query_instant(&self, query: &str, at: DateTime<Utc>) -> Result<Vec<PromSample>> {
        let url = format!("{}/api/v1/query", self.config.base_url.trim_end_matches('/'));
        debug!(query = %query, "prometheus instant query");

        let response = self
            .client
            .get(&url)
            .query(&[("query", query), ("time", &at.timestamp().to_string())])
            .send()
            .await
            .context("Failed to send request to Prometheus")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Prometheus query failed with status {status}: {body}");
        }

        let parsed: PromResponse = response
            .json()
            .await
            .context("Failed to parse Prometheus response")?;
        if parsed.status != "success" {
            anyhow::bail!("Prometheus query returned status: {}", parsed.status);
        }

        let mut samples = Vec::new();
        for r in parsed.data.map(|d| d.result).unwrap_or_default() {
            if let Some((ts, value_str)) = r.value {
                let value: f64 = value_str.parse().unwrap_or(0.0);
                samples.push(PromSample {
                    metric: r.metric,
                    value,
                    timestamp: DateTime::from_timestamp(ts as i64, 0),
                });
            }
        }
        Ok(samples)
    }

    /// Execute a range query over `[start, end]`.
    pub async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PromSeries>> {
        let url = format!("{}/api/v1/query_range", self.config.base_url.trim_end_matches('/'));
        debug!(query = %query, %start, %end, "prometheus range query");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("query", query),
                ("start", &start.timestamp().to_string()),
                ("end", &end.timestamp().to_string()),
                ("step", &self.config.step),
            ])
            .send()
            .await
            .context("Failed to send range request to Prometheus")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Prometheus range query failed with status {status}: {body}");
        }

        let parsed: PromResponse = response
            .json()
            .await
            .context("Failed to parse Prometheus range response")?;
        if parsed.status != "success" {
            anyhow::bail!("Prometheus range query returned status: {}", parsed.status);
        }

        let mut series = Vec::new();
        for r in parsed.data.map(|d| d.result).unwrap_or_default() {
            let values = r
                .values
                .unwrap_or_default()
                .into_iter()
                .map(|(ts, v)| (ts, v.parse().unwrap_or(0.0)))
                .collect();
            series.push(PromSeries { metric: r.metric, values });
        }
        Ok(series)
    }

    /// Check Prometheus health.
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/-/healthy", self.config.base_url.trim_end_matches('/'));
        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                tracing::warn!(error = %e, "Prometheus health check failed");
                Ok(false)
            }
        }
    }

    // ---- family query helpers -------------------------------------------

    fn container_clause(container: Option<&str>) -> String {
        container.map_or_else(String::new, |c| format!(",container=\"{c}\""))
    }

    /// Restart rate over the window (per-5m increase).
    pub async fn query_pod_restarts(
        &self,
        namespace: &str,
        pod: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        container: Option<&str>,
    ) -> Result<(Vec<PromSeries>, String)> {
        let cc = Self::container_clause(container);
        let q = format!(
            "increase(kube_pod_container_status_restarts_total{{namespace=\"{namespace}\",pod=\"{pod}\"{cc}}}[5m])"
        );
        Ok((self.query_range(&q, start, end).await?, q))
    }

    /// Pod phase signal (1 for the active phase series).
    pub async fn query_pod_not_healthy(
        &self,
        namespace: &str,
        pod: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(Vec<PromSeries>, String)> {
        let q = format!(
            "kube_pod_status_phase{{namespace=\"{namespace}\",pod=\"{pod}\",phase=~\"Pending|Failed|Unknown\"}} == 1"
        );
        Ok((self.query_range(&q, start, end).await?, q))
    }

    /// CPU usage series plus limit/request scalars (cores).
    pub async fn query_cpu_usage_and_limits(
        &self,
        pod: &str,
        namespace: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        container: Option<&str>,
    ) -> Result<(Vec<PromSeries>, Option<f64>, Option<f64>, String)> {
        let cc = Self::container_clause(container);
        let usage_q = format!(
            "rate(container_cpu_usage_seconds_total{{namespace=\"{namespace}\",pod=\"{pod}\"{cc},container!=\"\",container!=\"POD\"}}[5m])"
        );
        let usage = self.query_range(&usage_q, start, end).await?;

        let limit_q = format!(
            "max(kube_pod_container_resource_limits{{namespace=\"{namespace}\",pod=\"{pod}\"{cc},resource=\"cpu\"}})"
        );
        let request_q = format!(
            "max(kube_pod_container_resource_requests{{namespace=\"{namespace}\",pod=\"{pod}\"{cc},resource=\"cpu\"}})"
        );
        let limit = self.scalar(&limit_q, end).await;
        let request = self.scalar(&request_q, end).await;
        Ok((usage, limit, request, usage_q))
    }

    /// Memory working-set series plus limit/request scalars (bytes).
    pub async fn query_memory_usage_and_limits(
        &self,
        pod: &str,
        namespace: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        container: Option<&str>,
    ) -> Result<(Vec<PromSeries>, Option<f64>, Option<f64>, String)> {
        let cc = Self::container_clause(container);
        let usage_q = format!(
            "container_memory_working_set_bytes{{namespace=\"{namespace}\",pod=\"{pod}\"{cc},container!=\"\",container!=\"POD\"}}"
        );
        let usage = self.query_range(&usage_q, start, end).await?;

        let limit_q = format!(
            "max(kube_pod_container_resource_limits{{namespace=\"{namespace}\",pod=\"{pod}\"{cc},resource=\"memory\"}})"
        );
        let request_q = format!(
            "max(kube_pod_container_resource_requests{{namespace=\"{namespace}\",pod=\"{pod}\"{cc},resource=\"memory\"}})"
        );
        let limit = self.scalar(&limit_q, end).await;
        let request = self.scalar(&request_q, end).await;
        Ok((usage, limit, request, usage_q))
    }

    /// Throttling percentage per `(container, pod, namespace)`.
    pub async fn query_cpu_throttling(
        &self,
        pod: &str,
        namespace: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        container: Option<&str>,
    ) -> Result<(Vec<PromSeries>, String)> {
        let cc = Self::container_clause(container);
        let q = format!(
            "sum by (container, pod, namespace) (increase(container_cpu_cfs_throttled_periods_total{{namespace=\"{namespace}\",pod=\"{pod}\"{cc}}}[5m])) \
             / sum by (container, pod, namespace) (increase(container_cpu_cfs_periods_total{{namespace=\"{namespace}\",pod=\"{pod}\"{cc}}}[5m])) * 100"
        );
        Ok((self.query_range(&q, start, end).await?, q))
    }

    /// Best-effort 5xx rate: probe a small set of common series names and
    /// keep the first candidate that returns data.
    pub async fn query_http_5xx_generic(
        &self,
        labels: &BTreeMap<String, String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(Vec<PromSeries>, Option<String>)> {
        let mut selectors: Vec<String> = Vec::new();
        if let Some(svc) = labels.get("service").filter(|s| !s.is_empty()) {
            selectors.push(format!("service=\"{svc}\""));
        }
        if let Some(job) = labels.get("job").filter(|s| !s.is_empty()) {
            selectors.push(format!("job=\"{job}\""));
        }
        if let Some(ns) = labels.get("namespace").filter(|s| !s.is_empty()) {
            selectors.push(format!("namespace=\"{ns}\""));
        }
        let sel = selectors.join(",");

        let candidates = [
            format!("sum(rate(http_requests_total{{{sel},code=~\"5..\"}}[5m]))"),
            format!("sum(rate(http_server_requests_seconds_count{{{sel},status=~\"5..\"}}[5m]))"),
            format!("sum(rate(nginx_ingress_controller_requests{{{sel},status=~\"5..\"}}[5m]))"),
            format!("sum(rate(envoy_http_downstream_rq_xx{{{sel},envoy_response_code_class=\"5\"}}[5m]))"),
        ];

        for q in candidates {
            match self.query_range(&q, start, end).await {
                Ok(series) if !series.is_empty() => return Ok((series, Some(q))),
                Ok(_) => {}
                Err(e) => debug!(error = %e, query = %q, "5xx candidate failed"),
            }
        }
        Ok((Vec::new(), None))
    }

    /// Instant scalar helper; `None` when the query fails or is empty.
    pub async fn scalar(&self, query: &str, at: DateTime<Utc>) -> Option<f64> {
        match self.query_instant(query, at).await {
            Ok(samples) => samples.first().map(|s| s.value),
            Err(_) => None,
        }
    }

    /// Raw instant query returning the JSON-shaped samples used by the
    /// `promql.instant` tool.
    pub async fn instant_as_value(&self, query: &str, at: DateTime<Utc>, max_series: usize) -> Result<Value> {
        let mut samples = self.query_instant(query, at).await?;
        let truncated = samples.len() > max_series;
        samples.truncate(max_series);
        Ok(serde_json::json!({
            "query": query,
            "result": samples,
            "truncated": truncated,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_config_default() {
        let config = PromConfig::default();
        assert_eq!(config.timeout_secs, 30);
        assert!(!config.base_url.is_empty());
    }

    #[tokio::test]
    async fn test_instant_query_parsing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": {
                    "resultType": "vector",
                    "result": [
                        {"metric": {"pod": "p1"}, "value": [1_700_000_000.0, "3"]}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let client = PromClient::new(PromConfig { base_url: server.uri(), ..Default::default() });
        let samples = client.query_instant("up", Utc::now()).await.unwrap();
        assert_eq!(samples.len(), 1);
        assert!((samples[0].value - 3.0).abs() < f64::EPSILON);
        assert_eq!(samples[0].metric.get("pod").map(String::as_str), Some("p1"));
    }

    #[tokio::test]
    async fn test_range_query_parsing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query_range"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": {
                    "resultType": "matrix",
                    "result": [
                        {"metric": {"container": "app"}, "values": [[1.0, "0.5"], [61.0, "0.7"]]}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let client = PromClient::new(PromConfig { base_url: server.uri(), ..Default::default() });
        let series = client
            .query_range("x", Utc::now() - chrono::Duration::hours(1), Utc::now())
            .await
            .unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].values.len(), 2);
    }

    #[tokio::test]
    async fn test_error_status_bubbles() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "error", "error": "bad query"
            })))
            .mount(&server)
            .await;

        let client = PromClient::new(PromConfig { base_url: server.uri(), ..Default::default() });
        assert!(client.query_instant("up", Utc::now()).await.is_err());
    }
}
