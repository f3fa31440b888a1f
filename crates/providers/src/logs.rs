//! Logs backend client (VictoriaLogs-style HTTP query API).
//!
//! Every fetch returns an envelope with `status`/`reason` instead of
//! failing: `ok` with entries, `empty`, or `unavailable` with a reason.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use tarka_core::model::evidence::LogEntry;

/// Default logs backend URL (internal Kubernetes DNS)
const DEFAULT_LOGS_URL: &str = "http://victorialogs.observability.svc.cluster.local:9428";

/// Configuration for the logs client
#[derive(Debug, Clone)]
pub struct LogsConfig {
    /// Base URL for the logs query API
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Backend label recorded into evidence
    pub backend: String,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LOGS_URL.to_string(),
            timeout_secs: 30,
            backend: "victorialogs".to_string(),
        }
    }
}

impl LogsConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("LOGS_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LOGS_URL.to_string()),
            ..Self::default()
        }
    }
}

/// Result envelope for a log fetch.
#[derive(Debug, Clone)]
pub struct LogsFetchResult {
    pub entries: Vec<LogEntry>,
    /// `ok | empty | unavailable`
    pub status: String,
    pub reason: Option<String>,
    pub backend: String,
    pub query_used: Option<String>,
}

impl LogsFetchResult {
    fn unavailable(backend: &str, reason: &str, query: Option<String>) -> Self {
        Self {
            entries: Vec::new(),
            status: "unavailable".to_string(),
            reason: Some(reason.to_string()),
            backend: backend.to_string(),
            query_used: query,
        }
    }
}

/// Client for querying the logs backend.
#[derive(Debug, Clone)]
pub struct LogsClient {
    config: LogsConfig,
    client: reqwest::Client,
}

impl LogsClient {
    #[must_use]
    pub fn new(config: LogsConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .expect("reqwest client");
        Self { config, client }
    }

    /// Fetch recent logs for a pod over a window, capped at `limit`.
    pub async fn fetch_recent_logs(
        &self,
        pod: &str,
        namespace: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        container: Option<&str>,
        limit: usize,
    ) -> LogsFetchResult {
        let mut query = format!("kubernetes.pod_name:\"{pod}\" AND kubernetes.namespace_name:\"{namespace}\"");
        if let Some(c) = container {
            query.push_str(&format!(" AND kubernetes.container_name:\"{c}\""));
        }

        let url = format!("{}/select/logsql/query", self.config.base_url.trim_end_matches('/'));
        debug!(query = %query, "logs query");

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("query", query.as_str()),
                ("start", &start.to_rfc3339()),
                ("end", &end.to_rfc3339()),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "logs backend unreachable");
                return LogsFetchResult::unavailable(&self.config.backend, "backend_unreachable", Some(query));
            }
        };

        if !resp.status().is_success() {
            let reason = format!("http_{}", resp.status().as_u16());
            return LogsFetchResult::unavailable(&self.config.backend, &reason, Some(query));
        }

        let body = match resp.text().await {
            Ok(b) => b,
            Err(_) => {
                return LogsFetchResult::unavailable(&self.config.backend, "body_read_failed", Some(query));
            }
        };

        // The query endpoint streams newline-delimited JSON objects.
        let mut entries = Vec::new();
        for line in body.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Ok(v) = serde_json::from_str::<Value>(line) {
                let message = v
                    .get("_msg")
                    .or_else(|| v.get("message"))
                    .or_else(|| v.get("msg"))
                    .or_else(|| v.get("log"))
                    .and_then(Value::as_str)
                    .unwrap_or(line)
                    .to_string();
                let timestamp = v
                    .get("_time")
                    .or_else(|| v.get("timestamp"))
                    .or_else(|| v.get("time"))
                    .and_then(Value::as_str)
                    .map(ToString::to_string);
                entries.push(LogEntry { timestamp, message });
            } else {
                entries.push(LogEntry { timestamp: None, message: line.to_string() });
            }
            if entries.len() >= limit {
                break;
            }
        }

        let status = if entries.is_empty() { "empty" } else { "ok" };
        LogsFetchResult {
            entries,
            status: status.to_string(),
            reason: if status == "empty" { Some("no_entries_in_window".to_string()) } else { None },
            backend: self.config.backend.clone(),
            query_used: Some(query),
        }
    }

    /// Historical fetch keyed by a pod-name prefix, for TTL-deleted pods.
    pub async fn fetch_logs_by_pod_prefix(
        &self,
        pod_prefix: &str,
        namespace: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> LogsFetchResult {
        let query = format!(
            "kubernetes.pod_name:\"{pod_prefix}\"* AND kubernetes.namespace_name:\"{namespace}\""
        );
        let url = format!("{}/select/logsql/query", self.config.base_url.trim_end_matches('/'));

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("query", query.as_str()),
                ("start", &start.to_rfc3339()),
                ("end", &end.to_rfc3339()),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await;

        match resp {
            Ok(r) if r.status().is_success() => {
                let body = r.text().await.unwrap_or_default();
                let mut entries = Vec::new();
                for line in body.lines().filter(|l| !l.trim().is_empty()) {
                    if let Ok(v) = serde_json::from_str::<Value>(line) {
                        entries.push(LogEntry {
                            timestamp: v.get("_time").and_then(Value::as_str).map(ToString::to_string),
                            message: v
                                .get("_msg")
                                .and_then(Value::as_str)
                                .unwrap_or(line)
                                .to_string(),
                        });
                    }
                    if entries.len() >= limit {
                        break;
                    }
                }
                let status = if entries.is_empty() { "empty" } else { "ok" };
                LogsFetchResult {
                    entries,
                    status: status.to_string(),
                    reason: None,
                    backend: self.config.backend.clone(),
                    query_used: Some(query),
                }
            }
            Ok(r) => {
                let reason = format!("http_{}", r.status().as_u16());
                LogsFetchResult::unavailable(&self.config.backend, &reason, Some(query))
            }
            Err(_) => LogsFetchResult::unavailable(&self.config.backend, "backend_unreachable", Some(query)),
        }
    }

    /// Check logs backend health.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.config.base_url.trim_end_matches('/'));
        matches!(self.client.get(&url).send().await, Ok(r) if r.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_parses_ndjson() {
        let server = MockServer::start().await;
        let body = concat!(
            "{\"_time\":\"2026-01-02T03:04:05Z\",\"_msg\":\"ERROR boom\"}\n",
            "{\"_time\":\"2026-01-02T03:04:06Z\",\"_msg\":\"ok line\"}\n",
        );
        Mock::given(method("GET"))
            .and(path("/select/logsql/query"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let client = LogsClient::new(LogsConfig { base_url: server.uri(), ..Default::default() });
        let res = client
            .fetch_recent_logs("p1", "ns", Utc::now() - chrono::Duration::hours(1), Utc::now(), None, 400)
            .await;
        assert_eq!(res.status, "ok");
        assert_eq!(res.entries.len(), 2);
        assert_eq!(res.entries[0].message, "ERROR boom");
    }

    #[tokio::test]
    async fn test_empty_and_unavailable_envelopes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/select/logsql/query"))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .mount(&server)
            .await;

        let client = LogsClient::new(LogsConfig { base_url: server.uri(), ..Default::default() });
        let res = client
            .fetch_recent_logs("p1", "ns", Utc::now() - chrono::Duration::hours(1), Utc::now(), None, 400)
            .await;
        assert_eq!(res.status, "empty");

        let dead = LogsClient::new(LogsConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 1,
            ..Default::default()
        });
        let res = dead
            .fetch_recent_logs("p1", "ns", Utc::now() - chrono::Duration::hours(1), Utc::now(), None, 400)
            .await;
        assert_eq!(res.status, "unavailable");
        assert_eq!(res.reason.as_deref(), Some("backend_unreachable"));
    }

    #[tokio::test]
    async fn test_limit_cap() {
        let server = MockServer::start().await;
        let body: String = (0..50)
            .map(|i| format!("{{\"_msg\":\"line {i}\"}}\n"))
            .collect();
        Mock::given(method("GET"))
            .and(path("/select/logsql/query"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let client = LogsClient::new(LogsConfig { base_url: server.uri(), ..Default::default() });
        let res = client
            .fetch_recent_logs("p1", "ns", Utc::now() - chrono::Duration::hours(1), Utc::now(), None, 10)
            .await;
        assert_eq!(res.entries.len(), 10);
    }
}
