//! Minimal ArgoCD application-status client.

use anyhow::{Context, Result};
use serde_json::{json, Value};

/// Configuration for the ArgoCD client.
#[derive(Debug, Clone)]
pub struct ArgoCdConfig {
    pub base_url: String,
    pub token: String,
    pub timeout_secs: u64,
}

impl ArgoCdConfig {
    /// Build from `ARGOCD_URL` / `ARGOCD_TOKEN`; `None` when unset.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("ARGOCD_URL").ok().filter(|s| !s.trim().is_empty())?;
        let token = std::env::var("ARGOCD_TOKEN").ok().filter(|s| !s.trim().is_empty())?;
        Some(Self { base_url, token, timeout_secs: 15 })
    }
}

/// Client for the ArgoCD applications API.
pub struct ArgoCdClient {
    config: ArgoCdConfig,
    client: reqwest::Client,
}

impl ArgoCdClient {
    #[must_use]
    pub fn new(config: ArgoCdConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .expect("reqwest client");
        Self { config, client }
    }

    /// Sync/health summary for one application.
    pub async fn app_status(&self, app: &str) -> Result<Value> {
        let url = format!(
            "{}/api/v1/applications/{app}",
            self.config.base_url.trim_end_matches('/')
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.config.token)
            .send()
            .await
            .context("Failed to reach ArgoCD")?;

        if !resp.status().is_success() {
            anyhow::bail!("ArgoCD returned status {}", resp.status());
        }
        let raw: Value = resp.json().await.context("Failed to parse ArgoCD response")?;

        Ok(json!({
            "app": app,
            "sync_status": raw.pointer("/status/sync/status"),
            "health_status": raw.pointer("/status/health/status"),
            "revision": raw.pointer("/status/sync/revision"),
            "operation_phase": raw.pointer("/status/operationState/phase"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_app_status_shape() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/applications/payments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": {
                    "sync": {"status": "Synced", "revision": "abc"},
                    "health": {"status": "Degraded"}
                }
            })))
            .mount(&server)
            .await;

        let client = ArgoCdClient::new(ArgoCdConfig {
            base_url: server.uri(),
            token: "t".to_string(),
            timeout_secs: 5,
        });
        let v = client.app_status("payments").await.unwrap();
        assert_eq!(v["sync_status"], "Synced");
        assert_eq!(v["health_status"], "Degraded");
    }
}
