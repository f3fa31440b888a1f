//! HTTP 5xx evidence collector.

use tarka_core::model::evidence::Http5xxResult;
use tarka_core::Investigation;
use tarka_providers::Providers;

use super::pod_baseline::collect_pod_baseline;
use super::require_pod_target;

pub async fn collect_http_5xx(providers: &Providers, inv: &mut Investigation) {
    inv.target.playbook = Some("http_5xx".to_string());
    let start = inv.time_window.start_time;
    let end = inv.time_window.end_time;

    // Optional K8s context when the alert is also pod-scoped.
    if require_pod_target(inv, "http_5xx").is_some() {
        collect_pod_baseline(providers, inv, 20).await;
    }

    if inv.evidence.metrics.http_5xx.is_none() {
        match providers
            .prom
            .query_http_5xx_generic(&inv.alert.labels, start, end)
            .await
        {
            Ok((series, query_used)) => {
                inv.evidence.metrics.http_5xx = Some(Http5xxResult {
                    series,
                    query_used,
                    error: None,
                });
            }
            Err(e) => {
                inv.push_error("Failed to query http 5xx metrics", &e);
                inv.evidence.metrics.http_5xx = Some(Http5xxResult {
                    series: Vec::new(),
                    query_used: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }
}
