//! End-to-end pipeline tests against mock Prometheus/logs backends.
//!
//! The Kubernetes client has no cluster to talk to in these tests; the
//! pipeline must degrade to best-effort evidence with errors recorded,
//! never fail.

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tarka_pipeline::investigate::{run_investigation, InvestigateOptions};
use tarka_pipeline::render_report;
use tarka_providers::{
    aws::AwsClients, logs::LogsConfig, prom::PromConfig, K8sClient, LogsClient, PromClient,
    Providers,
};

async fn providers_with(prom_url: &str, logs_url: &str) -> Providers {
    Providers {
        prom: Arc::new(PromClient::new(PromConfig {
            base_url: prom_url.to_string(),
            ..PromConfig::default()
        })),
        k8s: Arc::new(K8sClient::new()),
        logs: Arc::new(LogsClient::new(LogsConfig {
            base_url: logs_url.to_string(),
            timeout_secs: 2,
            ..LogsConfig::default()
        })),
        aws: Arc::new(AwsClients::from_env().await),
        github: None,
        argocd: None,
    }
}

fn prom_range_body() -> serde_json::Value {
    json!({
        "status": "success",
        "data": {
            "resultType": "matrix",
            "result": [
                {"metric": {"container": "app"}, "values": [[1.0, "1"], [300.0, "4"]]}
            ]
        }
    })
}

fn prom_instant_body() -> serde_json::Value {
    json!({
        "status": "success",
        "data": {"resultType": "vector", "result": []}
    })
}

#[tokio::test]
async fn test_crashloop_investigation_produces_verdict_and_report() {
    let prom = MockServer::start().await;
    let logs = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/query_range"))
        .respond_with(ResponseTemplate::new(200).set_body_json(prom_range_body()))
        .mount(&prom)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(prom_instant_body()))
        .mount(&prom)
        .await;
    Mock::given(method("GET"))
        .and(path("/select/logsql/query"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "{\"_time\":\"2026-01-02T03:04:05Z\",\"_msg\":\"FATAL could not connect to db\"}\n{\"_msg\":\"startup banner\"}\n",
        ))
        .mount(&logs)
        .await;

    let providers = providers_with(&prom.uri(), &logs.uri()).await;
    let raw = json!({
        "labels": {
            "alertname": "CrashLoopBackOff",
            "pod": "api-1",
            "namespace": "prod",
            "cluster": "c1"
        },
        "startsAt": "2026-01-02T03:00:00Z",
        "fingerprint": "fp-e2e"
    });

    let inv = run_investigation(&providers, &raw, None, &InvestigateOptions::new("1h")).await;

    // Target and family resolved.
    assert_eq!(inv.target.pod.as_deref(), Some("api-1"));
    let features = inv.analysis.features.as_ref().expect("features");
    assert_eq!(features.family.map(|f| f.as_str()), Some("crashloop"));

    // Metrics and logs evidence landed; the K8s failure was recorded, not
    // raised.
    assert!(inv.evidence.metrics.restart_data.is_some());
    assert_eq!(inv.evidence.logs.logs_status.as_deref(), Some("ok"));
    assert_eq!(inv.evidence.logs.parsed_errors.len(), 1);
    assert!(inv.errors.iter().any(|e| e.contains("K8s context")));

    // Verdict + scores rendered.
    let verdict = inv.analysis.verdict.as_ref().expect("verdict");
    assert!(!verdict.one_liner.is_empty());
    assert!(inv.analysis.scores.is_some());
    assert!(!inv.analysis.hypotheses.is_empty());

    // Report carries the actionable log snippet, not the banner.
    let md = render_report(&inv);
    assert!(md.contains("FATAL could not connect to db"));
    assert!(md.contains("# CrashLoopBackOff: api-1"));
}

#[tokio::test]
async fn test_job_failure_blocked_mode_when_pods_and_history_gone() {
    let prom = MockServer::start().await;
    let logs = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(prom_instant_body()))
        .mount(&prom)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/query_range"))
        .respond_with(ResponseTemplate::new(200).set_body_json(prom_range_body()))
        .mount(&prom)
        .await;
    // Historical fallback finds nothing either.
    Mock::given(method("GET"))
        .and(path("/select/logsql/query"))
        .respond_with(ResponseTemplate::new(200).set_body_string(""))
        .mount(&logs)
        .await;

    let providers = providers_with(&prom.uri(), &logs.uri()).await;
    let raw = json!({
        "labels": {
            "alertname": "KubeJobFailed",
            "job_name": "batch-etl",
            "namespace": "batch",
            "job": "kube-state-metrics",
            "pod": "ksm-1"
        },
        "startsAt": "2026-01-02T03:00:00Z",
        "fingerprint": "fp-job"
    });

    let inv = run_investigation(&providers, &raw, None, &InvestigateOptions::new("1h")).await;

    // Job identity from job_name, never from the scrape labels.
    assert_eq!(inv.target.workload_kind.as_deref(), Some("Job"));
    assert_eq!(inv.target.workload_name.as_deref(), Some("batch-etl"));
    assert!(inv.target.service.is_none());

    // No pods + empty fallback => blocked mode.
    assert_eq!(inv.meta_str("blocked_mode"), Some("job_pods_not_found"));
    assert!(inv.errors.iter().any(|e| e.contains("No pods found for Job batch-etl")));

    // Still produces a full verdict for the report.
    assert!(inv.analysis.verdict.is_some());
}

#[tokio::test]
async fn test_generic_nonpod_alert_runs_up_skeleton() {
    let prom = MockServer::start().await;
    let logs = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": {"resultType": "vector", "result": [
                {"metric": {"job": "api"}, "value": [1.0, "0"]}
            ]}
        })))
        .mount(&prom)
        .await;

    let providers = providers_with(&prom.uri(), &logs.uri()).await;
    let raw = json!({
        "labels": {"alertname": "SomethingNovel", "job": "api", "instance": "10.0.0.5:9100"},
        "startsAt": "2026-01-02T03:00:00Z"
    });

    let inv = run_investigation(&providers, &raw, None, &InvestigateOptions::new("1h")).await;
    let baseline = inv.evidence.metrics.prom_baseline.as_ref().expect("baseline");
    assert!(baseline.checks.contains_key("up_job_instance"));
    assert!(baseline.queries_used.contains_key("up_job_instance"));
}
