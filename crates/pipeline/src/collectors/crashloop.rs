//! Crashloop evidence collector.
//!
//! Builds on the pod baseline with crashloop-specific enrichment:
//! previous container logs (K8s API, not the log backend), probe-failure
//! detection from events, and crash timing from container statuses.

use serde_json::json;

use tarka_core::model::evidence::LogEntry;
use tarka_core::Investigation;
use tarka_providers::Providers;

use super::log_parser::parse_log_entries;
use super::pod_baseline::collect_pod_baseline;
use super::{container_from_investigation, require_pod_target};

pub async fn collect_crashloop_evidence(providers: &Providers, inv: &mut Investigation) {
    inv.target.playbook = Some("crashloop".to_string());

    let Some((pod, namespace)) = require_pod_target(inv, "crashloop") else {
        return;
    };

    // Crashloops generate many BackOff/Unhealthy events, so the baseline
    // runs with a raised events limit.
    collect_pod_baseline(providers, inv, 50).await;

    let container = container_from_investigation(inv);

    fetch_previous_logs(providers, inv, &pod, &namespace, container.as_deref()).await;
    parse_previous_logs(inv);
    detect_probe_failures(inv);
    extract_crash_timing(inv, container.as_deref());
}

/// Logs from the previous terminated container instance.
async fn fetch_previous_logs(
    providers: &Providers,
    inv: &mut Investigation,
    pod: &str,
    namespace: &str,
    container: Option<&str>,
) {
    match providers
        .k8s
        .read_pod_log(pod, namespace, container, true, 200)
        .await
    {
        Ok(prev) if !prev.trim().is_empty() => {
            inv.set_meta("previous_container_logs", prev);
        }
        Ok(_) => {}
        Err(e) => inv.push_error("Failed to fetch previous container logs", e),
    }
}

fn parse_previous_logs(inv: &mut Investigation) {
    let Some(raw) = inv.meta_str("previous_container_logs").map(ToString::to_string) else {
        return;
    };
    let entries: Vec<LogEntry> = raw
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| LogEntry { timestamp: None, message: l.to_string() })
        .collect();
    if entries.is_empty() {
        return;
    }
    let parsed = parse_log_entries(&entries, 50);
    if !parsed.parsed_errors.is_empty() {
        match serde_json::to_value(&parsed.parsed_errors) {
            Ok(v) => inv.set_meta("previous_logs_parsed_errors", v),
            Err(e) => inv.push_error("Previous log parsing failed", e),
        }
    }
}

/// Liveness wins over readiness: a failing liveness probe causes the
/// restarts, a failing readiness probe only pulls the pod from endpoints.
fn detect_probe_failures(inv: &mut Investigation) {
    let mut probe_type: Option<&str> = None;
    for ev in &inv.evidence.k8s.pod_events {
        if ev.reason.as_deref() != Some("Unhealthy") {
            continue;
        }
        let message = ev.message.as_deref().unwrap_or("").to_ascii_lowercase();
        if message.contains("liveness") {
            probe_type = Some("liveness");
            break;
        }
        if message.contains("readiness") && probe_type.is_none() {
            probe_type = Some("readiness");
        }
    }
    inv.set_meta("probe_failure_type", probe_type.map_or(serde_json::Value::Null, |p| json!(p)));
}

/// Crash duration (finish − start) from `lastState.terminated`
/// distinguishes instant config/dependency crashes from slow
/// leak/timeout crashes.
fn extract_crash_timing(inv: &mut Investigation, container: Option<&str>) {
    let Some(pod_info) = &inv.evidence.k8s.pod_info else {
        return;
    };
    let statuses = &pod_info.container_statuses;
    if statuses.is_empty() {
        return;
    }

    let target_cs = container
        .and_then(|c| statuses.iter().find(|cs| cs.name == c))
        .or_else(|| statuses.first());
    let Some(cs) = target_cs else { return };
    let Some(last) = &cs.last_state else { return };

    if let (Some(started), Some(finished)) = (last.started_at, last.finished_at) {
        let duration = (finished - started).num_seconds().max(0);
        inv.set_meta("crash_duration_seconds", duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::collections::BTreeMap;
    use tarka_core::model::alert::{Alert, AlertState};
    use tarka_core::model::evidence::{
        ContainerStatusInfo, K8sEventInfo, PodInfo, TerminatedState,
    };
    use tarka_core::model::target::Target;

    fn base_inv() -> Investigation {
        let alert = Alert {
            fingerprint: "fp".to_string(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            starts_at: None,
            ends_at: None,
            generator_url: String::new(),
            state: AlertState::Firing,
        };
        Investigation::new(alert, Target::default(), "1h", Utc::now())
    }

    fn event(reason: &str, message: &str) -> K8sEventInfo {
        K8sEventInfo {
            event_type: Some("Warning".to_string()),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            count: Some(1),
            first_seen: None,
            last_seen: None,
        }
    }

    #[test]
    fn test_probe_detection_liveness_wins() {
        let mut inv = base_inv();
        inv.evidence.k8s.pod_events = vec![
            event("Unhealthy", "Readiness probe failed: 503"),
            event("Unhealthy", "Liveness probe failed: timeout"),
        ];
        detect_probe_failures(&mut inv);
        assert_eq!(inv.meta_str("probe_failure_type"), Some("liveness"));
    }

    #[test]
    fn test_probe_detection_readiness_only() {
        let mut inv = base_inv();
        inv.evidence.k8s.pod_events = vec![event("Unhealthy", "Readiness probe failed")];
        detect_probe_failures(&mut inv);
        assert_eq!(inv.meta_str("probe_failure_type"), Some("readiness"));
    }

    #[test]
    fn test_probe_detection_none() {
        let mut inv = base_inv();
        inv.evidence.k8s.pod_events = vec![event("BackOff", "Back-off restarting")];
        detect_probe_failures(&mut inv);
        assert!(inv.meta.get("probe_failure_type").is_some_and(serde_json::Value::is_null));
    }

    #[test]
    fn test_crash_timing() {
        let mut inv = base_inv();
        let started = Utc::now() - Duration::seconds(95);
        let finished = Utc::now() - Duration::seconds(90);
        inv.evidence.k8s.pod_info = Some(PodInfo {
            name: "p".to_string(),
            namespace: "ns".to_string(),
            phase: None,
            status_reason: None,
            node: None,
            service_account_name: None,
            labels: BTreeMap::new(),
            containers: vec![],
            container_statuses: vec![ContainerStatusInfo {
                name: "app".to_string(),
                ready: false,
                restart_count: 5,
                state: None,
                last_state: Some(TerminatedState {
                    exit_code: Some(1),
                    reason: Some("Error".to_string()),
                    started_at: Some(started),
                    finished_at: Some(finished),
                }),
            }],
            created_at: None,
        });
        extract_crash_timing(&mut inv, Some("app"));
        assert_eq!(
            inv.meta.get("crash_duration_seconds").and_then(serde_json::Value::as_i64),
            Some(5)
        );
    }
}
