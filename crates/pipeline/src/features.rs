//! Feature extraction: fold evidence into a compact record.
//!
//! Deterministic and pure over the investigation; the diagnostic modules
//! and the RCA decide node consume features, never raw evidence.

use tarka_core::family::detect_family;
use tarka_core::model::analysis::{
    Features, K8sFeatures, LogFeatures, MetricFeatures, QualityFeatures,
};
use tarka_core::model::evidence::{ContainerState, PromSeries};
use tarka_core::Investigation;

/// Usage within this fraction of the limit counts as "near limit".
const NEAR_LIMIT_RATIO: f64 = 0.90;

fn series_values(series: &[PromSeries]) -> Vec<f64> {
    let mut out = Vec::new();
    for s in series {
        out.extend(s.values.iter().map(|(_, v)| *v));
    }
    out
}

fn percentile(values: &mut Vec<f64>, p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((values.len() - 1) as f64 * p).round() as usize;
    values.get(idx).copied()
}

fn max_value(series: &[PromSeries]) -> Option<f64> {
    series_values(series).into_iter().fold(None, |acc, v| {
        Some(acc.map_or(v, |a: f64| a.max(v)))
    })
}

/// Compute the feature record from gathered evidence.
#[must_use]
pub fn extract_features(inv: &Investigation) -> Features {
    let family = detect_family(&inv.alert.labels);

    // --- K8s features
    let mut k8s = K8sFeatures::default();
    if let Some(pod_info) = &inv.evidence.k8s.pod_info {
        for cs in &pod_info.container_statuses {
            match &cs.state {
                Some(ContainerState::Waiting { reason: Some(r), .. }) if k8s.waiting_reason.is_none() => {
                    k8s.waiting_reason = Some(r.clone());
                }
                Some(ContainerState::Terminated(t)) => {
                    if t.reason.as_deref() == Some("OOMKilled") {
                        k8s.oom_killed = true;
                    }
                }
                _ => {}
            }
            if let Some(last) = &cs.last_state {
                if last.reason.as_deref() == Some("OOMKilled") {
                    k8s.oom_killed = true;
                }
            }
        }
        if pod_info.status_reason.as_deref() == Some("Evicted") {
            k8s.evicted = true;
        }
    }
    for ev in &inv.evidence.k8s.pod_events {
        if ev.reason.as_deref() == Some("OOMKilling") {
            k8s.oom_killed = true;
        }
        if ev.reason.as_deref() == Some("Evicted") {
            k8s.evicted = true;
        }
    }
    if let Some(restarts) = &inv.evidence.metrics.restart_data {
        k8s.restart_rate_5m_max = max_value(&restarts.series);
    }
    k8s.probe_failure_type = inv.meta_str("probe_failure_type").map(ToString::to_string);
    k8s.crash_duration_seconds = inv
        .meta
        .get("crash_duration_seconds")
        .and_then(serde_json::Value::as_i64);

    // --- metric features
    let mut metrics = MetricFeatures::default();
    if let Some(throttling) = &inv.evidence.metrics.throttling_data {
        let mut vals = series_values(&throttling.series);
        metrics.cpu_throttle_p95_pct = percentile(&mut vals, 0.95);
    }
    if let Some(cpu) = &inv.evidence.metrics.cpu_metrics {
        if let Some(limit) = cpu.limit.filter(|l| *l > 0.0) {
            let mut vals = series_values(&cpu.usage);
            if let Some(p95) = percentile(&mut vals, 0.95) {
                metrics.cpu_near_limit = Some(p95 >= limit * NEAR_LIMIT_RATIO);
            }
        }
    }
    if let Some(mem) = &inv.evidence.metrics.memory_metrics {
        let mut vals = series_values(&mem.usage);
        let p95 = percentile(&mut vals, 0.95);
        metrics.memory_usage_p95_bytes = p95;
        if let (Some(limit), Some(p95)) = (mem.limit.filter(|l| *l > 0.0), p95) {
            metrics.memory_near_limit = Some(p95 >= limit * NEAR_LIMIT_RATIO);
        }
    }
    if let Some(h) = &inv.evidence.metrics.http_5xx {
        let mut vals = series_values(&h.series);
        metrics.http_5xx_rate_p95 = percentile(&mut vals, 0.95);
    }

    // --- log features
    let parse_meta = inv.evidence.logs.parsing_metadata.clone().unwrap_or_default();
    let logs = LogFeatures {
        status: inv.evidence.logs.logs_status.clone(),
        error_count: parse_meta.error_count,
        fatal_count: parse_meta.fatal_count,
        exception_count: parse_meta.exception_count,
    };

    // --- quality
    let quality = assess_quality(inv, &k8s, &logs);

    Features {
        family: Some(family),
        k8s,
        metrics,
        logs,
        quality,
    }
}

/// Evidence-quality assessment consumed by the RCA decide node:
/// which inputs exist, which are missing, and whether they disagree.
fn assess_quality(inv: &Investigation, k8s: &K8sFeatures, logs: &LogFeatures) -> QualityFeatures {
    let mut missing: Vec<String> = Vec::new();
    let mut contradictions: Vec<String> = Vec::new();

    let has_k8s = inv.evidence.k8s.pod_info.is_some() || inv.evidence.k8s.rollout_status.is_some();
    if !has_k8s {
        missing.push("k8s_context".to_string());
    }
    let has_metrics = inv.evidence.metrics.restart_data.is_some()
        || inv.evidence.metrics.cpu_metrics.is_some()
        || inv.evidence.metrics.memory_metrics.is_some()
        || inv.evidence.metrics.prom_baseline.is_some()
        || inv.evidence.metrics.http_5xx.is_some();
    if !has_metrics {
        missing.push("metrics".to_string());
    }
    let logs_ok = logs.status.as_deref() == Some("ok");
    if !logs_ok && inv.target.has_pod_identity() {
        missing.push("logs".to_string());
    }

    // OOM alert without K8s corroboration is the classic contradiction.
    if tarka_core::family::detect_family(&inv.alert.labels) == tarka_core::Family::OomKilled
        && has_k8s
        && !k8s.oom_killed
    {
        contradictions.push("oom_alert_without_k8s_oom_evidence".to_string());
    }
    if k8s.waiting_reason.as_deref() == Some("CrashLoopBackOff")
        && k8s.restart_rate_5m_max.is_some_and(|r| r < 0.5)
    {
        contradictions.push("crashloop_reason_without_restart_rate".to_string());
    }

    let present = [has_k8s, has_metrics, logs_ok].iter().filter(|x| **x).count();
    let evidence_quality = if !contradictions.is_empty() {
        "low"
    } else {
        match present {
            3 => "high",
            2 => "medium",
            _ => "low",
        }
    };

    QualityFeatures {
        evidence_quality: evidence_quality.to_string(),
        missing_inputs: missing,
        contradiction_flags: contradictions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tarka_core::model::alert::{Alert, AlertState};
    use tarka_core::model::evidence::{
        ContainerStatusInfo, PodInfo, RangeResult, TerminatedState, UsageAndLimits,
    };
    use tarka_core::model::target::Target;

    fn inv_with_alertname(name: &str) -> Investigation {
        let mut labels = BTreeMap::new();
        labels.insert("alertname".to_string(), name.to_string());
        let alert = Alert {
            fingerprint: "fp".to_string(),
            labels,
            annotations: BTreeMap::new(),
            starts_at: None,
            ends_at: None,
            generator_url: String::new(),
            state: AlertState::Firing,
        };
        Investigation::new(alert, Target::default(), "1h", Utc::now())
    }

    fn series(values: &[f64]) -> Vec<PromSeries> {
        vec![PromSeries {
            metric: BTreeMap::new(),
            values: values.iter().enumerate().map(|(i, v)| (i as f64, *v)).collect(),
        }]
    }

    #[test]
    fn test_waiting_reason_and_restart_rate() {
        let mut inv = inv_with_alertname("CrashLoopBackOff");
        inv.evidence.k8s.pod_info = Some(PodInfo {
            name: "p".to_string(),
            namespace: "ns".to_string(),
            phase: Some("Running".to_string()),
            status_reason: None,
            node: None,
            service_account_name: None,
            labels: BTreeMap::new(),
            containers: vec![],
            container_statuses: vec![ContainerStatusInfo {
                name: "app".to_string(),
                ready: false,
                restart_count: 9,
                state: Some(ContainerState::Waiting {
                    reason: Some("CrashLoopBackOff".to_string()),
                    message: None,
                }),
                last_state: None,
            }],
            created_at: None,
        });
        inv.evidence.metrics.restart_data = Some(RangeResult {
            series: series(&[0.0, 2.0, 4.0]),
            query_used: None,
        });
        let f = extract_features(&inv);
        assert_eq!(f.k8s.waiting_reason.as_deref(), Some("CrashLoopBackOff"));
        assert_eq!(f.k8s.restart_rate_5m_max, Some(4.0));
    }

    #[test]
    fn test_oom_from_last_state() {
        let mut inv = inv_with_alertname("KubernetesContainerOomKiller");
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
                ready: true,
                restart_count: 1,
                state: None,
                last_state: Some(TerminatedState {
                    exit_code: Some(137),
                    reason: Some("OOMKilled".to_string()),
                    started_at: None,
                    finished_at: None,
                }),
            }],
            created_at: None,
        });
        let f = extract_features(&inv);
        assert!(f.k8s.oom_killed);
    }

    #[test]
    fn test_near_limit_flags() {
        let mut inv = inv_with_alertname("CPUThrottlingHigh");
        inv.evidence.metrics.cpu_metrics = Some(UsageAndLimits {
            usage: series(&[0.95, 0.96, 0.97]),
            limit: Some(1.0),
            request: Some(0.5),
            query_used: None,
        });
        inv.evidence.metrics.memory_metrics = Some(UsageAndLimits {
            usage: series(&[100.0, 120.0]),
            limit: Some(1000.0),
            request: None,
            query_used: None,
        });
        let f = extract_features(&inv);
        assert_eq!(f.metrics.cpu_near_limit, Some(true));
        assert_eq!(f.metrics.memory_near_limit, Some(false));
    }

    #[test]
    fn test_oom_contradiction_lowers_quality() {
        let mut inv = inv_with_alertname("KubernetesContainerOomKiller");
        inv.evidence.k8s.pod_info = Some(PodInfo {
            name: "p".to_string(),
            namespace: "ns".to_string(),
            phase: Some("Running".to_string()),
            status_reason: None,
            node: None,
            service_account_name: None,
            labels: BTreeMap::new(),
            containers: vec![],
            container_statuses: vec![],
            created_at: None,
        });
        let f = extract_features(&inv);
        assert_eq!(f.quality.evidence_quality, "low");
        assert!(f
            .quality
            .contradiction_flags
            .contains(&"oom_alert_without_k8s_oom_evidence".to_string()));
    }

    #[test]
    fn test_missing_inputs_tracked() {
        let inv = inv_with_alertname("SomethingNovel");
        let f = extract_features(&inv);
        assert!(f.quality.missing_inputs.contains(&"k8s_context".to_string()));
        assert!(f.quality.missing_inputs.contains(&"metrics".to_string()));
        assert_eq!(f.quality.evidence_quality, "low");
    }
}
