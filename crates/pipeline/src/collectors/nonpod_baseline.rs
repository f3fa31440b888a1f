//! Shared non-pod baseline evidence collector.
//!
//! Never assumes pod identity exists; never emits "missing pod target"
//! errors. Infers workload identity from labels, fetches rollout status
//! (with a kube-state-metrics fallback), and runs a small `up/down`
//! skeleton of instant PromQL checks.

use std::collections::BTreeMap;

use tarka_core::model::evidence::{PromBaseline, RolloutStatus};
use tarka_core::model::target::TargetType;
use tarka_core::Investigation;
use tarka_providers::Providers;

/// Best-effort workload identity inference for non-pod alerts.
///
/// The ubiquitous `job=` label is scrape metadata and is deliberately
/// never treated as a Kubernetes Job.
#[must_use]
pub fn infer_workload_from_labels(labels: &BTreeMap<String, String>) -> Option<(String, String)> {
    let candidates: [(&str, &[&str]); 4] = [
        ("Deployment", &["deployment", "deployment_name", "kubernetes_deployment"]),
        ("StatefulSet", &["statefulset", "statefulset_name", "kubernetes_statefulset"]),
        ("DaemonSet", &["daemonset", "daemonset_name", "kubernetes_daemonset"]),
        ("Job", &["job_name", "kubernetes_job"]),
    ];
    for (kind, keys) in candidates {
        for k in keys {
            if let Some(v) = labels.get(*k).map(|s| s.trim()).filter(|s| !s.is_empty()) {
                return Some((kind.to_string(), v.to_string()));
            }
        }
    }

    // Explicit kind/name pairs.
    let wk = labels
        .get("workload_kind")
        .or_else(|| labels.get("k8s_workload_kind"))
        .or_else(|| labels.get("kind"))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())?;
    let wn = labels
        .get("workload")
        .or_else(|| labels.get("workload_name"))
        .or_else(|| labels.get("k8s_workload_name"))
        .or_else(|| labels.get("name"))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())?;
    let kind = match wk.to_ascii_lowercase().as_str() {
        "deployment" => "Deployment",
        "statefulset" => "StatefulSet",
        "daemonset" => "DaemonSet",
        "job" => "Job",
        _ => wk,
    };
    Some((kind.to_string(), wn.to_string()))
}

pub async fn collect_nonpod_baseline(providers: &Providers, inv: &mut Investigation) {
    if inv.target.playbook.is_none() {
        inv.target.playbook = Some("nonpod_baseline".to_string());
    }
    let labels = inv.alert.labels.clone();

    // Workload identity (best-effort)
    if inv.target.workload_kind.is_none() || inv.target.workload_name.is_none() {
        if let Some((kind, name)) = infer_workload_from_labels(&labels) {
            inv.target.workload_kind = Some(kind);
            inv.target.workload_name = Some(name);
            inv.target.target_type = TargetType::Workload;
        }
    }

    // Rollout status (K8s API first, kube-state-metrics PromQL fallback)
    if inv.evidence.k8s.rollout_status.is_none() {
        let ns = inv
            .target
            .namespace
            .clone()
            .or_else(|| labels.get("namespace").map(|s| s.trim().to_string()).filter(|s| !s.is_empty()));
        let wk = inv.target.workload_kind.clone();
        let wn = inv.target.workload_name.clone();
        if let (Some(ns), Some(wk), Some(wn)) = (ns, wk, wn) {
            match providers.k8s.workload_rollout_status(&ns, &wk, &wn).await {
                Ok(rs) => inv.evidence.k8s.rollout_status = Some(rs),
                Err(e) => {
                    inv.push_error("K8s rollout status", e);
                    if let Some(rs) =
                        rollout_status_from_kube_state_metrics(providers, &ns, &wk, &wn, inv.time_window.end_time).await
                    {
                        inv.evidence.k8s.rollout_status = Some(rs);
                    }
                }
            }
        }
    }

    // Prometheus up/down skeleton (instant, label-derived)
    let at = inv.time_window.end_time;
    let job = inv
        .target
        .job
        .clone()
        .or_else(|| labels.get("job").cloned())
        .filter(|s| !s.is_empty());
    let instance = inv
        .target
        .instance
        .clone()
        .or_else(|| labels.get("instance").cloned())
        .filter(|s| !s.is_empty());
    let service = inv
        .target
        .service
        .clone()
        .or_else(|| labels.get("service").cloned())
        .filter(|s| !s.is_empty());
    let namespace = inv
        .target
        .namespace
        .clone()
        .or_else(|| labels.get("namespace").cloned())
        .filter(|s| !s.is_empty());

    let mut baseline = inv.evidence.metrics.prom_baseline.take().unwrap_or_default();

    if let (Some(j), Some(i)) = (&job, &instance) {
        prom_check(providers, inv, &mut baseline, "up_job_instance", &format!("up{{job=\"{j}\",instance=\"{i}\"}}"), at).await;
    } else if let Some(j) = &job {
        prom_check(providers, inv, &mut baseline, "up_job_down", &format!("sum(up{{job=\"{j}\"}} == 0)"), at).await;
        prom_check(providers, inv, &mut baseline, "up_job_total", &format!("count(up{{job=\"{j}\"}})"), at).await;
    }

    if let (Some(ns), Some(svc)) = (&namespace, &service) {
        prom_check(
            providers,
            inv,
            &mut baseline,
            "up_service_down",
            &format!("sum(up{{namespace=\"{ns}\",service=\"{svc}\"}} == 0)"),
            at,
        )
        .await;
        prom_check(
            providers,
            inv,
            &mut baseline,
            "up_service_total",
            &format!("count(up{{namespace=\"{ns}\",service=\"{svc}\"}})"),
            at,
        )
        .await;
    }

    inv.evidence.metrics.prom_baseline = Some(baseline);
}

async fn prom_check(
    providers: &Providers,
    inv: &mut Investigation,
    baseline: &mut PromBaseline,
    name: &str,
    query: &str,
    at: chrono::DateTime<chrono::Utc>,
) {
    if baseline.checks.contains_key(name) {
        return;
    }
    match providers.prom.query_instant(query, at).await {
        Ok(samples) => {
            baseline.checks.insert(name.to_string(), samples);
        }
        Err(e) => {
            inv.push_error(&format!("Prometheus baseline ({name}) failed"), e);
            baseline.checks.insert(name.to_string(), Vec::new());
        }
    }
    baseline.queries_used.insert(name.to_string(), query.to_string());
}

/// Minimal rollout summary derived from kube-state-metrics when the K8s
/// API is unavailable or forbidden.
async fn rollout_status_from_kube_state_metrics(
    providers: &Providers,
    namespace: &str,
    kind: &str,
    name: &str,
    at: chrono::DateTime<chrono::Utc>,
) -> Option<RolloutStatus> {
    let prom = &providers.prom;
    let mut rs = RolloutStatus {
        kind: kind.to_string(),
        name: name.to_string(),
        source: Some("kube_state_metrics".to_string()),
        ..RolloutStatus::default()
    };

    match kind {
        "Deployment" => {
            rs.replicas = prom
                .scalar(&format!("kube_deployment_status_replicas{{namespace=\"{namespace}\",deployment=\"{name}\"}}"), at)
                .await
                .map(|v| v as i64);
            rs.ready_replicas = prom
                .scalar(&format!("kube_deployment_status_replicas_ready{{namespace=\"{namespace}\",deployment=\"{name}\"}}"), at)
                .await
                .map(|v| v as i64);
            rs.updated_replicas = prom
                .scalar(&format!("kube_deployment_status_replicas_updated{{namespace=\"{namespace}\",deployment=\"{name}\"}}"), at)
                .await
                .map(|v| v as i64);
            rs.unavailable_replicas = prom
                .scalar(&format!("kube_deployment_status_replicas_unavailable{{namespace=\"{namespace}\",deployment=\"{name}\"}}"), at)
                .await
                .map(|v| v as i64);
            rs.observed_generation = prom
                .scalar(&format!("kube_deployment_status_observed_generation{{namespace=\"{namespace}\",deployment=\"{name}\"}}"), at)
                .await
                .map(|v| v as i64);
        }
        "StatefulSet" => {
            rs.replicas = prom
                .scalar(&format!("kube_statefulset_status_replicas{{namespace=\"{namespace}\",statefulset=\"{name}\"}}"), at)
                .await
                .map(|v| v as i64);
            rs.ready_replicas = prom
                .scalar(&format!("kube_statefulset_status_replicas_ready{{namespace=\"{namespace}\",statefulset=\"{name}\"}}"), at)
                .await
                .map(|v| v as i64);
            rs.current_replicas = prom
                .scalar(&format!("kube_statefulset_status_replicas_current{{namespace=\"{namespace}\",statefulset=\"{name}\"}}"), at)
                .await
                .map(|v| v as i64);
            rs.updated_replicas = prom
                .scalar(&format!("kube_statefulset_status_replicas_updated{{namespace=\"{namespace}\",statefulset=\"{name}\"}}"), at)
                .await
                .map(|v| v as i64);
        }
        "DaemonSet" => {
            rs.desired_number_scheduled = prom
                .scalar(&format!("kube_daemonset_status_desired_number_scheduled{{namespace=\"{namespace}\",daemonset=\"{name}\"}}"), at)
                .await
                .map(|v| v as i64);
            rs.number_ready = prom
                .scalar(&format!("kube_daemonset_status_number_ready{{namespace=\"{namespace}\",daemonset=\"{name}\"}}"), at)
                .await
                .map(|v| v as i64);
            rs.updated_number_scheduled = prom
                .scalar(&format!("kube_daemonset_status_updated_number_scheduled{{namespace=\"{namespace}\",daemonset=\"{name}\"}}"), at)
                .await
                .map(|v| v as i64);
        }
        "Job" => {
            rs.failed = prom
                .scalar(&format!("kube_job_status_failed{{namespace=\"{namespace}\",job_name=\"{name}\"}}"), at)
                .await
                .map(|v| v as i64);
            rs.active = prom
                .scalar(&format!("kube_job_status_active{{namespace=\"{namespace}\",job_name=\"{name}\"}}"), at)
                .await
                .map(|v| v as i64);
            rs.succeeded = prom
                .scalar(&format!("kube_job_status_succeeded{{namespace=\"{namespace}\",job_name=\"{name}\"}}"), at)
                .await
                .map(|v| v as i64);
        }
        _ => return None,
    }
    Some(rs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_infer_from_convention_labels() {
        assert_eq!(
            infer_workload_from_labels(&labels(&[("deployment", "api")])),
            Some(("Deployment".to_string(), "api".to_string()))
        );
        assert_eq!(
            infer_workload_from_labels(&labels(&[("statefulset", "db")])),
            Some(("StatefulSet".to_string(), "db".to_string()))
        );
    }

    #[test]
    fn test_scrape_job_label_is_not_a_job() {
        assert_eq!(infer_workload_from_labels(&labels(&[("job", "kube-state-metrics")])), None);
        assert_eq!(
            infer_workload_from_labels(&labels(&[("job_name", "etl")])),
            Some(("Job".to_string(), "etl".to_string()))
        );
    }

    #[test]
    fn test_explicit_kind_name_pair() {
        assert_eq!(
            infer_workload_from_labels(&labels(&[("workload_kind", "deployment"), ("workload", "api")])),
            Some(("Deployment".to_string(), "api".to_string()))
        );
    }
}
