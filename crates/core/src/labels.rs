//! Label-first extraction of investigation targets.
//!
//! Conservative by design: only explicit labels are used here; workload
//! inference from owner chains happens in the collectors.

use std::collections::BTreeMap;

use crate::family::{detect_family, Family};
use crate::model::alert::Alert;
use crate::model::target::{Target, TargetType};

/// Pod name label aliases, in preference order.
const POD_KEYS: &[&str] = &["pod", "pod_name", "podName", "kubernetes_pod_name"];

/// Namespace label aliases, in preference order.
const NAMESPACE_KEYS: &[&str] = &[
    "namespace",
    "Namespace",
    "kubernetes_namespace_name",
    "k8s_namespace",
    "kube_namespace",
];

const SERVICE_KEYS: &[&str] = &["service", "kubernetes_service_name"];

const CONTAINER_KEYS: &[&str] = &["container", "Container", "container_name"];

fn first_nonempty<'a>(labels: &'a BTreeMap<String, String>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| labels.get(*k))
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
}

/// Extract `(pod, namespace)` from explicit labels only; never infer.
#[must_use]
pub fn extract_pod_namespace(labels: &BTreeMap<String, String>) -> (Option<String>, Option<String>) {
    (
        first_nonempty(labels, POD_KEYS).map(ToString::to_string),
        first_nonempty(labels, NAMESPACE_KEYS).map(ToString::to_string),
    )
}

/// Extract the service identity label.
#[must_use]
pub fn extract_service(labels: &BTreeMap<String, String>) -> Option<String> {
    first_nonempty(labels, SERVICE_KEYS).map(ToString::to_string)
}

/// Extract the container label.
#[must_use]
pub fn extract_target_container(labels: &BTreeMap<String, String>) -> Option<String> {
    first_nonempty(labels, CONTAINER_KEYS).map(ToString::to_string)
}

/// Build the initial `Target` for an alert.
///
/// Excluded families (`target_down`, `k8s_rollout_health`,
/// `observability_pipeline`, `meta`, `job_failed`) never adopt pod labels
/// as identity; those labels are scrape metadata. `job_failed` takes its
/// workload name from `job_name`, not the Prometheus `job` label.
#[must_use]
pub fn extract_target(alert: &Alert, env_cluster: Option<&str>) -> Target {
    let labels = &alert.labels;
    let family = detect_family(labels);

    let cluster = labels
        .get("cluster")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .or_else(|| env_cluster.map(str::trim).filter(|s| !s.is_empty()).map(ToString::to_string));

    let (pod, namespace) = extract_pod_namespace(labels);
    let service = extract_service(labels);
    let container = extract_target_container(labels);
    let job = labels.get("job").map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    let instance = labels
        .get("instance")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let team = labels.get("team").map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

    let adopt_pod = pod.is_some() && namespace.is_some() && !family.pod_identity_excluded();

    let mut target = Target {
        cluster,
        namespace,
        container,
        service,
        job,
        instance,
        team,
        ..Target::default()
    };

    if adopt_pod {
        target.pod = pod;
        target.target_type = TargetType::Pod;
    } else if family == Family::JobFailed {
        if let Some(job_name) = labels.get("job_name").map(|s| s.trim()).filter(|s| !s.is_empty()) {
            target.workload_kind = Some("Job".to_string());
            target.workload_name = Some(job_name.to_string());
            target.target_type = TargetType::Workload;
        }
    } else if target.service.is_some() {
        target.target_type = TargetType::Service;
    }

    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::alert::AlertState;

    fn alert_with(pairs: &[(&str, &str)]) -> Alert {
        Alert {
            fingerprint: "fp".to_string(),
            labels: pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            annotations: BTreeMap::new(),
            starts_at: None,
            ends_at: None,
            generator_url: String::new(),
            state: AlertState::Firing,
        }
    }

    #[test]
    fn test_pod_alert_adopts_pod_identity() {
        let a = alert_with(&[
            ("alertname", "CrashLoopBackOff"),
            ("pod", "api-1"),
            ("namespace", "prod"),
        ]);
        let t = extract_target(&a, None);
        assert_eq!(t.target_type, TargetType::Pod);
        assert_eq!(t.pod.as_deref(), Some("api-1"));
    }

    #[test]
    fn test_job_failed_never_adopts_pod_labels() {
        let a = alert_with(&[
            ("alertname", "KubeJobFailed"),
            ("pod", "kube-state-metrics-abc"),
            ("namespace", "batch"),
            ("job_name", "etl-nightly"),
            ("job", "kube-state-metrics"),
        ]);
        let t = extract_target(&a, None);
        assert!(t.pod.is_none());
        assert_eq!(t.workload_kind.as_deref(), Some("Job"));
        assert_eq!(t.workload_name.as_deref(), Some("etl-nightly"));
    }

    #[test]
    fn test_env_cluster_fallback() {
        let a = alert_with(&[("alertname", "X"), ("service", "api")]);
        let t = extract_target(&a, Some("c1"));
        assert_eq!(t.cluster.as_deref(), Some("c1"));
        assert_eq!(t.target_type, TargetType::Service);
    }

    #[test]
    fn test_label_alias_precedence() {
        let a = alert_with(&[
            ("alertname", "CrashLoopBackOff"),
            ("kubernetes_pod_name", "api-2"),
            ("kubernetes_namespace_name", "prod"),
        ]);
        let t = extract_target(&a, None);
        assert_eq!(t.pod.as_deref(), Some("api-2"));
        assert_eq!(t.namespace.as_deref(), Some("prod"));
    }
}
