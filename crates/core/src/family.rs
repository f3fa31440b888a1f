//! Family detection: a coarse alert class derived deterministically from
//! the alertname and labels. Families are rule-derived, never learned.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Enumerated alert family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    Crashloop,
    CpuThrottling,
    OomKilled,
    MemoryPressure,
    Http5xx,
    PodNotHealthy,
    JobFailed,
    TargetDown,
    K8sRolloutHealth,
    ObservabilityPipeline,
    Meta,
    Generic,
}

impl Family {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Crashloop => "crashloop",
            Self::CpuThrottling => "cpu_throttling",
            Self::OomKilled => "oom_killed",
            Self::MemoryPressure => "memory_pressure",
            Self::Http5xx => "http_5xx",
            Self::PodNotHealthy => "pod_not_healthy",
            Self::JobFailed => "job_failed",
            Self::TargetDown => "target_down",
            Self::K8sRolloutHealth => "k8s_rollout_health",
            Self::ObservabilityPipeline => "observability_pipeline",
            Self::Meta => "meta",
            Self::Generic => "generic",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "crashloop" => Some(Self::Crashloop),
            "cpu_throttling" => Some(Self::CpuThrottling),
            "oom_killed" => Some(Self::OomKilled),
            "memory_pressure" => Some(Self::MemoryPressure),
            "http_5xx" => Some(Self::Http5xx),
            "pod_not_healthy" => Some(Self::PodNotHealthy),
            "job_failed" => Some(Self::JobFailed),
            "target_down" => Some(Self::TargetDown),
            "k8s_rollout_health" => Some(Self::K8sRolloutHealth),
            "observability_pipeline" => Some(Self::ObservabilityPipeline),
            "meta" => Some(Self::Meta),
            "generic" => Some(Self::Generic),
            _ => None,
        }
    }

    /// Families whose pod labels are scrape metadata, never incident
    /// identity. KubeJobFailed carries the kube-state-metrics scraper pod.
    #[must_use]
    pub fn pod_identity_excluded(self) -> bool {
        matches!(
            self,
            Self::TargetDown
                | Self::K8sRolloutHealth
                | Self::ObservabilityPipeline
                | Self::Meta
                | Self::JobFailed
        )
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert classes where pod identity churns during rollouts; the queue
/// keys on workload identity + hour bucket instead.
pub const ROLLOUT_NOISY_ALERTNAMES: &[&str] = &[
    "KubernetesPodNotHealthy",
    "KubernetesPodNotHealthyCritical",
    "KubernetesContainerOomKiller",
];

/// Rollout-noisy variants that additionally scope by container.
#[must_use]
pub fn rollout_key_includes_container(alertname: &str) -> bool {
    alertname == "KubernetesContainerOomKiller"
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Detect the family for a labelset. Stable across label churn: only the
/// alertname and a handful of reason-shaped labels participate.
#[must_use]
pub fn detect_family(labels: &BTreeMap<String, String>) -> Family {
    let alertname = labels.get("alertname").map(String::as_str).unwrap_or("");
    let reason = labels.get("reason").map(String::as_str).unwrap_or("");

    if alertname.is_empty() && labels.is_empty() {
        return Family::Generic;
    }

    // Meta/inhibitor alerts first so Watchdog never lands in generic.
    if contains_any(
        alertname,
        &["Watchdog", "DeadMansSwitch", "InfoInhibitor", "AlertmanagerMeta"],
    ) {
        return Family::Meta;
    }

    if alertname.contains("CrashLoop") || reason == "CrashLoopBackOff" {
        return Family::Crashloop;
    }
    if contains_any(alertname, &["CPUThrottling", "CpuThrottling"]) {
        return Family::CpuThrottling;
    }
    if contains_any(alertname, &["OomKill", "OOMKill", "OomKilled"]) || reason == "OOMKilled" {
        return Family::OomKilled;
    }
    if contains_any(alertname, &["MemoryPressure", "HighMemory", "MemoryUsageHigh"]) {
        return Family::MemoryPressure;
    }
    if contains_any(alertname, &["5xx", "HttpErrorRate", "HighErrorRate"]) {
        return Family::Http5xx;
    }
    if alertname == "KubeJobFailed" || contains_any(alertname, &["JobFailed", "JobCompletion"]) {
        return Family::JobFailed;
    }
    if contains_any(alertname, &["PodNotHealthy", "KubePodNotReady", "PodNotReady"]) {
        return Family::PodNotHealthy;
    }
    if contains_any(alertname, &["TargetDown", "TargetMissing", "InstanceDown"]) {
        return Family::TargetDown;
    }
    if contains_any(
        alertname,
        &[
            "DeploymentReplicasMismatch",
            "DeploymentGenerationMismatch",
            "StatefulSetReplicasMismatch",
            "DaemonSetRollout",
            "RolloutStuck",
            "HpaMaxedOut",
        ],
    ) {
        return Family::K8sRolloutHealth;
    }
    if contains_any(
        alertname,
        &[
            "Prometheus",
            "Vmalert",
            "VMAlert",
            "VMAgent",
            "VictoriaMetrics",
            "VictoriaLogs",
            "Alertmanager",
            "ScrapePool",
            "RuleEvaluation",
        ],
    ) {
        return Family::ObservabilityPipeline;
    }

    Family::Generic
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
    fn test_crashloop_from_alertname() {
        assert_eq!(
            detect_family(&labels(&[("alertname", "CrashLoopBackOff")])),
            Family::Crashloop
        );
        assert_eq!(
            detect_family(&labels(&[("alertname", "KubernetesPodCrashLooping")])),
            Family::Crashloop
        );
    }

    #[test]
    fn test_no_labels_is_generic() {
        assert_eq!(detect_family(&BTreeMap::new()), Family::Generic);
    }

    #[test]
    fn test_family_table() {
        let cases = [
            ("CPUThrottlingHigh", Family::CpuThrottling),
            ("KubernetesContainerOomKiller", Family::OomKilled),
            ("KubernetesMemoryPressure", Family::MemoryPressure),
            ("ServiceHttp5xxRateHigh", Family::Http5xx),
            ("KubernetesPodNotHealthy", Family::PodNotHealthy),
            ("KubeJobFailed", Family::JobFailed),
            ("TargetDown", Family::TargetDown),
            ("KubernetesDeploymentReplicasMismatch", Family::K8sRolloutHealth),
            ("VmalertRuleEvaluationFailing", Family::ObservabilityPipeline),
            ("Watchdog", Family::Meta),
            ("SomethingNovel", Family::Generic),
        ];
        for (name, want) in cases {
            assert_eq!(detect_family(&labels(&[("alertname", name)])), want, "{name}");
        }
    }

    #[test]
    fn test_stability_across_label_churn() {
        let a = labels(&[("alertname", "KubeJobFailed"), ("severity", "warning")]);
        let b = labels(&[
            ("alertname", "KubeJobFailed"),
            ("severity", "critical"),
            ("endpoint", "http"),
            ("pod", "ksm-123"),
        ]);
        assert_eq!(detect_family(&a), detect_family(&b));
    }
}
