//! Diagnostic modules: a static registry of `{applies, collect, diagnose}`
//! values, one per family group.
//!
//! `diagnose` works from features only (plus the change sub-record); it
//! must never reach back into raw evidence or providers.

use async_trait::async_trait;

use tarka_core::family::{detect_family, Family};
use tarka_core::model::analysis::Hypothesis;
use tarka_core::Investigation;
use tarka_providers::Providers;

use crate::collectors::{
    cpu_throttling::collect_cpu_throttling, crashloop::collect_crashloop_evidence,
    http_5xx::collect_http_5xx, job_failure::collect_job_failure_evidence,
    memory_pressure::collect_memory_pressure, nonpod_baseline::collect_nonpod_baseline,
    oom_killer::collect_oom_killer, pod_baseline::collect_pod_baseline,
    pod_not_healthy::collect_pod_not_healthy,
};

fn family(inv: &Investigation) -> Family {
    detect_family(&inv.alert.labels)
}

fn clamp(x: i64) -> u8 {
    Hypothesis::clamp_confidence(x)
}

/// One collector+diagnoser unit. Modules are stateless; the registry holds
/// one value per variant.
#[async_trait]
pub trait DiagnosticModule: Send + Sync {
    fn module_id(&self) -> &'static str;
    fn applies(&self, inv: &Investigation) -> bool;
    async fn collect(&self, providers: &Providers, inv: &mut Investigation);
    fn diagnose(&self, inv: &Investigation) -> Vec<Hypothesis>;
}

/// The fixed module set, in routing order.
#[must_use]
pub fn default_modules() -> Vec<Box<dyn DiagnosticModule>> {
    vec![
        Box::new(CrashLoopModule),
        Box::new(JobFailureModule),
        Box::new(K8sLifecycleModule),
        Box::new(RolloutHealthModule),
        Box::new(CapacityModule),
        Box::new(DataPlaneModule),
        Box::new(ControlPlaneModule),
        Box::new(ObservabilityPipelineModule),
    ]
}

// ---------------------------------------------------------------------------

pub struct CrashLoopModule;

#[async_trait]
impl DiagnosticModule for CrashLoopModule {
    fn module_id(&self) -> &'static str {
        "crashloop"
    }

    fn applies(&self, inv: &Investigation) -> bool {
        family(inv) == Family::Crashloop
    }

    async fn collect(&self, providers: &Providers, inv: &mut Investigation) {
        collect_crashloop_evidence(providers, inv).await;
    }

    fn diagnose(&self, inv: &Investigation) -> Vec<Hypothesis> {
        let Some(f) = &inv.analysis.features else { return Vec::new() };
        let mut out = Vec::new();

        // Probe failures first: a failing liveness probe restarts healthy
        // processes and masquerades as an app crash.
        if f.k8s.probe_failure_type.as_deref() == Some("liveness") {
            out.push(Hypothesis {
                hypothesis_id: "liveness_probe_failure".to_string(),
                title: "Liveness probe failing (restarting a possibly-healthy process)".to_string(),
                confidence_0_100: clamp(75),
                why: vec!["Pod events show repeated liveness probe failures.".to_string()],
                supporting_refs: vec![
                    "features.k8s.probe_failure_type".to_string(),
                    "evidence.k8s.pod_events".to_string(),
                ],
                next_tests: vec![
                    "Check probe timeout/period vs app startup and GC pauses.".to_string(),
                    "Compare probe endpoint latency with container CPU throttling.".to_string(),
                ],
            });
        }

        let mut score: i64 = 55;
        let mut why = vec!["CrashLoop signals present (waiting reason and/or restart rate).".to_string()];
        if f.k8s.restart_rate_5m_max.unwrap_or(0.0) >= 3.0 {
            score += 15;
        }
        if f.logs.status.as_deref() == Some("ok") {
            score += 10;
        }
        // Instant crashes point at config/dependency; slow ones at
        // leaks/timeouts.
        match f.k8s.crash_duration_seconds {
            Some(d) if d < 10 => {
                why.push(format!("Container exits {d}s after start: likely config/dependency failure."));
                score += 5;
            }
            Some(d) if d > 60 => {
                why.push(format!("Container runs {d}s before exiting: leak/timeout shaped."));
            }
            _ => {}
        }
        if f.logs.fatal_count + f.logs.exception_count > 0 {
            why.push("Fatal/exception patterns present in logs.".to_string());
            score += 10;
        }
        out.push(Hypothesis {
            hypothesis_id: "crashloop_app_failure".to_string(),
            title: "Application crash / startup failure (CrashLoopBackOff)".to_string(),
            confidence_0_100: clamp(score),
            why,
            supporting_refs: vec![
                "features.k8s.waiting_reason".to_string(),
                "features.k8s.restart_rate_5m_max".to_string(),
                "evidence.logs.parsed_errors".to_string(),
            ],
            next_tests: vec![
                "Read previous-container logs for the first fatal line.".to_string(),
                "Check lastState.terminated exit code and recent config changes.".to_string(),
            ],
        });
        out
    }
}

pub struct JobFailureModule;

#[async_trait]
impl DiagnosticModule for JobFailureModule {
    fn module_id(&self) -> &'static str {
        "job_failure"
    }

    fn applies(&self, inv: &Investigation) -> bool {
        family(inv) == Family::JobFailed
    }

    async fn collect(&self, providers: &Providers, inv: &mut Investigation) {
        collect_job_failure_evidence(providers, inv).await;
    }

    fn diagnose(&self, inv: &Investigation) -> Vec<Hypothesis> {
        let Some(f) = &inv.analysis.features else { return Vec::new() };
        let mut out = Vec::new();

        // Deadline/backoff from Job events.
        let mut deadline = false;
        let mut backoff = false;
        for ev in &inv.evidence.k8s.pod_events {
            match ev.reason.as_deref() {
                Some("DeadlineExceeded") => deadline = true,
                Some("BackoffLimitExceeded") => backoff = true,
                _ => {}
            }
        }
        if deadline {
            out.push(Hypothesis {
                hypothesis_id: "job_deadline_exceeded".to_string(),
                title: "Job exceeded activeDeadlineSeconds".to_string(),
                confidence_0_100: clamp(85),
                why: vec!["Job events contain DeadlineExceeded.".to_string()],
                supporting_refs: vec!["evidence.k8s.pod_events".to_string()],
                next_tests: vec![
                    "Compare Job runtime against activeDeadlineSeconds.".to_string(),
                    "Check whether the workload slowed down (data volume, dependencies).".to_string(),
                ],
            });
        }

        // S3/IAM shaped failures from parsed logs.
        let s3_hit = inv
            .evidence
            .logs
            .parsed_errors
            .iter()
            .any(|e| {
                let m = e.message.to_ascii_lowercase();
                (m.contains("s3") || m.contains("bucket"))
                    && (m.contains("403") || m.contains("404") || m.contains("forbidden") || m.contains("accessdenied") || m.contains("nosuchbucket"))
            });
        if s3_hit {
            let irsa_missing = inv
                .evidence
                .aws
                .metadata
                .get("irsa_issue")
                .is_some();
            let (id, title, score) = if irsa_missing {
                (
                    "job_irsa_not_configured",
                    "Service account lacks IAM role annotation (IRSA not configured)",
                    90,
                )
            } else {
                (
                    "job_s3_access_failure",
                    "Job failed on S3 access (permissions/region/bucket)",
                    85,
                )
            };
            out.push(Hypothesis {
                hypothesis_id: id.to_string(),
                title: title.to_string(),
                confidence_0_100: clamp(score),
                why: vec!["Parsed log errors reference S3 failures (403/404/NoSuchBucket).".to_string()],
                supporting_refs: vec![
                    "evidence.logs.parsed_errors".to_string(),
                    "evidence.aws.metadata".to_string(),
                ],
                next_tests: vec![
                    "Verify the bucket region and ownership (aws.s3_bucket_location).".to_string(),
                    "Verify the job's IAM role permissions (aws.iam_role_permissions).".to_string(),
                ],
            });
        }

        if out.is_empty() {
            let mut score: i64 = 45;
            let mut why = vec!["Job failed; no single dominant signal yet.".to_string()];
            if backoff {
                score += 20;
                why.push("BackoffLimitExceeded: pods failed repeatedly.".to_string());
            }
            if f.logs.fatal_count + f.logs.exception_count + f.logs.error_count > 0 {
                score += 15;
                why.push("Error patterns present in job logs.".to_string());
            }
            if inv.meta_str("blocked_mode") == Some("job_pods_not_found") {
                score = 25;
                why.push("Job pods are gone and the historical fallback found nothing.".to_string());
            }
            out.push(Hypothesis {
                hypothesis_id: "job_failed_generic".to_string(),
                title: "Job failed (see events and parsed logs)".to_string(),
                confidence_0_100: clamp(score),
                why,
                supporting_refs: vec![
                    "evidence.k8s.pod_events".to_string(),
                    "evidence.logs.parsed_errors".to_string(),
                    "evidence.k8s.rollout_status".to_string(),
                ],
                next_tests: vec![
                    "Inspect Job events and failed-pod exit codes.".to_string(),
                    "Re-run the job with verbose logging if logs are gone.".to_string(),
                ],
            });
        }
        out
    }
}

pub struct K8sLifecycleModule;

#[async_trait]
impl DiagnosticModule for K8sLifecycleModule {
    fn module_id(&self) -> &'static str {
        "k8s_lifecycle"
    }

    fn applies(&self, inv: &Investigation) -> bool {
        family(inv) == Family::PodNotHealthy
    }

    async fn collect(&self, providers: &Providers, inv: &mut Investigation) {
        collect_pod_not_healthy(providers, inv).await;
    }

    fn diagnose(&self, inv: &Investigation) -> Vec<Hypothesis> {
        let Some(f) = &inv.analysis.features else { return Vec::new() };
        let mut out = Vec::new();

        let waiting = f.k8s.waiting_reason.as_deref().unwrap_or("");
        if waiting == "ImagePullBackOff" || waiting == "ErrImagePull" {
            let bucket = inv
                .evidence
                .k8s
                .image_pull_diagnostics
                .as_ref()
                .and_then(|d| d.error_bucket.clone());
            let mut why = vec![format!("Container waiting reason is `{waiting}`.")];
            if let Some(b) = &bucket {
                why.push(format!("Pull error classified as `{b}`."));
            }
            out.push(Hypothesis {
                hypothesis_id: "image_pull_failure".to_string(),
                title: "Image pull failure (auth/not found/network)".to_string(),
                confidence_0_100: clamp(80),
                why,
                supporting_refs: vec![
                    "features.k8s.waiting_reason".to_string(),
                    "evidence.k8s.image_pull_diagnostics".to_string(),
                ],
                next_tests: vec![
                    "Verify the image tag exists in the registry (aws.ecr_image for ECR).".to_string(),
                    "Check imagePullSecrets / node IAM wiring and registry egress.".to_string(),
                ],
            });
        }
        if waiting == "CreateContainerConfigError" || waiting == "CreateContainerError" {
            out.push(Hypothesis {
                hypothesis_id: "misconfig_or_missing_secret_configmap".to_string(),
                title: "Misconfiguration or missing Secret/ConfigMap".to_string(),
                confidence_0_100: clamp(75),
                why: vec![format!("Container waiting reason is `{waiting}`.")],
                supporting_refs: vec![
                    "features.k8s.waiting_reason".to_string(),
                    "evidence.k8s.pod_events".to_string(),
                ],
                next_tests: vec![
                    "Look for missing keys/resources in pod events.".to_string(),
                    "Check referenced ConfigMaps/Secrets exist in the namespace.".to_string(),
                ],
            });
        }
        if waiting == "CrashLoopBackOff" {
            let mut score: i64 = 55;
            if f.k8s.restart_rate_5m_max.unwrap_or(0.0) >= 3.0 {
                score += 15;
            }
            if f.logs.status.as_deref() == Some("ok") {
                score += 10;
            }
            out.push(Hypothesis {
                hypothesis_id: "crashloop_app_failure".to_string(),
                title: "Application crash / startup failure (CrashLoopBackOff)".to_string(),
                confidence_0_100: clamp(score),
                why: vec![
                    "CrashLoop signals present (waiting reason and/or restart rate).".to_string(),
                    "Use logs and last termination details to determine the immediate cause.".to_string(),
                ],
                supporting_refs: vec![
                    "features.k8s.waiting_reason".to_string(),
                    "features.k8s.restart_rate_5m_max".to_string(),
                    "evidence.logs.logs".to_string(),
                ],
                next_tests: vec![
                    "Read previous-container logs (tail 200).".to_string(),
                    "Inspect pod events and lastState.terminated.".to_string(),
                ],
            });
        }
        out
    }
}

pub struct RolloutHealthModule;

#[async_trait]
impl DiagnosticModule for RolloutHealthModule {
    fn module_id(&self) -> &'static str {
        "rollout_health"
    }

    fn applies(&self, inv: &Investigation) -> bool {
        family(inv) == Family::K8sRolloutHealth
    }

    async fn collect(&self, providers: &Providers, inv: &mut Investigation) {
        collect_nonpod_baseline(providers, inv).await;
    }

    fn diagnose(&self, inv: &Investigation) -> Vec<Hypothesis> {
        if inv.analysis.features.is_none() {
            return Vec::new();
        }
        let mut score: i64 = 40;
        let mut why = vec!["Workload health/rollout alert fired.".to_string()];
        if let Some(change) = &inv.analysis.change {
            if let Some(s) = change.score {
                score += (50.0 * s) as i64;
                if let Some(summary) = &change.summary {
                    why.push(summary.clone());
                }
            }
        }
        vec![Hypothesis {
            hypothesis_id: "rollout_blocked_or_regression".to_string(),
            title: "Rollout blocked or workload regression".to_string(),
            confidence_0_100: clamp(score),
            why,
            supporting_refs: vec!["evidence.k8s.rollout_status".to_string(), "analysis.change".to_string()],
            next_tests: vec![
                "Inspect rollout status (ready vs desired, conditions).".to_string(),
                "Correlate the onset with the latest deploy; consider rollback.".to_string(),
            ],
        }]
    }
}

pub struct CapacityModule;

#[async_trait]
impl DiagnosticModule for CapacityModule {
    fn module_id(&self) -> &'static str {
        "capacity"
    }

    fn applies(&self, inv: &Investigation) -> bool {
        matches!(
            family(inv),
            Family::CpuThrottling | Family::OomKilled | Family::MemoryPressure
        )
    }

    async fn collect(&self, providers: &Providers, inv: &mut Investigation) {
        match family(inv) {
            Family::CpuThrottling => collect_cpu_throttling(providers, inv).await,
            Family::OomKilled => collect_oom_killer(providers, inv).await,
            Family::MemoryPressure => collect_memory_pressure(providers, inv).await,
            _ => {}
        }
    }

    fn diagnose(&self, inv: &Investigation) -> Vec<Hypothesis> {
        let Some(f) = &inv.analysis.features else { return Vec::new() };
        match family(inv) {
            Family::CpuThrottling => {
                let near = f.metrics.cpu_near_limit == Some(true);
                let score = if near { 70 } else { 35 };
                vec![Hypothesis {
                    hypothesis_id: "cpu_capacity_limit".to_string(),
                    title: "CPU capacity/limits causing throttling (only actionable when near limit)"
                        .to_string(),
                    confidence_0_100: clamp(score),
                    why: vec![
                        format!(
                            "cpu_throttle_p95_pct={:?} (near_limit={near})",
                            f.metrics.cpu_throttle_p95_pct
                        ),
                        "If usage is far from limit, raising limits is unlikely to help; check per-container throttling and impact signals.".to_string(),
                    ],
                    supporting_refs: vec![
                        "features.metrics.cpu_throttle_p95_pct".to_string(),
                        "features.metrics.cpu_near_limit".to_string(),
                    ],
                    next_tests: vec![
                        "Per-container throttling topk over the window.".to_string(),
                        "Correlate with latency/errors in the same window to confirm impact.".to_string(),
                    ],
                }]
            }
            Family::OomKilled => {
                let score = if f.k8s.oom_killed { 80 } else { 40 };
                vec![Hypothesis {
                    hypothesis_id: "memory_limit_oom".to_string(),
                    title: "Container exceeded memory limit (OOMKilled)".to_string(),
                    confidence_0_100: clamp(score),
                    why: vec![if f.k8s.oom_killed {
                        "OOMKilled evidence present.".to_string()
                    } else {
                        "OOM alert fired but lacks K8s corroboration.".to_string()
                    }],
                    supporting_refs: vec![
                        "features.k8s.oom_killed".to_string(),
                        "features.metrics.memory_usage_p95_bytes".to_string(),
                    ],
                    next_tests: vec![
                        "Compare memory usage vs limits/requests; raise the limit only if justified.".to_string(),
                        "Look for allocation spikes/leaks around the window.".to_string(),
                    ],
                }]
            }
            Family::MemoryPressure => {
                let score = if f.metrics.memory_near_limit == Some(true) { 70 } else { 40 };
                vec![Hypothesis {
                    hypothesis_id: "memory_pressure".to_string(),
                    title: "Memory pressure / eviction risk".to_string(),
                    confidence_0_100: clamp(score),
                    why: vec![if f.metrics.memory_near_limit == Some(true) {
                        "Memory is near limit.".to_string()
                    } else {
                        "Memory pressure signals detected but not near limit.".to_string()
                    }],
                    supporting_refs: vec![
                        "features.metrics.memory_near_limit".to_string(),
                        "features.k8s.evicted".to_string(),
                    ],
                    next_tests: vec![
                        "Check eviction/node pressure and usage trends.".to_string(),
                        "Review recent changes that may grow the memory footprint.".to_string(),
                    ],
                }]
            }
            _ => Vec::new(),
        }
    }
}

pub struct DataPlaneModule;

#[async_trait]
impl DiagnosticModule for DataPlaneModule {
    fn module_id(&self) -> &'static str {
        "data_plane"
    }

    fn applies(&self, inv: &Investigation) -> bool {
        family(inv) == Family::Http5xx
    }

    async fn collect(&self, providers: &Providers, inv: &mut Investigation) {
        collect_http_5xx(providers, inv).await;
    }

    fn diagnose(&self, inv: &Investigation) -> Vec<Hypothesis> {
        let Some(f) = &inv.analysis.features else { return Vec::new() };
        let mut score: i64 = 50;
        if f.metrics.http_5xx_rate_p95.unwrap_or(0.0) >= 1.0 {
            score += 25;
        }
        if inv.analysis.change.as_ref().and_then(|c| c.score).unwrap_or(0.0) >= 0.5 {
            score += 10;
        }
        vec![Hypothesis {
            hypothesis_id: "upstream_or_regression".to_string(),
            title: "Upstream dependency issue or recent regression causing 5xx".to_string(),
            confidence_0_100: clamp(score),
            why: vec!["5xx rate elevated; correlate with dependency timeouts and recent changes.".to_string()],
            supporting_refs: vec![
                "features.metrics.http_5xx_rate_p95".to_string(),
                "analysis.change".to_string(),
                "evidence.logs.logs".to_string(),
            ],
            next_tests: vec![
                "Correlate 5xx with latency/timeouts and upstream health.".to_string(),
                "If a rollout landed near onset, confirm impact then consider rollback.".to_string(),
            ],
        }]
    }
}

pub struct ControlPlaneModule;

#[async_trait]
impl DiagnosticModule for ControlPlaneModule {
    fn module_id(&self) -> &'static str {
        "control_plane"
    }

    fn applies(&self, inv: &Investigation) -> bool {
        family(inv) == Family::TargetDown
    }

    async fn collect(&self, providers: &Providers, inv: &mut Investigation) {
        collect_nonpod_baseline(providers, inv).await;
    }

    fn diagnose(&self, _inv: &Investigation) -> Vec<Hypothesis> {
        vec![Hypothesis {
            hypothesis_id: "scrape_target_unreachable".to_string(),
            title: "Scrape target unreachable (network/DNS/exporter down) or label mismatch".to_string(),
            confidence_0_100: 50,
            why: vec!["TargetDown-style symptoms; verify /targets and scrape errors.".to_string()],
            supporting_refs: vec![
                "evidence.metrics.prom_baseline".to_string(),
                "alert.labels.instance".to_string(),
                "alert.labels.job".to_string(),
            ],
            next_tests: vec![
                "Check Prometheus /targets for scrape errors and last scrape time.".to_string(),
                "Verify DNS/network/TLS to the target and exporter health.".to_string(),
            ],
        }]
    }
}

pub struct ObservabilityPipelineModule;

#[async_trait]
impl DiagnosticModule for ObservabilityPipelineModule {
    fn module_id(&self) -> &'static str {
        "observability_pipeline"
    }

    fn applies(&self, inv: &Investigation) -> bool {
        matches!(family(inv), Family::ObservabilityPipeline | Family::Meta)
    }

    async fn collect(&self, providers: &Providers, inv: &mut Investigation) {
        if family(inv) == Family::Meta {
            return;
        }
        collect_nonpod_baseline(providers, inv).await;
    }

    fn diagnose(&self, inv: &Investigation) -> Vec<Hypothesis> {
        if family(inv) == Family::Meta {
            return vec![Hypothesis {
                hypothesis_id: "meta_alert".to_string(),
                title: "Meta/inhibitor alert (operational noise)".to_string(),
                confidence_0_100: 90,
                why: vec!["This alert suppresses others; it is not a direct incident symptom.".to_string()],
                supporting_refs: vec!["alert.labels.alertname".to_string()],
                next_tests: vec![
                    "Review Alertmanager inhibition rules and routing to reduce paging noise.".to_string(),
                ],
            }];
        }
        vec![Hypothesis {
            hypothesis_id: "obs_pipeline_degraded".to_string(),
            title: "Observability pipeline degraded (rules/ingestion/backpressure)".to_string(),
            confidence_0_100: 70,
            why: vec!["Observability pipeline family alert fired.".to_string()],
            supporting_refs: vec!["analysis.noise".to_string(), "alert.labels".to_string()],
            next_tests: vec![
                "Check the rules/ingestion components for errors and saturation.".to_string(),
                "Review recent rule/config changes and ingestion rejects.".to_string(),
            ],
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tarka_core::model::alert::{Alert, AlertState};
    use tarka_core::model::target::Target;

    fn inv(alertname: &str) -> Investigation {
        let mut labels = BTreeMap::new();
        labels.insert("alertname".to_string(), alertname.to_string());
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

    #[test]
    fn test_module_routing() {
        let modules = default_modules();
        let routed = |name: &str| -> Vec<&'static str> {
            let i = inv(name);
            modules
                .iter()
                .filter(|m| m.applies(&i))
                .map(|m| m.module_id())
                .collect()
        };
        assert_eq!(routed("CrashLoopBackOff"), vec!["crashloop"]);
        assert_eq!(routed("KubeJobFailed"), vec!["job_failure"]);
        assert_eq!(routed("KubernetesPodNotHealthy"), vec!["k8s_lifecycle"]);
        assert_eq!(routed("CPUThrottlingHigh"), vec!["capacity"]);
        assert_eq!(routed("ServiceHttp5xxRateHigh"), vec!["data_plane"]);
        assert_eq!(routed("TargetDown"), vec!["control_plane"]);
        assert_eq!(routed("Watchdog"), vec!["observability_pipeline"]);
    }

    #[test]
    fn test_meta_alert_diagnosis() {
        let i = inv("Watchdog");
        let hyps = ObservabilityPipelineModule.diagnose(&i);
        assert_eq!(hyps[0].hypothesis_id, "meta_alert");
        assert_eq!(hyps[0].confidence_0_100, 90);
    }

    #[test]
    fn test_oom_confidence_depends_on_corroboration() {
        let mut i = inv("KubernetesContainerOomKiller");
        i.analysis.features = Some(tarka_core::model::analysis::Features {
            family: Some(Family::OomKilled),
            ..Default::default()
        });
        let low = CapacityModule.diagnose(&i);
        assert_eq!(low[0].confidence_0_100, 40);

        if let Some(f) = i.analysis.features.as_mut() {
            f.k8s.oom_killed = true;
        }
        let high = CapacityModule.diagnose(&i);
        assert_eq!(high[0].confidence_0_100, 80);
    }
}
