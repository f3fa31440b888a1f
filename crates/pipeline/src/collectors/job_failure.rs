//! Job failure evidence collector.
//!
//! Jobs are frequently TTL-deleted before investigation. The collector
//! retimes the window to the Job lifecycle, collects Job-resource events
//! first (they outlive pods), locates pods via the `job-name` selector,
//! falls back to historical logs, and only then enters blocked mode.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::json;

use tarka_core::model::evidence::PodInfo;
use tarka_core::model::target::TargetType;
use tarka_core::Investigation;
use tarka_providers::aws::iam::{check_irsa_trust_policy, extract_role_name_from_arn, get_iam_role_info, IRSA_ANNOTATION};
use tarka_providers::aws::s3::{check_s3_bucket_exists, get_s3_bucket_location};
use tarka_providers::Providers;

use super::historical::apply_historical_fallback;
use super::log_parser::parse_log_entries;
use super::pod_baseline::{apply_k8s_context, LOG_FETCH_LIMIT};

pub async fn collect_job_failure_evidence(providers: &Providers, inv: &mut Investigation) {
    inv.target.playbook = Some("job_failure".to_string());

    // Job identity comes from the `job_name` label; the `job` label is the
    // Prometheus scrape job (kube-state-metrics) and must not win.
    let job_name_from_label = inv.alert.labels.get("job_name").map(|s| s.trim().to_string());
    if let Some(job_name) = job_name_from_label.filter(|s| !s.is_empty()) {
        inv.target.workload_kind = Some("Job".to_string());
        inv.target.workload_name = Some(job_name);
        inv.target.target_type = TargetType::Pod;
        // Scrape identity confuses the UI's affected components; clear it.
        inv.target.service = None;
        inv.target.job = None;
        inv.target.instance = None;
    }

    let Some(ns) = inv.target.namespace.clone() else {
        inv.errors.push(format!(
            "job_failure: missing Job identity - namespace=None, alert labels: {:?}",
            inv.alert.labels.keys().collect::<Vec<_>>()
        ));
        return;
    };
    if inv.target.workload_kind.as_deref() != Some("Job") || inv.target.workload_name.is_none() {
        inv.errors.push(format!(
            "job_failure: missing Job identity - namespace={ns}, workload_kind={:?}, workload_name={:?}",
            inv.target.workload_kind, inv.target.workload_name
        ));
        return;
    }
    let job_name = inv.target.workload_name.clone().unwrap_or_default();

    // Step 1: retime to the Job lifecycle (critical for TTL-deleted Jobs:
    // the default window is anchored at now, but the Job may have started
    // hours ago).
    adjust_time_window_for_job(providers, inv, &ns, &job_name).await;
    let start = inv.time_window.start_time;
    let end = inv.time_window.end_time;

    // Step 2: Job rollout status (start_time, completion_time, failed count)
    if inv.evidence.k8s.rollout_status.is_none() {
        match providers.k8s.workload_rollout_status(&ns, "Job", &job_name).await {
            Ok(rs) => inv.evidence.k8s.rollout_status = Some(rs),
            Err(e) => inv.push_error("Failed to fetch Job rollout status", e),
        }
    }

    // Step 2.5: Job-resource events early; they persist longer than pods
    // and carry DeadlineExceeded/BackoffLimitExceeded/FailedCreate.
    match providers.k8s.events(&ns, "Job", &job_name, 20).await {
        Ok(events) if !events.is_empty() => {
            inv.set_meta("job_events_collected", events.len());
            inv.evidence.k8s.pod_events.extend(events);
        }
        Ok(_) => {}
        Err(e) => inv.push_error("Failed to fetch Job events", e),
    }

    // Step 3: locate Job pods via the label selector K8s adds to them.
    let pods = find_job_pods(providers, &ns, &job_name).await;

    if pods.is_empty() {
        inv.errors.push(format!(
            "No pods found for Job {job_name} in namespace {ns} (may be TTL-deleted or never created)"
        ));

        if inv.target.pod.is_none() {
            inv.target.pod = Some(job_name.clone());
        }
        apply_historical_fallback(providers, inv).await;

        if inv.evidence.logs.logs.is_empty() {
            inv.set_meta("blocked_mode", "job_pods_not_found");
            parse_logs_universal(inv);
            return;
        }
        inv.set_meta("skipped_pod_collection", "historical_fallback_used");
        parse_logs_universal(inv);
        validate_aws_resources(providers, inv).await;
        return;
    }

    // Step 4: the most recent pod (Jobs retry).
    let pod_name = pods[0].name.clone();
    inv.target.pod = Some(pod_name.clone());
    inv.target.target_type = TargetType::Pod;
    inv.set_meta("job_pods_found", pods.len());
    inv.set_meta("job_pod_investigated", pod_name.clone());

    // Step 5: K8s context for the pod.
    if inv.evidence.k8s.pod_info.is_none() {
        apply_k8s_context(providers, inv, &pod_name, &ns, 20).await;
    }

    // Step 6: logs over the adjusted window.
    if inv.evidence.logs.logs_status.is_none() && inv.evidence.logs.logs.is_empty() {
        let container = inv.target.container.clone();
        let result = providers
            .logs
            .fetch_recent_logs(&pod_name, &ns, start, end, container.as_deref(), LOG_FETCH_LIMIT)
            .await;
        inv.evidence.logs.logs = result.entries;
        inv.evidence.logs.logs_status = Some(result.status);
        inv.evidence.logs.logs_reason = result.reason;
        inv.evidence.logs.logs_backend = Some(result.backend);
        inv.evidence.logs.logs_query = result.query_used;
    }

    parse_logs_universal(inv);
    validate_aws_resources(providers, inv).await;
}

async fn adjust_time_window_for_job(providers: &Providers, inv: &mut Investigation, ns: &str, job_name: &str) {
    match providers.k8s.workload_rollout_status(ns, "Job", job_name).await {
        Ok(rs) => {
            let alert_end = inv.time_window.end_time;
            if let Some(job_start) = rs.start_time {
                // Only adjust when the job started before the alert.
                if job_start < alert_end {
                    inv.time_window.start_time = job_start;
                    let duration_s = (alert_end - job_start).num_seconds();
                    inv.time_window.window = format!("job_lifetime_{duration_s}s");
                    inv.set_meta("time_window_adjusted", "job_start_time");
                }
            }
            inv.evidence.k8s.rollout_status = Some(rs);
        }
        Err(e) => inv.push_error("Failed to adjust time window for Job", e),
    }
}

/// Pods created by a Job carry `job-name=<name>`; this survives even after
/// the Job object itself is deleted. Newest first, since Jobs retry.
async fn find_job_pods(providers: &Providers, ns: &str, job_name: &str) -> Vec<PodInfo> {
    match providers
        .k8s
        .list_pods(ns, Some(&format!("job-name={job_name}")))
        .await
    {
        Ok(mut pods) => {
            pods.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            pods
        }
        Err(_) => Vec::new(),
    }
}

fn parse_logs_universal(inv: &mut Investigation) {
    if !inv.evidence.logs.logs.is_empty() && inv.evidence.logs.parsed_errors.is_empty() {
        let parsed = parse_log_entries(&inv.evidence.logs.logs, 50);
        inv.evidence.logs.parsed_errors = parsed.parsed_errors;
        inv.evidence.logs.parsing_metadata = Some(parsed.metadata);
    }
}

static S3_ERROR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:403|404|Forbidden|NoSuchBucket|AccessDenied).{0,120}(?:s3|bucket)").expect("static pattern")
});
static BUCKET_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)bucket[:\s]+([a-z0-9.\-]+)").expect("static pattern"));

/// Optional AWS validation when logs point at S3/IAM problems.
/// Gated on `AWS_EVIDENCE_ENABLED=true` plus an S3-looking parsed error.
async fn validate_aws_resources(providers: &Providers, inv: &mut Investigation) {
    if std::env::var("AWS_EVIDENCE_ENABLED").as_deref() != Ok("true") {
        return;
    }
    if inv.evidence.logs.parsed_errors.is_empty() {
        return;
    }

    let error_text: String = inv
        .evidence
        .logs
        .parsed_errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    if !S3_ERROR_RE.is_match(&error_text) {
        return;
    }

    // Bucket existence and region.
    if let Some(caps) = BUCKET_NAME_RE.captures(&error_text) {
        let bucket = caps[1].to_string();
        let validation = check_s3_bucket_exists(&providers.aws, &bucket).await;
        let denied = validation.get("error_code").and_then(serde_json::Value::as_str) == Some("403");
        inv.evidence.aws.metadata.insert("s3_validation".to_string(), validation);
        if denied {
            let location = get_s3_bucket_location(&providers.aws, &bucket).await;
            if let Some(region) = location.get("region").and_then(serde_json::Value::as_str) {
                inv.evidence
                    .aws
                    .metadata
                    .insert("s3_bucket_region".to_string(), json!(region));
            }
        }
    }

    // IRSA wiring: service account annotation -> IAM role -> trust policy.
    let sa_name = inv
        .evidence
        .k8s
        .pod_info
        .as_ref()
        .and_then(|p| p.service_account_name.clone());
    let Some(sa_name) = sa_name else { return };
    let Some(ns) = inv.target.namespace.clone() else { return };

    match providers.k8s.service_account_info(&ns, &sa_name).await {
        Ok(sa) => {
            if let Some(role_arn) = sa.annotations.get(IRSA_ANNOTATION) {
                inv.evidence
                    .aws
                    .metadata
                    .insert("irsa_role_arn".to_string(), json!(role_arn));

                let role_name = extract_role_name_from_arn(role_arn);
                let iam_info = get_iam_role_info(&providers.aws, &role_name).await;
                if let Some(trust) = iam_info.get("trust_policy").filter(|t| !t.is_null()) {
                    inv.evidence
                        .aws
                        .metadata
                        .insert("irsa_trust_check".to_string(), check_irsa_trust_policy(trust));
                }
                inv.evidence.aws.metadata.insert("iam_role_info".to_string(), iam_info);
            } else {
                inv.evidence.aws.metadata.insert("irsa_role_arn".to_string(), serde_json::Value::Null);
                inv.evidence.aws.metadata.insert(
                    "irsa_issue".to_string(),
                    json!("No IRSA annotation found on service account"),
                );
            }
        }
        Err(e) => inv.push_error("AWS IAM validation failed", e),
    }
}
