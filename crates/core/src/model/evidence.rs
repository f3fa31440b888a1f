//! Evidence records populated by the collectors.
//!
//! Every field is optional/sparse: collectors fill a field only when it is
//! still empty (idempotence) and append to `Investigation.errors` instead
//! of failing. AWS and GitHub evidence stay semi-structured maps; the
//! providers attach typed records serialized as JSON values.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One sample of an instant PromQL query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromSample {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    pub value: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

/// One series of a range PromQL query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromSeries {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    /// (unix seconds, value) pairs.
    #[serde(default)]
    pub values: Vec<(f64, f64)>,
}

/// Container spec subset we care about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: Option<String>,
}

/// Terminated-state details from `lastState.terminated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminatedState {
    pub exit_code: Option<i32>,
    pub reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Container runtime state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Waiting {
        reason: Option<String>,
        message: Option<String>,
    },
    Running,
    Terminated(TerminatedState),
}

/// Container status within a pod.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStatusInfo {
    pub name: String,
    pub ready: bool,
    pub restart_count: i32,
    pub state: Option<ContainerState>,
    pub last_state: Option<TerminatedState>,
}

/// Simplified pod record from the K8s API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub phase: Option<String>,
    pub status_reason: Option<String>,
    pub node: Option<String>,
    pub service_account_name: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
    #[serde(default)]
    pub container_statuses: Vec<ContainerStatusInfo>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Pod condition from `status.conditions[]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodCondition {
    pub condition_type: String,
    pub status: String,
    pub reason: Option<String>,
    pub message: Option<String>,
}

/// One Kubernetes event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct K8sEventInfo {
    pub event_type: Option<String>,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub count: Option<i32>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// One ownerReference hop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerRef {
    pub kind: String,
    pub name: String,
}

/// Resolved controller chain for a pod.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OwnerChain {
    #[serde(default)]
    pub owners: Vec<OwnerRef>,
    /// The top-level workload (Deployment/StatefulSet/DaemonSet/Job/...),
    /// when one could be resolved.
    pub workload: Option<OwnerRef>,
}

/// Rollout/status summary for a workload. Which numeric fields apply
/// depends on `kind`; `source` records whether this came from the K8s API
/// or the kube-state-metrics fallback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RolloutStatus {
    pub kind: String,
    pub name: String,
    pub replicas: Option<i64>,
    pub ready_replicas: Option<i64>,
    pub updated_replicas: Option<i64>,
    pub unavailable_replicas: Option<i64>,
    pub current_replicas: Option<i64>,
    pub desired_number_scheduled: Option<i64>,
    pub number_ready: Option<i64>,
    pub updated_number_scheduled: Option<i64>,
    pub observed_generation: Option<i64>,
    pub generation: Option<i64>,
    // Job-specific
    pub active: Option<i64>,
    pub succeeded: Option<i64>,
    pub failed: Option<i64>,
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub source: Option<String>,
}

/// Deterministic image-pull diagnostics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImagePullDiagnostics {
    pub container: Option<String>,
    pub waiting_reason: Option<String>,
    pub waiting_message: Option<String>,
    /// Stable bucket: `not_found | auth | tls | network | unknown`.
    pub error_bucket: Option<String>,
    pub error_evidence: Option<String>,
    pub image: Option<String>,
    pub registry_host: Option<String>,
    pub repo: Option<String>,
    pub tag: Option<String>,
    pub digest: Option<String>,
    pub service_account_name: Option<String>,
    pub service_account_image_pull_secrets: Option<Vec<String>>,
    pub ecr_check: Option<Value>,
}

/// OOM hint extracted from labels/annotations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OomHint {
    pub container: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
}

/// Kubernetes-derived evidence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct K8sEvidence {
    pub pod_info: Option<PodInfo>,
    #[serde(default)]
    pub pod_conditions: Vec<PodCondition>,
    #[serde(default)]
    pub pod_events: Vec<K8sEventInfo>,
    pub owner_chain: Option<OwnerChain>,
    pub rollout_status: Option<RolloutStatus>,
    pub image_pull_diagnostics: Option<ImagePullDiagnostics>,
    pub oom_hint: Option<OomHint>,
}

/// Usage-and-limits bundle for one resource (CPU cores or memory bytes).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageAndLimits {
    #[serde(default)]
    pub usage: Vec<PromSeries>,
    pub limit: Option<f64>,
    pub request: Option<f64>,
    pub query_used: Option<String>,
}

/// Range-query bundle, keeping the query for debuggability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RangeResult {
    #[serde(default)]
    pub series: Vec<PromSeries>,
    pub query_used: Option<String>,
}

/// HTTP 5xx probe over a small set of common series names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Http5xxResult {
    #[serde(default)]
    pub series: Vec<PromSeries>,
    pub query_used: Option<String>,
    pub error: Option<String>,
}

/// Instant-query `up/down` skeleton for non-pod alerts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromBaseline {
    #[serde(default)]
    pub checks: BTreeMap<String, Vec<PromSample>>,
    #[serde(default)]
    pub queries_used: BTreeMap<String, String>,
}

/// Prometheus-derived evidence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsEvidence {
    pub pod_phase_signal: Option<RangeResult>,
    pub restart_data: Option<RangeResult>,
    pub cpu_metrics: Option<UsageAndLimits>,
    pub memory_metrics: Option<UsageAndLimits>,
    pub throttling_data: Option<RangeResult>,
    pub http_5xx: Option<Http5xxResult>,
    pub prom_baseline: Option<PromBaseline>,
}

/// One log entry from the logs backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: Option<String>,
    pub message: String,
}

/// One deterministic log finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedLogError {
    pub timestamp: Option<String>,
    /// `ERROR` | `FATAL` | `EXCEPTION`.
    pub severity: String,
    pub message: String,
    pub pattern_matched: String,
    pub line_number: usize,
}

/// Aggregate stats over a parse pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogParseMetadata {
    pub total_lines: usize,
    pub error_count: usize,
    pub fatal_count: usize,
    pub exception_count: usize,
    #[serde(default)]
    pub unique_patterns: Vec<String>,
}

/// Logs evidence: raw entries plus deterministic parse results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogsEvidence {
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    /// `ok | empty | unavailable` once a fetch has been attempted.
    pub logs_status: Option<String>,
    pub logs_reason: Option<String>,
    pub logs_backend: Option<String>,
    pub logs_query: Option<String>,
    #[serde(default)]
    pub parsed_errors: Vec<ParsedLogError>,
    pub parsing_metadata: Option<LogParseMetadata>,
}

/// AWS evidence: typed records from the validators serialized into a map
/// keyed by check name (`s3_validation`, `iam_role_info`, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AwsEvidence {
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// GitHub evidence attached by change correlation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GithubEvidence {
    #[serde(default)]
    pub metadata: Map<String, Value>,
}
