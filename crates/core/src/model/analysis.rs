//! Analysis records: features, hypotheses, scores, verdict, RCA.

use serde::{Deserialize, Serialize};

use crate::family::Family;

/// Classification of a run for triage routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Actionable,
    Noisy,
    Informational,
}

impl Classification {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Actionable => "actionable",
            Self::Noisy => "noisy",
            Self::Informational => "informational",
        }
    }
}

/// Kubernetes-shaped features folded out of evidence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct K8sFeatures {
    pub waiting_reason: Option<String>,
    pub restart_rate_5m_max: Option<f64>,
    pub oom_killed: bool,
    pub evicted: bool,
    pub probe_failure_type: Option<String>,
    pub crash_duration_seconds: Option<i64>,
}

/// Metric-shaped features.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricFeatures {
    pub cpu_throttle_p95_pct: Option<f64>,
    pub cpu_near_limit: Option<bool>,
    pub memory_near_limit: Option<bool>,
    pub memory_usage_p95_bytes: Option<f64>,
    pub http_5xx_rate_p95: Option<f64>,
}

/// Log-shaped features.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogFeatures {
    /// `ok | empty | unavailable`.
    pub status: Option<String>,
    pub error_count: usize,
    pub fatal_count: usize,
    pub exception_count: usize,
}

/// Evidence-quality assessment consumed by the RCA decide node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityFeatures {
    /// `low | medium | high`.
    pub evidence_quality: String,
    #[serde(default)]
    pub missing_inputs: Vec<String>,
    #[serde(default)]
    pub contradiction_flags: Vec<String>,
}

/// Compact feature record derived deterministically from evidence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Features {
    pub family: Option<Family>,
    #[serde(default)]
    pub k8s: K8sFeatures,
    #[serde(default)]
    pub metrics: MetricFeatures,
    #[serde(default)]
    pub logs: LogFeatures,
    #[serde(default)]
    pub quality: QualityFeatures,
}

/// One diagnostic hypothesis, proposed from features only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    pub hypothesis_id: String,
    pub title: String,
    /// Clamped to [0, 100].
    pub confidence_0_100: u8,
    #[serde(default)]
    pub why: Vec<String>,
    #[serde(default)]
    pub supporting_refs: Vec<String>,
    #[serde(default)]
    pub next_tests: Vec<String>,
}

impl Hypothesis {
    /// Clamp confidence into [0, 100].
    #[must_use]
    pub fn clamp_confidence(raw: i64) -> u8 {
        raw.clamp(0, 100) as u8
    }
}

/// Numeric triage scores. `classification` here is a denormalized copy of
/// `Verdict::classification` (the SSOT) for read paths that only load
/// scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scores {
    pub impact_score: u8,
    pub confidence_score: u8,
    pub noise_score: u8,
    pub classification: Classification,
    #[serde(default)]
    pub reason_codes: Vec<String>,
}

/// Rendered verdict for the report header and inbox rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub severity: Option<String>,
    pub classification: Classification,
    pub primary_driver: String,
    pub one_liner: String,
    pub family: Family,
    #[serde(default)]
    pub next: Vec<String>,
}

/// Change-correlation sub-record (best-effort, read-only).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeCorrelation {
    /// 0.0..=1.0 likelihood that a recent change explains the symptom.
    pub score: Option<f64>,
    pub summary: Option<String>,
    #[serde(default)]
    pub signals: Vec<String>,
}

/// Noise assessment sub-record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoiseAssessment {
    pub score: Option<u8>,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Per-container capacity numbers used by the right-sizing report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerCapacity {
    pub container: String,
    pub cpu_usage_p95_cores: Option<f64>,
    pub cpu_request_cores: Option<f64>,
    pub cpu_limit_cores: Option<f64>,
    pub throttle_p95_pct: Option<f64>,
    pub proposed_request_millicores: Option<i64>,
    pub note: Option<String>,
}

/// Capacity report attached for throttling/OOM/memory-pressure families.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapacityReport {
    #[serde(default)]
    pub containers: Vec<ContainerCapacity>,
    pub summary: Option<String>,
}

/// Report-time enrichment: a short LLM gloss over the deterministic
/// analysis, shown in inbox rows. Never a substitute for the verdict.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentInsights {
    /// One-line label for list views.
    pub label: Option<String>,
    pub summary: Option<String>,
    pub likely_root_cause: Option<String>,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub next_steps: Vec<String>,
}

/// RCA synthesis status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RcaStatus {
    Ok,
    Unknown,
    Blocked,
    Unavailable,
    Error,
}

/// Root-cause insights produced by the RCA graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RcaInsights {
    pub status: RcaStatus,
    pub summary: Option<String>,
    pub root_cause: Option<String>,
    pub confidence_0_1: Option<f64>,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub remediation: Vec<String>,
    #[serde(default)]
    pub unknowns: Vec<String>,
}

impl RcaInsights {
    /// Minimal record for the unavailable/error paths.
    #[must_use]
    pub fn status_only(status: RcaStatus, summary: impl Into<String>) -> Self {
        Self {
            status,
            summary: Some(summary.into()),
            root_cause: None,
            confidence_0_1: None,
            evidence: Vec::new(),
            remediation: Vec::new(),
            unknowns: Vec::new(),
        }
    }
}

/// The full analysis block of an investigation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Analysis {
    pub features: Option<Features>,
    pub verdict: Option<Verdict>,
    pub scores: Option<Scores>,
    #[serde(default)]
    pub hypotheses: Vec<Hypothesis>,
    pub change: Option<ChangeCorrelation>,
    pub noise: Option<NoiseAssessment>,
    pub capacity: Option<CapacityReport>,
    pub enrichment: Option<EnrichmentInsights>,
    pub rca: Option<RcaInsights>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_clamp() {
        assert_eq!(Hypothesis::clamp_confidence(-5), 0);
        assert_eq!(Hypothesis::clamp_confidence(55), 55);
        assert_eq!(Hypothesis::clamp_confidence(250), 100);
    }
}
