//! Versioned response envelopes for structured LLM calls.
//!
//! Every schema clamps string lengths, list sizes and numeric ranges after
//! deserialization; malformed items are dropped rather than failing the
//! whole response.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Post-deserialization clamping. `generate_json` applies this to every
/// schema so models cannot blow past the prompt-context budgets.
pub trait Clamped: Sized {
    #[must_use]
    fn clamped(self) -> Self;
}

fn clamp_str(s: String, max_chars: usize) -> String {
    let t = s.trim();
    if t.chars().count() <= max_chars {
        return t.to_string();
    }
    let mut out: String = t.chars().take(max_chars.saturating_sub(1)).collect();
    out = out.trim_end().to_string();
    out.push('…');
    out
}

fn clamp_list(xs: Vec<String>, max_items: usize, max_chars: usize) -> Vec<String> {
    xs.into_iter()
        .take(max_items)
        .map(|x| clamp_str(x, max_chars))
        .filter(|x| !x.is_empty())
        .collect()
}

fn clamp_f64(x: f64, lo: f64, hi: f64) -> f64 {
    if x.is_nan() {
        return lo;
    }
    x.clamp(lo, hi)
}

/// One requested tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    #[serde(default)]
    pub tool: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// Planner envelope (`tarka.tool_plan.v1`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPlanResponse {
    #[serde(default = "ToolPlanResponse::version")]
    pub schema_version: String,
    #[serde(default)]
    pub reply: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default)]
    pub meta: Option<ToolPlanMeta>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPlanMeta {
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ToolPlanResponse {
    pub const VERSION: &'static str = "tarka.tool_plan.v1";

    fn version() -> String {
        Self::VERSION.to_string()
    }
}

impl Clamped for ToolPlanResponse {
    fn clamped(mut self) -> Self {
        self.schema_version = Self::VERSION.to_string();
        self.reply = clamp_str(self.reply, 600);
        self.tool_calls.truncate(3);
        for tc in &mut self.tool_calls {
            tc.tool = clamp_str(std::mem::take(&mut tc.tool), 120);
        }
        self.tool_calls.retain(|tc| !tc.tool.is_empty());
        if let Some(meta) = &mut self.meta {
            meta.warnings = clamp_list(std::mem::take(&mut meta.warnings), 6, 140);
        }
        self
    }
}

/// RCA synthesis envelope (`tarka.rca.v1`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RcaSynthesisResponse {
    #[serde(default = "RcaSynthesisResponse::version")]
    pub schema_version: String,
    #[serde(default = "RcaSynthesisResponse::default_status")]
    pub status: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub root_cause: String,
    #[serde(default)]
    pub confidence_0_1: f64,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub remediation: Vec<String>,
    #[serde(default)]
    pub unknowns: Vec<String>,
    #[serde(default)]
    pub meta: Option<RcaSynthesisMeta>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RcaSynthesisMeta {
    #[serde(default)]
    pub notes: Vec<String>,
}

impl RcaSynthesisResponse {
    pub const VERSION: &'static str = "tarka.rca.v1";

    fn version() -> String {
        Self::VERSION.to_string()
    }

    fn default_status() -> String {
        "unknown".to_string()
    }
}

impl Clamped for RcaSynthesisResponse {
    fn clamped(mut self) -> Self {
        self.schema_version = Self::VERSION.to_string();
        let status = self.status.trim().to_ascii_lowercase();
        self.status = match status.as_str() {
            "ok" | "blocked" => status,
            _ => "unknown".to_string(),
        };
        self.summary = clamp_str(self.summary, 240);
        self.root_cause = clamp_str(self.root_cause, 240);
        self.confidence_0_1 = clamp_f64(self.confidence_0_1, 0.0, 1.0);
        self.evidence = clamp_list(std::mem::take(&mut self.evidence), 8, 160);
        self.remediation = clamp_list(std::mem::take(&mut self.remediation), 10, 160);
        self.unknowns = clamp_list(std::mem::take(&mut self.unknowns), 8, 160);
        if let Some(meta) = &mut self.meta {
            meta.notes = clamp_list(std::mem::take(&mut meta.notes), 6, 160);
        }
        self
    }
}

/// Report-time enrichment envelope (`tarka.enrich.v1`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentResponse {
    #[serde(default = "EnrichmentResponse::version")]
    pub schema_version: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub likely_root_cause: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub unknowns: Vec<String>,
}

impl EnrichmentResponse {
    pub const VERSION: &'static str = "tarka.enrich.v1";

    fn version() -> String {
        Self::VERSION.to_string()
    }
}

impl Clamped for EnrichmentResponse {
    fn clamped(mut self) -> Self {
        self.schema_version = Self::VERSION.to_string();
        self.summary = clamp_str(self.summary, 200);
        self.likely_root_cause = clamp_str(self.likely_root_cause, 200);
        self.confidence = clamp_f64(self.confidence, 0.0, 1.0);
        self.evidence = clamp_list(std::mem::take(&mut self.evidence), 5, 140);
        self.next_steps = clamp_list(std::mem::take(&mut self.next_steps), 5, 140);
        self.unknowns = clamp_list(std::mem::take(&mut self.unknowns), 5, 140);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_plan_clamps_calls_and_reply() {
        let raw = serde_json::json!({
            "schema_version": "tarka.tool_plan.v1",
            "reply": "x".repeat(1000),
            "tool_calls": [
                {"tool": "logs.tail", "args": {}},
                {"tool": "promql.instant", "args": {}},
                {"tool": "k8s.events", "args": {}},
                {"tool": "aws.ec2_status", "args": {}},
            ],
        });
        let plan: ToolPlanResponse = serde_json::from_value(raw).unwrap();
        let plan = plan.clamped();
        assert_eq!(plan.tool_calls.len(), 3);
        assert!(plan.reply.chars().count() <= 600);
    }

    #[test]
    fn test_rca_status_normalization_and_confidence_clamp() {
        let raw = serde_json::json!({
            "status": "WEIRD",
            "summary": "s",
            "root_cause": "r",
            "confidence_0_1": 7.5,
        });
        let r: RcaSynthesisResponse = serde_json::from_value(raw).unwrap();
        let r = r.clamped();
        assert_eq!(r.status, "unknown");
        assert!((r.confidence_0_1 - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_fields_default() {
        let r: RcaSynthesisResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        let r = r.clamped();
        assert_eq!(r.status, "unknown");
        assert!(r.evidence.is_empty());
    }

    #[test]
    fn test_list_caps() {
        let raw = serde_json::json!({
            "status": "ok",
            "evidence": (0..20).map(|i| format!("e{i}")).collect::<Vec<_>>(),
        });
        let r: RcaSynthesisResponse = serde_json::from_value::<RcaSynthesisResponse>(raw).unwrap().clamped();
        assert_eq!(r.evidence.len(), 8);
    }
}
