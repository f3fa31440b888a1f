//! The RCA graph: `baseline → decide → (plan → tools)* → synth`.
//!
//! A bounded plan/act/synthesize loop. The decide node keeps demanding
//! evidence while quality is low, inputs are missing, contradictions are
//! flagged, no hypothesis exists, or the top confidence is below
//! threshold — and, critically, while a high-confidence hypothesis has
//! not been verified by family-appropriate tools. Spin guards stop the
//! loop when tool rounds make no progress.

use std::collections::BTreeSet;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use tarka_core::model::analysis::{RcaInsights, RcaStatus};
use tarka_core::snapshot::analysis_snapshot;
use tarka_core::{ChatToolEvent, Investigation, ToolOutcome};
use tarka_llm::{LlmClient, RcaSynthesisResponse, ToolPlanResponse};
use tarka_providers::Providers;

use crate::policy::ChatPolicy;
use crate::prompts::{build_rca_planner_prompt, build_rca_synthesis_prompt};
use crate::summaries::{summarize_tool_result, tool_call_key};
use crate::tools::{run_tool, ToolContext};

/// Confidence below this always demands more evidence.
const CONFIDENCE_THRESHOLD: i64 = 70;
/// At or above this, verification tools are mandatory before stopping.
const VERIFICATION_THRESHOLD: i64 = 80;
/// A single verification tool suffices only at this confidence.
const SINGLE_TOOL_CONFIDENCE: i64 = 95;

/// Decide whether the loop still needs evidence.
#[must_use]
pub fn need_more_evidence(analysis_json: &Value, tool_events: &[ChatToolEvent]) -> bool {
    let quality = analysis_json.pointer("/analysis/features/quality");
    let evidence_quality = quality
        .and_then(|q| q.get("evidence_quality"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_ascii_lowercase();
    let missing: usize = quality
        .and_then(|q| q.get("missing_inputs"))
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    let contradictions: usize = quality
        .and_then(|q| q.get("contradiction_flags"))
        .and_then(Value::as_array)
        .map_or(0, Vec::len);

    let hyps = analysis_json
        .pointer("/analysis/hypotheses")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let top_conf = hyps
        .first()
        .and_then(|h| h.get("confidence_0_100"))
        .and_then(Value::as_i64)
        .unwrap_or(0);

    if evidence_quality == "low" || missing > 0 || contradictions > 0 || hyps.is_empty() {
        return true;
    }
    if top_conf < CONFIDENCE_THRESHOLD {
        return true;
    }

    // High confidence still needs family-appropriate verification: pattern
    // matches identify proximate causes, verification tools find roots.
    if top_conf >= VERIFICATION_THRESHOLD {
        let top = hyps.first().cloned().unwrap_or(Value::Null);
        let label = top
            .get("title")
            .or_else(|| top.get("hypothesis_id"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_ascii_lowercase();
        let refs = top
            .get("supporting_refs")
            .and_then(Value::as_array)
            .map(|xs| {
                xs.iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(" ")
                    .to_ascii_lowercase()
            })
            .unwrap_or_default();

        let (relevant, require_pair): (&[&str], bool) =
            if label.contains("s3") || label.contains("bucket") || refs.contains("s3") {
                (&["aws.s3_bucket_location", "aws.iam_role_permissions"], true)
            } else if label.contains("rds") || label.contains("database") || label.contains("db ") || label.contains("irsa") {
                (&["aws.rds_status", "aws.iam_role_permissions"], true)
            } else if label.contains("image") || label.contains("ecr") || label.contains("pull") {
                (&["aws.ecr_image", "aws.iam_role_permissions"], true)
            } else if label.contains("network") || label.contains("connectivity") || label.contains("nat") || label.contains("vpc") {
                (&["aws.nat_gateway", "aws.vpc_endpoint", "aws.security_group"], false)
            } else if label.contains("pod") || label.contains("container") || label.contains("k8s") || label.contains("crash") {
                (&["k8s.pod_context", "k8s.rollout_status"], false)
            } else {
                (
                    &[
                        "aws.s3_bucket_location",
                        "aws.iam_role_permissions",
                        "aws.ec2_status",
                        "aws.ebs_health",
                        "aws.rds_status",
                        "aws.ecr_image",
                        "aws.security_group",
                        "aws.nat_gateway",
                        "aws.vpc_endpoint",
                        "k8s.pod_context",
                        "k8s.rollout_status",
                    ],
                    false,
                )
            };

        let verified: BTreeSet<&str> = tool_events
            .iter()
            .filter(|ev| {
                ev.ok
                    && !matches!(
                        ev.outcome,
                        Some(ToolOutcome::Empty | ToolOutcome::Unavailable | ToolOutcome::Error)
                    )
            })
            .filter_map(|ev| relevant.iter().find(|r| **r == ev.tool).copied())
            .collect();

        let ok = if require_pair {
            verified.len() >= 2 || (verified.len() == 1 && top_conf >= SINGLE_TOOL_CONFIDENCE)
        } else {
            !verified.is_empty()
        };
        if !ok {
            return true;
        }
    }

    false
}

/// Per-invocation loop state.
struct RcaState {
    analysis_json: Value,
    tool_events: Vec<ChatToolEvent>,
    remaining_steps: i64,
    remaining_tool_calls: i64,
    last_round_new_keys: i64,
    last_round_outcomes: Vec<ToolOutcome>,
}

/// Run the RCA loop against a finished investigation and attach
/// `analysis.rca` plus `meta.rca_tool_events`. Best-effort: no failure
/// mode propagates to the worker.
pub async fn attach_rca(
    providers: &Providers,
    pool: Option<&sqlx::PgPool>,
    llm: &LlmClient,
    policy: &ChatPolicy,
    investigation: &mut Investigation,
) {
    let allowed = policy.allowed_tools(None);
    let aj = analysis_snapshot(investigation);

    let mut state = RcaState {
        analysis_json: aj,
        tool_events: Vec::new(),
        remaining_steps: policy.max_steps,
        remaining_tool_calls: policy.max_tool_calls,
        last_round_new_keys: -1,
        last_round_outcomes: Vec::new(),
    };

    loop {
        // ---- decide
        let mut more = need_more_evidence(&state.analysis_json, &state.tool_events);
        // Spin guards: no new keys last round, or nothing productive.
        if state.last_round_new_keys == 0 {
            more = false;
        }
        if !state.last_round_outcomes.is_empty()
            && state.last_round_outcomes.iter().all(|o| o.is_unproductive())
        {
            more = false;
        }
        if state.remaining_steps <= 0 || state.remaining_tool_calls <= 0 {
            more = false;
        }
        if !more {
            break;
        }

        // ---- plan
        let prompt = build_rca_planner_prompt(
            &state.analysis_json,
            &state.tool_events,
            &allowed,
        );
        let plan: ToolPlanResponse = match llm.generate_json(&prompt).await {
            Ok(plan) => plan,
            Err(code) => {
                warn!(error = %code, "RCA planner failed");
                investigation.errors.push(format!("rca_planner: {code}"));
                break;
            }
        };
        if plan.tool_calls.is_empty() {
            break;
        }

        // ---- tools
        let ctx = ToolContext {
            policy,
            action_policy: None,
            providers,
            pool,
            analysis_json: &state.analysis_json,
            case_id: None,
            run_id: None,
            redact_infrastructure: false,
        };

        let mut seen: BTreeSet<String> = state
            .tool_events
            .iter()
            .filter_map(|ev| ev.key.clone())
            .collect();
        let mut new_unique = 0i64;
        let mut outcomes: Vec<ToolOutcome> = Vec::new();
        let mut updated_analysis: Option<Value> = None;

        for tc in plan.tool_calls.iter().take(3) {
            if state.remaining_tool_calls <= 0 {
                break;
            }
            let key = tool_call_key(&tc.tool, &tc.args);
            if seen.contains(&key) {
                // The duplicate still burns budget so the planner cannot
                // loop forever on one call.
                state
                    .tool_events
                    .push(ChatToolEvent::skipped_duplicate(&tc.tool, json!(tc.args), key));
                outcomes.push(ToolOutcome::SkippedDuplicate);
                state.remaining_tool_calls -= 1;
                continue;
            }
            seen.insert(key.clone());
            new_unique += 1;

            let result = run_tool(&ctx, &tc.tool, &tc.args).await;
            let (outcome, summary) =
                summarize_tool_result(&tc.tool, result.ok, result.error.as_deref(), result.result.as_ref());
            debug!(tool = %tc.tool, outcome = ?outcome, "rca tool executed");
            outcomes.push(outcome);
            if let Some(updated) = &result.updated_analysis {
                updated_analysis = Some(updated.clone());
            }
            state.tool_events.push(ChatToolEvent {
                tool: tc.tool.clone(),
                args: json!(tc.args),
                ok: result.ok,
                result: result.result,
                error: result.error,
                outcome: Some(outcome),
                summary: Some(summary),
                key: Some(key),
            });
            state.remaining_tool_calls -= 1;
        }

        if let Some(updated) = updated_analysis {
            state.analysis_json = updated;
        }
        state.remaining_steps -= 1;
        state.last_round_new_keys = new_unique;
        state.last_round_outcomes = outcomes;
    }

    // ---- synth
    let prompt = build_rca_synthesis_prompt(&state.analysis_json, &state.tool_events);
    let rca = match llm.generate_json::<RcaSynthesisResponse>(&prompt).await {
        Ok(synth) => {
            let mut status = match synth.status.as_str() {
                "ok" => RcaStatus::Ok,
                "blocked" => RcaStatus::Blocked,
                _ => RcaStatus::Unknown,
            };
            // Substantive unknowns promote to ok; the confidence field
            // carries the uncertainty.
            if status == RcaStatus::Unknown && !synth.summary.is_empty() && !synth.root_cause.is_empty() {
                status = RcaStatus::Ok;
            }
            RcaInsights {
                status,
                summary: Some(synth.summary).filter(|s| !s.is_empty()),
                root_cause: Some(synth.root_cause).filter(|s| !s.is_empty()),
                confidence_0_1: Some(synth.confidence_0_1),
                evidence: synth.evidence,
                remediation: synth.remediation,
                unknowns: synth.unknowns,
            }
        }
        Err(code) => {
            warn!(error = %code, tool_events = state.tool_events.len(), "RCA synthesis failed");
            RcaInsights::status_only(
                RcaStatus::Unavailable,
                format!("RCA synthesis unavailable: {code}"),
            )
        }
    };

    info!(
        status = ?rca.status,
        tool_events = state.tool_events.len(),
        "rca attached"
    );
    investigation.analysis.rca = Some(rca);
    if let Ok(events) = serde_json::to_value(&state.tool_events) {
        investigation.set_meta("rca_tool_events", events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aj(quality: &str, missing: usize, top_conf: i64, title: &str) -> Value {
        json!({
            "analysis": {
                "features": {
                    "quality": {
                        "evidence_quality": quality,
                        "missing_inputs": (0..missing).map(|i| format!("m{i}")).collect::<Vec<_>>(),
                        "contradiction_flags": [],
                    },
                },
                "hypotheses": if top_conf > 0 {
                    json!([{"hypothesis_id": "h1", "title": title, "confidence_0_100": top_conf, "supporting_refs": []}])
                } else {
                    json!([])
                },
            }
        })
    }

    fn event(tool: &str, outcome: ToolOutcome) -> ChatToolEvent {
        ChatToolEvent {
            tool: tool.to_string(),
            args: json!({}),
            ok: outcome == ToolOutcome::Ok,
            result: Some(json!({"status": "ok"})),
            error: None,
            outcome: Some(outcome),
            summary: None,
            key: Some(format!("{tool}:abc")),
        }
    }

    #[test]
    fn test_low_quality_or_missing_needs_more() {
        assert!(need_more_evidence(&aj("low", 0, 90, "pod crash"), &[]));
        assert!(need_more_evidence(&aj("high", 2, 90, "pod crash"), &[]));
        assert!(need_more_evidence(&aj("high", 0, 0, ""), &[]));
        assert!(need_more_evidence(&aj("high", 0, 60, "x"), &[]));
    }

    #[test]
    fn test_s3_requires_verification_pair() {
        let a = aj("high", 0, 85, "Job failed on S3 access");
        // No tools yet: keep going.
        assert!(need_more_evidence(&a, &[]));
        // One tool at 85: not enough for an S3 pair.
        assert!(need_more_evidence(&a, &[event("aws.s3_bucket_location", ToolOutcome::Ok)]));
        // Both tools: verified.
        assert!(!need_more_evidence(
            &a,
            &[
                event("aws.s3_bucket_location", ToolOutcome::Ok),
                event("aws.iam_role_permissions", ToolOutcome::Ok),
            ]
        ));
    }

    #[test]
    fn test_s3_single_tool_at_95() {
        let a = aj("high", 0, 95, "S3 bucket missing");
        assert!(!need_more_evidence(&a, &[event("aws.s3_bucket_location", ToolOutcome::Ok)]));
    }

    #[test]
    fn test_pod_any_single_tool_suffices() {
        let a = aj("high", 0, 85, "pod crashloop from bad config");
        assert!(need_more_evidence(&a, &[]));
        assert!(!need_more_evidence(&a, &[event("k8s.pod_context", ToolOutcome::Ok)]));
    }

    #[test]
    fn test_failed_verification_does_not_count() {
        let a = aj("high", 0, 85, "pod crashloop");
        assert!(need_more_evidence(&a, &[event("k8s.pod_context", ToolOutcome::Error)]));
        assert!(need_more_evidence(&a, &[event("k8s.pod_context", ToolOutcome::Empty)]));
    }

    #[test]
    fn test_moderate_confidence_without_verification_stops() {
        // 70..80: above threshold, below verification band.
        let a = aj("high", 0, 75, "anything");
        assert!(!need_more_evidence(&a, &[]));
    }
}
