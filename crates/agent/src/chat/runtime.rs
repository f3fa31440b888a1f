//! Blocking chat runtime: `llm → (tools → llm)*` with per-invocation
//! budgets and duplicate suppression.
//!
//! Fail-fast rule: when every tool call in a round errors, the loop takes
//! one final LLM turn with no new tool calls to produce an error-grounded
//! reply — it never pivots to unrelated tools after a failure.

use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::warn;

use tarka_core::{ChatMessage, ChatToolEvent, ToolOutcome};
use tarka_llm::{LlmClient, ToolPlanResponse};

use crate::chat::intents::try_handle_case_intents;
use crate::prompts::build_chat_plan_prompt;
use crate::summaries::{summarize_tool_result, tool_call_key};
use crate::tools::{run_tool, ToolContext};

/// Result of one blocking chat turn.
#[derive(Debug, Clone, Default)]
pub struct ChatRunResult {
    pub reply: String,
    pub tool_events: Vec<ChatToolEvent>,
    pub updated_analysis: Option<Value>,
}

fn fallback_reply(analysis_json: &Value, err: &str) -> String {
    let mut msg = format!("LLM unavailable ({err}). ");
    if let Some(hyps) = analysis_json
        .pointer("/analysis/hypotheses")
        .and_then(Value::as_array)
        .filter(|h| !h.is_empty())
    {
        msg.push_str("Top hypotheses from diagnostics:\n");
        for h in hyps.iter().take(3) {
            let title = h.get("title").and_then(Value::as_str).unwrap_or("unknown");
            let conf = h.get("confidence_0_100").and_then(Value::as_i64).unwrap_or(0);
            msg.push_str(&format!("- {title}: {conf}/100\n"));
        }
    }
    msg
}

/// One blocking case-chat turn.
pub async fn run_chat(
    ctx: &ToolContext<'_>,
    llm: &LlmClient,
    user_message: &str,
    history: &[ChatMessage],
) -> ChatRunResult {
    if !ctx.policy.enabled {
        return ChatRunResult {
            reply: "Chat is disabled by policy.".to_string(),
            ..ChatRunResult::default()
        };
    }

    // Deterministic fast paths first: zero LLM calls for greetings,
    // summaries, status and DB counts.
    let intent = try_handle_case_intents(ctx.pool, ctx.analysis_json, user_message).await;
    if intent.handled {
        return ChatRunResult {
            reply: intent.reply,
            tool_events: intent.tool_events,
            updated_analysis: None,
        };
    }

    let allowed = ctx.policy.allowed_tools(ctx.action_policy);
    let mut tool_events: Vec<ChatToolEvent> = Vec::new();
    let mut updated_analysis: Option<Value> = None;
    let mut current_analysis = ctx.analysis_json.clone();
    let mut remaining_calls = ctx.policy.max_tool_calls;
    let mut last_reply = String::new();
    let mut force_final_turn = false;

    for _step in 0..ctx.policy.max_steps {
        let prompt = build_chat_plan_prompt(
            ctx.policy,
            &allowed,
            &current_analysis,
            user_message,
            history,
            &tool_events,
        );
        let plan: ToolPlanResponse = match llm.generate_json(&prompt).await {
            Ok(plan) => plan,
            Err(code) => {
                warn!(error = %code, "chat planner failed");
                return ChatRunResult {
                    reply: fallback_reply(&current_analysis, &code),
                    tool_events,
                    updated_analysis,
                };
            }
        };
        last_reply = plan.reply.clone();

        if plan.tool_calls.is_empty() || force_final_turn {
            break;
        }
        if remaining_calls <= 0 {
            last_reply = "Reached the tool-call limit. Please narrow your question.".to_string();
            break;
        }

        let seen: BTreeSet<String> = tool_events.iter().filter_map(|ev| ev.key.clone()).collect();
        let mut seen = seen;
        let mut round_outcomes: Vec<ToolOutcome> = Vec::new();
        let mut ran_any = false;

        for tc in plan.tool_calls.iter().take(3) {
            if remaining_calls <= 0 {
                break;
            }
            let key = tool_call_key(&tc.tool, &tc.args);
            if seen.contains(&key) {
                tool_events.push(ChatToolEvent::skipped_duplicate(&tc.tool, json!(tc.args), key));
                round_outcomes.push(ToolOutcome::SkippedDuplicate);
                remaining_calls -= 1;
                continue;
            }
            seen.insert(key.clone());

            let exec_ctx = ToolContext {
                analysis_json: &current_analysis,
                ..*ctx
            };
            let result = run_tool(&exec_ctx, &tc.tool, &tc.args).await;
            let (outcome, summary) =
                summarize_tool_result(&tc.tool, result.ok, result.error.as_deref(), result.result.as_ref());
            round_outcomes.push(outcome);
            if let Some(updated) = &result.updated_analysis {
                updated_analysis = Some(updated.clone());
                current_analysis = updated.clone();
            }
            tool_events.push(ChatToolEvent {
                tool: tc.tool.clone(),
                args: json!(tc.args),
                ok: result.ok,
                result: result.result,
                error: result.error,
                outcome: Some(outcome),
                summary: Some(summary),
                key: Some(key),
            });
            remaining_calls -= 1;
            ran_any = true;
        }

        if !ran_any {
            break;
        }
        // Fail-fast: a fully-failed round gets one error-grounded LLM
        // turn, then stops.
        if round_outcomes.iter().all(|o| *o == ToolOutcome::Error) {
            force_final_turn = true;
        }
    }

    ChatRunResult {
        reply: last_reply,
        tool_events,
        updated_analysis,
    }
}
