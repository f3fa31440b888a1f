//! Streaming chat runtime for progressive UX.
//!
//! Hybrid two-stage flow per user message:
//! 1. plan: blocking structured output (reliable, fast);
//! 2. act: planned tools with `tool_start`/`tool_end` events;
//! 3. respond: streamed LLM tokens, native thinking segments forwarded as
//!    `thinking` events; terminal `done` carries tool events and any
//!    updated analysis.
//!
//! Events go into an mpsc channel; the consumer owns termination. A
//! dropped receiver (client cancelled the SSE stream) ends the run at the
//! next send.

use std::collections::BTreeSet;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc::Sender;
use tracing::warn;

use tarka_core::model::chat::{ChatStreamEvent, ChatStreamEventType};
use tarka_core::{ChatMessage, ChatToolEvent, ToolOutcome};
use tarka_llm::{LlmClient, ToolPlanResponse};

use crate::chat::intents::try_handle_case_intents;
use crate::prompts::{build_chat_plan_prompt, build_final_response_prompt};
use crate::summaries::{summarize_tool_result, tool_call_key};
use crate::tools::{run_tool, ToolContext};

/// Contextual progress line shown while a tool runs.
#[must_use]
pub fn tool_start_message(tool: &str) -> &'static str {
    match tool {
        "promql.instant" => "Checking the metrics...",
        "logs.tail" => "Pulling recent logs...",
        "k8s.pod_context" => "Looking at the pod status...",
        "k8s.rollout_status" => "Checking rollout health...",
        "k8s.events" => "Checking K8s events...",
        "memory.similar_cases" => "Hmm, searching for similar incidents...",
        "memory.skills" => "Let me check what's worked before...",
        "rerun.investigation" => "Re-running investigation...",
        "actions.list" => "Listing available actions...",
        "actions.propose" => "I've got a suggestion...",
        "argocd.app_status" => "Checking ArgoCD status...",
        "aws.ec2_status" => "Checking EC2 instance status...",
        "aws.ebs_health" => "Checking EBS volume health...",
        "aws.elb_health" => "Checking load balancer health...",
        "aws.rds_status" => "Checking RDS instance status...",
        "aws.ecr_image" => "Checking ECR image details...",
        "aws.security_group" => "Checking security group rules...",
        "aws.nat_gateway" => "Checking NAT gateway status...",
        "aws.vpc_endpoint" => "Checking VPC endpoint status...",
        "aws.cloudtrail_events" => "Checking CloudTrail events...",
        "aws.s3_bucket_location" => "Checking the S3 bucket...",
        "aws.iam_role_permissions" => "Checking IAM role permissions...",
        "github.recent_commits" => "Checking recent commits...",
        "github.workflow_runs" => "Checking workflow runs...",
        "github.workflow_logs" => "Checking workflow logs...",
        "github.read_file" => "Reading file from GitHub...",
        "github.commit_diff" => "Reading the commit diff...",
        _ => "Working on it...",
    }
}

fn tool_events_meta(tool_events: &[ChatToolEvent]) -> Value {
    json!(tool_events
        .iter()
        .map(|e| {
            json!({
                "tool": e.tool,
                "args": e.args,
                "ok": e.ok,
                "error": e.error,
                "outcome": e.outcome,
                "summary": e.summary,
            })
        })
        .collect::<Vec<_>>())
}

async fn emit(tx: &Sender<ChatStreamEvent>, event: ChatStreamEvent) -> bool {
    tx.send(event).await.is_ok()
}

/// Run one streaming chat turn, pushing events into `tx`.
///
/// Returns the final reply text and tool events (for persistence) when
/// the stream ran to completion; `None` when the consumer went away.
pub async fn run_chat_stream(
    ctx: &ToolContext<'_>,
    llm: &LlmClient,
    user_message: &str,
    history: &[ChatMessage],
    tx: Sender<ChatStreamEvent>,
) -> Option<(String, Vec<ChatToolEvent>, Option<Value>)> {
    if !ctx.policy.enabled {
        emit(&tx, ChatStreamEvent::new(ChatStreamEventType::Error, "Chat is disabled by policy.")).await;
        return None;
    }

    // Fast path: deterministic intents stream their reply in chunks for a
    // consistent UX, no LLM involved.
    let intent = try_handle_case_intents(ctx.pool, ctx.analysis_json, user_message).await;
    if intent.handled {
        let reply = intent.reply.clone();
        let chars: Vec<char> = reply.chars().collect();
        for chunk in chars.chunks(50) {
            let text: String = chunk.iter().collect();
            if !emit(&tx, ChatStreamEvent::new(ChatStreamEventType::Token, text)).await {
                return None;
            }
        }
        let done = ChatStreamEvent::new(ChatStreamEventType::Done, reply.clone())
            .with_meta("tool_events", tool_events_meta(&intent.tool_events));
        emit(&tx, done).await;
        return Some((reply, intent.tool_events, None));
    }

    if !emit(
        &tx,
        ChatStreamEvent::new(
            ChatStreamEventType::Thinking,
            "Analyzing case evidence and determining next steps...",
        ),
    )
    .await
    {
        return None;
    }

    let allowed = ctx.policy.allowed_tools(ctx.action_policy);
    let mut tool_events: Vec<ChatToolEvent> = Vec::new();
    let mut updated_analysis: Option<Value> = None;
    let mut current_analysis = ctx.analysis_json.clone();
    let mut remaining_calls = ctx.policy.max_tool_calls;

    for step in 0..ctx.policy.max_steps {
        if !emit(
            &tx,
            ChatStreamEvent::new(
                ChatStreamEventType::Planning,
                if step == 0 {
                    "Planning investigation approach..."
                } else {
                    "Determining next steps..."
                },
            ),
        )
        .await
        {
            return None;
        }

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
                warn!(error = %code, "streaming chat planner failed");
                let mut msg = format!("LLM unavailable ({code}). ");
                if let Some(hyps) = current_analysis
                    .pointer("/analysis/hypotheses")
                    .and_then(Value::as_array)
                    .filter(|h| !h.is_empty())
                {
                    msg.push_str("Top hypotheses from diagnostics:\n");
                    for h in hyps.iter().take(3) {
                        msg.push_str(&format!(
                            "- {}: {}/100\n",
                            h.get("title").and_then(Value::as_str).unwrap_or("unknown"),
                            h.get("confidence_0_100").and_then(Value::as_i64).unwrap_or(0),
                        ));
                    }
                }
                emit(&tx, ChatStreamEvent::new(ChatStreamEventType::Error, msg)).await;
                return None;
            }
        };

        if plan.tool_calls.is_empty() {
            break;
        }
        if remaining_calls <= 0 {
            emit(
                &tx,
                ChatStreamEvent::new(
                    ChatStreamEventType::Error,
                    "Reached the tool-call limit. Please narrow your question.",
                ),
            )
            .await;
            return None;
        }

        let mut seen: BTreeSet<String> = tool_events.iter().filter_map(|ev| ev.key.clone()).collect();
        let mut ran_any = false;
        let mut round_outcomes: Vec<ToolOutcome> = Vec::new();

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

            if !emit(
                &tx,
                ChatStreamEvent::new(ChatStreamEventType::ToolStart, tool_start_message(&tc.tool))
                    .with_tool(tc.tool.clone()),
            )
            .await
            {
                return None;
            }

            let exec_ctx = ToolContext {
                analysis_json: &current_analysis,
                ..*ctx
            };
            let result = run_tool(&exec_ctx, &tc.tool, &tc.args).await;
            let (outcome, summary) =
                summarize_tool_result(&tc.tool, result.ok, result.error.as_deref(), result.result.as_ref());
            round_outcomes.push(outcome);

            if !emit(
                &tx,
                ChatStreamEvent::new(ChatStreamEventType::ToolEnd, summary.clone())
                    .with_tool(tc.tool.clone())
                    .with_meta("outcome", json!(outcome)),
            )
            .await
            {
                return None;
            }

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
        // Fail-fast: after a fully-failed round, go straight to the final
        // error-grounded response instead of planning new tools.
        if round_outcomes.iter().all(|o| *o == ToolOutcome::Error) {
            break;
        }
    }

    // Final response: streamed tokens, thinking passthrough.
    let final_prompt = build_final_response_prompt(
        ctx.policy,
        &current_analysis,
        user_message,
        history,
        &tool_events,
    );
    let mut reply_parts: Vec<String> = Vec::new();
    match llm.stream_text(&final_prompt, true).await {
        Ok(mut stream) => {
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(chunk) if chunk.thinking => {
                        if !emit(&tx, ChatStreamEvent::new(ChatStreamEventType::Thinking, chunk.content)).await {
                            return None;
                        }
                    }
                    Ok(chunk) => {
                        reply_parts.push(chunk.content.clone());
                        if !emit(&tx, ChatStreamEvent::new(ChatStreamEventType::Token, chunk.content)).await {
                            return None;
                        }
                    }
                    Err(e) => {
                        emit(&tx, ChatStreamEvent::new(ChatStreamEventType::Error, e.code())).await;
                        return None;
                    }
                }
            }
        }
        Err(code) => {
            emit(&tx, ChatStreamEvent::new(ChatStreamEventType::Error, code)).await;
            return None;
        }
    }

    let full_reply = reply_parts.concat();
    let mut done = ChatStreamEvent::new(ChatStreamEventType::Done, full_reply.clone())
        .with_meta("tool_events", tool_events_meta(&tool_events));
    if let Some(updated) = &updated_analysis {
        done = done.with_meta("updated_analysis", updated.clone());
    }
    emit(&tx, done).await;

    Some((full_reply, tool_events, updated_analysis))
}
