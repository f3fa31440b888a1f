//! Global chat runtime: inbox-wide questions over the case database.
//!
//! Same two-stage streaming shape as the case runtime, with the global
//! tool set and an empty case context.

use std::collections::BTreeSet;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc::Sender;
use tracing::warn;

use tarka_core::model::chat::{ChatStreamEvent, ChatStreamEventType};
use tarka_core::redact::redact_text;
use tarka_core::{ChatMessage, ChatToolEvent};
use tarka_llm::{LlmClient, ToolPlanResponse};

use crate::chat::intents::try_handle_global_intents;
use crate::chat::streaming::tool_start_message;
use crate::summaries::{summarize_tool_result, tool_call_key};
use crate::tools::spec::tool_description;
use crate::tools::{run_tool, ToolContext};

fn build_global_plan_prompt(
    ctx: &ToolContext<'_>,
    user_message: &str,
    history: &[ChatMessage],
    tool_events: &[ChatToolEvent],
) -> String {
    let tools = ctx.policy.global_tools();
    let tool_list = tools
        .iter()
        .map(|t| format!("- {t}: {}", tool_description(t)))
        .collect::<Vec<_>>()
        .join("\n");
    let hist: Vec<Value> = history
        .iter()
        .rev()
        .take(12)
        .rev()
        .map(|m| {
            json!({
                "role": m.role.as_str(),
                "content": redact_text(&m.content, false).chars().take(600).collect::<String>(),
            })
        })
        .collect();
    let tool_hist = crate::prompts::compact_tool_history(tool_events);

    format!(
        "You are an on-call SRE assistant for the whole incident inbox.\n\n\
         You answer questions about the case database: counts, trends, top\n\
         teams/families, and summaries of specific cases.\n\n\
         Hard constraints (must follow):\n\
         - Use ONLY TOOL RESULTS for factual claims about cases.\n\
         - Do NOT invent cases, counts or outcomes.\n\
         - Return ONLY valid JSON. No markdown. No code fences.\n\n\
         Available tools (call only these):\n{tool_list}\n\n\
         Output JSON schema (exact keys):\n\
         {{\n  \"schema_version\": \"tarka.tool_plan.v1\",\n  \"reply\": string,\n  \"tool_calls\": [ {{ \"tool\": string, \"args\": object }} ],\n  \"meta\": {{ \"warnings\": [string] }} | null\n}}\n\
         Rules:\n\
         - `tool_calls` must be 0-3 items.\n\
         - Don't repeat a tool call whose `key` already appears in TOOL_HISTORY.\n\n\
         TOOL_HISTORY:\n{tool_hist}\n\n\
         CHAT_HISTORY:\n{hist}\n\n\
         USER:\n{user}\n",
        tool_list = tool_list,
        tool_hist = tool_hist,
        hist = Value::Array(hist),
        user = redact_text(user_message, false),
    )
}

async fn emit(tx: &Sender<ChatStreamEvent>, event: ChatStreamEvent) -> bool {
    tx.send(event).await.is_ok()
}

/// Run one streaming global-chat turn.
pub async fn run_global_chat_stream(
    ctx: &ToolContext<'_>,
    llm: &LlmClient,
    user_message: &str,
    history: &[ChatMessage],
    tx: Sender<ChatStreamEvent>,
) -> Option<(String, Vec<ChatToolEvent>)> {
    if !ctx.policy.enabled {
        emit(&tx, ChatStreamEvent::new(ChatStreamEventType::Error, "Chat is disabled by policy.")).await;
        return None;
    }

    // Deterministic global intents (greeting, counts, top teams).
    let intent = try_handle_global_intents(ctx, user_message).await;
    if intent.handled {
        let reply = intent.reply.clone();
        let chars: Vec<char> = reply.chars().collect();
        for chunk in chars.chunks(50) {
            let text: String = chunk.iter().collect();
            if !emit(&tx, ChatStreamEvent::new(ChatStreamEventType::Token, text)).await {
                return None;
            }
        }
        let done = ChatStreamEvent::new(ChatStreamEventType::Done, reply.clone()).with_meta(
            "tool_events",
            json!(intent
                .tool_events
                .iter()
                .map(|e| json!({"tool": e.tool, "ok": e.ok, "summary": e.summary}))
                .collect::<Vec<_>>()),
        );
        emit(&tx, done).await;
        return Some((reply, intent.tool_events));
    }

    let mut tool_events: Vec<ChatToolEvent> = Vec::new();
    let mut remaining_calls = ctx.policy.max_tool_calls;
    let mut final_reply = String::new();

    for _step in 0..ctx.policy.max_steps {
        if !emit(&tx, ChatStreamEvent::new(ChatStreamEventType::Planning, "Looking at the case database...")).await {
            return None;
        }
        let prompt = build_global_plan_prompt(ctx, user_message, history, &tool_events);
        let plan: ToolPlanResponse = match llm.generate_json(&prompt).await {
            Ok(plan) => plan,
            Err(code) => {
                warn!(error = %code, "global chat planner failed");
                emit(&tx, ChatStreamEvent::new(ChatStreamEventType::Error, format!("LLM unavailable ({code})."))).await;
                return None;
            }
        };
        final_reply = plan.reply.clone();

        if plan.tool_calls.is_empty() || remaining_calls <= 0 {
            break;
        }

        let mut seen: BTreeSet<String> = tool_events.iter().filter_map(|ev| ev.key.clone()).collect();
        let mut ran_any = false;
        for tc in plan.tool_calls.iter().take(3) {
            if remaining_calls <= 0 {
                break;
            }
            let key = tool_call_key(&tc.tool, &tc.args);
            if seen.contains(&key) {
                tool_events.push(ChatToolEvent::skipped_duplicate(&tc.tool, json!(tc.args), key));
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
            let result = run_tool(ctx, &tc.tool, &tc.args).await;
            let (outcome, summary) =
                summarize_tool_result(&tc.tool, result.ok, result.error.as_deref(), result.result.as_ref());
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
    }

    // Stream the final reply as tokens. Global answers are short and
    // already produced by the planner; a second streamed LLM turn only
    // happens when tools ran.
    if !tool_events.is_empty() {
        let prompt = format!(
            "Summarize these tool results for the user conversationally and briefly (<=120 words).\n\
             Use ONLY the tool results; do not invent numbers.\n\n\
             TOOL_RESULTS:\n{}\n\nUSER QUESTION:\n{}\n",
            json!(tool_events
                .iter()
                .map(|e| json!({"tool": e.tool, "ok": e.ok, "result": e.result, "summary": e.summary}))
                .collect::<Vec<_>>()),
            redact_text(user_message, false),
        );
        match llm.stream_text(&prompt, false).await {
            Ok(mut stream) => {
                let mut parts: Vec<String> = Vec::new();
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(chunk) if !chunk.thinking => {
                            parts.push(chunk.content.clone());
                            if !emit(&tx, ChatStreamEvent::new(ChatStreamEventType::Token, chunk.content)).await {
                                return None;
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            emit(&tx, ChatStreamEvent::new(ChatStreamEventType::Error, e.code())).await;
                            return None;
                        }
                    }
                }
                if !parts.is_empty() {
                    final_reply = parts.concat();
                }
            }
            Err(code) => {
                emit(&tx, ChatStreamEvent::new(ChatStreamEventType::Error, code)).await;
                return None;
            }
        }
    } else {
        let chars: Vec<char> = final_reply.chars().collect();
        for chunk in chars.chunks(50) {
            let text: String = chunk.iter().collect();
            if !emit(&tx, ChatStreamEvent::new(ChatStreamEventType::Token, text)).await {
                return None;
            }
        }
    }

    let done = ChatStreamEvent::new(ChatStreamEventType::Done, final_reply.clone()).with_meta(
        "tool_events",
        json!(tool_events
            .iter()
            .map(|e| json!({"tool": e.tool, "ok": e.ok, "outcome": e.outcome, "summary": e.summary}))
            .collect::<Vec<_>>()),
    );
    emit(&tx, done).await;
    Some((final_reply, tool_events))
}
