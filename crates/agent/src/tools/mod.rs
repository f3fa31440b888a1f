//! The tool executor: single choke point for every tool call from the RCA
//! and chat runtimes.
//!
//! Responsibilities: policy gating, typed argument parsing, dispatch,
//! redaction of results before they reach prompt context, and stable
//! error codes. Dedupe keys come from `summaries::tool_call_key`; the
//! runtimes own the per-invocation budgets and duplicate suppression.

pub mod case;
pub mod global;
pub mod spec;

use serde_json::{Map, Value};
use sqlx::PgPool;
use tracing::warn;

use tarka_core::redact::redact_text;
use tarka_core::ToolResult;
use tarka_providers::Providers;

use crate::policy::{ActionPolicy, ChatPolicy};
use spec::ToolSpec;

/// Everything a tool execution may need. Constructor-injected so tests
/// stay hermetic.
#[derive(Clone, Copy)]
pub struct ToolContext<'a> {
    pub policy: &'a ChatPolicy,
    pub action_policy: Option<&'a ActionPolicy>,
    pub providers: &'a Providers,
    pub pool: Option<&'a PgPool>,
    /// The case SSOT snapshot (case-scoped tools); global chat passes an
    /// empty object.
    pub analysis_json: &'a Value,
    pub case_id: Option<&'a str>,
    pub run_id: Option<&'a str>,
    /// Set when the caller allows infrastructure redaction on top of the
    /// always set.
    pub redact_infrastructure: bool,
}

/// Walk a JSON value and redact every string in place.
fn redact_value(v: &mut Value, infra: bool) {
    match v {
        Value::String(s) => {
            let scrubbed = redact_text(s, infra);
            if scrubbed != *s {
                *s = scrubbed;
            }
        }
        Value::Array(items) => {
            for item in items {
                redact_value(item, infra);
            }
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                redact_value(item, infra);
            }
        }
        _ => {}
    }
}

/// Execute one tool call. Never panics; every failure is a stable code.
pub async fn run_tool(ctx: &ToolContext<'_>, tool: &str, args: &Map<String, Value>) -> ToolResult {
    let tool = tool.trim();
    if tool.is_empty() {
        return ToolResult::err("tool_missing");
    }

    let mut allowed = ctx.policy.allowed_tools(ctx.action_policy);
    allowed.extend(ctx.policy.global_tools());
    if !allowed.contains(&tool) {
        return ToolResult::err("tool_not_allowed");
    }

    let spec = match ToolSpec::parse(tool, args) {
        Ok(spec) => spec,
        Err(code) => return ToolResult::err(code),
    };

    let mut result = match dispatch(ctx, spec).await {
        Ok(result) => result,
        Err(e) => {
            // Catch-all so a provider panic-adjacent failure becomes a
            // stable code with a bounded snippet.
            warn!(tool, error = %e, "tool execution failed");
            let kind = e
                .to_string()
                .split(':')
                .next()
                .unwrap_or("Unknown")
                .chars()
                .take(40)
                .collect::<String>();
            let snippet: String = e.to_string().chars().take(120).collect();
            return ToolResult::err(format!("tool_exception:{kind}:{snippet}"));
        }
    };

    if ctx.policy.redact_secrets {
        if let Some(r) = result.result.as_mut() {
            redact_value(r, ctx.redact_infrastructure);
        }
    }
    result
}

async fn dispatch(ctx: &ToolContext<'_>, spec: ToolSpec) -> anyhow::Result<ToolResult> {
    match spec {
        ToolSpec::CasesCount { .. }
        | ToolSpec::CasesTop { .. }
        | ToolSpec::CasesLookup { .. }
        | ToolSpec::CasesSummary { .. } => global::run_global_tool(ctx, spec).await,
        other => case::run_case_tool(ctx, other).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_value_recurses() {
        let mut v = serde_json::json!({
            "a": "password=secret123",
            "b": ["bearer abcdefghijklmnopqrstuvwx"],
            "c": {"d": "clean"},
        });
        redact_value(&mut v, false);
        assert!(!v["a"].as_str().unwrap().contains("secret123"));
        assert!(!v["b"][0].as_str().unwrap().contains("abcdefghijklmnopqrstuvwx"));
        assert_eq!(v["c"]["d"], "clean");
    }
}
