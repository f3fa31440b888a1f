//! Prompt builders for the planner, the final chat response and RCA
//! synthesis.
//!
//! All structured calls are versioned envelopes; prompts forbid fabricated
//! facts, require citation of evidence keys, and forbid repeating a
//! `(tool, key)` already in TOOL_HISTORY.

use serde_json::{json, Map, Value};

use tarka_core::redact::redact_text;
use tarka_core::{ChatMessage, ChatToolEvent};

use crate::policy::ChatPolicy;
use crate::summaries::compact_args_for_prompt;
use crate::tools::spec::tool_description;

/// Compact case context: the SSOT analysis fields the model may reason
/// over, nothing else.
#[must_use]
pub fn compact_case_context(analysis_json: &Value) -> Value {
    let a = analysis_json.get("analysis").cloned().unwrap_or(Value::Null);
    let mut ctx = Map::new();
    ctx.insert("target".to_string(), analysis_json.get("target").cloned().unwrap_or(Value::Null));
    for key in ["verdict", "scores", "features", "hypotheses", "change", "noise", "rca"] {
        ctx.insert(key.to_string(), a.get(key).cloned().unwrap_or(Value::Null));
    }
    Value::Object(ctx)
}

/// Recent tool history in the compact shape planners see.
#[must_use]
pub fn compact_tool_history(tool_events: &[ChatToolEvent]) -> Value {
    let hist: Vec<Value> = tool_events
        .iter()
        .rev()
        .take(8)
        .rev()
        .map(|ev| {
            let args = ev.args.as_object().cloned().unwrap_or_default();
            json!({
                "tool": ev.tool,
                "key": ev.key,
                "outcome": ev.outcome,
                "summary": ev.summary,
                "args": compact_args_for_prompt(&args),
                "ok": ev.ok,
                "error": ev.error,
            })
        })
        .collect();
    Value::Array(hist)
}

fn format_tool_list(tools: &[&str]) -> String {
    tools
        .iter()
        .map(|t| format!("- {t}: {}", tool_description(t)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn compact_history(policy: &ChatPolicy, history: &[ChatMessage]) -> Value {
    let hist: Vec<Value> = history
        .iter()
        .rev()
        .take(12)
        .rev()
        .map(|m| {
            let txt = if policy.redact_secrets {
                redact_text(&m.content, false)
            } else {
                m.content.clone()
            };
            json!({
                "role": m.role.as_str(),
                "content": txt.chars().take(600).collect::<String>(),
            })
        })
        .collect();
    Value::Array(hist)
}

/// Family-specific verification guidance injected into planner prompts.
#[must_use]
pub fn family_specific_guidance(family: &str) -> &'static str {
    match family {
        "job_failed" => {
            "
Examples of verification for Job failures:
  * IAM errors: check role permissions with aws.iam_role_permissions (use service_account+namespace args, NOT role_name)
  * S3 errors: check bucket location/region with aws.s3_bucket_location
  * ECR errors: verify image existence and repository permissions
  * DB errors: verify endpoint reachability with aws.rds_status

CRITICAL - IRSA configuration:
- For AWS access errors (S3, ECR, RDS), ALWAYS check whether IRSA is configured first
- Use aws.iam_role_permissions with service_account+namespace (NOT role_name)
- If the tool returns 'no_iam_role_annotation', the root cause is: \"Service account lacks IAM role annotation (IRSA not configured)\"
- Do NOT infer role names (like appending \"-role\" to the service account name)
- Only after confirming IRSA is configured should you check specific permissions

Interpreting permission boundaries (for AWS-related failures):
- When verification tools return 'agent_lacks_permission' or AccessDenied:
  * This is VALUABLE diagnostic evidence, not a verification failure
  * Common scenarios: bucket in a different AWS account, restrictive bucket policy,
    RDS in a different account/VPC, ECR resource-policy restrictions
  * If the job's IAM role HAS the required permissions but the check still gets
    AccessDenied on the resource itself, that strongly suggests a cross-account
    resource or a restrictive resource policy; say so in the root cause
  * Do NOT treat permission boundaries as verification failures - they are clues
"
        }
        "cpu_throttling" => {
            "
Examples of verification for CPU throttling:
  * Check CPU limits vs requests in the container spec using K8s tools
  * Query throttling metrics over time to see the pattern (spikes vs sustained)
  * Check whether other containers on the same node are also throttled
  * Verify whether throttling correlates with traffic spikes or batch jobs
"
        }
        "oom_killed" => {
            "
Examples of verification for OOM kills:
  * Check memory limits vs actual usage patterns over time
  * Look for memory-leak indicators (a growing usage trend in metrics)
  * Check whether the spike correlates with specific operations (from logs)
  * Check whether the issue is pod-level or node-level (eviction vs OOMKilled)
"
        }
        "http_5xx" => {
            "
Examples of verification for HTTP 5xx errors:
  * Check upstream dependency health and response times using metrics
  * Verify rate limiting or connection-pool exhaustion in logs
  * Check for database connection errors or slow queries
  * Look for correlation with deployments or traffic spikes in change history
"
        }
        "pod_not_healthy" => {
            "
Examples of verification for pod health issues:
  * Check readiness/liveness probe configurations using K8s tools
  * Verify pod conditions (Ready, ContainersReady, PodScheduled)
  * Look for recent pod events (FailedScheduling, Unhealthy, BackOff)
  * Check whether the issue is with init containers vs main containers
"
        }
        "crashloop" => {
            "
Examples of verification for crash loops:
  * Check the container exit code and termination reason
  * Look for panic/crash patterns in recent logs
  * Verify whether the crash happens immediately or after running for a while
  * Check whether recent config changes or deployments triggered the issue
"
        }
        "memory_pressure" => {
            "
Examples of verification for memory pressure:
  * Check memory usage trends across pods/nodes
  * Verify whether pressure is at pod level (limits) or node level (capacity)
  * Check whether pressure correlates with traffic patterns and evictions
"
        }
        "target_down" => {
            "
Examples of verification for target down issues:
  * Check whether the target is a pod (pod status/events) or node (node status)
  * Verify network connectivity and DNS resolution
  * Look for recent changes (deployments, scaling events)
"
        }
        "k8s_rollout_health" => {
            "
Examples of verification for rollout health issues:
  * Check rollout status and history using K8s tools
  * Look for pod failures during the rollout
  * Verify whether the new version has issues (image pull, crashes, readiness)
"
        }
        _ => {
            "
Examples of verification (adapt to the specific alert):
  * Use metrics tools to check resource usage patterns and trends
  * Use K8s tools to check pod/workload status, conditions, and events
  * Use log tools to find error patterns and their context
  * Check whether the issue correlates with recent changes or deployments
"
        }
    }
}

/// Planner prompt for the RCA loop.
#[must_use]
pub fn build_rca_planner_prompt(
    analysis_json: &Value,
    tool_events: &[ChatToolEvent],
    allowed_tools: &[&str],
) -> String {
    let ctx = compact_case_context(analysis_json);
    let family = analysis_json
        .pointer("/analysis/verdict/family")
        .and_then(Value::as_str)
        .unwrap_or("generic");
    let guidance = family_specific_guidance(family);
    let tool_hist = compact_tool_history(tool_events);

    format!(
        "You are Tarka, an on-call incident investigation agent.\n\n\
         Goal:\n\
         - Reduce uncertainty and converge on a real-world root cause and remediation.\n\n\
         Tool usage (be proactive and autonomous):\n\
         - You're autonomous - use your tools immediately to gather evidence.\n\
         - Think: what evidence would help narrow down the root cause?\n\
         - Prefer the smallest set of tool calls that is most likely to reduce uncertainty.\n\
         - Converge through tool use, not speculation.\n\n\
         Hypothesis verification (CRITICAL):\n\
         - Even if a hypothesis has high confidence (>80%), you MUST verify it using tools.\n\
         - Pattern matches identify PROXIMATE causes (e.g. an error message in logs).\n\
         - Your job is to find ROOT causes (e.g. a configuration issue, a resource limit).\n\
         {guidance}\n\
         - Use 1-2 tools to either CONFIRM the hypothesis, REFINE it, or RULE OUT alternatives.\n\n\
         Hard constraints (must follow):\n\
         - Use ONLY the provided CASE JSON + TOOL RESULTS.\n\
         - Do NOT invent logs/metrics/events or root causes.\n\
         - Return ONLY valid JSON. No markdown. No code fences.\n\n\
         Available tools (call only these):\n{tool_list}\n\n\
         Output JSON schema (exact keys):\n\
         {{\n  \"schema_version\": \"tarka.tool_plan.v1\",\n  \"reply\": string,\n  \"tool_calls\": [ {{ \"tool\": string, \"args\": object }} ],\n  \"meta\": {{ \"warnings\": [string] }} | null\n}}\n\
         Output constraints:\n\
         - Keep `reply` short (<= 600 chars).\n\
         - `tool_calls` must be 0-3 items.\n\
         Rules:\n\
         - If no more evidence is needed, set tool_calls to [].\n\
         - Don't repeat a tool call whose `key` already appears in TOOL_HISTORY.\n\
         - If the last outcome was `empty` or `unavailable`, don't retry with identical args.\n\n\
         CASE:\n{case}\n\n\
         TOOL_HISTORY:\n{history}\n",
        guidance = guidance,
        tool_list = format_tool_list(allowed_tools),
        case = ctx,
        history = tool_hist,
    )
}

/// Synthesis prompt for the RCA loop.
#[must_use]
pub fn build_rca_synthesis_prompt(analysis_json: &Value, tool_events: &[ChatToolEvent]) -> String {
    let mut ctx = compact_case_context(analysis_json);
    // Parsed log errors anchor specific root causes.
    if let Some(parsed) = analysis_json
        .pointer("/evidence/logs/parsed_errors")
        .and_then(Value::as_array)
        .filter(|xs| !xs.is_empty())
    {
        if let Some(obj) = ctx.as_object_mut() {
            obj.insert(
                "parsed_errors".to_string(),
                Value::Array(parsed.iter().take(10).cloned().collect()),
            );
        }
    }
    let has_parsed = ctx.get("parsed_errors").is_some();

    let tools_compact: Vec<Value> = tool_events
        .iter()
        .rev()
        .take(8)
        .rev()
        .map(|ev| json!({"tool": ev.tool, "ok": ev.ok, "error": ev.error, "result": ev.result}))
        .collect();

    let parsed_note = if has_parsed {
        "\n**IMPORTANT - parsed log errors available:**\n\
         - The CASE includes `parsed_errors` with specific error patterns from logs\n\
         - Identify the SPECIFIC root cause from these errors, not just the symptom\n\
         - Ground your root_cause in the actual error messages\n"
    } else {
        ""
    };

    format!(
        "You are Tarka, an on-call incident investigation agent.\n\n\
         Task:\n\
         - Produce a grounded root-cause analysis and concrete remediation suggestions.\n\
         {parsed_note}\n\
         Hard constraints (must follow):\n\
         - Use ONLY CASE + TOOL_RESULTS.\n\
         - Do NOT invent logs/metrics/events or root causes.\n\
         - If a key fact is missing, list it in unknowns.\n\
         - Cite evidence keys in your evidence bullets (e.g. features.k8s.waiting_reason, parsed_errors[0].message).\n\
         - Return ONLY valid JSON. No markdown. No code fences.\n\n\
         Output JSON schema (exact keys):\n\
         {{\n  \"schema_version\": \"tarka.rca.v1\",\n  \"status\": \"ok\"|\"unknown\"|\"blocked\",\n  \"summary\": string,\n  \"root_cause\": string,\n  \"confidence_0_1\": number,\n  \"evidence\": [string],\n  \"remediation\": [string],\n  \"unknowns\": [string],\n  \"meta\": {{ \"notes\": [string] }} | null\n}}\n\
         Status semantics:\n\
         - \"ok\": analysis completed (use whenever you can provide summary and root_cause, even at low confidence)\n\
         - \"blocked\": critical evidence entirely missing (no logs, no K8s context, no metrics)\n\
         - \"unknown\": truly undeterminable; prefer \"ok\" with low confidence\n\
         Output constraints:\n\
         - Keep `summary` and `root_cause` short (<= 240 chars each).\n\
         - Cap arrays: evidence<=8, remediation<=10, unknowns<=8.\n\n\
         CASE:\n{case}\n\n\
         TOOL_RESULTS:\n{tools}\n",
        parsed_note = parsed_note,
        case = ctx,
        tools = Value::Array(tools_compact),
    )
}

/// Planner prompt for interactive chat (case scope).
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn build_chat_plan_prompt(
    policy: &ChatPolicy,
    allowed_tools: &[&str],
    analysis_json: &Value,
    user_message: &str,
    history: &[ChatMessage],
    tool_events: &[ChatToolEvent],
) -> String {
    let ctx = compact_case_context(analysis_json);
    let tool_hist = compact_tool_history(tool_events);
    let hist = compact_history(policy, history);
    let user = if policy.redact_secrets {
        redact_text(user_message, false)
    } else {
        user_message.to_string()
    };

    format!(
        "You are an on-call SRE assistant.\n\n\
         Tool usage (precise, not exhaustive):\n\
         - IMPORTANT: only use tools when the user's question REQUIRES live data you don't already have in CASE JSON.\n\
         - DO NOT use tools for greetings, thanks, pleasantries, or questions answerable from CASE JSON alone.\n\
         - Specific question -> 1 targeted tool call, then answer.\n\
         - Open investigation -> 2-3 tool calls across sources.\n\
         - Never suggest kubectl/aws/gh commands when you have equivalent tools.\n\n\
         Hard constraints (must follow):\n\
         - Use ONLY the provided CASE JSON + TOOL RESULTS.\n\
         - Do NOT invent logs/metrics/events or root causes.\n\
         - Always cite evidence keys when making claims.\n\
         - Return ONLY valid JSON. No markdown. No code fences.\n\n\
         Available tools (call only these):\n{tool_list}\n\n\
         Output JSON schema (exact keys):\n\
         {{\n  \"schema_version\": \"tarka.tool_plan.v1\",\n  \"reply\": string,\n  \"tool_calls\": [ {{ \"tool\": string, \"args\": object }} ],\n  \"meta\": {{ \"warnings\": [string] }} | null\n}}\n\
         Output constraints:\n\
         - Keep `reply` short (<= 600 chars).\n\
         - `tool_calls` must be 0-3 items.\n\
         Rules:\n\
         - Default to tool_calls: [] unless the question needs live/fresh data.\n\
         - Don't repeat a tool call whose `key` already appears in TOOL_HISTORY.\n\
         - If the last outcome was `empty` or `unavailable`, don't retry with identical args.\n\n\
         CASE:\n{case}\n\n\
         TOOL_HISTORY:\n{tool_hist}\n\n\
         CHAT_HISTORY:\n{hist}\n\n\
         USER:\n{user}\n",
        tool_list = format_tool_list(allowed_tools),
        case = ctx,
        tool_hist = tool_hist,
        hist = hist,
        user = user,
    )
}

/// Final conversational response prompt (streamed).
#[must_use]
pub fn build_final_response_prompt(
    policy: &ChatPolicy,
    analysis_json: &Value,
    user_message: &str,
    history: &[ChatMessage],
    tool_events: &[ChatToolEvent],
) -> String {
    let ctx = compact_case_context(analysis_json);
    let hist = compact_history(policy, history);
    let tool_results: Vec<Value> = tool_events
        .iter()
        .map(|ev| {
            json!({
                "tool": ev.tool,
                "outcome": ev.outcome,
                "summary": ev.summary,
                "ok": ev.ok,
                "error": ev.error,
                "result": if ev.ok { ev.result.clone() } else { None },
            })
        })
        .collect();
    let user = if policy.redact_secrets {
        redact_text(user_message, false)
    } else {
        user_message.to_string()
    };

    format!(
        "You are a senior SRE with years of on-call experience helping a colleague debug an incident.\n\n\
         Your personality:\n\
         - Friendly and practical; cut through the noise to what matters\n\
         - Conversational, with contractions; lead with the key insight\n\
         - Honest about uncertainty: \"I'm not seeing X yet\" beats vague speculation\n\n\
         Hard constraints (NEVER violate):\n\
         - Use ONLY the provided CASE JSON + TOOL RESULTS\n\
         - Do NOT invent logs/metrics/events or root causes\n\
         - Always cite evidence (e.g. \"the restart counter shows...\")\n\
         - Keep it SHORT (2-4 paragraphs, ~150 words max)\n\
         - Be direct when data is missing\n\n\
         Structure:\n\
         1. Quick context (what's happening)\n\
         2. Key insight (the smoking gun or main pattern)\n\
         3. Next step (1-2 actionable items)\n\n\
         CASE:\n{case}\n\n\
         TOOL_RESULTS:\n{tools}\n\n\
         CHAT_HISTORY:\n{hist}\n\n\
         USER:\n{user}\n\n\
         Give them a clear, conversational answer:\n",
        case = ctx,
        tools = Value::Array(tool_results),
        hist = hist,
        user = user,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planner_prompt_lists_exact_tools_and_guidance() {
        let aj = json!({
            "target": {"name": "etl-1"},
            "analysis": {"verdict": {"family": "job_failed"}},
        });
        let prompt = build_rca_planner_prompt(&aj, &[], &["logs.tail", "aws.s3_bucket_location"]);
        assert!(prompt.contains("- logs.tail:"));
        assert!(prompt.contains("- aws.s3_bucket_location:"));
        assert!(prompt.contains("no_iam_role_annotation"));
        assert!(prompt.contains("tarka.tool_plan.v1"));
        // AccessDenied is taught as evidence, not failure.
        assert!(prompt.contains("not a verification failure"));
    }

    #[test]
    fn test_generic_family_guidance() {
        let g = family_specific_guidance("something_else");
        assert!(g.contains("adapt to the specific alert"));
    }

    #[test]
    fn test_history_redaction() {
        let policy = ChatPolicy::default();
        let aj = json!({"target": {}, "analysis": {}});
        let history = vec![ChatMessage::user("my password=supersecret123 ok?")];
        let prompt = build_chat_plan_prompt(&policy, &[], &aj, "hello", &history, &[]);
        assert!(!prompt.contains("supersecret123"));
    }
}
