//! Tool-call keys and result summaries.
//!
//! The key is a short, stable fingerprint of `(tool, canonical args)`:
//! the executor uses it to suppress identical re-runs within one
//! invocation, the planner prompt uses it to tell the model what already
//! ran.

use blake2::digest::{Update, VariableOutput};
use blake2::Blake2sVar;
use serde_json::{json, Map, Value};

use tarka_core::ToolOutcome;

fn truncate(s: &str, n: usize) -> String {
    let t = s.trim();
    if t.chars().count() <= n {
        return t.to_string();
    }
    let mut out: String = t.chars().take(n.saturating_sub(1)).collect();
    out = out.trim_end().to_string();
    out.push('…');
    out
}

/// Canonicalize args for keying: serde_json maps are BTreeMap-backed, so
/// serialization is already order-insensitive.
#[must_use]
pub fn normalize_tool_args(args: &Map<String, Value>) -> Value {
    Value::Object(args.clone())
}

/// Short stable fingerprint for `(tool, normalized_args)`:
/// `{tool}:{blake2s(payload)[..12]}`. Not for cryptographic use.
#[must_use]
pub fn tool_call_key(tool: &str, args: &Map<String, Value>) -> String {
    let payload = json!({"tool": tool.trim(), "args": normalize_tool_args(args)}).to_string();
    let mut hasher = Blake2sVar::new(6).expect("blake2s with 6-byte output");
    hasher.update(payload.as_bytes());
    let mut buf = [0u8; 6];
    hasher
        .finalize_variable(&mut buf)
        .expect("blake2s finalize");
    format!("{}:{}", tool.trim(), hex::encode(buf))
}

/// Keep prompts small while still showing what was called.
#[must_use]
pub fn compact_args_for_prompt(args: &Map<String, Value>) -> Map<String, Value> {
    const MAX_KEYS: usize = 8;
    const MAX_VALUE_CHARS: usize = 80;
    let mut out = Map::new();
    for (i, (k, v)) in args.iter().enumerate() {
        if i >= MAX_KEYS {
            break;
        }
        let vv = match v {
            Value::String(s) => Value::String(truncate(s, MAX_VALUE_CHARS)),
            other => other.clone(),
        };
        out.insert(k.clone(), vv);
    }
    out
}

fn count_list(v: Option<&Value>) -> Option<usize> {
    v.and_then(Value::as_array).map(Vec::len)
}

/// Derive `(outcome, summary)` for a finished tool call.
#[must_use]
pub fn summarize_tool_result(
    tool: &str,
    ok: bool,
    error: Option<&str>,
    result: Option<&Value>,
) -> (ToolOutcome, String) {
    let t = tool.trim();
    if !ok || error.is_some_and(|e| !e.trim().is_empty()) {
        let code = error.unwrap_or("unknown").trim();
        if code == "skipped_duplicate" {
            return (
                ToolOutcome::SkippedDuplicate,
                truncate(&format!("{t}: skipped duplicate tool call"), 160),
            );
        }
        return (ToolOutcome::Error, truncate(&format!("{t}: error {code}"), 160));
    }

    let Some(result) = result else {
        return (ToolOutcome::Ok, truncate(&format!("{t}: ok"), 160));
    };

    if let Some(obj) = result.as_object() {
        let status = obj
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_ascii_lowercase();
        if status == "unavailable" {
            let reason = obj.get("reason").and_then(Value::as_str).unwrap_or("");
            let mut base = format!("{t}: unavailable");
            if !reason.is_empty() {
                base.push_str(&format!(" (reason={reason})"));
            }
            return (ToolOutcome::Unavailable, truncate(&base, 160));
        }

        match t {
            "logs.tail" => {
                let n = count_list(obj.get("entries")).unwrap_or(0);
                let st = if status == "unavailable" {
                    ToolOutcome::Unavailable
                } else if n == 0 {
                    ToolOutcome::Empty
                } else {
                    ToolOutcome::Ok
                };
                let mut parts = vec![format!("logs: {} ({n} entries)", if n == 0 { "empty" } else { "ok" })];
                if st != ToolOutcome::Ok {
                    if let Some(reason) = obj.get("reason").and_then(Value::as_str) {
                        parts.push(format!("reason={reason}"));
                    }
                }
                if let Some(backend) = obj.get("backend").and_then(Value::as_str) {
                    parts.push(format!("backend={backend}"));
                }
                return (st, truncate(&parts.join("; "), 160));
            }
            "promql.instant" => {
                let n = count_list(obj.get("result"));
                let q = obj.get("query").and_then(Value::as_str).unwrap_or("");
                return match n {
                    Some(0) => (
                        ToolOutcome::Empty,
                        truncate(&format!("promql: empty (0 series) query={}", truncate(q, 80)), 160),
                    ),
                    Some(n) => (
                        ToolOutcome::Ok,
                        truncate(&format!("promql: ok ({n} series) query={}", truncate(q, 80)), 160),
                    ),
                    None => (ToolOutcome::Ok, truncate(&format!("{t}: ok"), 160)),
                };
            }
            "memory.similar_cases" | "memory.skills" => {
                let label = if t.ends_with("similar_cases") { "similar_cases" } else { "skills" };
                return match count_list(obj.get("items")) {
                    Some(0) => (ToolOutcome::Empty, truncate(&format!("memory: {label} empty (0)"), 160)),
                    Some(n) => (ToolOutcome::Ok, truncate(&format!("memory: {label} ok ({n})"), 160)),
                    None => (ToolOutcome::Ok, truncate(&format!("{t}: ok"), 160)),
                };
            }
            "k8s.pod_context" => {
                let pi = obj.get("pod_info").and_then(Value::as_object);
                let phase = pi
                    .and_then(|p| p.get("phase"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let mut restarts = 0i64;
                let mut not_ready = 0i64;
                if let Some(statuses) = pi
                    .and_then(|p| p.get("container_statuses"))
                    .and_then(Value::as_array)
                {
                    for cs in statuses {
                        restarts += cs.get("restart_count").and_then(Value::as_i64).unwrap_or(0);
                        if cs.get("ready").and_then(Value::as_bool) == Some(false) {
                            not_ready += 1;
                        }
                    }
                }
                let events = count_list(obj.get("pod_events")).unwrap_or(0);
                let mut parts = vec!["k8s: pod_context ok".to_string()];
                if !phase.is_empty() {
                    parts.push(format!("phase={}", phase.to_ascii_lowercase()));
                }
                parts.push(format!("not_ready={not_ready}"));
                parts.push(format!("restarts={restarts}"));
                if events > 0 {
                    parts.push(format!("events={events}"));
                }
                return (ToolOutcome::Ok, truncate(&parts.join("; "), 160));
            }
            "k8s.rollout_status" => {
                let kind = obj.get("kind").and_then(Value::as_str).unwrap_or("");
                let name = obj.get("name").and_then(Value::as_str).unwrap_or("");
                let ready = obj
                    .get("ready_replicas")
                    .or_else(|| obj.get("number_ready"))
                    .and_then(Value::as_i64);
                let desired = obj
                    .get("replicas")
                    .or_else(|| obj.get("desired_number_scheduled"))
                    .and_then(Value::as_i64);
                let mut parts = vec!["k8s: rollout_status ok".to_string()];
                if !kind.is_empty() && !name.is_empty() {
                    parts.push(format!("{kind}/{name}"));
                }
                if ready.is_some() || desired.is_some() {
                    parts.push(format!("ready={ready:?}/{desired:?}"));
                }
                return (ToolOutcome::Ok, truncate(&parts.join("; "), 160));
            }
            "github.recent_commits" => {
                let n = count_list(obj.get("commits"));
                let repo = obj.get("repo").and_then(Value::as_str).unwrap_or("");
                let window = obj
                    .get("searched_window_hours")
                    .and_then(Value::as_i64)
                    .map(|h| format!(" in last {h}h"))
                    .unwrap_or_default();
                return match n {
                    Some(0) => (
                        ToolOutcome::Empty,
                        truncate(&format!("github: 0 commits{window} for {repo}"), 160),
                    ),
                    Some(n) => (
                        ToolOutcome::Ok,
                        truncate(&format!("github: {n} commits{window} for {repo}"), 160),
                    ),
                    None => (ToolOutcome::Ok, truncate(&format!("{t}: ok"), 160)),
                };
            }
            "github.workflow_runs" => {
                let repo = obj.get("repo").and_then(Value::as_str).unwrap_or("");
                if let Some(runs) = obj.get("workflow_runs").and_then(Value::as_array) {
                    if runs.is_empty() {
                        return (
                            ToolOutcome::Empty,
                            truncate(&format!("github: 0 workflow runs for {repo}"), 160),
                        );
                    }
                    let failures = runs
                        .iter()
                        .filter(|r| r.get("conclusion").and_then(Value::as_str) == Some("failure"))
                        .count();
                    let mut s = format!("github: {} workflow runs for {repo}", runs.len());
                    if failures > 0 {
                        s.push_str(&format!("; {failures} failed"));
                    }
                    return (ToolOutcome::Ok, truncate(&s, 160));
                }
            }
            "cases.count" => {
                let n = obj.get("count").and_then(Value::as_i64).unwrap_or(0);
                return if n == 0 {
                    (ToolOutcome::Empty, "cases.count: empty (0)".to_string())
                } else {
                    (ToolOutcome::Ok, format!("cases.count: ok ({n})"))
                };
            }
            "cases.top" => {
                let by = obj.get("by").and_then(Value::as_str).unwrap_or("key");
                return match count_list(obj.get("items")) {
                    Some(0) => (ToolOutcome::Empty, truncate(&format!("cases.top: empty (by={by})"), 160)),
                    Some(n) => {
                        let top_key = obj
                            .get("items")
                            .and_then(Value::as_array)
                            .and_then(|xs| xs.first())
                            .and_then(|x| x.get("key"))
                            .and_then(Value::as_str)
                            .unwrap_or("?");
                        (
                            ToolOutcome::Ok,
                            truncate(&format!("cases.top: ok ({n} buckets) by={by} top={top_key}"), 160),
                        )
                    }
                    None => (ToolOutcome::Ok, "cases.top: ok".to_string()),
                };
            }
            "cases.lookup" => {
                return match count_list(obj.get("matches")) {
                    Some(0) => (ToolOutcome::Empty, "cases.lookup: empty (0 matches)".to_string()),
                    Some(n) => (ToolOutcome::Ok, format!("cases.lookup: ok ({n} matches)")),
                    None => (ToolOutcome::Ok, "cases.lookup: ok".to_string()),
                };
            }
            "cases.summary" => {
                return match obj.get("found").and_then(Value::as_bool) {
                    Some(false) => (ToolOutcome::Empty, "cases.summary: empty (not found)".to_string()),
                    _ => (ToolOutcome::Ok, "cases.summary: ok (found)".to_string()),
                };
            }
            _ => {}
        }

        // Generic status mapping.
        if status == "empty" {
            return (ToolOutcome::Empty, truncate(&format!("{t}: empty"), 160));
        }
        if status == "ok" {
            return (ToolOutcome::Ok, truncate(&format!("{t}: ok"), 160));
        }
        // Generic list counters.
        for key in ["items", "entries", "result"] {
            match count_list(obj.get(key)) {
                Some(0) => return (ToolOutcome::Empty, truncate(&format!("{t}: empty (0 {key})"), 160)),
                Some(n) => return (ToolOutcome::Ok, truncate(&format!("{t}: ok ({n} {key})"), 160)),
                None => {}
            }
        }
    }

    (ToolOutcome::Ok, truncate(&format!("{t}: ok"), 160))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn test_key_stability_and_shape() {
        let a1 = args(&[("pod", json!("p1")), ("namespace", json!("ns"))]);
        let a2 = args(&[("namespace", json!("ns")), ("pod", json!("p1"))]);
        let k1 = tool_call_key("logs.tail", &a1);
        let k2 = tool_call_key("logs.tail", &a2);
        assert_eq!(k1, k2, "key must be order-insensitive");
        let hash = k1.rsplit(':').next().unwrap();
        assert_eq!(hash.len(), 12, "12 hex chars");
        assert!(k1.starts_with("logs.tail:"));
    }

    #[test]
    fn test_key_differs_for_different_args() {
        let k1 = tool_call_key("logs.tail", &args(&[("pod", json!("p1"))]));
        let k2 = tool_call_key("logs.tail", &args(&[("pod", json!("p2"))]));
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_summaries_logs() {
        let (o, s) = summarize_tool_result(
            "logs.tail",
            true,
            None,
            Some(&json!({"entries": ["a", "b"], "backend": "victorialogs"})),
        );
        assert_eq!(o, ToolOutcome::Ok);
        assert!(s.contains("2 entries"));

        let (o, _) = summarize_tool_result("logs.tail", true, None, Some(&json!({"entries": []})));
        assert_eq!(o, ToolOutcome::Empty);
    }

    #[test]
    fn test_summaries_error_and_duplicate() {
        let (o, s) = summarize_tool_result("promql.instant", false, Some("db_unavailable"), None);
        assert_eq!(o, ToolOutcome::Error);
        assert!(s.contains("db_unavailable"));

        let (o, _) = summarize_tool_result("logs.tail", false, Some("skipped_duplicate"), None);
        assert_eq!(o, ToolOutcome::SkippedDuplicate);
    }

    #[test]
    fn test_summaries_unavailable_envelope() {
        let (o, s) = summarize_tool_result(
            "logs.tail",
            true,
            None,
            Some(&json!({"status": "unavailable", "reason": "backend_unreachable"})),
        );
        assert_eq!(o, ToolOutcome::Unavailable);
        assert!(s.contains("backend_unreachable"));
    }

    #[test]
    fn test_summaries_cases_count() {
        let (o, _) = summarize_tool_result("cases.count", true, None, Some(&json!({"count": 0})));
        assert_eq!(o, ToolOutcome::Empty);
        let (o, s) = summarize_tool_result("cases.count", true, None, Some(&json!({"count": 7})));
        assert_eq!(o, ToolOutcome::Ok);
        assert!(s.contains('7'));
    }

    #[test]
    fn test_compact_args() {
        let mut a = Map::new();
        for i in 0..12 {
            a.insert(format!("k{i:02}"), json!("x".repeat(200)));
        }
        let compact = compact_args_for_prompt(&a);
        assert_eq!(compact.len(), 8);
        for v in compact.values() {
            assert!(v.as_str().unwrap().chars().count() <= 80);
        }
    }
}
