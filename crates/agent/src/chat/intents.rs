//! Deterministic intent fast paths.
//!
//! These run before any LLM call. Patterns are anchored: an intent fires
//! exactly when the whole normalized message matches.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Map, Value};
use sqlx::{PgPool, Row};

use tarka_core::snapshot::snapshot_str;
use tarka_core::ChatToolEvent;

use crate::policy::ChatPolicy;
use crate::summaries::{summarize_tool_result, tool_call_key};
use crate::tools::{run_tool, ToolContext};

/// Result of a fast-path attempt.
#[derive(Debug, Clone, Default)]
pub struct IntentResult {
    pub handled: bool,
    pub reply: String,
    pub tool_events: Vec<ChatToolEvent>,
    pub intent_id: Option<&'static str>,
}

impl IntentResult {
    fn unhandled() -> Self {
        Self::default()
    }

    fn handled(intent_id: &'static str, reply: impl Into<String>) -> Self {
        Self {
            handled: true,
            reply: reply.into(),
            tool_events: Vec::new(),
            intent_id: Some(intent_id),
        }
    }
}

fn norm(s: &str) -> String {
    let collapsed: String = s.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.to_lowercase()
}

static GREETING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(hi|hey|hello|howdy|yo|sup|greetings|good (morning|afternoon|evening)|thanks|thank you|thx|ty|cheers|cool|ok|okay|got it|understood|sounds good|makes sense|perfect|great|awesome|nice|noted|bye|goodbye|see ya|later|good night)[.!? ]*$",
    )
    .expect("static pattern")
});

static SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(what happened|what'?s? (going on|the (issue|problem|situation|story|deal))|summarize|summary|tldr|tl;?dr|overview|recap|brief me|catch me up|give me (the )?(summary|tldr|overview|rundown|gist)|explain (this|the) (case|alert|incident|issue))[.!? ]*$",
    )
    .expect("static pattern")
});

static STATUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(what'?s? (the )?status|is (it|this) (resolved|fixed|still (firing|active|down|broken))|still (happening|firing|active|down|broken)|are we (ok|good|safe|fine)|how bad is (it|this))[.!? ]*$",
    )
    .expect("static pattern")
});

static DAYS_WINDOW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:last|past)\s+(\d+)\s*day").expect("static pattern"));
static DAYS_SHORT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(\d+)\s*d\b").expect("static pattern"));

fn parse_days_window(s: &str) -> Option<i64> {
    let n: i64 = DAYS_WINDOW
        .captures(s)
        .or_else(|| DAYS_SHORT.captures(s))?
        .get(1)?
        .as_str()
        .parse()
        .ok()?;
    Some(n.clamp(1, 30))
}

fn extract_token(s: &str, key: &str) -> Option<String> {
    let re = Regex::new(&format!(r"\b{}\s*[:=]\s*([a-z0-9_\-]+)\b", regex::escape(key))).ok()?;
    re.captures(s).map(|c| c[1].to_string())
}

const FAMILY_SYNONYMS: &[(&str, &str)] = &[
    ("cpu throttling", "cpu_throttling"),
    ("cpu_throttling", "cpu_throttling"),
    ("oomkilled", "oom_killed"),
    ("oom killed", "oom_killed"),
    ("oom", "oom_killed"),
    ("http 5xx", "http_5xx"),
    ("5xx", "http_5xx"),
    ("crashloop", "crashloop"),
    ("crash loop", "crashloop"),
];

fn infer_family(s: &str) -> Option<String> {
    for (needle, family) in FAMILY_SYNONYMS {
        if s.contains(needle) {
            return Some((*family).to_string());
        }
    }
    extract_token(s, "family")
}

fn infer_team(s: &str) -> Option<String> {
    extract_token(s, "team").or_else(|| {
        Regex::new(r"\bfor team ([a-z0-9_\-]+)\b")
            .ok()?
            .captures(s)
            .map(|c| c[1].to_string())
    })
}

fn infer_classification(s: &str) -> Option<String> {
    if let Some(c) = extract_token(s, "classification") {
        return Some(c);
    }
    if s.contains("noise") || s.contains("noisy") {
        return Some("noisy".to_string());
    }
    if s.contains("actionable") {
        return Some("actionable".to_string());
    }
    if s.contains("informational") {
        return Some("informational".to_string());
    }
    None
}

fn build_case_summary(analysis_json: &Value) -> String {
    let target_name = snapshot_str(analysis_json, &["target", "name"])
        .or_else(|| snapshot_str(analysis_json, &["target", "service"]))
        .unwrap_or("this target");
    let ns = snapshot_str(analysis_json, &["target", "namespace"]);
    let one_liner = snapshot_str(analysis_json, &["analysis", "verdict", "one_liner"])
        .unwrap_or("No verdict available yet.");

    let mut parts = vec![format!(
        "**{target_name}**{}: {one_liner}",
        ns.map(|n| format!(" (ns: {n})")).unwrap_or_default()
    )];

    if let Some(hyps) = analysis_json
        .pointer("/analysis/hypotheses")
        .and_then(Value::as_array)
        .filter(|h| !h.is_empty())
    {
        parts.push("Top hypotheses:".to_string());
        for h in hyps.iter().take(3) {
            let title = h
                .get("title")
                .or_else(|| h.get("hypothesis_id"))
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            let conf = h.get("confidence_0_100").and_then(Value::as_i64).unwrap_or(0);
            parts.push(format!("- {title} ({conf}/100)"));
        }
    }

    if let Some(next) = analysis_json
        .pointer("/analysis/verdict/next")
        .and_then(Value::as_array)
        .filter(|n| !n.is_empty())
    {
        parts.push("Suggested next steps:".to_string());
        for n in next.iter().take(3).filter_map(Value::as_str) {
            parts.push(format!("- {n}"));
        }
    }

    parts.join("\n")
}

fn build_status_reply(analysis_json: &Value) -> String {
    let target_name = snapshot_str(analysis_json, &["target", "name"])
        .or_else(|| snapshot_str(analysis_json, &["target", "service"]))
        .unwrap_or("this target");
    let one_liner = snapshot_str(analysis_json, &["analysis", "verdict", "one_liner"])
        .unwrap_or("No verdict available.");
    let classification =
        snapshot_str(analysis_json, &["analysis", "verdict", "classification"]).unwrap_or("unknown");
    let severity = snapshot_str(analysis_json, &["analysis", "verdict", "severity"]).unwrap_or("unknown");
    let confidence = analysis_json
        .pointer("/analysis/scores/confidence_score")
        .and_then(Value::as_i64);

    format!(
        "**{target_name}** — {one_liner}\nClassification: **{classification}** | Severity: **{severity}**{}\nIf you'd like fresh data, ask me to re-check with live tools.",
        confidence.map(|c| format!(" | Confidence: {c}/100")).unwrap_or_default()
    )
}

/// Deterministic intents for CASE chat: greeting, summary, status, and
/// the family-count-over-window DB aggregation.
pub async fn try_handle_case_intents(
    pool: Option<&PgPool>,
    analysis_json: &Value,
    user_message: &str,
) -> IntentResult {
    let s = norm(user_message);
    if s.is_empty() {
        return IntentResult::unhandled();
    }

    if GREETING.is_match(&s) {
        let target_name = snapshot_str(analysis_json, &["target", "name"])
            .or_else(|| snapshot_str(analysis_json, &["target", "service"]))
            .unwrap_or("this case");
        return IntentResult::handled(
            "case.greeting",
            format!("Hey! I'm here to help with **{target_name}**. What would you like to know?"),
        );
    }
    if SUMMARY.is_match(&s) {
        return IntentResult::handled("case.summary", build_case_summary(analysis_json));
    }
    if STATUS.is_match(&s) {
        return IntentResult::handled("case.status", build_status_reply(analysis_json));
    }

    // "how many times did this app get OOM killed in the last 7 days"
    if (s.contains("how many") || s.contains("count")) && (s.contains("last") || s.contains("past")) {
        let Some(family) = infer_family(&s) else {
            return IntentResult::unhandled();
        };
        let days = parse_days_window(&s).unwrap_or(7);
        let Some(pool) = pool else {
            return IntentResult::handled(
                "case.family_db_count",
                "I can't answer that right now because Postgres isn't configured (it's required for historical counts).",
            );
        };

        let service = snapshot_str(analysis_json, &["target", "service"]).map(ToString::to_string);
        let namespace = snapshot_str(analysis_json, &["target", "namespace"]).map(ToString::to_string);
        let cluster = snapshot_str(analysis_json, &["target", "cluster"]).map(ToString::to_string);

        let row = sqlx::query(
            "WITH scoped AS (
                SELECT r.run_id, r.case_id,
                       NULLIF(r.analysis_json #>> '{analysis,features,family}', '') AS family,
                       NULLIF(r.analysis_json #>> '{target,service}', '') AS svc,
                       NULLIF(r.analysis_json #>> '{target,namespace}', '') AS ns,
                       NULLIF(r.analysis_json #>> '{target,cluster}', '') AS cl
                FROM investigation_runs r
                WHERE r.created_at >= (now() - ($1::bigint * interval '1 day'))
            )
            SELECT COUNT(*) AS runs_count, COUNT(DISTINCT case_id) AS cases_count
            FROM scoped
            WHERE LOWER(COALESCE(family, '')) = LOWER($2)
              AND ($3::text IS NULL OR svc = $3::text)
              AND ($4::text IS NULL OR ns = $4::text)
              AND ($5::text IS NULL OR cl = $5::text)",
        )
        .bind(days)
        .bind(&family)
        .bind(&service)
        .bind(&namespace)
        .bind(&cluster)
        .fetch_one(pool)
        .await;

        return match row {
            Ok(row) => {
                let runs: i64 = row.try_get("runs_count").unwrap_or(0);
                let cases: i64 = row.try_get("cases_count").unwrap_or(0);
                let svc_label = service
                    .map(|s| format!("service `{s}`"))
                    .unwrap_or_else(|| "this target".to_string());
                IntentResult::handled(
                    "case.family_db_count",
                    format!(
                        "Last {days} days: **{runs}** run(s) across **{cases}** case(s) for family `{family}` on {svc_label}. (Count is from the case database, not pod restart counters.)"
                    ),
                )
            }
            Err(_) => IntentResult::handled(
                "case.family_db_count",
                "I couldn't query the case database right now (db unavailable).",
            ),
        };
    }

    IntentResult::unhandled()
}

/// Deterministic intents for GLOBAL chat: greeting, counts, top teams.
pub async fn try_handle_global_intents(
    ctx: &ToolContext<'_>,
    user_message: &str,
) -> IntentResult {
    let s = norm(user_message);
    if s.is_empty() {
        return IntentResult::unhandled();
    }

    // Greeting fires exactly when the whole message matches.
    if GREETING.is_match(&s) {
        return IntentResult::handled(
            "global.greeting",
            "Hey! I'm here to help you explore the incident database. What would you like to know?",
        );
    }

    if s.contains("how many") || s.starts_with("count ") || s.contains(" count ") {
        let mut args = Map::new();
        args.insert("status".to_string(), json!("all"));
        if let Some(family) = infer_family(&s) {
            args.insert("family".to_string(), json!(family));
        }
        if let Some(team) = infer_team(&s) {
            args.insert("team".to_string(), json!(team));
        }
        if let Some(cls) = infer_classification(&s) {
            args.insert("classification".to_string(), json!(cls));
        }
        if let Some(days) = parse_days_window(&s) {
            args.insert("since_hours".to_string(), json!(days * 24));
        }

        let result = run_tool(ctx, "cases.count", &args).await;
        let (outcome, summary) =
            summarize_tool_result("cases.count", result.ok, result.error.as_deref(), result.result.as_ref());
        let ev = ChatToolEvent {
            tool: "cases.count".to_string(),
            args: json!(args),
            ok: result.ok,
            result: result.result.clone(),
            error: result.error.clone(),
            outcome: Some(outcome),
            summary: Some(summary),
            key: Some(tool_call_key("cases.count", &args)),
        };
        let reply = if result.ok {
            let count = result
                .result
                .as_ref()
                .and_then(|r| r.get("count"))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            format!("Count: **{count}** case(s).")
        } else {
            "I couldn't query counts right now (db/tool unavailable).".to_string()
        };
        return IntentResult {
            handled: true,
            reply,
            tool_events: vec![ev],
            intent_id: Some("global.cases_count"),
        };
    }

    if s.contains("top teams") || s.contains("which teams") {
        let mut args = Map::new();
        args.insert("by".to_string(), json!("team"));
        args.insert("status".to_string(), json!("all"));
        args.insert("limit".to_string(), json!(8));

        let result = run_tool(ctx, "cases.top", &args).await;
        let (outcome, summary) =
            summarize_tool_result("cases.top", result.ok, result.error.as_deref(), result.result.as_ref());
        let ev = ChatToolEvent {
            tool: "cases.top".to_string(),
            args: json!(args),
            ok: result.ok,
            result: result.result.clone(),
            error: result.error.clone(),
            outcome: Some(outcome),
            summary: Some(summary),
            key: Some(tool_call_key("cases.top", &args)),
        };
        let reply = if result.ok {
            let lines: Vec<String> = result
                .result
                .as_ref()
                .and_then(|r| r.get("items"))
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .take(8)
                        .map(|it| {
                            format!(
                                "- {}: {}",
                                it.get("key").and_then(Value::as_str).unwrap_or("unknown"),
                                it.get("count").and_then(Value::as_i64).unwrap_or(0)
                            )
                        })
                        .collect()
                })
                .unwrap_or_default();
            format!(
                "Top teams by case count:\n{}",
                if lines.is_empty() { "—".to_string() } else { lines.join("\n") }
            )
        } else {
            "I couldn't compute top teams right now (db/tool unavailable).".to_string()
        };
        return IntentResult {
            handled: true,
            reply,
            tool_events: vec![ev],
            intent_id: Some("global.cases_top_team"),
        };
    }

    IntentResult::unhandled()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_greeting_matches_whole_message_only() {
        let aj = json!({"target": {"name": "api-1"}, "analysis": {}});
        let r = try_handle_case_intents(None, &aj, "hello").await;
        assert!(r.handled);
        assert_eq!(r.intent_id, Some("case.greeting"));
        assert!(r.reply.contains("api-1"));
        assert!(r.tool_events.is_empty());

        // Greetings embedded in a real question never match.
        let r = try_handle_case_intents(None, &aj, "hello, why is the pod crashing?").await;
        assert!(!r.handled);
    }

    #[tokio::test]
    async fn test_summary_and_status_from_snapshot() {
        let aj = json!({
            "target": {"name": "api-1", "namespace": "prod"},
            "analysis": {
                "verdict": {"one_liner": "api-1 crashlooping", "classification": "actionable", "severity": "critical", "next": ["check logs"]},
                "scores": {"confidence_score": 72},
                "hypotheses": [{"title": "bad config", "confidence_0_100": 80}],
            }
        });
        let r = try_handle_case_intents(None, &aj, "what happened").await;
        assert!(r.handled);
        assert!(r.reply.contains("bad config"));

        let r = try_handle_case_intents(None, &aj, "what's the status?").await;
        assert!(r.handled);
        assert!(r.reply.contains("actionable"));
        assert!(r.reply.contains("72/100"));
    }

    #[tokio::test]
    async fn test_family_count_without_postgres() {
        let aj = json!({"target": {}, "analysis": {}});
        let r = try_handle_case_intents(None, &aj, "how many oom kills in the last 7 days").await;
        assert!(r.handled);
        assert!(r.reply.contains("Postgres"));
    }

    #[test]
    fn test_parse_days_window() {
        assert_eq!(parse_days_window("last 7 days"), Some(7));
        assert_eq!(parse_days_window("past 14 days"), Some(14));
        assert_eq!(parse_days_window("over 90 days ago in the last 99 days"), Some(30));
        assert_eq!(parse_days_window("whenever"), None);
    }

    #[test]
    fn test_infer_family() {
        assert_eq!(infer_family("how many oom killed pods").as_deref(), Some("oom_killed"));
        assert_eq!(infer_family("5xx spikes last week").as_deref(), Some("http_5xx"));
        assert_eq!(infer_family("family:job_failed count").as_deref(), Some("job_failed"));
        assert_eq!(infer_family("nothing here"), None);
    }
}
