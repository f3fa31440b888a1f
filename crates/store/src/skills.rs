//! Skills: operator-curated advice matched against the snapshot context.
//!
//! A skill is a Postgres row with a small `when` expression tree and an
//! advice template. The `when` DSL supports `all`, `any`, `not` and the
//! comparison operators `==`, `!=`, `>`, `>=`, `<`, `<=`, `contains`,
//! `exists` (word forms `eq`/`ne`/`gt`/`gte`/`lt`/`lte` are accepted
//! too) over dotted snapshot paths; templates substitute `{path}`
//! placeholders.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;
use sqlx::{PgPool, Row};

use tarka_core::Investigation;

/// One loaded skill row.
#[derive(Debug, Clone)]
pub struct Skill {
    pub skill_id: String,
    pub name: String,
    pub when_json: Value,
    pub advice_template: String,
}

/// A matched skill with its rendered advice.
#[derive(Debug, Clone)]
pub struct SkillMatch {
    pub skill_id: String,
    pub name: String,
    pub advice: String,
}

/// Flattened evaluation context built from the investigation.
#[must_use]
pub fn build_skill_context(inv: &Investigation) -> Value {
    tarka_core::snapshot::analysis_snapshot(inv)
}

fn get_path<'a>(ctx: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = ctx;
    for part in path.split('.') {
        cur = cur.get(part)?;
    }
    Some(cur)
}

fn as_f64(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    // String/number cross-comparisons happen constantly in snapshots.
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

/// Evaluate a `when` expression against the context. Unknown operators
/// and malformed nodes evaluate to false, never panic.
#[must_use]
pub fn eval_when(when: &Value, ctx: &Value) -> bool {
    let Some(obj) = when.as_object() else {
        return false;
    };

    if let Some(children) = obj.get("all").and_then(Value::as_array) {
        return children.iter().all(|c| eval_when(c, ctx));
    }
    if let Some(children) = obj.get("any").and_then(Value::as_array) {
        return children.iter().any(|c| eval_when(c, ctx));
    }
    if let Some(inner) = obj.get("not") {
        return !eval_when(inner, ctx);
    }

    let op = obj.get("op").and_then(Value::as_str).unwrap_or("");
    let path = obj.get("path").and_then(Value::as_str).unwrap_or("");
    let expected = obj.get("value").unwrap_or(&Value::Null);
    let actual = get_path(ctx, path);

    let numeric = |cmp: fn(f64, f64) -> bool| match (actual.and_then(as_f64), as_f64(expected)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    };

    match op {
        "exists" => actual.is_some_and(|v| !v.is_null()),
        "==" | "eq" => actual.is_some_and(|v| values_equal(v, expected)),
        "!=" | "ne" => !actual.is_some_and(|v| values_equal(v, expected)),
        ">" | "gt" => numeric(|a, b| a > b),
        ">=" | "gte" => numeric(|a, b| a >= b),
        "<" | "lt" => numeric(|a, b| a < b),
        "<=" | "lte" => numeric(|a, b| a <= b),
        "contains" => match (actual, expected.as_str()) {
            (Some(Value::String(s)), Some(needle)) => s.contains(needle),
            (Some(Value::Array(items)), Some(needle)) => {
                items.iter().any(|i| i.as_str() == Some(needle))
            }
            _ => false,
        },
        _ => false,
    }
}

static TEMPLATE_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-zA-Z0-9_.]+)\}").expect("static pattern"));

/// Substitute `{path}` placeholders from the context; unknown paths render
/// as `?`.
#[must_use]
pub fn render_template(template: &str, ctx: &Value) -> String {
    TEMPLATE_VAR
        .replace_all(template, |caps: &regex::Captures<'_>| {
            match get_path(ctx, &caps[1]) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => "?".to_string(),
                Some(other) => other.to_string(),
            }
        })
        .into_owned()
}

/// Load active skills.
pub async fn load_active_skills(pool: &PgPool) -> Result<Vec<Skill>> {
    let rows = sqlx::query(
        "SELECT skill_id::text AS skill_id, name, when_json, advice_template
         FROM skills WHERE active ORDER BY created_at",
    )
    .fetch_all(pool)
    .await
    .context("load skills")?;
    Ok(rows
        .iter()
        .map(|r| Skill {
            skill_id: r.try_get("skill_id").unwrap_or_default(),
            name: r.try_get("name").unwrap_or_default(),
            when_json: r.try_get("when_json").unwrap_or(Value::Null),
            advice_template: r.try_get("advice_template").unwrap_or_default(),
        })
        .collect())
}

/// Match skills against an investigation, capped at `max_matches`.
pub async fn match_skills(pool: &PgPool, inv: &Investigation, max_matches: usize) -> Result<Vec<SkillMatch>> {
    let ctx = build_skill_context(inv);
    let skills = load_active_skills(pool).await?;
    let mut out = Vec::new();
    for skill in skills {
        if out.len() >= max_matches {
            break;
        }
        if eval_when(&skill.when_json, &ctx) {
            out.push(SkillMatch {
                advice: render_template(&skill.advice_template, &ctx),
                skill_id: skill.skill_id,
                name: skill.name,
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Value {
        json!({
            "target": {"namespace": "prod", "name": "api-1"},
            "analysis": {
                "features": {"family": "crashloop", "k8s": {"restart_rate_5m_max": 4.0}},
            }
        })
    }

    #[test]
    fn test_eval_ops() {
        let c = ctx();
        assert!(eval_when(&json!({"op": "==", "path": "target.namespace", "value": "prod"}), &c));
        assert!(eval_when(&json!({"op": "!=", "path": "target.namespace", "value": "dev"}), &c));
        assert!(eval_when(
            &json!({"op": ">=", "path": "analysis.features.k8s.restart_rate_5m_max", "value": 3}),
            &c
        ));
        // Strict inequalities are distinct from the inclusive forms at the
        // boundary value.
        assert!(eval_when(
            &json!({"op": ">", "path": "analysis.features.k8s.restart_rate_5m_max", "value": 3}),
            &c
        ));
        assert!(!eval_when(
            &json!({"op": ">", "path": "analysis.features.k8s.restart_rate_5m_max", "value": 4}),
            &c
        ));
        assert!(eval_when(
            &json!({"op": ">=", "path": "analysis.features.k8s.restart_rate_5m_max", "value": 4}),
            &c
        ));
        assert!(eval_when(
            &json!({"op": "<", "path": "analysis.features.k8s.restart_rate_5m_max", "value": 5}),
            &c
        ));
        assert!(!eval_when(
            &json!({"op": "<", "path": "analysis.features.k8s.restart_rate_5m_max", "value": 4}),
            &c
        ));
        assert!(eval_when(&json!({"op": "exists", "path": "target.name"}), &c));
        assert!(!eval_when(&json!({"op": "exists", "path": "target.pod"}), &c));
        assert!(eval_when(
            &json!({"op": "contains", "path": "analysis.features.family", "value": "crash"}),
            &c
        ));
    }

    #[test]
    fn test_eval_combinators() {
        let c = ctx();
        assert!(eval_when(
            &json!({"all": [
                {"op": "==", "path": "target.namespace", "value": "prod"},
                {"op": "exists", "path": "target.name"}
            ]}),
            &c
        ));
        assert!(eval_when(
            &json!({"any": [
                {"op": "==", "path": "target.namespace", "value": "dev"},
                {"op": "==", "path": "target.namespace", "value": "prod"}
            ]}),
            &c
        ));
        assert!(eval_when(
            &json!({"not": {"op": "==", "path": "target.namespace", "value": "dev"}}),
            &c
        ));
    }

    #[test]
    fn test_word_form_operator_aliases() {
        let c = ctx();
        assert!(eval_when(&json!({"op": "eq", "path": "target.namespace", "value": "prod"}), &c));
        assert!(eval_when(&json!({"op": "ne", "path": "target.namespace", "value": "dev"}), &c));
        assert!(eval_when(
            &json!({"op": "gt", "path": "analysis.features.k8s.restart_rate_5m_max", "value": 3}),
            &c
        ));
        assert!(eval_when(
            &json!({"op": "gte", "path": "analysis.features.k8s.restart_rate_5m_max", "value": 4}),
            &c
        ));
        assert!(eval_when(
            &json!({"op": "lt", "path": "analysis.features.k8s.restart_rate_5m_max", "value": 5}),
            &c
        ));
        assert!(eval_when(
            &json!({"op": "lte", "path": "analysis.features.k8s.restart_rate_5m_max", "value": 4}),
            &c
        ));
    }

    #[test]
    fn test_malformed_when_is_false() {
        assert!(!eval_when(&json!("garbage"), &ctx()));
        assert!(!eval_when(&json!({"op": "~~", "path": "x", "value": 1}), &ctx()));
    }

    #[test]
    fn test_template_rendering() {
        let advice = render_template(
            "Restart {target.name} in {target.namespace}; missing: {no.such.path}",
            &ctx(),
        );
        assert_eq!(advice, "Restart api-1 in prod; missing: ?");
    }
}
