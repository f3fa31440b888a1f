//! The SSOT analysis snapshot.
//!
//! One stable JSON shape consumed by the chat/RCA runtimes and the read
//! APIs: `target.*`, `analysis.{verdict,scores,features,hypotheses,change,
//! noise,capacity,rca}`, `evidence.*`. `verdict.classification` is the
//! source of truth; `scores.classification` is a denormalized copy written
//! here and never read back.

use serde_json::{json, Map, Value};

use crate::model::investigation::Investigation;

/// Current snapshot schema version tag.
pub const SNAPSHOT_VERSION: &str = "tarka.analysis.v1";

fn to_value<T: serde::Serialize>(v: &T) -> Value {
    serde_json::to_value(v).unwrap_or(Value::Null)
}

/// Build the versioned analysis snapshot for an investigation.
#[must_use]
pub fn analysis_snapshot(inv: &Investigation) -> Value {
    let mut target = match to_value(&inv.target) {
        Value::Object(m) => m,
        _ => Map::new(),
    };
    target.insert("name".to_string(), json!(inv.target.display_name()));

    json!({
        "schema_version": SNAPSHOT_VERSION,
        "target": Value::Object(target),
        "analysis": {
            "verdict": to_value(&inv.analysis.verdict),
            "scores": to_value(&inv.analysis.scores),
            "features": to_value(&inv.analysis.features),
            "hypotheses": to_value(&inv.analysis.hypotheses),
            "change": to_value(&inv.analysis.change),
            "noise": to_value(&inv.analysis.noise),
            "capacity": to_value(&inv.analysis.capacity),
            "enrichment": to_value(&inv.analysis.enrichment),
            "rca": to_value(&inv.analysis.rca),
        },
        "evidence": {
            "k8s": to_value(&inv.evidence.k8s),
            "metrics": to_value(&inv.evidence.metrics),
            "logs": to_value(&inv.evidence.logs),
            "aws": to_value(&inv.evidence.aws),
            "github": to_value(&inv.evidence.github),
            "meta": Value::Object(inv.evidence.meta.clone()),
        },
        "alert": {
            "fingerprint": inv.alert.fingerprint,
            "alertname": inv.alert.name(),
            "labels": to_value(&inv.alert.labels),
            "annotations": to_value(&inv.alert.annotations),
            "starts_at": to_value(&inv.alert.starts_at),
            "state": inv.alert.state.as_str(),
        },
        "time_window": to_value(&inv.time_window),
        "errors": inv.errors,
    })
}

/// Fetch a nested string out of a snapshot, e.g.
/// `snapshot_str(&aj, &["analysis", "verdict", "one_liner"])`.
#[must_use]
pub fn snapshot_str<'a>(aj: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut cur = aj;
    for p in path {
        cur = cur.get(p)?;
    }
    cur.as_str().map(str::trim).filter(|s| !s.is_empty())
}

/// Fetch a nested integer out of a snapshot.
#[must_use]
pub fn snapshot_i64(aj: &Value, path: &[&str]) -> Option<i64> {
    let mut cur = aj;
    for p in path {
        cur = cur.get(p)?;
    }
    cur.as_i64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::Family;
    use crate::model::alert::{Alert, AlertState};
    use crate::model::analysis::{Classification, Verdict};
    use crate::model::target::Target;
    use chrono::Utc;

    fn inv() -> Investigation {
        let alert = Alert {
            fingerprint: "fp".to_string(),
            labels: [("alertname".to_string(), "CrashLoopBackOff".to_string())].into(),
            annotations: Default::default(),
            starts_at: None,
            ends_at: None,
            generator_url: String::new(),
            state: AlertState::Firing,
        };
        let target = Target {
            pod: Some("api-1".to_string()),
            namespace: Some("prod".to_string()),
            ..Target::default()
        };
        Investigation::new(alert, target, "1h", Utc::now())
    }

    #[test]
    fn test_snapshot_shape() {
        let mut i = inv();
        i.analysis.verdict = Some(Verdict {
            severity: Some("warning".to_string()),
            classification: Classification::Actionable,
            primary_driver: "crashloop".to_string(),
            one_liner: "api-1 is crashlooping".to_string(),
            family: Family::Crashloop,
            next: vec![],
        });
        let aj = analysis_snapshot(&i);
        assert_eq!(
            snapshot_str(&aj, &["analysis", "verdict", "one_liner"]),
            Some("api-1 is crashlooping")
        );
        assert_eq!(snapshot_str(&aj, &["target", "name"]), Some("api-1"));
        assert_eq!(snapshot_str(&aj, &["alert", "alertname"]), Some("CrashLoopBackOff"));
    }

    #[test]
    fn test_snapshot_missing_paths() {
        let aj = analysis_snapshot(&inv());
        assert_eq!(snapshot_str(&aj, &["analysis", "verdict", "one_liner"]), None);
        assert_eq!(snapshot_i64(&aj, &["analysis", "scores", "impact_score"]), None);
    }
}
