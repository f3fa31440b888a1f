//! Normalized Alertmanager alerts.
//!
//! Reference: <https://prometheus.io/docs/alerting/latest/configuration/#webhook_config>

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Normalized alert state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Firing,
    Resolved,
    Unknown,
}

impl AlertState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Firing => "firing",
            Self::Resolved => "resolved",
            Self::Unknown => "unknown",
        }
    }
}

/// A single alert after webhook normalization.
///
/// Labels use a `BTreeMap` so canonical JSON serialization is stable
/// regardless of the order Alertmanager sent them in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Alertmanager fingerprint, or a SHA-256 of the canonical labelset
    /// when the payload omitted one.
    pub fingerprint: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub generator_url: String,
    pub state: AlertState,
}

impl Alert {
    /// Get the alert name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.labels.get("alertname").map_or("Unknown", String::as_str)
    }

    /// Get the severity label.
    #[must_use]
    pub fn severity(&self) -> Option<&str> {
        self.labels.get("severity").map(String::as_str)
    }

    /// Check if this is a firing alert.
    #[must_use]
    pub fn is_firing(&self) -> bool {
        self.state == AlertState::Firing
    }
}

/// Stable fingerprint for alerts whose payload lacked one.
///
/// This is NOT Alertmanager's fingerprint, but is stable across identical
/// labelsets.
#[must_use]
pub fn fallback_fingerprint(labels: &BTreeMap<String, String>) -> String {
    let payload = serde_json::to_string(labels).unwrap_or_default();
    hex::encode(Sha256::digest(payload.as_bytes()))
}

/// Alertmanager can include an `endsAt` even for firing alerts, sometimes
/// as the zero-time placeholder `0001-01-01T00:00:00Z`. Treat those as
/// absent.
fn nonempty_ends_at(v: Option<&Value>) -> Option<&str> {
    let s = v?.as_str()?.trim();
    if s.is_empty() || s.starts_with("0001-01-01") {
        return None;
    }
    Some(s)
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn string_map(v: Option<&Value>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Some(Value::Object(map)) = v {
        for (k, vv) in map {
            // Unexpected value types are coerced to strings.
            let s = match vv {
                Value::String(s) => s.clone(),
                Value::Null => continue,
                other => other.to_string(),
            };
            out.insert(k.clone(), s);
        }
    }
    out
}

/// Convert an Alertmanager webhook alert object into the internal shape.
///
/// Status derivation, in order:
/// 1. a real (non-placeholder) `endsAt` means `resolved`;
/// 2. a `startsAt` means `firing`;
/// 3. the parent notification status, when it is `firing`/`resolved`;
/// 4. the alert's own `status` field, else `unknown`.
#[must_use]
pub fn normalize_webhook_alert(raw: &Value, parent_status: Option<&str>) -> Alert {
    let labels = string_map(raw.get("labels"));
    let annotations = string_map(raw.get("annotations"));

    let starts_raw = raw
        .get("startsAt")
        .or_else(|| raw.get("starts_at"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let ends_raw = nonempty_ends_at(raw.get("endsAt").or_else(|| raw.get("ends_at")));

    let state = if ends_raw.is_some() {
        AlertState::Resolved
    } else if starts_raw.is_some() {
        AlertState::Firing
    } else {
        match parent_status {
            Some("firing") => AlertState::Firing,
            Some("resolved") => AlertState::Resolved,
            _ => match raw.get("status").and_then(Value::as_str) {
                Some("firing") => AlertState::Firing,
                Some("resolved") => AlertState::Resolved,
                _ => AlertState::Unknown,
            },
        }
    };

    let fingerprint = raw
        .get("fingerprint")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map_or_else(|| fallback_fingerprint(&labels), ToString::to_string);

    Alert {
        fingerprint,
        labels,
        annotations,
        starts_at: starts_raw.and_then(parse_rfc3339),
        ends_at: ends_raw.and_then(parse_rfc3339),
        generator_url: raw
            .get("generatorURL")
            .or_else(|| raw.get("generator_url"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_firing_from_starts_at() {
        let raw = json!({
            "labels": {"alertname": "CrashLoopBackOff"},
            "startsAt": "2026-01-02T03:04:05Z",
        });
        let a = normalize_webhook_alert(&raw, None);
        assert_eq!(a.state, AlertState::Firing);
        assert_eq!(a.name(), "CrashLoopBackOff");
    }

    #[test]
    fn test_placeholder_ends_at_is_firing() {
        let raw = json!({
            "labels": {"alertname": "A"},
            "startsAt": "2026-01-02T03:04:05Z",
            "endsAt": "0001-01-01T00:00:00Z",
        });
        let a = normalize_webhook_alert(&raw, None);
        assert_eq!(a.state, AlertState::Firing);
    }

    #[test]
    fn test_real_ends_at_is_resolved() {
        let raw = json!({
            "labels": {"alertname": "A"},
            "startsAt": "2026-01-02T03:04:05Z",
            "endsAt": "2026-01-02T04:04:05Z",
        });
        let a = normalize_webhook_alert(&raw, None);
        assert_eq!(a.state, AlertState::Resolved);
    }

    #[test]
    fn test_parent_status_fallback() {
        let raw = json!({"labels": {"alertname": "A"}});
        let a = normalize_webhook_alert(&raw, Some("firing"));
        assert_eq!(a.state, AlertState::Firing);
        let b = normalize_webhook_alert(&raw, None);
        assert_eq!(b.state, AlertState::Unknown);
    }

    #[test]
    fn test_fallback_fingerprint_stable_across_order() {
        // BTreeMap ordering makes insertion order irrelevant.
        let mut l1 = BTreeMap::new();
        l1.insert("b".to_string(), "2".to_string());
        l1.insert("a".to_string(), "1".to_string());
        let mut l2 = BTreeMap::new();
        l2.insert("a".to_string(), "1".to_string());
        l2.insert("b".to_string(), "2".to_string());
        assert_eq!(fallback_fingerprint(&l1), fallback_fingerprint(&l2));
    }
}
