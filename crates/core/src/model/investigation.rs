//! The Investigation: single source of truth for one pipeline run.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::alert::Alert;
use super::analysis::Analysis;
use super::evidence::{
    AwsEvidence, GithubEvidence, K8sEvidence, LogsEvidence, MetricsEvidence,
};
use super::target::Target;

/// Time window an investigation looks at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Human label, e.g. `1h` or `job_lifetime_5400s`.
    pub window: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl TimeWindow {
    /// Build a `[end - window, end]` range from a `15m`/`2h`/`1d` label.
    /// Unparseable labels fall back to one hour.
    #[must_use]
    pub fn ending_at(end: DateTime<Utc>, window: &str) -> Self {
        let secs = parse_window_seconds(window).unwrap_or(3600);
        Self {
            window: window.to_string(),
            start_time: end - Duration::seconds(secs),
            end_time: end,
        }
    }

    #[must_use]
    pub fn duration_seconds(&self) -> i64 {
        (self.end_time - self.start_time).num_seconds()
    }
}

/// Parse `30s`/`15m`/`2h`/`1d` window labels into seconds.
#[must_use]
pub fn parse_window_seconds(window: &str) -> Option<i64> {
    let w = window.trim();
    if w.is_empty() {
        return None;
    }
    let (num, unit) = w.split_at(w.len() - 1);
    let n: i64 = num.parse().ok()?;
    if n <= 0 {
        return None;
    }
    match unit {
        "s" => Some(n),
        "m" => Some(n * 60),
        "h" => Some(n * 3600),
        "d" => Some(n * 86400),
        _ => None,
    }
}

/// All evidence gathered during one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(default)]
    pub k8s: K8sEvidence,
    #[serde(default)]
    pub metrics: MetricsEvidence,
    #[serde(default)]
    pub logs: LogsEvidence,
    #[serde(default)]
    pub aws: AwsEvidence,
    #[serde(default)]
    pub github: GithubEvidence,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

/// The mutable record built during pipeline execution.
///
/// Collectors mutate `evidence` and `meta` and append to `errors`; nothing
/// in the pipeline ever propagates a collector failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Investigation {
    pub alert: Alert,
    pub target: Target,
    pub time_window: TimeWindow,
    #[serde(default)]
    pub evidence: Evidence,
    #[serde(default)]
    pub analysis: Analysis,
    #[serde(default)]
    pub errors: Vec<String>,
    /// Freeform debug breadcrumbs (`time_window_adjusted`, `blocked_mode`,
    /// `rca_tool_events`, ...).
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl Investigation {
    /// Construct a fresh investigation for an alert over a window ending
    /// at `now`.
    #[must_use]
    pub fn new(alert: Alert, target: Target, window: &str, now: DateTime<Utc>) -> Self {
        Self {
            alert,
            target,
            time_window: TimeWindow::ending_at(now, window),
            evidence: Evidence::default(),
            analysis: Analysis::default(),
            errors: Vec::new(),
            meta: Map::new(),
        }
    }

    /// Record a best-effort failure without interrupting the pipeline.
    pub fn push_error(&mut self, context: &str, err: impl std::fmt::Display) {
        self.errors.push(format!("{context}: {err}"));
    }

    /// Set a meta breadcrumb.
    pub fn set_meta(&mut self, key: &str, value: impl Into<Value>) {
        self.meta.insert(key.to_string(), value.into());
    }

    #[must_use]
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_window_seconds() {
        assert_eq!(parse_window_seconds("1h"), Some(3600));
        assert_eq!(parse_window_seconds("15m"), Some(900));
        assert_eq!(parse_window_seconds("30s"), Some(30));
        assert_eq!(parse_window_seconds("2d"), Some(172_800));
        assert_eq!(parse_window_seconds("nope"), None);
        assert_eq!(parse_window_seconds(""), None);
        assert_eq!(parse_window_seconds("-5m"), None);
    }

    #[test]
    fn test_window_fallback_to_one_hour() {
        let end = Utc::now();
        let tw = TimeWindow::ending_at(end, "garbage");
        assert_eq!(tw.duration_seconds(), 3600);
    }
}
