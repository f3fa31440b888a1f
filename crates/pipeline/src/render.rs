//! Markdown report rendering.
//!
//! The log section shows an actionable snippet (FATAL/EXCEPTION findings
//! first, then ERROR, in original order), not the raw tail, so downstream
//! RCA is not dominated by startup banners.

use std::fmt::Write as _;

use tarka_core::model::evidence::ParsedLogError;
use tarka_core::Investigation;

use crate::collectors::log_parser::summarize_parsed_errors;

/// Cap on log findings shown in the report.
const LOG_SNIPPET_CAP: usize = 12;

/// Select the actionable subset of parsed findings: highest severity
/// first, original order preserved inside each severity tier.
#[must_use]
pub fn select_log_snippet(parsed: &[ParsedLogError], cap: usize) -> Vec<&ParsedLogError> {
    let mut picked: Vec<&ParsedLogError> = Vec::new();
    for sev in ["FATAL", "EXCEPTION", "ERROR"] {
        for e in parsed.iter().filter(|e| e.severity == sev) {
            if picked.len() >= cap {
                return picked;
            }
            picked.push(e);
        }
    }
    picked
}

/// Render the full Markdown report for an investigation.
#[must_use]
pub fn render_report(inv: &Investigation) -> String {
    let mut out = String::new();
    let alertname = inv.alert.name();
    let target = inv.target.display_name();

    let _ = writeln!(out, "# {alertname}: {target}\n");

    // Verdict header
    if let Some(v) = &inv.analysis.verdict {
        let _ = writeln!(out, "> **{}**", v.one_liner);
        let _ = writeln!(
            out,
            ">\n> classification: `{}` | family: `{}` | driver: `{}`{}\n",
            v.classification.as_str(),
            v.family,
            v.primary_driver,
            v.severity
                .as_deref()
                .map(|s| format!(" | severity: `{s}`"))
                .unwrap_or_default(),
        );
    }
    if let Some(s) = &inv.analysis.scores {
        let _ = writeln!(
            out,
            "Scores: impact **{}** / confidence **{}** / noise **{}**\n",
            s.impact_score, s.confidence_score, s.noise_score
        );
    }

    // Target table
    let _ = writeln!(out, "## Target\n");
    let _ = writeln!(out, "| Field | Value |");
    let _ = writeln!(out, "|-------|-------|");
    let mut row = |k: &str, v: &Option<String>| {
        if let Some(v) = v {
            let _ = writeln!(out, "| {k} | `{v}` |");
        }
    };
    row("cluster", &inv.target.cluster);
    row("namespace", &inv.target.namespace);
    row("pod", &inv.target.pod);
    row("container", &inv.target.container);
    row("workload_kind", &inv.target.workload_kind);
    row("workload_name", &inv.target.workload_name);
    row("service", &inv.target.service);
    row("team", &inv.target.team);
    let _ = writeln!(out);

    let _ = writeln!(
        out,
        "Window: `{}` ({} → {})\n",
        inv.time_window.window,
        inv.time_window.start_time.format("%Y-%m-%d %H:%M:%SZ"),
        inv.time_window.end_time.format("%Y-%m-%d %H:%M:%SZ"),
    );

    // Hypotheses
    if !inv.analysis.hypotheses.is_empty() {
        let _ = writeln!(out, "## Hypotheses\n");
        for h in &inv.analysis.hypotheses {
            let _ = writeln!(out, "### {} ({}/100)\n", h.title, h.confidence_0_100);
            for w in &h.why {
                let _ = writeln!(out, "- {w}");
            }
            if !h.next_tests.is_empty() {
                let _ = writeln!(out, "\nNext tests:");
                for t in &h.next_tests {
                    let _ = writeln!(out, "- {t}");
                }
            }
            let _ = writeln!(out);
        }
    }

    // K8s evidence
    if let Some(pod_info) = &inv.evidence.k8s.pod_info {
        let _ = writeln!(out, "## Kubernetes\n");
        let _ = writeln!(
            out,
            "Pod `{}` phase `{}`{}",
            pod_info.name,
            pod_info.phase.as_deref().unwrap_or("unknown"),
            pod_info
                .node
                .as_deref()
                .map(|n| format!(" on node `{n}`"))
                .unwrap_or_default(),
        );
        for cs in &pod_info.container_statuses {
            let _ = writeln!(
                out,
                "- container `{}`: ready={}, restarts={}",
                cs.name, cs.ready, cs.restart_count
            );
        }
        let _ = writeln!(out);
    }
    if let Some(rs) = &inv.evidence.k8s.rollout_status {
        let _ = writeln!(
            out,
            "Rollout: `{}/{}` ready={:?} desired={:?} (source: {})\n",
            rs.kind,
            rs.name,
            rs.ready_replicas.or(rs.number_ready),
            rs.replicas.or(rs.desired_number_scheduled),
            rs.source.as_deref().unwrap_or("k8s_api"),
        );
    }
    if !inv.evidence.k8s.pod_events.is_empty() {
        let _ = writeln!(out, "### Recent events\n");
        for ev in inv.evidence.k8s.pod_events.iter().rev().take(10) {
            let _ = writeln!(
                out,
                "- [{}] {}: {}",
                ev.event_type.as_deref().unwrap_or("?"),
                ev.reason.as_deref().unwrap_or("?"),
                ev.message.as_deref().unwrap_or(""),
            );
        }
        let _ = writeln!(out);
    }
    if let Some(ipd) = &inv.evidence.k8s.image_pull_diagnostics {
        let _ = writeln!(out, "### Image pull diagnostics\n");
        let _ = writeln!(
            out,
            "- reason: `{}`, bucket: `{}`",
            ipd.waiting_reason.as_deref().unwrap_or("?"),
            ipd.error_bucket.as_deref().unwrap_or("unknown"),
        );
        if let Some(img) = &ipd.image {
            let _ = writeln!(out, "- image: `{img}`");
        }
        let _ = writeln!(out);
    }

    // Logs
    let _ = writeln!(out, "## Logs\n");
    match inv.evidence.logs.logs_status.as_deref() {
        Some("ok") => {
            let snippet = select_log_snippet(&inv.evidence.logs.parsed_errors, LOG_SNIPPET_CAP);
            if snippet.is_empty() {
                let _ = writeln!(
                    out,
                    "{} entries fetched; no ERROR/FATAL/Exception patterns matched.\n",
                    inv.evidence.logs.logs.len()
                );
            } else {
                let _ = writeln!(out, "```");
                for e in &snippet {
                    let ts = e.timestamp.as_deref().map(|t| format!("{t} ")).unwrap_or_default();
                    let _ = writeln!(out, "[{}] {}{}", e.severity, ts, e.message);
                }
                let _ = writeln!(out, "```\n");
                let _ = writeln!(out, "{}\n", summarize_parsed_errors(&inv.evidence.logs.parsed_errors, 5));
            }
        }
        Some(status) => {
            let _ = writeln!(
                out,
                "Logs {status}{}.\n",
                inv.evidence
                    .logs
                    .logs_reason
                    .as_deref()
                    .map(|r| format!(" (reason: {r})"))
                    .unwrap_or_default(),
            );
        }
        None => {
            let _ = writeln!(out, "No log fetch was attempted for this target.\n");
        }
    }

    // Capacity
    if let Some(cap) = &inv.analysis.capacity {
        let _ = writeln!(out, "## Capacity\n");
        if let Some(s) = &cap.summary {
            let _ = writeln!(out, "{s}\n");
        }
        for c in &cap.containers {
            let _ = writeln!(
                out,
                "- `{}`: p95 {:?} cores, request {:?}, limit {:?}, throttle p95 {:?}%",
                c.container, c.cpu_usage_p95_cores, c.cpu_request_cores, c.cpu_limit_cores, c.throttle_p95_pct,
            );
        }
        let _ = writeln!(out);
    }

    // Change correlation
    if let Some(change) = &inv.analysis.change {
        if let Some(summary) = &change.summary {
            let _ = writeln!(out, "## Change correlation\n");
            let _ = writeln!(out, "{summary} (score: {:?})\n", change.score);
        }
    }

    // RCA
    if let Some(rca) = &inv.analysis.rca {
        let _ = writeln!(out, "## Root cause analysis\n");
        if let Some(s) = &rca.summary {
            let _ = writeln!(out, "{s}\n");
        }
        if let Some(rc) = &rca.root_cause {
            let _ = writeln!(
                out,
                "**Root cause:** {rc}{}\n",
                rca.confidence_0_1
                    .map(|c| format!(" (confidence {c:.2})"))
                    .unwrap_or_default(),
            );
        }
        if !rca.remediation.is_empty() {
            let _ = writeln!(out, "Remediation:");
            for r in &rca.remediation {
                let _ = writeln!(out, "- {r}");
            }
            let _ = writeln!(out);
        }
        if !rca.unknowns.is_empty() {
            let _ = writeln!(out, "Unknowns:");
            for u in &rca.unknowns {
                let _ = writeln!(out, "- {u}");
            }
            let _ = writeln!(out);
        }
    }

    // Collection errors, for transparency
    if !inv.errors.is_empty() {
        let _ = writeln!(out, "## Collection notes\n");
        for e in inv.errors.iter().take(20) {
            let _ = writeln!(out, "- {e}");
        }
        let _ = writeln!(out);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tarka_core::model::alert::{Alert, AlertState};
    use tarka_core::model::target::Target;

    fn parsed(sev: &str, msg: &str, line: usize) -> ParsedLogError {
        ParsedLogError {
            timestamp: None,
            severity: sev.to_string(),
            message: msg.to_string(),
            pattern_matched: sev.to_string(),
            line_number: line,
        }
    }

    #[test]
    fn test_snippet_priority_order() {
        let findings = vec![
            parsed("ERROR", "e1", 0),
            parsed("FATAL", "f1", 1),
            parsed("ERROR", "e2", 2),
            parsed("EXCEPTION", "x1", 3),
        ];
        let picked = select_log_snippet(&findings, 10);
        let order: Vec<&str> = picked.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(order, vec!["f1", "x1", "e1", "e2"]);
    }

    #[test]
    fn test_snippet_cap() {
        let findings: Vec<ParsedLogError> =
            (0..30).map(|i| parsed("ERROR", &format!("e{i}"), i)).collect();
        assert_eq!(select_log_snippet(&findings, 5).len(), 5);
    }

    #[test]
    fn test_report_renders_without_evidence() {
        let alert = Alert {
            fingerprint: "fp".to_string(),
            labels: [("alertname".to_string(), "CrashLoopBackOff".to_string())].into(),
            annotations: BTreeMap::new(),
            starts_at: None,
            ends_at: None,
            generator_url: String::new(),
            state: AlertState::Firing,
        };
        let inv = Investigation::new(alert, Target::default(), "1h", Utc::now());
        let md = render_report(&inv);
        assert!(md.starts_with("# CrashLoopBackOff"));
        assert!(md.contains("## Logs"));
    }
}
