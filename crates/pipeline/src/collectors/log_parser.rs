//! Deterministic log parsing for ERROR/FATAL/Exception patterns.
//!
//! Pure pattern matching, no LLM. The findings feed base triage, scoring
//! and report generation.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use tarka_core::model::evidence::{LogEntry, LogParseMetadata, ParsedLogError};

/// Severity patterns, ordered by priority: FATAL/CRITICAL beats
/// Exception/Traceback/panic beats ERROR.
static SEVERITY_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"\b(FATAL|Fatal|fatal|CRITICAL|Critical|critical)\b").expect("static pattern"),
            "FATAL",
        ),
        (
            Regex::new(r"\b(Exception|exception|EXCEPTION|Traceback|panic:|PANIC)\b").expect("static pattern"),
            "EXCEPTION",
        ),
        (
            Regex::new(r"\b(ERROR|Error|error)\b").expect("static pattern"),
            "ERROR",
        ),
    ]
});

const DEFAULT_LIMIT: usize = 50;
const MAX_MESSAGE_LENGTH: usize = 500;

/// Result of one parse pass.
#[derive(Debug, Clone, Default)]
pub struct LogParseResult {
    pub parsed_errors: Vec<ParsedLogError>,
    pub metadata: LogParseMetadata,
}

fn classify_severity(message: &str) -> Option<(&'static str, String)> {
    for (pattern, severity) in SEVERITY_PATTERNS.iter() {
        if let Some(m) = pattern.find(message) {
            return Some((severity, m.as_str().to_string()));
        }
    }
    None
}

/// Parse log entries for ERROR/FATAL/Exception patterns, keeping at most
/// `limit` findings. Messages are truncated, timestamps and line indices
/// preserved.
#[must_use]
pub fn parse_log_entries(entries: &[LogEntry], limit: usize) -> LogParseResult {
    let limit = if limit == 0 { DEFAULT_LIMIT } else { limit };
    let mut parsed: Vec<ParsedLogError> = Vec::new();
    let mut error_count = 0usize;
    let mut fatal_count = 0usize;
    let mut exception_count = 0usize;
    let mut unique: BTreeSet<String> = BTreeSet::new();

    for (idx, entry) in entries.iter().enumerate() {
        if parsed.len() >= limit {
            break;
        }
        let message = entry.message.as_str();
        if message.is_empty() {
            continue;
        }

        let Some((severity, pattern)) = classify_severity(message) else {
            continue;
        };

        let mut truncated: String = message.chars().take(MAX_MESSAGE_LENGTH).collect();
        if message.chars().count() > MAX_MESSAGE_LENGTH {
            truncated.push_str("... (truncated)");
        }

        match severity {
            "ERROR" => error_count += 1,
            "FATAL" => fatal_count += 1,
            "EXCEPTION" => exception_count += 1,
            _ => {}
        }
        unique.insert(pattern.clone());

        parsed.push(ParsedLogError {
            timestamp: entry.timestamp.clone(),
            severity: severity.to_string(),
            message: truncated,
            pattern_matched: pattern,
            line_number: idx,
        });
    }

    LogParseResult {
        metadata: LogParseMetadata {
            total_lines: entries.len(),
            error_count,
            fatal_count,
            exception_count,
            unique_patterns: unique.into_iter().collect(),
        },
        parsed_errors: parsed,
    }
}

/// Human-readable summary of parsed errors for reports.
#[must_use]
pub fn summarize_parsed_errors(parsed_errors: &[ParsedLogError], top_n: usize) -> String {
    if parsed_errors.is_empty() {
        return "No ERROR/FATAL/Exception patterns found in logs.".to_string();
    }

    let mut lines = vec![format!("Found {} error patterns:", parsed_errors.len())];

    for sev in ["FATAL", "EXCEPTION", "ERROR"] {
        let count = parsed_errors.iter().filter(|e| e.severity == sev).count();
        if count > 0 {
            lines.push(format!("- {count} {sev} patterns"));
        }
    }

    lines.push(format!("\nTop {} examples:", top_n.min(parsed_errors.len())));
    for err in parsed_errors.iter().take(top_n) {
        let ts = err
            .timestamp
            .as_deref()
            .map(|t| format!(" [{t}]"))
            .unwrap_or_default();
        let mut msg = err.message.clone();
        if msg.chars().count() > 150 {
            msg = msg.chars().take(150).collect::<String>() + "...";
        }
        lines.push(format!("- [{}]{} {}", err.severity, ts, msg));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(msg: &str) -> LogEntry {
        LogEntry { timestamp: None, message: msg.to_string() }
    }

    #[test]
    fn test_priority_fatal_over_error() {
        // A line carrying both FATAL and ERROR classifies as FATAL.
        let r = parse_log_entries(&[entry("FATAL error while starting")], 50);
        assert_eq!(r.parsed_errors[0].severity, "FATAL");
        assert_eq!(r.metadata.fatal_count, 1);
        assert_eq!(r.metadata.error_count, 0);
    }

    #[test]
    fn test_exception_classification() {
        let r = parse_log_entries(
            &[
                entry("Traceback (most recent call last):"),
                entry("panic: index out of range"),
                entry("plain line"),
                entry("ERROR db timeout"),
            ],
            50,
        );
        assert_eq!(r.parsed_errors.len(), 3);
        assert_eq!(r.metadata.exception_count, 2);
        assert_eq!(r.metadata.error_count, 1);
        assert_eq!(r.metadata.total_lines, 4);
    }

    #[test]
    fn test_limit_and_line_numbers() {
        let entries: Vec<LogEntry> = (0..100).map(|i| entry(&format!("ERROR {i}"))).collect();
        let r = parse_log_entries(&entries, 10);
        assert_eq!(r.parsed_errors.len(), 10);
        assert_eq!(r.parsed_errors[9].line_number, 9);
    }

    #[test]
    fn test_truncation() {
        let long = format!("ERROR {}", "x".repeat(600));
        let r = parse_log_entries(&[entry(&long)], 50);
        assert!(r.parsed_errors[0].message.ends_with("... (truncated)"));
    }

    #[test]
    fn test_unique_patterns_sorted() {
        let r = parse_log_entries(&[entry("error a"), entry("ERROR b"), entry("Error c")], 50);
        assert_eq!(r.metadata.unique_patterns, vec!["ERROR", "Error", "error"]);
    }

    #[test]
    fn test_summary_empty() {
        assert!(summarize_parsed_errors(&[], 5).contains("No ERROR"));
    }
}
