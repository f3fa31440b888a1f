//! Uniform tool execution records shared by the RCA and chat runtimes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome bucket for one attempted tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    Ok,
    Empty,
    Unavailable,
    Error,
    SkippedDuplicate,
}

impl ToolOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Empty => "empty",
            Self::Unavailable => "unavailable",
            Self::Error => "error",
            Self::SkippedDuplicate => "skipped_duplicate",
        }
    }

    /// Outcomes that made no evidence progress; used by the RCA spin guard.
    #[must_use]
    pub fn is_unproductive(self) -> bool {
        !matches!(self, Self::Ok)
    }
}

/// Result of one tool execution through the executor.
///
/// `error` carries a stable code (`tool_not_allowed`, `db_unavailable`,
/// `tool_exception:<Kind>:<snippet>`, ...), never freeform prose.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolResult {
    pub ok: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    /// Set when the tool rebuilt the analysis snapshot (rerun).
    pub updated_analysis: Option<Value>,
}

impl ToolResult {
    #[must_use]
    pub fn ok(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
            updated_analysis: None,
        }
    }

    #[must_use]
    pub fn err(code: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(code.into()),
            updated_analysis: None,
        }
    }
}

/// One record per attempted tool call: what ran, what came back, and the
/// dedupe key used to suppress identical re-runs within an invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatToolEvent {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
    pub ok: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub outcome: Option<ToolOutcome>,
    pub summary: Option<String>,
    pub key: Option<String>,
}

impl ChatToolEvent {
    /// A `skipped_duplicate` event for a repeated `(tool, args)` pair.
    #[must_use]
    pub fn skipped_duplicate(tool: &str, args: Value, key: String) -> Self {
        Self {
            tool: tool.to_string(),
            args,
            ok: false,
            result: Some(serde_json::json!({"skipped": true})),
            error: Some("skipped_duplicate".to_string()),
            outcome: Some(ToolOutcome::SkippedDuplicate),
            summary: Some(format!("{tool}: skipped duplicate tool call")),
            key: Some(key),
        }
    }
}
