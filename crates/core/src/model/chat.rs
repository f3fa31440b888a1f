//! Chat thread, message and stream-event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    Tool,
}

impl ChatRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Chat thread scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadKind {
    Global,
    Case,
}

/// A persisted chat thread.
///
/// Unique per user: one `global` thread; at most one `case` thread per
/// `(user_key, case_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatThread {
    pub thread_id: String,
    pub user_key: String,
    pub kind: ThreadKind,
    pub case_id: Option<String>,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// A stored message row with its per-thread sequence number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChatMessage {
    pub message_id: String,
    pub seq: i64,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Stream event type for the SSE chat surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatStreamEventType {
    Init,
    Thinking,
    Planning,
    ToolStart,
    ToolEnd,
    Token,
    Done,
    Error,
}

impl ChatStreamEventType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Thinking => "thinking",
            Self::Planning => "planning",
            Self::ToolStart => "tool_start",
            Self::ToolEnd => "tool_end",
            Self::Token => "token",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

/// Single event in a chat stream. The stream is a lazy, finite sequence;
/// it is not restartable and consumers own termination on cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatStreamEvent {
    pub event_type: ChatStreamEventType,
    #[serde(default)]
    pub content: String,
    pub tool: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ChatStreamEvent {
    #[must_use]
    pub fn new(event_type: ChatStreamEventType, content: impl Into<String>) -> Self {
        Self {
            event_type,
            content: content.into(),
            tool: None,
            metadata: Map::new(),
        }
    }

    #[must_use]
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    #[must_use]
    pub fn with_meta(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}
