//! Provider trait and common request/response types.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    /// System message (sets context/behavior)
    System,
    /// User message (input)
    User,
    /// Assistant message (model response)
    Assistant,
}

/// A message in a conversation with a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: LlmRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: LlmRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: LlmRole::Assistant, content: content.into() }
    }
}

/// Token usage information from a response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A complete (non-streaming) model response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub usage: TokenUsage,
    pub model: String,
    pub provider: String,
}

/// One streamed chunk. `thinking` marks native reasoning segments which
/// the chat surface forwards as `thinking` events instead of tokens.
#[derive(Debug, Clone)]
pub struct LlmChunk {
    pub content: String,
    pub thinking: bool,
}

/// Options for text generation.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Temperature for sampling (0.0 to 1.0)
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Whether to request strict JSON output
    pub json_mode: bool,
    /// Enable native extended thinking (streaming only)
    pub enable_thinking: bool,
}

/// Stable-coded provider errors. `code()` is what reaches tool results and
/// SSE error events; never prose.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("missing_api_key")]
    MissingApiKey,
    #[error("provider_not_configured")]
    ProviderNotConfigured,
    #[error("model_not_found:{0}")]
    ModelNotFound(String),
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("permission_denied")]
    PermissionDenied,
    #[error("llm_http_error:{0}")]
    Http(String),
    #[error("llm_parse_error:{0}")]
    Parse(String),
}

impl LlmError {
    /// The stable error code string.
    #[must_use]
    pub fn code(&self) -> String {
        self.to_string()
    }
}

/// Trait all providers implement.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name, e.g. "anthropic".
    fn name(&self) -> &'static str;

    /// Whether the provider has credentials.
    fn is_configured(&self) -> bool;

    /// Default model id for this provider.
    fn default_model(&self) -> &str;

    /// Generate a complete response.
    async fn generate_text(
        &self,
        model: &str,
        messages: &[LlmMessage],
        options: &GenerateOptions,
    ) -> Result<LlmResponse, LlmError>;

    /// Stream a response chunk by chunk.
    async fn stream_text(
        &self,
        model: &str,
        messages: &[LlmMessage],
        options: &GenerateOptions,
    ) -> Result<BoxStream<'static, Result<LlmChunk, LlmError>>, LlmError>;
}

/// Extract a JSON object from a model response.
///
/// Handles leading prose, ```json fences (finding the LAST closing fence,
/// since the JSON may embed code examples), and bare `{...}` bodies found
/// by brace counting.
pub fn parse_llm_json(text: &str) -> Result<serde_json::Value, LlmError> {
    let text = text.trim();

    let json_text = if let Some(start) = text.find("```json") {
        let after = &text[start + "```json".len()..];
        if let Some(end) = after.rfind("\n```") {
            after[..end].trim()
        } else if let Some(end) = after.rfind("```") {
            after[..end].trim()
        } else {
            after.trim()
        }
    } else if let Some(start) = text.find("```\n{") {
        let after = &text[start + "```\n".len()..];
        if let Some(end) = after.rfind("\n```") {
            after[..end].trim()
        } else if let Some(end) = after.rfind("```") {
            after[..end].trim()
        } else {
            after.trim()
        }
    } else if let Some(first_brace) = text.find('{') {
        // Find the matching closing brace by counting nesting. Braces
        // inside string literals are rare enough in our schemas that the
        // serde parse below catches the mismatch.
        let body = &text[first_brace..];
        let mut depth = 0i32;
        let mut end = body.len();
        for (i, c) in body.char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = i + 1;
                        break;
                    }
                }
                _ => {}
            }
        }
        &body[..end]
    } else {
        text
    };

    serde_json::from_str(json_text)
        .map_err(|e| LlmError::Parse(format!("{e}").chars().take(120).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_json() {
        let v = parse_llm_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn test_parse_fenced_json() {
        let v = parse_llm_json("Here you go:\n```json\n{\"a\": 1}\n```\n").unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn test_parse_json_with_leading_prose() {
        let v = parse_llm_json("Sure! The result is {\"a\": {\"b\": 2}} as requested.").unwrap();
        assert_eq!(v["a"]["b"], 2);
    }

    #[test]
    fn test_parse_fence_with_embedded_fence() {
        let text = "```json\n{\"code\": \"```rust\\nfn x() {}\\n```\", \"ok\": true}\n```";
        let v = parse_llm_json(text).unwrap();
        assert_eq!(v["ok"], true);
    }

    #[test]
    fn test_parse_garbage_errors() {
        assert!(parse_llm_json("no json here at all").is_err());
    }
}
