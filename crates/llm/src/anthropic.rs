//! Anthropic Messages API provider.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::provider::{
    GenerateOptions, LlmChunk, LlmError, LlmMessage, LlmProvider, LlmResponse, LlmRole, TokenUsage,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic provider over the Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Build from explicit credentials (tests point `base_url` at a mock).
    #[must_use]
    pub fn new(api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .expect("reqwest client"),
        }
    }

    /// Build from `ANTHROPIC_API_KEY` / `ANTHROPIC_BASE_URL`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("ANTHROPIC_API_KEY").ok().filter(|s| !s.is_empty()),
            std::env::var("ANTHROPIC_BASE_URL").ok().filter(|s| !s.is_empty()),
        )
    }

    fn api_key(&self) -> Result<&str, LlmError> {
        self.api_key.as_deref().ok_or(LlmError::MissingApiKey)
    }

    fn build_body(&self, model: &str, messages: &[LlmMessage], options: &GenerateOptions, stream: bool) -> Value {
        // Anthropic takes the system prompt as a top-level field.
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == LlmRole::System)
            .map(|m| m.content.as_str())
            .collect();
        let turns: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != LlmRole::System)
            .map(|m| {
                json!({
                    "role": match m.role { LlmRole::Assistant => "assistant", _ => "user" },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": model,
            "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": turns,
        });
        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }
        if let Some(t) = options.temperature {
            body["temperature"] = json!(t);
        }
        if stream {
            body["stream"] = json!(true);
        }
        if options.enable_thinking && stream {
            body["thinking"] = json!({"type": "enabled", "budget_tokens": 4096});
        }
        body
    }

    fn map_status(status: reqwest::StatusCode, body: &str, model: &str) -> LlmError {
        match status.as_u16() {
            401 => LlmError::Unauthenticated,
            403 => LlmError::PermissionDenied,
            404 => LlmError::ModelNotFound(model.to_string()),
            _ => LlmError::Http(format!("{}:{}", status.as_u16(), body.chars().take(120).collect::<String>())),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<UsageBlock>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageBlock {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn default_model(&self) -> &str {
        DEFAULT_MODEL
    }

    async fn generate_text(
        &self,
        model: &str,
        messages: &[LlmMessage],
        options: &GenerateOptions,
    ) -> Result<LlmResponse, LlmError> {
        let key = self.api_key()?.to_string();
        let body = self.build_body(model, messages, options, false);
        debug!(model, json_mode = options.json_mode, "anthropic generate");

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url.trim_end_matches('/')))
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &text, model));
        }

        let parsed: MessagesResponse = resp.json().await.map_err(|e| LlmError::Parse(e.to_string()))?;
        let text = parsed
            .content
            .iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        let usage = parsed.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        });

        Ok(LlmResponse {
            text,
            usage,
            model: parsed.model.unwrap_or_else(|| model.to_string()),
            provider: "anthropic".to_string(),
        })
    }

    async fn stream_text(
        &self,
        model: &str,
        messages: &[LlmMessage],
        options: &GenerateOptions,
    ) -> Result<BoxStream<'static, Result<LlmChunk, LlmError>>, LlmError> {
        let key = self.api_key()?.to_string();
        let body = self.build_body(model, messages, options, true);

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url.trim_end_matches('/')))
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &text, model));
        }

        // SSE framing: split the byte stream on newlines, keep `data:`
        // lines, decode content_block_delta events.
        let byte_stream = resp.bytes_stream();
        let stream = byte_stream
            .map(|chunk| chunk.map_err(|e| LlmError::Http(e.to_string())))
            .scan(String::new(), |buf, chunk| {
                let mut out: Vec<Result<LlmChunk, LlmError>> = Vec::new();
                match chunk {
                    Err(e) => out.push(Err(e)),
                    Ok(bytes) => {
                        buf.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(pos) = buf.find('\n') {
                            let line = buf[..pos].trim().to_string();
                            buf.drain(..=pos);
                            if let Some(data) = line.strip_prefix("data:") {
                                if let Some(c) = decode_stream_event(data.trim()) {
                                    out.push(Ok(c));
                                }
                            }
                        }
                    }
                }
                futures::future::ready(Some(futures::stream::iter(out)))
            })
            .flatten();

        Ok(stream.boxed())
    }
}

/// Decode one SSE `data:` payload into a chunk, if it carries text.
fn decode_stream_event(data: &str) -> Option<LlmChunk> {
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    let v: Value = serde_json::from_str(data).ok()?;
    if v.get("type")?.as_str()? != "content_block_delta" {
        return None;
    }
    let delta = v.get("delta")?;
    match delta.get("type")?.as_str()? {
        "text_delta" => Some(LlmChunk {
            content: delta.get("text")?.as_str()?.to_string(),
            thinking: false,
        }),
        "thinking_delta" => Some(LlmChunk {
            content: delta.get("thinking")?.as_str()?.to_string(),
            thinking: true,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_text_delta() {
        let c = decode_stream_event(
            r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"hi"}}"#,
        )
        .unwrap();
        assert_eq!(c.content, "hi");
        assert!(!c.thinking);
    }

    #[test]
    fn test_decode_thinking_delta() {
        let c = decode_stream_event(
            r#"{"type":"content_block_delta","delta":{"type":"thinking_delta","thinking":"hmm"}}"#,
        )
        .unwrap();
        assert!(c.thinking);
    }

    #[test]
    fn test_decode_ignores_other_events() {
        assert!(decode_stream_event(r#"{"type":"message_start"}"#).is_none());
        assert!(decode_stream_event("[DONE]").is_none());
        assert!(decode_stream_event("").is_none());
    }

    #[test]
    fn test_missing_key_is_stable_code() {
        let p = AnthropicProvider::new(None, None);
        assert!(!p.is_configured());
        assert_eq!(LlmError::MissingApiKey.code(), "missing_api_key");
    }

    #[tokio::test]
    async fn test_generate_against_mock() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "{\"ok\":true}"}],
                "usage": {"input_tokens": 10, "output_tokens": 5},
                "model": "claude-sonnet-4-20250514"
            })))
            .mount(&server)
            .await;

        let p = AnthropicProvider::new(Some("key".to_string()), Some(server.uri()));
        let resp = p
            .generate_text(
                "claude-sonnet-4-20250514",
                &[LlmMessage::user("hello")],
                &GenerateOptions { json_mode: true, ..Default::default() },
            )
            .await
            .unwrap();
        assert_eq!(resp.text, "{\"ok\":true}");
        assert_eq!(resp.usage.output_tokens, 5);
    }
}
