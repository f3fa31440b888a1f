//! OpenAI Chat Completions provider.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::provider::{
    GenerateOptions, LlmChunk, LlmError, LlmMessage, LlmProvider, LlmResponse, LlmRole, TokenUsage,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// OpenAI provider over the Chat Completions API.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
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

    #[must_use]
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("OPENAI_API_KEY").ok().filter(|s| !s.is_empty()),
            std::env::var("OPENAI_BASE_URL").ok().filter(|s| !s.is_empty()),
        )
    }

    fn build_body(model: &str, messages: &[LlmMessage], options: &GenerateOptions, stream: bool) -> Value {
        let msgs: Vec<Value> = messages
            .iter()
            .map(|m| {
                json!({
                    "role": match m.role {
                        LlmRole::System => "system",
                        LlmRole::User => "user",
                        LlmRole::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect();
        let mut body = json!({"model": model, "messages": msgs});
        if let Some(t) = options.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(mt) = options.max_tokens {
            body["max_tokens"] = json!(mt);
        }
        if options.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }
        if stream {
            body["stream"] = json!(true);
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
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
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
        let key = self.api_key.as_deref().ok_or(LlmError::MissingApiKey)?.to_string();
        let body = Self::build_body(model, messages, options, false);

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/')))
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &text, model));
        }

        let parsed: ChatResponse = resp.json().await.map_err(|e| LlmError::Parse(e.to_string()))?;
        let text = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        let usage = parsed.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        });

        Ok(LlmResponse {
            text,
            usage,
            model: parsed.model.unwrap_or_else(|| model.to_string()),
            provider: "openai".to_string(),
        })
    }

    async fn stream_text(
        &self,
        model: &str,
        messages: &[LlmMessage],
        options: &GenerateOptions,
    ) -> Result<BoxStream<'static, Result<LlmChunk, LlmError>>, LlmError> {
        let key = self.api_key.as_deref().ok_or(LlmError::MissingApiKey)?.to_string();
        let body = Self::build_body(model, messages, options, true);

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/')))
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &text, model));
        }

        let stream = resp
            .bytes_stream()
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
                                if let Some(c) = decode_stream_line(data.trim()) {
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

fn decode_stream_line(data: &str) -> Option<LlmChunk> {
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    let v: Value = serde_json::from_str(data).ok()?;
    let content = v
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()?
        .to_string();
    if content.is_empty() {
        return None;
    }
    Some(LlmChunk { content, thinking: false })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_stream_line() {
        let c = decode_stream_line(r#"{"choices":[{"delta":{"content":"hey"}}]}"#).unwrap();
        assert_eq!(c.content, "hey");
        assert!(decode_stream_line("[DONE]").is_none());
    }
}
