//! Provider registry and the structured-generation client.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::warn;

use crate::anthropic::AnthropicProvider;
use crate::openai::OpenAiProvider;
use crate::provider::{
    parse_llm_json, GenerateOptions, LlmChunk, LlmError, LlmMessage, LlmProvider,
};
use crate::schemas::Clamped;

/// Select a provider from `LLM_PROVIDER` (default: anthropic).
#[must_use]
pub fn provider_from_env() -> Arc<dyn LlmProvider> {
    let name = std::env::var("LLM_PROVIDER").unwrap_or_default();
    match name.trim().to_ascii_lowercase().as_str() {
        "openai" => Arc::new(OpenAiProvider::from_env()),
        "anthropic" | "" => Arc::new(AnthropicProvider::from_env()),
        other => {
            warn!(provider = other, "unknown LLM_PROVIDER, falling back to anthropic");
            Arc::new(AnthropicProvider::from_env())
        }
    }
}

/// Provider + model pairing used by the graphs.
#[derive(Clone)]
pub struct LlmClient {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl LlmClient {
    #[must_use]
    pub fn new(provider: Arc<dyn LlmProvider>, model: Option<String>) -> Self {
        let model = model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| provider.default_model().to_string());
        Self { provider, model }
    }

    /// Build from env (`LLM_PROVIDER`, `LLM_MODEL`).
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(provider_from_env(), std::env::var("LLM_MODEL").ok())
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.provider.is_configured()
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// One structured-JSON call: prompt in, clamped schema value out.
    ///
    /// Errors are stable codes suitable for tool results and SSE events.
    pub async fn generate_json<T>(&self, prompt: &str) -> Result<T, String>
    where
        T: DeserializeOwned + Clamped,
    {
        if !self.provider.is_configured() {
            return Err(LlmError::MissingApiKey.code());
        }
        let messages = [LlmMessage::user(prompt)];
        let options = GenerateOptions {
            temperature: Some(0.2),
            max_tokens: Some(2000),
            json_mode: true,
            enable_thinking: false,
        };
        let resp = self
            .provider
            .generate_text(&self.model, &messages, &options)
            .await
            .map_err(|e| e.code())?;
        let value = parse_llm_json(&resp.text).map_err(|e| e.code())?;
        let parsed: T = serde_json::from_value(value)
            .map_err(|e| LlmError::Parse(e.to_string()).code())?;
        Ok(parsed.clamped())
    }

    /// Stream a free-text response.
    pub async fn stream_text(
        &self,
        prompt: &str,
        enable_thinking: bool,
    ) -> Result<futures::stream::BoxStream<'static, Result<LlmChunk, LlmError>>, String> {
        if !self.provider.is_configured() {
            return Err(LlmError::MissingApiKey.code());
        }
        let messages = [LlmMessage::user(prompt)];
        let options = GenerateOptions {
            temperature: Some(0.6),
            max_tokens: Some(1200),
            json_mode: false,
            enable_thinking,
        };
        self.provider
            .stream_text(&self.model, &messages, &options)
            .await
            .map_err(|e| e.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::ToolPlanResponse;

    #[tokio::test]
    async fn test_unconfigured_client_yields_stable_code() {
        let client = LlmClient::new(Arc::new(AnthropicProvider::new(None, None)), None);
        let err = client.generate_json::<ToolPlanResponse>("hi").await.unwrap_err();
        assert_eq!(err, "missing_api_key");
    }
}
