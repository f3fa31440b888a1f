//! Chat-loop behavior with a scripted LLM: duplicate tool suppression and
//! greeting fast paths.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tarka_agent::chat::run_chat;
use tarka_agent::tools::ToolContext;
use tarka_agent::ChatPolicy;
use tarka_core::ToolOutcome;
use tarka_llm::{
    GenerateOptions, LlmChunk, LlmClient, LlmError, LlmMessage, LlmProvider, LlmResponse,
    TokenUsage,
};
use tarka_providers::{
    aws::AwsClients, logs::LogsConfig, prom::PromConfig, K8sClient, LogsClient, PromClient,
    Providers,
};

/// LLM stub that replays canned JSON responses in order.
struct ScriptedProvider {
    responses: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<serde_json::Value>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().rev().map(|v| v.to_string()).collect()),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn default_model(&self) -> &str {
        "scripted-1"
    }

    async fn generate_text(
        &self,
        _model: &str,
        _messages: &[LlmMessage],
        _options: &GenerateOptions,
    ) -> Result<LlmResponse, LlmError> {
        let text = self
            .responses
            .lock()
            .expect("responses lock")
            .pop()
            .unwrap_or_else(|| json!({"schema_version": "tarka.tool_plan.v1", "reply": "done", "tool_calls": []}).to_string());
        Ok(LlmResponse {
            text,
            usage: TokenUsage::default(),
            model: "scripted-1".to_string(),
            provider: "scripted".to_string(),
        })
    }

    async fn stream_text(
        &self,
        _model: &str,
        _messages: &[LlmMessage],
        _options: &GenerateOptions,
    ) -> Result<BoxStream<'static, Result<LlmChunk, LlmError>>, LlmError> {
        Ok(futures::stream::iter(vec![Ok(LlmChunk {
            content: "streamed".to_string(),
            thinking: false,
        })])
        .boxed())
    }
}

async fn providers_with_logs(logs_url: &str) -> Providers {
    Providers {
        prom: Arc::new(PromClient::new(PromConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 1,
            ..PromConfig::default()
        })),
        k8s: Arc::new(K8sClient::new()),
        logs: Arc::new(LogsClient::new(LogsConfig {
            base_url: logs_url.to_string(),
            timeout_secs: 2,
            ..LogsConfig::default()
        })),
        aws: Arc::new(AwsClients::from_env().await),
        github: None,
        argocd: None,
    }
}

fn snapshot() -> serde_json::Value {
    json!({
        "target": {"name": "api-1", "pod": "api-1", "namespace": "prod"},
        "analysis": {
            "verdict": {"one_liner": "api-1 crashlooping", "classification": "actionable", "family": "crashloop"},
            "hypotheses": [{"title": "bad config", "confidence_0_100": 60}],
        },
        "alert": {"labels": {"alertname": "CrashLoopBackOff", "pod": "api-1", "namespace": "prod"}},
    })
}

#[tokio::test]
async fn test_duplicate_logs_tail_is_skipped_once() {
    // Two identical logs.tail calls across plan rounds -> one backend
    // call, one skipped_duplicate event, budget burned twice.
    let logs = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/select/logsql/query"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"_msg\":\"ERROR boom\"}\n"))
        .expect(1)
        .mount(&logs)
        .await;

    let providers = providers_with_logs(&logs.uri()).await;
    let plan = |_: ()| {
        json!({
            "schema_version": "tarka.tool_plan.v1",
            "reply": "checking logs",
            "tool_calls": [
                {"tool": "logs.tail", "args": {"pod": "api-1", "namespace": "prod"}},
                {"tool": "logs.tail", "args": {"pod": "api-1", "namespace": "prod"}}
            ]
        })
    };
    let scripted = ScriptedProvider::new(vec![
        plan(()),
        json!({"schema_version": "tarka.tool_plan.v1", "reply": "logs show ERROR boom", "tool_calls": []}),
    ]);
    let llm = LlmClient::new(Arc::new(scripted), None);

    let policy = ChatPolicy {
        enabled: true,
        ..ChatPolicy::default()
    };
    let aj = snapshot();
    let ctx = ToolContext {
        policy: &policy,
        action_policy: None,
        providers: &providers,
        pool: None,
        analysis_json: &aj,
        case_id: None,
        run_id: None,
        redact_infrastructure: false,
    };

    let result = run_chat(&ctx, &llm, "please pull the logs again", &[]).await;

    assert_eq!(result.reply, "logs show ERROR boom");
    assert_eq!(result.tool_events.len(), 2);
    assert_eq!(result.tool_events[0].outcome, Some(ToolOutcome::Ok));
    assert_eq!(
        result.tool_events[1].outcome,
        Some(ToolOutcome::SkippedDuplicate)
    );
    assert_eq!(result.tool_events[1].error.as_deref(), Some("skipped_duplicate"));
    // Tool executor dedupe invariant: no two non-skipped events share a key.
    let mut keys: Vec<&str> = result
        .tool_events
        .iter()
        .filter(|e| e.outcome != Some(ToolOutcome::SkippedDuplicate))
        .filter_map(|e| e.key.as_deref())
        .collect();
    let before = keys.len();
    keys.dedup();
    assert_eq!(before, keys.len());
}

#[tokio::test]
async fn test_greeting_fast_path_skips_llm_and_tools() {
    // A greeting never reaches the LLM and references the target.
    let providers = providers_with_logs("http://127.0.0.1:1").await;
    // Empty script: any LLM call would return the fallback "done" plan,
    // which would show up as a wrong reply below.
    let llm = LlmClient::new(Arc::new(ScriptedProvider::new(vec![])), None);
    let policy = ChatPolicy {
        enabled: true,
        ..ChatPolicy::default()
    };
    let aj = snapshot();
    let ctx = ToolContext {
        policy: &policy,
        action_policy: None,
        providers: &providers,
        pool: None,
        analysis_json: &aj,
        case_id: None,
        run_id: None,
        redact_infrastructure: false,
    };

    let result = run_chat(&ctx, &llm, "hello", &[]).await;
    assert!(result.reply.contains("api-1"));
    assert!(result.tool_events.is_empty());

    // Tool-not-allowed gate: a disabled policy refuses chat outright.
    let disabled = ChatPolicy::default();
    let ctx2 = ToolContext { policy: &disabled, ..ctx };
    let result = run_chat(&ctx2, &llm, "hello", &[]).await;
    assert!(result.reply.contains("disabled"));
}
