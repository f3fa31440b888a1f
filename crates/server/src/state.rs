//! Shared application state.

use std::sync::Arc;

use sqlx::PgPool;

use tarka_agent::{ActionPolicy, ChatPolicy};
use tarka_llm::LlmClient;
use tarka_providers::Providers;
use tarka_store::ObjectStorage;

use crate::config::Settings;
use crate::queue::QueueClient;

/// Everything the HTTP handlers and the worker share. Built once at
/// startup; optional pieces (Postgres, storage) degrade individual
/// features, never the whole process.
#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub providers: Providers,
    pub queue: QueueClient,
    pub storage: Option<ObjectStorage>,
    pub pool: Option<PgPool>,
    pub llm: LlmClient,
    pub chat_policy: Arc<ChatPolicy>,
    pub action_policy: Arc<ActionPolicy>,
}

impl AppState {
    /// Resolve the user key from the session layer's header. The OIDC /
    /// local-login surface that mints it is outside the core.
    #[must_use]
    pub fn user_key_from_headers(headers: &axum::http::HeaderMap) -> Option<String> {
        headers
            .get("x-user-key")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
    }
}
