//! Router assembly.

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::console;
use crate::sse;
use crate::state::AppState;
use crate::webhook;

/// Build the full HTTP surface: public webhook + health, authenticated
/// console API.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Public
        .route("/alerts", post(webhook::alerts_handler))
        .route("/healthz", get(webhook::healthz))
        // Cases
        .route("/api/v1/cases", get(console::list_cases))
        .route("/api/v1/cases/facets", get(console::case_facets))
        .route("/api/v1/cases/{id}", get(console::get_case))
        .route("/api/v1/cases/{id}/memory", get(console::get_case_memory))
        .route("/api/v1/cases/{id}/resolve", post(console::resolve_case))
        .route("/api/v1/cases/{id}/reopen", post(console::reopen_case))
        // Actions
        .route("/api/v1/cases/{id}/actions", get(console::list_actions))
        .route("/api/v1/cases/{id}/actions/propose", post(console::propose_action))
        .route(
            "/api/v1/cases/{id}/actions/{action_id}/{transition}",
            post(console::transition_action),
        )
        // Runs
        .route("/api/v1/investigation-runs/{run_id}", get(console::get_run))
        // Chat
        .route("/api/v1/cases/{id}/chat", post(console::case_chat))
        .route("/api/v1/chat/config", get(console::chat_config))
        .route("/api/v1/actions/config", get(console::actions_config))
        .route("/api/v1/chat/threads", get(console::list_threads))
        .route("/api/v1/chat/threads/{tid}", get(console::get_thread))
        .route("/api/v1/chat/threads/{tid}/send", post(sse::send_thread))
        .route("/api/v1/chat/threads/global", post(sse::send_global))
        .route("/api/v1/chat/threads/case/{cid}", post(sse::send_case))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
