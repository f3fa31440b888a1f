//! SSE chat endpoints.
//!
//! Framing: `event: <type>\ndata: <json>\n\n` with `Cache-Control:
//! no-cache` and `X-Accel-Buffering: no`. The stream is channel-fed; a
//! cancelled client drops the receiver and the runtime stops emitting at
//! its next send. Persistence order per turn: user row, then assistant
//! row (seq under the thread row lock), then tool events keyed to the
//! assistant message.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::warn;

use tarka_agent::chat::global::run_global_chat_stream;
use tarka_agent::chat::run_chat_stream;
use tarka_agent::tools::ToolContext;
use tarka_core::model::chat::{ChatStreamEvent, ChatStreamEventType, ThreadKind};
use tarka_core::ChatMessage;
use tarka_store::{cases, chat as chat_store};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ThreadSendRequest {
    pub message: String,
}

fn to_sse_event(ev: &ChatStreamEvent) -> Event {
    let mut data = json!({"content": ev.content});
    if let Some(tool) = &ev.tool {
        data["tool"] = json!(tool);
    }
    if !ev.metadata.is_empty() {
        for (k, v) in &ev.metadata {
            data[k.as_str()] = v.clone();
        }
    }
    Event::default()
        .event(ev.event_type.as_str())
        .data(data.to_string())
}

fn sse_response(rx: mpsc::Receiver<ChatStreamEvent>) -> Response {
    let stream = ReceiverStream::new(rx).map(|ev| Ok::<_, Infallible>(to_sse_event(&ev)));
    let mut response = Sse::new(stream).keep_alive(KeepAlive::default()).into_response();
    let headers = response.headers_mut();
    headers.insert("Cache-Control", "no-cache".parse().expect("static header"));
    headers.insert("X-Accel-Buffering", "no".parse().expect("static header"));
    response
}

fn error_json(status: StatusCode, code: &str) -> Response {
    (status, Json(json!({"error": code}))).into_response()
}

/// `POST /api/v1/chat/threads/global`: get/create the user's global
/// thread and stream a turn.
pub async fn send_global(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ThreadSendRequest>,
) -> Response {
    let Some(user) = AppState::user_key_from_headers(&headers) else {
        return error_json(StatusCode::UNAUTHORIZED, "unauthenticated");
    };
    let Some(pool) = state.pool.clone() else {
        return error_json(StatusCode::SERVICE_UNAVAILABLE, "postgres_not_configured");
    };
    let thread = match chat_store::get_or_create_global_thread(&pool, &user).await {
        Ok(Ok(thread)) => thread,
        Ok(Err(code)) => return error_json(StatusCode::BAD_REQUEST, code),
        Err(_) => return error_json(StatusCode::SERVICE_UNAVAILABLE, "db_unavailable"),
    };
    stream_turn(state, user, thread.thread_id, None, req.message).await
}

/// `POST /api/v1/chat/threads/case/{cid}`: get/create the case thread and
/// stream a turn.
pub async fn send_case(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ThreadSendRequest>,
) -> Response {
    let Some(user) = AppState::user_key_from_headers(&headers) else {
        return error_json(StatusCode::UNAUTHORIZED, "unauthenticated");
    };
    let Some(pool) = state.pool.clone() else {
        return error_json(StatusCode::SERVICE_UNAVAILABLE, "postgres_not_configured");
    };
    let thread = match chat_store::get_or_create_case_thread(&pool, &user, &case_id).await {
        Ok(Ok(thread)) => thread,
        Ok(Err(code)) => return error_json(StatusCode::BAD_REQUEST, code),
        Err(_) => return error_json(StatusCode::SERVICE_UNAVAILABLE, "db_unavailable"),
    };
    stream_turn(state, user, thread.thread_id, Some(case_id), req.message).await
}

/// `POST /api/v1/chat/threads/{tid}/send`: stream a turn on an existing
/// thread (global or case, resolved from the row).
pub async fn send_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ThreadSendRequest>,
) -> Response {
    let Some(user) = AppState::user_key_from_headers(&headers) else {
        return error_json(StatusCode::UNAUTHORIZED, "unauthenticated");
    };
    let Some(pool) = state.pool.clone() else {
        return error_json(StatusCode::SERVICE_UNAVAILABLE, "postgres_not_configured");
    };
    let thread = match chat_store::get_thread(&pool, &user, &thread_id).await {
        Ok(Some(thread)) => thread,
        Ok(None) => return error_json(StatusCode::NOT_FOUND, "thread_id_required"),
        Err(_) => return error_json(StatusCode::SERVICE_UNAVAILABLE, "db_unavailable"),
    };
    let case_id = match thread.kind {
        ThreadKind::Case => thread.case_id.clone(),
        ThreadKind::Global => None,
    };
    stream_turn(state, user, thread.thread_id, case_id, req.message).await
}

/// Shared turn driver: persist the user message, spawn the runtime into a
/// channel, persist the assistant message + tool events on completion.
async fn stream_turn(
    state: AppState,
    user: String,
    thread_id: String,
    case_id: Option<String>,
    message: String,
) -> Response {
    if message.trim().is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "content_required");
    }
    let Some(pool) = state.pool.clone() else {
        return error_json(StatusCode::SERVICE_UNAVAILABLE, "postgres_not_configured");
    };

    // History before appending the new user row.
    let history: Vec<ChatMessage> = chat_store::list_messages(&pool, &user, &thread_id, 24, None)
        .await
        .unwrap_or_default()
        .into_iter()
        .filter_map(|m| {
            let role = match m.role.as_str() {
                "user" => tarka_core::ChatRole::User,
                "assistant" => tarka_core::ChatRole::Assistant,
                _ => return None,
            };
            Some(ChatMessage { role, content: m.content })
        })
        .collect();

    if let Ok(Err(code)) = chat_store::append_message(&pool, &user, &thread_id, "user", &message).await {
        return error_json(StatusCode::BAD_REQUEST, code);
    }

    // Case scope needs the latest snapshot; global runs with an empty one.
    let (snapshot, run_id) = if let Some(case_id) = &case_id {
        match cases::latest_snapshot_for_case(&pool, case_id).await {
            Ok(Some((run_id, snapshot))) => (snapshot, Some(run_id)),
            _ => return error_json(StatusCode::NOT_FOUND, "case_id_required"),
        }
    } else {
        (json!({}), None)
    };

    let (tx, rx) = mpsc::channel::<ChatStreamEvent>(64);
    let init =
        ChatStreamEvent::new(ChatStreamEventType::Init, "").with_meta("thread_id", json!(thread_id.clone()));
    let _ = tx.send(init).await;

    tokio::spawn(async move {
        let ctx = ToolContext {
            policy: &state.chat_policy,
            action_policy: Some(&state.action_policy),
            providers: &state.providers,
            pool: Some(&pool),
            analysis_json: &snapshot,
            case_id: case_id.as_deref(),
            run_id: run_id.as_deref(),
            redact_infrastructure: false,
        };

        let outcome = if case_id.is_some() {
            run_chat_stream(&ctx, &state.llm, &message, &history, tx).await
        } else {
            run_global_chat_stream(&ctx, &state.llm, &message, &history, tx)
                .await
                .map(|(reply, events)| (reply, events, None))
        };

        // Durable persistence only after a completed turn; a cancelled
        // stream keeps the user row (already committed) and nothing else.
        if let Some((reply, tool_events, _updated)) = outcome {
            if reply.trim().is_empty() {
                return;
            }
            match chat_store::append_message(&pool, &user, &thread_id, "assistant", &reply).await {
                Ok(Ok(msg)) => {
                    if let Err(e) = chat_store::insert_tool_events(
                        &pool,
                        &user,
                        &thread_id,
                        Some(&msg.message_id),
                        &tool_events,
                    )
                    .await
                    {
                        warn!(error = %e, "tool event persistence failed");
                    }
                }
                Ok(Err(code)) => warn!(code, "assistant message rejected"),
                Err(e) => warn!(error = %e, "assistant message persistence failed"),
            }
        }
    });

    sse_response(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_event_framing() {
        let ev = ChatStreamEvent::new(ChatStreamEventType::Token, "hi").with_tool("logs.tail");
        let sse = to_sse_event(&ev);
        // Event implements Debug; check the serialized frame contains our
        // fields via its data payload.
        let debug = format!("{sse:?}");
        assert!(debug.contains("token"));
    }
}
