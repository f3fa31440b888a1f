//! Alertmanager webhook receiver: enqueue-only, fast-ack.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{error, info};

use tarka_core::model::alert::normalize_webhook_alert;
use tarka_core::AlertState;

use crate::identity::derive_identity;
use crate::queue::AlertJob;
use crate::state::AppState;

/// 202 response envelope.
#[derive(Debug, Default, Serialize)]
pub struct EnqueueResponse {
    pub ok: bool,
    pub mode: &'static str,
    pub received: usize,
    pub enqueued: usize,
    pub skipped_resolved: usize,
    pub skipped_allowlist: usize,
    pub skipped_duplicate: usize,
    pub errors: usize,
}

/// `POST /alerts`: validate shape, then per alert normalize → firing
/// filter → allowlist → identity msg-id → in-payload dedupe → enqueue.
pub async fn alerts_handler(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let Some(payload_obj) = payload.as_object() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Invalid JSON payload"})),
        )
            .into_response();
    };
    let Some(alerts) = payload_obj.get("alerts").and_then(Value::as_array) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Payload field 'alerts' must be a list"})),
        )
            .into_response();
    };

    let parent_status = payload_obj
        .get("status")
        .and_then(Value::as_str)
        .map(ToString::to_string);
    info!(count = alerts.len(), "processing webhook alerts");

    let mut response = EnqueueResponse {
        ok: true,
        mode: "enqueue",
        received: alerts.len(),
        ..EnqueueResponse::default()
    };
    let mut seen_ids: HashSet<String> = HashSet::new();
    let now = Utc::now();
    let env_cluster = state.settings.cluster_name.clone();

    for raw in alerts {
        let alert = normalize_webhook_alert(raw, parent_status.as_deref());
        let alertname = alert.name().to_string();

        if alert.state != AlertState::Firing {
            response.skipped_resolved += 1;
            continue;
        }
        if !state.settings.allowlist_permits(&alertname) {
            response.skipped_allowlist += 1;
            continue;
        }

        let identity =
            match derive_identity(&state.providers.k8s, &alert, env_cluster.as_deref(), now).await {
                Ok(identity) => identity,
                Err(e) => {
                    error!(alertname, error = %e, "identity derivation failed");
                    response.errors += 1;
                    continue;
                }
            };

        // Payload-level dedupe; the queue's Nats-Msg-Id window is the
        // authoritative layer behind it.
        if !seen_ids.insert(identity.msg_id.clone()) {
            response.skipped_duplicate += 1;
            continue;
        }

        let job = AlertJob {
            alert: raw.clone(),
            time_window: state.settings.time_window.clone(),
            parent_status: parent_status.clone(),
        };
        match state.queue.enqueue(&job, &identity.msg_id).await {
            Ok(()) => response.enqueued += 1,
            Err(e) => {
                error!(alertname, error = %e, "enqueue failed");
                response.errors += 1;
            }
        }
    }

    (StatusCode::ACCEPTED, Json(serde_json::to_value(&response).unwrap_or_default())).into_response()
}

/// `GET /healthz`.
pub async fn healthz() -> Json<Value> {
    Json(serde_json::json!({"ok": true}))
}
