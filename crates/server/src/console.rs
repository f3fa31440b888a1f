//! Console REST API (authenticated surface).
//!
//! Auth contract: the session layer in front of this service resolves the
//! user and passes `x-user-key`; handlers reject requests without it.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use tarka_agent::tools::ToolContext;
use tarka_core::model::case::ActionStatus;
use tarka_core::ChatMessage;
use tarka_store::{actions, cases, chat as chat_store, retrieval, skills};

use crate::state::AppState;

fn db_unavailable() -> axum::response::Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({"error": "postgres_not_configured"})),
    )
        .into_response()
}

fn require_user(headers: &HeaderMap) -> Result<String, axum::response::Response> {
    AppState::user_key_from_headers(headers).ok_or_else(|| {
        (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthenticated"}))).into_response()
    })
}

#[derive(Debug, Deserialize)]
pub struct CaseListParams {
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub classification: Option<String>,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_status() -> String {
    "open".to_string()
}

fn default_limit() -> i64 {
    50
}

impl CaseListParams {
    fn to_filter(&self) -> cases::CaseListFilter {
        cases::CaseListFilter {
            status: self.status.clone(),
            q: self.q.clone(),
            service: self.service.clone(),
            classification: self.classification.clone(),
            family: self.family.clone(),
            team: self.team.clone(),
            limit: self.limit,
            offset: self.offset,
        }
    }
}

/// `GET /api/v1/cases`
pub async fn list_cases(
    State(state): State<AppState>,
    Query(params): Query<CaseListParams>,
) -> impl IntoResponse {
    let Some(pool) = &state.pool else {
        return db_unavailable();
    };
    match cases::list_cases(pool, &params.to_filter()).await {
        Ok(value) => Json(value).into_response(),
        Err(e) => {
            error!(error = %e, "list cases failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "internal"}))).into_response()
        }
    }
}

/// `GET /api/v1/cases/facets`
pub async fn case_facets(
    State(state): State<AppState>,
    Query(params): Query<CaseListParams>,
) -> impl IntoResponse {
    let Some(pool) = &state.pool else {
        return db_unavailable();
    };
    match cases::case_facets(pool, &params.to_filter()).await {
        Ok(value) => Json(value).into_response(),
        Err(e) => {
            error!(error = %e, "case facets failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "internal"}))).into_response()
        }
    }
}

/// `GET /api/v1/cases/{id}`
pub async fn get_case(State(state): State<AppState>, Path(case_id): Path<String>) -> impl IntoResponse {
    let Some(pool) = &state.pool else {
        return db_unavailable();
    };
    match cases::get_case(pool, &case_id, 20).await {
        Ok(Some(value)) => Json(value).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({"error": "not_found"}))).into_response(),
        Err(e) => {
            error!(error = %e, "get case failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "internal"}))).into_response()
        }
    }
}

/// `GET /api/v1/cases/{id}/memory`: similar cases + matched skills.
pub async fn get_case_memory(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
) -> impl IntoResponse {
    let Some(pool) = &state.pool else {
        return Json(json!({"similar_cases": [], "skills": [], "enabled": false})).into_response();
    };
    if !state.settings.memory_enabled {
        return Json(json!({"similar_cases": [], "skills": [], "enabled": false})).into_response();
    }

    let Ok(Some((_, snapshot))) = cases::latest_snapshot_for_case(pool, &case_id).await else {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "not_found"}))).into_response();
    };

    // Rebuild the retrieval inputs from the SSOT snapshot.
    let raw = json!({
        "labels": snapshot.pointer("/alert/labels").cloned().unwrap_or(Value::Null),
        "fingerprint": snapshot.pointer("/alert/fingerprint").cloned().unwrap_or(Value::Null),
        "startsAt": snapshot.pointer("/alert/starts_at").cloned().unwrap_or(Value::Null),
    });
    let alert = tarka_core::model::alert::normalize_webhook_alert(&raw, None);
    let target = tarka_core::labels::extract_target(&alert, None);
    let mut inv = tarka_core::Investigation::new(alert, target, "1h", chrono::Utc::now());
    inv.analysis.features = snapshot
        .pointer("/analysis/features")
        .and_then(|v| serde_json::from_value(v.clone()).ok());

    let similar = retrieval::find_similar_runs(pool, &inv, 5)
        .await
        .map(|runs| runs.iter().map(retrieval::SimilarRun::to_value).collect::<Vec<_>>())
        .unwrap_or_default();
    let matched = skills::match_skills(pool, &inv, 5)
        .await
        .map(|ms| {
            ms.iter()
                .map(|m| json!({"skill_id": m.skill_id, "name": m.name, "advice": m.advice}))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    Json(json!({"similar_cases": similar, "skills": matched, "enabled": true})).into_response()
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub resolution_category: String,
    pub resolution_summary: String,
    #[serde(default)]
    pub postmortem_link: Option<String>,
}

/// `POST /api/v1/cases/{id}/resolve`
pub async fn resolve_case(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    Json(req): Json<ResolveRequest>,
) -> impl IntoResponse {
    let Some(pool) = &state.pool else {
        return db_unavailable();
    };
    match cases::resolve_case(
        pool,
        &case_id,
        &req.resolution_category,
        &req.resolution_summary,
        req.postmortem_link.as_deref(),
    )
    .await
    {
        Ok(Ok(())) => Json(json!({"ok": true, "status": "closed"})).into_response(),
        Ok(Err("not_found")) => {
            (StatusCode::NOT_FOUND, Json(json!({"error": "not_found"}))).into_response()
        }
        Ok(Err(code)) => (StatusCode::BAD_REQUEST, Json(json!({"error": code}))).into_response(),
        Err(e) => {
            error!(error = %e, "resolve failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "internal"}))).into_response()
        }
    }
}

/// `POST /api/v1/cases/{id}/reopen`
pub async fn reopen_case(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
) -> impl IntoResponse {
    let Some(pool) = &state.pool else {
        return db_unavailable();
    };
    match cases::reopen_case(pool, &case_id).await {
        Ok(Ok(())) => Json(json!({"ok": true, "status": "open"})).into_response(),
        Ok(Err("not_found")) => {
            (StatusCode::NOT_FOUND, Json(json!({"error": "not_found"}))).into_response()
        }
        Ok(Err(code)) => (StatusCode::BAD_REQUEST, Json(json!({"error": code}))).into_response(),
        Err(e) => {
            error!(error = %e, "reopen failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "internal"}))).into_response()
        }
    }
}

/// `GET /api/v1/investigation-runs/{run_id}`
pub async fn get_run(State(state): State<AppState>, Path(run_id): Path<String>) -> impl IntoResponse {
    let Some(pool) = &state.pool else {
        return db_unavailable();
    };
    match cases::get_investigation_run(pool, &run_id).await {
        Ok(Some(value)) => Json(value).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({"error": "not_found"}))).into_response(),
        Err(e) => {
            error!(error = %e, "get run failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "internal"}))).into_response()
        }
    }
}

// ---- actions ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ActionProposeRequest {
    pub action_type: String,
    pub title: String,
    #[serde(default)]
    pub risk: Option<String>,
    #[serde(default)]
    pub preconditions: Vec<String>,
    #[serde(default)]
    pub execution_payload: Value,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub hypothesis_id: Option<String>,
}

/// `GET /api/v1/cases/{id}/actions`
pub async fn list_actions(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
) -> impl IntoResponse {
    let Some(pool) = &state.pool else {
        return db_unavailable();
    };
    match actions::list_case_actions(pool, &case_id, 50).await {
        Ok(items) => Json(json!({"items": items})).into_response(),
        Err(e) => {
            error!(error = %e, "list actions failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "internal"}))).into_response()
        }
    }
}

/// `POST /api/v1/cases/{id}/actions/propose`
pub async fn propose_action(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ActionProposeRequest>,
) -> impl IntoResponse {
    let user = match require_user(&headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    if !state.action_policy.enabled {
        return (StatusCode::FORBIDDEN, Json(json!({"error": "actions_disabled"}))).into_response();
    }
    if !state.action_policy.action_type_allowed(&req.action_type) {
        return (StatusCode::FORBIDDEN, Json(json!({"error": "action_type_not_allowed"}))).into_response();
    }
    let Some(pool) = &state.pool else {
        return db_unavailable();
    };
    let proposal = actions::ActionProposal {
        case_id,
        run_id: req.run_id,
        hypothesis_id: req.hypothesis_id,
        action_type: req.action_type,
        title: req.title,
        risk: req.risk,
        preconditions: req.preconditions,
        execution_payload: req.execution_payload,
        proposed_by: user,
    };
    match actions::create_case_action(pool, &proposal, state.action_policy.max_actions_per_case).await {
        Ok(Ok(value)) => Json(value).into_response(),
        Ok(Err(code)) => (StatusCode::BAD_REQUEST, Json(json!({"error": code}))).into_response(),
        Err(e) => {
            error!(error = %e, "propose action failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "internal"}))).into_response()
        }
    }
}

/// `POST /api/v1/cases/{id}/actions/{action_id}/{transition}`
pub async fn transition_action(
    State(state): State<AppState>,
    Path((case_id, action_id, transition)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let user = match require_user(&headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    if !state.action_policy.enabled {
        return (StatusCode::FORBIDDEN, Json(json!({"error": "actions_disabled"}))).into_response();
    }
    let target = match transition.as_str() {
        "approve" => ActionStatus::Approved,
        "reject" => ActionStatus::Rejected,
        "execute" => {
            if !state.action_policy.allow_execute {
                return (StatusCode::FORBIDDEN, Json(json!({"error": "execute_not_allowed"}))).into_response();
            }
            ActionStatus::Executed
        }
        _ => return (StatusCode::NOT_FOUND, Json(json!({"error": "invalid_transition"}))).into_response(),
    };
    let Some(pool) = &state.pool else {
        return db_unavailable();
    };
    match actions::transition_case_action(pool, &case_id, &action_id, target, &user).await {
        Ok(Ok(value)) => Json(value).into_response(),
        Ok(Err(code)) => (StatusCode::BAD_REQUEST, Json(json!({"error": code}))).into_response(),
        Err(e) => {
            error!(error = %e, "action transition failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "internal"}))).into_response()
        }
    }
}

// ---- chat (blocking + config) ---------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CaseChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<Value>,
}

/// `POST /api/v1/cases/{id}/chat`: one blocking chat turn against the
/// case's latest snapshot.
pub async fn case_chat(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<CaseChatRequest>,
) -> impl IntoResponse {
    if require_user(&headers).is_err() {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthenticated"}))).into_response();
    }
    if req.message.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "content_required"}))).into_response();
    }
    let Some(pool) = &state.pool else {
        return db_unavailable();
    };
    let Ok(Some((run_id, snapshot))) = cases::latest_snapshot_for_case(pool, &case_id).await else {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "not_found"}))).into_response();
    };

    let history: Vec<ChatMessage> = req
        .history
        .iter()
        .filter_map(|m| serde_json::from_value(m.clone()).ok())
        .collect();

    let ctx = ToolContext {
        policy: &state.chat_policy,
        action_policy: Some(&state.action_policy),
        providers: &state.providers,
        pool: state.pool.as_ref(),
        analysis_json: &snapshot,
        case_id: Some(&case_id),
        run_id: Some(&run_id),
        redact_infrastructure: false,
    };
    let result = tarka_agent::chat::run_chat(&ctx, &state.llm, &req.message, &history).await;

    Json(json!({
        "reply": result.reply,
        "tool_events": result.tool_events,
        "updated_analysis": result.updated_analysis,
    }))
    .into_response()
}

/// `GET /api/v1/chat/config`
pub async fn chat_config(State(state): State<AppState>) -> Json<Value> {
    let p = &state.chat_policy;
    Json(json!({
        "enabled": p.enabled,
        "allow_promql": p.allow_promql,
        "allow_k8s_read": p.allow_k8s_read,
        "allow_k8s_events": p.allow_k8s_events,
        "allow_logs_query": p.allow_logs_query,
        "allow_argocd_read": p.allow_argocd_read,
        "allow_report_rerun": p.allow_report_rerun,
        "allow_memory_read": p.allow_memory_read,
        "allow_aws_read": p.allow_aws_read,
        "allow_github_read": p.allow_github_read,
        "max_steps": p.max_steps,
        "max_tool_calls": p.max_tool_calls,
        "max_log_lines": p.max_log_lines,
        "max_time_window_seconds": p.max_time_window_seconds,
    }))
}

/// `GET /api/v1/actions/config`
pub async fn actions_config(State(state): State<AppState>) -> Json<Value> {
    let p = &state.action_policy;
    Json(json!({
        "enabled": p.enabled,
        "require_approval": p.require_approval,
        "allow_execute": p.allow_execute,
        "action_type_allowlist": p.action_type_allowlist,
        "max_actions_per_case": p.max_actions_per_case,
    }))
}

/// `GET /api/v1/chat/threads`
pub async fn list_threads(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let user = match require_user(&headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    let Some(pool) = &state.pool else {
        return db_unavailable();
    };
    match chat_store::list_threads(pool, &user, 50).await {
        Ok(items) => Json(json!({"items": items})).into_response(),
        Err(e) => {
            error!(error = %e, "list threads failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "internal"}))).into_response()
        }
    }
}

/// `GET /api/v1/chat/threads/{tid}`
pub async fn get_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let user = match require_user(&headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    let Some(pool) = &state.pool else {
        return db_unavailable();
    };
    let Ok(Some(thread)) = chat_store::get_thread(pool, &user, &thread_id).await else {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "not_found"}))).into_response();
    };
    let messages = chat_store::list_messages(pool, &user, &thread_id, 50, None)
        .await
        .unwrap_or_default();
    Json(json!({"thread": thread, "messages": messages})).into_response()
}
