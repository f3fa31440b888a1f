//! Action proposal lifecycle.
//!
//! The core never executes actions; `executed` is a recorded transition
//! behind an approval workflow and the action policy.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use sqlx::{PgPool, Row};

use tarka_core::model::case::ActionStatus;

/// Input for a new proposal.
#[derive(Debug, Clone)]
pub struct ActionProposal {
    pub case_id: String,
    pub run_id: Option<String>,
    pub hypothesis_id: Option<String>,
    pub action_type: String,
    pub title: String,
    pub risk: Option<String>,
    pub preconditions: Vec<String>,
    pub execution_payload: Value,
    pub proposed_by: String,
}

fn parse_status(s: &str) -> Option<ActionStatus> {
    match s {
        "proposed" => Some(ActionStatus::Proposed),
        "approved" => Some(ActionStatus::Approved),
        "rejected" => Some(ActionStatus::Rejected),
        "executed" => Some(ActionStatus::Executed),
        _ => None,
    }
}

/// Create a proposal; enforces the per-case cap.
pub async fn create_case_action(
    pool: &PgPool,
    proposal: &ActionProposal,
    max_actions_per_case: i64,
) -> Result<Result<Value, &'static str>> {
    if proposal.action_type.trim().is_empty() {
        return Ok(Err("action_type_required"));
    }
    if proposal.title.trim().is_empty() {
        return Ok(Err("title_required"));
    }

    let count_row = sqlx::query("SELECT COUNT(*) AS n FROM case_actions WHERE case_id::text = $1")
        .bind(&proposal.case_id)
        .fetch_one(pool)
        .await
        .context("count case actions")?;
    let n: i64 = count_row.try_get("n").unwrap_or(0);
    if n >= max_actions_per_case {
        return Ok(Err("max_actions_per_case_reached"));
    }

    let row = sqlx::query(
        "INSERT INTO case_actions (
            case_id, run_id, hypothesis_id, action_type, title, risk,
            preconditions, execution_payload, status, proposed_by
         ) VALUES ($1::uuid, $2::uuid, $3, $4, $5, $6, $7, $8, 'proposed', $9)
         RETURNING action_id::text, created_at::text",
    )
    .bind(&proposal.case_id)
    .bind(&proposal.run_id)
    .bind(&proposal.hypothesis_id)
    .bind(proposal.action_type.trim().to_ascii_lowercase())
    .bind(proposal.title.trim())
    .bind(&proposal.risk)
    .bind(&proposal.preconditions)
    .bind(&proposal.execution_payload)
    .bind(&proposal.proposed_by)
    .fetch_one(pool)
    .await
    .context("insert case action")?;

    let action_id: String = row.try_get(0)?;
    let created_at: String = row.try_get(1)?;
    Ok(Ok(json!({
        "action_id": action_id,
        "case_id": proposal.case_id,
        "status": "proposed",
        "created_at": created_at,
    })))
}

/// List actions for a case, newest first.
pub async fn list_case_actions(pool: &PgPool, case_id: &str, limit: i64) -> Result<Vec<Value>> {
    let rows = sqlx::query(
        "SELECT action_id::text AS action_id, case_id::text AS case_id,
                run_id::text AS run_id, hypothesis_id, action_type, title, risk,
                preconditions, execution_payload, status, proposed_by,
                created_at::text AS created_at, approved_at::text AS approved_at,
                approved_by, executed_at::text AS executed_at, executed_by
         FROM case_actions
         WHERE case_id::text = $1
         ORDER BY created_at DESC
         LIMIT $2",
    )
    .bind(case_id)
    .bind(limit.clamp(1, 500))
    .fetch_all(pool)
    .await
    .context("list case actions")?;

    Ok(rows
        .iter()
        .map(|r| {
            let g = |name: &str| -> Option<String> { r.try_get::<Option<String>, _>(name).ok().flatten() };
            let preconditions: Option<Vec<String>> = r.try_get("preconditions").ok();
            let payload: Value = r.try_get("execution_payload").unwrap_or(Value::Null);
            json!({
                "action_id": g("action_id"),
                "case_id": g("case_id"),
                "run_id": g("run_id"),
                "hypothesis_id": g("hypothesis_id"),
                "action_type": g("action_type"),
                "title": g("title"),
                "risk": g("risk"),
                "preconditions": preconditions.unwrap_or_default(),
                "execution_payload": payload,
                "status": g("status"),
                "proposed_by": g("proposed_by"),
                "created_at": g("created_at"),
                "approved_at": g("approved_at"),
                "approved_by": g("approved_by"),
                "executed_at": g("executed_at"),
                "executed_by": g("executed_by"),
            })
        })
        .collect())
}

/// Transition an action. Invalid source/target pairs come back as a
/// stable code, not a DB error.
pub async fn transition_case_action(
    pool: &PgPool,
    case_id: &str,
    action_id: &str,
    target: ActionStatus,
    actor: &str,
) -> Result<Result<Value, String>> {
    let mut tx = pool.begin().await.context("begin action transition")?;

    let row = sqlx::query(
        "SELECT status FROM case_actions
         WHERE action_id::text = $1 AND case_id::text = $2 FOR UPDATE",
    )
    .bind(action_id)
    .bind(case_id)
    .fetch_optional(&mut *tx)
    .await
    .context("lock action")?;

    let Some(row) = row else {
        return Ok(Err("not_found".to_string()));
    };
    let current_s: String = row.try_get("status")?;
    let Some(current) = parse_status(&current_s) else {
        return Ok(Err("invalid_status".to_string()));
    };
    if !current.can_transition_to(target) {
        return Ok(Err(format!("invalid_transition:{current_s}->{}", target.as_str())));
    }

    let query = match target {
        ActionStatus::Approved => {
            "UPDATE case_actions SET status = 'approved', approved_at = now(), approved_by = $3
             WHERE action_id::text = $1 AND case_id::text = $2"
        }
        ActionStatus::Rejected => {
            "UPDATE case_actions SET status = 'rejected', approved_by = $3
             WHERE action_id::text = $1 AND case_id::text = $2"
        }
        ActionStatus::Executed => {
            "UPDATE case_actions SET status = 'executed', executed_at = now(), executed_by = $3
             WHERE action_id::text = $1 AND case_id::text = $2"
        }
        ActionStatus::Proposed => return Ok(Err("invalid_status".to_string())),
    };
    sqlx::query(query)
        .bind(action_id)
        .bind(case_id)
        .bind(actor)
        .execute(&mut *tx)
        .await
        .context("apply action transition")?;

    tx.commit().await.context("commit action transition")?;
    Ok(Ok(json!({
        "action_id": action_id,
        "status": target.as_str(),
    })))
}
