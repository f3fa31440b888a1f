//! Chat thread/message persistence.
//!
//! Seq assignment happens under `SELECT ... FOR UPDATE` on the thread row,
//! so per-thread sequences are strictly increasing and contiguous.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{PgPool, Row};

use tarka_core::model::chat::{ChatThread, StoredChatMessage, ThreadKind};
use tarka_core::ChatToolEvent;

fn row_to_thread(row: &sqlx::postgres::PgRow) -> Result<ChatThread> {
    let kind_s: String = row.try_get("kind")?;
    Ok(ChatThread {
        thread_id: row.try_get("thread_id")?,
        user_key: row.try_get("user_key")?,
        kind: if kind_s == "case" { ThreadKind::Case } else { ThreadKind::Global },
        case_id: row.try_get("case_id")?,
        title: row.try_get("title")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        last_message_at: row.try_get("last_message_at")?,
    })
}

const THREAD_COLUMNS: &str = "thread_id::text AS thread_id, user_key, kind, case_id::text AS case_id,
     title, created_at, updated_at, last_message_at";

/// One global thread per user; upsert keeps the unique constraint honest.
pub async fn get_or_create_global_thread(pool: &PgPool, user_key: &str) -> Result<Result<ChatThread, &'static str>> {
    let uk = user_key.trim().to_ascii_lowercase();
    if uk.is_empty() {
        return Ok(Err("user_key_required"));
    }
    let row = sqlx::query(&format!(
        "INSERT INTO chat_threads (user_key, kind) VALUES ($1, 'global')
         ON CONFLICT (user_key) WHERE kind = 'global'
         DO UPDATE SET updated_at = now()
         RETURNING {THREAD_COLUMNS}"
    ))
    .bind(&uk)
    .fetch_one(pool)
    .await
    .context("get/create global thread")?;
    Ok(Ok(row_to_thread(&row)?))
}

/// At most one case thread per `(user_key, case_id)`.
pub async fn get_or_create_case_thread(
    pool: &PgPool,
    user_key: &str,
    case_id: &str,
) -> Result<Result<ChatThread, &'static str>> {
    let uk = user_key.trim().to_ascii_lowercase();
    if uk.is_empty() {
        return Ok(Err("user_key_required"));
    }
    if case_id.trim().is_empty() {
        return Ok(Err("case_id_required"));
    }
    let row = sqlx::query(&format!(
        "INSERT INTO chat_threads (user_key, kind, case_id) VALUES ($1, 'case', $2::uuid)
         ON CONFLICT (user_key, case_id) WHERE kind = 'case'
         DO UPDATE SET updated_at = now()
         RETURNING {THREAD_COLUMNS}"
    ))
    .bind(&uk)
    .bind(case_id.trim())
    .fetch_one(pool)
    .await
    .context("get/create case thread")?;
    Ok(Ok(row_to_thread(&row)?))
}

/// Fetch a thread scoped to its owner.
pub async fn get_thread(pool: &PgPool, user_key: &str, thread_id: &str) -> Result<Option<ChatThread>> {
    let uk = user_key.trim().to_ascii_lowercase();
    let row = sqlx::query(&format!(
        "SELECT {THREAD_COLUMNS} FROM chat_threads
         WHERE thread_id::text = $1 AND user_key = $2"
    ))
    .bind(thread_id.trim())
    .bind(&uk)
    .fetch_optional(pool)
    .await
    .context("get thread")?;
    row.map(|r| row_to_thread(&r)).transpose()
}

/// Recent messages, ascending by seq for UI rendering.
pub async fn list_messages(
    pool: &PgPool,
    user_key: &str,
    thread_id: &str,
    limit: i64,
    before_seq: Option<i64>,
) -> Result<Vec<StoredChatMessage>> {
    let uk = user_key.trim().to_ascii_lowercase();
    let rows = sqlx::query(
        "SELECT m.message_id::text AS message_id, m.seq, m.role, m.content, m.created_at
         FROM chat_messages m
         INNER JOIN chat_threads t ON t.thread_id = m.thread_id
         WHERE t.user_key = $1 AND t.thread_id::text = $2
           AND ($3::bigint IS NULL OR m.seq < $3::bigint)
         ORDER BY m.seq DESC
         LIMIT $4",
    )
    .bind(&uk)
    .bind(thread_id.trim())
    .bind(before_seq)
    .bind(limit.clamp(1, 200))
    .fetch_all(pool)
    .await
    .context("list messages")?;

    let mut out: Vec<StoredChatMessage> = rows
        .iter()
        .map(|r| {
            Ok(StoredChatMessage {
                message_id: r.try_get("message_id")?,
                seq: i64::from(r.try_get::<i32, _>("seq")?),
                role: r.try_get("role")?,
                content: r.try_get("content")?,
                created_at: r.try_get("created_at")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    out.reverse();
    Ok(out)
}

/// Append a message. The thread row lock serializes seq assignment.
pub async fn append_message(
    pool: &PgPool,
    user_key: &str,
    thread_id: &str,
    role: &str,
    content: &str,
) -> Result<Result<StoredChatMessage, &'static str>> {
    let uk = user_key.trim().to_ascii_lowercase();
    let rl = role.trim().to_ascii_lowercase();
    if uk.is_empty() {
        return Ok(Err("user_key_required"));
    }
    if thread_id.trim().is_empty() {
        return Ok(Err("thread_id_required"));
    }
    if rl != "user" && rl != "assistant" {
        return Ok(Err("invalid_role"));
    }
    if content.trim().is_empty() {
        return Ok(Err("content_required"));
    }

    let mut tx = pool.begin().await.context("begin append")?;

    let locked = sqlx::query(
        "SELECT thread_id::text FROM chat_threads
         WHERE thread_id::text = $1 AND user_key = $2 FOR UPDATE",
    )
    .bind(thread_id.trim())
    .bind(&uk)
    .fetch_optional(&mut *tx)
    .await
    .context("lock thread")?;
    if locked.is_none() {
        return Ok(Err("not_found"));
    }

    let seq_row = sqlx::query("SELECT COALESCE(MAX(seq), 0) AS max_seq FROM chat_messages WHERE thread_id::text = $1")
        .bind(thread_id.trim())
        .fetch_one(&mut *tx)
        .await?;
    let next_seq: i32 = seq_row.try_get::<i32, _>("max_seq").unwrap_or(0) + 1;

    let row = sqlx::query(
        "INSERT INTO chat_messages (thread_id, seq, role, content)
         VALUES ($1::uuid, $2, $3, $4)
         RETURNING message_id::text AS message_id, seq, role, content, created_at",
    )
    .bind(thread_id.trim())
    .bind(next_seq)
    .bind(&rl)
    .bind(content)
    .fetch_one(&mut *tx)
    .await
    .context("insert message")?;

    sqlx::query("UPDATE chat_threads SET updated_at = now(), last_message_at = now() WHERE thread_id::text = $1")
        .bind(thread_id.trim())
        .execute(&mut *tx)
        .await?;

    tx.commit().await.context("commit append")?;

    Ok(Ok(StoredChatMessage {
        message_id: row.try_get("message_id")?,
        seq: i64::from(row.try_get::<i32, _>("seq")?),
        role: row.try_get("role")?,
        content: row.try_get("content")?,
        created_at: row.try_get("created_at")?,
    }))
}

/// Persist tool events keyed to the assistant message, capped at 50.
pub async fn insert_tool_events(
    pool: &PgPool,
    user_key: &str,
    thread_id: &str,
    message_id: Option<&str>,
    tool_events: &[ChatToolEvent],
) -> Result<Result<(), &'static str>> {
    let uk = user_key.trim().to_ascii_lowercase();
    if tool_events.is_empty() {
        return Ok(Ok(()));
    }

    let mut tx = pool.begin().await.context("begin tool events")?;
    let owned = sqlx::query("SELECT 1 FROM chat_threads WHERE thread_id::text = $1 AND user_key = $2")
        .bind(thread_id.trim())
        .bind(&uk)
        .fetch_optional(&mut *tx)
        .await?;
    if owned.is_none() {
        return Ok(Err("not_found"));
    }

    for ev in tool_events.iter().take(50) {
        if ev.tool.trim().is_empty() {
            continue;
        }
        sqlx::query(
            "INSERT INTO chat_tool_events (thread_id, message_id, tool, args, ok, result, error)
             VALUES ($1::uuid, $2::uuid, $3, $4, $5, $6, $7)",
        )
        .bind(thread_id.trim())
        .bind(message_id)
        .bind(&ev.tool)
        .bind(&ev.args)
        .bind(ev.ok)
        .bind(&ev.result)
        .bind(&ev.error)
        .execute(&mut *tx)
        .await
        .context("insert tool event")?;
    }
    tx.commit().await.context("commit tool events")?;
    Ok(Ok(()))
}

/// Thread previews for the console sidebar.
pub async fn list_threads(pool: &PgPool, user_key: &str, limit: i64) -> Result<Vec<Value>> {
    let uk = user_key.trim().to_ascii_lowercase();
    let rows = sqlx::query(
        "SELECT t.thread_id::text AS thread_id, t.kind, t.case_id::text AS case_id, t.title,
                t.created_at::text AS created_at, t.updated_at::text AS updated_at,
                t.last_message_at::text AS last_message_at,
                lm.seq AS last_seq, lm.role AS last_role, lm.content AS last_content
         FROM chat_threads t
         LEFT JOIN LATERAL (
            SELECT seq, role, content FROM chat_messages m
            WHERE m.thread_id = t.thread_id
            ORDER BY seq DESC LIMIT 1
         ) lm ON true
         WHERE t.user_key = $1
         ORDER BY COALESCE(t.last_message_at, t.updated_at) DESC
         LIMIT $2",
    )
    .bind(&uk)
    .bind(limit.clamp(1, 200))
    .fetch_all(pool)
    .await
    .context("list threads")?;

    Ok(rows
        .iter()
        .map(|r| {
            let g = |name: &str| -> Option<String> { r.try_get::<Option<String>, _>(name).ok().flatten() };
            let last_seq: Option<i32> = r.try_get("last_seq").ok();
            serde_json::json!({
                "thread_id": g("thread_id"),
                "kind": g("kind"),
                "case_id": g("case_id"),
                "title": g("title"),
                "created_at": g("created_at"),
                "updated_at": g("updated_at"),
                "last_message_at": g("last_message_at"),
                "last_message": last_seq.map(|seq| serde_json::json!({
                    "seq": seq,
                    "role": g("last_role"),
                    "content": g("last_content"),
                })),
            })
        })
        .collect())
}
