//! Embedded bootstrap DDL.
//!
//! Applied when `DB_AUTO_MIGRATE=true`; each statement set is recorded in
//! `schema_migrations`. Heavier migration machinery lives outside the
//! core.

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::info;

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_cases_and_runs",
        r"
        CREATE EXTENSION IF NOT EXISTS pgcrypto;

        CREATE TABLE IF NOT EXISTS cases (
            case_id uuid PRIMARY KEY DEFAULT gen_random_uuid(),
            case_key text NOT NULL,
            status text NOT NULL DEFAULT 'open',
            created_at timestamptz NOT NULL DEFAULT now(),
            updated_at timestamptz NOT NULL DEFAULT now(),
            resolved_at timestamptz,
            resolution_category text,
            resolution_summary text,
            postmortem_link text,
            cluster text,
            target_type text,
            namespace text,
            workload_kind text,
            workload_name text,
            service text,
            instance text,
            family text,
            primary_driver text,
            latest_one_liner text,
            s3_report_key text,
            s3_investigation_key text
        );

        CREATE UNIQUE INDEX IF NOT EXISTS cases_open_case_key
            ON cases (case_key) WHERE status = 'open';
        CREATE INDEX IF NOT EXISTS cases_updated_at ON cases (updated_at DESC);

        CREATE TABLE IF NOT EXISTS investigation_runs (
            run_id uuid PRIMARY KEY DEFAULT gen_random_uuid(),
            case_id uuid NOT NULL REFERENCES cases(case_id),
            created_at timestamptz NOT NULL DEFAULT now(),
            alert_fingerprint text,
            alertname text,
            severity text,
            starts_at timestamptz,
            normalized_state text,
            target_type text,
            cluster text,
            namespace text,
            pod text,
            container text,
            workload_kind text,
            workload_name text,
            service text,
            instance text,
            family text,
            classification text,
            primary_driver text,
            one_liner text,
            reason_codes text[],
            s3_report_key text,
            s3_investigation_key text,
            analysis_json jsonb NOT NULL,
            report_text text,
            case_match_reason text
        );

        CREATE INDEX IF NOT EXISTS runs_case_created ON investigation_runs (case_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS runs_family ON investigation_runs (family);
        CREATE INDEX IF NOT EXISTS runs_created_at ON investigation_runs (created_at DESC);
        ",
    ),
    (
        "0002_case_actions",
        r"
        CREATE TABLE IF NOT EXISTS case_actions (
            action_id uuid PRIMARY KEY DEFAULT gen_random_uuid(),
            case_id uuid NOT NULL REFERENCES cases(case_id),
            run_id uuid,
            hypothesis_id text,
            action_type text NOT NULL,
            title text NOT NULL,
            risk text,
            preconditions text[],
            execution_payload jsonb NOT NULL DEFAULT '{}'::jsonb,
            status text NOT NULL DEFAULT 'proposed',
            proposed_by text NOT NULL,
            created_at timestamptz NOT NULL DEFAULT now(),
            approved_at timestamptz,
            approved_by text,
            executed_at timestamptz,
            executed_by text
        );

        CREATE INDEX IF NOT EXISTS case_actions_case ON case_actions (case_id, created_at DESC);
        ",
    ),
    (
        "0003_chat",
        r"
        CREATE TABLE IF NOT EXISTS chat_threads (
            thread_id uuid PRIMARY KEY DEFAULT gen_random_uuid(),
            user_key text NOT NULL,
            kind text NOT NULL,
            case_id uuid,
            title text,
            created_at timestamptz NOT NULL DEFAULT now(),
            updated_at timestamptz NOT NULL DEFAULT now(),
            last_message_at timestamptz
        );

        CREATE UNIQUE INDEX IF NOT EXISTS chat_threads_global_unique
            ON chat_threads (user_key) WHERE kind = 'global';
        CREATE UNIQUE INDEX IF NOT EXISTS chat_threads_case_unique
            ON chat_threads (user_key, case_id) WHERE kind = 'case';

        CREATE TABLE IF NOT EXISTS chat_messages (
            message_id uuid PRIMARY KEY DEFAULT gen_random_uuid(),
            thread_id uuid NOT NULL REFERENCES chat_threads(thread_id),
            seq int NOT NULL,
            role text NOT NULL,
            content text NOT NULL,
            created_at timestamptz NOT NULL DEFAULT now(),
            UNIQUE (thread_id, seq)
        );

        CREATE TABLE IF NOT EXISTS chat_tool_events (
            event_id uuid PRIMARY KEY DEFAULT gen_random_uuid(),
            thread_id uuid NOT NULL REFERENCES chat_threads(thread_id),
            message_id uuid,
            tool text NOT NULL,
            args jsonb NOT NULL DEFAULT '{}'::jsonb,
            ok boolean NOT NULL DEFAULT false,
            result jsonb,
            error text,
            created_at timestamptz NOT NULL DEFAULT now()
        );
        ",
    ),
    (
        "0004_skills",
        r"
        CREATE TABLE IF NOT EXISTS skills (
            skill_id uuid PRIMARY KEY DEFAULT gen_random_uuid(),
            name text NOT NULL,
            active boolean NOT NULL DEFAULT true,
            when_json jsonb NOT NULL,
            advice_template text NOT NULL,
            created_at timestamptz NOT NULL DEFAULT now()
        );
        ",
    ),
];

/// Apply the embedded DDL, recording each id in `schema_migrations`.
pub async fn bootstrap(pool: &PgPool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            migration_id text PRIMARY KEY,
            applied_at timestamptz NOT NULL DEFAULT now()
        );",
    )
    .execute(pool)
    .await
    .context("create schema_migrations")?;

    for (id, ddl) in MIGRATIONS {
        let applied: Option<(String,)> =
            sqlx::query_as("SELECT migration_id FROM schema_migrations WHERE migration_id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await?;
        if applied.is_some() {
            continue;
        }
        info!(migration = id, "applying schema migration");
        sqlx::raw_sql(ddl).execute(pool).await.with_context(|| format!("apply migration {id}"))?;
        sqlx::query("INSERT INTO schema_migrations(migration_id) VALUES ($1)")
            .bind(id)
            .execute(pool)
            .await?;
    }
    Ok(())
}
