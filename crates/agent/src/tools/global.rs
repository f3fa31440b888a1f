//! Global (inbox-wide) tools. Intentionally narrow and read-only; the
//! policy's namespace/cluster allowlists scope every aggregation.

use anyhow::Result;
use serde_json::{json, Value};
use sqlx::{Postgres, QueryBuilder, Row};

use tarka_core::ToolResult;

use super::spec::ToolSpec;
use super::ToolContext;

fn norm_status(s: &str) -> &str {
    match s.trim().to_ascii_lowercase().as_str() {
        "open" => "open",
        "closed" => "closed",
        _ => "all",
    }
}

/// Append the shared latest-runs CTE filters.
fn push_scope<'a>(
    qb: &mut QueryBuilder<'a, Postgres>,
    ctx: &'a ToolContext<'_>,
    status: &str,
    team: Option<&'a str>,
    family: Option<&'a str>,
    classification: Option<&'a str>,
    since_hours: Option<i64>,
) {
    let status = norm_status(status);
    if status != "all" {
        qb.push(" AND c.status = ").push_bind(status.to_string());
    }
    if let Some(h) = since_hours {
        qb.push(" AND c.updated_at >= (now() - (")
            .push_bind(h)
            .push("::bigint * interval '1 hour'))");
    }
    if let Some(cls) = classification {
        qb.push(" AND LOWER(NULLIF(r.analysis_json #>> '{analysis,verdict,classification}', '')) = LOWER(")
            .push_bind(cls)
            .push(")");
    }
    if let Some(family) = family {
        qb.push(" AND LOWER(NULLIF(r.analysis_json #>> '{analysis,features,family}', '')) = LOWER(")
            .push_bind(family)
            .push(")");
    }
    if let Some(team) = team {
        qb.push(" AND LOWER(NULLIF(r.analysis_json #>> '{target,team}', '')) = LOWER(")
            .push_bind(team)
            .push(")");
    }
    if let Some(clusters) = &ctx.policy.cluster_allowlist {
        qb.push(" AND c.cluster = ANY(")
            .push_bind(clusters.iter().cloned().collect::<Vec<_>>())
            .push(")");
    }
    if let Some(namespaces) = &ctx.policy.namespace_allowlist {
        qb.push(" AND c.namespace = ANY(")
            .push_bind(namespaces.iter().cloned().collect::<Vec<_>>())
            .push(")");
    }
}

pub async fn run_global_tool(ctx: &ToolContext<'_>, spec: ToolSpec) -> Result<ToolResult> {
    let Some(pool) = ctx.pool else {
        return Ok(ToolResult::err("postgres_not_configured"));
    };

    match spec {
        ToolSpec::CasesCount { status, team, family, classification, since_hours } => {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "WITH latest_runs AS (
                    SELECT DISTINCT ON (r.case_id) r.case_id
                    FROM investigation_runs r
                    INNER JOIN cases c ON r.case_id = c.case_id
                    WHERE 1=1",
            );
            push_scope(
                &mut qb,
                ctx,
                &status,
                team.as_deref(),
                family.as_deref(),
                classification.as_deref(),
                since_hours,
            );
            qb.push(" ORDER BY r.case_id, r.created_at DESC) SELECT COUNT(*) AS n FROM latest_runs");

            let row = match qb.build().fetch_one(pool).await {
                Ok(row) => row,
                Err(_) => return Ok(ToolResult::err("db_unavailable")),
            };
            let n: i64 = row.try_get("n").unwrap_or(0);
            Ok(ToolResult::ok(json!({
                "status": norm_status(&status),
                "filters": {
                    "team": team,
                    "family": family,
                    "classification": classification,
                    "since_hours": since_hours,
                },
                "count": n,
            })))
        }

        ToolSpec::CasesTop { by, status, since_hours, limit } => {
            let field = match by.as_str() {
                "team" => "NULLIF(r.analysis_json #>> '{target,team}', '')",
                "family" => "NULLIF(r.analysis_json #>> '{analysis,features,family}', '')",
                _ => "NULLIF(r.analysis_json #>> '{analysis,verdict,classification}', '')",
            };
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "WITH latest_runs AS (
                    SELECT DISTINCT ON (r.case_id) r.case_id, {field} AS key
                    FROM investigation_runs r
                    INNER JOIN cases c ON r.case_id = c.case_id
                    WHERE 1=1"
            ));
            push_scope(&mut qb, ctx, &status, None, None, None, since_hours);
            qb.push(
                " ORDER BY r.case_id, r.created_at DESC)
                SELECT LOWER(COALESCE(key, 'unknown')) AS key, COUNT(*) AS count
                FROM latest_runs
                GROUP BY LOWER(COALESCE(key, 'unknown'))
                ORDER BY count DESC, key ASC
                LIMIT ",
            );
            qb.push_bind(limit);

            let rows = match qb.build().fetch_all(pool).await {
                Ok(rows) => rows,
                Err(_) => return Ok(ToolResult::err("db_unavailable")),
            };
            let items: Vec<Value> = rows
                .iter()
                .map(|r| {
                    json!({
                        "key": r.try_get::<String, _>("key").unwrap_or_else(|_| "unknown".to_string()),
                        "count": r.try_get::<i64, _>("count").unwrap_or(0),
                    })
                })
                .collect();
            Ok(ToolResult::ok(json!({
                "by": by,
                "status": norm_status(&status),
                "since_hours": since_hours,
                "items": items,
            })))
        }

        ToolSpec::CasesLookup { case_ref } => {
            let matches = lookup_case(pool, &case_ref).await?;
            Ok(ToolResult::ok(matches))
        }

        ToolSpec::CasesSummary { case_ref } => {
            let looked = lookup_case(pool, &case_ref).await?;
            let first = looked
                .get("matches")
                .and_then(Value::as_array)
                .and_then(|m| m.first())
                .and_then(Value::as_str)
                .map(ToString::to_string);
            let Some(case_id) = first else {
                return Ok(ToolResult::ok(json!({"found": false})));
            };

            let row = sqlx::query(
                "WITH latest_run AS (
                    SELECT DISTINCT ON (r.case_id)
                        r.case_id, r.run_id::text AS run_id, r.created_at::text AS run_created_at,
                        r.alertname,
                        NULLIF(r.analysis_json #>> '{analysis,features,family}', '') AS family,
                        NULLIF(r.analysis_json #>> '{analysis,verdict,classification}', '') AS classification,
                        NULLIF(r.analysis_json #>> '{target,team}', '') AS team,
                        NULLIF(r.analysis_json #>> '{analysis,verdict,one_liner}', '') AS one_liner
                    FROM investigation_runs r
                    WHERE r.case_id::text = $1
                    ORDER BY r.case_id, r.created_at DESC
                )
                SELECT c.case_id::text AS case_id, c.status,
                       c.created_at::text AS created_at, c.updated_at::text AS updated_at,
                       c.cluster, c.namespace, c.service,
                       lr.run_id, lr.run_created_at, lr.alertname, lr.family,
                       lr.classification, lr.team, lr.one_liner
                FROM cases c
                LEFT JOIN latest_run lr ON lr.case_id = c.case_id
                WHERE c.case_id::text = $1
                LIMIT 1",
            )
            .bind(&case_id)
            .fetch_optional(pool)
            .await;

            let row = match row {
                Ok(Some(row)) => row,
                Ok(None) => return Ok(ToolResult::ok(json!({"found": false}))),
                Err(_) => return Ok(ToolResult::err("db_unavailable")),
            };
            let g = |name: &str| -> Option<String> { row.try_get::<Option<String>, _>(name).ok().flatten() };
            Ok(ToolResult::ok(json!({
                "found": true,
                "case": {
                    "case_id": g("case_id"),
                    "status": g("status"),
                    "created_at": g("created_at"),
                    "updated_at": g("updated_at"),
                    "cluster": g("cluster"),
                    "namespace": g("namespace"),
                    "service": g("service"),
                },
                "latest_run": {
                    "run_id": g("run_id"),
                    "created_at": g("run_created_at"),
                    "alertname": g("alertname"),
                    "family": g("family"),
                    "classification": g("classification"),
                    "team": g("team"),
                    "one_liner": g("one_liner"),
                },
            })))
        }

        _ => Ok(ToolResult::err("tool_not_allowed")),
    }
}

/// Exact uuid match first, then UI-style `case_<prefix>` prefix match.
async fn lookup_case(pool: &sqlx::PgPool, case_ref: &str) -> Result<Value> {
    let mut reference = case_ref.trim().to_string();
    if let Some(stripped) = reference.strip_prefix("case_") {
        reference = stripped.to_string();
    }
    let reference = reference.to_ascii_lowercase();

    let exact = sqlx::query("SELECT case_id::text AS case_id FROM cases WHERE case_id::text = $1 LIMIT 1")
        .bind(&reference)
        .fetch_optional(pool)
        .await?;
    if let Some(row) = exact {
        let id: String = row.try_get("case_id")?;
        return Ok(json!({"matches": [id], "mode": "exact"}));
    }

    let rows = sqlx::query(
        "SELECT case_id::text AS case_id FROM cases
         WHERE LOWER(case_id::text) LIKE $1
         ORDER BY updated_at DESC LIMIT 5",
    )
    .bind(format!("{reference}%"))
    .fetch_all(pool)
    .await?;
    let matches: Vec<String> = rows
        .iter()
        .filter_map(|r| r.try_get::<String, _>("case_id").ok())
        .collect();
    Ok(json!({"matches": matches, "mode": "prefix"}))
}
