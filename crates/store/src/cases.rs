//! Case read/query surface: list with hybrid search, facets, detail,
//! resolve/reopen transitions.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use tarka_core::search::{parse_search_query, ParsedSearchQuery};

/// List filters accepted by the console.
#[derive(Debug, Clone, Default)]
pub struct CaseListFilter {
    /// `open | closed | all`
    pub status: String,
    pub q: String,
    pub service: Option<String>,
    pub classification: Option<String>,
    pub family: Option<String>,
    pub team: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

/// Append the CTE filter conditions shared by list/count/facets.
fn push_filters<'a>(qb: &mut QueryBuilder<'a, Postgres>, filter: &'a CaseListFilter) {
    let status = filter.status.trim().to_ascii_lowercase();
    if !status.is_empty() && status != "all" {
        qb.push(" AND c.status = ").push_bind(status);
    }
    if let Some(service) = filter.service.as_deref().filter(|s| !s.is_empty()) {
        qb.push(" AND c.service = ").push_bind(service);
    }
    if let Some(cls) = filter.classification.as_deref().filter(|s| !s.is_empty()) {
        qb.push(" AND LOWER(NULLIF(r.analysis_json #>> '{analysis,verdict,classification}', '')) = LOWER(")
            .push_bind(cls)
            .push(")");
    }
    if let Some(family) = filter.family.as_deref().filter(|s| !s.is_empty()) {
        qb.push(" AND LOWER(NULLIF(r.analysis_json #>> '{analysis,features,family}', '')) = LOWER(")
            .push_bind(family)
            .push(")");
    }
    if let Some(team) = filter.team.as_deref().filter(|s| !s.is_empty()) {
        qb.push(" AND LOWER(NULLIF(r.analysis_json #>> '{target,team}', '')) = LOWER(")
            .push_bind(team)
            .push(")");
    }
    if !filter.q.trim().is_empty() {
        push_hybrid_search(qb, parse_search_query(&filter.q));
    }
}

/// Hybrid search semantics: key:value filters AND across keys / OR across
/// repeated values; free-text tokens AND across tokens, each token OR
/// across searchable fields. ILIKE `%v%` everywhere for flexible matching.
fn push_hybrid_search(qb: &mut QueryBuilder<'_, Postgres>, parsed: ParsedSearchQuery) {
    let filter_fields: &[(&str, &[&str])] = &[
        ("namespace", &["c.namespace", "r.namespace"]),
        ("pod", &["r.pod"]),
        ("workload", &["c.workload_name", "r.workload_name"]),
        ("service", &["c.service", "r.service"]),
        ("cluster", &["c.cluster", "r.cluster"]),
        ("alertname", &["r.alertname"]),
    ];

    for (key, values) in &parsed.filters {
        let Some((_, fields)) = filter_fields.iter().find(|(k, _)| k == key) else {
            continue;
        };
        qb.push(" AND (");
        let mut first_value = true;
        for v in values {
            if v.is_empty() {
                continue;
            }
            if !first_value {
                qb.push(" OR ");
            }
            first_value = false;
            qb.push("(");
            for (i, field) in fields.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                qb.push(format!("{field} ILIKE "));
                qb.push_bind(format!("%{v}%"));
            }
            qb.push(")");
        }
        if first_value {
            // no usable values; keep the expression valid
            qb.push("TRUE");
        }
        qb.push(")");
    }

    let token_fields = [
        "c.case_id::text",
        "c.cluster",
        "c.namespace",
        "c.workload_kind",
        "c.workload_name",
        "c.service",
        "c.instance",
        "r.alertname",
        "r.cluster",
        "r.namespace",
        "r.pod",
        "r.container",
        "r.workload_kind",
        "r.workload_name",
        "r.service",
        "r.instance",
        "r.analysis_json #>> '{analysis,verdict,one_liner}'",
        "r.analysis_json #>> '{analysis,features,family}'",
        "r.analysis_json #>> '{analysis,verdict,primary_driver}'",
    ];
    for tok in &parsed.tokens {
        qb.push(" AND (");
        for (i, field) in token_fields.iter().enumerate() {
            if i > 0 {
                qb.push(" OR ");
            }
            qb.push(format!("{field} ILIKE "));
            qb.push_bind(format!("%{tok}%"));
        }
        qb.push(")");
    }
}

fn row_to_item(row: &sqlx::postgres::PgRow) -> Value {
    let get = |name: &str| -> Option<String> { row.try_get::<Option<String>, _>(name).ok().flatten() };
    let get_i = |name: &str| -> Option<i64> { row.try_get::<Option<i64>, _>(name).ok().flatten() };
    json!({
        "case_id": get("case_id"),
        "case_status": get("case_status"),
        "case_created_at": get("case_created_at"),
        "case_updated_at": get("case_updated_at"),
        "run_id": get("run_id"),
        "run_created_at": get("run_created_at"),
        "alertname": get("alertname"),
        "severity": get("severity"),
        "cluster": get("cluster"),
        "namespace": get("namespace"),
        "service": get("service"),
        "instance": get("instance"),
        "family": get("family"),
        "classification": get("classification"),
        "primary_driver": get("primary_driver"),
        "one_liner": get("one_liner"),
        "impact_score": get_i("impact_score"),
        "confidence_score": get_i("confidence_score"),
        "noise_score": get_i("noise_score"),
        "team": get("team"),
        "enrichment_summary": get("enrichment_summary"),
    })
}

/// Paginated case listing: latest run per case plus status counts.
pub async fn list_cases(pool: &PgPool, filter: &CaseListFilter) -> Result<Value> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "WITH latest_runs AS (
            SELECT DISTINCT ON (r.case_id)
                r.case_id,
                r.run_id::text AS run_id,
                r.created_at::text AS run_created_at,
                r.alertname,
                NULLIF(r.analysis_json #>> '{analysis,verdict,severity}', '') AS severity,
                r.cluster, r.namespace, r.service, r.instance,
                NULLIF(r.analysis_json #>> '{analysis,features,family}', '') AS family,
                NULLIF(r.analysis_json #>> '{analysis,verdict,classification}', '') AS classification,
                NULLIF(r.analysis_json #>> '{analysis,verdict,primary_driver}', '') AS primary_driver,
                NULLIF(r.analysis_json #>> '{analysis,verdict,one_liner}', '') AS one_liner,
                (NULLIF(r.analysis_json #>> '{analysis,scores,impact_score}', ''))::bigint AS impact_score,
                (NULLIF(r.analysis_json #>> '{analysis,scores,confidence_score}', ''))::bigint AS confidence_score,
                (NULLIF(r.analysis_json #>> '{analysis,scores,noise_score}', ''))::bigint AS noise_score,
                NULLIF(r.analysis_json #>> '{target,team}', '') AS team,
                NULLIF(r.analysis_json #>> '{analysis,enrichment,label}', '') AS enrichment_summary
            FROM investigation_runs r
            INNER JOIN cases c ON r.case_id = c.case_id
            WHERE 1=1",
    );
    push_filters(&mut qb, filter);
    qb.push(
        " ORDER BY r.case_id, r.created_at DESC
        )
        SELECT
            c.case_id::text AS case_id,
            c.status AS case_status,
            c.created_at::text AS case_created_at,
            c.updated_at::text AS case_updated_at,
            lr.run_id, lr.run_created_at, lr.alertname, lr.severity,
            lr.cluster, lr.namespace, lr.service, lr.instance,
            lr.family, lr.classification, lr.primary_driver, lr.one_liner,
            lr.impact_score, lr.confidence_score, lr.noise_score, lr.team,
            lr.enrichment_summary
        FROM cases c
        INNER JOIN latest_runs lr ON c.case_id = lr.case_id
        ORDER BY c.updated_at DESC
        LIMIT ",
    );
    qb.push_bind(filter.limit.clamp(1, 1000));
    qb.push(" OFFSET ");
    qb.push_bind(filter.offset.max(0));

    let rows = qb.build().fetch_all(pool).await.context("list cases")?;
    let items: Vec<Value> = rows.iter().map(row_to_item).collect();

    // Counts over the same filter set.
    let mut count_qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT
            COUNT(DISTINCT c.case_id) AS total,
            COUNT(DISTINCT CASE WHEN c.status = 'open' THEN c.case_id END) AS open_count,
            COUNT(DISTINCT CASE WHEN c.status = 'closed' THEN c.case_id END) AS closed_count
         FROM cases c
         INNER JOIN investigation_runs r ON r.case_id = c.case_id
         WHERE 1=1",
    );
    push_filters(&mut count_qb, filter);
    let count_row = count_qb.build().fetch_one(pool).await.context("count cases")?;
    let total: i64 = count_row.try_get("total").unwrap_or(0);
    let open: i64 = count_row.try_get("open_count").unwrap_or(0);
    let closed: i64 = count_row.try_get("closed_count").unwrap_or(0);

    Ok(json!({
        "total": total,
        "counts": {"open": open, "closed": closed, "total": total},
        "items": items,
    }))
}

/// Distinct teams under the same filters.
pub async fn case_facets(pool: &PgPool, filter: &CaseListFilter) -> Result<Value> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT DISTINCT NULLIF(r.analysis_json #>> '{target,team}', '') AS team
         FROM investigation_runs r
         INNER JOIN cases c ON r.case_id = c.case_id
         WHERE 1=1",
    );
    push_filters(&mut qb, filter);
    qb.push(" ORDER BY team NULLS LAST");

    let rows = qb.build().fetch_all(pool).await.context("case facets")?;
    let teams: Vec<String> = rows
        .iter()
        .filter_map(|r| r.try_get::<Option<String>, _>("team").ok().flatten())
        .collect();
    Ok(json!({"teams": teams}))
}

/// Case detail with up to `runs_limit` recent runs.
pub async fn get_case(pool: &PgPool, case_id: &str, runs_limit: i64) -> Result<Option<Value>> {
    let case_row = sqlx::query(
        "SELECT case_id::text AS case_id, case_key, status,
                created_at::text AS created_at, updated_at::text AS updated_at,
                resolved_at::text AS resolved_at, resolution_category, resolution_summary,
                postmortem_link, cluster, target_type, namespace, workload_kind,
                workload_name, service, instance, family, primary_driver,
                latest_one_liner, s3_report_key, s3_investigation_key
         FROM cases WHERE case_id::text = $1",
    )
    .bind(case_id)
    .fetch_optional(pool)
    .await
    .context("get case")?;

    let Some(case_row) = case_row else {
        return Ok(None);
    };

    let run_rows = sqlx::query(
        "SELECT run_id::text AS run_id, created_at::text AS created_at, alertname,
                severity, family, classification, primary_driver, one_liner,
                s3_report_key, s3_investigation_key, case_match_reason
         FROM investigation_runs
         WHERE case_id::text = $1
         ORDER BY created_at DESC
         LIMIT $2",
    )
    .bind(case_id)
    .bind(runs_limit.clamp(1, 100))
    .fetch_all(pool)
    .await
    .context("get case runs")?;

    let get = |name: &str| -> Option<String> { case_row.try_get::<Option<String>, _>(name).ok().flatten() };
    let runs: Vec<Value> = run_rows
        .iter()
        .map(|r| {
            let g = |name: &str| -> Option<String> { r.try_get::<Option<String>, _>(name).ok().flatten() };
            json!({
                "run_id": g("run_id"),
                "created_at": g("created_at"),
                "alertname": g("alertname"),
                "severity": g("severity"),
                "family": g("family"),
                "classification": g("classification"),
                "primary_driver": g("primary_driver"),
                "one_liner": g("one_liner"),
                "s3_report_key": g("s3_report_key"),
                "s3_investigation_key": g("s3_investigation_key"),
                "case_match_reason": g("case_match_reason"),
            })
        })
        .collect();

    Ok(Some(json!({
        "case": {
            "case_id": get("case_id"),
            "case_key": get("case_key"),
            "status": get("status"),
            "created_at": get("created_at"),
            "updated_at": get("updated_at"),
            "resolved_at": get("resolved_at"),
            "resolution_category": get("resolution_category"),
            "resolution_summary": get("resolution_summary"),
            "postmortem_link": get("postmortem_link"),
            "cluster": get("cluster"),
            "target_type": get("target_type"),
            "namespace": get("namespace"),
            "workload_kind": get("workload_kind"),
            "workload_name": get("workload_name"),
            "service": get("service"),
            "instance": get("instance"),
            "family": get("family"),
            "primary_driver": get("primary_driver"),
            "latest_one_liner": get("latest_one_liner"),
            "s3_report_key": get("s3_report_key"),
            "s3_investigation_key": get("s3_investigation_key"),
        },
        "runs": runs,
    })))
}

/// Run detail including the analysis snapshot.
pub async fn get_investigation_run(pool: &PgPool, run_id: &str) -> Result<Option<Value>> {
    let row = sqlx::query(
        "SELECT run_id::text AS run_id, case_id::text AS case_id,
                created_at::text AS created_at, alertname, severity, family,
                classification, primary_driver, one_liner, analysis_json,
                s3_report_key, s3_investigation_key, case_match_reason
         FROM investigation_runs WHERE run_id::text = $1",
    )
    .bind(run_id)
    .fetch_optional(pool)
    .await
    .context("get run")?;

    let Some(row) = row else { return Ok(None) };
    let get = |name: &str| -> Option<String> { row.try_get::<Option<String>, _>(name).ok().flatten() };
    let analysis_json: Value = row.try_get("analysis_json").unwrap_or(Value::Null);
    Ok(Some(json!({
        "run_id": get("run_id"),
        "case_id": get("case_id"),
        "created_at": get("created_at"),
        "alertname": get("alertname"),
        "severity": get("severity"),
        "family": get("family"),
        "classification": get("classification"),
        "primary_driver": get("primary_driver"),
        "one_liner": get("one_liner"),
        "analysis_json": analysis_json,
        "s3_report_key": get("s3_report_key"),
        "s3_investigation_key": get("s3_investigation_key"),
        "case_match_reason": get("case_match_reason"),
    })))
}

/// Latest analysis snapshot for a case (for case-scoped chat).
pub async fn latest_snapshot_for_case(pool: &PgPool, case_id: &str) -> Result<Option<(String, Value)>> {
    let row = sqlx::query(
        "SELECT run_id::text AS run_id, analysis_json
         FROM investigation_runs
         WHERE case_id::text = $1
         ORDER BY created_at DESC
         LIMIT 1",
    )
    .bind(case_id)
    .fetch_optional(pool)
    .await
    .context("latest snapshot")?;
    Ok(row.map(|r| {
        let run_id: String = r.try_get("run_id").unwrap_or_default();
        let aj: Value = r.try_get("analysis_json").unwrap_or(Value::Null);
        (run_id, aj)
    }))
}

/// Close a case: both category and summary are required.
pub async fn resolve_case(
    pool: &PgPool,
    case_id: &str,
    category: &str,
    summary: &str,
    postmortem_link: Option<&str>,
) -> Result<Result<(), &'static str>> {
    if category.trim().is_empty() {
        return Ok(Err("resolution_category_required"));
    }
    if summary.trim().is_empty() {
        return Ok(Err("resolution_summary_required"));
    }
    let updated = sqlx::query(
        "UPDATE cases SET
            status = 'closed',
            resolved_at = now(),
            updated_at = now(),
            resolution_category = $2,
            resolution_summary = $3,
            postmortem_link = $4
         WHERE case_id::text = $1",
    )
    .bind(case_id)
    .bind(category.trim())
    .bind(summary.trim())
    .bind(postmortem_link)
    .execute(pool)
    .await
    .context("resolve case")?;
    if updated.rows_affected() == 0 {
        return Ok(Err("not_found"));
    }
    Ok(Ok(()))
}

/// Reopen a case: clears resolution fields.
pub async fn reopen_case(pool: &PgPool, case_id: &str) -> Result<Result<(), &'static str>> {
    let updated = sqlx::query(
        "UPDATE cases SET
            status = 'open',
            resolved_at = NULL,
            resolution_category = NULL,
            resolution_summary = NULL,
            postmortem_link = NULL,
            updated_at = now()
         WHERE case_id::text = $1",
    )
    .bind(case_id)
    .execute(pool)
    .await
    .context("reopen case")?;
    if updated.rows_affected() == 0 {
        return Ok(Err("not_found"));
    }
    Ok(Ok(()))
}
