//! Similar-run retrieval for the memory surface.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::index::extract_job_prefix;
use tarka_core::Investigation;

/// One similar historical run.
#[derive(Debug, Clone)]
pub struct SimilarRun {
    pub case_id: String,
    pub run_id: String,
    pub created_at: String,
    pub one_liner: String,
    pub s3_report_key: Option<String>,
    pub resolution_category: Option<String>,
    pub resolution_summary: Option<String>,
    pub postmortem_link: Option<String>,
}

impl SimilarRun {
    #[must_use]
    pub fn to_value(&self) -> Value {
        json!({
            "case_id": self.case_id,
            "run_id": self.run_id,
            "created_at": self.created_at,
            "one_liner": self.one_liner,
            "s3_report_key": self.s3_report_key,
            "resolution_category": self.resolution_category,
            "resolution_summary": self.resolution_summary,
            "postmortem_link": self.postmortem_link,
        })
    }
}

/// Find runs matching `{family, cluster?, namespace?, workload?}`;
/// generated Job names match by prefix; the current fingerprint is
/// excluded so a run never retrieves itself.
pub async fn find_similar_runs(pool: &PgPool, inv: &Investigation, limit: i64) -> Result<Vec<SimilarRun>> {
    let family = inv
        .analysis
        .features
        .as_ref()
        .and_then(|f| f.family)
        .map(|f| f.as_str().to_string());
    let Some(family) = family else {
        return Ok(Vec::new());
    };

    let cluster = inv.target.cluster.clone().filter(|s| !s.trim().is_empty());
    let namespace = inv.target.namespace.clone().filter(|s| !s.trim().is_empty());
    let workload_name = inv.target.workload_name.clone().filter(|s| !s.trim().is_empty());
    let workload_kind = inv.target.workload_kind.clone().filter(|s| !s.trim().is_empty());
    let current_fp = inv.alert.fingerprint.trim().to_string();

    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT r.case_id::text AS case_id, r.run_id::text AS run_id,
                r.created_at::text AS created_at, COALESCE(r.one_liner, '') AS one_liner,
                r.s3_report_key, c.resolution_category, c.resolution_summary, c.postmortem_link
         FROM investigation_runs r
         INNER JOIN cases c ON r.case_id = c.case_id
         WHERE r.family = ",
    );
    qb.push_bind(family);

    if let Some(cluster) = cluster {
        qb.push(" AND r.cluster IS NOT DISTINCT FROM ").push_bind(cluster);
    }
    if let Some(namespace) = namespace {
        qb.push(" AND r.namespace IS NOT DISTINCT FROM ").push_bind(namespace);
    }

    let job_prefix = if workload_kind.as_deref() == Some("Job") {
        workload_name.as_deref().and_then(extract_job_prefix)
    } else {
        None
    };
    if let Some(prefix) = job_prefix {
        qb.push(" AND r.workload_name LIKE ").push_bind(format!("{prefix}%"));
    } else if let Some(name) = workload_name {
        qb.push(" AND r.workload_name IS NOT DISTINCT FROM ").push_bind(name);
    }
    if let Some(kind) = workload_kind {
        qb.push(" AND r.workload_kind IS NOT DISTINCT FROM ").push_bind(kind);
    }
    if !current_fp.is_empty() {
        qb.push(" AND r.alert_fingerprint IS DISTINCT FROM ").push_bind(current_fp);
    }

    qb.push(" ORDER BY r.created_at DESC LIMIT ");
    qb.push_bind(limit.clamp(1, 20));

    let rows = qb.build().fetch_all(pool).await.context("find similar runs")?;
    Ok(rows
        .iter()
        .map(|r| SimilarRun {
            case_id: r.try_get("case_id").unwrap_or_default(),
            run_id: r.try_get("run_id").unwrap_or_default(),
            created_at: r.try_get("created_at").unwrap_or_default(),
            one_liner: r.try_get("one_liner").unwrap_or_default(),
            s3_report_key: r.try_get("s3_report_key").ok().flatten(),
            resolution_category: r.try_get("resolution_category").ok().flatten(),
            resolution_summary: r.try_get("resolution_summary").ok().flatten(),
            postmortem_link: r.try_get("postmortem_link").ok().flatten(),
        })
        .collect())
}
