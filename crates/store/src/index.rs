//! Case matching and run indexing.
//!
//! `index_investigation_run` incidentizes a run into a case (create or
//! attach), inserts the run row with its analysis snapshot, and refreshes
//! the case summary columns so the case always points at the latest
//! artifacts while keeping first-seen identity fields.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use sqlx::{PgPool, Row};
use tracing::debug;

use tarka_core::snapshot::snapshot_str;
use tarka_core::Investigation;

/// Result of one indexing pass.
#[derive(Debug, Clone)]
pub struct IndexResult {
    pub case_id: String,
    pub run_id: String,
    pub case_match_reason: String,
}

/// Stable identity input for case matching.
#[derive(Debug, Clone, Default)]
pub struct CaseIdentity {
    pub cluster: Option<String>,
    pub namespace: Option<String>,
    pub workload_kind: Option<String>,
    pub workload_name: Option<String>,
    pub service: Option<String>,
}

static JOB_SUFFIX_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"^(.+?)(?:-\d+){1,2}-[a-z0-9]{5,}$").expect("static pattern"),
        Regex::new(r"^(.+?)-\d+-[a-z0-9]{5,}$").expect("static pattern"),
        Regex::new(r"^(.+)-\d+$").expect("static pattern"),
    ]
});

/// Prefix for generated Job names (CronJob attempt/random suffixes);
/// `None` for stable names.
#[must_use]
pub fn extract_job_prefix(job_name: &str) -> Option<String> {
    for re in JOB_SUFFIX_PATTERNS.iter() {
        if let Some(c) = re.captures(job_name.trim()) {
            let prefix = c.get(1)?.as_str();
            if prefix.len() >= 3 {
                return Some(prefix.to_string());
            }
        }
    }
    None
}

/// Build the stable case key: cluster + namespace + workload-or-service.
/// Generated Job names collapse to their prefix so retries share a case.
#[must_use]
pub fn case_key(identity: &CaseIdentity) -> String {
    let cluster = identity.cluster.as_deref().unwrap_or("unknown");
    let namespace = identity.namespace.as_deref().unwrap_or("unknown");
    if let (Some(kind), Some(name)) = (identity.workload_kind.as_deref(), identity.workload_name.as_deref()) {
        let stable_name = if kind == "Job" {
            extract_job_prefix(name).unwrap_or_else(|| name.to_string())
        } else {
            name.to_string()
        };
        return format!("{cluster}/{namespace}/{kind}/{stable_name}");
    }
    if let Some(service) = identity.service.as_deref() {
        return format!("{cluster}/{namespace}/service/{service}");
    }
    format!("{cluster}/{namespace}/unscoped")
}

fn identity_from_investigation(inv: &Investigation) -> CaseIdentity {
    CaseIdentity {
        cluster: inv.target.cluster.clone(),
        namespace: inv.target.namespace.clone(),
        workload_kind: inv.target.workload_kind.clone(),
        workload_name: inv.target.workload_name.clone(),
        service: inv.target.service.clone(),
    }
}

/// Incidentize: attach to the open case for the key or create a new one.
/// Returns `(case_id, match_reason, created_new)`.
async fn incidentize(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    identity: &CaseIdentity,
) -> Result<(String, String, bool)> {
    let key = case_key(identity);

    let existing = sqlx::query("SELECT case_id::text FROM cases WHERE case_key = $1 AND status = 'open' LIMIT 1")
        .bind(&key)
        .fetch_optional(&mut **tx)
        .await?;

    if let Some(row) = existing {
        let case_id: String = row.try_get(0)?;
        let reason = if identity.workload_name.is_some() {
            if identity.workload_kind.as_deref() == Some("Job")
                && identity
                    .workload_name
                    .as_deref()
                    .is_some_and(|n| extract_job_prefix(n).is_some())
            {
                "prefix_job_name"
            } else {
                "exact_workload"
            }
        } else if identity.service.is_some() {
            "service_only"
        } else {
            "exact_workload"
        };
        return Ok((case_id, reason.to_string(), false));
    }

    let row = sqlx::query(
        "INSERT INTO cases (case_key, status, cluster, target_type, namespace, workload_kind, workload_name, service)
         VALUES ($1, 'open', $2, $3, $4, $5, $6, $7)
         RETURNING case_id::text",
    )
    .bind(&key)
    .bind(&identity.cluster)
    .bind(Option::<String>::None)
    .bind(&identity.namespace)
    .bind(&identity.workload_kind)
    .bind(&identity.workload_name)
    .bind(&identity.service)
    .fetch_one(&mut **tx)
    .await
    .context("insert case")?;

    Ok((row.try_get(0)?, "new_case".to_string(), true))
}

/// Index one finished investigation: case match, run insert, case refresh.
pub async fn index_investigation_run(
    pool: &PgPool,
    inv: &Investigation,
    analysis_json: &serde_json::Value,
    s3_report_key: Option<&str>,
    s3_investigation_key: Option<&str>,
    report_text: Option<&str>,
) -> Result<IndexResult> {
    let identity = identity_from_investigation(inv);
    let family = snapshot_str(analysis_json, &["analysis", "features", "family"])
        .or_else(|| snapshot_str(analysis_json, &["analysis", "verdict", "family"]))
        .map(ToString::to_string);
    let classification = snapshot_str(analysis_json, &["analysis", "verdict", "classification"]).map(ToString::to_string);
    let primary_driver = snapshot_str(analysis_json, &["analysis", "verdict", "primary_driver"]).map(ToString::to_string);
    let one_liner = snapshot_str(analysis_json, &["analysis", "verdict", "one_liner"]).map(ToString::to_string);

    let reason_codes: Vec<String> = analysis_json
        .pointer("/analysis/scores/reason_codes")
        .and_then(serde_json::Value::as_array)
        .map(|xs| {
            xs.iter()
                .filter_map(|v| v.as_str().map(ToString::to_string))
                .collect()
        })
        .unwrap_or_default();

    let mut tx = pool.begin().await.context("begin index transaction")?;
    let (case_id, reason, created_new) = incidentize(&mut tx, &identity).await?;
    debug!(case_id = %case_id, reason = %reason, created_new, "case matched");

    let run_row = sqlx::query(
        "INSERT INTO investigation_runs (
            case_id, alert_fingerprint, alertname, severity, starts_at, normalized_state,
            target_type, cluster, namespace, pod, container, workload_kind, workload_name,
            service, instance, family, classification, primary_driver, one_liner, reason_codes,
            s3_report_key, s3_investigation_key, analysis_json, report_text, case_match_reason
         ) VALUES (
            $1::uuid, $2, $3, $4, $5, $6,
            $7, $8, $9, $10, $11, $12, $13,
            $14, $15, $16, $17, $18, $19, $20,
            $21, $22, $23, $24, $25
         ) RETURNING run_id::text",
    )
    .bind(&case_id)
    .bind(&inv.alert.fingerprint)
    .bind(inv.alert.name())
    .bind(inv.alert.severity())
    .bind(inv.alert.starts_at)
    .bind(inv.alert.state.as_str())
    .bind(serde_json::to_value(inv.target.target_type).ok().and_then(|v| v.as_str().map(ToString::to_string)))
    .bind(&inv.target.cluster)
    .bind(&inv.target.namespace)
    .bind(&inv.target.pod)
    .bind(&inv.target.container)
    .bind(&inv.target.workload_kind)
    .bind(&inv.target.workload_name)
    .bind(&inv.target.service)
    .bind(&inv.target.instance)
    .bind(&family)
    .bind(&classification)
    .bind(&primary_driver)
    .bind(&one_liner)
    .bind(if reason_codes.is_empty() { None } else { Some(reason_codes) })
    .bind(s3_report_key)
    .bind(s3_investigation_key)
    .bind(analysis_json)
    .bind(report_text)
    .bind(&reason)
    .fetch_one(&mut *tx)
    .await
    .context("insert investigation run")?;
    let run_id: String = run_row.try_get(0)?;

    // Case refresh: latest artifacts win, first-seen identity sticks.
    sqlx::query(
        "UPDATE cases SET
            updated_at = now(),
            family = COALESCE($2, family),
            primary_driver = COALESCE($3, primary_driver),
            latest_one_liner = COALESCE($4, latest_one_liner),
            s3_report_key = COALESCE($5, s3_report_key),
            s3_investigation_key = COALESCE($6, s3_investigation_key),
            cluster = COALESCE(cluster, $7),
            target_type = COALESCE(target_type, $8),
            namespace = COALESCE(namespace, $9),
            workload_kind = COALESCE(workload_kind, $10),
            workload_name = COALESCE(workload_name, $11),
            service = COALESCE(service, $12),
            instance = COALESCE(instance, $13)
         WHERE case_id = $1::uuid",
    )
    .bind(&case_id)
    .bind(&family)
    .bind(&primary_driver)
    .bind(&one_liner)
    .bind(s3_report_key)
    .bind(s3_investigation_key)
    .bind(&inv.target.cluster)
    .bind(serde_json::to_value(inv.target.target_type).ok().and_then(|v| v.as_str().map(ToString::to_string)))
    .bind(&inv.target.namespace)
    .bind(&inv.target.workload_kind)
    .bind(&inv.target.workload_name)
    .bind(&inv.target.service)
    .bind(&inv.target.instance)
    .execute(&mut *tx)
    .await
    .context("refresh case summary")?;

    tx.commit().await.context("commit index transaction")?;

    Ok(IndexResult {
        case_id,
        run_id,
        case_match_reason: reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_prefix_extraction() {
        assert_eq!(extract_job_prefix("batch-etl-job-57821-0-fywpu").as_deref(), Some("batch-etl-job"));
        assert_eq!(extract_job_prefix("my-cronjob-1234567890-abcde").as_deref(), Some("my-cronjob"));
        assert_eq!(extract_job_prefix("job-blah-2").as_deref(), Some("job-blah"));
        assert_eq!(extract_job_prefix("a-1"), None);
        assert_eq!(extract_job_prefix("stable"), None);
    }

    #[test]
    fn test_case_key_shapes() {
        let workload = CaseIdentity {
            cluster: Some("c1".to_string()),
            namespace: Some("prod".to_string()),
            workload_kind: Some("Deployment".to_string()),
            workload_name: Some("api".to_string()),
            service: None,
        };
        assert_eq!(case_key(&workload), "c1/prod/Deployment/api");

        let job = CaseIdentity {
            cluster: Some("c1".to_string()),
            namespace: Some("batch".to_string()),
            workload_kind: Some("Job".to_string()),
            workload_name: Some("etl-57821-0-fywpu".to_string()),
            service: None,
        };
        assert_eq!(case_key(&job), "c1/batch/Job/etl");

        let service = CaseIdentity {
            cluster: None,
            namespace: Some("prod".to_string()),
            service: Some("gateway".to_string()),
            ..CaseIdentity::default()
        };
        assert_eq!(case_key(&service), "unknown/prod/service/gateway");

        assert_eq!(case_key(&CaseIdentity::default()), "unknown/unknown/unscoped");
    }

    #[test]
    fn test_job_retries_share_case_key() {
        let mk = |name: &str| CaseIdentity {
            cluster: Some("c1".to_string()),
            namespace: Some("batch".to_string()),
            workload_kind: Some("Job".to_string()),
            workload_name: Some(name.to_string()),
            service: None,
        };
        assert_eq!(case_key(&mk("etl-100-0-aaaaa")), case_key(&mk("etl-101-0-bbbbb")));
    }
}
