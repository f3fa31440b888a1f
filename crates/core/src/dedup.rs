//! Identity and dedupe algebra.
//!
//! Pure functions, no I/O. Dedupe is derived from stable labels plus a UTC
//! time bucket — never from remembered state. The queue's message-id
//! dedupe is the authoritative layer; everything here just has to be
//! deterministic.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::family::detect_family;
use crate::labels::{extract_pod_namespace, extract_service, extract_target_container};
use crate::model::evidence::OwnerChain;

/// Default dedupe bucket width.
pub const DEFAULT_BUCKET_HOURS: u32 = 4;

fn sha256_hex(raw: &[u8]) -> String {
    hex::encode(Sha256::digest(raw))
}

/// Floor `now` to the start of its UTC `hours`-sized bucket.
///
/// Example (hours=4): `2026-01-02T07:59Z -> 2026-01-02T04:00Z`.
pub fn bucket_start(now: DateTime<Utc>, hours: u32) -> Result<DateTime<Utc>> {
    if hours == 0 {
        return Err(Error::InvalidArgument("bucket hours must be > 0".to_string()));
    }
    let bucket_hour = (now.hour() / hours) * hours;
    let floored = Utc
        .with_ymd_and_hms(now.year(), now.month(), now.day(), bucket_hour, 0, 0)
        .single()
        .ok_or_else(|| Error::InvalidArgument("unrepresentable bucket start".to_string()))?;
    Ok(floored)
}

/// Format a bucket start as `YYYYMMDDHH` (UTC).
#[must_use]
pub fn bucket_label(bucket_start_utc: DateTime<Utc>) -> String {
    bucket_start_utc.format("%Y%m%d%H").to_string()
}

/// UTC hour-bucket label for the rollout queue scheme.
#[must_use]
pub fn hour_bucket_label(now: DateTime<Utc>) -> String {
    // hours=1 cannot fail.
    bucket_label(bucket_start(now, 1).expect("1-hour bucket is always valid"))
}

/// Stable msg-id for queue dedupe: workload identity + hour bucket.
#[must_use]
pub fn queue_msg_id_for_workload_hour(workload_key: &str, hour_bucket: &str) -> String {
    let wk = if workload_key.trim().is_empty() { "unknown" } else { workload_key.trim() };
    let hb = if hour_bucket.trim().is_empty() { "unknown" } else { hour_bucket.trim() };
    sha256_hex(format!("{wk}:{hb}").as_bytes())
}

fn canonical(v: &serde_json::Value) -> String {
    // serde_json object keys are BTreeMap-backed, so this is canonical
    // (sorted keys, compact separators).
    v.to_string()
}

/// Compute a stable dedupe key for an alert instance.
///
/// Rules:
/// - always includes `alertname` + detected `family`;
/// - uses a fixed UTC time bucket (default 4h);
/// - identity priority: job (job_failed with `job_name` + namespace) →
///   pod (pod+namespace present and family not excluded) → service →
///   fingerprint;
/// - cluster comes from `labels["cluster"]`, else `env_cluster`, else
///   `"unknown"`.
pub fn dedup_key(
    alertname: &str,
    labels: &BTreeMap<String, String>,
    fingerprint: &str,
    now: DateTime<Utc>,
    env_cluster: Option<&str>,
    bucket_hours: u32,
) -> Result<String> {
    let a = if alertname.trim().is_empty() { "Unknown" } else { alertname.trim() };
    let fp = fingerprint.trim();

    let family = detect_family(labels);

    let cluster = labels
        .get("cluster")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .or(env_cluster.map(str::trim).filter(|s| !s.is_empty()))
        .unwrap_or("unknown");

    let bucket = bucket_label(bucket_start(now, bucket_hours)?);

    let (pod, namespace) = extract_pod_namespace(labels);
    let service = extract_service(labels);

    let job_name = if family == crate::family::Family::JobFailed {
        labels
            .get("job_name")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    } else {
        None
    };

    let (kind, identity) = if let (Some(jn), Some(ns)) = (job_name, namespace.as_deref()) {
        (
            "job",
            json!({"cluster": cluster, "namespace": ns, "job_name": jn}),
        )
    } else if let (Some(p), Some(ns)) = (pod.as_deref(), namespace.as_deref()) {
        if family.pod_identity_excluded() {
            identity_fallback(&service, cluster, fp)
        } else {
            ("pod", json!({"cluster": cluster, "namespace": ns, "pod": p}))
        }
    } else {
        identity_fallback(&service, cluster, fp)
    };

    let payload = json!({
        "v": 1,
        "bucket_hours": bucket_hours,
        "bucket": bucket,
        "alertname": a,
        "family": family.as_str(),
        "kind": kind,
        "identity": identity,
    });
    Ok(sha256_hex(canonical(&payload).as_bytes()))
}

fn identity_fallback(
    service: &Option<String>,
    cluster: &str,
    fingerprint: &str,
) -> (&'static str, serde_json::Value) {
    if let Some(svc) = service.as_deref().filter(|s| !s.is_empty()) {
        ("service", json!({"cluster": cluster, "service": svc}))
    } else {
        let fp = if fingerprint.is_empty() { "unknown" } else { fingerprint };
        ("fingerprint", json!({"fingerprint": fp}))
    }
}

/// Compute a stable workload-level key from a K8s owner chain.
///
/// For rollout-noisy alerts, pod names/fingerprints churn but the owning
/// controller represents the incident scope. Returns `None` when workload
/// identity is unavailable.
#[must_use]
pub fn rollout_workload_key(
    alertname: &str,
    labels: &BTreeMap<String, String>,
    owner_chain: &OwnerChain,
    env_cluster: Option<&str>,
    include_container: bool,
) -> Option<String> {
    let wl = owner_chain.workload.as_ref()?;
    let wk = wl.kind.trim();
    let wn = wl.name.trim();
    if wk.is_empty() || wn.is_empty() {
        return None;
    }

    let family = detect_family(labels);
    let cluster = labels
        .get("cluster")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .or(env_cluster.map(str::trim).filter(|s| !s.is_empty()))
        .unwrap_or("unknown")
        .to_string();
    let namespace = labels
        .get("namespace")
        .or_else(|| labels.get("Namespace"))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or("unknown")
        .to_string();

    let container = if include_container {
        extract_target_container(labels)
    } else {
        None
    };

    let payload = json!({
        "v": 1,
        "scope": "workload",
        "alertname": if alertname.trim().is_empty() { "Unknown" } else { alertname.trim() },
        "family": family.as_str(),
        "cluster": cluster,
        "namespace": namespace,
        "workload_kind": wk,
        "workload_name": wn,
        "container": container,
    });
    Some(sha256_hex(canonical(&payload).as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::evidence::OwnerRef;
    use chrono::TimeZone;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_bucket_floor_and_label() {
        let t = at(2026, 1, 2, 7, 59, 0);
        let b = bucket_start(t, 4).unwrap();
        assert_eq!(b, at(2026, 1, 2, 4, 0, 0));
        assert_eq!(bucket_label(b), "2026010204");
    }

    #[test]
    fn test_bucket_boundary_strict() {
        // [lo, lo+4h): 03:59:59 belongs to 00, 04:00:00 starts a new bucket.
        let before = bucket_start(at(2026, 1, 2, 3, 59, 59), 4).unwrap();
        let after = bucket_start(at(2026, 1, 2, 4, 0, 0), 4).unwrap();
        assert_eq!(before, at(2026, 1, 2, 0, 0, 0));
        assert_eq!(after, at(2026, 1, 2, 4, 0, 0));
    }

    #[test]
    fn test_bucket_idempotent_within_window() {
        let t = at(2026, 3, 14, 9, 0, 0);
        let b = bucket_start(t, 4).unwrap();
        for offset_min in [0i64, 1, 59, 179, 239] {
            let probe = b + chrono::Duration::minutes(offset_min);
            assert_eq!(bucket_start(probe, 4).unwrap(), b);
        }
    }

    #[test]
    fn test_bucket_zero_hours_fails() {
        assert!(bucket_start(Utc::now(), 0).is_err());
    }

    #[test]
    fn test_fingerprint_irrelevant_for_pod_identity() {
        let now = at(2026, 1, 2, 10, 0, 0);
        let l = labels(&[
            ("alertname", "CrashLoopBackOff"),
            ("pod", "p1"),
            ("namespace", "ns"),
            ("cluster", "c1"),
        ]);
        let k1 = dedup_key("CrashLoopBackOff", &l, "fp-a", now, None, 4).unwrap();
        let k2 = dedup_key("CrashLoopBackOff", &l, "fp-b", now, None, 4).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_unrelated_labels_do_not_change_key() {
        let now = at(2026, 1, 2, 10, 0, 0);
        let base = labels(&[
            ("alertname", "CrashLoopBackOff"),
            ("pod", "p1"),
            ("namespace", "ns"),
            ("cluster", "c1"),
        ]);
        let mut noisy = base.clone();
        noisy.insert("severity".to_string(), "critical".to_string());
        noisy.insert("prometheus_replica".to_string(), "r1".to_string());
        noisy.insert("endpoint".to_string(), "http".to_string());
        let k1 = dedup_key("CrashLoopBackOff", &base, "fp-a", now, None, 4).unwrap();
        let k2 = dedup_key("CrashLoopBackOff", &noisy, "fp-z", now, None, 4).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_identity_labels_change_key() {
        let now = at(2026, 1, 2, 10, 0, 0);
        let base = labels(&[
            ("alertname", "CrashLoopBackOff"),
            ("pod", "p1"),
            ("namespace", "ns"),
            ("cluster", "c1"),
        ]);
        for (k, v) in [("pod", "p2"), ("namespace", "other"), ("cluster", "c2")] {
            let mut changed = base.clone();
            changed.insert(k.to_string(), v.to_string());
            assert_ne!(
                dedup_key("CrashLoopBackOff", &base, "fp", now, None, 4).unwrap(),
                dedup_key("CrashLoopBackOff", &changed, "fp", now, None, 4).unwrap(),
                "changing {k} must change the key"
            );
        }
    }

    #[test]
    fn test_excluded_family_falls_through_to_fingerprint() {
        let now = at(2026, 1, 2, 10, 0, 0);
        // TargetDown with pod labels but no service/job_name: two different
        // fingerprints must yield two different keys.
        let l = labels(&[
            ("alertname", "TargetDown"),
            ("pod", "scraper-1"),
            ("namespace", "monitoring"),
        ]);
        let k1 = dedup_key("TargetDown", &l, "fp-a", now, None, 4).unwrap();
        let k2 = dedup_key("TargetDown", &l, "fp-b", now, None, 4).unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_job_identity_preferred_for_job_failed() {
        let now = at(2026, 1, 2, 10, 0, 0);
        let l = labels(&[
            ("alertname", "KubeJobFailed"),
            ("job_name", "etl-nightly"),
            ("namespace", "batch"),
            ("pod", "ksm-1"),
        ]);
        // Fingerprint must not matter once job identity resolves.
        let k1 = dedup_key("KubeJobFailed", &l, "fp-a", now, None, 4).unwrap();
        let k2 = dedup_key("KubeJobFailed", &l, "fp-b", now, None, 4).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_different_buckets_different_keys() {
        let l = labels(&[
            ("alertname", "CrashLoopBackOff"),
            ("pod", "p1"),
            ("namespace", "ns"),
        ]);
        let k1 = dedup_key("CrashLoopBackOff", &l, "fp", at(2026, 1, 2, 3, 59, 59), None, 4).unwrap();
        let k2 = dedup_key("CrashLoopBackOff", &l, "fp", at(2026, 1, 2, 4, 0, 0), None, 4).unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_service_identity() {
        let now = at(2026, 1, 2, 10, 0, 0);
        let l = labels(&[("alertname", "ServiceHttp5xxRateHigh"), ("service", "api")]);
        let k1 = dedup_key("ServiceHttp5xxRateHigh", &l, "fp-a", now, None, 4).unwrap();
        let k2 = dedup_key("ServiceHttp5xxRateHigh", &l, "fp-b", now, None, 4).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_rollout_workload_key_requires_workload() {
        let l = labels(&[("alertname", "KubernetesPodNotHealthy"), ("namespace", "prod")]);
        assert!(rollout_workload_key("KubernetesPodNotHealthy", &l, &OwnerChain::default(), None, false).is_none());

        let oc = OwnerChain {
            owners: vec![OwnerRef { kind: "ReplicaSet".to_string(), name: "api-5d4f".to_string() }],
            workload: Some(OwnerRef { kind: "Deployment".to_string(), name: "api".to_string() }),
        };
        let k = rollout_workload_key("KubernetesPodNotHealthy", &l, &oc, None, false);
        assert!(k.is_some());
    }

    #[test]
    fn test_rollout_key_container_scoping() {
        let oc = OwnerChain {
            owners: Vec::new(),
            workload: Some(OwnerRef { kind: "Deployment".to_string(), name: "api".to_string() }),
        };
        let l_app = labels(&[
            ("alertname", "KubernetesContainerOomKiller"),
            ("namespace", "prod"),
            ("container", "app"),
        ]);
        let l_sidecar = labels(&[
            ("alertname", "KubernetesContainerOomKiller"),
            ("namespace", "prod"),
            ("container", "sidecar"),
        ]);
        let ka = rollout_workload_key("KubernetesContainerOomKiller", &l_app, &oc, None, true).unwrap();
        let ks = rollout_workload_key("KubernetesContainerOomKiller", &l_sidecar, &oc, None, true).unwrap();
        assert_ne!(ka, ks);
        // Without container scoping the two collapse.
        let ka2 = rollout_workload_key("KubernetesContainerOomKiller", &l_app, &oc, None, false).unwrap();
        let ks2 = rollout_workload_key("KubernetesContainerOomKiller", &l_sidecar, &oc, None, false).unwrap();
        assert_eq!(ka2, ks2);
    }

    #[test]
    fn test_queue_msg_id_scheme() {
        let id1 = queue_msg_id_for_workload_hour("wk", "2026010210");
        let id2 = queue_msg_id_for_workload_hour("wk", "2026010211");
        assert_ne!(id1, id2);
        assert_eq!(queue_msg_id_for_workload_hour("", ""), queue_msg_id_for_workload_hour("unknown", "unknown"));
    }

    #[test]
    fn test_hour_bucket_label() {
        assert_eq!(hour_bucket_label(at(2026, 1, 2, 7, 59, 59)), "2026010207");
    }
}
