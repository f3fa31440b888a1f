//! Shared identity derivation for the receiver and the worker.
//!
//! One struct carries both the queue msg-id and the report key, so no
//! code path can observe a half-derived identity: when rollout identity
//! resolution succeeds the rollout key is authoritative and the 4h dedupe
//! key is never computed.

use chrono::{DateTime, Utc};

use tarka_core::dedup::{
    dedup_key, hour_bucket_label, queue_msg_id_for_workload_hour, rollout_workload_key,
    DEFAULT_BUCKET_HOURS,
};
use tarka_core::family::{rollout_key_includes_container, ROLLOUT_NOISY_ALERTNAMES};
use tarka_core::labels::extract_pod_namespace;
use tarka_core::Alert;
use tarka_providers::K8sClient;
use tarka_store::object::{evidence_rel_key, report_rel_key};

/// Derived identity for one alert.
#[derive(Debug, Clone)]
pub struct IdentityKeys {
    /// Queue-level dedupe id (authoritative).
    pub msg_id: String,
    /// Markdown report key under the storage prefix.
    pub rel_key: String,
    /// Evidence-JSON sibling, built from the same identity inputs.
    pub evidence_rel_key: String,
    /// True when this identity uses the rollout-refresh path (1h
    /// freshness gate, overwrite allowed).
    pub rollout_refresh: bool,
}

/// Derive identity keys for an alert.
///
/// Rollout-noisy alertnames try workload-scoped identity first (owner
/// chain via the K8s API); any failure falls back to the plain 4h dedupe
/// key, which doubles as the msg-id.
pub async fn derive_identity(
    k8s: &K8sClient,
    alert: &Alert,
    env_cluster: Option<&str>,
    now: DateTime<Utc>,
) -> anyhow::Result<IdentityKeys> {
    let alertname = alert.name().to_string();

    if ROLLOUT_NOISY_ALERTNAMES.contains(&alertname.as_str()) {
        let (pod, namespace) = extract_pod_namespace(&alert.labels);
        if let (Some(pod), Some(namespace)) = (pod, namespace) {
            if let Ok(chain) = k8s.pod_owner_chain(&pod, &namespace).await {
                if let Some(workload_key) = rollout_workload_key(
                    &alertname,
                    &alert.labels,
                    &chain,
                    env_cluster,
                    rollout_key_includes_container(&alertname),
                ) {
                    return Ok(IdentityKeys {
                        msg_id: queue_msg_id_for_workload_hour(&workload_key, &hour_bucket_label(now)),
                        rel_key: report_rel_key(&alertname, &workload_key),
                        evidence_rel_key: evidence_rel_key(&alertname, &workload_key),
                        rollout_refresh: true,
                    });
                }
            }
        }
    }

    let dedup = dedup_key(
        &alertname,
        &alert.labels,
        &alert.fingerprint,
        now,
        env_cluster,
        DEFAULT_BUCKET_HOURS,
    )?;
    Ok(IdentityKeys {
        rel_key: report_rel_key(&alertname, &dedup),
        evidence_rel_key: evidence_rel_key(&alertname, &dedup),
        msg_id: dedup,
        rollout_refresh: false,
    })
}
