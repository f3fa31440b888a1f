//! Identity derivation scenarios for the receiver/worker dedupe layer.
//!
//! No cluster is reachable here, so rollout-noisy alerts exercise the
//! documented fallback: owner-chain resolution fails and the plain 4h
//! dedupe key doubles as the queue msg-id.

use chrono::{TimeZone, Utc};
use serde_json::json;

use tarka_core::model::alert::normalize_webhook_alert;
use tarka_providers::K8sClient;
use tarka_server::identity as derive;

fn at(h: u32, m: u32, s: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 2, h, m, s).unwrap()
}

#[tokio::test]
async fn test_crashloop_two_fingerprints_one_msg_id() {
    // Same pod identity, different fingerprints, one
    // queue identity.
    let k8s = K8sClient::new();
    let now = at(10, 0, 0);
    let mk = |fp: &str| {
        normalize_webhook_alert(
            &json!({
                "labels": {"alertname": "CrashLoopBackOff", "pod": "p1", "namespace": "ns", "cluster": "c1"},
                "startsAt": "2026-01-02T09:00:00Z",
                "fingerprint": fp,
            }),
            None,
        )
    };
    let a = derive::derive_identity(&k8s, &mk("fp-a"), None, now).await.unwrap();
    let b = derive::derive_identity(&k8s, &mk("fp-b"), None, now).await.unwrap();
    assert_eq!(a.msg_id, b.msg_id);
    assert_eq!(a.rel_key, b.rel_key);
    assert!(!a.rollout_refresh);
    assert!(a.rel_key.starts_with("CrashLoopBackOff/"));
    assert!(a.rel_key.ends_with(".md"));
    // The evidence JSON sibling shares directory and stem with the report.
    assert_eq!(
        a.evidence_rel_key,
        format!("{}.json", a.rel_key.strip_suffix(".md").unwrap())
    );
}

#[tokio::test]
async fn test_resolved_alert_is_not_firing() {
    let alert = normalize_webhook_alert(
        &json!({
            "labels": {"alertname": "CrashLoopBackOff", "pod": "p1", "namespace": "ns"},
            "startsAt": "2026-01-02T09:00:00Z",
            "endsAt": "2026-01-02T09:30:00Z",
        }),
        None,
    );
    assert!(!alert.is_firing());
}

#[tokio::test]
async fn test_rollout_noisy_without_cluster_falls_back_to_dedup_key() {
    // The open-question decision: when rollout identity derivation cannot
    // complete, the 4h dedupe key is authoritative and rel_key always
    // derives from the selected key.
    let k8s = K8sClient::new();
    let now = at(10, 0, 0);
    let alert = normalize_webhook_alert(
        &json!({
            "labels": {"alertname": "KubernetesPodNotHealthy", "pod": "api-5d4f-xk2", "namespace": "prod"},
            "startsAt": "2026-01-02T09:00:00Z",
            "fingerprint": "fp-1",
        }),
        None,
    );
    let id = derive::derive_identity(&k8s, &alert, None, now).await.unwrap();
    assert!(!id.rollout_refresh);
    assert_eq!(id.rel_key, format!("KubernetesPodNotHealthy/{}.md", id.msg_id));
}

#[tokio::test]
async fn test_bucket_boundary_changes_msg_id() {
    // The 4h window boundary is strict.
    let k8s = K8sClient::new();
    let alert = normalize_webhook_alert(
        &json!({
            "labels": {"alertname": "CrashLoopBackOff", "pod": "p1", "namespace": "ns"},
            "startsAt": "2026-01-02T03:00:00Z",
            "fingerprint": "fp",
        }),
        None,
    );
    let before = derive::derive_identity(&k8s, &alert, None, at(3, 59, 59)).await.unwrap();
    let after = derive::derive_identity(&k8s, &alert, None, at(4, 0, 0)).await.unwrap();
    assert_ne!(before.msg_id, after.msg_id);
}
