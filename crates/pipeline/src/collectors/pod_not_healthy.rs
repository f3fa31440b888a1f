//! Pod-not-healthy evidence collector with image-pull diagnostics.

use tarka_core::model::evidence::{ContainerState, ImagePullDiagnostics};
use tarka_core::Investigation;
use tarka_providers::aws::infra::ecr_image;
use tarka_providers::Providers;

use super::image_pull::{classify_pull_error, extract_image_from_message, parse_image_ref};
use super::pod_baseline::collect_pod_baseline;
use super::require_pod_target;

pub async fn collect_pod_not_healthy(providers: &Providers, inv: &mut Investigation) {
    inv.target.playbook = Some("pod_not_healthy".to_string());
    let Some((_, namespace)) = require_pod_target(inv, "pod_not_healthy") else {
        return;
    };
    collect_pod_baseline(providers, inv, 20).await;

    // Deterministic image-pull diagnostics for ImagePullBackOff/ErrImagePull.
    attach_image_pull_diagnostics(providers, inv, &namespace).await;
}

async fn attach_image_pull_diagnostics(providers: &Providers, inv: &mut Investigation, namespace: &str) {
    if inv.evidence.k8s.image_pull_diagnostics.is_some() {
        return;
    }
    let Some(pod_info) = inv.evidence.k8s.pod_info.clone() else {
        return;
    };

    let mut waiting_reason: Option<String> = None;
    let mut waiting_message: Option<String> = None;
    let mut waiting_container: Option<String> = None;
    for cs in &pod_info.container_statuses {
        if let Some(ContainerState::Waiting { reason, message }) = &cs.state {
            let r = reason.as_deref().unwrap_or("");
            if r == "ImagePullBackOff" || r == "ErrImagePull" {
                waiting_reason = Some(r.to_string());
                waiting_message = message.clone();
                waiting_container = Some(cs.name.clone());
                break;
            }
        }
    }
    let Some(reason) = waiting_reason else {
        return;
    };

    // Best-effort image ref: the waiting message first, the pod spec
    // container image as fallback.
    let msg = waiting_message.clone().unwrap_or_default();
    let mut image = extract_image_from_message(&msg);
    if image.is_none() {
        for c in &pod_info.containers {
            if let Some(wc) = &waiting_container {
                if &c.name != wc {
                    continue;
                }
            }
            if let Some(img) = c.image.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
                image = Some(img.to_string());
                break;
            }
        }
    }

    let img_ref = parse_image_ref(image.as_deref().unwrap_or(""));
    let (bucket, evidence) = classify_pull_error(&msg);

    let sa_name = pod_info.service_account_name.clone();
    let mut pull_secrets = None;
    if let Some(sa) = sa_name.as_deref() {
        match providers.k8s.service_account_info(namespace, sa).await {
            Ok(info) => pull_secrets = Some(info.image_pull_secrets),
            Err(e) => inv.push_error("pod_not_healthy: service account lookup", e),
        }
    }

    let mut ecr_check = None;
    if img_ref.is_ecr {
        if let (Some(_region), Some(repo)) = (&img_ref.ecr_region, &img_ref.repository) {
            ecr_check = Some(
                ecr_image(
                    &providers.aws,
                    repo,
                    img_ref.tag.as_deref(),
                    img_ref.digest.as_deref(),
                    img_ref.ecr_registry_id.as_deref(),
                )
                .await,
            );
        }
    }

    inv.evidence.k8s.image_pull_diagnostics = Some(ImagePullDiagnostics {
        container: waiting_container,
        waiting_reason: Some(reason),
        waiting_message: Some(msg.chars().take(400).collect()),
        error_bucket: Some(bucket.to_string()),
        error_evidence: Some(evidence),
        image: Some(img_ref.raw.clone()).filter(|s| !s.is_empty()).or(image),
        registry_host: img_ref.registry_host,
        repo: img_ref.repository,
        tag: img_ref.tag,
        digest: img_ref.digest,
        service_account_name: sa_name,
        service_account_image_pull_secrets: pull_secrets,
        ecr_check,
    });
}
