//! OOM killer evidence collector.

use tarka_core::model::evidence::OomHint;
use tarka_core::Investigation;
use tarka_providers::Providers;

use super::pod_baseline::collect_pod_baseline;
use super::require_pod_target;

pub async fn collect_oom_killer(providers: &Providers, inv: &mut Investigation) {
    inv.target.playbook = Some("oom_killer".to_string());
    if require_pod_target(inv, "oom_killer").is_none() {
        return;
    }
    collect_pod_baseline(providers, inv, 50).await;

    if inv.evidence.k8s.oom_hint.is_none() {
        let labels = &inv.alert.labels;
        let annotations = &inv.alert.annotations;
        inv.evidence.k8s.oom_hint = Some(OomHint {
            container: labels
                .get("container")
                .or_else(|| labels.get("Container"))
                .cloned(),
            summary: annotations.get("summary").cloned(),
            description: annotations.get("description").cloned(),
        });
    }
}
