//! Memory pressure evidence collector: pod baseline only.

use tarka_core::Investigation;
use tarka_providers::Providers;

use super::pod_baseline::collect_pod_baseline;
use super::require_pod_target;

pub async fn collect_memory_pressure(providers: &Providers, inv: &mut Investigation) {
    inv.target.playbook = Some("memory_pressure".to_string());
    if require_pod_target(inv, "memory_pressure").is_none() {
        return;
    }
    collect_pod_baseline(providers, inv, 20).await;
}
