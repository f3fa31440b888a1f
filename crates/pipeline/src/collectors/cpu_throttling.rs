//! CPU throttling evidence collector.

use tarka_core::model::evidence::RangeResult;
use tarka_core::Investigation;
use tarka_providers::Providers;

use super::pod_baseline::collect_pod_baseline;
use super::{container_from_investigation, require_pod_target};

pub async fn collect_cpu_throttling(providers: &Providers, inv: &mut Investigation) {
    inv.target.playbook = Some("cpu_throttling".to_string());
    let Some((pod, namespace)) = require_pod_target(inv, "cpu_throttling") else {
        return;
    };
    let start = inv.time_window.start_time;
    let end = inv.time_window.end_time;

    collect_pod_baseline(providers, inv, 20).await;
    let container = container_from_investigation(inv);

    if inv.evidence.metrics.throttling_data.is_none() {
        match providers
            .prom
            .query_cpu_throttling(&pod, &namespace, start, end, container.as_deref())
            .await
        {
            Ok((series, query)) => {
                inv.evidence.metrics.throttling_data =
                    Some(RangeResult { series, query_used: Some(query) });
            }
            Err(e) => inv.push_error("Failed to query throttling", e),
        }
    }
}
