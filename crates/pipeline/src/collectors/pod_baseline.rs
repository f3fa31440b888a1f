//! Shared pod-scoped baseline evidence collector.

use tarka_core::model::evidence::{RangeResult, UsageAndLimits};
use tarka_core::Investigation;
use tarka_providers::Providers;

use super::log_parser::parse_log_entries;
use super::{container_from_investigation, require_pod_target};

/// Cap on fetched log entries: crashloop-ish families often show only
/// startup banners in a 100-line tail, so we parse a larger window and let
/// the report renderer select an actionable snippet.
pub const LOG_FETCH_LIMIT: usize = 400;

/// Full pod baseline: K8s context, phase/restart/cpu/memory metrics,
/// recent logs and the deterministic log parse.
pub async fn collect_pod_baseline(providers: &Providers, inv: &mut Investigation, events_limit: usize) {
    if inv.target.playbook.is_none() {
        inv.target.playbook = Some("default".to_string());
    }
    let Some((pod, namespace)) = require_pod_target(inv, "pod_baseline") else {
        return;
    };
    let start = inv.time_window.start_time;
    let end = inv.time_window.end_time;
    let container = container_from_investigation(inv);

    // K8s context
    if inv.evidence.k8s.pod_info.is_none() {
        apply_k8s_context(providers, inv, &pod, &namespace, events_limit).await;
    }

    // Metrics baseline
    if inv.evidence.metrics.pod_phase_signal.is_none() {
        match providers.prom.query_pod_not_healthy(&namespace, &pod, start, end).await {
            Ok((series, query)) => {
                inv.evidence.metrics.pod_phase_signal =
                    Some(RangeResult { series, query_used: Some(query) });
            }
            Err(e) => inv.push_error("Failed to query pod phase signal", e),
        }
    }

    if inv.evidence.metrics.restart_data.is_none() {
        match providers
            .prom
            .query_pod_restarts(&namespace, &pod, start, end, container.as_deref())
            .await
        {
            Ok((series, query)) => {
                inv.evidence.metrics.restart_data =
                    Some(RangeResult { series, query_used: Some(query) });
            }
            Err(e) => inv.push_error("Failed to query restart signal", e),
        }
    }

    if inv.evidence.metrics.cpu_metrics.is_none() {
        match providers
            .prom
            .query_cpu_usage_and_limits(&pod, &namespace, start, end, container.as_deref())
            .await
        {
            Ok((usage, limit, request, query)) => {
                inv.evidence.metrics.cpu_metrics = Some(UsageAndLimits {
                    usage,
                    limit,
                    request,
                    query_used: Some(query),
                });
            }
            Err(e) => inv.push_error("Failed to query CPU metrics", e),
        }
    }

    if inv.evidence.metrics.memory_metrics.is_none() {
        match providers
            .prom
            .query_memory_usage_and_limits(&pod, &namespace, start, end, container.as_deref())
            .await
        {
            Ok((usage, limit, request, query)) => {
                inv.evidence.metrics.memory_metrics = Some(UsageAndLimits {
                    usage,
                    limit,
                    request,
                    query_used: Some(query),
                });
            }
            Err(e) => inv.push_error("Failed to query memory metrics", e),
        }
    }

    // Logs baseline (skip if a fetch was already attempted)
    if inv.evidence.logs.logs_status.is_none() && inv.evidence.logs.logs.is_empty() {
        let result = providers
            .logs
            .fetch_recent_logs(&pod, &namespace, start, end, container.as_deref(), LOG_FETCH_LIMIT)
            .await;
        inv.evidence.logs.logs = result.entries;
        inv.evidence.logs.logs_status = Some(result.status);
        inv.evidence.logs.logs_reason = result.reason;
        inv.evidence.logs.logs_backend = Some(result.backend);
        inv.evidence.logs.logs_query = result.query_used;
    }

    // Deterministic parse for ERROR/FATAL/Exception patterns
    if !inv.evidence.logs.logs.is_empty() && inv.evidence.logs.parsed_errors.is_empty() {
        let parsed = parse_log_entries(&inv.evidence.logs.logs, 50);
        inv.evidence.logs.parsed_errors = parsed.parsed_errors;
        inv.evidence.logs.parsing_metadata = Some(parsed.metadata);
    }
}

/// Populate the K8s context block (pod info, conditions, events, owner
/// chain, rollout status) with per-call error accounting.
pub async fn apply_k8s_context(
    providers: &Providers,
    inv: &mut Investigation,
    pod: &str,
    namespace: &str,
    events_limit: usize,
) {
    match providers.k8s.pod_info(pod, namespace).await {
        Ok(info) => inv.evidence.k8s.pod_info = Some(info),
        Err(e) => inv.push_error("K8s context: pod_info", e),
    }
    match providers.k8s.pod_conditions(pod, namespace).await {
        Ok(conditions) => inv.evidence.k8s.pod_conditions = conditions,
        Err(e) => inv.push_error("K8s context: pod_conditions", e),
    }
    match providers.k8s.pod_events(pod, namespace, events_limit).await {
        Ok(events) => inv.evidence.k8s.pod_events = events,
        Err(e) => inv.push_error("K8s context: pod_events", e),
    }
    match providers.k8s.pod_owner_chain(pod, namespace).await {
        Ok(chain) => {
            if let Some(wl) = &chain.workload {
                if inv.target.workload_kind.is_none() {
                    inv.target.workload_kind = Some(wl.kind.clone());
                    inv.target.workload_name = Some(wl.name.clone());
                }
                match providers
                    .k8s
                    .workload_rollout_status(namespace, &wl.kind, &wl.name)
                    .await
                {
                    Ok(rs) => inv.evidence.k8s.rollout_status = Some(rs),
                    Err(e) => inv.push_error("K8s context: rollout_status", e),
                }
            }
            inv.evidence.k8s.owner_chain = Some(chain);
        }
        Err(e) => inv.push_error("K8s context: owner_chain", e),
    }
}
