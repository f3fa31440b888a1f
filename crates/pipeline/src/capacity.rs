//! CPU capacity report with p95-based request right-sizing.

use std::collections::BTreeMap;

use tarka_core::family::Family;
use tarka_core::model::analysis::{CapacityReport, ContainerCapacity};
use tarka_core::model::evidence::PromSeries;
use tarka_core::Investigation;

/// Right-sizing rounds down to this millicore step.
const MILLICORE_STEP: i64 = 5;

fn percentile(vals: &mut Vec<f64>, p: f64) -> Option<f64> {
    if vals.is_empty() {
        return None;
    }
    vals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((vals.len() - 1) as f64 * p).round() as usize;
    vals.get(idx).copied()
}

fn millicores(cores: f64) -> i64 {
    (cores * 1000.0).round() as i64
}

/// Format cores as `250m` / `1.50 cores`.
#[must_use]
pub fn fmt_millicores(cores: f64) -> String {
    let m = millicores(cores);
    if m < 1000 {
        format!("{m}m")
    } else {
        format!("{:.2} cores", cores)
    }
}

fn round_down_millicores(cores: f64) -> i64 {
    let m = millicores(cores);
    (m / MILLICORE_STEP) * MILLICORE_STEP
}

fn values_by_container(series: &[PromSeries]) -> BTreeMap<String, Vec<f64>> {
    let mut out: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for s in series {
        let container = s
            .metric
            .get("container")
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());
        out.entry(container)
            .or_default()
            .extend(s.values.iter().map(|(_, v)| *v));
    }
    out
}

/// Build the capacity report for throttling/OOM/memory-pressure families.
/// No-op for other families or when CPU evidence is missing.
pub fn analyze_capacity(inv: &mut Investigation) {
    let family = tarka_core::family::detect_family(&inv.alert.labels);
    if !matches!(
        family,
        Family::CpuThrottling | Family::OomKilled | Family::MemoryPressure
    ) {
        return;
    }
    let Some(cpu) = &inv.evidence.metrics.cpu_metrics else {
        return;
    };

    let throttle_by_container = inv
        .evidence
        .metrics
        .throttling_data
        .as_ref()
        .map(|t| values_by_container(&t.series))
        .unwrap_or_default();

    let mut containers: Vec<ContainerCapacity> = Vec::new();
    for (container, mut usage) in values_by_container(&cpu.usage) {
        let p95 = percentile(&mut usage, 0.95);
        let throttle_p95 = throttle_by_container
            .get(&container)
            .map(|vals| {
                let mut v = vals.clone();
                percentile(&mut v, 0.95)
            })
            .unwrap_or(None);

        // Right-size only when we have both usage and a request, and usage
        // sits well under it. Headroom factor 1.3 on p95.
        let proposed = match (p95, cpu.request) {
            (Some(p95), Some(request)) if request > 0.0 && p95 * 1.3 < request * 0.8 => {
                let proposal = round_down_millicores(p95 * 1.3);
                if proposal >= MILLICORE_STEP {
                    Some(proposal)
                } else {
                    None
                }
            }
            _ => None,
        };

        let note = match (proposed, throttle_p95) {
            (Some(_), _) => Some("request oversized vs p95 usage".to_string()),
            (None, Some(t)) if t >= 25.0 => Some("heavy throttling at p95".to_string()),
            _ => None,
        };

        containers.push(ContainerCapacity {
            container,
            cpu_usage_p95_cores: p95,
            cpu_request_cores: cpu.request,
            cpu_limit_cores: cpu.limit,
            throttle_p95_pct: throttle_p95,
            proposed_request_millicores: proposed,
            note,
        });
    }

    if containers.is_empty() {
        return;
    }

    let summary = containers
        .iter()
        .filter_map(|c| {
            c.proposed_request_millicores.map(|m| {
                format!(
                    "{}: request {} -> {}m (p95 {})",
                    c.container,
                    c.cpu_request_cores.map_or_else(|| "unset".to_string(), fmt_millicores),
                    m,
                    c.cpu_usage_p95_cores.map_or_else(|| "?".to_string(), fmt_millicores),
                )
            })
        })
        .collect::<Vec<_>>()
        .join("; ");

    inv.analysis.capacity = Some(CapacityReport {
        containers,
        summary: if summary.is_empty() { None } else { Some(summary) },
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap as Map;
    use tarka_core::model::alert::{Alert, AlertState};
    use tarka_core::model::evidence::UsageAndLimits;
    use tarka_core::model::target::Target;

    fn inv(alertname: &str) -> Investigation {
        let mut labels = Map::new();
        labels.insert("alertname".to_string(), alertname.to_string());
        let alert = Alert {
            fingerprint: "fp".to_string(),
            labels,
            annotations: Map::new(),
            starts_at: None,
            ends_at: None,
            generator_url: String::new(),
            state: AlertState::Firing,
        };
        Investigation::new(alert, Target::default(), "1h", Utc::now())
    }

    fn usage_series(container: &str, values: &[f64]) -> PromSeries {
        let mut metric = Map::new();
        metric.insert("container".to_string(), container.to_string());
        PromSeries {
            metric,
            values: values.iter().enumerate().map(|(i, v)| (i as f64, *v)).collect(),
        }
    }

    #[test]
    fn test_fmt_millicores() {
        assert_eq!(fmt_millicores(0.25), "250m");
        assert_eq!(fmt_millicores(1.5), "1.50 cores");
    }

    #[test]
    fn test_rightsizing_proposal() {
        let mut i = inv("CPUThrottlingHigh");
        i.evidence.metrics.cpu_metrics = Some(UsageAndLimits {
            usage: vec![usage_series("app", &[0.05, 0.06, 0.055])],
            limit: Some(1.0),
            request: Some(0.5),
            query_used: None,
        });
        analyze_capacity(&mut i);
        let cap = i.analysis.capacity.unwrap();
        let c = &cap.containers[0];
        let proposed = c.proposed_request_millicores.unwrap();
        // p95*1.3 of ~60m usage lands well under the 500m request.
        assert!(proposed < 500);
        assert_eq!(proposed % MILLICORE_STEP, 0);
        assert!(cap.summary.is_some());
    }

    #[test]
    fn test_no_proposal_when_sized_right() {
        let mut i = inv("CPUThrottlingHigh");
        i.evidence.metrics.cpu_metrics = Some(UsageAndLimits {
            usage: vec![usage_series("app", &[0.45, 0.48])],
            limit: Some(1.0),
            request: Some(0.5),
            query_used: None,
        });
        analyze_capacity(&mut i);
        let cap = i.analysis.capacity.unwrap();
        assert!(cap.containers[0].proposed_request_millicores.is_none());
    }

    #[test]
    fn test_non_capacity_family_skipped() {
        let mut i = inv("CrashLoopBackOff");
        i.evidence.metrics.cpu_metrics = Some(UsageAndLimits::default());
        analyze_capacity(&mut i);
        assert!(i.analysis.capacity.is_none());
    }
}
