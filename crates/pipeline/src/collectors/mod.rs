//! Family-keyed evidence collectors.
//!
//! Contract: a collector takes `&Providers` and `&mut Investigation`,
//! populates evidence fields only when they are still empty (idempotence),
//! appends to `Investigation.errors` on failure, and never panics the
//! pipeline.

pub mod cpu_throttling;
pub mod crashloop;
pub mod historical;
pub mod http_5xx;
pub mod image_pull;
pub mod job_failure;
pub mod log_parser;
pub mod memory_pressure;
pub mod nonpod_baseline;
pub mod oom_killer;
pub mod pod_baseline;
pub mod pod_not_healthy;

use tarka_core::Investigation;

/// Validate the pod target; on a miss, record the gap and bail out of the
/// calling collector.
pub(crate) fn require_pod_target(inv: &mut Investigation, context: &str) -> Option<(String, String)> {
    if inv.target.has_pod_identity() {
        let pod = inv.target.pod.clone()?;
        let ns = inv.target.namespace.clone()?;
        Some((pod, ns))
    } else {
        inv.errors.push(format!(
            "{context}: missing pod/namespace target (add pod+namespace labels to alert)"
        ));
        None
    }
}

/// Container for the investigation: explicit target first, labels second.
pub(crate) fn container_from_investigation(inv: &Investigation) -> Option<String> {
    if let Some(c) = inv.target.container.clone() {
        return Some(c);
    }
    tarka_core::labels::extract_target_container(&inv.alert.labels)
}
