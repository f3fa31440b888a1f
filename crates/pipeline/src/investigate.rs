//! The investigation pipeline entry point.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use tarka_core::labels::extract_target;
use tarka_core::model::alert::normalize_webhook_alert;
use tarka_core::snapshot::analysis_snapshot;
use tarka_core::Investigation;
use tarka_providers::Providers;

use crate::capacity::analyze_capacity;
use crate::change::correlate_changes;
use crate::diagnostics::default_modules;
use crate::features::extract_features;
use crate::scoring::{assess_noise, compute_scores, render_verdict};

/// Options for one pipeline run.
#[derive(Debug, Clone)]
pub struct InvestigateOptions {
    /// Window label, e.g. `1h`.
    pub time_window: String,
    /// `CLUSTER_NAME` when the alert has no cluster label.
    pub env_cluster: Option<String>,
    /// Anchor for the window end. Historical reruns pass the alert start;
    /// live reruns pass now.
    pub reference_time: Option<DateTime<Utc>>,
}

impl InvestigateOptions {
    #[must_use]
    pub fn new(time_window: impl Into<String>) -> Self {
        Self {
            time_window: time_window.into(),
            env_cluster: None,
            reference_time: None,
        }
    }
}

/// Run the full deterministic pipeline for a raw webhook alert.
///
/// Stages (each best-effort): normalize → detect family/target → route
/// collectors → features → hypotheses → scores/verdict → change
/// correlation + capacity. Never panics; failures accumulate in
/// `Investigation.errors`.
pub async fn run_investigation(
    providers: &Providers,
    raw_alert: &Value,
    parent_status: Option<&str>,
    options: &InvestigateOptions,
) -> Investigation {
    // Stage 1: normalize and construct.
    let alert = normalize_webhook_alert(raw_alert, parent_status);
    let target = extract_target(&alert, options.env_cluster.as_deref());
    let end = options.reference_time.unwrap_or_else(Utc::now);
    let mut inv = Investigation::new(alert, target, &options.time_window, end);

    info!(
        alertname = inv.alert.name(),
        target = inv.target.display_name(),
        window = %inv.time_window.window,
        "running investigation"
    );

    // Stages 2-3: route through the family's collector(s). Collectors run
    // sequentially in registry order; idempotence makes re-entry safe.
    let modules = default_modules();
    let mut routed = false;
    for module in &modules {
        if module.applies(&inv) {
            debug!(module = module.module_id(), "collector routed");
            module.collect(providers, &mut inv).await;
            routed = true;
        }
    }
    if !routed {
        // Generic alerts still get a baseline so the report is useful.
        if inv.target.has_pod_identity() {
            crate::collectors::pod_baseline::collect_pod_baseline(providers, &mut inv, 20).await;
        } else {
            crate::collectors::nonpod_baseline::collect_nonpod_baseline(providers, &mut inv).await;
        }
    }

    // Stage 4: features.
    let features = extract_features(&inv);
    inv.analysis.features = Some(features.clone());

    // Stage 5: hypotheses, best first.
    let mut hypotheses = Vec::new();
    for module in &modules {
        if module.applies(&inv) {
            hypotheses.extend(module.diagnose(&inv));
        }
    }
    hypotheses.sort_by(|a, b| b.confidence_0_100.cmp(&a.confidence_0_100));
    inv.analysis.hypotheses = hypotheses;

    // Stage 6: scores + verdict.
    let scores = compute_scores(&features, &inv.analysis.hypotheses);
    inv.analysis.noise = Some(assess_noise(&features, &scores));
    inv.analysis.verdict = Some(render_verdict(&inv, &features, &scores));
    inv.analysis.scores = Some(scores);

    // Stage 7: change correlation + capacity (best-effort, read-only).
    correlate_changes(providers, &mut inv).await;
    analyze_capacity(&mut inv);

    inv
}

/// Build the versioned SSOT snapshot for a finished investigation.
#[must_use]
pub fn snapshot(inv: &Investigation) -> Value {
    analysis_snapshot(inv)
}
