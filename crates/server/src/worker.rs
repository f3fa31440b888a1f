//! Job worker: consumes queue messages and drives the investigation
//! pipeline end to end.
//!
//! Every stage is try/continue so one bad alert never poisons the worker;
//! an unhandled failure in one message must not kill the process.

use chrono::Utc;
use futures::StreamExt;
use tracing::{error, info, warn};

use tarka_agent::enrich::attach_enrichment;
use tarka_agent::rca::attach_rca;
use tarka_agent::ChatPolicy;
use tarka_core::model::alert::normalize_webhook_alert;
use tarka_core::snapshot::analysis_snapshot;
use tarka_pipeline::investigate::{run_investigation, InvestigateOptions};
use tarka_pipeline::render_report;
use tarka_store::index::index_investigation_run;

use crate::identity::derive_identity;
use crate::queue::AlertJob;
use crate::state::AppState;

/// Age under which a rollout-noisy report is considered fresh.
const ROLLOUT_REFRESH_SECONDS: i64 = 3600;

/// Run `concurrency` parallel consumers until the process is stopped.
pub async fn run_worker(state: AppState) -> anyhow::Result<()> {
    let concurrency = state.settings.worker_concurrency;
    info!(concurrency, "starting worker");

    let mut tasks = Vec::new();
    for worker_id in 0..concurrency {
        let state = state.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                if let Err(e) = consume_loop(&state, worker_id).await {
                    error!(worker_id, error = %e, "consumer loop failed; reconnecting");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                }
            }
        }));
    }
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}

async fn consume_loop(state: &AppState, worker_id: usize) -> anyhow::Result<()> {
    let consumer = state.queue.consumer().await?;
    let mut messages = consumer.messages().await?;

    while let Some(message) = messages.next().await {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                warn!(worker_id, error = %e, "message receive failed");
                continue;
            }
        };

        // Worker-side panic isolation: one poisoned message must not take
        // the consumer down.
        let state = state.clone();
        let payload = message.payload.clone();
        let handled = tokio::spawn(async move { process_message(&state, &payload).await }).await;
        match handled {
            Ok(()) => {}
            Err(join_err) => error!(worker_id, error = %join_err, "message handler panicked"),
        }

        if let Err(e) = message.ack().await {
            warn!(worker_id, error = %e, "ack failed");
        }
    }
    Ok(())
}

async fn process_message(state: &AppState, payload: &[u8]) {
    let job: AlertJob = match serde_json::from_slice(payload) {
        Ok(job) => job,
        Err(e) => {
            error!(error = %e, "undecodable job payload; dropping");
            return;
        }
    };

    // Re-normalize and re-derive identity; the receiver's keys are not
    // trusted across versions.
    let alert = normalize_webhook_alert(&job.alert, job.parent_status.as_deref());
    let alertname = alert.name().to_string();
    let now = Utc::now();
    let env_cluster = state.settings.cluster_name.clone();

    let identity = match derive_identity(&state.providers.k8s, &alert, env_cluster.as_deref(), now).await {
        Ok(identity) => identity,
        Err(e) => {
            error!(alertname, error = %e, "identity derivation failed in worker");
            return;
        }
    };

    // Idempotency gate: plain identities skip when
    // the object exists; rollout identities re-check the freshness gate.
    if let Some(storage) = &state.storage {
        match storage.head_metadata(&identity.rel_key).await {
            Ok((true, last_modified)) => {
                if identity.rollout_refresh {
                    let age = last_modified.map(|t| (now - t).num_seconds());
                    if age.is_some_and(|a| a < ROLLOUT_REFRESH_SECONDS) {
                        info!(alertname, key = %identity.rel_key, age = ?age, "report fresh; skipping");
                        return;
                    }
                } else {
                    info!(alertname, key = %identity.rel_key, "report exists; skipping");
                    return;
                }
            }
            Ok((false, _)) => {}
            Err(e) => {
                // Can't determine freshness: run anyway (conservative).
                warn!(alertname, error = %e, "head_metadata failed; continuing");
            }
        }
    }

    // Pipeline.
    let options = InvestigateOptions {
        time_window: job.time_window.clone(),
        env_cluster,
        reference_time: None,
    };
    let mut investigation =
        run_investigation(&state.providers, &job.alert, job.parent_status.as_deref(), &options).await;

    // LLM stages (best-effort, only when a provider is configured): the
    // inbox gloss first, then the tool-using RCA loop.
    if state.llm.is_configured() {
        attach_enrichment(&state.llm, &mut investigation).await;
        let policy = ChatPolicy::for_rca();
        attach_rca(
            &state.providers,
            state.pool.as_ref(),
            &state.llm,
            &policy,
            &mut investigation,
        )
        .await;
    }

    let report_md = render_report(&investigation);
    let snapshot = analysis_snapshot(&investigation);

    // Object writes.
    let mut s3_report_key = None;
    let mut s3_investigation_key = None;
    if let Some(storage) = &state.storage {
        match storage.put_markdown(&identity.rel_key, &report_md).await {
            Ok(()) => {
                s3_report_key = Some(storage.key(&identity.rel_key));
                info!(alertname, key = %identity.rel_key, "report stored");
            }
            Err(e) => error!(alertname, error = %e, "report write failed"),
        }
        match storage.put_json(&identity.evidence_rel_key, &snapshot).await {
            Ok(()) => s3_investigation_key = Some(storage.key(&identity.evidence_rel_key)),
            Err(e) => warn!(alertname, error = %e, "evidence json write failed"),
        }
    }

    // Index: best-effort; the webhook response never depended on this.
    if let Some(pool) = &state.pool {
        if state.settings.memory_enabled {
            match index_investigation_run(
                pool,
                &investigation,
                &snapshot,
                s3_report_key.as_deref(),
                s3_investigation_key.as_deref(),
                Some(&report_md),
            )
            .await
            {
                Ok(result) => info!(
                    alertname,
                    case_id = %result.case_id,
                    run_id = %result.run_id,
                    match_reason = %result.case_match_reason,
                    "run indexed"
                ),
                Err(e) => warn!(alertname, error = %e, "indexing failed (non-fatal)"),
            }
        }
    }
}
