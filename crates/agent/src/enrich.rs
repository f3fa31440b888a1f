//! Report-time enrichment (`tarka.enrich.v1`).
//!
//! One cheap structured call that glosses the deterministic analysis for
//! inbox rows. Unlike RCA it uses no tools and runs on every indexed run
//! when an LLM is configured; failures leave the analysis untouched.

use serde_json::Value;
use tracing::debug;

use tarka_core::model::analysis::EnrichmentInsights;
use tarka_core::snapshot::analysis_snapshot;
use tarka_core::Investigation;
use tarka_llm::{EnrichmentResponse, LlmClient};

use crate::prompts::compact_case_context;

fn build_enrichment_prompt(analysis_json: &Value) -> String {
    let ctx = compact_case_context(analysis_json);
    format!(
        "You are Tarka, an on-call incident investigation agent.\n\n\
         Task: write a compact gloss of this already-analyzed case for an\n\
         incident inbox row.\n\n\
         Hard constraints (must follow):\n\
         - Use ONLY the provided CASE JSON.\n\
         - Do NOT invent logs/metrics/events or root causes.\n\
         - Cite evidence keys where useful (e.g. features.k8s.waiting_reason).\n\
         - Return ONLY valid JSON. No markdown. No code fences.\n\n\
         Output JSON schema (exact keys):\n\
         {{\n  \"schema_version\": \"tarka.enrich.v1\",\n  \"summary\": string,\n  \"likely_root_cause\": string,\n  \"confidence\": number,\n  \"evidence\": [string],\n  \"next_steps\": [string],\n  \"unknowns\": [string]\n}}\n\
         Output constraints:\n\
         - `summary` <= 200 chars, `likely_root_cause` <= 200 chars.\n\
         - confidence in [0,1]; lists <= 5 items.\n\n\
         CASE:\n{case}\n",
        case = ctx,
    )
}

/// Attach `analysis.enrichment`, best-effort.
pub async fn attach_enrichment(llm: &LlmClient, investigation: &mut Investigation) {
    if !llm.is_configured() {
        return;
    }
    let aj = analysis_snapshot(investigation);
    let prompt = build_enrichment_prompt(&aj);
    match llm.generate_json::<EnrichmentResponse>(&prompt).await {
        Ok(resp) => {
            let label = if resp.summary.is_empty() {
                None
            } else {
                Some(resp.summary.chars().take(80).collect::<String>())
            };
            investigation.analysis.enrichment = Some(EnrichmentInsights {
                label,
                summary: Some(resp.summary).filter(|s| !s.is_empty()),
                likely_root_cause: Some(resp.likely_root_cause).filter(|s| !s.is_empty()),
                confidence: Some(resp.confidence),
                next_steps: resp.next_steps,
            });
        }
        Err(code) => debug!(error = %code, "enrichment skipped"),
    }
}
