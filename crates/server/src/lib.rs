//! Tarka server library: webhook receiver, job worker, console API.
//!
//! The `tarka` binary is a thin clap wrapper over [`serve`] and
//! [`worker::run_worker`].

pub mod config;
pub mod console;
pub mod identity;
pub mod queue;
pub mod routes;
pub mod sse;
pub mod state;
pub mod webhook;
pub mod worker;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use tarka_agent::{ActionPolicy, ChatPolicy};
use tarka_llm::LlmClient;
use tarka_providers::Providers;
use tarka_store::{connect_pool, ObjectStorage, PostgresConfig, StorageConfig};

use config::Settings;
use queue::{QueueClient, QueueConfig};
use state::AppState;

/// Build shared state from environment configuration. Optional backends
/// (Postgres, S3) degrade features; an unreachable queue is fatal.
pub async fn build_state() -> Result<AppState> {
    let settings = Settings::from_env();
    let providers = Providers::from_env().await?;

    // The receiver is enqueue-only: an unreachable queue is fatal at
    // startup rather than a 500 at request time.
    let queue = QueueClient::connect(QueueConfig::from_env())
        .await
        .context("queue warm-up failed")?;

    let storage = match StorageConfig::from_env() {
        Some(config) => Some(ObjectStorage::cached(config).await),
        None => {
            warn!("S3_BUCKET not set; report storage disabled");
            None
        }
    };

    let pool = match PostgresConfig::from_env() {
        Some(config) => match connect_pool(&config).await {
            Ok(pool) => Some(pool),
            Err(e) => {
                warn!(error = %e, "Postgres unavailable; memory features disabled");
                None
            }
        },
        None => None,
    };

    Ok(AppState {
        settings,
        providers,
        queue,
        storage,
        pool,
        llm: LlmClient::from_env(),
        chat_policy: Arc::new(ChatPolicy::from_env()),
        action_policy: Arc::new(ActionPolicy::from_env()),
    })
}

/// Serve the HTTP surface until shutdown.
pub async fn serve(state: AppState) -> Result<()> {
    let bind = state.settings.bind.clone();
    let router = routes::build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(%bind, "serving");
    axum::serve(listener, router).await.context("server error")?;
    Ok(())
}
