//! Tarka: on-call assistant turning Alertmanager webhooks into grounded,
//! deduplicated investigation reports with tool-using chat and RCA.

use anyhow::Result;
use clap::{Parser, Subcommand};

use tarka_server::{build_state, serve, worker};

/// On-call assistant: alert ingestion, investigation pipeline, case chat.
#[derive(Parser)]
#[command(name = "tarka")]
#[command(about = "On-call assistant: alert ingestion, investigation pipeline, case chat")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook receiver + console API server
    Serve,
    /// Run the queue worker (investigations, reports, RCA)
    Worker,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let state = build_state().await?;

    match cli.command {
        Commands::Serve => serve(state).await,
        Commands::Worker => worker::run_worker(state).await,
    }
}
