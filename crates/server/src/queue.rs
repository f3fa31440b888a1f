//! JetStream queue client.
//!
//! Publish-side dedupe uses `Nats-Msg-Id` with a duplicate window wider
//! than the 4h identity bucket, making queue-level dedupe the
//! authoritative layer. The receiver is enqueue-only; a failed warm-up is
//! fatal so it never accepts traffic it cannot durably queue.

use std::time::Duration;

use anyhow::{Context, Result};
use async_nats::jetstream::{self, consumer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

/// One queued investigation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertJob {
    /// The raw webhook alert object, re-normalized by the worker.
    pub alert: Value,
    pub time_window: String,
    pub parent_status: Option<String>,
}

/// Queue connection settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub url: String,
    pub stream: String,
    pub subject: String,
    pub durable: String,
}

impl QueueConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("NATS_URL").unwrap_or_else(|_| "nats://127.0.0.1:4222".to_string()),
            stream: std::env::var("NATS_STREAM").unwrap_or_else(|_| "TARKA_ALERTS".to_string()),
            subject: std::env::var("NATS_SUBJECT").unwrap_or_else(|_| "tarka.alerts.jobs".to_string()),
            durable: std::env::var("NATS_DURABLE").unwrap_or_else(|_| "tarka-worker".to_string()),
        }
    }
}

/// JetStream publisher/consumer.
#[derive(Clone)]
pub struct QueueClient {
    js: jetstream::Context,
    config: QueueConfig,
}

impl QueueClient {
    /// Connect and ensure the stream exists. Fails fast when the queue is
    /// unreachable.
    pub async fn connect(config: QueueConfig) -> Result<Self> {
        let client = async_nats::connect(&config.url)
            .await
            .with_context(|| format!("Failed to connect to NATS at {}", config.url))?;
        let js = jetstream::new(client);

        js.get_or_create_stream(jetstream::stream::Config {
            name: config.stream.clone(),
            subjects: vec![config.subject.clone()],
            // Wider than the 4h identity bucket so queue dedupe is the
            // authoritative layer.
            duplicate_window: Duration::from_secs(5 * 3600),
            max_age: Duration::from_secs(24 * 3600),
            ..jetstream::stream::Config::default()
        })
        .await
        .context("Failed to ensure JetStream stream")?;

        info!(stream = %config.stream, subject = %config.subject, "queue ready");
        Ok(Self { js, config })
    }

    /// Publish a job with its dedupe msg-id.
    pub async fn enqueue(&self, job: &AlertJob, msg_id: &str) -> Result<()> {
        let payload = serde_json::to_vec(job).context("serialize alert job")?;
        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Nats-Msg-Id", msg_id);
        self.js
            .publish_with_headers(self.config.subject.clone(), headers, payload.into())
            .await
            .context("publish alert job")?
            .await
            .context("await publish ack")?;
        Ok(())
    }

    /// Durable pull consumer for the worker.
    pub async fn consumer(&self) -> Result<consumer::PullConsumer> {
        let stream = self
            .js
            .get_stream(&self.config.stream)
            .await
            .context("get stream")?;
        let consumer = stream
            .get_or_create_consumer(
                &self.config.durable,
                consumer::pull::Config {
                    durable_name: Some(self.config.durable.clone()),
                    ack_policy: consumer::AckPolicy::Explicit,
                    max_deliver: 3,
                    ..consumer::pull::Config::default()
                },
            )
            .await
            .context("get or create consumer")?;
        Ok(consumer)
    }
}
