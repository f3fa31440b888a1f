//! Report store: object storage (Markdown + evidence JSON) and the
//! relational case/run index.
//!
//! All writes are best-effort from the caller's perspective: the webhook
//! response never depends on indexing success, and HEAD-before-PUT keeps
//! object writes idempotent.

pub mod actions;
pub mod cases;
pub mod chat;
pub mod index;
pub mod object;
pub mod retrieval;
pub mod schema;
pub mod skills;

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub use object::{sanitize_path_component, ObjectStorage, StorageConfig};

/// Postgres connection settings (`POSTGRES_*` env).
#[derive(Debug, Clone, Default)]
pub struct PostgresConfig {
    pub host: Option<String>,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub sslmode: Option<String>,
}

impl PostgresConfig {
    /// Load from env; `None` when no host is configured (memory features
    /// degrade gracefully).
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("POSTGRES_HOST").ok().filter(|s| !s.trim().is_empty())?;
        Some(Self {
            host: Some(host),
            port: std::env::var("POSTGRES_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5432),
            database: std::env::var("POSTGRES_DB").unwrap_or_else(|_| "tarka".to_string()),
            user: std::env::var("POSTGRES_USER").unwrap_or_else(|_| "tarka".to_string()),
            password: std::env::var("POSTGRES_PASSWORD").unwrap_or_default(),
            sslmode: std::env::var("POSTGRES_SSLMODE").ok().filter(|s| !s.trim().is_empty()),
        })
    }

    /// DSN for sqlx.
    #[must_use]
    pub fn dsn(&self) -> Option<String> {
        let host = self.host.as_deref()?;
        let mut dsn = format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, host, self.port, self.database
        );
        if let Some(ssl) = &self.sslmode {
            dsn.push_str(&format!("?sslmode={ssl}"));
        }
        Some(dsn)
    }
}

/// Connect a pool and optionally run the embedded bootstrap DDL
/// (`DB_AUTO_MIGRATE=true`).
pub async fn connect_pool(config: &PostgresConfig) -> Result<PgPool> {
    let dsn = config.dsn().context("Postgres not configured")?;
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&dsn)
        .await
        .context("Failed to connect to Postgres")?;

    if std::env::var("DB_AUTO_MIGRATE").as_deref() == Ok("true") {
        schema::bootstrap(&pool).await?;
    }
    Ok(pool)
}
