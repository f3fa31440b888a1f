//! Object storage: Markdown reports plus evidence JSON in S3.
//!
//! Two keys per run under a configured prefix:
//! `{prefix}/{sanitized_alertname}/{identity}.md` and the same `.json`.
//! HEAD-before-PUT keeps writes idempotent; `head_metadata` powers the
//! rollout freshness gate.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;

static SANITIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("static pattern"));

/// Replace unsafe path characters with `_`; empty becomes `unknown`.
#[must_use]
pub fn sanitize_path_component(value: &str) -> String {
    let v = value.trim();
    if v.is_empty() {
        return "unknown".to_string();
    }
    SANITIZE_RE.replace_all(v, "_").into_owned()
}

/// Storage location settings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageConfig {
    pub bucket: String,
    pub prefix: String,
}

impl StorageConfig {
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let bucket = std::env::var("S3_BUCKET").ok().filter(|s| !s.trim().is_empty())?;
        Some(Self {
            bucket,
            prefix: std::env::var("S3_PREFIX").unwrap_or_else(|_| "reports".to_string()),
        })
    }
}

/// S3-backed report storage.
#[derive(Clone)]
pub struct ObjectStorage {
    client: aws_sdk_s3::Client,
    config: StorageConfig,
}

// One cached storage handle per (bucket, prefix); first use initializes.
static STORAGE_CACHE: LazyLock<Mutex<HashMap<StorageConfig, ObjectStorage>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

impl ObjectStorage {
    #[must_use]
    pub fn new(client: aws_sdk_s3::Client, config: StorageConfig) -> Self {
        Self { client, config }
    }

    /// Cached handle per `(bucket, prefix)`.
    pub async fn cached(config: StorageConfig) -> Self {
        if let Some(existing) = STORAGE_CACHE.lock().expect("storage cache lock").get(&config) {
            return existing.clone();
        }
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest()).load().await;
        let storage = Self::new(aws_sdk_s3::Client::new(&sdk_config), config.clone());
        STORAGE_CACHE
            .lock()
            .expect("storage cache lock")
            .insert(config, storage.clone());
        storage
    }

    /// Full object key for a relative report key.
    #[must_use]
    pub fn key(&self, rel_key: &str) -> String {
        format!("{}/{rel_key}", self.config.prefix.trim_end_matches('/'))
    }

    /// HEAD: does the object exist?
    pub async fn exists(&self, rel_key: &str) -> Result<bool> {
        Ok(self.head_metadata(rel_key).await?.0)
    }

    /// HEAD with last-modified, for the rollout 1h freshness gate.
    pub async fn head_metadata(&self, rel_key: &str) -> Result<(bool, Option<DateTime<Utc>>)> {
        let key = self.key(rel_key);
        match self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(out) => {
                let last_modified = out
                    .last_modified()
                    .and_then(|t| DateTime::from_timestamp(t.secs(), 0));
                Ok((true, last_modified))
            }
            Err(e) => {
                let msg = format!("{e}");
                if e.raw_response().map(|r| r.status().as_u16()) == Some(404)
                    || msg.contains("NotFound")
                {
                    Ok((false, None))
                } else {
                    Err(anyhow::anyhow!("head_object failed: {msg}"))
                }
            }
        }
    }

    /// PUT a Markdown report.
    pub async fn put_markdown(&self, rel_key: &str, markdown: &str) -> Result<()> {
        self.put_bytes(rel_key, markdown.as_bytes().to_vec(), "text/markdown")
            .await
    }

    /// PUT the evidence JSON.
    pub async fn put_json(&self, rel_key: &str, value: &Value) -> Result<()> {
        let body = serde_json::to_vec(value).context("serialize evidence json")?;
        self.put_bytes(rel_key, body, "application/json").await
    }

    async fn put_bytes(&self, rel_key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let key = self.key(rel_key);
        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .content_type(content_type)
            .body(aws_sdk_s3::primitives::ByteStream::from(body))
            .send()
            .await
            .with_context(|| format!("put_object failed for {key}"))?;
        Ok(())
    }

    /// GET a stored object as text (report read path).
    pub async fn get_text(&self, rel_key: &str) -> Result<String> {
        let key = self.key(rel_key);
        let out = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .send()
            .await
            .with_context(|| format!("get_object failed for {key}"))?;
        let bytes = out.body.collect().await.context("read object body")?;
        Ok(String::from_utf8_lossy(&bytes.into_bytes()).into_owned())
    }
}

/// Build the relative report key for an alert identity.
#[must_use]
pub fn report_rel_key(alertname: &str, identity: &str) -> String {
    format!("{}/{identity}.md", sanitize_path_component(alertname))
}

/// Build the relative evidence-JSON key for an alert identity.
///
/// Always derived from the same `(alertname, identity)` inputs as
/// [`report_rel_key`] so the two objects of a run can never land under
/// different sanitized paths (alertnames may legally contain `.md`).
#[must_use]
pub fn evidence_rel_key(alertname: &str, identity: &str) -> String {
    format!("{}/{identity}.json", sanitize_path_component(alertname))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize_path_component("KubeJobFailed"), "KubeJobFailed");
        assert_eq!(sanitize_path_component("weird name/with:stuff"), "weird_name_with_stuff");
        assert_eq!(sanitize_path_component("  "), "unknown");
        assert_eq!(sanitize_path_component("a.b-c_d"), "a.b-c_d");
    }

    #[test]
    fn test_report_rel_key() {
        assert_eq!(report_rel_key("KubeJobFailed", "abc123"), "KubeJobFailed/abc123.md");
        assert_eq!(report_rel_key("bad name", "k"), "bad_name/k.md");
    }

    #[test]
    fn test_report_and_evidence_keys_share_a_path() {
        // Sanitization keeps literal dots, so an alertname containing
        // ".md" must not split the pair onto different directories.
        let alertname = "KubernetesPodHealthy.mdAlert";
        let md = report_rel_key(alertname, "abc123");
        let json = evidence_rel_key(alertname, "abc123");
        assert_eq!(md, "KubernetesPodHealthy.mdAlert/abc123.md");
        assert_eq!(json, "KubernetesPodHealthy.mdAlert/abc123.json");
        assert_eq!(
            md.rsplit_once('/').map(|(dir, _)| dir),
            json.rsplit_once('/').map(|(dir, _)| dir),
        );
    }
}
