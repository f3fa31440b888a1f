//! GitHub read-only client for change correlation and chat tools.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use octocrab::Octocrab;
use serde::Serialize;
use serde_json::{json, Value};

use crate::catalog::ServiceCatalog;

/// How a repo reference was resolved from tool args.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoResolution {
    Args,
    ServiceCatalog,
    NamingConvention,
    ArgsCleaned,
    NotFound,
}

impl RepoResolution {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Args => "args",
            Self::ServiceCatalog => "service_catalog",
            Self::NamingConvention => "naming_convention",
            Self::ArgsCleaned => "args_cleaned",
            Self::NotFound => "not_found",
        }
    }
}

/// Configuration for the GitHub client.
#[derive(Debug, Clone, Default)]
pub struct GithubConfig {
    pub token: String,
    /// Default org for bare workload names (`GITHUB_ORG`).
    pub org: Option<String>,
}

/// GitHub client wrapping octocrab.
pub struct GithubClient {
    client: Octocrab,
    config: GithubConfig,
    catalog: ServiceCatalog,
}

/// Strip generated suffixes from a workload name
/// (`payments-api-5d4f7c9b8-xk2lp` -> `payments-api`).
fn clean_workload_name(name: &str) -> String {
    let re = regex::Regex::new(r"(-[a-f0-9]{8,10})?(-[a-z0-9]{5})?$").expect("static pattern");
    re.replace(name.trim(), "").to_string()
}

impl GithubClient {
    pub fn new(config: GithubConfig, catalog: ServiceCatalog) -> Result<Self> {
        let client = Octocrab::builder()
            .personal_token(config.token.clone())
            .build()
            .context("Failed to create GitHub client")?;
        Ok(Self { client, config, catalog })
    }

    /// Build from `GITHUB_TOKEN` / `GITHUB_ORG` / `SERVICE_CATALOG_PATH`.
    /// Returns `None` when no token is configured.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.trim().is_empty())?;
        let config = GithubConfig {
            token,
            org: std::env::var("GITHUB_ORG").ok().filter(|o| !o.trim().is_empty()),
        };
        Self::new(config, ServiceCatalog::from_env()).ok()
    }

    /// Resolve a repo reference: explicit `org/repo` wins, then the
    /// service catalog, then `GITHUB_ORG/<name>`, then the cleaned name.
    #[must_use]
    pub fn resolve_repo(&self, reference: &str) -> (Option<String>, RepoResolution) {
        let r = reference.trim();
        if r.is_empty() {
            return (None, RepoResolution::NotFound);
        }
        if r.contains('/') {
            return (Some(r.to_string()), RepoResolution::Args);
        }
        if let Some(repo) = self.catalog.lookup(r) {
            return (Some(repo.to_string()), RepoResolution::ServiceCatalog);
        }
        if let Some(org) = &self.config.org {
            return (Some(format!("{org}/{r}")), RepoResolution::NamingConvention);
        }
        let cleaned = clean_workload_name(r);
        if cleaned != r {
            if let Some(repo) = self.catalog.lookup(&cleaned) {
                return (Some(repo.to_string()), RepoResolution::ArgsCleaned);
            }
        }
        (None, RepoResolution::NotFound)
    }

    fn split_repo(repo: &str) -> Result<(&str, &str)> {
        repo.split_once('/')
            .context("repo reference must be org/repo")
    }

    /// Commits since `since`, newest first, `limit` clamped by the caller.
    pub async fn recent_commits(
        &self,
        repo: &str,
        since: DateTime<Utc>,
        limit: u8,
    ) -> Result<Value> {
        let (owner, name) = Self::split_repo(repo)?;
        let route = format!(
            "/repos/{owner}/{name}/commits?since={}&per_page={}",
            since.to_rfc3339(),
            limit
        );
        let raw: Value = self
            .client
            .get(route, None::<&()>)
            .await
            .context("Failed to list commits")?;

        let commits: Vec<Value> = raw
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|c| {
                        json!({
                            "sha": c.get("sha"),
                            "message": c.pointer("/commit/message").and_then(Value::as_str)
                                .map(|m| m.lines().next().unwrap_or("").to_string()),
                            "author": c.pointer("/commit/author/name"),
                            "date": c.pointer("/commit/author/date"),
                            "url": c.get("html_url"),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let window_hours = (Utc::now() - since).num_hours().max(0);
        Ok(json!({
            "repo": repo,
            "commits": commits,
            "searched_window_hours": window_hours,
        }))
    }

    /// Recent workflow runs with their conclusions.
    pub async fn workflow_runs(&self, repo: &str, limit: u8) -> Result<Value> {
        let (owner, name) = Self::split_repo(repo)?;
        let route = format!("/repos/{owner}/{name}/actions/runs?per_page={limit}");
        let raw: Value = self
            .client
            .get(route, None::<&()>)
            .await
            .context("Failed to list workflow runs")?;

        let runs: Vec<Value> = raw
            .get("workflow_runs")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|r| {
                        json!({
                            "id": r.get("id"),
                            "name": r.get("name"),
                            "status": r.get("status"),
                            "conclusion": r.get("conclusion"),
                            "head_sha": r.get("head_sha"),
                            "created_at": r.get("created_at"),
                            "url": r.get("html_url"),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(json!({"repo": repo, "workflow_runs": runs}))
    }

    /// Failed-step summary for one workflow run (job + step conclusions,
    /// not the raw log archive).
    pub async fn workflow_logs(&self, repo: &str, run_id: u64) -> Result<Value> {
        let (owner, name) = Self::split_repo(repo)?;
        let route = format!("/repos/{owner}/{name}/actions/runs/{run_id}/jobs");
        let raw: Value = self
            .client
            .get(route, None::<&()>)
            .await
            .context("Failed to list workflow jobs")?;

        let jobs: Vec<Value> = raw
            .get("jobs")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|j| {
                        let failed_steps: Vec<Value> = j
                            .get("steps")
                            .and_then(Value::as_array)
                            .map(|steps| {
                                steps
                                    .iter()
                                    .filter(|s| s.get("conclusion").and_then(Value::as_str) == Some("failure"))
                                    .map(|s| json!({"name": s.get("name"), "number": s.get("number")}))
                                    .collect()
                            })
                            .unwrap_or_default();
                        json!({
                            "name": j.get("name"),
                            "conclusion": j.get("conclusion"),
                            "failed_steps": failed_steps,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(json!({"repo": repo, "run_id": run_id, "jobs": jobs}))
    }

    /// Read a file's contents at an optional ref.
    pub async fn read_file(&self, repo: &str, path: &str, git_ref: Option<&str>) -> Result<Value> {
        let (owner, name) = Self::split_repo(repo)?;
        let mut route = format!("/repos/{owner}/{name}/contents/{path}");
        if let Some(r) = git_ref {
            route.push_str(&format!("?ref={r}"));
        }
        let raw: Value = self
            .client
            .get(route, None::<&()>)
            .await
            .context("Failed to read file")?;

        let content = raw
            .get("content")
            .and_then(Value::as_str)
            .map(|b64| {
                let compact: String = b64.chars().filter(|c| !c.is_whitespace()).collect();
                base64_decode(&compact).unwrap_or_default()
            })
            .unwrap_or_default();

        Ok(json!({
            "repo": repo,
            "path": path,
            "ref": git_ref,
            "content": content.chars().take(20_000).collect::<String>(),
        }))
    }

    /// Changed files for one commit.
    pub async fn commit_diff(&self, repo: &str, sha: &str) -> Result<Value> {
        let (owner, name) = Self::split_repo(repo)?;
        let route = format!("/repos/{owner}/{name}/commits/{sha}");
        let raw: Value = self
            .client
            .get(route, None::<&()>)
            .await
            .context("Failed to read commit")?;

        let files: Vec<Value> = raw
            .get("files")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|f| {
                        json!({
                            "filename": f.get("filename"),
                            "status": f.get("status"),
                            "additions": f.get("additions"),
                            "deletions": f.get("deletions"),
                            "patch": f.get("patch").and_then(Value::as_str)
                                .map(|p| p.chars().take(4000).collect::<String>()),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(json!({
            "repo": repo,
            "sha": sha,
            "message": raw.pointer("/commit/message"),
            "files": files,
        }))
    }
}

// Minimal base64 decode for GitHub file contents; bad input yields None.
fn base64_decode(s: &str) -> Option<String> {
    const TABLE: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut lookup = [255u8; 256];
    for (i, &c) in TABLE.iter().enumerate() {
        lookup[c as usize] = i as u8;
    }
    let bytes: Vec<u8> = s.bytes().filter(|b| *b != b'=').collect();
    let mut out = Vec::with_capacity(bytes.len() * 3 / 4);
    for chunk in bytes.chunks(4) {
        let mut acc: u32 = 0;
        let mut bits = 0;
        for &b in chunk {
            let v = lookup[b as usize];
            if v == 255 {
                return None;
            }
            acc = (acc << 6) | u32::from(v);
            bits += 6;
        }
        while bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn client_with(org: Option<&str>, catalog: &[(&str, &str)]) -> GithubClient {
        let map: BTreeMap<String, String> = catalog
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        GithubClient::new(
            GithubConfig {
                token: "test-token".to_string(),
                org: org.map(ToString::to_string),
            },
            ServiceCatalog::from_map(map),
        )
        .unwrap()
    }

    #[test]
    fn test_resolve_repo_order() {
        let c = client_with(Some("acme"), &[("payments-api", "acme/payments")]);
        assert_eq!(
            c.resolve_repo("acme/explicit"),
            (Some("acme/explicit".to_string()), RepoResolution::Args)
        );
        assert_eq!(
            c.resolve_repo("payments-api"),
            (Some("acme/payments".to_string()), RepoResolution::ServiceCatalog)
        );
        assert_eq!(
            c.resolve_repo("orders-api"),
            (Some("acme/orders-api".to_string()), RepoResolution::NamingConvention)
        );
    }

    #[test]
    fn test_resolve_repo_cleaned_and_not_found() {
        let c = client_with(None, &[("payments-api", "acme/payments")]);
        assert_eq!(
            c.resolve_repo("payments-api-5d4f7c9b8-xk2lp").1,
            RepoResolution::ArgsCleaned
        );
        assert_eq!(c.resolve_repo("mystery").1, RepoResolution::NotFound);
        assert_eq!(c.resolve_repo("").1, RepoResolution::NotFound);
    }

    #[test]
    fn test_clean_workload_name() {
        assert_eq!(clean_workload_name("payments-api-5d4f7c9b8-xk2lp"), "payments-api");
        assert_eq!(clean_workload_name("plain-name"), "plain-name");
    }

    #[test]
    fn test_base64_decode() {
        assert_eq!(base64_decode("aGVsbG8=").as_deref(), Some("hello"));
        assert_eq!(base64_decode("!!!"), None);
    }
}
