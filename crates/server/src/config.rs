//! Server settings from environment.

/// Settings shared by the receiver and the worker.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Default investigation window label (`TIME_WINDOW`).
    pub time_window: String,
    /// Cluster label fallback (`CLUSTER_NAME`).
    pub cluster_name: Option<String>,
    /// Optional alertname allowlist (`ALERTNAME_ALLOWLIST`, CSV).
    pub alertname_allowlist: Option<Vec<String>>,
    /// HTTP bind address.
    pub bind: String,
    /// Parallel worker consumers.
    pub worker_concurrency: usize,
    /// Memory features toggle (`MEMORY_ENABLED`).
    pub memory_enabled: bool,
}

impl Settings {
    #[must_use]
    pub fn from_env() -> Self {
        let allowlist = std::env::var("ALERTNAME_ALLOWLIST")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|v| !v.is_empty());

        Self {
            time_window: std::env::var("TIME_WINDOW")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "1h".to_string()),
            cluster_name: std::env::var("CLUSTER_NAME")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            alertname_allowlist: allowlist,
            bind: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            worker_concurrency: std::env::var("WORKER_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .map_or(2, |n: usize| n.clamp(1, 16)),
            memory_enabled: std::env::var("MEMORY_ENABLED")
                .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
                .unwrap_or(true),
        }
    }

    /// `None` means no filtering; an empty list never occurs.
    #[must_use]
    pub fn allowlist_permits(&self, alertname: &str) -> bool {
        self.alertname_allowlist
            .as_ref()
            .is_none_or(|list| list.iter().any(|a| a == alertname))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowlist_permits() {
        let mut s = Settings {
            time_window: "1h".to_string(),
            cluster_name: None,
            alertname_allowlist: None,
            bind: String::new(),
            worker_concurrency: 2,
            memory_enabled: true,
        };
        assert!(s.allowlist_permits("Anything"));
        s.alertname_allowlist = Some(vec!["KubeJobFailed".to_string()]);
        assert!(s.allowlist_permits("KubeJobFailed"));
        assert!(!s.allowlist_permits("CrashLoopBackOff"));
    }
}
