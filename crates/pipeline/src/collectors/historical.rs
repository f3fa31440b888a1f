//! Historical log fallback for TTL-deleted pods.
//!
//! Jobs regularly finish and get garbage-collected before anyone looks at
//! them; the logs backend still has their output. We search by pod-name
//! prefix over the adjusted window.

use std::sync::LazyLock;

use regex::Regex;

use tarka_core::Investigation;
use tarka_providers::Providers;

/// Strip generated suffixes from a pod/job name to get a stable search
/// prefix (`batch-etl-57821-0-fywpu` -> `batch-etl`).
#[must_use]
pub fn stable_name_prefix(name: &str) -> Option<String> {
    static PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
        vec![
            // name-{number}-{number}-{random}
            Regex::new(r"^(.+?)(?:-\d+){1,2}-[a-z0-9]{5,}$").expect("static pattern"),
            // name-{number}-{random}
            Regex::new(r"^(.+?)-\d+-[a-z0-9]{5,}$").expect("static pattern"),
            // name-{number}
            Regex::new(r"^(.+)-\d+$").expect("static pattern"),
        ]
    });
    let name = name.trim();
    for re in PATTERNS.iter() {
        if let Some(c) = re.captures(name) {
            let prefix = c.get(1)?.as_str();
            if prefix.len() >= 3 {
                return Some(prefix.to_string());
            }
        }
    }
    None
}

/// Try the logs backend by name prefix when the pod itself is gone.
/// Populates `evidence.logs` on a hit and records the fallback in `meta`.
pub async fn apply_historical_fallback(providers: &Providers, inv: &mut Investigation) {
    if !inv.evidence.logs.logs.is_empty() {
        return;
    }
    let Some(name) = inv.target.pod.clone().or_else(|| inv.target.workload_name.clone()) else {
        return;
    };
    let Some(namespace) = inv.target.namespace.clone() else {
        return;
    };
    let prefix = stable_name_prefix(&name).unwrap_or(name);

    let result = providers
        .logs
        .fetch_logs_by_pod_prefix(
            &prefix,
            &namespace,
            inv.time_window.start_time,
            inv.time_window.end_time,
            400,
        )
        .await;

    if result.status == "ok" {
        inv.set_meta("historical_fallback", serde_json::json!({"prefix": prefix, "entries": result.entries.len()}));
        inv.evidence.logs.logs = result.entries;
        inv.evidence.logs.logs_status = Some(result.status);
        inv.evidence.logs.logs_backend = Some(result.backend);
        inv.evidence.logs.logs_query = result.query_used;
    } else if inv.evidence.logs.logs_status.is_none() {
        inv.evidence.logs.logs_status = Some(result.status);
        inv.evidence.logs.logs_reason = result.reason;
        inv.evidence.logs.logs_query = result.query_used;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cronjob_generated_names() {
        assert_eq!(stable_name_prefix("batch-etl-job-57821-0-fywpu").as_deref(), Some("batch-etl-job"));
        assert_eq!(stable_name_prefix("my-cronjob-1234567890-abcde").as_deref(), Some("my-cronjob"));
    }

    #[test]
    fn test_sequential_names() {
        assert_eq!(stable_name_prefix("job-blah-1").as_deref(), Some("job-blah"));
        assert_eq!(stable_name_prefix("my-job-123").as_deref(), Some("my-job"));
    }

    #[test]
    fn test_short_prefix_rejected() {
        // "a-1" must not degrade to a one-letter prefix.
        assert_eq!(stable_name_prefix("a-1"), None);
    }

    #[test]
    fn test_plain_names_pass_through() {
        assert_eq!(stable_name_prefix("stable-name"), None);
    }
}
