//! Chat and action policies, loaded from env (ConfigMap/Secret friendly).

use std::collections::BTreeSet;

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => {
            let v = raw.trim().to_ascii_lowercase();
            if v.is_empty() {
                default
            } else {
                matches!(v.as_str(), "1" | "true" | "yes" | "y" | "on")
            }
        }
        Err(_) => default,
    }
}

fn env_int(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn split_csv(name: &str) -> Option<BTreeSet<String>> {
    let raw = std::env::var(name).unwrap_or_default();
    let set: BTreeSet<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect();
    if set.is_empty() {
        None
    } else {
        Some(set)
    }
}

/// Chat/tool policy: what the graphs may call and how much.
#[derive(Debug, Clone)]
pub struct ChatPolicy {
    /// Master switch
    pub enabled: bool,

    // Tool categories
    pub allow_promql: bool,
    pub allow_k8s_read: bool,
    pub allow_k8s_events: bool,
    pub allow_logs_query: bool,
    pub allow_argocd_read: bool,
    pub allow_report_rerun: bool,
    pub allow_memory_read: bool,
    pub allow_aws_read: bool,
    pub allow_github_read: bool,

    // Scope limits
    pub namespace_allowlist: Option<BTreeSet<String>>,
    pub cluster_allowlist: Option<BTreeSet<String>>,
    pub aws_region_allowlist: Option<BTreeSet<String>>,
    pub github_repo_allowlist: Option<BTreeSet<String>>,

    // Cost caps
    pub max_steps: i64,
    pub max_tool_calls: i64,
    pub max_log_lines: i64,
    pub max_promql_series: i64,
    pub max_time_window_seconds: i64,

    // Redaction
    pub redact_secrets: bool,
}

impl Default for ChatPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_promql: true,
            allow_k8s_read: true,
            allow_k8s_events: true,
            allow_logs_query: true,
            allow_argocd_read: false,
            allow_report_rerun: true,
            allow_memory_read: true,
            allow_aws_read: false,
            allow_github_read: false,
            namespace_allowlist: None,
            cluster_allowlist: None,
            aws_region_allowlist: None,
            github_repo_allowlist: None,
            max_steps: 4,
            max_tool_calls: 6,
            max_log_lines: 200,
            max_promql_series: 200,
            max_time_window_seconds: 6 * 3600,
            redact_secrets: true,
        }
    }
}

impl ChatPolicy {
    /// Load from `CHAT_*` env vars with clamped caps.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            enabled: env_bool("CHAT_ENABLED", false),
            allow_promql: env_bool("CHAT_ALLOW_PROMQL", true),
            allow_k8s_read: env_bool("CHAT_ALLOW_K8S_READ", true),
            allow_k8s_events: env_bool("CHAT_ALLOW_K8S_EVENTS", true),
            allow_logs_query: env_bool("CHAT_ALLOW_LOGS_QUERY", true),
            allow_argocd_read: env_bool("CHAT_ALLOW_ARGOCD_READ", false),
            allow_report_rerun: env_bool("CHAT_ALLOW_REPORT_RERUN", true),
            allow_memory_read: env_bool("CHAT_ALLOW_MEMORY_READ", true),
            allow_aws_read: env_bool("CHAT_ALLOW_AWS_READ", false),
            allow_github_read: env_bool("CHAT_ALLOW_GITHUB_READ", false),
            namespace_allowlist: split_csv("CHAT_NAMESPACE_ALLOWLIST"),
            cluster_allowlist: split_csv("CHAT_CLUSTER_ALLOWLIST"),
            aws_region_allowlist: split_csv("CHAT_AWS_REGION_ALLOWLIST"),
            github_repo_allowlist: split_csv("CHAT_GITHUB_REPO_ALLOWLIST"),
            max_steps: env_int("CHAT_MAX_STEPS", 4).clamp(1, 8),
            max_tool_calls: env_int("CHAT_MAX_TOOL_CALLS", 6).clamp(1, 20),
            max_log_lines: env_int("CHAT_MAX_LOG_LINES", 200).clamp(20, 2000),
            max_promql_series: env_int("CHAT_MAX_PROMQL_SERIES", 200).clamp(50, 5000),
            max_time_window_seconds: env_int("CHAT_MAX_TIME_WINDOW_SECONDS", 6 * 3600)
                .clamp(300, 24 * 3600),
            redact_secrets: env_bool("CHAT_REDACT_SECRETS", true),
        }
    }

    /// RCA runs the same gates regardless of `CHAT_ENABLED`; AWS tools are
    /// auto-enabled when the pipeline already collects AWS evidence.
    #[must_use]
    pub fn for_rca() -> Self {
        let mut policy = Self::from_env();
        if env_bool("AWS_EVIDENCE_ENABLED", false) && !policy.allow_aws_read {
            policy.allow_aws_read = true;
        }
        policy
    }

    /// The exact case-scoped tool id list this policy allows.
    #[must_use]
    pub fn allowed_tools(&self, action_policy: Option<&ActionPolicy>) -> Vec<&'static str> {
        let mut tools: Vec<&'static str> = Vec::new();
        if self.allow_promql {
            tools.push("promql.instant");
        }
        if self.allow_k8s_read {
            tools.extend(["k8s.pod_context", "k8s.rollout_status"]);
        }
        if self.allow_k8s_events {
            tools.push("k8s.events");
        }
        if self.allow_logs_query {
            tools.push("logs.tail");
        }
        if self.allow_memory_read {
            tools.extend(["memory.similar_cases", "memory.skills"]);
        }
        if self.allow_report_rerun {
            tools.push("rerun.investigation");
        }
        if self.allow_argocd_read {
            tools.push("argocd.app_status");
        }
        if self.allow_aws_read {
            tools.extend([
                "aws.ec2_status",
                "aws.ebs_health",
                "aws.elb_health",
                "aws.rds_status",
                "aws.ecr_image",
                "aws.security_group",
                "aws.nat_gateway",
                "aws.vpc_endpoint",
                "aws.cloudtrail_events",
                "aws.s3_bucket_location",
                "aws.iam_role_permissions",
            ]);
        }
        if self.allow_github_read {
            tools.extend([
                "github.recent_commits",
                "github.workflow_runs",
                "github.workflow_logs",
                "github.read_file",
                "github.commit_diff",
            ]);
        }
        if action_policy.is_some_and(|a| a.enabled) {
            tools.extend(["actions.list", "actions.propose"]);
        }
        tools
    }

    /// Global (inbox) tool ids.
    #[must_use]
    pub fn global_tools(&self) -> Vec<&'static str> {
        vec!["cases.count", "cases.top", "cases.lookup", "cases.summary"]
    }

    /// Namespace allowlist check (`None` list allows everything).
    #[must_use]
    pub fn namespace_allowed(&self, namespace: &str) -> bool {
        self.namespace_allowlist
            .as_ref()
            .is_none_or(|set| set.contains(namespace))
    }

    #[must_use]
    pub fn github_repo_allowed(&self, repo: &str) -> bool {
        self.github_repo_allowlist
            .as_ref()
            .is_none_or(|set| set.contains(repo))
    }
}

/// Policy for action proposals. Separate from chat enablement so actions
/// and chat can be toggled independently.
#[derive(Debug, Clone)]
pub struct ActionPolicy {
    pub enabled: bool,
    pub action_type_allowlist: Option<BTreeSet<String>>,
    pub require_approval: bool,
    pub allow_execute: bool,
    pub namespace_allowlist: Option<BTreeSet<String>>,
    pub cluster_allowlist: Option<BTreeSet<String>>,
    pub max_actions_per_case: i64,
}

impl Default for ActionPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            action_type_allowlist: None,
            require_approval: true,
            allow_execute: false,
            namespace_allowlist: None,
            cluster_allowlist: None,
            max_actions_per_case: 25,
        }
    }
}

impl ActionPolicy {
    /// Load from `ACTIONS_*` env vars.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            enabled: env_bool("ACTIONS_ENABLED", false),
            action_type_allowlist: split_csv("ACTIONS_TYPE_ALLOWLIST")
                .map(|set| set.into_iter().map(|s| s.to_ascii_lowercase()).collect()),
            require_approval: env_bool("ACTIONS_REQUIRE_APPROVAL", true),
            allow_execute: env_bool("ACTIONS_ALLOW_EXECUTE", false),
            namespace_allowlist: split_csv("ACTIONS_NAMESPACE_ALLOWLIST"),
            cluster_allowlist: split_csv("ACTIONS_CLUSTER_ALLOWLIST"),
            max_actions_per_case: env_int("ACTIONS_MAX_ACTIONS_PER_CASE", 25).clamp(1, 200),
        }
    }

    #[must_use]
    pub fn action_type_allowed(&self, action_type: &str) -> bool {
        self.action_type_allowlist
            .as_ref()
            .is_none_or(|set| set.contains(&action_type.to_ascii_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_default_policy_tools() {
        let p = ChatPolicy::default();
        let tools = p.allowed_tools(None);
        assert!(tools.contains(&"promql.instant"));
        assert!(tools.contains(&"logs.tail"));
        assert!(tools.contains(&"rerun.investigation"));
        assert!(!tools.contains(&"aws.s3_bucket_location"));
        assert!(!tools.contains(&"actions.propose"));
    }

    #[test]
    #[serial]
    fn test_actions_require_enabled_policy() {
        let p = ChatPolicy::default();
        let actions = ActionPolicy { enabled: true, ..ActionPolicy::default() };
        assert!(p.allowed_tools(Some(&actions)).contains(&"actions.propose"));
        let disabled = ActionPolicy::default();
        assert!(!p.allowed_tools(Some(&disabled)).contains(&"actions.propose"));
    }

    #[test]
    #[serial]
    fn test_caps_clamped_from_env() {
        std::env::set_var("CHAT_MAX_TOOL_CALLS", "999");
        std::env::set_var("CHAT_MAX_STEPS", "0");
        std::env::set_var("CHAT_MAX_LOG_LINES", "5");
        let p = ChatPolicy::from_env();
        assert_eq!(p.max_tool_calls, 20);
        assert_eq!(p.max_steps, 1);
        assert_eq!(p.max_log_lines, 20);
        std::env::remove_var("CHAT_MAX_TOOL_CALLS");
        std::env::remove_var("CHAT_MAX_STEPS");
        std::env::remove_var("CHAT_MAX_LOG_LINES");
    }

    #[test]
    #[serial]
    fn test_namespace_allowlist() {
        let mut p = ChatPolicy::default();
        assert!(p.namespace_allowed("anything"));
        p.namespace_allowlist = Some(["prod".to_string()].into());
        assert!(p.namespace_allowed("prod"));
        assert!(!p.namespace_allowed("dev"));
    }
}
