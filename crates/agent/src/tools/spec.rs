//! Typed tool specifications.
//!
//! Tool dispatch is a match over variants, not string-keyed lookups with
//! dynamic args: each variant carries the typed argument record, and
//! parsing failures are stable codes.

use serde_json::{Map, Value};

fn arg_str(args: &Map<String, Value>, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

fn arg_i64(args: &Map<String, Value>, key: &str) -> Option<i64> {
    args.get(key).and_then(Value::as_i64)
}

fn arg_str_list(args: &Map<String, Value>, key: &str) -> Vec<String> {
    match args.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::trim).filter(|s| !s.is_empty()).map(ToString::to_string))
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

/// Reference time for `rerun.investigation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceTime {
    /// Anchor at the alert's original start (historical; default).
    Original,
    /// Substitute the current time and mark the case active.
    Now,
}

/// One parsed tool call.
#[derive(Debug, Clone)]
pub enum ToolSpec {
    PromqlInstant {
        query: String,
    },
    K8sPodContext {
        pod: Option<String>,
        namespace: Option<String>,
    },
    K8sRolloutStatus {
        namespace: Option<String>,
        kind: Option<String>,
        name: Option<String>,
    },
    K8sEvents {
        namespace: Option<String>,
        kind: String,
        name: Option<String>,
        limit: i64,
    },
    LogsTail {
        pod: Option<String>,
        namespace: Option<String>,
        container: Option<String>,
        lines: i64,
    },
    MemorySimilarCases {
        limit: i64,
    },
    MemorySkills,
    RerunInvestigation {
        time_window: String,
        reference_time: ReferenceTime,
    },
    ArgoAppStatus {
        app: String,
    },
    AwsEc2Status {
        instance_ids: Vec<String>,
    },
    AwsEbsHealth {
        volume_ids: Vec<String>,
    },
    AwsElbHealth {
        target_group_arn: String,
    },
    AwsRdsStatus {
        db_instance_identifier: String,
    },
    AwsEcrImage {
        repository: String,
        tag: Option<String>,
        digest: Option<String>,
        registry_id: Option<String>,
    },
    AwsSecurityGroup {
        group_id: String,
    },
    AwsNatGateway {
        nat_gateway_id: Option<String>,
    },
    AwsVpcEndpoint {
        vpc_endpoint_id: Option<String>,
    },
    AwsCloudtrailEvents {
        resource_name: Option<String>,
        hours: i64,
    },
    AwsS3BucketLocation {
        bucket: String,
    },
    AwsIamRolePermissions {
        role_name: Option<String>,
        service_account: Option<String>,
        namespace: Option<String>,
    },
    GithubRecentCommits {
        reference: String,
        since_hours: Option<i64>,
        limit: u8,
    },
    GithubWorkflowRuns {
        reference: String,
        limit: u8,
    },
    GithubWorkflowLogs {
        reference: String,
        run_id: u64,
    },
    GithubReadFile {
        reference: String,
        path: String,
        git_ref: Option<String>,
    },
    GithubCommitDiff {
        reference: String,
        sha: String,
    },
    ActionsList {
        limit: i64,
    },
    ActionsPropose {
        action_type: String,
        title: String,
        risk: Option<String>,
        preconditions: Vec<String>,
        execution_payload: Value,
        hypothesis_id: Option<String>,
    },
    CasesCount {
        status: String,
        team: Option<String>,
        family: Option<String>,
        classification: Option<String>,
        since_hours: Option<i64>,
    },
    CasesTop {
        by: String,
        status: String,
        since_hours: Option<i64>,
        limit: i64,
    },
    CasesLookup {
        case_ref: String,
    },
    CasesSummary {
        case_ref: String,
    },
}

impl ToolSpec {
    /// Parse `(tool_id, args)` into a typed spec, or a stable error code.
    pub fn parse(tool: &str, args: &Map<String, Value>) -> Result<Self, String> {
        match tool {
            "promql.instant" => {
                let query = arg_str(args, "query").ok_or("query_required")?;
                Ok(Self::PromqlInstant { query })
            }
            "k8s.pod_context" => Ok(Self::K8sPodContext {
                pod: arg_str(args, "pod"),
                namespace: arg_str(args, "namespace"),
            }),
            "k8s.rollout_status" => Ok(Self::K8sRolloutStatus {
                namespace: arg_str(args, "namespace"),
                kind: arg_str(args, "kind").or_else(|| arg_str(args, "workload_kind")),
                name: arg_str(args, "name").or_else(|| arg_str(args, "workload_name")),
            }),
            "k8s.events" => Ok(Self::K8sEvents {
                namespace: arg_str(args, "namespace"),
                kind: arg_str(args, "kind").unwrap_or_else(|| "Pod".to_string()),
                name: arg_str(args, "name").or_else(|| arg_str(args, "pod")),
                limit: arg_i64(args, "limit").unwrap_or(20).clamp(1, 100),
            }),
            "logs.tail" => Ok(Self::LogsTail {
                pod: arg_str(args, "pod"),
                namespace: arg_str(args, "namespace"),
                container: arg_str(args, "container"),
                lines: arg_i64(args, "lines").unwrap_or(100),
            }),
            "memory.similar_cases" => Ok(Self::MemorySimilarCases {
                limit: arg_i64(args, "limit").unwrap_or(5).clamp(1, 20),
            }),
            "memory.skills" => Ok(Self::MemorySkills),
            "rerun.investigation" => {
                let time_window = arg_str(args, "time_window").ok_or("time_window_required")?;
                let reference_time = match arg_str(args, "reference_time").as_deref() {
                    None | Some("original") => ReferenceTime::Original,
                    Some("now") => ReferenceTime::Now,
                    Some(_) => return Err("reference_time_must_be_original_or_now".to_string()),
                };
                Ok(Self::RerunInvestigation { time_window, reference_time })
            }
            "argocd.app_status" => {
                let app = arg_str(args, "app").ok_or("app_required")?;
                Ok(Self::ArgoAppStatus { app })
            }
            "aws.ec2_status" => Ok(Self::AwsEc2Status {
                instance_ids: arg_str_list(args, "instance_ids"),
            }),
            "aws.ebs_health" => Ok(Self::AwsEbsHealth {
                volume_ids: arg_str_list(args, "volume_ids"),
            }),
            "aws.elb_health" => {
                let target_group_arn = arg_str(args, "target_group_arn").ok_or("target_group_arn_required")?;
                Ok(Self::AwsElbHealth { target_group_arn })
            }
            "aws.rds_status" => {
                let db = arg_str(args, "db_instance_identifier")
                    .or_else(|| arg_str(args, "identifier"))
                    .ok_or("db_instance_identifier_required")?;
                Ok(Self::AwsRdsStatus { db_instance_identifier: db })
            }
            "aws.ecr_image" => {
                let repository = arg_str(args, "repository").or_else(|| arg_str(args, "repo")).ok_or("repository_required")?;
                Ok(Self::AwsEcrImage {
                    repository,
                    tag: arg_str(args, "tag"),
                    digest: arg_str(args, "digest"),
                    registry_id: arg_str(args, "registry_id"),
                })
            }
            "aws.security_group" => {
                let group_id = arg_str(args, "group_id").ok_or("group_id_required")?;
                Ok(Self::AwsSecurityGroup { group_id })
            }
            "aws.nat_gateway" => Ok(Self::AwsNatGateway {
                nat_gateway_id: arg_str(args, "nat_gateway_id"),
            }),
            "aws.vpc_endpoint" => Ok(Self::AwsVpcEndpoint {
                vpc_endpoint_id: arg_str(args, "vpc_endpoint_id"),
            }),
            "aws.cloudtrail_events" => Ok(Self::AwsCloudtrailEvents {
                resource_name: arg_str(args, "resource_name"),
                hours: arg_i64(args, "hours").unwrap_or(2).clamp(1, 72),
            }),
            "aws.s3_bucket_location" => {
                let bucket = arg_str(args, "bucket").ok_or("bucket_required")?;
                Ok(Self::AwsS3BucketLocation { bucket })
            }
            "aws.iam_role_permissions" => {
                let role_name = arg_str(args, "role_name");
                let service_account = arg_str(args, "service_account");
                let namespace = arg_str(args, "namespace");
                if role_name.is_none() && service_account.is_none() {
                    return Err("role_name_or_service_account_required".to_string());
                }
                Ok(Self::AwsIamRolePermissions { role_name, service_account, namespace })
            }
            "github.recent_commits" => {
                let reference = arg_str(args, "repo")
                    .or_else(|| arg_str(args, "service"))
                    .or_else(|| arg_str(args, "workload"))
                    .ok_or("repo_required")?;
                let limit = arg_i64(args, "limit").unwrap_or(20).clamp(1, 30) as u8;
                Ok(Self::GithubRecentCommits {
                    reference,
                    since_hours: arg_i64(args, "since_hours").or_else(|| arg_i64(args, "since")),
                    limit,
                })
            }
            "github.workflow_runs" => {
                let reference = arg_str(args, "repo").ok_or("repo_required")?;
                Ok(Self::GithubWorkflowRuns {
                    reference,
                    limit: arg_i64(args, "limit").unwrap_or(10).clamp(1, 30) as u8,
                })
            }
            "github.workflow_logs" => {
                let reference = arg_str(args, "repo").ok_or("repo_required")?;
                let run_id = arg_i64(args, "run_id").filter(|r| *r > 0).ok_or("run_id_required")? as u64;
                Ok(Self::GithubWorkflowLogs { reference, run_id })
            }
            "github.read_file" => {
                let reference = arg_str(args, "repo").ok_or("repo_required")?;
                let path = arg_str(args, "path").ok_or("path_required")?;
                Ok(Self::GithubReadFile {
                    reference,
                    path,
                    git_ref: arg_str(args, "ref"),
                })
            }
            "github.commit_diff" => {
                let reference = arg_str(args, "repo").ok_or("repo_required")?;
                let sha = arg_str(args, "sha").ok_or("sha_required")?;
                Ok(Self::GithubCommitDiff { reference, sha })
            }
            "actions.list" => Ok(Self::ActionsList {
                limit: arg_i64(args, "limit").unwrap_or(50).clamp(1, 500),
            }),
            "actions.propose" => {
                let action_type = arg_str(args, "action_type").ok_or("action_type_required")?;
                let title = arg_str(args, "title").ok_or("title_required")?;
                Ok(Self::ActionsPropose {
                    action_type,
                    title,
                    risk: arg_str(args, "risk"),
                    preconditions: arg_str_list(args, "preconditions"),
                    execution_payload: args.get("execution_payload").cloned().unwrap_or(Value::Object(Map::new())),
                    hypothesis_id: arg_str(args, "hypothesis_id"),
                })
            }
            "cases.count" => Ok(Self::CasesCount {
                status: arg_str(args, "status").unwrap_or_else(|| "all".to_string()),
                team: arg_str(args, "team"),
                family: arg_str(args, "family"),
                classification: arg_str(args, "classification"),
                since_hours: arg_i64(args, "since_hours").map(|h| h.clamp(1, 24 * 30)),
            }),
            "cases.top" => {
                let by = arg_str(args, "by").unwrap_or_else(|| "team".to_string());
                if !matches!(by.as_str(), "team" | "family" | "classification") {
                    return Err("by_invalid".to_string());
                }
                Ok(Self::CasesTop {
                    by,
                    status: arg_str(args, "status").unwrap_or_else(|| "all".to_string()),
                    since_hours: arg_i64(args, "since_hours").map(|h| h.clamp(1, 24 * 30)),
                    limit: arg_i64(args, "limit").unwrap_or(8).clamp(1, 20),
                })
            }
            "cases.lookup" => {
                let case_ref = arg_str(args, "case_ref")
                    .or_else(|| arg_str(args, "id"))
                    .or_else(|| arg_str(args, "case_id"))
                    .ok_or("case_ref_required")?;
                Ok(Self::CasesLookup { case_ref })
            }
            "cases.summary" => {
                let case_ref = arg_str(args, "case_ref")
                    .or_else(|| arg_str(args, "case_id"))
                    .ok_or("case_ref_required")?;
                Ok(Self::CasesSummary { case_ref })
            }
            _ => Err("tool_not_allowed".to_string()),
        }
    }
}

/// One-line descriptions injected into planner prompts.
#[must_use]
pub fn tool_description(tool: &str) -> &'static str {
    match tool {
        "promql.instant" => "Run an instant PromQL query (args: query)",
        "k8s.pod_context" => "Pod info, conditions, events and owner chain (args: pod?, namespace?)",
        "k8s.rollout_status" => "Workload rollout status (args: namespace?, kind?, name?)",
        "k8s.events" => "Kubernetes events for a resource (args: namespace?, kind?, name?, limit?)",
        "logs.tail" => "Recent logs for the target pod (args: pod?, namespace?, container?, lines?)",
        "memory.similar_cases" => "Similar historical cases with resolutions (args: limit?)",
        "memory.skills" => "Operator-curated advice matching this case (no args)",
        "rerun.investigation" => "Re-run the investigation over a window (args: time_window, reference_time=original|now)",
        "argocd.app_status" => "ArgoCD application sync/health status (args: app)",
        "aws.ec2_status" => "EC2 instance status checks (args: instance_ids?)",
        "aws.ebs_health" => "EBS volume health (args: volume_ids?)",
        "aws.elb_health" => "Load balancer target health (args: target_group_arn)",
        "aws.rds_status" => "RDS instance status (args: db_instance_identifier)",
        "aws.ecr_image" => "ECR image existence by tag/digest (args: repository, tag?, digest?)",
        "aws.security_group" => "Security group rule summary (args: group_id)",
        "aws.nat_gateway" => "NAT gateway state (args: nat_gateway_id?)",
        "aws.vpc_endpoint" => "VPC endpoint state (args: vpc_endpoint_id?)",
        "aws.cloudtrail_events" => "Recent CloudTrail events (args: resource_name?, hours?)",
        "aws.s3_bucket_location" => "S3 bucket existence and region (args: bucket)",
        "aws.iam_role_permissions" => "IAM role policies; accepts role_name OR service_account+namespace (IRSA)",
        "github.recent_commits" => "Recent commits for the owning repo (args: repo|service, since_hours?, limit 1-30)",
        "github.workflow_runs" => "Recent workflow runs with conclusions (args: repo, limit?)",
        "github.workflow_logs" => "Failed-step summary for a workflow run (args: repo, run_id)",
        "github.read_file" => "Read a file from the repo (args: repo, path, ref?)",
        "github.commit_diff" => "Changed files for one commit (args: repo, sha)",
        "actions.list" => "List remediation proposals for this case (args: limit?)",
        "actions.propose" => "Propose a remediation action for approval (args: action_type, title, ...)",
        "cases.count" => "Count cases with filters (args: status?, family?, team?, classification?, since_hours?)",
        "cases.top" => "Top case buckets (args: by=team|family|classification, limit?)",
        "cases.lookup" => "Resolve a case reference to case ids (args: case_ref)",
        "cases.summary" => "Case summary with its latest run (args: case_ref)",
        _ => "No description",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn test_rerun_parse() {
        let spec = ToolSpec::parse("rerun.investigation", &args(&[("time_window", json!("2h"))])).unwrap();
        match spec {
            ToolSpec::RerunInvestigation { reference_time, .. } => {
                assert_eq!(reference_time, ReferenceTime::Original);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(
            ToolSpec::parse("rerun.investigation", &Map::new()).unwrap_err(),
            "time_window_required"
        );
        assert_eq!(
            ToolSpec::parse(
                "rerun.investigation",
                &args(&[("time_window", json!("2h")), ("reference_time", json!("yesterday"))])
            )
            .unwrap_err(),
            "reference_time_must_be_original_or_now"
        );
    }

    #[test]
    fn test_iam_requires_identity() {
        assert_eq!(
            ToolSpec::parse("aws.iam_role_permissions", &Map::new()).unwrap_err(),
            "role_name_or_service_account_required"
        );
        assert!(ToolSpec::parse(
            "aws.iam_role_permissions",
            &args(&[("service_account", json!("etl-sa")), ("namespace", json!("batch"))])
        )
        .is_ok());
    }

    #[test]
    fn test_commit_limit_clamp() {
        let spec = ToolSpec::parse(
            "github.recent_commits",
            &args(&[("repo", json!("acme/api")), ("limit", json!(500))]),
        )
        .unwrap();
        match spec {
            ToolSpec::GithubRecentCommits { limit, .. } => assert_eq!(limit, 30),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_cases_top_by_validation() {
        assert_eq!(
            ToolSpec::parse("cases.top", &args(&[("by", json!("severity"))])).unwrap_err(),
            "by_invalid"
        );
    }

    #[test]
    fn test_unknown_tool() {
        assert_eq!(ToolSpec::parse("nope.nothing", &Map::new()).unwrap_err(), "tool_not_allowed");
    }
}
