//! Case-scoped tool implementations.
//!
//! Missing pod/namespace args default to the case target from the SSOT
//! snapshot, so the planner can say "check the logs" without re-stating
//! identity. Namespace and repo allowlists are enforced here, before any
//! provider call.

use anyhow::Result;
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use tarka_core::model::investigation::parse_window_seconds;
use tarka_core::snapshot::snapshot_str;
use tarka_core::ToolResult;
use tarka_pipeline::investigate::{run_investigation, InvestigateOptions};
use tarka_providers::aws::{iam, infra, s3};

use super::spec::{ReferenceTime, ToolSpec};
use super::ToolContext;
use tarka_store::{actions, retrieval, skills};

fn target_field(ctx: &ToolContext<'_>, field: &str) -> Option<String> {
    snapshot_str(ctx.analysis_json, &["target", field]).map(ToString::to_string)
}

fn resolve_pod_target(
    ctx: &ToolContext<'_>,
    pod: Option<String>,
    namespace: Option<String>,
) -> Result<(String, String), ToolResult> {
    let pod = pod.or_else(|| target_field(ctx, "pod"));
    let namespace = namespace.or_else(|| target_field(ctx, "namespace"));
    match (pod, namespace) {
        (Some(p), Some(ns)) => Ok((p, ns)),
        _ => Err(ToolResult::err("pod_target_required")),
    }
}

fn check_namespace(ctx: &ToolContext<'_>, namespace: &str) -> Option<ToolResult> {
    if ctx.policy.namespace_allowed(namespace) {
        None
    } else {
        Some(ToolResult::err("namespace_not_allowed"))
    }
}

pub async fn run_case_tool(ctx: &ToolContext<'_>, spec: ToolSpec) -> Result<ToolResult> {
    match spec {
        ToolSpec::PromqlInstant { query } => {
            let at = Utc::now();
            let value = ctx
                .providers
                .prom
                .instant_as_value(&query, at, ctx.policy.max_promql_series as usize)
                .await?;
            Ok(ToolResult::ok(value))
        }

        ToolSpec::K8sPodContext { pod, namespace } => {
            let (pod, ns) = match resolve_pod_target(ctx, pod, namespace) {
                Ok(t) => t,
                Err(r) => return Ok(r),
            };
            if let Some(denied) = check_namespace(ctx, &ns) {
                return Ok(denied);
            }
            let info = ctx.providers.k8s.pod_info(&pod, &ns).await?;
            let conditions = ctx.providers.k8s.pod_conditions(&pod, &ns).await.unwrap_or_default();
            let events = ctx.providers.k8s.pod_events(&pod, &ns, 20).await.unwrap_or_default();
            let owner_chain = ctx.providers.k8s.pod_owner_chain(&pod, &ns).await.ok();
            Ok(ToolResult::ok(json!({
                "pod_info": info,
                "pod_conditions": conditions,
                "pod_events": events,
                "owner_chain": owner_chain,
            })))
        }

        ToolSpec::K8sRolloutStatus { namespace, kind, name } => {
            let ns = namespace
                .or_else(|| target_field(ctx, "namespace"))
                .ok_or_else(|| anyhow::anyhow!("NamespaceMissing: rollout status needs a namespace"))?;
            if let Some(denied) = check_namespace(ctx, &ns) {
                return Ok(denied);
            }
            let kind = kind
                .or_else(|| target_field(ctx, "workload_kind"))
                .unwrap_or_else(|| "Deployment".to_string());
            let Some(name) = name.or_else(|| target_field(ctx, "workload_name")) else {
                return Ok(ToolResult::err("workload_name_required"));
            };
            let rs = ctx.providers.k8s.workload_rollout_status(&ns, &kind, &name).await?;
            Ok(ToolResult::ok(serde_json::to_value(rs)?))
        }

        ToolSpec::K8sEvents { namespace, kind, name, limit } => {
            let ns = namespace.or_else(|| target_field(ctx, "namespace"));
            let name = name.or_else(|| target_field(ctx, "pod"));
            let (Some(ns), Some(name)) = (ns, name) else {
                return Ok(ToolResult::err("pod_target_required"));
            };
            if let Some(denied) = check_namespace(ctx, &ns) {
                return Ok(denied);
            }
            let events = ctx.providers.k8s.events(&ns, &kind, &name, limit as usize).await?;
            Ok(ToolResult::ok(json!({"kind": kind, "name": name, "events": events})))
        }

        ToolSpec::LogsTail { pod, namespace, container, lines } => {
            let (pod, ns) = match resolve_pod_target(ctx, pod, namespace) {
                Ok(t) => t,
                Err(r) => return Ok(r),
            };
            if let Some(denied) = check_namespace(ctx, &ns) {
                return Ok(denied);
            }
            let lines = lines.clamp(1, ctx.policy.max_log_lines) as usize;
            let end = Utc::now();
            let start = end - Duration::hours(1);
            let result = ctx
                .providers
                .logs
                .fetch_recent_logs(&pod, &ns, start, end, container.as_deref(), lines)
                .await;
            Ok(ToolResult::ok(json!({
                "status": result.status,
                "reason": result.reason,
                "backend": result.backend,
                "query_used": result.query_used,
                "entries": result.entries,
            })))
        }

        ToolSpec::MemorySimilarCases { limit } => {
            let Some(pool) = ctx.pool else {
                return Ok(ToolResult::err("postgres_not_configured"));
            };
            // Rebuild enough of an investigation from the snapshot for the
            // retrieval filters.
            let Ok(inv) = investigation_from_snapshot(ctx.analysis_json) else {
                return Ok(ToolResult::err("case_id_required"));
            };
            match retrieval::find_similar_runs(pool, &inv, limit).await {
                Ok(runs) => {
                    let items: Vec<Value> = runs.iter().map(retrieval::SimilarRun::to_value).collect();
                    Ok(ToolResult::ok(json!({"items": items})))
                }
                Err(_) => Ok(ToolResult::err("db_unavailable")),
            }
        }

        ToolSpec::MemorySkills => {
            let Some(pool) = ctx.pool else {
                return Ok(ToolResult::err("postgres_not_configured"));
            };
            let Ok(inv) = investigation_from_snapshot(ctx.analysis_json) else {
                return Ok(ToolResult::err("case_id_required"));
            };
            match skills::match_skills(pool, &inv, 5).await {
                Ok(matches) => {
                    let items: Vec<Value> = matches
                        .iter()
                        .map(|m| json!({"skill_id": m.skill_id, "name": m.name, "advice": m.advice}))
                        .collect();
                    Ok(ToolResult::ok(json!({"items": items})))
                }
                Err(_) => Ok(ToolResult::err("db_unavailable")),
            }
        }

        ToolSpec::RerunInvestigation { time_window, reference_time } => {
            let Some(window_secs) = parse_window_seconds(&time_window) else {
                return Ok(ToolResult::err("time_window_required"));
            };
            if window_secs > ctx.policy.max_time_window_seconds {
                return Ok(ToolResult::err("time_window_too_large"));
            }
            let raw_alert = raw_alert_from_snapshot(ctx.analysis_json);
            let reference = match reference_time {
                ReferenceTime::Original => ctx
                    .analysis_json
                    .pointer("/alert/starts_at")
                    .and_then(Value::as_str)
                    .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                    .map(|t| t.with_timezone(&Utc)),
                ReferenceTime::Now => Some(Utc::now()),
            };
            let options = InvestigateOptions {
                time_window: time_window.clone(),
                env_cluster: target_field(ctx, "cluster"),
                reference_time: reference,
            };
            let inv = run_investigation(ctx.providers, &raw_alert, None, &options).await;
            let mut updated = tarka_core::snapshot::analysis_snapshot(&inv);
            if reference_time == ReferenceTime::Now {
                if let Some(obj) = updated.pointer_mut("/alert").and_then(Value::as_object_mut) {
                    obj.insert("state".to_string(), json!("firing"));
                }
            }
            let mut result = ToolResult::ok(json!({
                "status": "ok",
                "time_window": time_window,
                "reference_time": match reference_time {
                    ReferenceTime::Original => "original",
                    ReferenceTime::Now => "now",
                },
            }));
            result.updated_analysis = Some(updated);
            Ok(result)
        }

        ToolSpec::ArgoAppStatus { app } => {
            let Some(argocd) = &ctx.providers.argocd else {
                return Ok(ToolResult::err("provider_not_configured"));
            };
            Ok(ToolResult::ok(argocd.app_status(&app).await?))
        }

        // ---- AWS ---------------------------------------------------------
        ToolSpec::AwsEc2Status { instance_ids } => {
            Ok(ToolResult::ok(infra::ec2_status(&ctx.providers.aws, &instance_ids).await))
        }
        ToolSpec::AwsEbsHealth { volume_ids } => {
            Ok(ToolResult::ok(infra::ebs_health(&ctx.providers.aws, &volume_ids).await))
        }
        ToolSpec::AwsElbHealth { target_group_arn } => {
            Ok(ToolResult::ok(infra::elb_health(&ctx.providers.aws, &target_group_arn).await))
        }
        ToolSpec::AwsRdsStatus { db_instance_identifier } => {
            Ok(ToolResult::ok(infra::rds_status(&ctx.providers.aws, &db_instance_identifier).await))
        }
        ToolSpec::AwsEcrImage { repository, tag, digest, registry_id } => Ok(ToolResult::ok(
            infra::ecr_image(
                &ctx.providers.aws,
                &repository,
                tag.as_deref(),
                digest.as_deref(),
                registry_id.as_deref(),
            )
            .await,
        )),
        ToolSpec::AwsSecurityGroup { group_id } => {
            Ok(ToolResult::ok(infra::security_group(&ctx.providers.aws, &group_id).await))
        }
        ToolSpec::AwsNatGateway { nat_gateway_id } => Ok(ToolResult::ok(
            infra::nat_gateway(&ctx.providers.aws, nat_gateway_id.as_deref()).await,
        )),
        ToolSpec::AwsVpcEndpoint { vpc_endpoint_id } => Ok(ToolResult::ok(
            infra::vpc_endpoint(&ctx.providers.aws, vpc_endpoint_id.as_deref()).await,
        )),
        ToolSpec::AwsCloudtrailEvents { resource_name, hours } => {
            let end = Utc::now();
            let start = end - Duration::hours(hours);
            Ok(ToolResult::ok(
                infra::cloudtrail_events(&ctx.providers.aws, resource_name.as_deref(), start, end, 20).await,
            ))
        }
        ToolSpec::AwsS3BucketLocation { bucket } => {
            let exists = s3::check_s3_bucket_exists(&ctx.providers.aws, &bucket).await;
            let location = s3::get_s3_bucket_location(&ctx.providers.aws, &bucket).await;
            Ok(ToolResult::ok(json!({"existence": exists, "location": location})))
        }
        ToolSpec::AwsIamRolePermissions { role_name, service_account, namespace } => {
            let role = match role_name {
                Some(role) => role,
                None => {
                    // IRSA path: pull the role ARN off the service account.
                    let sa = service_account.expect("validated at parse time");
                    let ns = namespace
                        .or_else(|| target_field(ctx, "namespace"))
                        .unwrap_or_default();
                    if ns.is_empty() {
                        return Ok(ToolResult::err("namespace_required"));
                    }
                    if let Some(denied) = check_namespace(ctx, &ns) {
                        return Ok(denied);
                    }
                    let info = ctx.providers.k8s.service_account_info(&ns, &sa).await?;
                    match info.annotations.get(iam::IRSA_ANNOTATION) {
                        Some(arn) => iam::extract_role_name_from_arn(arn),
                        None => {
                            return Ok(ToolResult::ok(json!({
                                "status": "ok",
                                "service_account": sa,
                                "namespace": ns,
                                "error_code": "no_iam_role_annotation",
                                "note": "service account has no eks.amazonaws.com/role-arn annotation",
                            })));
                        }
                    }
                }
            };
            let mut info = iam::get_iam_role_info(&ctx.providers.aws, &role).await;
            if let Some(trust) = info.get("trust_policy").filter(|t| !t.is_null()).cloned() {
                if let Some(obj) = info.as_object_mut() {
                    obj.insert("irsa_trust_check".to_string(), iam::check_irsa_trust_policy(&trust));
                }
            }
            Ok(ToolResult::ok(info))
        }

        // ---- GitHub ------------------------------------------------------
        ToolSpec::GithubRecentCommits { reference, since_hours, limit } => {
            let Some(github) = &ctx.providers.github else {
                return Ok(ToolResult::err("provider_not_configured"));
            };
            let (repo, resolution) = github.resolve_repo(&reference);
            let Some(repo) = repo else {
                return Ok(ToolResult::ok(json!({
                    "repo": reference,
                    "repo_source": "not_found",
                    "commits": [],
                })));
            };
            if !ctx.policy.github_repo_allowed(&repo) {
                return Ok(ToolResult::err("repo_not_allowed"));
            }

            let explicit_since = since_hours.is_some();
            let hours = since_hours.unwrap_or(2).clamp(1, 24 * 14);
            let mut result = github
                .recent_commits(&repo, Utc::now() - Duration::hours(hours), limit)
                .await?;
            let empty = result
                .get("commits")
                .and_then(Value::as_array)
                .is_none_or(Vec::is_empty);
            // Default 2h window came back empty: retry once at 24h.
            if empty && !explicit_since {
                result = github
                    .recent_commits(&repo, Utc::now() - Duration::hours(24), limit)
                    .await?;
                if let Some(obj) = result.as_object_mut() {
                    obj.insert("widened_window".to_string(), json!(true));
                }
            }
            if let Some(obj) = result.as_object_mut() {
                obj.insert("repo_source".to_string(), json!(resolution.as_str()));
            }
            Ok(ToolResult::ok(result))
        }
        ToolSpec::GithubWorkflowRuns { reference, limit } => {
            let Some(github) = &ctx.providers.github else {
                return Ok(ToolResult::err("provider_not_configured"));
            };
            let (Some(repo), _) = github.resolve_repo(&reference) else {
                return Ok(ToolResult::ok(json!({"repo": reference, "workflow_runs": []})));
            };
            if !ctx.policy.github_repo_allowed(&repo) {
                return Ok(ToolResult::err("repo_not_allowed"));
            }
            Ok(ToolResult::ok(github.workflow_runs(&repo, limit).await?))
        }
        ToolSpec::GithubWorkflowLogs { reference, run_id } => {
            let Some(github) = &ctx.providers.github else {
                return Ok(ToolResult::err("provider_not_configured"));
            };
            let (Some(repo), _) = github.resolve_repo(&reference) else {
                return Ok(ToolResult::ok(json!({"repo": reference, "jobs": []})));
            };
            if !ctx.policy.github_repo_allowed(&repo) {
                return Ok(ToolResult::err("repo_not_allowed"));
            }
            Ok(ToolResult::ok(github.workflow_logs(&repo, run_id).await?))
        }
        ToolSpec::GithubReadFile { reference, path, git_ref } => {
            let Some(github) = &ctx.providers.github else {
                return Ok(ToolResult::err("provider_not_configured"));
            };
            let (Some(repo), _) = github.resolve_repo(&reference) else {
                return Ok(ToolResult::ok(json!({"repo": reference, "content": Value::Null})));
            };
            if !ctx.policy.github_repo_allowed(&repo) {
                return Ok(ToolResult::err("repo_not_allowed"));
            }
            Ok(ToolResult::ok(github.read_file(&repo, &path, git_ref.as_deref()).await?))
        }
        ToolSpec::GithubCommitDiff { reference, sha } => {
            let Some(github) = &ctx.providers.github else {
                return Ok(ToolResult::err("provider_not_configured"));
            };
            let (Some(repo), _) = github.resolve_repo(&reference) else {
                return Ok(ToolResult::ok(json!({"repo": reference, "files": []})));
            };
            if !ctx.policy.github_repo_allowed(&repo) {
                return Ok(ToolResult::err("repo_not_allowed"));
            }
            Ok(ToolResult::ok(github.commit_diff(&repo, &sha).await?))
        }

        // ---- Actions -----------------------------------------------------
        ToolSpec::ActionsList { limit } => {
            let Some(pool) = ctx.pool else {
                return Ok(ToolResult::err("postgres_not_configured"));
            };
            let Some(case_id) = ctx.case_id else {
                return Ok(ToolResult::err("case_id_required"));
            };
            match actions::list_case_actions(pool, case_id, limit).await {
                Ok(items) => Ok(ToolResult::ok(json!({"items": items}))),
                Err(_) => Ok(ToolResult::err("db_unavailable")),
            }
        }
        ToolSpec::ActionsPropose {
            action_type,
            title,
            risk,
            preconditions,
            execution_payload,
            hypothesis_id,
        } => {
            let Some(action_policy) = ctx.action_policy.filter(|a| a.enabled) else {
                return Ok(ToolResult::err("tool_not_allowed"));
            };
            if !action_policy.action_type_allowed(&action_type) {
                return Ok(ToolResult::err("action_type_not_allowed"));
            }
            let Some(pool) = ctx.pool else {
                return Ok(ToolResult::err("postgres_not_configured"));
            };
            let Some(case_id) = ctx.case_id else {
                return Ok(ToolResult::err("case_id_required"));
            };
            let proposal = actions::ActionProposal {
                case_id: case_id.to_string(),
                run_id: ctx.run_id.map(ToString::to_string),
                hypothesis_id,
                action_type,
                title,
                risk,
                preconditions,
                execution_payload,
                proposed_by: "tarka".to_string(),
            };
            match actions::create_case_action(pool, &proposal, action_policy.max_actions_per_case).await {
                Ok(Ok(value)) => Ok(ToolResult::ok(value)),
                Ok(Err(code)) => Ok(ToolResult::err(code)),
                Err(_) => Ok(ToolResult::err("db_unavailable")),
            }
        }

        // Global tools are routed in `dispatch`.
        _ => Ok(ToolResult::err("tool_not_allowed")),
    }
}

/// Rebuild a minimal investigation from the SSOT snapshot: enough for the
/// retrieval and skills filters (target, family, fingerprint).
fn investigation_from_snapshot(aj: &Value) -> Result<tarka_core::Investigation> {
    let raw = raw_alert_from_snapshot(aj);
    let alert = tarka_core::model::alert::normalize_webhook_alert(&raw, None);
    let target = tarka_core::labels::extract_target(&alert, snapshot_str(aj, &["target", "cluster"]));
    let mut inv = tarka_core::Investigation::new(alert, target, "1h", Utc::now());
    // Preserve the computed target fields the snapshot already resolved.
    if let Some(kind) = snapshot_str(aj, &["target", "workload_kind"]) {
        inv.target.workload_kind = Some(kind.to_string());
    }
    if let Some(name) = snapshot_str(aj, &["target", "workload_name"]) {
        inv.target.workload_name = Some(name.to_string());
    }
    inv.analysis.features = aj
        .pointer("/analysis/features")
        .and_then(|v| serde_json::from_value(v.clone()).ok());
    Ok(inv)
}

/// Rebuild the raw webhook alert from the snapshot for reruns.
fn raw_alert_from_snapshot(aj: &Value) -> Value {
    json!({
        "labels": aj.pointer("/alert/labels").cloned().unwrap_or(Value::Null),
        "annotations": aj.pointer("/alert/annotations").cloned().unwrap_or(Value::Null),
        "fingerprint": aj.pointer("/alert/fingerprint").cloned().unwrap_or(Value::Null),
        "startsAt": aj.pointer("/alert/starts_at").cloned().unwrap_or(Value::Null),
    })
}
