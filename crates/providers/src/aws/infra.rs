//! Infrastructure health probes used by the `aws.*` tool set.
//!
//! Each probe returns a JSON value; failures collapse into the stable
//! error-code shape so tool summaries stay uniform.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::{classify_aws_error, AwsClients};

fn err_value(context: &str, e: impl std::fmt::Display) -> Value {
    let msg = format!("{e}");
    json!({
        "status": "error",
        "context": context,
        "error_code": classify_aws_error(&msg),
        "error": msg.chars().take(220).collect::<String>(),
    })
}

/// EC2 instance status checks.
pub async fn ec2_status(aws: &AwsClients, instance_ids: &[String]) -> Value {
    let mut req = aws.ec2.describe_instance_status().include_all_instances(true);
    for id in instance_ids {
        req = req.instance_ids(id);
    }
    match req.send().await {
        Ok(out) => {
            let statuses: Vec<Value> = out
                .instance_statuses()
                .iter()
                .map(|s| {
                    json!({
                        "instance_id": s.instance_id(),
                        "state": s.instance_state().and_then(|st| st.name()).map(|n| n.as_str().to_string()),
                        "system_status": s.system_status().and_then(|st| st.status()).map(|v| v.as_str().to_string()),
                        "instance_status": s.instance_status().and_then(|st| st.status()).map(|v| v.as_str().to_string()),
                    })
                })
                .collect();
            json!({"status": "ok", "instances": statuses})
        }
        Err(e) => err_value("ec2_status", e),
    }
}

/// EBS volume health.
pub async fn ebs_health(aws: &AwsClients, volume_ids: &[String]) -> Value {
    let mut req = aws.ec2.describe_volume_status();
    for id in volume_ids {
        req = req.volume_ids(id);
    }
    match req.send().await {
        Ok(out) => {
            let vols: Vec<Value> = out
                .volume_statuses()
                .iter()
                .map(|v| {
                    json!({
                        "volume_id": v.volume_id(),
                        "status": v.volume_status().and_then(|s| s.status()).map(|x| x.as_str().to_string()),
                    })
                })
                .collect();
            json!({"status": "ok", "volumes": vols})
        }
        Err(e) => err_value("ebs_health", e),
    }
}

/// Load-balancer target health by target-group ARN.
pub async fn elb_health(aws: &AwsClients, target_group_arn: &str) -> Value {
    match aws
        .elb
        .describe_target_health()
        .target_group_arn(target_group_arn)
        .send()
        .await
    {
        Ok(out) => {
            let targets: Vec<Value> = out
                .target_health_descriptions()
                .iter()
                .map(|t| {
                    json!({
                        "target": t.target().map(|x| x.id().map(ToString::to_string)),
                        "state": t.target_health().and_then(|h| h.state()).map(|s| s.as_str().to_string()),
                        "reason": t.target_health().and_then(|h| h.reason()).map(|r| r.as_str().to_string()),
                    })
                })
                .collect();
            json!({"status": "ok", "targets": targets})
        }
        Err(e) => err_value("elb_health", e),
    }
}

/// RDS instance status.
pub async fn rds_status(aws: &AwsClients, db_instance_identifier: &str) -> Value {
    match aws
        .rds
        .describe_db_instances()
        .db_instance_identifier(db_instance_identifier)
        .send()
        .await
    {
        Ok(out) => {
            let instances: Vec<Value> = out
                .db_instances()
                .iter()
                .map(|db| {
                    json!({
                        "identifier": db.db_instance_identifier(),
                        "status": db.db_instance_status(),
                        "engine": db.engine(),
                        "endpoint": db.endpoint().and_then(|e| e.address()).map(ToString::to_string),
                        "multi_az": db.multi_az(),
                    })
                })
                .collect();
            json!({"status": "ok", "instances": instances})
        }
        Err(e) => err_value("rds_status", e),
    }
}

/// ECR image existence probe by tag or digest.
pub async fn ecr_image(
    aws: &AwsClients,
    repository: &str,
    tag: Option<&str>,
    digest: Option<&str>,
    registry_id: Option<&str>,
) -> Value {
    let mut image_id = aws_sdk_ecr::types::ImageIdentifier::builder();
    if let Some(t) = tag {
        image_id = image_id.image_tag(t);
    }
    if let Some(d) = digest {
        image_id = image_id.image_digest(d);
    }
    let mut req = aws
        .ecr
        .describe_images()
        .repository_name(repository)
        .image_ids(image_id.build());
    if let Some(r) = registry_id {
        req = req.registry_id(r);
    }
    match req.send().await {
        Ok(out) => {
            let images: Vec<Value> = out
                .image_details()
                .iter()
                .map(|d| {
                    json!({
                        "digest": d.image_digest(),
                        "tags": d.image_tags(),
                        "pushed_at": d.image_pushed_at().map(|t| t.to_string()),
                        "size_bytes": d.image_size_in_bytes(),
                    })
                })
                .collect();
            json!({"status": "ok", "repository": repository, "found": !images.is_empty(), "images": images})
        }
        Err(e) => {
            let msg = format!("{e}");
            if msg.contains("ImageNotFound") || msg.contains("RepositoryNotFound") {
                json!({"status": "ok", "repository": repository, "found": false, "error_code": "not_found"})
            } else {
                err_value("ecr_image", e)
            }
        }
    }
}

/// Security-group rule dump.
pub async fn security_group(aws: &AwsClients, group_id: &str) -> Value {
    match aws.ec2.describe_security_groups().group_ids(group_id).send().await {
        Ok(out) => {
            let groups: Vec<Value> = out
                .security_groups()
                .iter()
                .map(|g| {
                    json!({
                        "group_id": g.group_id(),
                        "name": g.group_name(),
                        "ingress_rule_count": g.ip_permissions().len(),
                        "egress_rule_count": g.ip_permissions_egress().len(),
                    })
                })
                .collect();
            json!({"status": "ok", "groups": groups})
        }
        Err(e) => err_value("security_group", e),
    }
}

/// NAT gateway state.
pub async fn nat_gateway(aws: &AwsClients, nat_gateway_id: Option<&str>) -> Value {
    let mut req = aws.ec2.describe_nat_gateways();
    if let Some(id) = nat_gateway_id {
        req = req.nat_gateway_ids(id);
    }
    match req.send().await {
        Ok(out) => {
            let gws: Vec<Value> = out
                .nat_gateways()
                .iter()
                .map(|g| {
                    json!({
                        "id": g.nat_gateway_id(),
                        "state": g.state().map(|s| s.as_str().to_string()),
                        "vpc_id": g.vpc_id(),
                    })
                })
                .collect();
            json!({"status": "ok", "nat_gateways": gws})
        }
        Err(e) => err_value("nat_gateway", e),
    }
}

/// VPC endpoint state.
pub async fn vpc_endpoint(aws: &AwsClients, vpc_endpoint_id: Option<&str>) -> Value {
    let mut req = aws.ec2.describe_vpc_endpoints();
    if let Some(id) = vpc_endpoint_id {
        req = req.vpc_endpoint_ids(id);
    }
    match req.send().await {
        Ok(out) => {
            let eps: Vec<Value> = out
                .vpc_endpoints()
                .iter()
                .map(|e| {
                    json!({
                        "id": e.vpc_endpoint_id(),
                        "service": e.service_name(),
                        "state": e.state().map(|s| s.as_str().to_string()),
                    })
                })
                .collect();
            json!({"status": "ok", "endpoints": eps})
        }
        Err(e) => err_value("vpc_endpoint", e),
    }
}

/// Recent CloudTrail events, optionally filtered by resource name.
pub async fn cloudtrail_events(
    aws: &AwsClients,
    resource_name: Option<&str>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    max_results: i32,
) -> Value {
    let mut req = aws
        .cloudtrail
        .lookup_events()
        .start_time(aws_sdk_cloudtrail::primitives::DateTime::from_secs(start.timestamp()))
        .end_time(aws_sdk_cloudtrail::primitives::DateTime::from_secs(end.timestamp()))
        .max_results(max_results.clamp(1, 50));
    if let Some(name) = resource_name {
        req = req.lookup_attributes(
            aws_sdk_cloudtrail::types::LookupAttribute::builder()
                .attribute_key(aws_sdk_cloudtrail::types::LookupAttributeKey::ResourceName)
                .attribute_value(name)
                .build()
                .expect("lookup attribute"),
        );
    }
    match req.send().await {
        Ok(out) => {
            let events: Vec<Value> = out
                .events()
                .iter()
                .map(|e| {
                    json!({
                        "event_name": e.event_name(),
                        "event_time": e.event_time().map(|t| t.to_string()),
                        "username": e.username(),
                        "event_source": e.event_source(),
                    })
                })
                .collect();
            json!({"status": "ok", "events": events})
        }
        Err(e) => err_value("cloudtrail_events", e),
    }
}
