//! IAM role inspection for IRSA debugging.

use serde_json::{json, Map, Value};

use super::{classify_aws_error, AwsClients};

/// The annotation EKS uses to bind a service account to an IAM role.
pub const IRSA_ANNOTATION: &str = "eks.amazonaws.com/role-arn";

/// Extract the role name from a role ARN
/// (`arn:aws:iam::123456789012:role/my-role` -> `my-role`).
#[must_use]
pub fn extract_role_name_from_arn(role_arn: &str) -> String {
    role_arn
        .rsplit('/')
        .next()
        .unwrap_or(role_arn)
        .to_string()
}

/// Fetch role info: trust policy plus attached and inline policy documents.
/// The policy documents are returned verbatim so the RCA loop can reason
/// about whether a specific bucket/resource is allowed.
pub async fn get_iam_role_info(aws: &AwsClients, role_name: &str) -> Value {
    let role = match aws.iam.get_role().role_name(role_name).send().await {
        Ok(out) => out.role,
        Err(e) => {
            let msg = format!("{e}");
            return json!({
                "role_name": role_name,
                "found": false,
                "error_code": classify_aws_error(&msg),
                "error": msg.chars().take(220).collect::<String>(),
            });
        }
    };

    let Some(role) = role else {
        return json!({"role_name": role_name, "found": false});
    };

    let trust_policy: Value = role
        .assume_role_policy_document()
        .and_then(|doc| urlencoding_decode(doc))
        .and_then(|doc| serde_json::from_str(&doc).ok())
        .unwrap_or(Value::Null);

    let mut attached: Vec<Value> = Vec::new();
    if let Ok(out) = aws
        .iam
        .list_attached_role_policies()
        .role_name(role_name)
        .send()
        .await
    {
        for p in out.attached_policies() {
            attached.push(json!({
                "policy_name": p.policy_name(),
                "policy_arn": p.policy_arn(),
            }));
        }
    }

    let mut inline: Map<String, Value> = Map::new();
    if let Ok(out) = aws.iam.list_role_policies().role_name(role_name).send().await {
        for name in out.policy_names() {
            if let Ok(pol) = aws
                .iam
                .get_role_policy()
                .role_name(role_name)
                .policy_name(name)
                .send()
                .await
            {
                let doc = urlencoding_decode(pol.policy_document())
                    .and_then(|d| serde_json::from_str::<Value>(&d).ok())
                    .unwrap_or(Value::Null);
                inline.insert(name.to_string(), doc);
            }
        }
    }

    json!({
        "role_name": role_name,
        "found": true,
        "arn": role.arn(),
        "trust_policy": trust_policy,
        "attached_policies": attached,
        "inline_policies": Value::Object(inline),
    })
}

/// Check that a trust policy actually federates to an EKS OIDC provider
/// with the `sts:AssumeRoleWithWebIdentity` action.
#[must_use]
pub fn check_irsa_trust_policy(trust_policy: &Value) -> Value {
    let statements = trust_policy
        .get("Statement")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut has_web_identity = false;
    let mut has_oidc_federation = false;
    for st in &statements {
        let action_matches = match st.get("Action") {
            Some(Value::String(a)) => a == "sts:AssumeRoleWithWebIdentity",
            Some(Value::Array(actions)) => actions
                .iter()
                .any(|a| a.as_str() == Some("sts:AssumeRoleWithWebIdentity")),
            _ => false,
        };
        if action_matches {
            has_web_identity = true;
        }
        if let Some(fed) = st.get("Principal").and_then(|p| p.get("Federated")).and_then(Value::as_str) {
            if fed.contains("oidc-provider") {
                has_oidc_federation = true;
            }
        }
    }

    let ok = has_web_identity && has_oidc_federation;
    json!({
        "valid_irsa_trust": ok,
        "has_web_identity_action": has_web_identity,
        "has_oidc_federation": has_oidc_federation,
        "statement_count": statements.len(),
    })
}

// Trust policy documents come back URL-encoded from the IAM API.
fn urlencoding_decode(s: &str) -> Option<String> {
    let mut out = String::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(byte as char);
                i += 3;
                continue;
            }
        }
        if bytes[i] == b'+' {
            out.push(' ');
        } else {
            out.push(bytes[i] as char);
        }
        i += 1;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_role_name() {
        assert_eq!(
            extract_role_name_from_arn("arn:aws:iam::123456789012:role/etl-writer"),
            "etl-writer"
        );
        assert_eq!(extract_role_name_from_arn("plain-name"), "plain-name");
    }

    #[test]
    fn test_irsa_trust_check() {
        let good = serde_json::json!({
            "Statement": [{
                "Action": "sts:AssumeRoleWithWebIdentity",
                "Principal": {"Federated": "arn:aws:iam::1:oidc-provider/oidc.eks.us-east-1.amazonaws.com/id/X"}
            }]
        });
        let v = check_irsa_trust_policy(&good);
        assert_eq!(v["valid_irsa_trust"], true);

        let bad = serde_json::json!({
            "Statement": [{"Action": "sts:AssumeRole", "Principal": {"Service": "ec2.amazonaws.com"}}]
        });
        let v = check_irsa_trust_policy(&bad);
        assert_eq!(v["valid_irsa_trust"], false);
    }

    #[test]
    fn test_urldecode() {
        assert_eq!(
            urlencoding_decode("%7B%22a%22%3A1%7D").as_deref(),
            Some("{\"a\":1}")
        );
    }
}
