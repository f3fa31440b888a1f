//! AWS evidence providers.
//!
//! All read-only. Results are JSON values with stable shapes; permission
//! boundaries come back as `agent_lacks_permission` rather than errors —
//! for the RCA loop an AccessDenied is diagnostic evidence, not a failure.

pub mod iam;
pub mod infra;
pub mod s3;

use aws_config::BehaviorVersion;

/// Bundle of AWS SDK clients built from the ambient credential chain.
#[derive(Clone)]
pub struct AwsClients {
    pub s3: aws_sdk_s3::Client,
    pub iam: aws_sdk_iam::Client,
    pub ec2: aws_sdk_ec2::Client,
    pub rds: aws_sdk_rds::Client,
    pub ecr: aws_sdk_ecr::Client,
    pub elb: aws_sdk_elasticloadbalancingv2::Client,
    pub cloudtrail: aws_sdk_cloudtrail::Client,
    pub region: Option<String>,
}

impl AwsClients {
    /// Load from the default provider chain (env, IRSA, instance profile).
    pub async fn from_env() -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Self {
            s3: aws_sdk_s3::Client::new(&config),
            iam: aws_sdk_iam::Client::new(&config),
            ec2: aws_sdk_ec2::Client::new(&config),
            rds: aws_sdk_rds::Client::new(&config),
            ecr: aws_sdk_ecr::Client::new(&config),
            elb: aws_sdk_elasticloadbalancingv2::Client::new(&config),
            cloudtrail: aws_sdk_cloudtrail::Client::new(&config),
            region: config.region().map(ToString::to_string),
        }
    }
}

/// Map an SDK error message onto a stable code.
#[must_use]
pub fn classify_aws_error(msg: &str) -> &'static str {
    let m = msg.to_ascii_lowercase();
    if m.contains("accessdenied") || m.contains("unauthorizedoperation") || m.contains("forbidden") {
        "agent_lacks_permission"
    } else if m.contains("notfound") || m.contains("nosuchbucket") || m.contains("does not exist") {
        "not_found"
    } else if m.contains("expiredtoken") || m.contains("invalidclienttokenid") || m.contains("credentials") {
        "credentials_unavailable"
    } else if m.contains("throttl") || m.contains("rate exceeded") {
        "throttled"
    } else {
        "aws_error"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_aws_error() {
        assert_eq!(classify_aws_error("User is not authorized: AccessDenied"), "agent_lacks_permission");
        assert_eq!(classify_aws_error("NoSuchBucket: the bucket does not exist"), "not_found");
        assert_eq!(classify_aws_error("ExpiredToken"), "credentials_unavailable");
        assert_eq!(classify_aws_error("Rate exceeded"), "throttled");
        assert_eq!(classify_aws_error("weird"), "aws_error");
    }
}
