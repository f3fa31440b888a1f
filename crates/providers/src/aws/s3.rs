//! S3 validators: bucket existence and location.

use serde_json::{json, Value};

use super::{classify_aws_error, AwsClients};

/// HEAD the bucket. A 403 means the bucket exists but this principal
/// cannot touch it — which is itself a diagnostic datapoint (cross-account
/// bucket or restrictive bucket policy).
pub async fn check_s3_bucket_exists(aws: &AwsClients, bucket: &str) -> Value {
    match aws.s3.head_bucket().bucket(bucket).send().await {
        Ok(_) => json!({
            "bucket": bucket,
            "exists": true,
            "accessible": true,
        }),
        Err(e) => {
            let msg = format!("{e}");
            let raw = e.raw_response().map(|r| r.status().as_u16());
            match raw {
                Some(404) => json!({
                    "bucket": bucket,
                    "exists": false,
                    "accessible": false,
                    "error_code": "404",
                }),
                Some(403) => json!({
                    "bucket": bucket,
                    "exists": true,
                    "accessible": false,
                    "error_code": "403",
                    "note": "bucket exists but access is denied for this principal",
                }),
                _ => json!({
                    "bucket": bucket,
                    "exists": Value::Null,
                    "accessible": false,
                    "error_code": classify_aws_error(&msg),
                    "error": msg.chars().take(220).collect::<String>(),
                }),
            }
        }
    }
}

/// Resolve the bucket's region. Works for 403-on-HEAD buckets too since
/// `GetBucketLocation` is sometimes allowed where HEAD is not.
pub async fn get_s3_bucket_location(aws: &AwsClients, bucket: &str) -> Value {
    match aws.s3.get_bucket_location().bucket(bucket).send().await {
        Ok(out) => {
            // An absent LocationConstraint means us-east-1.
            let region = out
                .location_constraint()
                .map(|c| c.as_str().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "us-east-1".to_string());
            json!({"bucket": bucket, "region": region})
        }
        Err(e) => {
            let msg = format!("{e}");
            json!({
                "bucket": bucket,
                "region": Value::Null,
                "error_code": classify_aws_error(&msg),
                "error": msg.chars().take(220).collect::<String>(),
            })
        }
    }
}
