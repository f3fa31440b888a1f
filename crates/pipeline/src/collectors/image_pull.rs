//! Image pull diagnostics helpers.
//!
//! Image references and kubelet error messages are parsed into stable,
//! actionable hints. ECR tag/digest verification is optional and happens
//! in the pod_not_healthy collector when credentials exist.

use std::sync::LazyLock;

use regex::Regex;

static ECR_HOST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<acct>\d+)\.dkr\.ecr\.(?P<region>[a-z0-9-]+)\.amazonaws\.com$").expect("static pattern")
});

/// Parsed image reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageRef {
    pub raw: String,
    pub registry_host: Option<String>,
    pub repository: Option<String>,
    pub tag: Option<String>,
    pub digest: Option<String>,
    pub is_ecr: bool,
    pub ecr_region: Option<String>,
    pub ecr_registry_id: Option<String>,
}

/// Split `registry/repo:tag@digest` into its parts, with ECR host
/// detection.
#[must_use]
pub fn parse_image_ref(image: &str) -> ImageRef {
    let raw = image.trim().to_string();
    let mut host: Option<String> = None;
    let mut rest = raw.clone();

    // The first path component is a registry host only when it looks like
    // one (dot, port, or localhost).
    if let Some((first, remainder)) = raw.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            host = Some(first.to_string());
            rest = remainder.to_string();
        }
    }

    let mut digest = None;
    let mut tag = None;
    let repo;
    if let Some((r, d)) = rest.split_once('@') {
        repo = r.to_string();
        digest = Some(d.to_string());
    } else if let Some((r, t)) = rest.rsplit_once(':') {
        // The tag is after the last ':' only; host:port confusion is gone
        // since the host was split off above.
        repo = r.to_string();
        tag = Some(t.to_string());
    } else {
        repo = rest;
    }

    let mut is_ecr = false;
    let mut region = None;
    let mut registry_id = None;
    if let Some(h) = &host {
        if let Some(caps) = ECR_HOST_RE.captures(h) {
            is_ecr = true;
            region = caps.name("region").map(|m| m.as_str().to_string());
            registry_id = caps.name("acct").map(|m| m.as_str().to_string());
        }
    }

    ImageRef {
        raw,
        registry_host: host,
        repository: Some(repo).filter(|r| !r.is_empty()),
        tag: tag.filter(|t| !t.is_empty()),
        digest: digest.filter(|d| !d.is_empty()),
        is_ecr,
        ecr_region: region,
        ecr_registry_id: registry_id,
    }
}

/// Extract an image reference from common kubelet/containerd event
/// messages.
#[must_use]
pub fn extract_image_from_message(msg: &str) -> Option<String> {
    static QUOTED: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r#"image\s+"([^"]+)""#).expect("static pattern"));
    static BARE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)pull(?:ing)? image\s+(\S+)").expect("static pattern"));

    if let Some(c) = QUOTED.captures(msg) {
        let s = c[1].trim();
        if !s.is_empty() {
            return Some(s.to_string());
        }
    }
    if let Some(c) = BARE.captures(msg) {
        let s = c[1].trim_matches('"').trim();
        if !s.is_empty() {
            return Some(s.to_string());
        }
    }
    None
}

/// Map a pull error message into a stable bucket with an evidence snippet.
/// Buckets: `not_found | auth | tls | network | unknown`.
#[must_use]
pub fn classify_pull_error(msg: &str) -> (&'static str, String) {
    let s = msg.trim();
    let sl = s.to_ascii_lowercase();
    let snippet: String = s.chars().take(220).collect();

    if sl.contains("notfound") || sl.contains("404") || sl.contains("manifest unknown") {
        return ("not_found", snippet);
    }
    if ["unauthorized", "authentication required", "denied", "forbidden", "no basic auth credentials"]
        .iter()
        .any(|x| sl.contains(x))
    {
        return ("auth", snippet);
    }
    if ["x509", "certificate", "tls handshake", "unknown authority"]
        .iter()
        .any(|x| sl.contains(x))
    {
        return ("tls", snippet);
    }
    if ["i/o timeout", "context deadline", "no such host", "dial tcp", "connection refused", "timed out"]
        .iter()
        .any(|x| sl.contains(x))
    {
        return ("network", snippet);
    }
    ("unknown", snippet)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_reference() {
        let r = parse_image_ref("123456789012.dkr.ecr.us-east-1.amazonaws.com/payments:v1.2.3");
        assert!(r.is_ecr);
        assert_eq!(r.ecr_region.as_deref(), Some("us-east-1"));
        assert_eq!(r.ecr_registry_id.as_deref(), Some("123456789012"));
        assert_eq!(r.repository.as_deref(), Some("payments"));
        assert_eq!(r.tag.as_deref(), Some("v1.2.3"));
    }

    #[test]
    fn test_parse_digest_and_bare() {
        let r = parse_image_ref("ghcr.io/acme/api@sha256:abc123");
        assert_eq!(r.digest.as_deref(), Some("sha256:abc123"));
        assert!(r.tag.is_none());

        let r = parse_image_ref("nginx");
        assert!(r.registry_host.is_none());
        assert_eq!(r.repository.as_deref(), Some("nginx"));
    }

    #[test]
    fn test_parse_host_port() {
        let r = parse_image_ref("localhost:5000/app:dev");
        assert_eq!(r.registry_host.as_deref(), Some("localhost:5000"));
        assert_eq!(r.repository.as_deref(), Some("app"));
        assert_eq!(r.tag.as_deref(), Some("dev"));
    }

    #[test]
    fn test_extract_image_from_message() {
        assert_eq!(
            extract_image_from_message(r#"Failed to pull image "ghcr.io/acme/api:v2": not found"#).as_deref(),
            Some("ghcr.io/acme/api:v2")
        );
        assert_eq!(
            extract_image_from_message("Pulling image ghcr.io/acme/api:v2").as_deref(),
            Some("ghcr.io/acme/api:v2")
        );
        assert!(extract_image_from_message("no image here").is_none());
    }

    #[test]
    fn test_classify_pull_error_buckets() {
        assert_eq!(classify_pull_error("manifest unknown: tag v3 not found").0, "not_found");
        assert_eq!(classify_pull_error("pull access denied, authorization failed").0, "auth");
        assert_eq!(classify_pull_error("x509: certificate signed by unknown authority").0, "tls");
        assert_eq!(classify_pull_error("dial tcp 1.2.3.4:443: i/o timeout").0, "network");
        assert_eq!(classify_pull_error("something else").0, "unknown");
    }

    #[test]
    fn test_snippet_cap() {
        let long = "denied ".repeat(100);
        let (bucket, snippet) = classify_pull_error(&long);
        assert_eq!(bucket, "auth");
        assert!(snippet.chars().count() <= 220);
    }
}
