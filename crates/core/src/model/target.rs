//! Investigation target identity.

use serde::{Deserialize, Serialize};

/// What kind of object the investigation is scoped to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Pod,
    Workload,
    Service,
    #[default]
    None,
}

/// Identity of the thing under investigation, extracted label-first.
///
/// Fields stay `None` when the alert carries no usable signal; collectors
/// may fill workload identity in later (owner chain, label inference).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Target {
    pub target_type: TargetType,
    pub cluster: Option<String>,
    pub namespace: Option<String>,
    pub pod: Option<String>,
    pub container: Option<String>,
    pub workload_kind: Option<String>,
    pub workload_name: Option<String>,
    pub service: Option<String>,
    pub job: Option<String>,
    pub instance: Option<String>,
    pub team: Option<String>,
    pub playbook: Option<String>,
}

impl Target {
    /// Human-facing display name: pod, then workload, then service, then
    /// instance.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.pod
            .as_deref()
            .or(self.workload_name.as_deref())
            .or(self.service.as_deref())
            .or(self.instance.as_deref())
            .unwrap_or("unknown")
    }

    /// True when both pod and namespace identity are usable.
    #[must_use]
    pub fn has_pod_identity(&self) -> bool {
        let usable = |s: &Option<String>| {
            s.as_deref()
                .is_some_and(|v| !v.is_empty() && v != "Unknown" && v != "unknown")
        };
        usable(&self.pod) && usable(&self.namespace)
    }
}
