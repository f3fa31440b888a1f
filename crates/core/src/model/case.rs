//! Case, run and action records mirrored from the relational index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Ids are UUID columns in Postgres; the core model carries them as
// strings so this crate stays free of database dependencies.
type Uuid = String;

/// Case lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Open,
    Closed,
}

impl CaseStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

/// A persistent incident record grouping runs by stable identity.
///
/// Invariant: a `case_key` maps to at most one open case at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub case_id: Uuid,
    pub case_key: String,
    pub status: CaseStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_category: Option<String>,
    pub resolution_summary: Option<String>,
    pub postmortem_link: Option<String>,
    pub cluster: Option<String>,
    pub target_type: Option<String>,
    pub namespace: Option<String>,
    pub workload_kind: Option<String>,
    pub workload_name: Option<String>,
    pub service: Option<String>,
    pub instance: Option<String>,
    pub family: Option<String>,
    pub primary_driver: Option<String>,
    pub latest_one_liner: Option<String>,
    pub s3_report_key: Option<String>,
    pub s3_investigation_key: Option<String>,
}

/// One pipeline invocation, indexed under exactly one case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationRun {
    pub run_id: Uuid,
    pub case_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub alert_fingerprint: Option<String>,
    pub alertname: Option<String>,
    pub severity: Option<String>,
    pub cluster: Option<String>,
    pub namespace: Option<String>,
    pub pod: Option<String>,
    pub container: Option<String>,
    pub workload_kind: Option<String>,
    pub workload_name: Option<String>,
    pub service: Option<String>,
    pub instance: Option<String>,
    pub family: Option<String>,
    pub classification: Option<String>,
    pub primary_driver: Option<String>,
    pub one_liner: Option<String>,
    pub s3_report_key: Option<String>,
    pub s3_investigation_key: Option<String>,
    /// The versioned analysis snapshot (SSOT JSON).
    pub analysis_json: Value,
    pub case_match_reason: Option<String>,
}

/// Action proposal lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Proposed,
    Approved,
    Rejected,
    Executed,
}

impl ActionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Executed => "executed",
        }
    }

    /// Allowed transitions; everything else is rejected at the store layer.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Proposed, Self::Approved)
                | (Self::Proposed, Self::Rejected)
                | (Self::Approved, Self::Executed)
                | (Self::Approved, Self::Rejected)
        )
    }
}

/// A proposed remediation. The core never executes anything on its own;
/// execution is a human-gated transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseAction {
    pub action_id: Uuid,
    pub case_id: Uuid,
    pub run_id: Option<Uuid>,
    pub hypothesis_id: Option<String>,
    pub action_type: String,
    pub title: String,
    pub risk: Option<String>,
    #[serde(default)]
    pub preconditions: Vec<String>,
    pub execution_payload: Value,
    pub status: ActionStatus,
    pub proposed_by: String,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub executed_at: Option<DateTime<Utc>>,
    pub executed_by: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_transitions() {
        assert!(ActionStatus::Proposed.can_transition_to(ActionStatus::Approved));
        assert!(ActionStatus::Proposed.can_transition_to(ActionStatus::Rejected));
        assert!(ActionStatus::Approved.can_transition_to(ActionStatus::Executed));
        assert!(!ActionStatus::Proposed.can_transition_to(ActionStatus::Executed));
        assert!(!ActionStatus::Rejected.can_transition_to(ActionStatus::Approved));
        assert!(!ActionStatus::Executed.can_transition_to(ActionStatus::Approved));
    }
}
