//! Core data model and identity algebra for Tarka.
//!
//! Everything in this crate is pure: no I/O, no clocks except those passed
//! in by callers. The webhook receiver, worker, pipeline and chat runtimes
//! all build on these types.

pub mod dedup;
pub mod error;
pub mod family;
pub mod labels;
pub mod model;
pub mod redact;
pub mod search;
pub mod snapshot;

pub use error::{Error, Result};
pub use family::Family;
pub use model::alert::{Alert, AlertState};
pub use model::analysis::{
    Analysis, CapacityReport, ChangeCorrelation, Classification, EnrichmentInsights, Features,
    Hypothesis, NoiseAssessment, RcaInsights, RcaStatus, Scores, Verdict,
};
pub use model::case::{ActionStatus, Case, CaseAction, CaseStatus, InvestigationRun};
pub use model::chat::{ChatMessage, ChatRole, ChatStreamEvent, ChatStreamEventType, ChatThread};
pub use model::investigation::{Evidence, Investigation, TimeWindow};
pub use model::target::{Target, TargetType};
pub use model::tool::{ChatToolEvent, ToolOutcome, ToolResult};
