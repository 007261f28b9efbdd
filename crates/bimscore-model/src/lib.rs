//! BIM Scoring Model
//!
//! Pure types and rules shared by every other crate:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        bimscore-model                          │
//! ├────────────────────────────────────────────────────────────────┤
//! │                                                                │
//! │  foreign strings ──► status::normalize_* ──► closed enums      │
//! │                                                                │
//! │  EvidenceItem + ReviewRecord ──► lifecycle::effective_status   │
//! │                                        │                       │
//! │                                        ▼                       │
//! │                              ReviewStatusCounts                │
//! │                                                                │
//! │  Store { evidence, reviews, decisions, snapshots, locks, meta }│
//! │                                                                │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing in this crate performs I/O.

pub mod clock;
pub mod error;
pub mod lifecycle;
pub mod status;
pub mod types;

pub use clock::{monotonic_after, Clock, ManualClock, SystemClock};
pub use error::{ErrorKind, Result, WorkflowError};
pub use lifecycle::{applicable_review, count_statuses, effective_status, EvidenceView};
pub use status::{
    normalize_approval_decision, normalize_evidence_status, normalize_evidence_type,
    normalize_period_key, normalize_period_status, normalize_review_outcome, normalize_role,
    review_outcome_to_evidence_status, scope_key, ApprovalDecision, EffectiveStatus,
    EvidenceStatus, EvidenceType, PeriodStatus, ReviewOutcome, Role, UnrecognizedValue,
    UNKNOWN_PERIOD_KEY,
};
pub use types::{
    ApprovalDecisionRecord, EvidenceContent, EvidenceItem, IndicatorWeight, PeriodLockRecord,
    PeriodMeta, Perspective, PerspectiveScore, ProjectMeta, ReviewHistoryEntry, ReviewRecord,
    ReviewStatusCounts, ScoringModel, SnapshotRecord, Store,
};
