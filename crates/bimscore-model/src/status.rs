//! Canonical status vocabulary.
//!
//! Every status string that arrives from the stored document, a legacy
//! payload or the backend crosses exactly one `normalize_*` function in this
//! module. Business logic only ever compares the enums defined here.
//!
//! ```text
//!   "needs revision" ─┐
//!   "Needs-Revision" ─┼──► canonical_token() ──► "NEEDS_REVISION" ──► ReviewOutcome::NeedsRevision
//!   "NEEDS_REVISION" ─┘
//!   "whatever"       ─────► canonical_token() ──► "WHATEVER"       ──► None
//! ```
//!
//! The normalizers never panic and never perform I/O. `None` is the typed
//! "unrecognized" answer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Period key used when an item carries no resolvable period id.
pub const UNKNOWN_PERIOD_KEY: &str = "__unknown_active_period__";

// ============================================================================
// Enums
// ============================================================================

/// Raw lifecycle status stored on an evidence item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceStatus {
    Draft,
    Submitted,
    NeedsRevision,
}

/// Status of a scoring period. There is no transition out of `Locked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodStatus {
    Open,
    Locked,
}

/// Outcome of a head-office review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewOutcome {
    Acceptable,
    NeedsRevision,
    Rejected,
}

/// Manager decision on a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalDecision {
    ApprovePeriod,
    RejectApproval,
}

/// Kind of evidence payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceType {
    File,
    Url,
    Text,
}

/// Caller role. Sent to the backend as a header and checked locally before
/// any mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Coordinator,
    Reviewer,
    Manager,
    Admin,
}

/// Display-facing lifecycle state derived from raw status plus review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EffectiveStatus {
    Draft,
    Submitted,
    NeedsRevision,
    Acceptable,
    Rejected,
}

// ============================================================================
// Normalization
// ============================================================================

/// Uppercase, collapse runs of separators into a single `_`, strip the ends.
fn canonical_token(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_sep = false;
    for ch in input.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(ch.to_uppercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

pub fn normalize_evidence_status(input: &str) -> Option<EvidenceStatus> {
    match canonical_token(input).as_str() {
        "DRAFT" => Some(EvidenceStatus::Draft),
        "SUBMITTED" => Some(EvidenceStatus::Submitted),
        "NEEDS_REVISION" | "NEEDSREVISION" => Some(EvidenceStatus::NeedsRevision),
        _ => None,
    }
}

pub fn normalize_period_status(input: &str) -> Option<PeriodStatus> {
    match canonical_token(input).as_str() {
        "OPEN" => Some(PeriodStatus::Open),
        "LOCKED" => Some(PeriodStatus::Locked),
        _ => None,
    }
}

pub fn normalize_review_outcome(input: &str) -> Option<ReviewOutcome> {
    match canonical_token(input).as_str() {
        "ACCEPTABLE" => Some(ReviewOutcome::Acceptable),
        "NEEDS_REVISION" | "NEEDSREVISION" => Some(ReviewOutcome::NeedsRevision),
        "REJECTED" => Some(ReviewOutcome::Rejected),
        _ => None,
    }
}

pub fn normalize_approval_decision(input: &str) -> Option<ApprovalDecision> {
    match canonical_token(input).as_str() {
        "APPROVE_PERIOD" | "APPROVE" => Some(ApprovalDecision::ApprovePeriod),
        "REJECT_APPROVAL" | "REJECT" => Some(ApprovalDecision::RejectApproval),
        _ => None,
    }
}

pub fn normalize_evidence_type(input: &str) -> Option<EvidenceType> {
    match canonical_token(input).as_str() {
        "FILE" => Some(EvidenceType::File),
        "URL" | "LINK" => Some(EvidenceType::Url),
        "TEXT" => Some(EvidenceType::Text),
        _ => None,
    }
}

pub fn normalize_role(input: &str) -> Option<Role> {
    match canonical_token(input).as_str() {
        "COORDINATOR" | "PROJECT_COORDINATOR" | "PC" => Some(Role::Coordinator),
        "REVIEWER" | "HEAD_OFFICE" | "HEAD_OFFICE_REVIEWER" | "HO" => Some(Role::Reviewer),
        "MANAGER" | "BIM_MANAGER" => Some(Role::Manager),
        "ADMIN" | "ADMINISTRATOR" => Some(Role::Admin),
        _ => None,
    }
}

/// Evidence status implied by a review outcome.
///
/// Only NEEDS REVISION reopens an item; ACCEPTABLE and REJECTED keep it
/// SUBMITTED and surface through [`EffectiveStatus`] instead.
pub fn review_outcome_to_evidence_status(outcome: ReviewOutcome) -> EvidenceStatus {
    match outcome {
        ReviewOutcome::NeedsRevision => EvidenceStatus::NeedsRevision,
        ReviewOutcome::Acceptable | ReviewOutcome::Rejected => EvidenceStatus::Submitted,
    }
}

/// Grouping key for a possibly missing period id.
pub fn normalize_period_key(period_id: Option<&str>) -> String {
    match period_id.map(str::trim) {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => UNKNOWN_PERIOD_KEY.to_string(),
    }
}

/// `project::period` key. Always recomputed, never read from a payload.
pub fn scope_key(project_id: &str, period_id: Option<&str>) -> String {
    format!("{}::{}", project_id.trim(), normalize_period_key(period_id))
}

// ============================================================================
// Display / FromStr
// ============================================================================

impl EvidenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceStatus::Draft => "DRAFT",
            EvidenceStatus::Submitted => "SUBMITTED",
            EvidenceStatus::NeedsRevision => "NEEDS_REVISION",
        }
    }
}

impl PeriodStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodStatus::Open => "OPEN",
            PeriodStatus::Locked => "LOCKED",
        }
    }
}

impl ReviewOutcome {
    /// Wire value (`decision` field of the review endpoint).
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewOutcome::Acceptable => "ACCEPTABLE",
            ReviewOutcome::NeedsRevision => "NEEDS_REVISION",
            ReviewOutcome::Rejected => "REJECTED",
        }
    }

    /// Human label as shown to reviewers.
    pub fn label(&self) -> &'static str {
        match self {
            ReviewOutcome::Acceptable => "ACCEPTABLE",
            ReviewOutcome::NeedsRevision => "NEEDS REVISION",
            ReviewOutcome::Rejected => "REJECTED",
        }
    }
}

impl ApprovalDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalDecision::ApprovePeriod => "APPROVE_PERIOD",
            ApprovalDecision::RejectApproval => "REJECT_APPROVAL",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ApprovalDecision::ApprovePeriod => "APPROVE PERIOD",
            ApprovalDecision::RejectApproval => "REJECT APPROVAL",
        }
    }
}

impl EvidenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceType::File => "FILE",
            EvidenceType::Url => "URL",
            EvidenceType::Text => "TEXT",
        }
    }
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Coordinator => "COORDINATOR",
            Role::Reviewer => "REVIEWER",
            Role::Manager => "MANAGER",
            Role::Admin => "ADMIN",
        }
    }
}

impl EffectiveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EffectiveStatus::Draft => "DRAFT",
            EffectiveStatus::Submitted => "SUBMITTED",
            EffectiveStatus::NeedsRevision => "NEEDS_REVISION",
            EffectiveStatus::Acceptable => "ACCEPTABLE",
            EffectiveStatus::Rejected => "REJECTED",
        }
    }

    /// Whether the submitting role may edit and resubmit the item.
    pub fn is_reopened(&self) -> bool {
        matches!(
            self,
            EffectiveStatus::Draft | EffectiveStatus::NeedsRevision | EffectiveStatus::Rejected
        )
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(
    EvidenceStatus,
    PeriodStatus,
    ReviewOutcome,
    ApprovalDecision,
    EvidenceType,
    Role,
    EffectiveStatus
);

/// A status string outside the closed vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized {kind} `{value}`")]
pub struct UnrecognizedValue {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! from_str_via {
    ($ty:ty, $normalize:path, $kind:literal) => {
        impl FromStr for $ty {
            type Err = UnrecognizedValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $normalize(s).ok_or_else(|| UnrecognizedValue {
                    kind: $kind,
                    value: s.to_string(),
                })
            }
        }
    };
}

from_str_via!(EvidenceStatus, normalize_evidence_status, "evidence status");
from_str_via!(PeriodStatus, normalize_period_status, "period status");
from_str_via!(ReviewOutcome, normalize_review_outcome, "review outcome");
from_str_via!(ApprovalDecision, normalize_approval_decision, "approval decision");
from_str_via!(EvidenceType, normalize_evidence_type, "evidence type");
from_str_via!(Role, normalize_role, "role");
