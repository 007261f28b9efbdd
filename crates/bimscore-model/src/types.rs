//! Records held by the local store and exchanged with the backend.

use crate::status::{
    normalize_period_key, scope_key, ApprovalDecision, EvidenceStatus, EvidenceType, PeriodStatus,
    ReviewOutcome,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Evidence
// ============================================================================

/// Type-specific evidence payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceContent {
    File {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        view_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        download_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reference_url: Option<String>,
    },
    Url {
        external_url: String,
    },
    Text {
        text: String,
    },
}

impl EvidenceContent {
    pub fn evidence_type(&self) -> EvidenceType {
        match self {
            EvidenceContent::File { .. } => EvidenceType::File,
            EvidenceContent::Url { .. } => EvidenceType::Url,
            EvidenceContent::Text { .. } => EvidenceType::Text,
        }
    }

    /// The single URI/body the backend stores in its `uri` column.
    pub fn uri(&self) -> Option<&str> {
        match self {
            EvidenceContent::File {
                view_url,
                download_url,
                reference_url,
            } => view_url
                .as_deref()
                .or(download_url.as_deref())
                .or(reference_url.as_deref()),
            EvidenceContent::Url { external_url } => Some(external_url.as_str()),
            EvidenceContent::Text { text } => Some(text.as_str()),
        }
    }

    /// Whether the payload carries something a reviewer can open or read.
    pub fn is_complete(&self) -> bool {
        self.uri().map_or(false, |u| !u.trim().is_empty())
    }
}

/// A single submitted artifact tracked through review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub period_id: Option<String>,
    #[serde(flatten)]
    pub content: EvidenceContent,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub indicator_ids: Vec<String>,
    pub status: EvidenceStatus,
    /// Backend optimistic-concurrency token.
    #[serde(default)]
    pub version: Option<i64>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl EvidenceItem {
    pub fn evidence_type(&self) -> EvidenceType {
        self.content.evidence_type()
    }

    pub fn period_key(&self) -> String {
        normalize_period_key(self.period_id.as_deref())
    }

    pub fn scope_key(&self) -> String {
        scope_key(&self.project_id, self.period_id.as_deref())
    }

    /// Timestamp compared against a review to detect resubmission.
    pub fn submission_marker(&self) -> DateTime<Utc> {
        self.submitted_at.unwrap_or(self.updated_at)
    }

    pub fn in_scope(&self, project_id: &str, period_id: Option<&str>) -> bool {
        self.scope_key() == scope_key(project_id, period_id)
    }
}

// ============================================================================
// Reviews
// ============================================================================

/// One reviewer judgement. Field order drives the derived ordering: time
/// first, the rest only breaks ties deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReviewHistoryEntry {
    pub reviewed_at: DateTime<Utc>,
    pub outcome: ReviewOutcome,
    pub reviewed_by: String,
    pub reason: String,
}

/// Latest review outcome for one evidence item plus its full history.
///
/// The "current" fields are never set directly; they are always the tail of
/// `review_history` after sorting by `reviewed_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub evidence_id: String,
    pub project_id: String,
    #[serde(default)]
    pub period_id: Option<String>,
    pub outcome: ReviewOutcome,
    pub reason: String,
    pub reviewed_by: String,
    pub reviewed_at: DateTime<Utc>,
    pub review_history: Vec<ReviewHistoryEntry>,
}

impl ReviewRecord {
    /// Build a record from an unordered history. Returns `None` for an empty
    /// history since a review record without an entry has no outcome.
    pub fn from_history(
        evidence_id: &str,
        project_id: &str,
        period_id: Option<&str>,
        mut history: Vec<ReviewHistoryEntry>,
    ) -> Option<Self> {
        history.sort();
        history.dedup();
        let last = history.last()?.clone();
        Some(Self {
            evidence_id: evidence_id.to_string(),
            project_id: project_id.to_string(),
            period_id: period_id.map(str::to_string),
            outcome: last.outcome,
            reason: last.reason,
            reviewed_by: last.reviewed_by,
            reviewed_at: last.reviewed_at,
            review_history: history,
        })
    }

    /// Append an entry and recompute the current fields.
    pub fn append(&mut self, entry: ReviewHistoryEntry) {
        self.review_history.push(entry);
        self.refresh_current();
    }

    /// Re-sort the history and derive the current fields from its tail.
    pub fn refresh_current(&mut self) {
        self.review_history.sort();
        self.review_history.dedup();
        if let Some(last) = self.review_history.last() {
            self.outcome = last.outcome;
            self.reason = last.reason.clone();
            self.reviewed_by = last.reviewed_by.clone();
            self.reviewed_at = last.reviewed_at;
        }
    }

    pub fn scope_key(&self) -> String {
        scope_key(&self.project_id, self.period_id.as_deref())
    }
}

// ============================================================================
// Period decisions, locks, snapshots
// ============================================================================

/// Lock on a period. Absence of a record means the period is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodLockRecord {
    pub project_id: String,
    #[serde(default)]
    pub period_id: Option<String>,
    pub status: PeriodStatus,
    pub locked_at: DateTime<Utc>,
    pub locked_by: String,
    #[serde(default)]
    pub snapshot_id: Option<String>,
}

impl PeriodLockRecord {
    pub fn scope_key(&self) -> String {
        scope_key(&self.project_id, self.period_id.as_deref())
    }
}

/// Append-only manager decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecisionRecord {
    pub project_id: String,
    #[serde(default)]
    pub period_id: Option<String>,
    pub decision: ApprovalDecision,
    pub reason: String,
    pub decided_by: String,
    pub decided_at: DateTime<Utc>,
}

impl ApprovalDecisionRecord {
    pub fn scope_key(&self) -> String {
        scope_key(&self.project_id, self.period_id.as_deref())
    }

    /// Identity used when merging decision logs.
    pub fn natural_key(&self) -> (String, DateTime<Utc>, ApprovalDecision, String, String) {
        (
            self.scope_key(),
            self.decided_at,
            self.decision,
            self.decided_by.clone(),
            self.reason.clone(),
        )
    }
}

/// Evidence disposition counters for one scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewStatusCounts {
    pub acceptable: usize,
    pub needs_revision: usize,
    pub rejected: usize,
    pub awaiting_review: usize,
}

impl ReviewStatusCounts {
    pub fn total(&self) -> usize {
        self.acceptable + self.needs_revision + self.rejected + self.awaiting_review
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerspectiveScore {
    pub perspective_id: String,
    pub name: String,
    pub score: f64,
}

/// Immutable point-in-time record produced by APPROVE PERIOD.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub snapshot_id: String,
    pub project_id: String,
    #[serde(default)]
    pub period_id: Option<String>,
    pub final_bim_score: f64,
    pub breakdown: Vec<PerspectiveScore>,
    pub evidence_counts: ReviewStatusCounts,
    pub approved_by: String,
    pub approved_at: DateTime<Utc>,
}

impl SnapshotRecord {
    pub fn scope_key(&self) -> String {
        scope_key(&self.project_id, self.period_id.as_deref())
    }
}

// ============================================================================
// Metadata
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorWeight {
    pub id: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Perspective {
    pub id: String,
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub indicators: Vec<IndicatorWeight>,
}

/// Perspective → indicator weighting used when a snapshot is scored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringModel {
    #[serde(default)]
    pub perspectives: Vec<Perspective>,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMeta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub scoring: Option<ScoringModel>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodMeta {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub name: String,
    pub status: PeriodStatus,
    /// `period_version` token required by backend decisions.
    #[serde(default)]
    pub version: Option<i64>,
    #[serde(default)]
    pub starts_on: Option<NaiveDate>,
    #[serde(default)]
    pub ends_on: Option<NaiveDate>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Store aggregate
// ============================================================================

/// Aggregate root of all local state.
///
/// Each collection has its own identity rule (see `bimscore-store`'s
/// reconcile module); never concatenate collections blindly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Store {
    #[serde(default)]
    pub evidence_items: Vec<EvidenceItem>,
    #[serde(default)]
    pub review_records: BTreeMap<String, ReviewRecord>,
    #[serde(default)]
    pub approval_decisions: Vec<ApprovalDecisionRecord>,
    #[serde(default)]
    pub snapshots: Vec<SnapshotRecord>,
    #[serde(default)]
    pub period_locks: Vec<PeriodLockRecord>,
    #[serde(default)]
    pub project_meta: BTreeMap<String, ProjectMeta>,
    #[serde(default)]
    pub period_meta: BTreeMap<String, PeriodMeta>,
}

impl Store {
    pub fn is_empty(&self) -> bool {
        self.evidence_items.is_empty()
            && self.review_records.is_empty()
            && self.approval_decisions.is_empty()
            && self.snapshots.is_empty()
            && self.period_locks.is_empty()
            && self.project_meta.is_empty()
            && self.period_meta.is_empty()
    }

    pub fn evidence(&self, id: &str) -> Option<&EvidenceItem> {
        self.evidence_items.iter().find(|e| e.id == id)
    }

    pub fn evidence_mut(&mut self, id: &str) -> Option<&mut EvidenceItem> {
        self.evidence_items.iter_mut().find(|e| e.id == id)
    }

    /// Insert or replace by id.
    pub fn upsert_evidence(&mut self, item: EvidenceItem) {
        match self.evidence_mut(&item.id) {
            Some(existing) => *existing = item,
            None => self.evidence_items.push(item),
        }
    }

    pub fn evidence_in_scope<'a>(
        &'a self,
        project_id: &'a str,
        period_id: Option<&'a str>,
    ) -> impl Iterator<Item = &'a EvidenceItem> + 'a {
        let key = scope_key(project_id, period_id);
        self.evidence_items
            .iter()
            .filter(move |e| e.scope_key() == key)
    }

    pub fn lock_for(&self, project_id: &str, period_id: Option<&str>) -> Option<&PeriodLockRecord> {
        let key = scope_key(project_id, period_id);
        self.period_locks.iter().find(|l| l.scope_key() == key)
    }

    pub fn snapshot_for(&self, project_id: &str, period_id: Option<&str>) -> Option<&SnapshotRecord> {
        let key = scope_key(project_id, period_id);
        self.snapshots.iter().find(|s| s.scope_key() == key)
    }

    /// Decisions for one scope, oldest first.
    pub fn decisions_for(&self, project_id: &str, period_id: Option<&str>) -> Vec<&ApprovalDecisionRecord> {
        let key = scope_key(project_id, period_id);
        let mut out: Vec<&ApprovalDecisionRecord> = self
            .approval_decisions
            .iter()
            .filter(|d| d.scope_key() == key)
            .collect();
        out.sort_by(|a, b| a.natural_key().cmp(&b.natural_key()));
        out
    }

    /// Authoritative decision for display: latest by `decided_at`.
    pub fn latest_decision_for(
        &self,
        project_id: &str,
        period_id: Option<&str>,
    ) -> Option<&ApprovalDecisionRecord> {
        self.decisions_for(project_id, period_id).into_iter().last()
    }

    /// Locked when a lock record exists or cached backend metadata says so.
    pub fn is_locked(&self, project_id: &str, period_id: Option<&str>) -> bool {
        if self.lock_for(project_id, period_id).is_some() {
            return true;
        }
        period_id
            .and_then(|p| self.period_meta.get(p.trim()))
            .map_or(false, |m| {
                m.project_id == project_id.trim() && m.status == PeriodStatus::Locked
            })
    }
}
