//! Evidence lifecycle: the single effective status every role sees.
//!
//! ```text
//!   raw status ──┬── DRAFT ───────────────────────────────► DRAFT
//!                ├── NEEDS_REVISION ──────────────────────► NEEDS_REVISION
//!                └── SUBMITTED ──┬── no applicable review ► SUBMITTED
//!                                └── review ──┬── submitted_at >  reviewed_at ► SUBMITTED
//!                                             └── submitted_at <= reviewed_at ► review outcome
//! ```
//!
//! The strict `>` comparison is what keeps a stale ACCEPTABLE or REJECTED
//! review from masking a later resubmission.

use crate::status::{EffectiveStatus, EvidenceStatus, ReviewOutcome};
use crate::types::{EvidenceItem, ReviewRecord, ReviewStatusCounts, Store};
use serde::{Deserialize, Serialize};

/// The review that may speak for `item`: same evidence id and same scope.
/// A review whose scope no longer matches the item is orphaned and ignored.
pub fn applicable_review<'a>(
    item: &EvidenceItem,
    review: Option<&'a ReviewRecord>,
) -> Option<&'a ReviewRecord> {
    review.filter(|r| r.evidence_id == item.id && r.scope_key() == item.scope_key())
}

pub fn effective_status(item: &EvidenceItem, review: Option<&ReviewRecord>) -> EffectiveStatus {
    match item.status {
        EvidenceStatus::Draft => EffectiveStatus::Draft,
        EvidenceStatus::NeedsRevision => EffectiveStatus::NeedsRevision,
        EvidenceStatus::Submitted => match applicable_review(item, review) {
            None => EffectiveStatus::Submitted,
            Some(r) if item.submission_marker() > r.reviewed_at => EffectiveStatus::Submitted,
            Some(r) => match r.outcome {
                ReviewOutcome::Acceptable => EffectiveStatus::Acceptable,
                ReviewOutcome::NeedsRevision => EffectiveStatus::NeedsRevision,
                ReviewOutcome::Rejected => EffectiveStatus::Rejected,
            },
        },
    }
}

/// Fold effective statuses into counters. Drafts are not part of the review
/// pipeline and are not counted.
pub fn count_statuses<I>(statuses: I) -> ReviewStatusCounts
where
    I: IntoIterator<Item = EffectiveStatus>,
{
    let mut counts = ReviewStatusCounts::default();
    for status in statuses {
        match status {
            EffectiveStatus::Acceptable => counts.acceptable += 1,
            EffectiveStatus::NeedsRevision => counts.needs_revision += 1,
            EffectiveStatus::Rejected => counts.rejected += 1,
            EffectiveStatus::Submitted => counts.awaiting_review += 1,
            EffectiveStatus::Draft => {}
        }
    }
    counts
}

/// Evidence item joined with its applicable review and derived status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceView {
    pub item: EvidenceItem,
    pub review: Option<ReviewRecord>,
    pub effective_status: EffectiveStatus,
}

impl EvidenceView {
    pub fn new(item: EvidenceItem, review: Option<ReviewRecord>) -> Self {
        let review = applicable_review(&item, review.as_ref()).cloned();
        let effective_status = effective_status(&item, review.as_ref());
        Self {
            item,
            review,
            effective_status,
        }
    }
}

impl Store {
    pub fn review_for(&self, item: &EvidenceItem) -> Option<&ReviewRecord> {
        applicable_review(item, self.review_records.get(&item.id))
    }

    pub fn effective_status_of(&self, item: &EvidenceItem) -> EffectiveStatus {
        effective_status(item, self.review_for(item))
    }

    /// Views for one scope, sorted by creation time then id.
    pub fn views_in_scope(&self, project_id: &str, period_id: Option<&str>) -> Vec<EvidenceView> {
        let mut views: Vec<EvidenceView> = self
            .evidence_in_scope(project_id, period_id)
            .map(|item| EvidenceView::new(item.clone(), self.review_for(item).cloned()))
            .collect();
        views.sort_by(|a, b| {
            (a.item.created_at, &a.item.id).cmp(&(b.item.created_at, &b.item.id))
        });
        views
    }

    pub fn build_review_status_counts(
        &self,
        project_id: &str,
        period_id: Option<&str>,
    ) -> ReviewStatusCounts {
        count_statuses(
            self.evidence_in_scope(project_id, period_id)
                .map(|item| self.effective_status_of(item)),
        )
    }
}
