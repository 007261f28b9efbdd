//! Review Engine: applies a reviewer's judgement to one evidence item.
//!
//! The history is append-only. The item's raw status follows the outcome
//! (NEEDS_REVISION reopens it, ACCEPTABLE and REJECTED leave it SUBMITTED);
//! the displayed status is always derived by the lifecycle rule.

use crate::approval::ensure_open;
use crate::authz::{authorize, Action, Actor};
use crate::cache::append_review;
use crate::EngineContext;
use bimscore_model::{
    monotonic_after, review_outcome_to_evidence_status, EffectiveStatus, EvidenceItem,
    EvidenceView, Result, ReviewHistoryEntry, ReviewOutcome, Store, WorkflowError,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub evidence_id: String,
    pub outcome: ReviewOutcome,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewApplied {
    pub evidence: EvidenceView,
    pub entry: ReviewHistoryEntry,
}

fn reviewable<'a>(store: &'a Store, evidence_id: &str) -> Result<&'a EvidenceItem> {
    let item = store
        .evidence(evidence_id)
        .ok_or_else(|| WorkflowError::NotFound(format!("evidence {evidence_id}")))?;
    ensure_open(store, &item.project_id, item.period_id.as_deref())?;
    if store.effective_status_of(item) == EffectiveStatus::Draft {
        return Err(WorkflowError::Conflict(format!(
            "evidence {evidence_id} has not been submitted"
        )));
    }
    Ok(item)
}

pub struct ReviewEngine {
    ctx: EngineContext,
}

impl ReviewEngine {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    pub async fn apply_review(&self, actor: &Actor, request: ReviewRequest) -> Result<ReviewApplied> {
        authorize(actor, Action::Review)?;
        let reason = request.reason.trim().to_string();
        if reason.is_empty() {
            return Err(WorkflowError::validation("a reason is required for every review"));
        }
        if request.evidence_id.trim().is_empty() {
            return Err(WorkflowError::validation("evidence_id is required"));
        }

        let applied = match self.ctx.gateway.clone() {
            Some(gateway) => {
                self.apply_backend(&gateway, actor, &request, &reason).await?
            }
            None => self.apply_local(actor, &request, &reason)?,
        };
        tracing::info!(
            evidence_id = %request.evidence_id,
            outcome = %applied.entry.outcome,
            effective = %applied.evidence.effective_status,
            by = %actor.id,
            "review applied"
        );
        Ok(applied)
    }

    fn apply_local(&self, actor: &Actor, request: &ReviewRequest, reason: &str) -> Result<ReviewApplied> {
        self.ctx.store.mutate(|store| {
            let item = reviewable(store, &request.evidence_id)?;
            let floor = store
                .review_for(item)
                .map(|r| r.reviewed_at)
                .into_iter()
                .chain(std::iter::once(item.submission_marker()))
                .max();
            let reviewed_at = monotonic_after(self.ctx.now(), floor);

            let entry = ReviewHistoryEntry {
                reviewed_at,
                outcome: request.outcome,
                reviewed_by: actor.id.clone(),
                reason: reason.to_string(),
            };
            let mut item = item.clone();
            item.status = review_outcome_to_evidence_status(request.outcome);
            item.updated_at = reviewed_at;

            append_review(store, &item, entry.clone());
            store.upsert_evidence(item.clone());
            let view = EvidenceView::new(item.clone(), store.review_for(&item).cloned());
            Ok(ReviewApplied {
                evidence: view,
                entry,
            })
        })
    }

    async fn apply_backend(
        &self,
        gateway: &crate::gateway::BackendGateway,
        actor: &Actor,
        request: &ReviewRequest,
        reason: &str,
    ) -> Result<ReviewApplied> {
        let store = self.ctx.store.load()?;
        let item = reviewable(&store, &request.evidence_id)?.clone();
        let version = item.version.ok_or_else(|| {
            WorkflowError::Contract(format!(
                "evidence {} has no version token; refresh before reviewing",
                item.id
            ))
        })?;
        let period_id = item.period_id.clone().ok_or_else(|| {
            WorkflowError::Contract(format!("evidence {} has no period", item.id))
        })?;

        let response = gateway
            .review_evidence(
                &item.project_id,
                &period_id,
                &item.id,
                request.outcome,
                reason,
                version,
            )
            .await?;

        let canonical = response.evidence;
        let entry = response.entry.unwrap_or_else(|| ReviewHistoryEntry {
            reviewed_at: canonical.updated_at,
            outcome: request.outcome,
            reviewed_by: actor.id.clone(),
            reason: reason.to_string(),
        });

        self.ctx.store.mutate(|store| {
            append_review(store, &canonical, entry.clone());
            store.upsert_evidence(canonical.clone());
            let view = EvidenceView::new(canonical.clone(), store.review_for(&canonical).cloned());
            Ok(ReviewApplied {
                evidence: view,
                entry,
            })
        })
    }
}
