//! Period Lock & Approval Engine
//!
//! ```text
//!            REJECT APPROVAL (decision appended)
//!               ┌──────┐
//!               ▼      │
//!            ┌──────┐  │  APPROVE PERIOD             ┌────────┐
//!            │ OPEN │──┴───────────────────────────► │ LOCKED │  (terminal)
//!            └──────┘   awaiting_review == 0         └────────┘
//!                       snapshot + lock + decision
//! ```
//!
//! Every mutating engine calls [`ensure_open`] before touching a period.

use crate::authz::{authorize, Action, Actor};
use crate::scoring::score_period;
use crate::wire::ApproveResponse;
use crate::EngineContext;
use bimscore_model::{
    monotonic_after, scope_key, ApprovalDecision, ApprovalDecisionRecord, PeriodLockRecord,
    PeriodStatus, Result, ReviewStatusCounts, SnapshotRecord, Store, WorkflowError,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fail with `Locked` when the period is frozen.
pub fn ensure_open(store: &Store, project_id: &str, period_id: Option<&str>) -> Result<()> {
    if store.is_locked(project_id, period_id) {
        return Err(WorkflowError::Locked {
            scope: scope_key(project_id, period_id),
            snapshot_id: store
                .lock_for(project_id, period_id)
                .and_then(|l| l.snapshot_id.clone())
                .or_else(|| {
                    store
                        .snapshot_for(project_id, period_id)
                        .map(|s| s.snapshot_id.clone())
                }),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub project_id: String,
    #[serde(default)]
    pub period_id: Option<String>,
    pub decision: ApprovalDecision,
    pub reason: String,
    /// Optimistic-concurrency token of the period. Required in backend mode;
    /// falls back to the cached period metadata.
    #[serde(default)]
    pub period_version: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionOutcome {
    pub decision: ApprovalDecisionRecord,
    pub counts: ReviewStatusCounts,
    pub lock: Option<PeriodLockRecord>,
    pub snapshot: Option<SnapshotRecord>,
}

/// Snapshot and lock for an approved period. Idempotent: an existing
/// snapshot or lock for the scope is returned as is.
///
/// `backend` carries the lock details the backend assigned; without it the
/// lock is stamped with `approved_by`/`approved_at` and a fresh snapshot id.
pub fn finalize_approval(
    store: &mut Store,
    project_id: &str,
    period_id: Option<&str>,
    approved_by: &str,
    approved_at: DateTime<Utc>,
    backend: Option<&ApproveResponse>,
) -> (SnapshotRecord, PeriodLockRecord) {
    let snapshot = match store.snapshot_for(project_id, period_id) {
        Some(existing) => existing.clone(),
        None => {
            let views = store.views_in_scope(project_id, period_id);
            let model = store
                .project_meta
                .get(project_id.trim())
                .and_then(|p| p.scoring.as_ref());
            let card = score_period(model, &views);
            let snapshot = SnapshotRecord {
                snapshot_id: backend
                    .and_then(|b| b.snapshot_id.clone())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                project_id: project_id.to_string(),
                period_id: period_id.map(str::to_string),
                final_bim_score: card.final_bim_score,
                breakdown: card.breakdown,
                evidence_counts: store.build_review_status_counts(project_id, period_id),
                approved_by: approved_by.to_string(),
                approved_at,
            };
            tracing::info!(
                project_id,
                period_key = %scope_key(project_id, period_id),
                snapshot_id = %snapshot.snapshot_id,
                score = snapshot.final_bim_score,
                "snapshot created"
            );
            store.snapshots.push(snapshot.clone());
            snapshot
        }
    };

    let lock = match store.lock_for(project_id, period_id) {
        Some(existing) => existing.clone(),
        None => {
            let lock = PeriodLockRecord {
                project_id: project_id.to_string(),
                period_id: period_id.map(str::to_string),
                status: PeriodStatus::Locked,
                locked_at: backend.map_or(approved_at, |b| b.locked_at),
                locked_by: backend.map_or_else(|| approved_by.to_string(), |b| b.locked_by.clone()),
                snapshot_id: Some(snapshot.snapshot_id.clone()),
            };
            store.period_locks.push(lock.clone());
            lock
        }
    };

    if let Some(meta) = period_id.and_then(|p| store.period_meta.get_mut(p.trim())) {
        if meta.project_id == project_id.trim() {
            meta.status = PeriodStatus::Locked;
            meta.updated_at = meta.updated_at.max(lock.locked_at);
            if let Some(version) = backend.and_then(|b| b.version) {
                meta.version = Some(version);
            }
        }
    }

    (snapshot, lock)
}

// ============================================================================
// Engine
// ============================================================================

pub struct ApprovalEngine {
    ctx: EngineContext,
}

impl ApprovalEngine {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Apply a manager decision.
    ///
    /// Checks, in order: role, non-empty reason, no evidence awaiting review
    /// (APPROVE only), period still open. A second approval of a locked
    /// period fails with `Locked` carrying the existing snapshot id.
    pub async fn apply_decision(&self, actor: &Actor, request: DecisionRequest) -> Result<DecisionOutcome> {
        authorize(actor, Action::Decide)?;
        let reason = request.reason.trim().to_string();
        if reason.is_empty() {
            return Err(WorkflowError::validation("a reason is required for every decision"));
        }
        if request.project_id.trim().is_empty() {
            return Err(WorkflowError::validation("project_id is required"));
        }

        match self.ctx.gateway.clone() {
            Some(gateway) => self.apply_backend(&gateway, actor, &request, &reason).await,
            None => self.apply_local(actor, &request, &reason),
        }
    }

    fn check_preconditions(
        store: &Store,
        request: &DecisionRequest,
    ) -> Result<ReviewStatusCounts> {
        let period_id = request.period_id.as_deref();
        let counts = store.build_review_status_counts(&request.project_id, period_id);
        if request.decision == ApprovalDecision::ApprovePeriod && counts.awaiting_review > 0 {
            return Err(WorkflowError::NotEligible {
                awaiting_review: counts.awaiting_review,
            });
        }
        ensure_open(store, &request.project_id, period_id)?;
        Ok(counts)
    }

    fn apply_local(&self, actor: &Actor, request: &DecisionRequest, reason: &str) -> Result<DecisionOutcome> {
        let project_id = request.project_id.as_str();
        let period_id = request.period_id.as_deref();
        self.ctx.store.mutate(|store| {
            let counts = Self::check_preconditions(store, request)?;
            let floor = store
                .latest_decision_for(project_id, period_id)
                .map(|d| d.decided_at);
            let decided_at = monotonic_after(self.ctx.now(), floor);

            let (lock, snapshot) = match request.decision {
                ApprovalDecision::ApprovePeriod => {
                    let (snapshot, lock) =
                        finalize_approval(store, project_id, period_id, &actor.id, decided_at, None);
                    (Some(lock), Some(snapshot))
                }
                ApprovalDecision::RejectApproval => (None, None),
            };

            let decision = ApprovalDecisionRecord {
                project_id: project_id.to_string(),
                period_id: period_id.map(str::to_string),
                decision: request.decision,
                reason: reason.to_string(),
                decided_by: actor.id.clone(),
                decided_at,
            };
            store.approval_decisions.push(decision.clone());
            tracing::info!(
                project_id,
                period_key = %scope_key(project_id, period_id),
                decision = %request.decision,
                by = %actor.id,
                "period decision recorded"
            );
            Ok(DecisionOutcome {
                decision,
                counts,
                lock,
                snapshot,
            })
        })
    }

    async fn apply_backend(
        &self,
        gateway: &crate::gateway::BackendGateway,
        actor: &Actor,
        request: &DecisionRequest,
        reason: &str,
    ) -> Result<DecisionOutcome> {
        let project_id = request.project_id.as_str();
        let Some(period_id) = request.period_id.as_deref().filter(|p| !p.trim().is_empty()) else {
            return Err(WorkflowError::Contract(
                "backend decisions require a period id".to_string(),
            ));
        };

        let store = self.ctx.store.load()?;
        let version = request
            .period_version
            .or_else(|| {
                store
                    .period_meta
                    .get(period_id.trim())
                    .filter(|m| m.project_id == project_id.trim())
                    .and_then(|m| m.version)
            })
            .ok_or_else(|| {
                WorkflowError::Contract(format!(
                    "period {period_id} has no version token; refresh periods before deciding"
                ))
            })?;
        let counts = Self::check_preconditions(&store, request)?;

        match request.decision {
            ApprovalDecision::ApprovePeriod => {
                let response = gateway
                    .approve_period(project_id, period_id, reason, version)
                    .await?;
                self.ctx.store.mutate(|store| {
                    let (snapshot, lock) = finalize_approval(
                        store,
                        project_id,
                        Some(period_id),
                        &actor.id,
                        response.locked_at,
                        Some(&response),
                    );
                    let decision = ApprovalDecisionRecord {
                        project_id: project_id.to_string(),
                        period_id: Some(period_id.to_string()),
                        decision: ApprovalDecision::ApprovePeriod,
                        reason: reason.to_string(),
                        decided_by: response.locked_by.clone(),
                        decided_at: response.locked_at,
                    };
                    store.approval_decisions.push(decision.clone());
                    Ok(DecisionOutcome {
                        decision,
                        counts,
                        lock: Some(lock),
                        snapshot: Some(snapshot),
                    })
                })
            }
            ApprovalDecision::RejectApproval => {
                let response = gateway
                    .reject_period(project_id, period_id, reason, version)
                    .await?;
                self.ctx.store.mutate(|store| {
                    if let Some(meta) = store.period_meta.get_mut(period_id.trim()) {
                        if let Some(v) = response.version {
                            meta.version = Some(v);
                            meta.updated_at = meta.updated_at.max(response.rejected_at);
                        }
                    }
                    let decision = ApprovalDecisionRecord {
                        project_id: project_id.to_string(),
                        period_id: Some(period_id.to_string()),
                        decision: ApprovalDecision::RejectApproval,
                        reason: reason.to_string(),
                        decided_by: response.rejected_by.clone(),
                        decided_at: response.rejected_at,
                    };
                    store.approval_decisions.push(decision.clone());
                    Ok(DecisionOutcome {
                        decision,
                        counts,
                        lock: None,
                        snapshot: None,
                    })
                })
            }
        }
    }
}
