//! Workflow facade: one handle over the engines and the resolver.

use crate::approval::{ApprovalEngine, DecisionOutcome, DecisionRequest};
use crate::authz::Actor;
use crate::config::WorkflowConfig;
use crate::evidence::{EvidenceEngine, EvidencePatch, NewEvidence};
use crate::gateway::BackendGateway;
use crate::resolver::{ReadModeResolver, ReadOutcome};
use crate::review::{ReviewApplied, ReviewEngine, ReviewRequest};
use crate::EngineContext;
use anyhow::Context;
use bimscore_model::{
    count_statuses, ApprovalDecisionRecord, EvidenceView, PeriodLockRecord, PeriodMeta,
    PeriodStatus, ProjectMeta, Result, ReviewStatusCounts, SnapshotRecord, Store,
};
use bimscore_store::{open_store, LocalTruthStore};
use serde::Serialize;
use std::sync::Arc;

/// Everything known about one period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodSummary {
    pub project_id: String,
    pub period_id: Option<String>,
    pub status: PeriodStatus,
    pub lock: Option<PeriodLockRecord>,
    pub latest_decision: Option<ApprovalDecisionRecord>,
    /// Oldest first.
    pub decisions: Vec<ApprovalDecisionRecord>,
    pub snapshot: Option<SnapshotRecord>,
    pub counts: ReviewStatusCounts,
}

impl PeriodSummary {
    fn build(store: &Store, project_id: &str, period_id: Option<&str>, counts: ReviewStatusCounts) -> Self {
        let status = if store.is_locked(project_id, period_id) {
            PeriodStatus::Locked
        } else {
            PeriodStatus::Open
        };
        Self {
            project_id: project_id.trim().to_string(),
            period_id: period_id.map(str::to_string),
            status,
            lock: store.lock_for(project_id, period_id).cloned(),
            latest_decision: store.latest_decision_for(project_id, period_id).cloned(),
            decisions: store
                .decisions_for(project_id, period_id)
                .into_iter()
                .cloned()
                .collect(),
            snapshot: store.snapshot_for(project_id, period_id).cloned(),
            counts,
        }
    }
}

pub struct ScoringWorkflow {
    ctx: EngineContext,
    evidence: EvidenceEngine,
    review: ReviewEngine,
    approval: ApprovalEngine,
    reads: ReadModeResolver,
}

impl ScoringWorkflow {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            evidence: EvidenceEngine::new(ctx.clone()),
            review: ReviewEngine::new(ctx.clone()),
            approval: ApprovalEngine::new(ctx.clone()),
            reads: ReadModeResolver::new(ctx.clone()),
            ctx,
        }
    }

    /// File-backed store under `data_dir`, plus the HTTP gateway when a
    /// backend is configured and enabled.
    pub fn from_config(config: &WorkflowConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("failed to create data dir {}", config.data_dir.display()))?;
        let mut ctx = EngineContext::local(open_store(&config.data_dir));
        if let Some(backend) = config.active_backend() {
            let gateway = BackendGateway::from_config(backend)
                .context("failed to build backend gateway")?;
            tracing::info!(base_url = %backend.base_url, role = %backend.role, "backend enabled");
            ctx = ctx.with_gateway(Arc::new(gateway));
        }
        Ok(Self::new(ctx))
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn local_store(&self) -> &LocalTruthStore {
        &self.ctx.store
    }

    // ------------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------------

    pub async fn create_evidence(&self, actor: &Actor, new: NewEvidence) -> Result<EvidenceView> {
        self.evidence.create(actor, new).await
    }

    pub async fn update_evidence(&self, actor: &Actor, evidence_id: &str, patch: EvidencePatch) -> Result<EvidenceView> {
        self.evidence.update(actor, evidence_id, patch).await
    }

    pub async fn submit_evidence(&self, actor: &Actor, evidence_id: &str) -> Result<EvidenceView> {
        self.evidence.submit(actor, evidence_id).await
    }

    pub async fn review(&self, actor: &Actor, request: ReviewRequest) -> Result<ReviewApplied> {
        self.review.apply_review(actor, request).await
    }

    pub async fn decide(&self, actor: &Actor, request: DecisionRequest) -> Result<DecisionOutcome> {
        self.approval.apply_decision(actor, request).await
    }

    /// Merge a store exported elsewhere into the local one.
    pub fn import_store(&self, incoming: &Store) -> Result<Store> {
        self.ctx.store.import(incoming)
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    pub async fn projects(&self) -> ReadOutcome<Vec<ProjectMeta>> {
        self.reads.projects().await
    }

    pub async fn periods(&self, project_id: &str) -> ReadOutcome<Vec<PeriodMeta>> {
        self.reads.periods(project_id).await
    }

    pub async fn list_evidence(&self, project_id: &str, period_id: Option<&str>) -> ReadOutcome<Vec<EvidenceView>> {
        self.reads.evidence(project_id, period_id).await
    }

    pub async fn counts(&self, project_id: &str, period_id: Option<&str>) -> ReadOutcome<ReviewStatusCounts> {
        self.list_evidence(project_id, period_id)
            .await
            .map(|views| count_statuses(views.iter().map(|v| v.effective_status)))
    }

    /// Lock, decisions, snapshot and counts for one period. Evidence (and,
    /// with a backend, period metadata) is refreshed first.
    pub async fn period_summary(&self, project_id: &str, period_id: Option<&str>) -> ReadOutcome<PeriodSummary> {
        if self.ctx.is_backend() {
            let _ = self.reads.periods(project_id).await;
        }
        let counts = self.counts(project_id, period_id).await;
        let store = match self.ctx.store.load() {
            Ok(store) => store,
            Err(err) => {
                tracing::warn!(error = %err, "local store unreadable; summary is partial");
                Store::default()
            }
        };
        counts.map(|counts| PeriodSummary::build(&store, project_id, period_id, counts))
    }

    pub fn is_locked(&self, project_id: &str, period_id: Option<&str>) -> Result<bool> {
        Ok(self.ctx.store.load()?.is_locked(project_id, period_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use tempfile::TempDir;

    #[test]
    fn test_from_config_local_and_backend() {
        let dir = TempDir::new().unwrap();
        let mut config = WorkflowConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let wf = ScoringWorkflow::from_config(&config).unwrap();
        assert!(!wf.context().is_backend());

        config.backend = Some(BackendConfig::new("http://localhost:9"));
        let wf = ScoringWorkflow::from_config(&config).unwrap();
        assert!(wf.context().is_backend());
    }

    #[tokio::test]
    async fn test_summary_of_fresh_period_is_open() {
        let wf = ScoringWorkflow::new(EngineContext::local(LocalTruthStore::in_memory()));
        let summary = wf.period_summary("P1", Some("Q1")).await;
        assert_eq!(summary.data.status, PeriodStatus::Open);
        assert!(summary.data.lock.is_none());
        assert_eq!(summary.data.counts.total(), 0);
        assert!(!wf.is_locked("P1", Some("Q1")).unwrap());
    }
}
