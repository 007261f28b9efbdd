//! Evidence authoring: create, edit and submit.
//!
//! ```text
//!   create ──► DRAFT ──submit──► SUBMITTED ──review──► ACCEPTABLE
//!                ▲                    ▲                NEEDS_REVISION ─┐
//!                │                    │                REJECTED ───────┤
//!              update                 └──────── update + submit ◄──────┘
//! ```
//!
//! Edits and submissions are accepted only while the effective status is
//! reopened (DRAFT, NEEDS_REVISION or REJECTED) and the period is open.

use crate::approval::ensure_open;
use crate::authz::{authorize, Action, Actor};
use crate::cache::absorb_written;
use crate::gateway::BackendGateway;
use crate::EngineContext;
use bimscore_model::{
    monotonic_after, scope_key, EvidenceContent, EvidenceItem, EvidenceStatus, EvidenceView,
    Result, Store, WorkflowError,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvidence {
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
}

/// Fields to change on an existing item. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidencePatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub indicator_ids: Option<Vec<String>>,
    #[serde(default)]
    pub content: Option<EvidenceContent>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub period_id: Option<String>,
}

impl EvidencePatch {
    fn moves_scope(&self, item: &EvidenceItem) -> bool {
        let project = self.project_id.as_deref().unwrap_or(&item.project_id);
        let period = self.period_id.as_deref().or(item.period_id.as_deref());
        scope_key(project, period) != item.scope_key()
    }

    fn apply_to(&self, item: &mut EvidenceItem) {
        if let Some(title) = &self.title {
            item.title = title.trim().to_string();
        }
        if let Some(description) = &self.description {
            item.description = description.clone();
        }
        if let Some(indicators) = &self.indicator_ids {
            item.indicator_ids = clean_indicators(indicators);
        }
        if let Some(content) = &self.content {
            item.content = content.clone();
        }
        if let Some(project) = &self.project_id {
            item.project_id = project.trim().to_string();
        }
        if let Some(period) = &self.period_id {
            item.period_id = Some(period.trim().to_string()).filter(|p| !p.is_empty());
        }
    }
}

fn clean_indicators(raw: &[String]) -> Vec<String> {
    let mut out: Vec<String> = raw
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

fn validate(item: &EvidenceItem) -> Result<()> {
    if item.project_id.trim().is_empty() {
        return Err(WorkflowError::validation("project_id is required"));
    }
    if item.title.trim().is_empty() {
        return Err(WorkflowError::validation("title is required"));
    }
    if !item.content.is_complete() {
        let what = match item.content {
            EvidenceContent::File { .. } => "a FILE needs a view, download or reference url",
            EvidenceContent::Url { .. } => "a URL needs an external url",
            EvidenceContent::Text { .. } => "a TEXT needs a body",
        };
        return Err(WorkflowError::validation(what));
    }
    Ok(())
}

/// The item, provided it is in an open period and currently editable.
fn editable<'a>(store: &'a Store, evidence_id: &str, verb: &str) -> Result<&'a EvidenceItem> {
    let item = store
        .evidence(evidence_id)
        .ok_or_else(|| WorkflowError::NotFound(format!("evidence {evidence_id}")))?;
    ensure_open(store, &item.project_id, item.period_id.as_deref())?;
    let status = store.effective_status_of(item);
    if !status.is_reopened() {
        return Err(WorkflowError::Conflict(format!(
            "cannot {verb} evidence {evidence_id} while it is {status}"
        )));
    }
    Ok(item)
}

fn view_of(store: &Store, item: &EvidenceItem) -> EvidenceView {
    EvidenceView::new(item.clone(), store.review_for(item).cloned())
}

fn backend_version(item: &EvidenceItem) -> Result<(String, i64)> {
    let period = item
        .period_id
        .clone()
        .ok_or_else(|| WorkflowError::Contract(format!("evidence {} has no period", item.id)))?;
    let version = item.version.ok_or_else(|| {
        WorkflowError::Contract(format!(
            "evidence {} has no version token; refresh before writing",
            item.id
        ))
    })?;
    Ok((period, version))
}

pub struct EvidenceEngine {
    ctx: EngineContext,
}

impl EvidenceEngine {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    // ------------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------------

    pub async fn create(&self, actor: &Actor, new: NewEvidence) -> Result<EvidenceView> {
        authorize(actor, Action::CreateEvidence)?;
        let now = self.ctx.now();
        let draft = EvidenceItem {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: new.project_id.trim().to_string(),
            period_id: new
                .period_id
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
            content: new.content,
            title: new.title.trim().to_string(),
            description: new.description,
            indicator_ids: clean_indicators(&new.indicator_ids),
            status: EvidenceStatus::Draft,
            version: None,
            submitted_at: None,
            created_at: now,
            updated_at: now,
            created_by: Some(actor.id.clone()),
        };
        validate(&draft)?;

        let view = match self.ctx.gateway.clone() {
            Some(gateway) => self.create_backend(&gateway, draft).await?,
            None => self.ctx.store.mutate(|store| {
                ensure_open(store, &draft.project_id, draft.period_id.as_deref())?;
                store.upsert_evidence(draft.clone());
                Ok(view_of(store, &draft))
            })?,
        };
        tracing::info!(
            evidence_id = %view.item.id,
            project_id = %view.item.project_id,
            period_key = %view.item.period_key(),
            by = %actor.id,
            "evidence created"
        );
        Ok(view)
    }

    async fn create_backend(&self, gateway: &BackendGateway, draft: EvidenceItem) -> Result<EvidenceView> {
        let Some(period_id) = draft.period_id.clone() else {
            return Err(WorkflowError::validation(
                "period_id is required when the backend is enabled",
            ));
        };
        ensure_open(&self.ctx.store.load()?, &draft.project_id, Some(&period_id))?;
        let decoded = gateway.create_evidence(&period_id, &draft).await?;
        let id = decoded.item.id.clone();
        self.ctx.store.mutate(|store| {
            absorb_written(store, decoded);
            store
                .evidence(&id)
                .map(|item| view_of(store, item))
                .ok_or_else(|| WorkflowError::storage(format!("evidence {id} vanished after write")))
        })
    }

    // ------------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------------

    pub async fn update(&self, actor: &Actor, evidence_id: &str, patch: EvidencePatch) -> Result<EvidenceView> {
        authorize(actor, Action::UpdateEvidence)?;

        let view = match self.ctx.gateway.clone() {
            Some(gateway) => self.update_backend(&gateway, evidence_id, &patch).await?,
            None => self.ctx.store.mutate(|store| {
                let mut item = editable(store, evidence_id, "update")?.clone();
                // An edit is not a resubmission: pin the marker before updated_at moves.
                if item.status != EvidenceStatus::Draft && item.submitted_at.is_none() {
                    item.submitted_at = Some(item.submission_marker());
                }
                patch.apply_to(&mut item);
                validate(&item)?;
                ensure_open(store, &item.project_id, item.period_id.as_deref())?;
                item.updated_at = monotonic_after(self.ctx.now(), Some(item.updated_at));
                store.upsert_evidence(item.clone());
                Ok(view_of(store, &item))
            })?,
        };
        tracing::debug!(evidence_id, by = %actor.id, "evidence updated");
        Ok(view)
    }

    async fn update_backend(
        &self,
        gateway: &BackendGateway,
        evidence_id: &str,
        patch: &EvidencePatch,
    ) -> Result<EvidenceView> {
        let store = self.ctx.store.load()?;
        let current = editable(&store, evidence_id, "update")?;
        if patch.moves_scope(current) {
            return Err(WorkflowError::validation(
                "evidence cannot move to another project or period while the backend is enabled",
            ));
        }
        let (period_id, version) = backend_version(current)?;
        let mut item = current.clone();
        patch.apply_to(&mut item);
        validate(&item)?;

        let decoded = gateway.update_evidence(&period_id, &item, version).await?;
        self.write_back(decoded)
    }

    // ------------------------------------------------------------------------
    // Submit
    // ------------------------------------------------------------------------

    pub async fn submit(&self, actor: &Actor, evidence_id: &str) -> Result<EvidenceView> {
        authorize(actor, Action::SubmitEvidence)?;

        let view = match self.ctx.gateway.clone() {
            Some(gateway) => {
                let store = self.ctx.store.load()?;
                let item = editable(&store, evidence_id, "submit")?;
                validate(item)?;
                let (period_id, version) = backend_version(item)?;
                let decoded = gateway
                    .submit_evidence(&item.project_id, &period_id, &item.id, version)
                    .await?;
                self.write_back(decoded)?
            }
            None => self.ctx.store.mutate(|store| {
                let current = editable(store, evidence_id, "submit")?;
                validate(current)?;
                let floor = store
                    .review_for(current)
                    .map(|r| r.reviewed_at)
                    .max(Some(current.updated_at));
                let stamp = monotonic_after(self.ctx.now(), floor);

                let mut item = current.clone();
                item.status = EvidenceStatus::Submitted;
                item.submitted_at = Some(stamp);
                item.updated_at = stamp;
                store.upsert_evidence(item.clone());
                Ok(view_of(store, &item))
            })?,
        };
        tracing::info!(
            evidence_id,
            project_id = %view.item.project_id,
            period_key = %view.item.period_key(),
            effective = %view.effective_status,
            "evidence submitted"
        );
        Ok(view)
    }

    fn write_back(&self, decoded: crate::wire::DecodedEvidence) -> Result<EvidenceView> {
        let id = decoded.item.id.clone();
        self.ctx.store.mutate(|store| {
            absorb_written(store, decoded);
            store
                .evidence(&id)
                .map(|item| view_of(store, item))
                .ok_or_else(|| WorkflowError::storage(format!("evidence {id} vanished after write")))
        })
    }
}
