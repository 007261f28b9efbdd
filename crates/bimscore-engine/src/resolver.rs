//! Read-Mode Resolver
//!
//! ```text
//!   read ──► backend enabled? ──no──────────────────────────► LOCAL
//!                 │ yes
//!                 ▼
//!            BackendGateway ──ok──► cache into store ────────► BACKEND
//!                 │ error
//!                 └─────────────► LocalTruthStore + message ─► LOCAL
//! ```
//!
//! Reads never fail. Whatever happens, the caller gets data plus the mode
//! that served it, so it can tell live data from a possibly stale cache.

use crate::cache::absorb_read;
use crate::wire::DecodedEvidence;
use crate::EngineContext;
use bimscore_model::{EvidenceView, PeriodMeta, ProjectMeta, ReviewRecord, Store};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadMode {
    Backend,
    Local,
}

impl ReadMode {
    /// Trust banner shown next to every read.
    pub fn banner(&self) -> &'static str {
        match self {
            ReadMode::Backend => "LIVE backend",
            ReadMode::Local => "LOCAL cache",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadOutcome<T> {
    pub data: T,
    pub mode: ReadMode,
    /// Why the local cache served this read, when the backend was tried.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ReadOutcome<T> {
    pub fn backend(data: T) -> Self {
        Self {
            data,
            mode: ReadMode::Backend,
            message: None,
        }
    }

    pub fn local(data: T, message: Option<String>) -> Self {
        Self {
            data,
            mode: ReadMode::Local,
            message,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ReadOutcome<U> {
        ReadOutcome {
            data: f(self.data),
            mode: self.mode,
            message: self.message,
        }
    }
}

pub struct ReadModeResolver {
    ctx: EngineContext,
}

impl ReadModeResolver {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Local store for a fallback read. A store that cannot be loaded reads
    /// as empty, with the failure appended to the message.
    fn local_store(&self, message: Option<String>) -> (Store, Option<String>) {
        match self.ctx.store.load() {
            Ok(store) => (store, message),
            Err(err) => {
                tracing::warn!(error = %err, "local store unreadable; serving empty data");
                let note = format!("local store unreadable: {err}");
                let message = match message {
                    Some(m) => format!("{m}; {note}"),
                    None => note,
                };
                (Store::default(), Some(message))
            }
        }
    }

    fn cache(&self, evidence: Vec<DecodedEvidence>, projects: Vec<ProjectMeta>, periods: Vec<PeriodMeta>) {
        let result = self.ctx.store.mutate(|store| {
            absorb_read(store, evidence, projects, periods);
            Ok(())
        });
        if let Err(err) = result {
            tracing::warn!(error = %err, "failed to cache backend read locally");
        }
    }

    fn fallback_message(what: &str, err: impl std::fmt::Display) -> String {
        format!("backend unavailable for {what} ({err}); showing local cache")
    }

    pub async fn projects(&self) -> ReadOutcome<Vec<ProjectMeta>> {
        let mut message = None;
        if let Some(gateway) = &self.ctx.gateway {
            match gateway.list_projects(self.ctx.now()).await {
                Ok(projects) => {
                    self.cache(Vec::new(), projects.clone(), Vec::new());
                    return ReadOutcome::backend(projects);
                }
                Err(err) => {
                    tracing::warn!(error = %err, mode = "LOCAL", "project read fell back");
                    message = Some(Self::fallback_message("projects", err));
                }
            }
        }
        let (store, message) = self.local_store(message);
        ReadOutcome::local(store.project_meta.into_values().collect(), message)
    }

    pub async fn periods(&self, project_id: &str) -> ReadOutcome<Vec<PeriodMeta>> {
        let mut message = None;
        if let Some(gateway) = &self.ctx.gateway {
            match gateway.list_periods(project_id, self.ctx.now()).await {
                Ok(periods) => {
                    self.cache(Vec::new(), Vec::new(), periods.clone());
                    return ReadOutcome::backend(periods);
                }
                Err(err) => {
                    tracing::warn!(project_id, error = %err, mode = "LOCAL", "period read fell back");
                    message = Some(Self::fallback_message("periods", err));
                }
            }
        }
        let (store, message) = self.local_store(message);
        let project_id = project_id.trim();
        let periods = store
            .period_meta
            .into_values()
            .filter(|p| p.project_id == project_id)
            .collect();
        ReadOutcome::local(periods, message)
    }

    /// Evidence for one scope with derived statuses. The backend lists
    /// evidence per period, so a read without a period is always local.
    pub async fn evidence(&self, project_id: &str, period_id: Option<&str>) -> ReadOutcome<Vec<EvidenceView>> {
        let mut message = None;
        if let Some(gateway) = &self.ctx.gateway {
            match period_id {
                Some(period) => match gateway.list_evidence(project_id, period).await {
                    Ok(decoded) => {
                        let views = views_from_backend(&decoded, project_id, period_id);
                        self.cache(decoded, Vec::new(), Vec::new());
                        tracing::debug!(project_id, period_id = period, count = views.len(), mode = "BACKEND", "evidence read");
                        return ReadOutcome::backend(views);
                    }
                    Err(err) => {
                        tracing::warn!(project_id, period_id = period, error = %err, mode = "LOCAL", "evidence read fell back");
                        message = Some(Self::fallback_message("evidence", err));
                    }
                },
                None => message = Some("no period selected; showing local cache".to_string()),
            }
        }
        let (store, message) = self.local_store(message);
        ReadOutcome::local(store.views_in_scope(project_id, period_id), message)
    }
}

fn views_from_backend(decoded: &[DecodedEvidence], project_id: &str, period_id: Option<&str>) -> Vec<EvidenceView> {
    let mut views: Vec<EvidenceView> = decoded
        .iter()
        .filter(|d| d.item.in_scope(project_id, period_id))
        .map(|d| {
            let review = ReviewRecord::from_history(
                &d.item.id,
                &d.item.project_id,
                d.item.period_id.as_deref(),
                d.reviews.clone(),
            );
            EvidenceView::new(d.item.clone(), review)
        })
        .collect();
    views.sort_by(|a, b| (a.item.created_at, &a.item.id).cmp(&(b.item.created_at, &b.item.id)));
    views
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeTransport;
    use crate::gateway::BackendGateway;
    use crate::transport::Method;
    use bimscore_model::{EffectiveStatus, Role};
    use bimscore_store::LocalTruthStore;
    use serde_json::json;
    use std::sync::Arc;

    fn resolver(fake: &Arc<FakeTransport>, store: &LocalTruthStore) -> ReadModeResolver {
        let gateway = BackendGateway::new(fake.clone(), Role::Reviewer);
        ReadModeResolver::new(EngineContext::local(store.clone()).with_gateway(Arc::new(gateway)))
    }

    #[tokio::test]
    async fn test_backend_read_is_cached() {
        let fake = Arc::new(FakeTransport::new());
        fake.ok(
            Method::Get,
            "/periods/Q1/evidences",
            json!([{
                "id": "E1",
                "type": "URL",
                "title": "Model",
                "uri": "https://cde.example/m",
                "status": "SUBMITTED",
                "version": 2,
                "period_id": "Q1",
                "submitted_at": "2024-03-01T10:00:00Z",
                "created_at": "2024-03-01T09:00:00Z",
                "updated_at": "2024-03-01T10:00:00Z",
                "review": {
                    "decision": "ACCEPTABLE",
                    "reason": "ok",
                    "reviewed_by": "ho",
                    "reviewed_at": "2024-03-02T10:00:00Z"
                }
            }]),
        );
        let store = LocalTruthStore::in_memory();
        let out = resolver(&fake, &store).evidence("P1", Some("Q1")).await;
        assert_eq!(out.mode, ReadMode::Backend);
        assert_eq!(out.data.len(), 1);
        assert_eq!(out.data[0].effective_status, EffectiveStatus::Acceptable);

        let cached = store.load().unwrap();
        assert_eq!(cached.evidence("E1").unwrap().version, Some(2));
        assert_eq!(cached.build_review_status_counts("P1", Some("Q1")).acceptable, 1);
    }

    #[tokio::test]
    async fn test_unavailable_backend_falls_back_with_message() {
        let fake = Arc::new(FakeTransport::new());
        fake.offline(Method::Get, "/projects/P1/periods");
        let store = LocalTruthStore::in_memory();
        let out = resolver(&fake, &store).periods("P1").await;
        assert_eq!(out.mode, ReadMode::Local);
        assert!(out.data.is_empty());
        assert!(out.message.unwrap().contains("showing local cache"));
    }

    #[tokio::test]
    async fn test_malformed_backend_payload_falls_back() {
        let fake = Arc::new(FakeTransport::new());
        fake.ok(Method::Get, "/projects", json!({"unexpected": true}));
        let store = LocalTruthStore::in_memory();
        let out = resolver(&fake, &store).projects().await;
        assert_eq!(out.mode, ReadMode::Local);
        assert!(out.message.is_some());
    }

    #[tokio::test]
    async fn test_local_mode_has_no_message() {
        let store = LocalTruthStore::in_memory();
        let out = ReadModeResolver::new(EngineContext::local(store))
            .evidence("P1", None)
            .await;
        assert_eq!(out.mode, ReadMode::Local);
        assert_eq!(out.mode.banner(), "LOCAL cache");
        assert!(out.message.is_none());
    }
}
