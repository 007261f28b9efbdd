//! BIM Scoring Engine
//!
//! Evidence lifecycle and period-approval consistency over two data sources:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         SCORING WORKFLOW                            │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │   reads ──► ReadModeResolver ──┬──► BackendGateway ──► HTTP         │
//! │                                │        (ok: cache locally)         │
//! │                                └──► LocalTruthStore (fallback)      │
//! │                                                                     │
//! │   writes ──► authorize ──► period lock gate ──┬──► BackendGateway   │
//! │              EvidenceEngine                   │   (canonical reply  │
//! │              ReviewEngine                     │    written back)    │
//! │              ApprovalEngine                   └──► LocalTruthStore  │
//! │                                                    (local mode)     │
//! │                                                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Features
//!
//! - **Fail closed**: backend payloads decode into typed records or fail.
//! - **No silent local success**: a write that reaches the backend and fails
//!   is reported as failed; only reads fall back.
//! - **Frozen periods**: once locked, no mutation of the period is accepted.

pub mod approval;
pub mod authz;
pub mod cache;
pub mod config;
pub mod evidence;
pub mod fake;
pub mod gateway;
pub mod resolver;
pub mod review;
pub mod scoring;
pub mod transport;
pub mod wire;
pub mod workflow;

use bimscore_model::{Clock, SystemClock};
use bimscore_store::LocalTruthStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub use approval::{finalize_approval, ApprovalEngine, DecisionOutcome, DecisionRequest};
pub use authz::{authorize, Action, Actor};
pub use config::{BackendConfig, ConfigError, WorkflowConfig};
pub use evidence::{EvidenceEngine, EvidencePatch, NewEvidence};
pub use gateway::{BackendGateway, GatewayError};
pub use resolver::{ReadMode, ReadModeResolver, ReadOutcome};
pub use review::{ReviewApplied, ReviewEngine, ReviewRequest};
pub use scoring::{score_period, ScoreCard};
pub use transport::{BackendRequest, BackendTransport, HttpTransport, Method, TransportResponse};
pub use workflow::{PeriodSummary, ScoringWorkflow};

/// Shared handles every engine works against.
#[derive(Clone)]
pub struct EngineContext {
    pub store: LocalTruthStore,
    pub clock: Arc<dyn Clock>,
    /// Present when the backend is enabled; writes then go through it.
    pub gateway: Option<Arc<BackendGateway>>,
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("store", &self.store)
            .field("gateway", &self.gateway)
            .finish_non_exhaustive()
    }
}

impl EngineContext {
    pub fn local(store: LocalTruthStore) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            gateway: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_gateway(mut self, gateway: Arc<BackendGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn is_backend(&self) -> bool {
        self.gateway.is_some()
    }
}
