//! Backend Write Gateway
//!
//! ```text
//!   engine ──► BackendGateway ──► BackendTransport ──► HTTP
//!                 │  X-Role header
//!                 │  Idempotency-Key = sha256(scope ‖ payload)
//!                 │  retry while Unavailable (same key)
//!                 ▼
//!           classify response
//!             network error / 5xx / 408 / 429 ─► Unavailable        (reads fall back)
//!             409 or code VERSION_CONFLICT     ─► VersionConflict    (never retried)
//!             other 4xx / ok:false             ─► Rejected           (never masked)
//!             2xx with unexpected shape        ─► UnrecognizedPayload
//! ```
//!
//! Successful writes return the backend's canonical entity; callers write
//! that back locally, never their own optimistic guess.

use crate::config::{BackendConfig, ConfigError};
use crate::transport::{BackendRequest, BackendTransport, HttpTransport, TransportResponse};
use crate::wire::{self, ApproveResponse, DecodedEvidence, Envelope, RejectResponse, ReviewResponse};
use bimscore_model::{
    normalize_period_key, EvidenceItem, PeriodMeta, ProjectMeta, ReviewOutcome, Role, WorkflowError,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
pub const ROLE_HEADER: &str = "X-Role";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend rejected request (HTTP {status}, {code}): {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },

    #[error("version conflict: {0}")]
    VersionConflict(String),

    #[error("unrecognized backend payload: {0}")]
    UnrecognizedPayload(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }
}

impl From<GatewayError> for WorkflowError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unavailable(message) => WorkflowError::BackendUnavailable(message),
            GatewayError::Rejected {
                status,
                code,
                message,
            } => WorkflowError::BackendRejected {
                status,
                code,
                message,
            },
            GatewayError::VersionConflict(message) => WorkflowError::VersionConflict { message },
            GatewayError::UnrecognizedPayload(message) => WorkflowError::Schema(message),
        }
    }
}

/// SHA-256 hex of the scope and the canonical (key-sorted) payload.
pub fn idempotency_key(scope: &str, payload: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(scope.as_bytes());
    hasher.update(b"\n");
    hasher.update(payload.to_string().as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Map a raw HTTP response to the `data` member or a classified error.
pub fn classify(response: &TransportResponse) -> Result<Value, GatewayError> {
    let status = response.status;
    if status >= 500 || status == 408 || status == 429 {
        return Err(GatewayError::Unavailable(format!("HTTP {status}")));
    }

    let envelope = match wire::parse_envelope(&response.body) {
        Ok(envelope) => envelope,
        Err(err) if (200..300).contains(&status) => return Err(err),
        Err(_) => Envelope::Err {
            code: format!("HTTP_{status}"),
            message: response.body.chars().take(200).collect(),
        },
    };

    match envelope {
        Envelope::Ok(data) if (200..300).contains(&status) => Ok(data),
        Envelope::Ok(_) => Err(GatewayError::Rejected {
            status,
            code: format!("HTTP_{status}"),
            message: "unexpected status for a successful envelope".to_string(),
        }),
        Envelope::Err { code, message } => {
            if status == 409 || code.eq_ignore_ascii_case("VERSION_CONFLICT") {
                Err(GatewayError::VersionConflict(message))
            } else {
                Err(GatewayError::Rejected {
                    status,
                    code,
                    message,
                })
            }
        }
    }
}

// ============================================================================
// Gateway
// ============================================================================

pub struct BackendGateway {
    transport: Arc<dyn BackendTransport>,
    role: Role,
    max_retries: u32,
    retry_backoff: Duration,
}

impl std::fmt::Debug for BackendGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendGateway")
            .field("role", &self.role)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl BackendGateway {
    pub fn new(transport: Arc<dyn BackendTransport>, role: Role) -> Self {
        Self {
            transport,
            role,
            max_retries: 0,
            retry_backoff: Duration::ZERO,
        }
    }

    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = backoff;
        self
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self, ConfigError> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(Arc::new(transport), config.role)
            .with_retries(config.max_retries, Duration::from_millis(config.retry_backoff_ms)))
    }

    pub fn role(&self) -> Role {
        self.role
    }

    async fn send_once(&self, request: &BackendRequest) -> Result<Value, GatewayError> {
        let response = self
            .transport
            .execute(request)
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        classify(&response)
    }

    /// Reads: a single attempt, so the resolver can fall back quickly.
    async fn read(&self, request: BackendRequest) -> Result<Value, GatewayError> {
        let request = request.with_header(ROLE_HEADER, self.role.as_str());
        self.send_once(&request).await
    }

    /// Writes: idempotency key over `(scope, body)`, retried only while the
    /// backend is unavailable.
    async fn write(&self, scope: &str, request: BackendRequest) -> Result<Value, GatewayError> {
        let key = idempotency_key(scope, request.body.as_ref().unwrap_or(&Value::Null));
        let request = request
            .with_header(ROLE_HEADER, self.role.as_str())
            .with_header(IDEMPOTENCY_HEADER, &key);

        let mut attempt = 0u32;
        loop {
            match self.send_once(&request).await {
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        scope,
                        attempt,
                        method = request.method.as_str(),
                        path = %request.path(),
                        error = %err,
                        "backend unavailable; retrying with the same idempotency key"
                    );
                    if !self.retry_backoff.is_zero() {
                        tokio::time::sleep(self.retry_backoff * 2u32.saturating_pow(attempt - 1)).await;
                    }
                }
                other => return other,
            }
        }
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    pub async fn list_projects(&self, fetched_at: DateTime<Utc>) -> Result<Vec<ProjectMeta>, GatewayError> {
        let data = self.read(BackendRequest::get(["projects"])).await?;
        wire::decode_projects(data, fetched_at)
    }

    pub async fn get_project(&self, project_id: &str, fetched_at: DateTime<Utc>) -> Result<ProjectMeta, GatewayError> {
        let data = self
            .read(BackendRequest::get(["projects", project_id]))
            .await?;
        wire::decode_project(data, fetched_at)
    }

    pub async fn list_periods(
        &self,
        project_id: &str,
        fetched_at: DateTime<Utc>,
    ) -> Result<Vec<PeriodMeta>, GatewayError> {
        let data = self
            .read(BackendRequest::get(["projects", project_id, "periods"]))
            .await?;
        wire::decode_periods(data, project_id, fetched_at)
    }

    pub async fn list_evidence(
        &self,
        project_id: &str,
        period_id: &str,
    ) -> Result<Vec<DecodedEvidence>, GatewayError> {
        let request = BackendRequest::get(["periods", period_id, "evidences"])
            .with_query("project_id", project_id);
        let data = self.read(request).await?;
        wire::decode_evidence_list(data, project_id)
    }

    // ------------------------------------------------------------------------
    // Evidence writes
    // ------------------------------------------------------------------------

    fn evidence_body(period_id: &str, item: &EvidenceItem) -> Value {
        json!({
            "period_id": period_id,
            "indicator_ids": item.indicator_ids,
            "type": item.evidence_type().as_str(),
            "title": item.title,
            "uri": item.content.uri(),
            "notes": item.description,
        })
    }

    fn scope(action: &str, project_id: &str, period_id: &str, id: Option<&str>) -> String {
        let period = normalize_period_key(Some(period_id));
        match id {
            Some(id) => format!("{action}:{}::{period}:{id}", project_id.trim()),
            None => format!("{action}:{}::{period}", project_id.trim()),
        }
    }

    /// Create a draft from a locally validated item.
    pub async fn create_evidence(
        &self,
        period_id: &str,
        draft: &EvidenceItem,
    ) -> Result<DecodedEvidence, GatewayError> {
        let body = Self::evidence_body(period_id, draft);
        let scope = Self::scope("evidence.create", &draft.project_id, period_id, None);
        let request = BackendRequest::post(["periods", period_id, "evidences"], body);
        let data = self.write(&scope, request).await?;
        wire::decode_evidence(data, &draft.project_id)
    }

    pub async fn update_evidence(
        &self,
        period_id: &str,
        item: &EvidenceItem,
        if_match_version: i64,
    ) -> Result<DecodedEvidence, GatewayError> {
        let mut body = Self::evidence_body(period_id, item);
        body["if_match_version"] = json!(if_match_version);
        let scope = Self::scope("evidence.update", &item.project_id, period_id, Some(&item.id));
        let request = BackendRequest::put(
            ["periods", period_id, "evidences", item.id.as_str()],
            body,
        );
        let data = self.write(&scope, request).await?;
        wire::decode_evidence(data, &item.project_id)
    }

    pub async fn submit_evidence(
        &self,
        project_id: &str,
        period_id: &str,
        evidence_id: &str,
        if_match_version: i64,
    ) -> Result<DecodedEvidence, GatewayError> {
        let body = json!({
            "period_id": period_id,
            "evidence_id": evidence_id,
            "if_match_version": if_match_version,
        });
        let scope = Self::scope("evidence.submit", project_id, period_id, Some(evidence_id));
        let request = BackendRequest::post(
            ["periods", period_id, "evidences", evidence_id, "submit"],
            body,
        );
        let data = self.write(&scope, request).await?;
        wire::decode_evidence(data, project_id)
    }

    pub async fn review_evidence(
        &self,
        project_id: &str,
        period_id: &str,
        evidence_id: &str,
        outcome: ReviewOutcome,
        reason: &str,
        if_match_version: i64,
    ) -> Result<ReviewResponse, GatewayError> {
        let body = json!({
            "period_id": period_id,
            "evidence_id": evidence_id,
            "decision": outcome.as_str(),
            "reason": reason,
            "if_match_version": if_match_version,
        });
        let scope = Self::scope("evidence.review", project_id, period_id, Some(evidence_id));
        let request = BackendRequest::post(
            ["periods", period_id, "evidences", evidence_id, "review"],
            body,
        );
        let data = self.write(&scope, request).await?;
        wire::decode_review_response(data, project_id)
    }

    // ------------------------------------------------------------------------
    // Period decisions
    // ------------------------------------------------------------------------

    pub async fn approve_period(
        &self,
        project_id: &str,
        period_id: &str,
        reason: &str,
        if_match_version: i64,
    ) -> Result<ApproveResponse, GatewayError> {
        let body = json!({
            "period_id": period_id,
            "reason": reason,
            "if_match_version": if_match_version,
        });
        let scope = Self::scope("period.approve", project_id, period_id, None);
        let request = BackendRequest::post(["periods", period_id, "approve"], body);
        let data = self.write(&scope, request).await?;
        wire::decode_approve(data)
    }

    pub async fn reject_period(
        &self,
        project_id: &str,
        period_id: &str,
        reason: &str,
        if_match_version: i64,
    ) -> Result<RejectResponse, GatewayError> {
        let body = json!({
            "period_id": period_id,
            "reason": reason,
            "if_match_version": if_match_version,
        });
        let scope = Self::scope("period.reject", project_id, period_id, None);
        let request = BackendRequest::post(["periods", period_id, "reject"], body);
        let data = self.write(&scope, request).await?;
        wire::decode_reject(data)
    }
}

#[cfg(test)]
mod tests;
