//! Backend payload decoders.
//!
//! Every endpoint answers with the same envelope:
//!
//! ```text
//!   { "ok": true,  "data": <endpoint payload> }
//!   { "ok": false, "error": { "code": "VERSION_CONFLICT", "message": "..." } }
//! ```
//!
//! Each payload has one typed decoder. A decoder either produces model
//! records or fails with [`GatewayError::UnrecognizedPayload`]; it never
//! fills a gap with a guessed value.

use crate::gateway::GatewayError;
use bimscore_model::{
    normalize_evidence_status, normalize_evidence_type, normalize_period_status,
    normalize_review_outcome, EvidenceContent, EvidenceItem, EvidenceStatus, EvidenceType,
    PeriodMeta, PeriodStatus, ProjectMeta, ReviewHistoryEntry, ScoringModel,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

// ============================================================================
// Envelope
// ============================================================================

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Outcome of reading an envelope: the `data` member, or the application
/// error the backend reported.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Ok(Value),
    Err { code: String, message: String },
}

pub fn parse_envelope(body: &str) -> Result<Envelope, GatewayError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| GatewayError::UnrecognizedPayload(format!("response is not JSON: {e}")))?;
    match value.get("ok").and_then(Value::as_bool) {
        Some(true) => Ok(Envelope::Ok(value.get("data").cloned().unwrap_or(Value::Null))),
        Some(false) => {
            let error: ErrorBody = value
                .get("error")
                .cloned()
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| GatewayError::UnrecognizedPayload(format!("error body: {e}")))?
                .unwrap_or(ErrorBody {
                    code: None,
                    message: None,
                });
            Ok(Envelope::Err {
                code: error.code.unwrap_or_else(|| "UNKNOWN".to_string()),
                message: error.message.unwrap_or_default(),
            })
        }
        None => Err(GatewayError::UnrecognizedPayload(
            "response envelope has no boolean `ok`".to_string(),
        )),
    }
}

fn decode<T: DeserializeOwned>(what: &str, value: Value) -> Result<T, GatewayError> {
    serde_json::from_value(value)
        .map_err(|e| GatewayError::UnrecognizedPayload(format!("{what}: {e}")))
}

fn unrecognized(what: &str, detail: impl std::fmt::Display) -> GatewayError {
    GatewayError::UnrecognizedPayload(format!("{what}: {detail}"))
}

// ============================================================================
// Evidence
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ReviewDto {
    #[serde(alias = "outcome", alias = "status")]
    pub decision: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub reviewed_by: String,
    pub reviewed_at: DateTime<Utc>,
}

impl ReviewDto {
    pub fn into_entry(self) -> Result<ReviewHistoryEntry, GatewayError> {
        let outcome = normalize_review_outcome(&self.decision)
            .ok_or_else(|| unrecognized("review decision", &self.decision))?;
        Ok(ReviewHistoryEntry {
            reviewed_at: self.reviewed_at,
            outcome,
            reviewed_by: self.reviewed_by,
            reason: self.reason,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct EvidenceDto {
    pub id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub period_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    #[serde(default, alias = "notes")]
    pub description: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub view_url: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub reference_url: Option<String>,
    #[serde(default)]
    pub external_url: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub indicator_ids: Vec<String>,
    pub status: String,
    #[serde(default)]
    pub version: Option<i64>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub review: Option<ReviewDto>,
    #[serde(default)]
    pub review_history: Vec<ReviewDto>,
}

/// Evidence item as the backend returned it, plus any review entries it
/// embedded.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvidence {
    pub item: EvidenceItem,
    pub reviews: Vec<ReviewHistoryEntry>,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

impl EvidenceDto {
    fn content(&mut self, kind: EvidenceType) -> Result<EvidenceContent, GatewayError> {
        let uri = present(self.uri.take());
        match kind {
            EvidenceType::File => {
                let view_url = present(self.view_url.take()).or(uri);
                let download_url = present(self.download_url.take());
                let reference_url = present(self.reference_url.take());
                if view_url.is_none() && download_url.is_none() && reference_url.is_none() {
                    return Err(unrecognized("evidence", format!("FILE `{}` has no url", self.id)));
                }
                Ok(EvidenceContent::File {
                    view_url,
                    download_url,
                    reference_url,
                })
            }
            EvidenceType::Url => present(self.external_url.take())
                .or(uri)
                .map(|external_url| EvidenceContent::Url { external_url })
                .ok_or_else(|| unrecognized("evidence", format!("URL `{}` has no url", self.id))),
            EvidenceType::Text => present(self.text.take())
                .or(uri)
                .map(|text| EvidenceContent::Text { text })
                .ok_or_else(|| unrecognized("evidence", format!("TEXT `{}` has no body", self.id))),
        }
    }

    /// `project_id` is omitted by period-scoped endpoints; the caller
    /// supplies the project the request was made for.
    pub fn decode(mut self, project_id: &str) -> Result<DecodedEvidence, GatewayError> {
        let kind = normalize_evidence_type(&self.kind)
            .ok_or_else(|| unrecognized("evidence type", &self.kind))?;
        let status: EvidenceStatus = normalize_evidence_status(&self.status)
            .ok_or_else(|| unrecognized("evidence status", &self.status))?;
        let content = self.content(kind)?;

        let mut reviews = self
            .review_history
            .into_iter()
            .map(ReviewDto::into_entry)
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(current) = self.review {
            reviews.push(current.into_entry()?);
        }

        let item = EvidenceItem {
            id: self.id,
            project_id: present(self.project_id).unwrap_or_else(|| project_id.to_string()),
            period_id: present(self.period_id),
            content,
            title: self.title,
            description: self.description.unwrap_or_default(),
            indicator_ids: self.indicator_ids,
            status,
            version: self.version,
            submitted_at: self.submitted_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            created_by: self.created_by,
        };
        Ok(DecodedEvidence { item, reviews })
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EvidencePayload {
    Wrapped { evidence: Box<EvidenceDto> },
    Bare(Box<EvidenceDto>),
}

/// `data` of create / update / submit: the evidence object, bare or under
/// `evidence`.
pub fn decode_evidence(data: Value, project_id: &str) -> Result<DecodedEvidence, GatewayError> {
    let dto = match decode::<EvidencePayload>("evidence", data)? {
        EvidencePayload::Wrapped { evidence } => evidence,
        EvidencePayload::Bare(evidence) => evidence,
    };
    dto.decode(project_id)
}

/// `data` of the evidence list: an array, or an object with `items` /
/// `evidences`.
pub fn decode_evidence_list(data: Value, project_id: &str) -> Result<Vec<DecodedEvidence>, GatewayError> {
    let items = match data {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("items").or_else(|| map.remove("evidences")) {
            Some(Value::Array(items)) => items,
            _ => return Err(unrecognized("evidence list", "object without an item array")),
        },
        other => return Err(unrecognized("evidence list", format!("unexpected {other}"))),
    };
    items
        .into_iter()
        .map(|v| decode::<EvidenceDto>("evidence", v)?.decode(project_id))
        .collect()
}

#[derive(Debug, Deserialize)]
struct ReviewResponseDto {
    evidence: Box<EvidenceDto>,
    #[serde(default)]
    review: Option<ReviewDto>,
}

/// `data` of the review endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewResponse {
    pub evidence: EvidenceItem,
    /// Entry recorded by the backend, when it returned one.
    pub entry: Option<ReviewHistoryEntry>,
}

pub fn decode_review_response(data: Value, project_id: &str) -> Result<ReviewResponse, GatewayError> {
    let dto: ReviewResponseDto = decode("review response", data)?;
    let decoded = dto.evidence.decode(project_id)?;
    let entry = match dto.review {
        Some(review) => Some(review.into_entry()?),
        None => decoded.reviews.into_iter().max(),
    };
    Ok(ReviewResponse {
        evidence: decoded.item,
        entry,
    })
}

// ============================================================================
// Projects and periods
// ============================================================================

#[derive(Debug, Deserialize)]
struct ProjectDto {
    id: String,
    name: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    scoring: Option<ScoringModel>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl ProjectDto {
    fn into_meta(self, fetched_at: DateTime<Utc>) -> ProjectMeta {
        ProjectMeta {
            id: self.id,
            name: self.name,
            code: present(self.code),
            scoring: self.scoring,
            updated_at: self.updated_at.unwrap_or(fetched_at),
        }
    }
}

pub fn decode_project(data: Value, fetched_at: DateTime<Utc>) -> Result<ProjectMeta, GatewayError> {
    Ok(decode::<ProjectDto>("project", data)?.into_meta(fetched_at))
}

pub fn decode_projects(data: Value, fetched_at: DateTime<Utc>) -> Result<Vec<ProjectMeta>, GatewayError> {
    let items: Vec<ProjectDto> = decode("project list", data)?;
    Ok(items.into_iter().map(|p| p.into_meta(fetched_at)).collect())
}

#[derive(Debug, Deserialize)]
struct PeriodDto {
    id: String,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    name: String,
    status: String,
    #[serde(default)]
    version: Option<i64>,
    #[serde(default)]
    starts_on: Option<NaiveDate>,
    #[serde(default)]
    ends_on: Option<NaiveDate>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

pub fn decode_periods(
    data: Value,
    project_id: &str,
    fetched_at: DateTime<Utc>,
) -> Result<Vec<PeriodMeta>, GatewayError> {
    let items: Vec<PeriodDto> = decode("period list", data)?;
    items
        .into_iter()
        .map(|p| {
            let status = normalize_period_status(&p.status)
                .ok_or_else(|| unrecognized("period status", &p.status))?;
            Ok(PeriodMeta {
                id: p.id,
                project_id: present(p.project_id).unwrap_or_else(|| project_id.to_string()),
                name: p.name,
                status,
                version: p.version,
                starts_on: p.starts_on,
                ends_on: p.ends_on,
                updated_at: p.updated_at.unwrap_or(fetched_at),
            })
        })
        .collect()
}

// ============================================================================
// Period decisions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApproveResponse {
    pub period_id: String,
    pub status: String,
    pub locked_at: DateTime<Utc>,
    pub locked_by: String,
    #[serde(default)]
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub version: Option<i64>,
}

pub fn decode_approve(data: Value) -> Result<ApproveResponse, GatewayError> {
    let out: ApproveResponse = decode("approve response", data)?;
    match normalize_period_status(&out.status) {
        Some(PeriodStatus::Locked) => Ok(out),
        _ => Err(unrecognized("approve response", format!("status `{}`", out.status))),
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RejectResponse {
    pub period_id: String,
    pub status: String,
    pub rejected_at: DateTime<Utc>,
    pub rejected_by: String,
    #[serde(default)]
    pub version: Option<i64>,
}

pub fn decode_reject(data: Value) -> Result<RejectResponse, GatewayError> {
    let out: RejectResponse = decode("reject response", data)?;
    match normalize_period_status(&out.status) {
        Some(PeriodStatus::Open) => Ok(out),
        _ => Err(unrecognized("reject response", format!("status `{}`", out.status))),
    }
}
