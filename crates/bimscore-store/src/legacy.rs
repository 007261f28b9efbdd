//! Decoders for the prototype-era storage layout.
//!
//! The prototype kept one JSON document per collection under separate keys,
//! with camelCase fields, free-form status strings and timestamps that are
//! either RFC 3339 strings or epoch milliseconds. Each entry is decoded into
//! a typed record on its own: an entry that does not fit is skipped and
//! logged, the rest of the document still migrates.

use bimscore_model::{
    normalize_approval_decision, normalize_evidence_status, normalize_evidence_type,
    normalize_review_outcome, ApprovalDecisionRecord, EvidenceContent, EvidenceItem,
    EvidenceStatus, EvidenceType, PeriodLockRecord, PeriodStatus, PerspectiveScore,
    ReviewHistoryEntry, ReviewRecord, ReviewStatusCounts, SnapshotRecord, Store,
};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

pub const LEGACY_EVIDENCE_KEY: &str = "bim_prototype_evidence";
pub const LEGACY_REVIEWS_KEY: &str = "bim_prototype_reviews";
pub const LEGACY_APPROVALS_KEY: &str = "bim_prototype_approvals";
pub const LEGACY_LOCKS_KEY: &str = "bim_prototype_period_locks";
pub const LEGACY_SNAPSHOTS_KEY: &str = "bim_prototype_snapshots";

pub const LEGACY_KEYS: [&str; 5] = [
    LEGACY_EVIDENCE_KEY,
    LEGACY_REVIEWS_KEY,
    LEGACY_APPROVALS_KEY,
    LEGACY_LOCKS_KEY,
    LEGACY_SNAPSHOTS_KEY,
];

/// Raw legacy documents, one per key. `None` means the key was never written.
#[derive(Debug, Clone, Default)]
pub struct LegacyPayloads {
    pub evidence: Option<String>,
    pub reviews: Option<String>,
    pub approvals: Option<String>,
    pub locks: Option<String>,
    pub snapshots: Option<String>,
}

impl LegacyPayloads {
    pub fn is_empty(&self) -> bool {
        self.evidence.is_none()
            && self.reviews.is_none()
            && self.approvals.is_none()
            && self.locks.is_none()
            && self.snapshots.is_none()
    }
}

/// Decode whatever legacy documents exist. Returns `None` when there is
/// nothing to migrate.
pub fn decode_legacy(payloads: &LegacyPayloads) -> Option<Store> {
    if payloads.is_empty() {
        return None;
    }

    let mut store = Store::default();
    if let Some(raw) = &payloads.evidence {
        store.evidence_items = decode_entries::<LegacyEvidence>(LEGACY_EVIDENCE_KEY, raw)
            .into_iter()
            .filter_map(LegacyEvidence::into_item)
            .collect();
    }
    if let Some(raw) = &payloads.reviews {
        store.review_records = decode_reviews(raw, &store.evidence_items);
    }
    if let Some(raw) = &payloads.approvals {
        store.approval_decisions = decode_entries::<LegacyDecision>(LEGACY_APPROVALS_KEY, raw)
            .into_iter()
            .filter_map(LegacyDecision::into_record)
            .collect();
    }
    if let Some(raw) = &payloads.locks {
        store.period_locks = decode_entries::<LegacyLock>(LEGACY_LOCKS_KEY, raw)
            .into_iter()
            .filter_map(LegacyLock::into_record)
            .collect();
    }
    if let Some(raw) = &payloads.snapshots {
        store.snapshots = decode_entries::<LegacySnapshot>(LEGACY_SNAPSHOTS_KEY, raw)
            .into_iter()
            .filter_map(LegacySnapshot::into_record)
            .collect();
    }
    Some(store)
}

/// Parse `raw` as a JSON array (or an object whose values are the entries)
/// and decode each entry independently.
fn decode_entries<T: DeserializeOwned>(key: &str, raw: &str) -> Vec<T> {
    let values: Vec<Value> = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => items,
        Ok(Value::Object(map)) => map.into_iter().map(|(_, v)| v).collect(),
        Ok(_) | Err(_) => {
            tracing::warn!(key, "legacy payload is not a JSON collection; ignoring");
            return Vec::new();
        }
    };

    let mut out = Vec::with_capacity(values.len());
    for (index, value) in values.into_iter().enumerate() {
        match serde_json::from_value::<T>(value) {
            Ok(entry) => out.push(entry),
            Err(err) => tracing::warn!(key, index, error = %err, "skipping undecodable legacy entry"),
        }
    }
    out
}

/// RFC 3339, `YYYY-MM-DD HH:MM:SS`, or epoch milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                        .ok()
                        .map(|naive| Utc.from_utc_datetime(&naive))
                })
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

fn time(value: &Option<Value>) -> Option<DateTime<Utc>> {
    value.as_ref().and_then(parse_timestamp)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

// ============================================================================
// Evidence
// ============================================================================

#[derive(Debug, Deserialize)]
struct LegacyEvidence {
    id: String,
    #[serde(alias = "projectId")]
    project_id: String,
    #[serde(default, alias = "periodId")]
    period_id: Option<String>,
    #[serde(default, rename = "type", alias = "kind")]
    kind: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, alias = "notes")]
    description: Option<String>,
    #[serde(default, alias = "indicatorIds")]
    indicator_ids: Vec<String>,
    #[serde(default, alias = "indicatorId")]
    indicator_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    version: Option<i64>,
    #[serde(default, alias = "submittedAt")]
    submitted_at: Option<Value>,
    #[serde(default, alias = "createdAt")]
    created_at: Option<Value>,
    #[serde(default, alias = "updatedAt")]
    updated_at: Option<Value>,
    #[serde(default, alias = "createdBy")]
    created_by: Option<String>,
    #[serde(default, alias = "viewUrl")]
    view_url: Option<String>,
    #[serde(default, alias = "downloadUrl")]
    download_url: Option<String>,
    #[serde(default, alias = "referenceUrl")]
    reference_url: Option<String>,
    #[serde(default, alias = "externalUrl")]
    external_url: Option<String>,
    #[serde(default, alias = "body", alias = "text")]
    text_body: Option<String>,
    #[serde(default)]
    uri: Option<String>,
}

impl LegacyEvidence {
    fn content(&self) -> Option<EvidenceContent> {
        let uri = non_empty(self.uri.clone());
        let view_url = non_empty(self.view_url.clone());
        let download_url = non_empty(self.download_url.clone());
        let reference_url = non_empty(self.reference_url.clone());
        let external_url = non_empty(self.external_url.clone());
        let text = non_empty(self.text_body.clone());

        let kind = match self.kind.as_deref() {
            Some(raw) => normalize_evidence_type(raw)?,
            None if external_url.is_some() => EvidenceType::Url,
            None if text.is_some() => EvidenceType::Text,
            None if view_url.is_some() || download_url.is_some() || reference_url.is_some() => {
                EvidenceType::File
            }
            None => return None,
        };

        match kind {
            EvidenceType::File => {
                let view_url = view_url.or(uri);
                if view_url.is_none() && download_url.is_none() && reference_url.is_none() {
                    return None;
                }
                Some(EvidenceContent::File {
                    view_url,
                    download_url,
                    reference_url,
                })
            }
            EvidenceType::Url => Some(EvidenceContent::Url {
                external_url: external_url.or(uri)?,
            }),
            EvidenceType::Text => Some(EvidenceContent::Text {
                text: text.or(uri).or_else(|| non_empty(self.description.clone()))?,
            }),
        }
    }

    fn into_item(self) -> Option<EvidenceItem> {
        let Some(content) = self.content() else {
            tracing::warn!(evidence_id = %self.id, "legacy evidence has no usable payload; skipping");
            return None;
        };

        let status = match self.status.as_deref() {
            None => EvidenceStatus::Draft,
            Some(raw) => match normalize_evidence_status(raw) {
                Some(status) => status,
                // The prototype sometimes stored the review outcome as the status.
                None if normalize_review_outcome(raw).is_some() => EvidenceStatus::Submitted,
                None => {
                    tracing::warn!(evidence_id = %self.id, status = raw, "unrecognized legacy status; skipping");
                    return None;
                }
            },
        };

        let submitted_at = time(&self.submitted_at);
        let updated = time(&self.updated_at);
        let created = time(&self.created_at);
        let created_at = created.or(updated).or(submitted_at).unwrap_or_default();
        let updated_at = updated.or(submitted_at).unwrap_or(created_at);

        let mut indicator_ids = self.indicator_ids;
        if let Some(single) = non_empty(self.indicator_id) {
            if !indicator_ids.contains(&single) {
                indicator_ids.push(single);
            }
        }

        Some(EvidenceItem {
            title: non_empty(self.title).unwrap_or_else(|| self.id.clone()),
            id: self.id,
            project_id: self.project_id,
            period_id: non_empty(self.period_id),
            content,
            description: self.description.unwrap_or_default(),
            indicator_ids,
            status,
            version: self.version,
            submitted_at,
            created_at,
            updated_at,
            created_by: self.created_by,
        })
    }
}

// ============================================================================
// Reviews
// ============================================================================

#[derive(Debug, Deserialize)]
struct LegacyReviewEntry {
    #[serde(alias = "status", alias = "decision")]
    outcome: String,
    #[serde(default, alias = "note", alias = "comment")]
    reason: Option<String>,
    #[serde(default, alias = "reviewer", alias = "reviewedBy")]
    reviewed_by: Option<String>,
    #[serde(default, alias = "reviewedAt")]
    reviewed_at: Option<Value>,
}

impl LegacyReviewEntry {
    fn into_entry(self) -> Option<ReviewHistoryEntry> {
        Some(ReviewHistoryEntry {
            reviewed_at: time(&self.reviewed_at)?,
            outcome: normalize_review_outcome(&self.outcome)?,
            reviewed_by: self.reviewed_by.unwrap_or_default(),
            reason: self.reason.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct LegacyReview {
    #[serde(default, alias = "evidenceId")]
    evidence_id: Option<String>,
    #[serde(default, alias = "projectId")]
    project_id: Option<String>,
    #[serde(default, alias = "periodId")]
    period_id: Option<String>,
    #[serde(flatten)]
    current: Option<LegacyReviewEntry>,
    #[serde(default, alias = "history", alias = "reviewHistory")]
    review_history: Vec<Value>,
}

/// Legacy reviews are an object keyed by evidence id (or an array carrying
/// `evidenceId`). Scope is taken from the record, else from its evidence;
/// unresolved scopes are left empty for the merge step to resolve or drop.
fn decode_reviews(raw: &str, evidence: &[EvidenceItem]) -> BTreeMap<String, ReviewRecord> {
    let entries: Vec<(Option<String>, Value)> = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map.into_iter().map(|(k, v)| (Some(k), v)).collect(),
        Ok(Value::Array(items)) => items.into_iter().map(|v| (None, v)).collect(),
        Ok(_) | Err(_) => {
            tracing::warn!(key = LEGACY_REVIEWS_KEY, "legacy payload is not a JSON collection; ignoring");
            return BTreeMap::new();
        }
    };

    let mut out = BTreeMap::new();
    for (map_key, value) in entries {
        let legacy: LegacyReview = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(err) => {
                tracing::warn!(key = LEGACY_REVIEWS_KEY, error = %err, "skipping undecodable legacy review");
                continue;
            }
        };
        let Some(evidence_id) = legacy.evidence_id.clone().or(map_key) else {
            continue;
        };

        let mut history: Vec<ReviewHistoryEntry> = legacy
            .review_history
            .into_iter()
            .filter_map(|v| serde_json::from_value::<LegacyReviewEntry>(v).ok())
            .filter_map(LegacyReviewEntry::into_entry)
            .collect();
        if let Some(current) = legacy.current.and_then(LegacyReviewEntry::into_entry) {
            history.push(current);
        }

        let owner = evidence.iter().find(|e| e.id == evidence_id);
        let project_id = non_empty(legacy.project_id)
            .or_else(|| owner.map(|e| e.project_id.clone()))
            .unwrap_or_default();
        let period_id = non_empty(legacy.period_id).or_else(|| owner.and_then(|e| e.period_id.clone()));

        match ReviewRecord::from_history(&evidence_id, &project_id, period_id.as_deref(), history) {
            Some(record) => {
                out.insert(evidence_id, record);
            }
            None => tracing::warn!(evidence_id = %evidence_id, "legacy review has no decodable entry; skipping"),
        }
    }
    out
}

// ============================================================================
// Decisions, locks, snapshots
// ============================================================================

#[derive(Debug, Deserialize)]
struct LegacyDecision {
    #[serde(alias = "projectId")]
    project_id: String,
    #[serde(default, alias = "periodId")]
    period_id: Option<String>,
    decision: String,
    #[serde(default, alias = "note")]
    reason: Option<String>,
    #[serde(default, alias = "decidedBy", alias = "approvedBy")]
    decided_by: Option<String>,
    #[serde(default, alias = "decidedAt", alias = "approvedAt")]
    decided_at: Option<Value>,
}

impl LegacyDecision {
    fn into_record(self) -> Option<ApprovalDecisionRecord> {
        let decision = normalize_approval_decision(&self.decision)?;
        let reason = non_empty(self.reason)?;
        Some(ApprovalDecisionRecord {
            decided_at: time(&self.decided_at)?,
            project_id: self.project_id,
            period_id: non_empty(self.period_id),
            decision,
            reason,
            decided_by: self.decided_by.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct LegacyLock {
    #[serde(alias = "projectId")]
    project_id: String,
    #[serde(default, alias = "periodId")]
    period_id: Option<String>,
    #[serde(default, alias = "lockedAt")]
    locked_at: Option<Value>,
    #[serde(default, alias = "lockedBy")]
    locked_by: Option<String>,
    #[serde(default, alias = "snapshotId")]
    snapshot_id: Option<String>,
}

impl LegacyLock {
    fn into_record(self) -> Option<PeriodLockRecord> {
        Some(PeriodLockRecord {
            locked_at: time(&self.locked_at)?,
            project_id: self.project_id,
            period_id: non_empty(self.period_id),
            status: PeriodStatus::Locked,
            locked_by: self.locked_by.unwrap_or_default(),
            snapshot_id: non_empty(self.snapshot_id),
        })
    }
}

#[derive(Debug, Deserialize)]
struct LegacySnapshot {
    #[serde(alias = "snapshotId", alias = "id")]
    snapshot_id: String,
    #[serde(alias = "projectId")]
    project_id: String,
    #[serde(default, alias = "periodId")]
    period_id: Option<String>,
    #[serde(alias = "finalBimScore", alias = "finalScore", alias = "score")]
    final_bim_score: f64,
    #[serde(default)]
    breakdown: Option<Value>,
    #[serde(default, alias = "evidenceCounts", alias = "counts")]
    evidence_counts: Option<Value>,
    #[serde(default, alias = "approvedBy")]
    approved_by: Option<String>,
    #[serde(default, alias = "approvedAt", alias = "createdAt")]
    approved_at: Option<Value>,
}

impl LegacySnapshot {
    fn into_record(self) -> Option<SnapshotRecord> {
        Some(SnapshotRecord {
            approved_at: time(&self.approved_at)?,
            breakdown: self.breakdown.as_ref().map(decode_breakdown).unwrap_or_default(),
            evidence_counts: self
                .evidence_counts
                .as_ref()
                .map(decode_counts)
                .unwrap_or_default(),
            snapshot_id: self.snapshot_id,
            project_id: self.project_id,
            period_id: non_empty(self.period_id),
            final_bim_score: self.final_bim_score,
            approved_by: self.approved_by.unwrap_or_default(),
        })
    }
}

/// Either `[{perspective_id|id, name, score}]` or `{ "<name>": score }`.
fn decode_breakdown(value: &Value) -> Vec<PerspectiveScore> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                let obj = item.as_object()?;
                let id = ["perspective_id", "perspectiveId", "id", "perspective"]
                    .iter()
                    .find_map(|k| obj.get(*k).and_then(Value::as_str))?;
                let name = obj.get("name").and_then(Value::as_str).unwrap_or(id);
                Some(PerspectiveScore {
                    perspective_id: id.to_string(),
                    name: name.to_string(),
                    score: obj.get("score").and_then(Value::as_f64)?,
                })
            })
            .collect(),
        Value::Object(map) => map
            .iter()
            .filter_map(|(name, score)| {
                Some(PerspectiveScore {
                    perspective_id: name.clone(),
                    name: name.clone(),
                    score: score.as_f64()?,
                })
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn decode_counts(value: &Value) -> ReviewStatusCounts {
    let get = |keys: &[&str]| -> usize {
        keys.iter()
            .find_map(|k| value.get(*k).and_then(Value::as_u64))
            .unwrap_or(0) as usize
    };
    ReviewStatusCounts {
        acceptable: get(&["acceptable", "ACCEPTABLE"]),
        needs_revision: get(&["needs_revision", "NEEDS_REVISION", "NEEDS REVISION", "needsRevision"]),
        rejected: get(&["rejected", "REJECTED"]),
        awaiting_review: get(&["awaiting_review", "AWAITING_REVIEW", "awaitingReview"]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimscore_model::ReviewOutcome;

    #[test]
    fn test_parse_timestamp_formats() {
        let rfc = parse_timestamp(&Value::String("2024-03-01T10:00:00Z".into())).unwrap();
        let plain = parse_timestamp(&Value::String("2024-03-01 10:00:00".into())).unwrap();
        let millis = parse_timestamp(&serde_json::json!(rfc.timestamp_millis())).unwrap();
        assert_eq!(rfc, plain);
        assert_eq!(rfc, millis);
        assert!(parse_timestamp(&Value::String("yesterday".into())).is_none());
        assert!(parse_timestamp(&Value::Null).is_none());
    }

    #[test]
    fn test_legacy_evidence_camel_case() {
        let raw = serde_json::json!([
            {
                "id": "E1",
                "projectId": "P1",
                "periodId": "2024-Q1",
                "type": "link",
                "title": "Clash report",
                "externalUrl": "https://example.com/r",
                "indicatorId": "IND-3",
                "status": "Needs Revision",
                "submittedAt": "2024-03-01T10:00:00Z",
                "createdAt": 1709280000000i64
            },
            { "id": "E2", "projectId": "P1", "type": "hologram", "text": "x" },
            { "projectId": "P1", "type": "TEXT", "text": "missing id" }
        ])
        .to_string();
        let store = decode_legacy(&LegacyPayloads {
            evidence: Some(raw),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(store.evidence_items.len(), 1);
        let e = &store.evidence_items[0];
        assert_eq!(e.status, EvidenceStatus::NeedsRevision);
        assert_eq!(e.indicator_ids, vec!["IND-3".to_string()]);
        assert_eq!(
            e.content,
            EvidenceContent::Url {
                external_url: "https://example.com/r".into()
            }
        );
        assert_eq!(e.updated_at, e.submitted_at.unwrap());
    }

    #[test]
    fn test_legacy_reviews_keyed_by_evidence() {
        let evidence = serde_json::json!([
            { "id": "E1", "projectId": "P1", "periodId": "Q1", "type": "TEXT", "text": "t", "status": "SUBMITTED" }
        ])
        .to_string();
        let reviews = serde_json::json!({
            "E1": {
                "status": "REJECTED",
                "reason": "blurry",
                "reviewer": "ho-1",
                "reviewedAt": "2024-03-05T00:00:00Z",
                "history": [
                    { "decision": "NEEDS REVISION", "reason": "incomplete", "reviewedAt": "2024-03-02T00:00:00Z" }
                ]
            }
        })
        .to_string();
        let store = decode_legacy(&LegacyPayloads {
            evidence: Some(evidence),
            reviews: Some(reviews),
            ..Default::default()
        })
        .unwrap();

        let record = &store.review_records["E1"];
        assert_eq!(record.project_id, "P1");
        assert_eq!(record.period_id.as_deref(), Some("Q1"));
        assert_eq!(record.review_history.len(), 2);
        assert_eq!(record.outcome, ReviewOutcome::Rejected);
        assert_eq!(record.review_history[0].outcome, ReviewOutcome::NeedsRevision);
    }

    #[test]
    fn test_legacy_snapshot_breakdown_map_and_counts() {
        let raw = serde_json::json!([{
            "id": "S1",
            "projectId": "P1",
            "periodId": "Q1",
            "finalScore": 72.5,
            "breakdown": { "Process": 80.0, "People": 65.0 },
            "counts": { "ACCEPTABLE": 3, "NEEDS_REVISION": 1 },
            "approvedAt": "2024-04-01T00:00:00Z"
        }])
        .to_string();
        let store = decode_legacy(&LegacyPayloads {
            snapshots: Some(raw),
            ..Default::default()
        })
        .unwrap();
        let s = &store.snapshots[0];
        assert_eq!(s.breakdown.len(), 2);
        assert_eq!(s.evidence_counts.acceptable, 3);
        assert_eq!(s.evidence_counts.needs_revision, 1);
    }

    #[test]
    fn test_corrupt_legacy_collection_is_ignored() {
        let store = decode_legacy(&LegacyPayloads {
            approvals: Some("not json".into()),
            ..Default::default()
        })
        .unwrap();
        assert!(store.approval_decisions.is_empty());
        assert!(decode_legacy(&LegacyPayloads::default()).is_none());
    }
}
