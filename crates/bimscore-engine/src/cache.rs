//! Write-back of backend entities into the local store.

use crate::wire::DecodedEvidence;
use bimscore_model::{EvidenceItem, PeriodMeta, ProjectMeta, ReviewHistoryEntry, ReviewRecord, Store};
use bimscore_store::merge;

/// Append `entry` to the item's review record. A record left in another
/// scope follows the item; its earlier entries stay in the history.
pub fn append_review(store: &mut Store, item: &EvidenceItem, entry: ReviewHistoryEntry) {
    if let Some(record) = store.review_records.get_mut(&item.id) {
        if record.scope_key() != item.scope_key() {
            record.project_id = item.project_id.clone();
            record.period_id = item.period_id.clone();
        }
        record.append(entry);
        return;
    }
    if let Some(record) =
        ReviewRecord::from_history(&item.id, &item.project_id, item.period_id.as_deref(), vec![entry])
    {
        store.review_records.insert(item.id.clone(), record);
    }
}

/// Replace the local copy with the backend's answer to a write.
pub fn absorb_written(store: &mut Store, decoded: DecodedEvidence) {
    let DecodedEvidence { item, reviews } = decoded;
    for entry in reviews {
        append_review(store, &item, entry);
    }
    store.upsert_evidence(item);
}

/// Merge a backend read into the local store with the regular merge rules
/// (newest `updated_at` wins, review histories are unioned).
pub fn absorb_read(
    store: &mut Store,
    evidence: Vec<DecodedEvidence>,
    projects: Vec<ProjectMeta>,
    periods: Vec<PeriodMeta>,
) {
    let mut incoming = Store::default();
    for DecodedEvidence { item, reviews } in evidence {
        if let Some(record) =
            ReviewRecord::from_history(&item.id, &item.project_id, item.period_id.as_deref(), reviews)
        {
            incoming.review_records.insert(item.id.clone(), record);
        }
        incoming.evidence_items.push(item);
    }
    incoming.project_meta = projects.into_iter().map(|p| (p.id.clone(), p)).collect();
    incoming.period_meta = periods.into_iter().map(|p| (p.id.clone(), p)).collect();
    *store = merge(store, &incoming);
}
