//! Store merge: per-collection identity rules.
//!
//! ```text
//! collection          identity                        conflict rule
//! ──────────────────  ──────────────────────────────  ─────────────────────────────────────
//! evidence_items      id                              newest updated_at wins
//! review_records      evidence_id                     union of histories, re-sorted,
//!                                                     current fields = tail
//! approval_decisions  (scope, decided_at, decision,   union (append-only log)
//!                      decided_by, reason)
//! snapshots           scope                           earliest approved_at (immutable)
//! period_locks        scope                           earliest locked_at (created once)
//! project_meta        project id                      newest updated_at wins
//! period_meta         period id                       newest updated_at wins
//! ```
//!
//! Every rule is commutative and idempotent and every collection comes out in
//! a canonical order, so `merge(a, b) == merge(b, a)` and
//! `merge(c, c) == c` for any canonical `c`.

use bimscore_model::{
    ApprovalDecisionRecord, EvidenceItem, PeriodLockRecord, PeriodMeta, PeriodStatus,
    ProjectMeta, ReviewHistoryEntry, ReviewRecord, SnapshotRecord, Store,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Result of [`reconcile`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub store: Store,
    /// Whether the merged store differs from what was stored locally, i.e.
    /// whether the caller should write it back.
    pub changed: bool,
}

/// Merge the current document with a legacy one. Pure; persistence is the
/// caller's job.
pub fn reconcile(local: Option<Store>, legacy: Option<Store>) -> Reconciled {
    let base = local.clone().unwrap_or_default();
    let merged = match &legacy {
        Some(legacy) => merge(&base, legacy),
        None => canonicalize(&base),
    };
    let changed = match &local {
        Some(local) => *local != merged,
        None => !merged.is_empty(),
    };
    Reconciled {
        store: merged,
        changed,
    }
}

/// A store's canonical form (deduplicated, ordered, orphans dropped).
pub fn canonicalize(store: &Store) -> Store {
    merge(store, &Store::default())
}

pub fn merge(a: &Store, b: &Store) -> Store {
    let mut out = Store {
        evidence_items: merge_evidence(&a.evidence_items, &b.evidence_items),
        review_records: merge_reviews(&a.review_records, &b.review_records),
        approval_decisions: merge_decisions(&a.approval_decisions, &b.approval_decisions),
        snapshots: merge_snapshots(&a.snapshots, &b.snapshots),
        period_locks: Vec::new(),
        project_meta: merge_latest(&a.project_meta, &b.project_meta, |m: &ProjectMeta| {
            m.updated_at
        }),
        period_meta: merge_latest(&a.period_meta, &b.period_meta, |m: &PeriodMeta| {
            m.updated_at
        }),
    };
    out.period_locks = merge_locks(&a.period_locks, &b.period_locks, &out.snapshots);
    resolve_review_scopes(&mut out);
    out
}

/// Deterministic tiebreak for records that compare equal on their primary
/// key: the serialized form.
fn fingerprint<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

// ============================================================================
// Evidence
// ============================================================================

fn evidence_precedence(item: &EvidenceItem) -> (DateTime<Utc>, Option<i64>, Option<DateTime<Utc>>, String) {
    (
        item.updated_at,
        item.version,
        item.submitted_at,
        fingerprint(item),
    )
}

fn merge_evidence(a: &[EvidenceItem], b: &[EvidenceItem]) -> Vec<EvidenceItem> {
    let mut by_id: BTreeMap<&str, &EvidenceItem> = BTreeMap::new();
    for item in a.iter().chain(b.iter()) {
        by_id
            .entry(item.id.as_str())
            .and_modify(|current| {
                if evidence_precedence(item) > evidence_precedence(current) {
                    *current = item;
                }
            })
            .or_insert(item);
    }
    by_id.into_values().cloned().collect()
}

// ============================================================================
// Reviews
// ============================================================================

/// History of a record, synthesizing one entry from the current fields for
/// records that were stored without a history.
fn history_of(record: &ReviewRecord) -> Vec<ReviewHistoryEntry> {
    if record.review_history.is_empty() {
        vec![ReviewHistoryEntry {
            reviewed_at: record.reviewed_at,
            outcome: record.outcome,
            reviewed_by: record.reviewed_by.clone(),
            reason: record.reason.clone(),
        }]
    } else {
        record.review_history.clone()
    }
}

fn merge_reviews(
    a: &BTreeMap<String, ReviewRecord>,
    b: &BTreeMap<String, ReviewRecord>,
) -> BTreeMap<String, ReviewRecord> {
    let mut grouped: BTreeMap<&str, Vec<&ReviewRecord>> = BTreeMap::new();
    // The map key, not the record's own field, is the identity.
    for (key, record) in a.iter().chain(b.iter()) {
        grouped.entry(key.as_str()).or_default().push(record);
    }

    let mut out = BTreeMap::new();
    for (evidence_id, records) in grouped {
        let history: Vec<ReviewHistoryEntry> = records.iter().flat_map(|r| history_of(r)).collect();
        // Scope comes from the record holding the latest entry.
        let Some(scope_source) = records.iter().max_by(|x, y| {
            (x.reviewed_at, &x.project_id, &x.period_id).cmp(&(
                y.reviewed_at,
                &y.project_id,
                &y.period_id,
            ))
        }) else {
            continue;
        };
        if let Some(record) = ReviewRecord::from_history(
            evidence_id,
            &scope_source.project_id,
            scope_source.period_id.as_deref(),
            history,
        ) {
            out.insert(evidence_id.to_string(), record);
        }
    }
    out
}

/// Drop reviews whose evidence item is missing; fill in the scope of reviews
/// that arrived without one from their evidence item.
fn resolve_review_scopes(store: &mut Store) {
    let scopes: BTreeMap<&str, (&str, Option<&str>)> = store
        .evidence_items
        .iter()
        .map(|e| (e.id.as_str(), (e.project_id.as_str(), e.period_id.as_deref())))
        .collect();

    let mut dropped = 0usize;
    let mut resolved = BTreeMap::new();
    for (evidence_id, mut record) in std::mem::take(&mut store.review_records) {
        let Some((project_id, period_id)) = scopes.get(evidence_id.as_str()).copied() else {
            dropped += 1;
            continue;
        };
        if record.project_id.trim().is_empty() {
            record.project_id = project_id.to_string();
            record.period_id = period_id.map(str::to_string);
        }
        record.evidence_id = evidence_id.clone();
        resolved.insert(evidence_id, record);
    }
    if dropped > 0 {
        tracing::warn!(dropped, "dropped review records without a matching evidence item");
    }
    store.review_records = resolved;
}

// ============================================================================
// Decisions, snapshots, locks
// ============================================================================

fn merge_decisions(
    a: &[ApprovalDecisionRecord],
    b: &[ApprovalDecisionRecord],
) -> Vec<ApprovalDecisionRecord> {
    let mut by_key = BTreeMap::new();
    for decision in a.iter().chain(b.iter()) {
        by_key
            .entry(decision.natural_key())
            .or_insert_with(|| decision.clone());
    }
    by_key.into_values().collect()
}

fn merge_snapshots(a: &[SnapshotRecord], b: &[SnapshotRecord]) -> Vec<SnapshotRecord> {
    let mut by_scope: BTreeMap<String, &SnapshotRecord> = BTreeMap::new();
    for snapshot in a.iter().chain(b.iter()) {
        let rank = |s: &SnapshotRecord| (s.approved_at, s.snapshot_id.clone(), fingerprint(s));
        by_scope
            .entry(snapshot.scope_key())
            .and_modify(|current| {
                if rank(snapshot) < rank(current) {
                    *current = snapshot;
                }
            })
            .or_insert(snapshot);
    }
    by_scope.into_values().cloned().collect()
}

fn merge_locks(
    a: &[PeriodLockRecord],
    b: &[PeriodLockRecord],
    snapshots: &[SnapshotRecord],
) -> Vec<PeriodLockRecord> {
    let mut by_scope: BTreeMap<String, Vec<&PeriodLockRecord>> = BTreeMap::new();
    for lock in a.iter().chain(b.iter()) {
        by_scope.entry(lock.scope_key()).or_default().push(lock);
    }

    let mut out = Vec::with_capacity(by_scope.len());
    for (scope, mut candidates) in by_scope {
        candidates.sort_by(|x, y| {
            (x.locked_at, &x.locked_by, &x.snapshot_id).cmp(&(y.locked_at, &y.locked_by, &y.snapshot_id))
        });
        let Some(first) = candidates.first() else {
            continue;
        };
        let mut lock = (*first).clone();
        lock.status = PeriodStatus::Locked;
        if lock.snapshot_id.is_none() {
            lock.snapshot_id = candidates
                .iter()
                .find_map(|c| c.snapshot_id.clone())
                .or_else(|| {
                    snapshots
                        .iter()
                        .find(|s| s.scope_key() == scope)
                        .map(|s| s.snapshot_id.clone())
                });
        }
        out.push(lock);
    }
    out
}

// ============================================================================
// Metadata
// ============================================================================

fn merge_latest<T, F>(a: &BTreeMap<String, T>, b: &BTreeMap<String, T>, updated_at: F) -> BTreeMap<String, T>
where
    T: Clone + Serialize,
    F: Fn(&T) -> DateTime<Utc>,
{
    let mut out: BTreeMap<String, T> = a.clone();
    for (key, incoming) in b {
        match out.get(key) {
            Some(current)
                if (updated_at(current), fingerprint(current))
                    >= (updated_at(incoming), fingerprint(incoming)) => {}
            _ => {
                out.insert(key.clone(), incoming.clone());
            }
        }
    }
    out
}
