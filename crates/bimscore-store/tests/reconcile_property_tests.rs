//! Property-Based Tests for store reconciliation
//!
//! 1. Merge is commutative
//! 2. Merging a canonical store with itself is a no-op
//! 3. Review history order does not affect the merged record
//! 4. Locks and snapshots keep the earliest record per scope

use bimscore_model::{
    ApprovalDecision, ApprovalDecisionRecord, EvidenceContent, EvidenceItem, EvidenceStatus,
    PeriodLockRecord, PeriodStatus, ReviewHistoryEntry, ReviewOutcome, ReviewRecord,
    ReviewStatusCounts, SnapshotRecord, Store,
};
use bimscore_store::{canonicalize, merge, reconcile};
use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use std::collections::BTreeMap;

// ============================================================================
// Strategies
// ============================================================================

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// Narrow ranges so ids and timestamps collide often.
fn time_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..20).prop_map(ts)
}

fn evidence_id_strategy() -> impl Strategy<Value = String> {
    (0u8..4).prop_map(|n| format!("E{n}"))
}

fn period_strategy() -> impl Strategy<Value = Option<String>> {
    prop_oneof![Just(None), Just(Some("2024-Q1".to_string())), Just(Some("2024-Q2".to_string()))]
}

fn actor_strategy() -> impl Strategy<Value = String> {
    prop_oneof![Just("ana".to_string()), Just("ben".to_string())]
}

fn outcome_strategy() -> impl Strategy<Value = ReviewOutcome> {
    prop_oneof![
        Just(ReviewOutcome::Acceptable),
        Just(ReviewOutcome::NeedsRevision),
        Just(ReviewOutcome::Rejected),
    ]
}

fn evidence_strategy() -> impl Strategy<Value = EvidenceItem> {
    (
        evidence_id_strategy(),
        period_strategy(),
        prop_oneof![
            Just(EvidenceStatus::Draft),
            Just(EvidenceStatus::Submitted),
            Just(EvidenceStatus::NeedsRevision),
        ],
        time_strategy(),
        proptest::option::of(0i64..3),
        "[a-z]{1,6}",
    )
        .prop_map(|(id, period_id, status, updated_at, version, text)| EvidenceItem {
            id,
            project_id: "P1".to_string(),
            period_id,
            content: EvidenceContent::Text { text },
            title: "evidence".to_string(),
            description: String::new(),
            indicator_ids: vec!["IND-1".to_string()],
            status,
            version,
            submitted_at: (status == EvidenceStatus::Submitted).then_some(updated_at),
            created_at: ts(0),
            updated_at,
            created_by: None,
        })
}

fn history_entry_strategy() -> impl Strategy<Value = ReviewHistoryEntry> {
    (time_strategy(), outcome_strategy(), actor_strategy(), "[a-z]{0,4}").prop_map(
        |(reviewed_at, outcome, reviewed_by, reason)| ReviewHistoryEntry {
            reviewed_at,
            outcome,
            reviewed_by,
            reason,
        },
    )
}

fn review_strategy() -> impl Strategy<Value = ReviewRecord> {
    (
        evidence_id_strategy(),
        period_strategy(),
        prop::collection::vec(history_entry_strategy(), 1..4),
    )
        .prop_filter_map("non-empty history", |(id, period, history)| {
            ReviewRecord::from_history(&id, "P1", period.as_deref(), history)
        })
}

fn decision_strategy() -> impl Strategy<Value = ApprovalDecisionRecord> {
    (
        period_strategy(),
        prop_oneof![
            Just(ApprovalDecision::ApprovePeriod),
            Just(ApprovalDecision::RejectApproval)
        ],
        actor_strategy(),
        time_strategy(),
    )
        .prop_map(|(period_id, decision, decided_by, decided_at)| ApprovalDecisionRecord {
            project_id: "P1".to_string(),
            period_id,
            decision,
            reason: "reason".to_string(),
            decided_by,
            decided_at,
        })
}

fn lock_strategy() -> impl Strategy<Value = PeriodLockRecord> {
    (
        period_strategy(),
        time_strategy(),
        actor_strategy(),
        proptest::option::of((0u8..3).prop_map(|n| format!("S{n}"))),
    )
        .prop_map(|(period_id, locked_at, locked_by, snapshot_id)| PeriodLockRecord {
            project_id: "P1".to_string(),
            period_id,
            status: PeriodStatus::Locked,
            locked_at,
            locked_by,
            snapshot_id,
        })
}

fn snapshot_strategy() -> impl Strategy<Value = SnapshotRecord> {
    (period_strategy(), time_strategy(), (0u8..3), (0u32..=100)).prop_map(
        |(period_id, approved_at, n, score)| SnapshotRecord {
            snapshot_id: format!("S{n}"),
            project_id: "P1".to_string(),
            period_id,
            final_bim_score: f64::from(score),
            breakdown: Vec::new(),
            evidence_counts: ReviewStatusCounts::default(),
            approved_by: "ana".to_string(),
            approved_at,
        },
    )
}

fn store_strategy() -> impl Strategy<Value = Store> {
    (
        prop::collection::vec(evidence_strategy(), 0..5),
        prop::collection::vec(review_strategy(), 0..4),
        prop::collection::vec(decision_strategy(), 0..3),
        prop::collection::vec(snapshot_strategy(), 0..2),
        prop::collection::vec(lock_strategy(), 0..2),
    )
        .prop_map(|(evidence, reviews, decisions, snapshots, locks)| Store {
            evidence_items: evidence,
            review_records: reviews
                .into_iter()
                .map(|r| (r.evidence_id.clone(), r))
                .collect::<BTreeMap<_, _>>(),
            approval_decisions: decisions,
            snapshots,
            period_locks: locks,
            ..Store::default()
        })
}

// ============================================================================
// Merge laws
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn merge_is_commutative(a in store_strategy(), b in store_strategy()) {
        prop_assert_eq!(merge(&a, &b), merge(&b, &a));
    }

    #[test]
    fn merge_with_self_is_identity_on_canonical(s in store_strategy()) {
        let c = canonicalize(&s);
        prop_assert_eq!(merge(&c, &c), c.clone());
        prop_assert_eq!(canonicalize(&c), c);
    }

    #[test]
    fn reconcile_reports_no_change_on_fixed_point(s in store_strategy(), legacy in store_strategy()) {
        let first = reconcile(Some(s), Some(legacy.clone()));
        let second = reconcile(Some(first.store.clone()), Some(legacy));
        prop_assert!(!second.changed);
        prop_assert_eq!(second.store, first.store);
    }

    #[test]
    fn review_history_order_is_irrelevant(
        mut entries in prop::collection::vec(history_entry_strategy(), 1..6),
        split in 0usize..6,
    ) {
        let forward = ReviewRecord::from_history("E0", "P1", None, entries.clone()).unwrap();
        entries.reverse();
        let split = split.min(entries.len());
        let (left, right) = entries.split_at(split);

        let mut a = Store::default();
        let mut b = Store::default();
        for s in [&mut a, &mut b] {
            s.evidence_items.push(EvidenceItem {
                id: "E0".to_string(),
                project_id: "P1".to_string(),
                period_id: None,
                content: EvidenceContent::Text { text: "t".to_string() },
                title: "t".to_string(),
                description: String::new(),
                indicator_ids: Vec::new(),
                status: EvidenceStatus::Submitted,
                version: None,
                submitted_at: Some(ts(0)),
                created_at: ts(0),
                updated_at: ts(0),
                created_by: None,
            });
        }
        if let Some(r) = ReviewRecord::from_history("E0", "P1", None, left.to_vec()) {
            a.review_records.insert("E0".to_string(), r);
        }
        if let Some(r) = ReviewRecord::from_history("E0", "P1", None, right.to_vec()) {
            b.review_records.insert("E0".to_string(), r);
        }

        let merged = merge(&a, &b);
        prop_assert_eq!(&merged.review_records["E0"], &forward);
    }

    #[test]
    fn earliest_lock_and_snapshot_win(a in store_strategy(), b in store_strategy()) {
        let merged = merge(&a, &b);
        for lock in &merged.period_locks {
            let key = lock.scope_key();
            let earliest = a.period_locks.iter().chain(b.period_locks.iter())
                .filter(|l| l.scope_key() == key)
                .map(|l| l.locked_at)
                .min();
            prop_assert_eq!(Some(lock.locked_at), earliest);
            prop_assert_eq!(lock.status, PeriodStatus::Locked);
        }
        for snapshot in &merged.snapshots {
            let key = snapshot.scope_key();
            let earliest = a.snapshots.iter().chain(b.snapshots.iter())
                .filter(|s| s.scope_key() == key)
                .map(|s| s.approved_at)
                .min();
            prop_assert_eq!(Some(snapshot.approved_at), earliest);
        }
    }

    #[test]
    fn merged_reviews_always_reference_existing_evidence(a in store_strategy(), b in store_strategy()) {
        let merged = merge(&a, &b);
        for (id, record) in &merged.review_records {
            prop_assert!(merged.evidence(id).is_some());
            prop_assert_eq!(id, &record.evidence_id);
        }
    }
}
