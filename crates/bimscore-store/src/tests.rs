//! End-to-end tests for the local truth store

use super::*;
use bimscore_model::{
    ApprovalDecision, ApprovalDecisionRecord, EvidenceContent, EvidenceItem, EvidenceStatus,
    PeriodLockRecord, PeriodStatus, ReviewHistoryEntry, ReviewOutcome, ReviewRecord,
};
use chrono::TimeZone;
use tempfile::tempdir;

fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn evidence(id: &str, updated: i64) -> EvidenceItem {
    EvidenceItem {
        id: id.to_string(),
        project_id: "P1".to_string(),
        period_id: Some("2024-Q1".to_string()),
        content: EvidenceContent::Url {
            external_url: format!("https://docs.example.com/{id}"),
        },
        title: format!("Evidence {id}"),
        description: String::new(),
        indicator_ids: vec!["IND-1".to_string()],
        status: EvidenceStatus::Submitted,
        version: None,
        submitted_at: Some(t(updated)),
        created_at: t(0),
        updated_at: t(updated),
        created_by: Some("pc-1".to_string()),
    }
}

fn review(evidence_id: &str, outcome: ReviewOutcome, at: i64) -> ReviewRecord {
    ReviewRecord::from_history(
        evidence_id,
        "P1",
        Some("2024-Q1"),
        vec![ReviewHistoryEntry {
            reviewed_at: t(at),
            outcome,
            reviewed_by: "ho-1".to_string(),
            reason: "checked".to_string(),
        }],
    )
    .unwrap()
}

/// Helper to create a file-backed store
fn test_store() -> (LocalTruthStore, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());
    (store, dir)
}

#[test]
fn test_empty_store_loads_without_writing() {
    let (store, dir) = test_store();
    let loaded = store.load().unwrap();
    assert!(loaded.is_empty());
    assert!(!dir.path().join(format!("{STORE_KEY}.json")).exists());
}

#[test]
fn test_mutation_is_durable_across_instances() {
    let (store, dir) = test_store();
    store
        .mutate(|s| {
            s.upsert_evidence(evidence("E1", 10));
            Ok(())
        })
        .unwrap();

    let reopened = open_store(dir.path());
    let loaded = reopened.load().unwrap();
    assert_eq!(loaded.evidence_items.len(), 1);
    assert_eq!(loaded.evidence_items[0].id, "E1");
}

#[test]
fn test_failed_mutation_writes_nothing() {
    let store = LocalTruthStore::in_memory();
    let err = store
        .mutate(|s| -> Result<()> {
            s.upsert_evidence(evidence("E1", 10));
            Err(WorkflowError::validation("nope"))
        })
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Validation(_)));
    assert!(store.load().unwrap().is_empty());
}

#[test]
fn test_corrupt_document_reads_as_empty() {
    let repo = Arc::new(MemoryRepository::with_entries([(STORE_KEY, "{ not json")]));
    let store = LocalTruthStore::new(repo.clone());
    assert!(store.load().unwrap().is_empty());
    // Nothing to migrate, so the corrupt payload is left in place.
    assert_eq!(repo.get(STORE_KEY).as_deref(), Some("{ not json"));
}

#[test]
fn test_bad_entry_does_not_empty_the_document() {
    let mut draft = evidence("E2", 20);
    draft.status = EvidenceStatus::Draft;
    let mut archived = serde_json::to_value(evidence("E3", 30)).unwrap();
    archived["status"] = serde_json::json!("ARCHIVED");
    let raw = serde_json::json!({
        "schema_version": SCHEMA_VERSION,
        "store": {
            "evidence_items": [
                serde_json::to_value(evidence("E1", 10)).unwrap(),
                serde_json::to_value(draft).unwrap(),
                archived,
            ],
            "review_records": {
                "E1": serde_json::to_value(review("E1", ReviewOutcome::Acceptable, 15)).unwrap(),
                "E9": { "outcome": "MAYBE" }
            }
        }
    })
    .to_string();
    let repo = Arc::new(MemoryRepository::with_entries([(STORE_KEY, raw)]));
    let store = LocalTruthStore::new(repo.clone());

    let loaded = store.load().unwrap();
    let ids: Vec<&str> = loaded.evidence_items.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["E1", "E2"]);
    assert!(loaded.review_records.contains_key("E1"));

    // The next write keeps the surviving entries.
    store.mutate(|_| Ok(())).unwrap();
    let persisted = StoreDocument::decode(&repo.get(STORE_KEY).unwrap());
    assert_eq!(persisted.evidence_items.len(), 2);
    assert!(persisted.review_records.contains_key("E1"));
}

#[test]
fn test_envelope_without_body_reads_as_empty() {
    let raw = serde_json::json!({ "schema_version": SCHEMA_VERSION, "store": [1, 2] }).to_string();
    assert!(StoreDocument::decode(&raw).is_empty());
}

#[test]
fn test_bare_store_payload_is_accepted() {
    let mut bare = Store::default();
    bare.evidence_items.push(evidence("E1", 10));
    let raw = serde_json::to_string(&bare).unwrap();
    let repo = Arc::new(MemoryRepository::with_entries([(STORE_KEY, raw)]));
    let loaded = LocalTruthStore::new(repo).load().unwrap();
    assert_eq!(loaded.evidence_items.len(), 1);
}

#[test]
fn test_legacy_migration_merges_and_persists() {
    let legacy_evidence = serde_json::json!([
        {
            "id": "E1", "projectId": "P1", "periodId": "2024-Q1", "type": "URL",
            "externalUrl": "https://old.example.com", "status": "SUBMITTED",
            "submittedAt": "2023-11-14T22:13:30Z", "createdAt": "2023-11-14T22:13:20Z"
        },
        {
            "id": "E9", "projectId": "P1", "periodId": "2024-Q1", "type": "TEXT",
            "text": "legacy only", "status": "DRAFT", "createdAt": "2023-11-14T22:13:20Z"
        }
    ])
    .to_string();
    let legacy_reviews = serde_json::json!({
        "E1": { "status": "ACCEPTABLE", "reviewer": "ho-0", "reviewedAt": "2023-11-14T22:13:40Z" },
        "GHOST": { "status": "REJECTED", "reviewedAt": "2023-11-14T22:13:40Z" }
    })
    .to_string();

    let mut current = Store::default();
    current.evidence_items.push(evidence("E1", 100));
    let repo = Arc::new(MemoryRepository::with_entries([
        (
            STORE_KEY.to_string(),
            serde_json::to_string(&StoreDocument::new(current)).unwrap(),
        ),
        (legacy::LEGACY_EVIDENCE_KEY.to_string(), legacy_evidence.clone()),
        (legacy::LEGACY_REVIEWS_KEY.to_string(), legacy_reviews),
    ]));

    let store = LocalTruthStore::new(repo.clone());
    let loaded = store.load().unwrap();

    // Newer local copy of E1 wins; legacy-only E9 is adopted.
    assert_eq!(loaded.evidence_items.len(), 2);
    assert_eq!(loaded.evidence("E1").unwrap().updated_at, t(100));
    assert!(loaded.evidence("E9").is_some());

    // Legacy review adopts E1's scope; the orphan is dropped.
    assert_eq!(loaded.review_records.len(), 1);
    assert_eq!(loaded.review_records["E1"].project_id, "P1");

    // Legacy keys are read-only.
    assert_eq!(
        repo.get(legacy::LEGACY_EVIDENCE_KEY).as_deref(),
        Some(legacy_evidence.as_str())
    );

    // Second load is a fixed point.
    let persisted = repo.get(STORE_KEY).unwrap();
    let again = store.load().unwrap();
    assert_eq!(again, loaded);
    assert_eq!(StoreDocument::decode(&persisted), loaded);
}

#[test]
fn test_import_unions_histories_and_keeps_first_lock() {
    let store = LocalTruthStore::in_memory();
    store
        .mutate(|s| {
            s.upsert_evidence(evidence("E1", 10));
            s.review_records
                .insert("E1".into(), review("E1", ReviewOutcome::NeedsRevision, 20));
            s.period_locks.push(PeriodLockRecord {
                project_id: "P1".into(),
                period_id: Some("2024-Q1".into()),
                status: PeriodStatus::Locked,
                locked_at: t(50),
                locked_by: "mgr-a".into(),
                snapshot_id: Some("S-A".into()),
            });
            Ok(())
        })
        .unwrap();

    let mut incoming = Store::default();
    incoming.evidence_items.push(evidence("E1", 10));
    incoming
        .review_records
        .insert("E1".into(), review("E1", ReviewOutcome::Acceptable, 30));
    incoming.period_locks.push(PeriodLockRecord {
        project_id: "P1".into(),
        period_id: Some("2024-Q1".into()),
        status: PeriodStatus::Locked,
        locked_at: t(60),
        locked_by: "mgr-b".into(),
        snapshot_id: Some("S-B".into()),
    });
    incoming.approval_decisions.push(ApprovalDecisionRecord {
        project_id: "P1".into(),
        period_id: Some("2024-Q1".into()),
        decision: ApprovalDecision::ApprovePeriod,
        reason: "all good".into(),
        decided_by: "mgr-b".into(),
        decided_at: t(60),
    });

    let merged = store.import(&incoming).unwrap();
    let record = &merged.review_records["E1"];
    assert_eq!(record.review_history.len(), 2);
    assert_eq!(record.outcome, ReviewOutcome::Acceptable);
    assert_eq!(merged.period_locks.len(), 1);
    assert_eq!(merged.period_locks[0].locked_by, "mgr-a");
    assert_eq!(merged.approval_decisions.len(), 1);

    // Importing the same thing again is a no-op.
    let twice = store.import(&incoming).unwrap();
    assert_eq!(twice, merged);
}

#[test]
fn test_clones_share_writer() {
    let store = LocalTruthStore::in_memory();
    let other = store.clone();
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let s = if i % 2 == 0 { store.clone() } else { other.clone() };
            std::thread::spawn(move || {
                s.mutate(|st| {
                    st.upsert_evidence(evidence(&format!("E{i}"), i));
                    Ok(())
                })
                .unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(store.load().unwrap().evidence_items.len(), 8);
}
