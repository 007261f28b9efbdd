//! BIM Scoring Local Truth Store
//!
//! Single versioned document holding all locally known scoring state:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        LOCAL TRUTH STORE                            │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  bim_scoring_store_v2 ─────┐                                        │
//! │  (StoreDocument)           │     ┌───────────────┐                  │
//! │                            ├────►│   reconcile   │──► Store ──► app │
//! │  bim_prototype_* ──────────┘     │  (merge rules)│                  │
//! │  (legacy, read-only)             └───────┬───────┘                  │
//! │                                          │ changed?                 │
//! │                                          ▼                          │
//! │                                 write back v2 document              │
//! │                                                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **Read-your-writes**: every mutation is load → apply → canonicalize →
//!   save under one writer lock, so a subsequent `load` sees it.
//! - **Never fails on bad data**: undecodable entries are skipped and logged,
//!   an unreadable document reads as an empty store; only repository I/O
//!   errors surface.
//! - **Legacy keys are never written**: they are merged in on every load and
//!   left untouched.

pub mod legacy;
pub mod reconcile;
pub mod repository;

#[cfg(test)]
mod tests;

use bimscore_model::{Result, Store, WorkflowError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub use legacy::{decode_legacy, LegacyPayloads, LEGACY_KEYS};
pub use reconcile::{canonicalize, merge, reconcile, Reconciled};
pub use repository::{FileRepository, MemoryRepository, StoreRepository};

/// Key of the current document.
pub const STORE_KEY: &str = "bim_scoring_store_v2";

pub const SCHEMA_VERSION: u32 = 2;

// ============================================================================
// Document
// ============================================================================

/// On-disk envelope around a [`Store`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreDocument {
    pub schema_version: u32,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
    pub store: Store,
}

impl StoreDocument {
    pub fn new(store: Store) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            saved_at: Some(Utc::now()),
            store,
        }
    }

    /// Decode a stored payload. Accepts the envelope or a bare store (early
    /// v2 builds wrote one). Entries that do not decode are skipped and
    /// logged; the rest of the document survives.
    pub fn decode(raw: &str) -> Store {
        if let Ok(doc) = serde_json::from_str::<StoreDocument>(raw) {
            if doc.schema_version > SCHEMA_VERSION {
                tracing::warn!(
                    schema_version = doc.schema_version,
                    "store document written by a newer schema; reading known fields only"
                );
            }
            return doc.store;
        }

        let body = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(mut map)) if map.contains_key("store") || map.contains_key("schema_version") => {
                match map.remove("store") {
                    Some(Value::Object(body)) => body,
                    _ => {
                        tracing::warn!("store document has no readable store body; treating as empty");
                        return Store::default();
                    }
                }
            }
            Ok(Value::Object(map)) => {
                if let Ok(store) = serde_json::from_value::<Store>(Value::Object(map.clone())) {
                    return store;
                }
                map
            }
            Ok(_) => {
                tracing::warn!("store document is not a JSON object; treating as empty");
                return Store::default();
            }
            Err(err) => {
                tracing::warn!(error = %err, "unreadable store document; treating as empty");
                return Store::default();
            }
        };

        tracing::warn!("store document has undecodable entries; keeping the rest");
        decode_entries(body)
    }
}

/// Field-by-field, entry-by-entry decode of a damaged store body.
fn decode_entries(mut body: Map<String, Value>) -> Store {
    Store {
        evidence_items: list_field(&mut body, "evidence_items"),
        review_records: keyed_field(&mut body, "review_records"),
        approval_decisions: list_field(&mut body, "approval_decisions"),
        snapshots: list_field(&mut body, "snapshots"),
        period_locks: list_field(&mut body, "period_locks"),
        project_meta: keyed_field(&mut body, "project_meta"),
        period_meta: keyed_field(&mut body, "period_meta"),
    }
}

fn list_field<T: DeserializeOwned>(body: &mut Map<String, Value>, field: &'static str) -> Vec<T> {
    match body.remove(field) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .into_iter()
            .enumerate()
            .filter_map(|(index, value)| match serde_json::from_value(value) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    tracing::warn!(field, index, error = %err, "skipping undecodable store entry");
                    None
                }
            })
            .collect(),
        Some(_) => {
            tracing::warn!(field, "store field is not a list; ignoring");
            Vec::new()
        }
    }
}

fn keyed_field<T: DeserializeOwned>(
    body: &mut Map<String, Value>,
    field: &'static str,
) -> BTreeMap<String, T> {
    match body.remove(field) {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(Value::Object(entries)) => entries
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_value(value) {
                Ok(entry) => Some((key, entry)),
                Err(err) => {
                    tracing::warn!(field, key = %key, error = %err, "skipping undecodable store entry");
                    None
                }
            })
            .collect(),
        Some(_) => {
            tracing::warn!(field, "store field is not a map; ignoring");
            BTreeMap::new()
        }
    }
}

// ============================================================================
// Local truth store
// ============================================================================

/// Durable local store. Cheap to clone; clones share the writer lock.
#[derive(Clone)]
pub struct LocalTruthStore {
    repo: Arc<dyn StoreRepository>,
    write_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for LocalTruthStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTruthStore").finish_non_exhaustive()
    }
}

impl LocalTruthStore {
    pub fn new(repo: Arc<dyn StoreRepository>) -> Self {
        Self {
            repo,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// In-memory store, mostly for tests.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryRepository::new()))
    }

    /// Load, migrating legacy keys and persisting the merged result if it
    /// differs from the stored document.
    pub fn load(&self) -> Result<Store> {
        let _guard = self.write_lock.lock();
        self.load_locked()
    }

    /// Apply `f` to the current store and persist the result. Nothing is
    /// written when `f` fails.
    pub fn mutate<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Store) -> Result<T>,
    {
        let _guard = self.write_lock.lock();
        let mut store = self.load_locked()?;
        let out = f(&mut store)?;
        let store = canonicalize(&store);
        self.persist(&store)?;
        Ok(out)
    }

    /// Merge an externally produced store into the local one with the same
    /// rules as legacy migration.
    pub fn import(&self, incoming: &Store) -> Result<Store> {
        let _guard = self.write_lock.lock();
        let current = self.load_locked()?;
        let merged = merge(&current, incoming);
        if merged != current {
            self.persist(&merged)?;
            tracing::info!(
                evidence = merged.evidence_items.len(),
                reviews = merged.review_records.len(),
                "imported store"
            );
        }
        Ok(merged)
    }

    fn load_locked(&self) -> Result<Store> {
        let local = self
            .repo
            .load(STORE_KEY)
            .map_err(WorkflowError::storage)?
            .map(|raw| StoreDocument::decode(&raw));
        let legacy = decode_legacy(&self.load_legacy()?);

        let Reconciled { store, changed } = reconcile(local, legacy);
        if changed {
            tracing::debug!("local store changed during reconcile; writing back");
            self.persist(&store)?;
        }
        Ok(store)
    }

    fn load_legacy(&self) -> Result<LegacyPayloads> {
        let get = |key: &str| self.repo.load(key).map_err(WorkflowError::storage);
        Ok(LegacyPayloads {
            evidence: get(legacy::LEGACY_EVIDENCE_KEY)?,
            reviews: get(legacy::LEGACY_REVIEWS_KEY)?,
            approvals: get(legacy::LEGACY_APPROVALS_KEY)?,
            locks: get(legacy::LEGACY_LOCKS_KEY)?,
            snapshots: get(legacy::LEGACY_SNAPSHOTS_KEY)?,
        })
    }

    fn persist(&self, store: &Store) -> Result<()> {
        let payload = serde_json::to_string_pretty(&StoreDocument::new(store.clone()))
            .map_err(WorkflowError::storage)?;
        self.repo
            .save(STORE_KEY, &payload)
            .map_err(WorkflowError::storage)
    }
}

/// Store backed by a directory of JSON files.
pub fn open_store(dir: impl AsRef<Path>) -> LocalTruthStore {
    LocalTruthStore::new(Arc::new(FileRepository::new(dir.as_ref())))
}
