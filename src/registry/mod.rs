//! Artifact metadata registry.
//!
//! Process-wide view of every live `ArtifactRecord`, keyed by (owner id,
//! artifact id), loaded from the durable backend at startup and written
//! through on every mutation. Synchronization is per-owner: the outer map
//! hands out one shelf per owner, so concurrent jobs for unrelated owners
//! never serialize on each other, and whole-registry scans (owner-less
//! lookup, expiry sweep) snapshot the shelf list instead of holding the
//! outer lock.
//!
//! TTLs are fixed at record creation and never extended by access.
//! `list_owner` filters expired records at read time; `sweep_expired` is the
//! reclamation path and is idempotent.

pub mod backend;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use thiserror::Error;

use apkforge_protocol::ArtifactRecord;

use self::backend::{BackendError, MetadataBackend};

type Shelf = Arc<RwLock<HashMap<String, ArtifactRecord>>>;

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("metadata backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Result of one expiry sweep.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    /// Records scanned across all owners.
    pub scanned: usize,
    /// Records removed from the registry and backend.
    pub removed: Vec<ArtifactRecord>,
    /// Non-fatal errors encountered (record kept for the next sweep).
    pub errors: Vec<String>,
}

/// In-process registry backed by a durable metadata store.
pub struct MetadataRegistry {
    shelves: RwLock<HashMap<String, Shelf>>,
    backend: Box<dyn MetadataBackend>,
}

impl MetadataRegistry {
    /// Load the registry from its backend.
    pub fn new(backend: Box<dyn MetadataBackend>) -> Result<Self, RegistryError> {
        let mut shelves: HashMap<String, Shelf> = HashMap::new();

        for owner in backend.owners()? {
            let mut records = HashMap::new();
            for record in backend.list_owner(&owner)? {
                records.insert(record.artifact_id.clone(), record);
            }
            shelves.insert(owner, Arc::new(RwLock::new(records)));
        }

        Ok(Self {
            shelves: RwLock::new(shelves),
            backend,
        })
    }

    /// Register a record. The backend write happens first so the in-process
    /// view never gets ahead of durable state.
    pub fn put(&self, record: ArtifactRecord) -> Result<(), RegistryError> {
        self.backend.put(&record)?;

        let shelf = self.shelf_for(&record.owner_id);
        shelf
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.artifact_id.clone(), record);

        Ok(())
    }

    /// Targeted lookup by (owner, artifact id).
    pub fn get(&self, owner_id: &str, artifact_id: &str) -> Option<ArtifactRecord> {
        let shelf = self.existing_shelf(owner_id)?;
        let records = shelf.read().unwrap_or_else(PoisonError::into_inner);
        records.get(artifact_id).cloned()
    }

    /// The owner's unexpired records, newest first.
    pub fn list_owner(&self, owner_id: &str) -> Vec<ArtifactRecord> {
        let now = Utc::now();
        let Some(shelf) = self.existing_shelf(owner_id) else {
            return Vec::new();
        };

        let mut records: Vec<ArtifactRecord> = {
            let records = shelf.read().unwrap_or_else(PoisonError::into_inner);
            records
                .values()
                .filter(|r| !r.is_expired_at(now))
                .cloned()
                .collect()
        };
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    /// Owner-less lookup by artifact id.
    ///
    /// Scans every owner's shelf. Acceptable because this only backs the
    /// low-frequency download-by-id and administrative-delete paths.
    pub fn find_by_artifact(&self, artifact_id: &str) -> Option<ArtifactRecord> {
        for shelf in self.snapshot_shelves() {
            let records = shelf.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(record) = records.get(artifact_id) {
                return Some(record.clone());
            }
        }
        None
    }

    /// Remove a record, returning it if it existed.
    pub fn remove(
        &self,
        owner_id: &str,
        artifact_id: &str,
    ) -> Result<Option<ArtifactRecord>, RegistryError> {
        self.backend.delete(owner_id, artifact_id)?;

        let Some(shelf) = self.existing_shelf(owner_id) else {
            return Ok(None);
        };
        let removed = shelf
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(artifact_id);
        Ok(removed)
    }

    /// Remove every record whose expiry has passed at `now`.
    ///
    /// Safe to run concurrently with `put`/`get`; a record whose backend
    /// delete fails stays registered and is retried by the next sweep.
    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();

        for shelf in self.snapshot_shelves() {
            let expired: Vec<ArtifactRecord> = {
                let records = shelf.read().unwrap_or_else(PoisonError::into_inner);
                outcome.scanned += records.len();
                records
                    .values()
                    .filter(|r| r.is_expired_at(now))
                    .cloned()
                    .collect()
            };

            for record in expired {
                if let Err(e) = self.backend.delete(&record.owner_id, &record.artifact_id) {
                    outcome.errors.push(format!(
                        "failed to delete record {}/{}: {}",
                        record.owner_id, record.artifact_id, e
                    ));
                    continue;
                }
                shelf
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&record.artifact_id);
                outcome.removed.push(record);
            }
        }

        outcome
    }

    /// Remove every record whose expiry has passed.
    pub fn sweep_expired(&self) -> SweepOutcome {
        self.sweep_expired_at(Utc::now())
    }

    /// Total records held, expired or not.
    pub fn len(&self) -> usize {
        self.snapshot_shelves()
            .iter()
            .map(|s| s.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    /// True when no records are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The shelf for `owner_id`, created if absent.
    fn shelf_for(&self, owner_id: &str) -> Shelf {
        {
            let shelves = self.shelves.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(shelf) = shelves.get(owner_id) {
                return Arc::clone(shelf);
            }
        }

        let mut shelves = self.shelves.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            shelves
                .entry(owner_id.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(HashMap::new()))),
        )
    }

    /// The shelf for `owner_id`, if one exists.
    fn existing_shelf(&self, owner_id: &str) -> Option<Shelf> {
        let shelves = self.shelves.read().unwrap_or_else(PoisonError::into_inner);
        shelves.get(owner_id).map(Arc::clone)
    }

    /// Snapshot of all shelves; the outer lock is released before any shelf
    /// is touched.
    fn snapshot_shelves(&self) -> Vec<Shelf> {
        let shelves = self.shelves.read().unwrap_or_else(PoisonError::into_inner);
        shelves.values().map(Arc::clone).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::backend::JsonFileBackend;
    use super::*;
    use apkforge_protocol::DownloadRef;
    use chrono::Duration;

    fn make_registry(root: &std::path::Path) -> MetadataRegistry {
        MetadataRegistry::new(Box::new(JsonFileBackend::new(root).unwrap())).unwrap()
    }

    fn make_record(owner: &str, id: &str, ttl_seconds: i64) -> ArtifactRecord {
        ArtifactRecord::new(
            id.to_string(),
            owner.to_string(),
            format!("{}_{}.apk", owner, id),
            "cafe".to_string(),
            1,
            Utc::now(),
            Duration::seconds(ttl_seconds),
            DownloadRef::Local,
        )
    }

    #[test]
    fn test_put_get_and_scoping() {
        let root = tempfile::tempdir().unwrap();
        let registry = make_registry(root.path());

        registry.put(make_record("alice", "a1", 3600)).unwrap();
        registry.put(make_record("bob", "b1", 3600)).unwrap();

        assert!(registry.get("alice", "a1").is_some());
        assert!(registry.get("alice", "b1").is_none());
        assert!(registry.get("bob", "b1").is_some());
    }

    #[test]
    fn test_list_owner_filters_expired_at_read_time() {
        let root = tempfile::tempdir().unwrap();
        let registry = make_registry(root.path());

        registry.put(make_record("alice", "live", 3600)).unwrap();
        registry.put(make_record("alice", "dead", -1)).unwrap();

        // No sweep has run, yet the expired record is invisible.
        let listed = registry.list_owner("alice");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].artifact_id, "live");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_find_by_artifact_crosses_owners() {
        let root = tempfile::tempdir().unwrap();
        let registry = make_registry(root.path());

        registry.put(make_record("alice", "a1", 3600)).unwrap();
        registry.put(make_record("bob", "b1", 3600)).unwrap();

        let found = registry.find_by_artifact("b1").unwrap();
        assert_eq!(found.owner_id, "bob");
        assert!(registry.find_by_artifact("nothing").is_none());
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let root = tempfile::tempdir().unwrap();
        let registry = make_registry(root.path());

        registry.put(make_record("alice", "live", 3600)).unwrap();
        registry.put(make_record("alice", "dead1", -1)).unwrap();
        registry.put(make_record("bob", "dead2", -1)).unwrap();

        let outcome = registry.sweep_expired();
        assert_eq!(outcome.scanned, 3);
        assert_eq!(outcome.removed.len(), 2);
        assert!(outcome.errors.is_empty());
        assert_eq!(registry.len(), 1);
        assert!(registry.get("alice", "live").is_some());
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let registry = make_registry(root.path());

        registry.put(make_record("alice", "dead", -1)).unwrap();

        let first = registry.sweep_expired();
        assert_eq!(first.removed.len(), 1);

        let second = registry.sweep_expired();
        assert!(second.removed.is_empty());
        assert!(second.errors.is_empty());
    }

    #[test]
    fn test_registry_reloads_from_backend() {
        let root = tempfile::tempdir().unwrap();
        {
            let registry = make_registry(root.path());
            registry.put(make_record("alice", "a1", 3600)).unwrap();
        }

        // A fresh process sees the durable state.
        let reloaded = make_registry(root.path());
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.get("alice", "a1").is_some());
    }

    #[test]
    fn test_remove_returns_record_once() {
        let root = tempfile::tempdir().unwrap();
        let registry = make_registry(root.path());
        registry.put(make_record("alice", "a1", 3600)).unwrap();

        assert!(registry.remove("alice", "a1").unwrap().is_some());
        assert!(registry.remove("alice", "a1").unwrap().is_none());
        assert!(registry.get("alice", "a1").is_none());
    }

    #[test]
    fn test_concurrent_put_and_sweep() {
        use std::sync::Arc as StdArc;
        use std::thread;

        let root = tempfile::tempdir().unwrap();
        let registry = StdArc::new(make_registry(root.path()));

        let writer = {
            let registry = StdArc::clone(&registry);
            thread::spawn(move || {
                for i in 0..50 {
                    registry
                        .put(make_record("writer", &format!("r{}", i), 3600))
                        .unwrap();
                }
            })
        };
        let sweeper = {
            let registry = StdArc::clone(&registry);
            thread::spawn(move || {
                for _ in 0..10 {
                    registry.sweep_expired();
                }
            })
        };

        writer.join().unwrap();
        sweeper.join().unwrap();

        // Nothing written was expired, so nothing may have been swept.
        assert_eq!(registry.list_owner("writer").len(), 50);
    }
}
