//! Durable metadata backend.
//!
//! The registry persists records through this trait; the production remote
//! key-value store is a collaborator specified only by the interface. The
//! shipped implementation keeps one JSON file per record under
//! `<root>/<owner_id>/<artifact_id>.json`, written atomically.

use std::fs;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use apkforge_protocol::ArtifactRecord;

/// Errors from backend operations.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("record serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable key-value collaborator with per-owner sub-collections.
pub trait MetadataBackend: Send + Sync {
    /// Write a record at (owner, artifact id), replacing any previous one.
    fn put(&self, record: &ArtifactRecord) -> Result<(), BackendError>;

    /// Point read.
    fn get(&self, owner_id: &str, artifact_id: &str)
        -> Result<Option<ArtifactRecord>, BackendError>;

    /// All records under one owner.
    fn list_owner(&self, owner_id: &str) -> Result<Vec<ArtifactRecord>, BackendError>;

    /// All owners with at least one record.
    fn owners(&self) -> Result<Vec<String>, BackendError>;

    /// Point delete. Deleting a missing record is a no-op.
    fn delete(&self, owner_id: &str, artifact_id: &str) -> Result<(), BackendError>;
}

/// File-per-record backend.
pub struct JsonFileBackend {
    root: PathBuf,
}

impl JsonFileBackend {
    /// Open (and create if needed) a backend rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn owner_dir(&self, owner_id: &str) -> PathBuf {
        self.root.join(owner_id)
    }

    fn record_path(&self, owner_id: &str, artifact_id: &str) -> PathBuf {
        self.owner_dir(owner_id).join(format!("{}.json", artifact_id))
    }
}

impl MetadataBackend for JsonFileBackend {
    fn put(&self, record: &ArtifactRecord) -> Result<(), BackendError> {
        let dir = self.owner_dir(&record.owner_id);
        fs::create_dir_all(&dir)?;

        let json = serde_json::to_string_pretty(record)?;
        let final_path = self.record_path(&record.owner_id, &record.artifact_id);
        let temp_path = dir.join(format!(".{}.tmp", record.artifact_id));

        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, &final_path)?;

        Ok(())
    }

    fn get(
        &self,
        owner_id: &str,
        artifact_id: &str,
    ) -> Result<Option<ArtifactRecord>, BackendError> {
        let path = self.record_path(owner_id, artifact_id);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BackendError::Io(e)),
        };
        Ok(Some(serde_json::from_str(&json)?))
    }

    fn list_owner(&self, owner_id: &str) -> Result<Vec<ArtifactRecord>, BackendError> {
        let dir = self.owner_dir(owner_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BackendError::Io(e)),
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let is_record = path.extension().map(|e| e == "json").unwrap_or(false)
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_record {
                continue;
            }

            match fs::read_to_string(&path).map_err(BackendError::Io).and_then(|json| {
                serde_json::from_str::<ArtifactRecord>(&json).map_err(BackendError::Json)
            }) {
                Ok(record) => records.push(record),
                Err(e) => {
                    // A corrupt record must not take listing down with it.
                    eprintln!(
                        "[registry] skipping unreadable record {}: {}",
                        path.display(),
                        e
                    );
                }
            }
        }

        Ok(records)
    }

    fn owners(&self) -> Result<Vec<String>, BackendError> {
        let mut owners = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.path().is_dir() {
                owners.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(owners)
    }

    fn delete(&self, owner_id: &str, artifact_id: &str) -> Result<(), BackendError> {
        let path = self.record_path(owner_id, artifact_id);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(BackendError::Io(e)),
        }

        // Drop the owner directory once empty; fails silently when it isn't.
        let _ = fs::remove_dir(self.owner_dir(owner_id));

        Ok(())
    }
}
