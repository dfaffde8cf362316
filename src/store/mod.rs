//! Artifact store.
//!
//! Two-tier persistence for signed artifacts. The local directory is the
//! durable primary: bytes are copied there (digested along the way, written
//! via temp-then-rename) before anything else happens, so retrieval never
//! depends on the remote backend. The mirror upload that follows is
//! best-effort; its failure downgrades the download reference to local and
//! is otherwise invisible to the job.
//!
//! Stored file names follow `{owner_id}_{artifact_id}.apk`, which keeps
//! owners collision-free without any coordination.

pub mod mirror;

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;
use walkdir::WalkDir;

use apkforge_protocol::{ArtifactRecord, DownloadRef};

use self::mirror::ObjectMirror;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("artifact bytes missing for '{0}'")]
    NotFound(String),

    #[error("artifact '{0}' has expired")]
    Expired(String),
}

/// Store statistics for diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreStats {
    /// Number of artifacts in the local tier.
    pub artifact_count: usize,
    /// Total bytes held locally.
    pub total_size_bytes: u64,
}

/// Two-tier artifact store.
pub struct ArtifactStore {
    dir: PathBuf,
    mirror: Box<dyn ObjectMirror>,
}

impl ArtifactStore {
    /// Open (and create if needed) the local tier at `dir`.
    pub fn new(dir: impl Into<PathBuf>, mirror: Box<dyn ObjectMirror>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        // Catch an unwritable tier at startup, not mid-job.
        let probe = dir.join(".store_probe");
        File::create(&probe)?;
        fs::remove_file(&probe)?;

        Ok(Self { dir, mirror })
    }

    /// The local tier directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Short description of the configured mirror.
    pub fn mirror_name(&self) -> &str {
        self.mirror.describe()
    }

    /// Persist the signed artifact at `local` for `owner_id`.
    ///
    /// Copies into the durable local tier first, then attempts the mirror
    /// upload. Returns the full record with a TTL of `ttl` from now.
    pub fn persist(
        &self,
        local: &Path,
        owner_id: &str,
        ttl: chrono::Duration,
    ) -> Result<ArtifactRecord, StoreError> {
        let artifact_id = Uuid::new_v4().to_string();
        let file_name = format!("{}_{}.apk", owner_id, artifact_id);
        let dest = self.dir.join(&file_name);

        let (sha256, size_bytes) = self.copy_and_digest(local, &dest)?;

        let download = match self.mirror.upload(&file_name, &dest) {
            Ok(object) => DownloadRef::Remote {
                url: object.url,
                object_id: object.object_id,
            },
            Err(e) => {
                eprintln!(
                    "[store] mirror upload of {} failed ({}), serving locally",
                    file_name, e
                );
                DownloadRef::Local
            }
        };

        Ok(ArtifactRecord::new(
            artifact_id,
            owner_id.to_string(),
            file_name,
            sha256,
            size_bytes,
            Utc::now(),
            ttl,
            download,
        ))
    }

    /// Path of a record's bytes in the local tier.
    pub fn local_path(&self, record: &ArtifactRecord) -> PathBuf {
        self.dir.join(&record.file_name)
    }

    /// Open a record's bytes for reading.
    ///
    /// Expiry is enforced here, at read time: an expired record behaves as
    /// absent even if the sweeper has not reached it yet.
    pub fn open(&self, record: &ArtifactRecord) -> Result<File, StoreError> {
        if record.is_expired() {
            return Err(StoreError::Expired(record.artifact_id.clone()));
        }

        File::open(self.local_path(record)).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound(record.artifact_id.clone())
            } else {
                StoreError::Io(e)
            }
        })
    }

    /// Remove a record's bytes from both tiers, best-effort.
    ///
    /// Already-reclaimed bytes are a valid end state; only unexpected I/O
    /// failures are returned.
    pub fn remove(&self, record: &ArtifactRecord) -> Result<(), StoreError> {
        if let DownloadRef::Remote { object_id, .. } = &record.download {
            if let Err(e) = self.mirror.delete(object_id) {
                eprintln!(
                    "[store] mirror delete of {} failed: {}",
                    object_id, e
                );
            }
        }

        match fs::remove_file(self.local_path(record)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    /// Current local-tier statistics.
    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats::default();
        for entry in WalkDir::new(&self.dir)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_file() {
                stats.artifact_count += 1;
                stats.total_size_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        stats
    }

    /// Copy `src` to `dest` atomically, digesting the bytes along the way.
    fn copy_and_digest(&self, src: &Path, dest: &Path) -> Result<(String, u64), StoreError> {
        let mut reader = File::open(src)?;

        let temp_name = format!(
            ".{}.tmp",
            dest.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "artifact".to_string())
        );
        let temp_path = self.dir.join(temp_name);

        let mut writer = File::create(&temp_path)?;
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 64 * 1024];
        let mut total = 0u64;

        loop {
            let n = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    let _ = fs::remove_file(&temp_path);
                    return Err(StoreError::Io(e));
                }
            };
            hasher.update(&buffer[..n]);
            if let Err(e) = writer.write_all(&buffer[..n]) {
                let _ = fs::remove_file(&temp_path);
                return Err(StoreError::Io(e));
            }
            total += n as u64;
        }

        if let Err(e) = writer.flush() {
            let _ = fs::remove_file(&temp_path);
            return Err(StoreError::Io(e));
        }

        if let Err(e) = fs::rename(&temp_path, dest) {
            let _ = fs::remove_file(&temp_path);
            return Err(StoreError::Io(e));
        }

        Ok((hex::encode(hasher.finalize()), total))
    }
}
