//! Remote object-storage mirror.
//!
//! The mirror is the opportunistic second tier of the artifact store: an
//! upload that succeeds turns the record's download reference into a remote
//! URL; an upload that fails is logged and the lane serves the local copy.
//! Mirror unavailability must never fail a job.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use thiserror::Error;

/// Errors from mirror operations.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("mirror disabled")]
    Disabled,

    #[error("mirror unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A blob the mirror accepted.
#[derive(Debug, Clone)]
pub struct MirrorObject {
    /// Mirror-side identifier, kept for later deletion.
    pub object_id: String,
    /// Publicly resolvable download reference.
    pub url: String,
}

/// Remote object-storage collaborator.
///
/// Implementations must be safe to call from concurrent jobs.
pub trait ObjectMirror: Send + Sync {
    /// Upload the file at `path` under `name`.
    fn upload(&self, name: &str, path: &Path) -> Result<MirrorObject, MirrorError>;

    /// Delete a previously uploaded object. Missing objects are not errors.
    fn delete(&self, object_id: &str) -> Result<(), MirrorError>;

    /// Short description for logs and the doctor report.
    fn describe(&self) -> &str;
}

impl<M: ObjectMirror + ?Sized> ObjectMirror for std::sync::Arc<M> {
    fn upload(&self, name: &str, path: &Path) -> Result<MirrorObject, MirrorError> {
        (**self).upload(name, path)
    }

    fn delete(&self, object_id: &str) -> Result<(), MirrorError> {
        (**self).delete(object_id)
    }

    fn describe(&self) -> &str {
        (**self).describe()
    }
}

/// Mirror that is configured off. Every upload degrades to local serving.
#[derive(Debug, Default)]
pub struct NullMirror;

impl ObjectMirror for NullMirror {
    fn upload(&self, _name: &str, _path: &Path) -> Result<MirrorObject, MirrorError> {
        Err(MirrorError::Disabled)
    }

    fn delete(&self, _object_id: &str) -> Result<(), MirrorError> {
        Ok(())
    }

    fn describe(&self) -> &str {
        "disabled"
    }
}

/// In-process mirror holding uploaded bytes in memory.
///
/// Used for local development and tests; failure injection covers the
/// degraded-remote scenarios.
#[derive(Debug)]
pub struct MemoryMirror {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_uploads: AtomicBool,
    base_url: String,
}

impl MemoryMirror {
    /// Create an empty mirror serving URLs under `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            fail_uploads: AtomicBool::new(false),
            base_url: base_url.into(),
        }
    }

    /// Force every subsequent upload to fail.
    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> usize {
        self.objects.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// True when an object with `object_id` is held.
    pub fn contains(&self, object_id: &str) -> bool {
        self.objects
            .lock()
            .map(|m| m.contains_key(object_id))
            .unwrap_or(false)
    }
}

impl Default for MemoryMirror {
    fn default() -> Self {
        Self::new("memory://mirror")
    }
}

impl ObjectMirror for MemoryMirror {
    fn upload(&self, name: &str, path: &Path) -> Result<MirrorObject, MirrorError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(MirrorError::Unavailable("injected upload failure".to_string()));
        }

        let bytes = std::fs::read(path)?;
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(name.to_string(), bytes);
        }

        Ok(MirrorObject {
            object_id: name.to_string(),
            url: format!("{}/{}", self.base_url, name),
        })
    }

    fn delete(&self, object_id: &str) -> Result<(), MirrorError> {
        if let Ok(mut objects) = self.objects.lock() {
            objects.remove(object_id);
        }
        Ok(())
    }

    fn describe(&self) -> &str {
        "in-memory"
    }
}
