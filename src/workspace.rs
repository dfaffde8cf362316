//! Per-job workspace lifecycle.
//!
//! Each job gets an exclusively owned directory tree under the configured
//! root, created before any tool runs and removed (via the cleanup queue)
//! after the job reaches a terminal state. Names embed a ULID (a monotonic
//! timestamp plus random suffix), so concurrent jobs can never collide and
//! no locking is needed on the filesystem.
//!
//! Layout per job:
//!   `<root>/job-<ulid>/unpacked/`   apktool output tree
//!   `<root>/job-<ulid>/repacked.apk`
//!   `<root>/job-<ulid>/signed.apk`

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use ulid::Ulid;

/// Errors from workspace creation.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("failed to create workspace at {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Creates uniquely named workspaces under a fixed root.
#[derive(Debug, Clone)]
pub struct WorkspaceFactory {
    root: PathBuf,
}

impl WorkspaceFactory {
    /// Create a factory rooted at `root`. The root itself is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root all workspaces live under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate a fresh workspace: a collision-free directory with its
    /// unpack subtree already present. Fails fast if the filesystem refuses.
    pub fn create(&self) -> Result<Workspace, WorkspaceError> {
        let name = format!("job-{}", Ulid::new().to_string().to_lowercase());
        let path = self.root.join(name);
        let workspace = Workspace { path };

        fs::create_dir_all(workspace.unpack_dir()).map_err(|source| WorkspaceError::Create {
            path: workspace.path().to_path_buf(),
            source,
        })?;

        Ok(workspace)
    }
}

/// One job's ephemeral directory tree.
#[derive(Debug, Clone)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    /// The workspace directory itself.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Destination for the unpack tool.
    pub fn unpack_dir(&self) -> PathBuf {
        self.path.join("unpacked")
    }

    /// Canonical output path for the repack tool.
    pub fn repacked_apk(&self) -> PathBuf {
        self.path.join("repacked.apk")
    }

    /// Canonical path the signed artifact is relocated to.
    pub fn signed_apk(&self) -> PathBuf {
        self.path.join("signed.apk")
    }

    /// Directory the signer writes its derived-name output into.
    pub fn sign_output_dir(&self) -> &Path {
        &self.path
    }
}

/// Remove a workspace directory. Idempotent: a missing path is a no-op.
pub fn destroy(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_create_makes_unpack_subtree() {
        let root = tempfile::tempdir().unwrap();
        let factory = WorkspaceFactory::new(root.path());

        let workspace = factory.create().unwrap();
        assert!(workspace.path().is_dir());
        assert!(workspace.unpack_dir().is_dir());
        assert!(workspace.path().starts_with(root.path()));
    }

    #[test]
    fn test_names_are_unique_across_rapid_creation() {
        let root = tempfile::tempdir().unwrap();
        let factory = WorkspaceFactory::new(root.path());

        let mut seen = HashSet::new();
        for _ in 0..64 {
            let workspace = factory.create().unwrap();
            assert!(
                seen.insert(workspace.path().to_path_buf()),
                "duplicate workspace path"
            );
        }
    }

    #[test]
    fn test_derived_paths_live_inside_workspace() {
        let root = tempfile::tempdir().unwrap();
        let workspace = WorkspaceFactory::new(root.path()).create().unwrap();

        assert!(workspace.repacked_apk().starts_with(workspace.path()));
        assert!(workspace.signed_apk().starts_with(workspace.path()));
        assert_eq!(workspace.sign_output_dir(), workspace.path());
    }

    #[test]
    fn test_destroy_removes_tree() {
        let root = tempfile::tempdir().unwrap();
        let workspace = WorkspaceFactory::new(root.path()).create().unwrap();
        fs::write(workspace.unpack_dir().join("file.txt"), "x").unwrap();

        destroy(workspace.path()).unwrap();
        assert!(!workspace.path().exists());
    }

    #[test]
    fn test_destroy_missing_path_is_noop() {
        let root = tempfile::tempdir().unwrap();
        let ghost = root.path().join("never-created");

        assert!(destroy(&ghost).is_ok());
        assert!(destroy(&ghost).is_ok());
    }

    #[test]
    fn test_create_fails_fast_on_unwritable_root() {
        // A file where the root should be makes creation impossible.
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("occupied");
        fs::write(&blocked, "not a directory").unwrap();

        let factory = WorkspaceFactory::new(&blocked);
        assert!(matches!(
            factory.create(),
            Err(WorkspaceError::Create { .. })
        ));
    }
}
