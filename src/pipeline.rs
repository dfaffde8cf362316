//! Pipeline orchestration.
//!
//! Drives one job through unpack → patch → repack → sign → store → register,
//! strictly in order, with no automatic retries: any stage failure is
//! terminal for the job and the caller resubmits if it wants another
//! attempt. The workspace is scheduled for removal on both terminal paths
//! without ever being awaited by the response, and no partial artifact is
//! ever registered.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use thiserror::Error;

use apkforge_protocol::{ApiError, ArtifactRecord, ErrorKind};

use crate::cleaner::CleanupQueue;
use crate::config::CleanupConfig;
use crate::invoker::{InvokerError, ToolInvoker};
use crate::patcher::{patch_config, PatchError};
use crate::registry::{MetadataRegistry, RegistryError};
use crate::stage::{JobProgress, JobStage, StageError};
use crate::store::{ArtifactStore, StoreError};
use crate::tools::{ToolUnavailable, Toolchain};
use crate::workspace::{Workspace, WorkspaceError, WorkspaceFactory};

/// One job: everything the pipeline needs to produce a customized artifact.
#[derive(Debug, Clone)]
pub struct JobRequest {
    /// Owner the artifact is built for.
    pub owner_id: String,
    /// Replacement configuration document.
    pub payload: Value,
    /// The source APK to customize.
    pub source_apk: PathBuf,
}

/// Pipeline errors, classified per stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source APK not found: {0}")]
    SourceMissing(String),

    #[error("workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("unpack failed: {0}")]
    Unpack(#[source] InvokerError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error("repack failed: {0}")]
    Repack(#[source] InvokerError),

    #[error("signing failed: {0}")]
    Sign(#[source] InvokerError),

    #[error("{0}")]
    MissingTool(#[from] ToolUnavailable),

    #[error("signer reported success but {expected} is absent")]
    SignedOutputMissing { expected: PathBuf },

    #[error("artifact store error: {0}")]
    Store(#[from] StoreError),

    #[error("metadata registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Stage(#[from] StageError),
}

impl PipelineError {
    /// Classify into the caller-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::SourceMissing(_) => ErrorKind::SourceArtifactMissing,
            PipelineError::MissingTool(_) => ErrorKind::ToolUnavailable,
            PipelineError::Unpack(e) | PipelineError::Repack(e) | PipelineError::Sign(e) => {
                match e {
                    InvokerError::NotFound(_) | InvokerError::Spawn { .. } => {
                        ErrorKind::ToolUnavailable
                    }
                    InvokerError::Timeout { .. } => ErrorKind::ToolTimeout,
                    _ => ErrorKind::ToolExecutionFailure,
                }
            }
            PipelineError::Patch(PatchError::NotFound(_)) => ErrorKind::ConfigNotFound,
            PipelineError::Patch(PatchError::Parse { .. }) => ErrorKind::ConfigParseFailure,
            PipelineError::Patch(PatchError::Io(_)) => ErrorKind::StorageFailure,
            PipelineError::SignedOutputMissing { .. } => ErrorKind::SigningArtifactMissing,
            PipelineError::Workspace(_)
            | PipelineError::Store(_)
            | PipelineError::Registry(_)
            | PipelineError::Io(_)
            | PipelineError::Stage(_) => ErrorKind::StorageFailure,
        }
    }

    /// Stable exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }

    /// Convert to the caller-facing error payload.
    pub fn api_error(&self) -> ApiError {
        ApiError::new(self.kind(), self.to_string())
    }
}

/// Orchestrates jobs over shared store/registry/cleanup resources.
pub struct Pipeline {
    toolchain: Toolchain,
    invoker: ToolInvoker,
    workspaces: WorkspaceFactory,
    store: Arc<ArtifactStore>,
    registry: Arc<MetadataRegistry>,
    cleaner: Arc<CleanupQueue>,
    cleanup: CleanupConfig,
    ttl: chrono::Duration,
}

impl Pipeline {
    /// Wire up a pipeline.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        toolchain: Toolchain,
        invoker: ToolInvoker,
        workspaces: WorkspaceFactory,
        store: Arc<ArtifactStore>,
        registry: Arc<MetadataRegistry>,
        cleaner: Arc<CleanupQueue>,
        cleanup: CleanupConfig,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            toolchain,
            invoker,
            workspaces,
            store,
            registry,
            cleaner,
            cleanup,
            ttl,
        }
    }

    /// Run one job to a terminal state.
    ///
    /// Blocks the calling thread for the duration of the tool stages (this
    /// is minutes, not milliseconds); concurrent jobs run on their own
    /// threads and share nothing but the store and registry.
    pub fn execute(&self, job: &JobRequest) -> Result<ArtifactRecord, PipelineError> {
        if !job.source_apk.is_file() {
            return Err(PipelineError::SourceMissing(
                job.source_apk.display().to_string(),
            ));
        }

        let workspace = self.workspaces.create()?;
        let start = Instant::now();
        eprintln!(
            "[pipeline] job for '{}' started in {}",
            job.owner_id,
            workspace.path().display()
        );

        let result = self.run_stages(job, &workspace);

        // Cleanup is scheduled on both paths and never awaited. The success
        // path waits longer; a just-exited signer may still hold handles.
        match &result {
            Ok(record) => {
                self.cleaner.schedule(
                    workspace.path().to_path_buf(),
                    self.cleanup.success_delay(),
                    self.cleanup.retry_delay(),
                );
                eprintln!(
                    "[pipeline] job ready: artifact {} for '{}' in {:?}",
                    record.artifact_id,
                    record.owner_id,
                    start.elapsed()
                );
            }
            Err(e) => {
                self.cleaner.schedule(
                    workspace.path().to_path_buf(),
                    self.cleanup.failure_delay(),
                    self.cleanup.retry_delay(),
                );
                eprintln!(
                    "[pipeline] job for '{}' failed after {:?}: {} ({})",
                    job.owner_id,
                    start.elapsed(),
                    e,
                    e.kind()
                );
            }
        }

        result
    }

    fn run_stages(
        &self,
        job: &JobRequest,
        workspace: &Workspace,
    ) -> Result<ArtifactRecord, PipelineError> {
        let mut progress = JobProgress::new();

        // CREATED → UNPACKED
        self.toolchain.require_apktool()?;
        let unpack_dir = workspace.unpack_dir();
        self.invoker
            .run(
                self.toolchain.java_bin(),
                &self.toolchain.unpack_args(&job.source_apk, &unpack_dir),
                workspace.path(),
            )
            .map_err(PipelineError::Unpack)?;
        progress.advance(JobStage::Unpacked)?;

        // UNPACKED → PATCHED
        patch_config(&unpack_dir, &job.payload)?;
        progress.advance(JobStage::Patched)?;

        // PATCHED → REPACKED
        let repacked = workspace.repacked_apk();
        self.invoker
            .run(
                self.toolchain.java_bin(),
                &self.toolchain.repack_args(&unpack_dir, &repacked),
                workspace.path(),
            )
            .map_err(PipelineError::Repack)?;
        progress.advance(JobStage::Repacked)?;

        // REPACKED → SIGNED
        self.toolchain.require_signer()?;
        let sign_out = workspace.sign_output_dir();
        self.invoker
            .run(
                self.toolchain.java_bin(),
                &self.toolchain.sign_args(&repacked, sign_out),
                workspace.path(),
            )
            .map_err(PipelineError::Sign)?;

        // The signer names its output after the input; an absent file after
        // a zero exit is a tool-contract mismatch, not a process failure.
        let expected = self.toolchain.signed_output_for(&repacked, sign_out);
        if !expected.is_file() {
            return Err(PipelineError::SignedOutputMissing { expected });
        }
        let signed = workspace.signed_apk();
        std::fs::rename(&expected, &signed)?;
        progress.advance(JobStage::Signed)?;

        // SIGNED → STORED
        let record = self.store.persist(&signed, &job.owner_id, self.ttl)?;
        progress.advance(JobStage::Stored)?;

        // STORED → READY: registration is the last step, so a failure
        // anywhere earlier leaves nothing behind in the registry.
        self.registry.put(record.clone())?;
        progress.advance(JobStage::Ready)?;

        Ok(record)
    }
}
