//! Lane service.
//!
//! Composes the pipeline, store, registry, and cleanup queue behind the
//! caller-facing surface: submit, list, retrieve, delete, sweep. One
//! `ForgeService` serves many concurrent callers; each submit runs on the
//! caller's thread and shares nothing with other jobs except the store and
//! registry.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use regex_lite::Regex;
use serde::Serialize;
use serde_json::Value;

use apkforge_protocol::{ApiError, ArtifactRecord, DownloadRef, ErrorKind};

use crate::cleaner::CleanupQueue;
use crate::config::ForgeConfig;
use crate::invoker::ToolInvoker;
use crate::pipeline::{JobRequest, Pipeline};
use crate::registry::backend::JsonFileBackend;
use crate::registry::MetadataRegistry;
use crate::store::mirror::{NullMirror, ObjectMirror};
use crate::store::ArtifactStore;
use crate::tools::Toolchain;
use crate::workspace::WorkspaceFactory;

/// Owner id assigned when the caller supplies none.
pub const DEFAULT_OWNER: &str = "guest";

/// Errors from service construction.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("artifact store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("metadata registry error: {0}")]
    Registry(#[from] crate::registry::RegistryError),

    #[error("metadata backend error: {0}")]
    Backend(#[from] crate::registry::backend::BackendError),
}

/// Where a retrieved artifact's bytes are.
#[derive(Debug)]
pub enum Retrieval {
    /// Mirrored remotely; the caller should follow the URL.
    Redirect { url: String, record: ArtifactRecord },
    /// Served from the local tier.
    LocalFile { path: PathBuf, record: ArtifactRecord },
}

/// Result of one sweep pass.
#[derive(Debug, Default, Serialize)]
pub struct SweepReport {
    /// Records scanned.
    pub scanned: usize,
    /// Records removed.
    pub removed: usize,
    /// Bytes reclaimed from the local tier.
    pub bytes_reclaimed: u64,
    /// Non-fatal errors; affected records are retried next sweep.
    pub errors: Vec<String>,
}

/// Environment checks behind the `doctor` subcommand.
#[derive(Debug, Serialize)]
pub struct DoctorReport {
    pub java_ok: bool,
    pub java_version: Option<String>,
    pub apktool_present: bool,
    pub signer_present: bool,
    pub source_apk_present: bool,
    pub store_artifacts: usize,
    pub store_bytes: u64,
    pub registered_records: usize,
    pub mirror: String,
}

impl DoctorReport {
    /// True when every check needed to serve a submit passed.
    pub fn healthy(&self) -> bool {
        self.java_ok && self.apktool_present && self.signer_present && self.source_apk_present
    }
}

/// The lane service.
pub struct ForgeService {
    config: ForgeConfig,
    toolchain: Toolchain,
    pipeline: Pipeline,
    store: Arc<ArtifactStore>,
    registry: Arc<MetadataRegistry>,
}

impl ForgeService {
    /// Build a service with the mirror disabled.
    pub fn new(config: ForgeConfig) -> Result<Self, ServiceError> {
        Self::with_mirror(config, Box::new(NullMirror))
    }

    /// Build a service uploading to the given mirror.
    pub fn with_mirror(
        config: ForgeConfig,
        mirror: Box<dyn ObjectMirror>,
    ) -> Result<Self, ServiceError> {
        config.validate()?;

        let store = Arc::new(ArtifactStore::new(&config.paths.store_dir, mirror)?);
        let backend = JsonFileBackend::new(&config.paths.registry_dir)?;
        let registry = Arc::new(MetadataRegistry::new(Box::new(backend))?);
        let cleaner = Arc::new(CleanupQueue::new());

        let toolchain = Toolchain::new(
            config.tools.java_bin.clone(),
            config.tools.apktool_jar.clone(),
            config.tools.signer_jar.clone(),
        );
        let invoker = ToolInvoker::new(
            config.limits.stage_timeout(),
            config.limits.max_output_bytes,
        );
        let pipeline = Pipeline::new(
            toolchain.clone(),
            invoker,
            WorkspaceFactory::new(&config.paths.workspace_root),
            Arc::clone(&store),
            Arc::clone(&registry),
            cleaner,
            config.cleanup,
            config.limits.ttl(),
        );

        Ok(Self {
            config,
            toolchain,
            pipeline,
            store,
            registry,
        })
    }

    /// The active configuration.
    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    /// Build a customized, re-signed artifact and register it.
    pub fn submit(
        &self,
        owner_id: Option<&str>,
        payload: Value,
        source: Option<PathBuf>,
    ) -> Result<ArtifactRecord, ApiError> {
        let owner = resolve_owner(owner_id)?;

        let is_nonempty_object = payload.as_object().map(|o| !o.is_empty()).unwrap_or(false);
        if !is_nonempty_object {
            return Err(ApiError::invalid_request(
                "no configuration data provided in request payload",
            ));
        }

        let job = JobRequest {
            owner_id: owner,
            payload,
            source_apk: source.unwrap_or_else(|| self.config.paths.source_apk.clone()),
        };

        self.pipeline.execute(&job).map_err(|e| e.api_error())
    }

    /// The owner's unexpired artifacts, newest first.
    pub fn list(&self, owner_id: Option<&str>) -> Result<Vec<ArtifactRecord>, ApiError> {
        let owner = resolve_owner(owner_id)?;
        Ok(self.registry.list_owner(&owner))
    }

    /// Resolve an artifact id to a download location.
    ///
    /// Expiry is enforced here, independent of the sweeper: an expired
    /// record is indistinguishable from a missing one to the caller apart
    /// from the kind string.
    pub fn retrieve(&self, artifact_id: &str) -> Result<Retrieval, ApiError> {
        let record = self
            .registry
            .find_by_artifact(artifact_id)
            .ok_or_else(|| ApiError::record_not_found(artifact_id))?;

        if record.is_expired() {
            return Err(ApiError::record_expired(artifact_id));
        }

        match &record.download {
            DownloadRef::Remote { url, .. } => Ok(Retrieval::Redirect {
                url: url.clone(),
                record,
            }),
            DownloadRef::Local => {
                // The store re-checks expiry and confirms the bytes exist.
                self.store.open(&record).map_err(|e| match e {
                    crate::store::StoreError::Expired(_) => ApiError::record_expired(artifact_id),
                    _ => ApiError::record_not_found(artifact_id),
                })?;
                let path = self.store.local_path(&record);
                Ok(Retrieval::LocalFile { path, record })
            }
        }
    }

    /// Delete an artifact: record first, bytes best-effort.
    pub fn delete(&self, artifact_id: &str) -> Result<(), ApiError> {
        let record = self
            .registry
            .find_by_artifact(artifact_id)
            .ok_or_else(|| ApiError::record_not_found(artifact_id))?;

        self.registry
            .remove(&record.owner_id, &record.artifact_id)
            .map_err(|e| ApiError::new(ErrorKind::StorageFailure, e.to_string()))?;

        if let Err(e) = self.store.remove(&record) {
            eprintln!(
                "[store] byte cleanup for {} failed: {}",
                record.artifact_id, e
            );
        }

        Ok(())
    }

    /// Run one expiry sweep: drop expired records, reclaim their bytes.
    pub fn sweep(&self) -> SweepReport {
        let outcome = self.registry.sweep_expired();
        let mut report = SweepReport {
            scanned: outcome.scanned,
            removed: outcome.removed.len(),
            bytes_reclaimed: 0,
            errors: outcome.errors,
        };

        for record in &outcome.removed {
            match self.store.remove(record) {
                Ok(()) => report.bytes_reclaimed += record.size_bytes,
                Err(e) => report
                    .errors
                    .push(format!("bytes for {}: {}", record.artifact_id, e)),
            }
        }

        if report.removed > 0 || !report.errors.is_empty() {
            eprintln!(
                "[sweeper] removed {} of {} records, reclaimed {} bytes, {} errors",
                report.removed,
                report.scanned,
                report.bytes_reclaimed,
                report.errors.len()
            );
        }

        report
    }

    /// Check the environment the lane depends on.
    pub fn doctor(&self) -> DoctorReport {
        let java = self.toolchain.probe_java(self.store.dir());
        let stats = self.store.stats();

        DoctorReport {
            java_ok: java.is_ok(),
            java_version: java.ok(),
            apktool_present: self.toolchain.require_apktool().is_ok(),
            signer_present: self.toolchain.require_signer().is_ok(),
            source_apk_present: self.config.paths.source_apk.is_file(),
            store_artifacts: stats.artifact_count,
            store_bytes: stats.total_size_bytes,
            registered_records: self.registry.len(),
            mirror: self.store.mirror_name().to_string(),
        }
    }
}

/// Spawn the periodic sweeper. It wakes in short ticks so the shutdown flag
/// is honored promptly, and sweeps every configured interval.
pub fn spawn_sweeper(
    service: Arc<ForgeService>,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    let interval = service.config.limits.sweep_interval();

    thread::Builder::new()
        .name("apkforge-sweeper".to_string())
        .spawn(move || {
            let tick = Duration::from_millis(250);
            let mut next_sweep = Instant::now() + interval;

            while !shutdown.load(Ordering::SeqCst) {
                if Instant::now() >= next_sweep {
                    service.sweep();
                    next_sweep = Instant::now() + interval;
                }
                thread::sleep(tick);
            }
        })
}

/// Validate or default the caller-supplied owner id.
///
/// The owner id lands in stored file names and backend paths, so anything
/// outside `[A-Za-z0-9_-]{1,64}` is refused rather than sanitized.
fn resolve_owner(owner_id: Option<&str>) -> Result<String, ApiError> {
    static OWNER_RE: OnceLock<Regex> = OnceLock::new();

    match owner_id {
        None => Ok(DEFAULT_OWNER.to_string()),
        Some(raw) => {
            let re = OWNER_RE
                .get_or_init(|| Regex::new("^[A-Za-z0-9_-]{1,64}$").expect("owner id regex"));
            if re.is_match(raw) {
                Ok(raw.to_string())
            } else {
                Err(ApiError::invalid_request(format!(
                    "owner id '{}' is not allowed (use [A-Za-z0-9_-], max 64 chars)",
                    raw
                )))
            }
        }
    }
}
