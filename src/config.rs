//! Lane configuration.
//!
//! Loaded from a TOML file with per-section defaults. All durations are
//! plain integers in the file (seconds or milliseconds, as named) and are
//! bounds-checked by `validate` before the lane starts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Filesystem locations used by the lane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// The source APK every job starts from.
    #[serde(default = "PathsConfig::default_source_apk")]
    pub source_apk: PathBuf,

    /// Durable local tier for signed artifacts.
    #[serde(default = "PathsConfig::default_store_dir")]
    pub store_dir: PathBuf,

    /// Root for persisted artifact records.
    #[serde(default = "PathsConfig::default_registry_dir")]
    pub registry_dir: PathBuf,

    /// Root under which per-job workspaces are created.
    #[serde(default = "PathsConfig::default_workspace_root")]
    pub workspace_root: PathBuf,
}

impl PathsConfig {
    fn default_source_apk() -> PathBuf {
        PathBuf::from("uploads/release.apk")
    }

    fn default_store_dir() -> PathBuf {
        PathBuf::from("user_apks")
    }

    fn default_registry_dir() -> PathBuf {
        PathBuf::from("registry")
    }

    fn default_workspace_root() -> PathBuf {
        std::env::temp_dir().join("apkforge")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source_apk: Self::default_source_apk(),
            store_dir: Self::default_store_dir(),
            registry_dir: Self::default_registry_dir(),
            workspace_root: Self::default_workspace_root(),
        }
    }
}

/// External tool locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Java launcher used for both jars.
    #[serde(default = "ToolsConfig::default_java_bin")]
    pub java_bin: String,

    /// apktool jar (unpack and repack).
    #[serde(default = "ToolsConfig::default_apktool_jar")]
    pub apktool_jar: PathBuf,

    /// uber-apk-signer jar.
    #[serde(default = "ToolsConfig::default_signer_jar")]
    pub signer_jar: PathBuf,
}

impl ToolsConfig {
    fn default_java_bin() -> String {
        "java".to_string()
    }

    fn default_apktool_jar() -> PathBuf {
        PathBuf::from("tools/apktool.jar")
    }

    fn default_signer_jar() -> PathBuf {
        PathBuf::from("tools/uber-apk-signer.jar")
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            java_bin: Self::default_java_bin(),
            apktool_jar: Self::default_apktool_jar(),
            signer_jar: Self::default_signer_jar(),
        }
    }
}

/// Stage and retention limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum wall-clock time per tool invocation (default: 300 = 5 min).
    #[serde(default = "LimitsConfig::default_stage_timeout_seconds")]
    pub stage_timeout_seconds: u64,

    /// Cap on a tool's combined stdout+stderr (default: 10 MiB).
    #[serde(default = "LimitsConfig::default_max_output_bytes")]
    pub max_output_bytes: u64,

    /// Artifact time-to-live (default: 3600 = 1 hour).
    #[serde(default = "LimitsConfig::default_ttl_seconds")]
    pub ttl_seconds: u64,

    /// Interval between expiry sweeps (default: 600 = 10 min).
    #[serde(default = "LimitsConfig::default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

impl LimitsConfig {
    fn default_stage_timeout_seconds() -> u64 {
        300
    }

    fn default_max_output_bytes() -> u64 {
        10 * 1024 * 1024
    }

    fn default_ttl_seconds() -> u64 {
        3600
    }

    fn default_sweep_interval_seconds() -> u64 {
        600
    }

    /// Stage timeout as a `Duration`.
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_seconds)
    }

    /// Artifact TTL as a `chrono::Duration`.
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_seconds as i64)
    }

    /// Sweep interval as a `Duration`.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            stage_timeout_seconds: Self::default_stage_timeout_seconds(),
            max_output_bytes: Self::default_max_output_bytes(),
            ttl_seconds: Self::default_ttl_seconds(),
            sweep_interval_seconds: Self::default_sweep_interval_seconds(),
        }
    }
}

/// Workspace cleanup scheduling.
///
/// The success path waits longer before the first removal attempt because a
/// just-exited signer may still hold file handles; the failure path has no
/// subprocess left writing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Delay before removing the workspace of a READY job (default: 2000).
    #[serde(default = "CleanupConfig::default_success_delay_ms")]
    pub success_delay_ms: u64,

    /// Delay before removing the workspace of a FAILED job (default: 1000).
    #[serde(default = "CleanupConfig::default_failure_delay_ms")]
    pub failure_delay_ms: u64,

    /// Delay before the single retry after a failed removal (default: 5000).
    #[serde(default = "CleanupConfig::default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl CleanupConfig {
    fn default_success_delay_ms() -> u64 {
        2000
    }

    fn default_failure_delay_ms() -> u64 {
        1000
    }

    fn default_retry_delay_ms() -> u64 {
        5000
    }

    /// Success-path delay as a `Duration`.
    pub fn success_delay(&self) -> Duration {
        Duration::from_millis(self.success_delay_ms)
    }

    /// Failure-path delay as a `Duration`.
    pub fn failure_delay(&self) -> Duration {
        Duration::from_millis(self.failure_delay_ms)
    }

    /// Retry delay as a `Duration`.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            success_delay_ms: Self::default_success_delay_ms(),
            failure_delay_ms: Self::default_failure_delay_ms(),
            retry_delay_ms: Self::default_retry_delay_ms(),
        }
    }
}

/// Full lane configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForgeConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub cleanup: CleanupConfig,
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("stage_timeout_seconds must be in (0, 3600], got {value}")]
    StageTimeoutOutOfBounds { value: u64 },

    #[error("max_output_bytes must be in (0, {max}], got {value}")]
    OutputCapOutOfBounds { value: u64, max: u64 },

    #[error("ttl_seconds must be in (0, 604800], got {value}")]
    TtlOutOfBounds { value: u64 },

    #[error("sweep_interval_seconds must be in (0, {max}], got {value}")]
    SweepIntervalOutOfBounds { value: u64, max: u64 },
}

/// Upper bound on the output cap (256 MiB).
const MAX_OUTPUT_CAP: u64 = 256 * 1024 * 1024;

impl ForgeConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ForgeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate limit bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.limits;

        // stage timeout must be in (0, 3600]
        if limits.stage_timeout_seconds == 0 || limits.stage_timeout_seconds > 3600 {
            return Err(ConfigError::StageTimeoutOutOfBounds {
                value: limits.stage_timeout_seconds,
            });
        }

        // output cap must be in (0, 256 MiB]
        if limits.max_output_bytes == 0 || limits.max_output_bytes > MAX_OUTPUT_CAP {
            return Err(ConfigError::OutputCapOutOfBounds {
                value: limits.max_output_bytes,
                max: MAX_OUTPUT_CAP,
            });
        }

        // TTL must be in (0, 7 days]
        if limits.ttl_seconds == 0 || limits.ttl_seconds > 604_800 {
            return Err(ConfigError::TtlOutOfBounds {
                value: limits.ttl_seconds,
            });
        }

        // sweep interval must be in (0, ttl]
        if limits.sweep_interval_seconds == 0
            || limits.sweep_interval_seconds > limits.ttl_seconds
        {
            return Err(ConfigError::SweepIntervalOutOfBounds {
                value: limits.sweep_interval_seconds,
                max: limits.ttl_seconds,
            });
        }

        Ok(())
    }
}
