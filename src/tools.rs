//! External toolchain definitions.
//!
//! The lane does not unpack, repack, or sign anything itself; those are
//! opaque jar tools driven through the invoker. This module owns the three
//! argument vectors, the signer's derived-output-name contract, and the
//! pre-flight checks behind the `doctor` command.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::invoker::{InvokerError, ToolInvoker};

/// Suffix the signer appends to its input's stem.
const SIGNED_SUFFIX: &str = "-aligned-debugSigned";

/// Timeout for the `java -version` probe.
const JAVA_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// A required tool is missing from the host.
#[derive(Debug, Error)]
#[error("required tool missing: {0}")]
pub struct ToolUnavailable(pub String);

/// The external tools one lane instance drives.
#[derive(Debug, Clone)]
pub struct Toolchain {
    java_bin: String,
    apktool_jar: PathBuf,
    signer_jar: PathBuf,
}

impl Toolchain {
    /// Build a toolchain from configured locations.
    pub fn new(java_bin: String, apktool_jar: PathBuf, signer_jar: PathBuf) -> Self {
        Self {
            java_bin,
            apktool_jar,
            signer_jar,
        }
    }

    /// The java launcher used for every invocation.
    pub fn java_bin(&self) -> &str {
        &self.java_bin
    }

    /// Argv for unpacking `source` into `dest`.
    pub fn unpack_args(&self, source: &Path, dest: &Path) -> Vec<String> {
        vec![
            "-jar".to_string(),
            self.apktool_jar.to_string_lossy().into_owned(),
            "d".to_string(),
            source.to_string_lossy().into_owned(),
            "-o".to_string(),
            dest.to_string_lossy().into_owned(),
            "--force-all".to_string(),
        ]
    }

    /// Argv for repacking `tree` into `out`.
    pub fn repack_args(&self, tree: &Path, out: &Path) -> Vec<String> {
        vec![
            "-jar".to_string(),
            self.apktool_jar.to_string_lossy().into_owned(),
            "b".to_string(),
            tree.to_string_lossy().into_owned(),
            "-o".to_string(),
            out.to_string_lossy().into_owned(),
            "--force-all".to_string(),
        ]
    }

    /// Argv for signing `apk`, writing into `out_dir`.
    pub fn sign_args(&self, apk: &Path, out_dir: &Path) -> Vec<String> {
        vec![
            "-jar".to_string(),
            self.signer_jar.to_string_lossy().into_owned(),
            "--apks".to_string(),
            apk.to_string_lossy().into_owned(),
            "--out".to_string(),
            out_dir.to_string_lossy().into_owned(),
            "--allowResign".to_string(),
            "--verbose".to_string(),
        ]
    }

    /// Where the signer is expected to leave its output for `apk`, given
    /// the `--out` directory. The name is derived from the input stem.
    pub fn signed_output_for(&self, apk: &Path, out_dir: &Path) -> PathBuf {
        let stem = apk
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        out_dir.join(format!("{}{}.apk", stem, SIGNED_SUFFIX))
    }

    /// Fail unless the apktool jar is present.
    pub fn require_apktool(&self) -> Result<(), ToolUnavailable> {
        if !self.apktool_jar.is_file() {
            return Err(ToolUnavailable(format!(
                "apktool jar at {}",
                self.apktool_jar.display()
            )));
        }
        Ok(())
    }

    /// Fail unless the signer jar is present.
    pub fn require_signer(&self) -> Result<(), ToolUnavailable> {
        if !self.signer_jar.is_file() {
            return Err(ToolUnavailable(format!(
                "signer jar at {}",
                self.signer_jar.display()
            )));
        }
        Ok(())
    }

    /// Probe the java launcher; returns the version banner line.
    pub fn probe_java(&self, working_dir: &Path) -> Result<String, InvokerError> {
        let invoker = ToolInvoker::new(JAVA_PROBE_TIMEOUT, 64 * 1024);
        let output = invoker.run(&self.java_bin, &["-version".to_string()], working_dir)?;

        // `java -version` historically writes the banner to stderr.
        let banner = if output.stderr.trim().is_empty() {
            output.stdout
        } else {
            output.stderr
        };
        Ok(banner.lines().next().unwrap_or_default().to_string())
    }
}
