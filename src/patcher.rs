//! Configuration replacement inside an unpacked APK tree.
//!
//! The app's runtime configuration lives at one fixed relative path in the
//! unpacked tree. Patching is full replacement: the caller's payload
//! overwrites the file wholesale; no field-level merge with whatever the
//! source APK shipped. The pre-read of the existing file exists only to
//! confirm the artifact matches the expected layout (parse, then discard).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

/// Where the configuration file sits inside the unpacked tree.
pub const CONFIG_RELATIVE_PATH: &str = "assets/flutter_assets/assets/config.json";

/// Errors from the patch stage.
#[derive(Debug, Error)]
pub enum PatchError {
    /// The unpacked tree has no config file where one is expected; the
    /// source APK does not match the expected internal layout.
    #[error("configuration file not found at {0}")]
    NotFound(String),

    #[error("configuration is not valid JSON ({context}): {detail}")]
    Parse { context: &'static str, detail: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Resolve the config file path under an unpacked tree.
pub fn config_path(unpack_root: &Path) -> PathBuf {
    unpack_root.join(CONFIG_RELATIVE_PATH)
}

/// Replace the configuration file under `unpack_root` with `payload`.
///
/// Validates the existing file parses, writes the payload as pretty JSON,
/// and re-reads the result to confirm what landed on disk parses too.
pub fn patch_config(unpack_root: &Path, payload: &Value) -> Result<(), PatchError> {
    let path = config_path(unpack_root);

    if !path.exists() {
        return Err(PatchError::NotFound(CONFIG_RELATIVE_PATH.to_string()));
    }

    // Parse-then-discard: the original contents are not merged, only checked.
    let existing = fs::read_to_string(&path)?;
    serde_json::from_str::<Value>(&existing).map_err(|e| PatchError::Parse {
        context: "existing config",
        detail: e.to_string(),
    })?;

    let rendered = serde_json::to_string_pretty(payload).map_err(|e| PatchError::Parse {
        context: "payload",
        detail: e.to_string(),
    })?;
    fs::write(&path, rendered)?;

    // Read back what was written; a torn or mangled write aborts the stage.
    let written = fs::read_to_string(&path)?;
    serde_json::from_str::<Value>(&written).map_err(|e| PatchError::Parse {
        context: "rewritten config",
        detail: e.to_string(),
    })?;

    Ok(())
}
