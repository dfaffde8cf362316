//! Error taxonomy for the lane surface.
//!
//! Every failure a caller can observe is classified into exactly one
//! `ErrorKind` before it leaves the process. The kinds and their exit codes
//! are stable and used for automation; the detail string is for humans.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classified failure kinds returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Malformed request: empty payload, non-object payload, bad owner id.
    InvalidRequest,
    /// The source APK referenced by the job does not exist.
    SourceArtifactMissing,
    /// A required external tool (java, apktool, signer) is not installed.
    ToolUnavailable,
    /// An external tool exceeded its per-stage timeout and was killed.
    ToolTimeout,
    /// An external tool exited non-zero or overflowed its output cap.
    ToolExecutionFailure,
    /// The unpacked tree has no configuration file at the expected path.
    ConfigNotFound,
    /// The existing or freshly written configuration file is not valid JSON.
    ConfigParseFailure,
    /// The signer reported success but the expected output file is absent.
    SigningArtifactMissing,
    /// The durable local tier rejected the artifact (mirror failure alone
    /// is never surfaced).
    StorageFailure,
    /// No artifact record exists for the requested id.
    RecordNotFound,
    /// The record exists but its TTL has passed.
    RecordExpired,
}

impl ErrorKind {
    /// Stable process exit code for this kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::InvalidRequest => 10,
            ErrorKind::SourceArtifactMissing => 20,
            ErrorKind::ToolUnavailable => 30,
            ErrorKind::ToolTimeout => 31,
            ErrorKind::ToolExecutionFailure => 32,
            ErrorKind::ConfigNotFound => 40,
            ErrorKind::ConfigParseFailure => 41,
            ErrorKind::SigningArtifactMissing => 50,
            ErrorKind::StorageFailure => 60,
            ErrorKind::RecordNotFound => 70,
            ErrorKind::RecordExpired => 71,
        }
    }

    /// True when the caller can fix the failure by changing its input;
    /// false for infrastructure problems worth paging over.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidRequest
                | ErrorKind::SourceArtifactMissing
                | ErrorKind::ConfigNotFound
                | ErrorKind::ConfigParseFailure
                | ErrorKind::RecordNotFound
                | ErrorKind::RecordExpired
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::SourceArtifactMissing => "SOURCE_ARTIFACT_MISSING",
            ErrorKind::ToolUnavailable => "TOOL_UNAVAILABLE",
            ErrorKind::ToolTimeout => "TOOL_TIMEOUT",
            ErrorKind::ToolExecutionFailure => "TOOL_EXECUTION_FAILURE",
            ErrorKind::ConfigNotFound => "CONFIG_NOT_FOUND",
            ErrorKind::ConfigParseFailure => "CONFIG_PARSE_FAILURE",
            ErrorKind::SigningArtifactMissing => "SIGNING_ARTIFACT_MISSING",
            ErrorKind::StorageFailure => "STORAGE_FAILURE",
            ErrorKind::RecordNotFound => "RECORD_NOT_FOUND",
            ErrorKind::RecordExpired => "RECORD_EXPIRED",
        };
        write!(f, "{}", name)
    }
}

/// Error payload returned to callers.
///
/// The detail is a single human-readable line; it must not carry raw process
/// output, stack traces, or paths outside the lane's own directories.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct ApiError {
    /// Classified failure kind.
    pub kind: ErrorKind,
    /// Human-readable, single-line detail.
    pub detail: String,
}

impl ApiError {
    /// Create a new error payload.
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Create an INVALID_REQUEST error.
    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, detail)
    }

    /// Create a RECORD_NOT_FOUND error for an artifact id.
    pub fn record_not_found(artifact_id: &str) -> Self {
        Self::new(
            ErrorKind::RecordNotFound,
            format!("no artifact record for '{}'", artifact_id),
        )
    }

    /// Create a RECORD_EXPIRED error for an artifact id.
    pub fn record_expired(artifact_id: &str) -> Self {
        Self::new(
            ErrorKind::RecordExpired,
            format!("artifact '{}' has expired", artifact_id),
        )
    }
}
