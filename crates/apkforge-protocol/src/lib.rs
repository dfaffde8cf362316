//! apkforge surface types
//!
//! Defines the caller-facing surface of the lane: the submit/list/retrieve/
//! delete request envelope, the persisted `ArtifactRecord`, and the error
//! taxonomy every pipeline failure is classified into before it reaches a
//! caller.

pub mod error;
pub mod ops;
pub mod record;

pub use error::{ApiError, ErrorKind};
pub use ops::{Request, Response};
pub use record::{ArtifactRecord, DownloadRef};

/// Current lane version string.
pub const LANE_VERSION: &str = "0.1.0";
