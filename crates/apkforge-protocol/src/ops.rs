//! Request/response envelope for the lane's stdin/stdout surface.
//!
//! One JSON object per line in, one per line out. No wire format beyond
//! that is prescribed: the configuration payload is an arbitrary JSON
//! document and the artifact is an opaque blob addressed by id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;

/// Operation names, as they appear in the `op` field.
pub mod names {
    pub const SUBMIT: &str = "submit";
    pub const LIST: &str = "list";
    pub const RETRIEVE: &str = "retrieve";
    pub const DELETE: &str = "delete";
    pub const SWEEP: &str = "sweep";
}

/// One request line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Build a customized, re-signed artifact from the configured source APK.
    Submit {
        /// Caller correlation id, echoed back verbatim.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        /// Owner of the produced artifact; defaults to "guest".
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner_id: Option<String>,
        /// Replacement configuration document (must be a non-empty object).
        payload: Value,
        /// Override for the source APK path; defaults to the configured one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },
    /// List the owner's unexpired artifacts.
    List {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner_id: Option<String>,
    },
    /// Resolve an artifact id to its download location.
    Retrieve {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        artifact_id: String,
    },
    /// Delete an artifact's record and bytes.
    Delete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        artifact_id: String,
    },
    /// Run one expiry sweep immediately.
    Sweep {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

impl Request {
    /// The caller correlation id, if one was sent.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Request::Submit { request_id, .. }
            | Request::List { request_id, .. }
            | Request::Retrieve { request_id, .. }
            | Request::Delete { request_id, .. }
            | Request::Sweep { request_id } => request_id.as_deref(),
        }
    }

    /// The operation name for logging.
    pub fn op_name(&self) -> &'static str {
        match self {
            Request::Submit { .. } => names::SUBMIT,
            Request::List { .. } => names::LIST,
            Request::Retrieve { .. } => names::RETRIEVE,
            Request::Delete { .. } => names::DELETE,
            Request::Sweep { .. } => names::SWEEP,
        }
    }
}

/// One response line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Echoed caller correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// True when `result` is populated, false when `error` is.
    pub ok: bool,

    /// Operation result payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Classified error payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl Response {
    /// Build a success response.
    pub fn success(request_id: Option<String>, result: Value) -> Self {
        Self {
            request_id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response.
    pub fn failure(request_id: Option<String>, error: ApiError) -> Self {
        Self {
            request_id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }
}
