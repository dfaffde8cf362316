//! Persisted artifact metadata.
//!
//! One `ArtifactRecord` per stored artifact, keyed by (owner id, artifact
//! id). The record is what the registry persists and what callers get back
//! from submit/list; the bytes themselves live in the artifact store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Schema version for artifact records.
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier for artifact records.
pub const SCHEMA_ID: &str = "apkforge/artifact_record@1";

/// Where a stored artifact can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum DownloadRef {
    /// Mirrored to remote object storage; callers are redirected to `url`.
    /// `object_id` is kept so deletion can reach the remote copy.
    Remote { url: String, object_id: String },
    /// Served from the lane's local store by artifact id.
    Local,
}

impl DownloadRef {
    /// True when the reference points at the remote tier.
    pub fn is_remote(&self) -> bool {
        matches!(self, DownloadRef::Remote { .. })
    }
}

/// Metadata describing one stored, signed artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Schema version.
    pub schema_version: u32,

    /// Schema identifier.
    pub schema_id: String,

    /// Globally unique artifact identifier.
    pub artifact_id: String,

    /// Owner the artifact was built for.
    pub owner_id: String,

    /// Stored file name (`{owner_id}_{artifact_id}.apk`).
    pub file_name: String,

    /// SHA-256 of the stored bytes.
    pub sha256: String,

    /// Size of the stored bytes.
    pub size_bytes: u64,

    /// When the artifact was stored.
    pub created_at: DateTime<Utc>,

    /// When the artifact becomes eligible for reclamation. Fixed at
    /// creation; never extended by access.
    pub expires_at: DateTime<Utc>,

    /// Preferred download tier.
    pub download: DownloadRef,
}

impl ArtifactRecord {
    /// Build a record expiring `ttl` after `created_at`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        artifact_id: String,
        owner_id: String,
        file_name: String,
        sha256: String,
        size_bytes: u64,
        created_at: DateTime<Utc>,
        ttl: Duration,
        download: DownloadRef,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            artifact_id,
            owner_id,
            file_name,
            sha256,
            size_bytes,
            created_at,
            expires_at: created_at + ttl,
            download,
        }
    }

    /// True once the record's TTL has passed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// True once the record's TTL has passed.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record(ttl_seconds: i64) -> ArtifactRecord {
        ArtifactRecord::new(
            "11111111-2222-3333-4444-555555555555".to_string(),
            "guest".to_string(),
            "guest_11111111-2222-3333-4444-555555555555.apk".to_string(),
            "deadbeef".to_string(),
            1024,
            Utc::now(),
            Duration::seconds(ttl_seconds),
            DownloadRef::Local,
        )
    }

    #[test]
    fn test_expiry_is_creation_plus_ttl() {
        let record = make_record(3600);
        assert_eq!(record.expires_at - record.created_at, Duration::seconds(3600));
    }

    #[test]
    fn test_not_expired_before_deadline() {
        let record = make_record(3600);
        assert!(!record.is_expired());
    }

    #[test]
    fn test_expired_at_deadline() {
        let record = make_record(3600);
        assert!(record.is_expired_at(record.expires_at));
        assert!(record.is_expired_at(record.expires_at + Duration::seconds(1)));
    }

    #[test]
    fn test_download_ref_serialization() {
        let remote = DownloadRef::Remote {
            url: "https://mirror.example/abc".to_string(),
            object_id: "obj-1".to_string(),
        };
        let json = serde_json::to_string(&remote).unwrap();
        assert!(json.contains("\"tier\":\"remote\""));
        assert!(remote.is_remote());

        let local: DownloadRef = serde_json::from_str("{\"tier\":\"local\"}").unwrap();
        assert_eq!(local, DownloadRef::Local);
        assert!(!local.is_remote());
    }

    #[test]
    fn test_record_round_trip() {
        let record = make_record(60);
        let json = serde_json::to_string_pretty(&record).unwrap();
        assert!(json.contains("\"schema_id\": \"apkforge/artifact_record@1\""));

        let parsed: ArtifactRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.artifact_id, record.artifact_id);
        assert_eq!(parsed.expires_at, record.expires_at);
        assert_eq!(parsed.download, record.download);
    }
}
