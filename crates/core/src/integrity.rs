use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const NEWEST_WINS_POLICY: &str = "newest-wins";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("manifest unparseable: {0}")]
    ManifestUnparseable(String),

    #[error("manifest has no content hash")]
    ManifestMissingHash,

    #[error("content hash mismatch: manifest {expected}, payload {actual}")]
    HashMismatch { expected: String, actual: String },
}

/// Metadata written next to the remote payload. Payload and manifest are
/// always written together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudManifest {
    #[serde(rename = "savedAtUtc")]
    pub saved_at_utc: String,
    #[serde(rename = "contentSha", alias = "contentSha256")]
    pub content_hash: String,
    pub policy: String,
}

impl Default for CloudManifest {
    fn default() -> Self {
        Self {
            saved_at_utc: String::new(),
            content_hash: String::new(),
            policy: NEWEST_WINS_POLICY.to_string(),
        }
    }
}

impl CloudManifest {
    /// Manifest describing `payload`, saved at `saved_at`.
    pub fn for_payload(payload: &str, saved_at: DateTime<Utc>) -> Self {
        Self {
            saved_at_utc: saved_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            content_hash: compute_digest(payload),
            policy: NEWEST_WINS_POLICY.to_string(),
        }
    }

    /// `savedAtUtc` as a timestamp, if it parses as RFC 3339.
    pub fn saved_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(self.saved_at_utc.trim())
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn to_json(&self) -> Result<String, IntegrityError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| IntegrityError::ManifestUnparseable(e.to_string()))
    }
}

/// BLAKE3 digest of the UTF-8 bytes of `text`, as lowercase hex.
pub fn compute_digest(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

pub fn parse_manifest(text: &str) -> Result<CloudManifest, IntegrityError> {
    if text.trim().is_empty() {
        return Err(IntegrityError::ManifestUnparseable("manifest is empty".into()));
    }
    serde_json::from_str(text).map_err(|e| IntegrityError::ManifestUnparseable(e.to_string()))
}

/// Check `payload` against the hash recorded in `manifest`. Hashes compare
/// case-insensitively.
pub fn validate_payload(payload: &str, manifest: &CloudManifest) -> Result<(), IntegrityError> {
    let expected = manifest.content_hash.trim();
    if expected.is_empty() {
        return Err(IntegrityError::ManifestMissingHash);
    }
    let actual = compute_digest(payload);
    if !expected.eq_ignore_ascii_case(&actual) {
        return Err(IntegrityError::HashMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}
