//! Core data model: object keys, deltaspaces, and the persisted metadata
//! records DeltaService attaches to reference/delta/direct/rehydrated objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Tool version identifier — uses crate name and version from Cargo.toml
pub const DELTAGLIDER_TOOL: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Logical metadata key names and their on-the-wire forms.
///
/// Historically DeltaGlider wrote bare keys (`file_sha256`); newer writers use
/// a `dg-`-prefixed namespace (`dg-file-sha256`). Writers here always emit the
/// `dg-` form; [`resolve`] accepts either so older objects stay readable.
pub mod meta_keys {
    pub const TOOL: &str = "dg-tool";
    pub const ORIGINAL_NAME: &str = "dg-original-name";
    pub const SOURCE_NAME: &str = "dg-source-name";
    pub const FILE_SHA256: &str = "dg-file-sha256";
    pub const FILE_SIZE: &str = "dg-file-size";
    pub const CREATED_AT: &str = "dg-created-at";
    pub const NOTE: &str = "dg-note";
    pub const REF_KEY: &str = "dg-ref-key";
    pub const REF_SHA256: &str = "dg-ref-sha256";
    pub const DELTA_SIZE: &str = "dg-delta-size";
    pub const DELTA_CMD: &str = "dg-delta-cmd";
    pub const COMPRESSION: &str = "dg-compression";
    pub const EXPIRES_AT: &str = "dg-expires-at";
    pub const ORIGINAL_KEY: &str = "dg-original-key";
    pub const ORIGINAL_FILENAME: &str = "dg-original-filename";
    pub const REHYDRATED: &str = "dg-rehydrated";

    /// Resolve a logical key against custom metadata, accepting either the
    /// bare historical name or the canonical `dg-`-prefixed one.
    pub fn resolve<'a>(metadata: &'a std::collections::HashMap<String, String>, dg_key: &str) -> Option<&'a str> {
        if let Some(v) = metadata.get(dg_key) {
            return Some(v.as_str());
        }
        let bare = dg_key.strip_prefix("dg-").unwrap_or(dg_key);
        metadata.get(bare).map(|v| v.as_str())
    }
}

/// Errors from validating user-provided bucket/key inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValidationError(String);

impl fmt::Display for KeyValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for KeyValidationError {}

/// `(bucket, key)`. `full_key = bucket + "/" + key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub bucket: String,
    pub key: String,
}

impl ObjectKey {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Parse `s3://bucket/key`. Returns `None` if the scheme or bucket is missing.
    pub fn parse_s3_url(url: &str) -> Option<Self> {
        let rest = url.strip_prefix("s3://")?;
        let mut parts = rest.splitn(2, '/');
        let bucket = parts.next()?.to_string();
        let key = parts.next().unwrap_or("").to_string();
        if bucket.is_empty() {
            return None;
        }
        Some(Self { bucket, key })
    }

    pub fn full_key(&self) -> String {
        format!("{}/{}", self.bucket, self.key)
    }

    /// The deltaspace this key belongs to: the key's directory component.
    pub fn deltaspace(&self) -> DeltaSpace {
        let prefix = match self.key.rfind('/') {
            Some(idx) => self.key[..idx].to_string(),
            None => String::new(),
        };
        DeltaSpace {
            bucket: self.bucket.clone(),
            prefix,
        }
    }

    pub fn validate_object(&self) -> Result<(), KeyValidationError> {
        validate_key_path(&self.key, true)?;
        if self.key.is_empty() {
            return Err(KeyValidationError("Object key must not be empty".to_string()));
        }
        if self.key.ends_with('/') {
            return Err(KeyValidationError("Object key must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn validate_prefix(prefix: &str) -> Result<(), KeyValidationError> {
        validate_key_path(prefix, true)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

fn validate_key_path(value: &str, allow_slashes: bool) -> Result<(), KeyValidationError> {
    if value.contains('\0') {
        return Err(KeyValidationError("Key must not contain NUL bytes".to_string()));
    }
    if value.contains('\\') {
        return Err(KeyValidationError("Key must not contain backslashes".to_string()));
    }
    if !allow_slashes && value.contains('/') {
        return Err(KeyValidationError("Key must not contain '/'".to_string()));
    }
    for segment in value.split('/') {
        if segment == ".." {
            return Err(KeyValidationError("Key must not contain '..' path segments".to_string()));
        }
    }
    Ok(())
}

/// `(bucket, prefix)`. Defines the logical grouping under which at most one
/// reference exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeltaSpace {
    pub bucket: String,
    pub prefix: String,
}

impl DeltaSpace {
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    /// `prefix + "/reference.bin"`, or `"reference.bin"` if the prefix is empty.
    pub fn reference_key(&self) -> String {
        if self.prefix.is_empty() {
            "reference.bin".to_string()
        } else {
            format!("{}/reference.bin", self.prefix)
        }
    }

    pub fn full_reference_key(&self) -> String {
        format!("{}/{}", self.bucket, self.reference_key())
    }

    /// Build the key for `name` within this deltaspace.
    pub fn key_for(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.prefix, name)
        }
    }
}

/// Metadata persisted on `reference.bin`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceMeta {
    pub tool: String,
    pub source_name: String,
    pub file_sha256: String,
    pub created_at: DateTime<Utc>,
}

impl ReferenceMeta {
    pub fn to_metadata(&self) -> HashMap<String, String> {
        HashMap::from([
            (meta_keys::TOOL.to_string(), self.tool.clone()),
            (meta_keys::SOURCE_NAME.to_string(), self.source_name.clone()),
            (meta_keys::FILE_SHA256.to_string(), self.file_sha256.clone()),
            (meta_keys::CREATED_AT.to_string(), self.created_at.to_rfc3339()),
        ])
    }

    pub fn from_metadata(metadata: &HashMap<String, String>) -> Option<Self> {
        Some(Self {
            tool: meta_keys::resolve(metadata, meta_keys::TOOL)?.to_string(),
            source_name: meta_keys::resolve(metadata, meta_keys::SOURCE_NAME)?.to_string(),
            file_sha256: meta_keys::resolve(metadata, meta_keys::FILE_SHA256)?.to_string(),
            created_at: meta_keys::resolve(metadata, meta_keys::CREATED_AT)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(Utc::now),
        })
    }
}

/// Metadata persisted on `*.delta` objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(clippy::too_many_arguments)]
pub struct DeltaMeta {
    pub tool: String,
    pub original_name: String,
    pub file_sha256: String,
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
    pub ref_key: String,
    pub ref_sha256: String,
    pub delta_size: u64,
    pub delta_cmd: String,
    pub note: Option<String>,
}

impl DeltaMeta {
    pub fn to_metadata(&self) -> HashMap<String, String> {
        let mut m = HashMap::from([
            (meta_keys::TOOL.to_string(), self.tool.clone()),
            (meta_keys::ORIGINAL_NAME.to_string(), self.original_name.clone()),
            (meta_keys::FILE_SHA256.to_string(), self.file_sha256.clone()),
            (meta_keys::FILE_SIZE.to_string(), self.file_size.to_string()),
            (meta_keys::CREATED_AT.to_string(), self.created_at.to_rfc3339()),
            (meta_keys::REF_KEY.to_string(), self.ref_key.clone()),
            (meta_keys::REF_SHA256.to_string(), self.ref_sha256.clone()),
            (meta_keys::DELTA_SIZE.to_string(), self.delta_size.to_string()),
            (meta_keys::DELTA_CMD.to_string(), self.delta_cmd.clone()),
        ]);
        if let Some(note) = &self.note {
            m.insert(meta_keys::NOTE.to_string(), note.clone());
        }
        m
    }

    pub fn from_metadata(metadata: &HashMap<String, String>) -> Option<Self> {
        Some(Self {
            tool: meta_keys::resolve(metadata, meta_keys::TOOL)?.to_string(),
            original_name: meta_keys::resolve(metadata, meta_keys::ORIGINAL_NAME)?.to_string(),
            file_sha256: meta_keys::resolve(metadata, meta_keys::FILE_SHA256)?.to_string(),
            file_size: meta_keys::resolve(metadata, meta_keys::FILE_SIZE)?.parse().ok()?,
            created_at: meta_keys::resolve(metadata, meta_keys::CREATED_AT)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(Utc::now),
            ref_key: meta_keys::resolve(metadata, meta_keys::REF_KEY)?.to_string(),
            ref_sha256: meta_keys::resolve(metadata, meta_keys::REF_SHA256)?.to_string(),
            delta_size: meta_keys::resolve(metadata, meta_keys::DELTA_SIZE)?.parse().ok()?,
            delta_cmd: meta_keys::resolve(metadata, meta_keys::DELTA_CMD).unwrap_or_default().to_string(),
            note: meta_keys::resolve(metadata, meta_keys::NOTE).map(|s| s.to_string()),
        })
    }
}

/// Metadata persisted on directly uploaded objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectMeta {
    pub tool: String,
    pub original_name: String,
    pub file_sha256: String,
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
}

impl DirectMeta {
    pub fn to_metadata(&self) -> HashMap<String, String> {
        HashMap::from([
            (meta_keys::TOOL.to_string(), self.tool.clone()),
            (meta_keys::ORIGINAL_NAME.to_string(), self.original_name.clone()),
            (meta_keys::FILE_SHA256.to_string(), self.file_sha256.clone()),
            (meta_keys::FILE_SIZE.to_string(), self.file_size.to_string()),
            (meta_keys::CREATED_AT.to_string(), self.created_at.to_rfc3339()),
            (meta_keys::COMPRESSION.to_string(), "none".to_string()),
        ])
    }
}

/// Metadata persisted on `.deltaglider/tmp/...` rehydrated objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RehydratedTempMeta {
    pub expires_at: DateTime<Utc>,
    pub original_key: String,
    pub original_filename: String,
    pub created_at: DateTime<Utc>,
}

impl RehydratedTempMeta {
    pub fn to_metadata(&self) -> HashMap<String, String> {
        HashMap::from([
            (meta_keys::EXPIRES_AT.to_string(), self.expires_at.to_rfc3339()),
            (meta_keys::ORIGINAL_KEY.to_string(), self.original_key.clone()),
            (meta_keys::ORIGINAL_FILENAME.to_string(), self.original_filename.clone()),
            (meta_keys::REHYDRATED.to_string(), "true".to_string()),
            (meta_keys::CREATED_AT.to_string(), self.created_at.to_rfc3339()),
        ])
    }
}

/// Result of [`crate::service::DeltaService::put`].
#[derive(Debug, Clone, Serialize)]
pub struct PutSummary {
    pub operation: PutOperation,
    pub bucket: String,
    pub key: String,
    pub original_name: String,
    pub file_size: u64,
    pub file_sha256: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_sha256: Option<String>,
    pub cache_hit: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PutOperation {
    CreateReference,
    CreateDelta,
    UploadDirect,
}

/// Result of [`crate::service::DeltaService::verify`].
#[derive(Debug, Clone, Serialize)]
pub struct VerifyResult {
    pub valid: bool,
    pub expected_sha256: String,
    pub actual_sha256: String,
    pub message: String,
}

/// Result of [`crate::service::DeltaService::delete`].
#[derive(Debug, Clone, Serialize, Default)]
pub struct DeleteResult {
    pub bucket: String,
    pub key: String,
    pub deleted: bool,
    #[serde(rename = "type")]
    pub object_type: String,
    pub original_name: Option<String>,
    pub dependent_deltas: usize,
    pub cleaned_reference: Option<String>,
    pub warnings: Vec<String>,
}

impl DeleteResult {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            object_type: "unknown".to_string(),
            ..Default::default()
        }
    }
}

/// Result of [`crate::service::DeltaService::delete_recursive`].
#[derive(Debug, Clone, Serialize, Default)]
pub struct RecursiveDeleteResult {
    pub bucket: String,
    pub prefix: String,
    pub deleted_count: usize,
    pub failed_count: usize,
    pub deltas_deleted: usize,
    pub references_deleted: usize,
    pub direct_deleted: usize,
    pub other_deleted: usize,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// Result of [`crate::service::DeltaService::purge_temp_files`].
#[derive(Debug, Clone, Serialize, Default)]
pub struct PurgeResult {
    pub bucket: String,
    pub prefix: String,
    pub deleted_count: u64,
    pub expired_count: u64,
    pub error_count: u64,
    pub total_size_freed: u64,
    pub duration_seconds: f64,
    pub errors: Vec<String>,
}

/// Output of the bucket statistics aggregator.
#[derive(Debug, Clone, Serialize, Default)]
pub struct BucketStats {
    pub object_count: u64,
    pub total_size: u64,
    pub compressed_size: u64,
    pub space_saved: u64,
    pub average_compression_ratio: f64,
    pub delta_objects: u64,
    pub direct_objects: u64,
    pub warnings: Vec<String>,
}
