//! Error taxonomy shared across the crate.

use crate::cache::CacheError;
use crate::diff::DiffError;
use crate::store::StoreError;
use thiserror::Error;

/// Errors surfaced by [`crate::service::DeltaService`] operations.
#[derive(Debug, Error)]
pub enum DeltaError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("checksum mismatch for {key}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("failed to encode delta: {0}")]
    DiffEncodeFailure(String),

    #[error("failed to decode delta: {0}")]
    DiffDecodeFailure(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl DeltaError {
    /// Wraps a scratch-file I/O failure (tempdir creation, metadata reads)
    /// that doesn't belong to any of the store/diff/cache ports.
    pub(crate) fn from_io(e: std::io::Error) -> Self {
        DeltaError::Configuration(e.to_string())
    }
}

impl From<DiffError> for DeltaError {
    fn from(err: DiffError) -> Self {
        match err {
            DiffError::Encode(msg) => DeltaError::DiffEncodeFailure(msg),
            DiffError::Decode(msg) => DeltaError::DiffDecodeFailure(msg),
            DiffError::Io(e) => DeltaError::DiffEncodeFailure(e.to_string()),
        }
    }
}

impl From<CacheError> for DeltaError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::IntegrityMismatch {
                bucket,
                prefix,
                expected,
                actual,
            } => DeltaError::IntegrityMismatch {
                key: format!("{bucket}/{prefix}/reference.bin"),
                expected,
                actual,
            },
            CacheError::Missing { bucket, prefix } => {
                DeltaError::NotFound(format!("{bucket}/{prefix}/reference.bin"))
            }
            CacheError::Io(e) => DeltaError::Configuration(e.to_string()),
        }
    }
}
