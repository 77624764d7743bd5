//! Content-addressed local reference cache with TOCTOU-safe validated reads.
//!
//! A consumer reading through [`ReferenceCache::get_validated_ref`] must
//! never observe content whose SHA differs from the requested SHA, even if
//! the on-disk cache entry is concurrently mutated. Both backends satisfy
//! this by copying into a caller-private destination path and verifying the
//! hash of the bytes actually copied, never trusting a prior existence/hash
//! check to still hold at read time.

mod filesystem;
mod memory;

pub use filesystem::FilesystemReferenceCache;
pub use memory::MemoryReferenceCache;

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cached reference for {bucket}/{prefix} has sha {actual}, expected {expected}")]
    IntegrityMismatch {
        bucket: String,
        prefix: String,
        expected: String,
        actual: String,
    },

    #[error("no cached reference for {bucket}/{prefix}")]
    Missing { bucket: String, prefix: String },
}

#[async_trait]
pub trait ReferenceCache: Send + Sync {
    /// True only if an entry is present and its content SHA equals `sha256`.
    async fn has_ref(&self, bucket: &str, prefix: &str, sha256: &str) -> bool;

    /// Copy `src_path` into the cache, indexed by `(bucket, prefix)`.
    async fn write_ref(&self, bucket: &str, prefix: &str, src_path: &Path) -> Result<(), CacheError>;

    /// Copy the cached reference to `dest_path`, verifying its SHA matches
    /// `sha256` after the copy. Never hands back a path into the shared
    /// cache directory itself.
    async fn get_validated_ref(
        &self,
        bucket: &str,
        prefix: &str,
        sha256: &str,
        dest_path: &Path,
    ) -> Result<(), CacheError>;

    async fn evict(&self, bucket: &str, prefix: &str);
}
