//! Object store port: the S3-compatible remote the rest of the crate
//! consumes. `S3ObjectStore` is the production adapter; `MemoryObjectStore`
//! is a lightweight in-process stand-in used by tests and local
//! experimentation, the same role `FilesystemBackend` plays in the proxy
//! this crate is descended from.

mod memory;
mod s3;

pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Metadata returned by [`ObjectStore::head`].
#[derive(Debug, Clone)]
pub struct ObjectHead {
    pub size: u64,
    pub metadata: HashMap<String, String>,
}

/// A single entry from [`ObjectStore::list`].
#[derive(Debug, Clone)]
pub struct ListedObject {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<chrono::DateTime<chrono::Utc>>,
    pub etag: Option<String>,
}

/// One page of a paginated [`ObjectStore::list`] call.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ListedObject>,
    pub is_truncated: bool,
    pub continuation_token: Option<String>,
}

/// Exposes the underlying S3 client for pass-through operations (bucket ACLs,
/// presigning) the facade needs but DeltaService does not. Mirrors the
/// `hasattr(storage_adapter, "client")` duck-typing the original Python
/// source used to decide whether native S3 passthrough was available.
pub trait NativeClient: Send + Sync {}

/// Object store consumed by [`crate::service::DeltaService`]. All keys are
/// full `bucket/key` strings; callers combine bucket and key before crossing
/// this boundary.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn head(&self, full_key: &str) -> Result<Option<ObjectHead>, StoreError>;

    /// Download the object to `dest_path` (a scratch file the caller owns).
    async fn get(&self, full_key: &str, dest_path: &Path) -> Result<(), StoreError>;

    /// Upload `local_path`'s contents, attaching `metadata` as custom
    /// object metadata.
    async fn put(
        &self,
        full_key: &str,
        local_path: &Path,
        metadata: HashMap<String, String>,
    ) -> Result<(), StoreError>;

    /// List objects under `full_key_prefix`, following continuation tokens
    /// up to `max_keys` per page.
    async fn list(
        &self,
        full_key_prefix: &str,
        max_keys: u32,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, StoreError>;

    async fn delete(&self, full_key: &str) -> Result<(), StoreError>;

    /// Server-side copy, used by the compatibility facade.
    async fn copy(
        &self,
        src_full_key: &str,
        dst_full_key: &str,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<(), StoreError>;

    /// Capability probe for S3-native passthrough (bucket ACLs etc).
    /// `None` when the backend has no native client to expose.
    fn native_client(&self) -> Option<&dyn NativeClient> {
        None
    }
}

/// Forwards every method through dynamic dispatch, so `DynDeltaService`
/// (generic over `S: ObjectStore`) can be instantiated with `Box<dyn
/// ObjectStore>` at runtime.
#[async_trait]
impl ObjectStore for Box<dyn ObjectStore> {
    async fn head(&self, full_key: &str) -> Result<Option<ObjectHead>, StoreError> {
        (**self).head(full_key).await
    }

    async fn get(&self, full_key: &str, dest_path: &Path) -> Result<(), StoreError> {
        (**self).get(full_key, dest_path).await
    }

    async fn put(
        &self,
        full_key: &str,
        local_path: &Path,
        metadata: HashMap<String, String>,
    ) -> Result<(), StoreError> {
        (**self).put(full_key, local_path, metadata).await
    }

    async fn list(
        &self,
        full_key_prefix: &str,
        max_keys: u32,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        (**self).list(full_key_prefix, max_keys, continuation_token).await
    }

    async fn delete(&self, full_key: &str) -> Result<(), StoreError> {
        (**self).delete(full_key).await
    }

    async fn copy(
        &self,
        src_full_key: &str,
        dst_full_key: &str,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<(), StoreError> {
        (**self).copy(src_full_key, dst_full_key, metadata).await
    }

    fn native_client(&self) -> Option<&dyn NativeClient> {
        (**self).native_client()
    }
}

/// Convenience: list *all* pages under a prefix, up to `max_pages`.
pub async fn list_all(
    store: &dyn ObjectStore,
    full_key_prefix: &str,
    max_pages: usize,
) -> Result<Vec<ListedObject>, StoreError> {
    let mut out = Vec::new();
    let mut token: Option<String> = None;
    for _ in 0..max_pages {
        let page = store.list(full_key_prefix, 1000, token.as_deref()).await?;
        out.extend(page.objects);
        if !page.is_truncated {
            return Ok(out);
        }
        token = page.continuation_token;
        if token.is_none() {
            // truncated=true with no token: stop rather than loop forever.
            break;
        }
    }
    Ok(out)
}
