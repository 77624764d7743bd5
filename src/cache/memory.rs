//! In-memory reference cache, for `DG_CACHE_BACKEND=memory` and for tests
//! that want a cache without touching disk.

use super::{CacheError, ReferenceCache};
use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use sha2::Digest;
use std::num::NonZeroUsize;
use std::path::Path;

struct Entry {
    data: Bytes,
    sha256: String,
}

struct Inner {
    cache: LruCache<String, Entry>,
    current_size: usize,
}

pub struct MemoryReferenceCache {
    inner: Mutex<Inner>,
    max_size_bytes: usize,
}

fn cache_key(bucket: &str, prefix: &str) -> String {
    format!("{bucket}/{prefix}")
}

impl MemoryReferenceCache {
    pub fn new(max_size_mb: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                cache: LruCache::new(NonZeroUsize::new(usize::MAX).unwrap()),
                current_size: 0,
            }),
            max_size_bytes: max_size_mb * 1024 * 1024,
        }
    }

    pub fn size(&self) -> usize {
        self.inner.lock().current_size
    }

    pub fn len(&self) -> usize {
        self.inner.lock().cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReferenceCache for MemoryReferenceCache {
    async fn has_ref(&self, bucket: &str, prefix: &str, sha256: &str) -> bool {
        let mut inner = self.inner.lock();
        let key = cache_key(bucket, prefix);
        matches!(inner.cache.get(&key), Some(entry) if entry.sha256 == sha256)
    }

    async fn write_ref(&self, bucket: &str, prefix: &str, src_path: &Path) -> Result<(), CacheError> {
        let data = tokio::fs::read(src_path).await?;
        let sha256 = hex::encode(sha2::Sha256::digest(&data));
        let size = data.len();
        let entry = Entry { data: Bytes::from(data), sha256 };

        let mut inner = self.inner.lock();
        let key = cache_key(bucket, prefix);

        if let Some(old) = inner.cache.peek(&key) {
            inner.current_size = inner.current_size.saturating_sub(old.data.len());
        }

        while inner.current_size + size > self.max_size_bytes {
            match inner.cache.pop_lru() {
                Some((_, evicted)) => {
                    inner.current_size = inner.current_size.saturating_sub(evicted.data.len());
                }
                None => break,
            }
        }

        inner.current_size += size;
        inner.cache.put(key, entry);
        Ok(())
    }

    async fn get_validated_ref(
        &self,
        bucket: &str,
        prefix: &str,
        sha256: &str,
        dest_path: &Path,
    ) -> Result<(), CacheError> {
        let data = {
            let mut inner = self.inner.lock();
            let key = cache_key(bucket, prefix);
            inner
                .cache
                .get(&key)
                .map(|e| e.data.clone())
                .ok_or_else(|| CacheError::Missing {
                    bucket: bucket.to_string(),
                    prefix: prefix.to_string(),
                })?
        };

        let actual = hex::encode(sha2::Sha256::digest(&data));
        if actual != sha256 {
            return Err(CacheError::IntegrityMismatch {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
                expected: sha256.to_string(),
                actual,
            });
        }

        tokio::fs::write(dest_path, &data).await?;
        Ok(())
    }

    async fn evict(&self, bucket: &str, prefix: &str) {
        let mut inner = self.inner.lock();
        let key = cache_key(bucket, prefix);
        if let Some(entry) = inner.cache.pop(&key) {
            inner.current_size = inner.current_size.saturating_sub(entry.data.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_validated_read_round_trips() {
        let cache = MemoryReferenceCache::new(100);
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("ref.bin");
        tokio::fs::write(&src, b"reference bytes").await.unwrap();

        cache.write_ref("b", "rel", &src).await.unwrap();
        let sha256 = hex::encode(sha2::Sha256::digest(b"reference bytes"));
        assert!(cache.has_ref("b", "rel", &sha256).await);

        let dest = dir.path().join("out.bin");
        cache.get_validated_ref("b", "rel", &sha256, &dest).await.unwrap();
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"reference bytes");
    }

    #[tokio::test]
    async fn get_validated_ref_rejects_sha_mismatch() {
        let cache = MemoryReferenceCache::new(100);
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("ref.bin");
        tokio::fs::write(&src, b"reference bytes").await.unwrap();
        cache.write_ref("b", "rel", &src).await.unwrap();

        let dest = dir.path().join("out.bin");
        let err = cache
            .get_validated_ref("b", "rel", "deadbeef", &dest)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::IntegrityMismatch { .. }));
    }

    #[tokio::test]
    async fn evicts_lru_entry_once_over_budget() {
        let cache = MemoryReferenceCache::new(0);
        // max_size_bytes == 0; any write exceeds budget and immediately evicts.
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        tokio::fs::write(&a, vec![0u8; 1024]).await.unwrap();
        tokio::fs::write(&b, vec![1u8; 1024]).await.unwrap();

        cache.write_ref("bucket", "a", &a).await.unwrap();
        cache.write_ref("bucket", "b", &b).await.unwrap();

        // only the most recently written entry should survive a zero-budget cache.
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn evict_removes_entry() {
        let cache = MemoryReferenceCache::new(100);
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("ref.bin");
        tokio::fs::write(&src, b"data").await.unwrap();
        cache.write_ref("b", "rel", &src).await.unwrap();

        cache.evict("b", "rel").await;
        assert!(cache.is_empty());
    }
}
