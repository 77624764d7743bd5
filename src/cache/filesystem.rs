//! Filesystem-backed reference cache.
//!
//! Layout: `{root}/{bucket}/{prefix}/reference.bin`, one file per
//! deltaspace, mirroring the directory-per-(bucket,prefix) scheme named in
//! the contract.

use super::{CacheError, ReferenceCache};
use crate::hash::sha256_file;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::debug;

pub struct FilesystemReferenceCache {
    root: PathBuf,
}

impl FilesystemReferenceCache {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn entry_dir(&self, bucket: &str, prefix: &str) -> PathBuf {
        if prefix.is_empty() {
            self.root.join(bucket).join("_root_")
        } else {
            self.root.join(bucket).join(prefix)
        }
    }

    fn entry_path(&self, bucket: &str, prefix: &str) -> PathBuf {
        self.entry_dir(bucket, prefix).join("reference.bin")
    }
}

#[async_trait]
impl ReferenceCache for FilesystemReferenceCache {
    async fn has_ref(&self, bucket: &str, prefix: &str, sha256: &str) -> bool {
        let path = self.entry_path(bucket, prefix);
        match sha256_file(&path).await {
            Ok(actual) => actual == sha256,
            Err(_) => false,
        }
    }

    async fn write_ref(&self, bucket: &str, prefix: &str, src_path: &Path) -> Result<(), CacheError> {
        let dir = self.entry_dir(bucket, prefix);
        fs::create_dir_all(&dir).await?;
        let dest = self.entry_path(bucket, prefix);
        let data = fs::read(src_path).await?;

        let dir_for_blocking = dir.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = NamedTempFile::new_in(&dir_for_blocking)?;
            tmp.write_all(&data)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&dest).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| CacheError::Io(std::io::Error::other(e.to_string())))??;

        debug!("cached reference for {}/{}", bucket, prefix);
        Ok(())
    }

    async fn get_validated_ref(
        &self,
        bucket: &str,
        prefix: &str,
        sha256: &str,
        dest_path: &Path,
    ) -> Result<(), CacheError> {
        let path = self.entry_path(bucket, prefix);
        let data = fs::read(&path).await.map_err(|_| CacheError::Missing {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        })?;

        let actual = hex::encode(<sha2::Sha256 as sha2::Digest>::digest(&data));
        if actual != sha256 {
            return Err(CacheError::IntegrityMismatch {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
                expected: sha256.to_string(),
                actual,
            });
        }

        fs::write(dest_path, &data).await?;
        Ok(())
    }

    async fn evict(&self, bucket: &str, prefix: &str) {
        let _ = fs::remove_dir_all(self.entry_dir(bucket, prefix)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write_file(path: &Path, data: &[u8]) {
        fs::write(path, data).await.unwrap();
    }

    #[tokio::test]
    async fn write_then_validated_read_round_trips() {
        let root = tempfile::tempdir().unwrap();
        let cache = FilesystemReferenceCache::new(root.path().to_path_buf());

        let src_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("ref.bin");
        write_file(&src, b"reference bytes").await;
        let sha = sha256_file(&src).await.unwrap();

        cache.write_ref("b", "rel", &src).await.unwrap();
        assert!(cache.has_ref("b", "rel", &sha).await);

        let dest = src_dir.path().join("out.bin");
        cache.get_validated_ref("b", "rel", &sha, &dest).await.unwrap();
        assert_eq!(fs::read(&dest).await.unwrap(), b"reference bytes");
    }

    #[tokio::test]
    async fn get_validated_ref_rejects_sha_mismatch() {
        let root = tempfile::tempdir().unwrap();
        let cache = FilesystemReferenceCache::new(root.path().to_path_buf());

        let src_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("ref.bin");
        write_file(&src, b"reference bytes").await;
        cache.write_ref("b", "rel", &src).await.unwrap();

        let dest = src_dir.path().join("out.bin");
        let err = cache
            .get_validated_ref("b", "rel", "deadbeef", &dest)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::IntegrityMismatch { .. }));
    }

    #[tokio::test]
    async fn evict_removes_entry() {
        let root = tempfile::tempdir().unwrap();
        let cache = FilesystemReferenceCache::new(root.path().to_path_buf());

        let src_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("ref.bin");
        write_file(&src, b"data").await;
        let sha = sha256_file(&src).await.unwrap();

        cache.write_ref("b", "rel", &src).await.unwrap();
        cache.evict("b", "rel").await;
        assert!(!cache.has_ref("b", "rel", &sha).await);
    }
}
