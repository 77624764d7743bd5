//! In-memory object store. Used by unit/integration tests in place of a
//! real S3-compatible endpoint.

use super::{ListPage, ListedObject, NativeClient, ObjectHead, ObjectStore, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    metadata: HashMap<String, String>,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Entry>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NativeClient for MemoryObjectStore {}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn head(&self, full_key: &str) -> Result<Option<ObjectHead>, StoreError> {
        let objects = self.objects.lock();
        Ok(objects.get(full_key).map(|e| ObjectHead {
            size: e.data.len() as u64,
            metadata: e.metadata.clone(),
        }))
    }

    async fn get(&self, full_key: &str, dest_path: &Path) -> Result<(), StoreError> {
        let data = {
            let objects = self.objects.lock();
            objects
                .get(full_key)
                .map(|e| e.data.clone())
                .ok_or_else(|| StoreError::NotFound(full_key.to_string()))?
        };
        tokio::fs::write(dest_path, data).await?;
        Ok(())
    }

    async fn put(
        &self,
        full_key: &str,
        local_path: &Path,
        metadata: HashMap<String, String>,
    ) -> Result<(), StoreError> {
        let data = tokio::fs::read(local_path).await?;
        self.objects.lock().insert(full_key.to_string(), Entry { data, metadata });
        Ok(())
    }

    async fn list(
        &self,
        full_key_prefix: &str,
        max_keys: u32,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        let objects = self.objects.lock();
        let mut keys: Vec<&String> = objects.keys().filter(|k| k.starts_with(full_key_prefix)).collect();
        keys.sort();

        if let Some(token) = continuation_token {
            keys.retain(|k| k.as_str() > token);
        }

        let max_keys = max_keys as usize;
        let is_truncated = keys.len() > max_keys;
        keys.truncate(max_keys);

        let next_token = if is_truncated { keys.last().map(|k| (*k).clone()) } else { None };

        let listed = keys
            .into_iter()
            .map(|k| {
                let e = &objects[k];
                ListedObject {
                    key: k.clone(),
                    size: e.data.len() as u64,
                    last_modified: Some(Utc::now()),
                    etag: None,
                }
            })
            .collect();

        Ok(ListPage {
            objects: listed,
            is_truncated,
            continuation_token: next_token,
        })
    }

    async fn delete(&self, full_key: &str) -> Result<(), StoreError> {
        self.objects.lock().remove(full_key);
        Ok(())
    }

    async fn copy(
        &self,
        src_full_key: &str,
        dst_full_key: &str,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<(), StoreError> {
        let mut objects = self.objects.lock();
        let src = objects
            .get(src_full_key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(src_full_key.to_string()))?;
        let entry = Entry {
            data: src.data,
            metadata: metadata.unwrap_or(src.metadata),
        };
        objects.insert(dst_full_key.to_string(), entry);
        Ok(())
    }

    fn native_client(&self) -> Option<&dyn NativeClient> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_head_then_get_round_trips() {
        let store = MemoryObjectStore::new();
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        tokio::fs::write(&src, b"hello").await.unwrap();

        store
            .put("b/key", &src, HashMap::from([("k".to_string(), "v".to_string())]))
            .await
            .unwrap();

        let head = store.head("b/key").await.unwrap().unwrap();
        assert_eq!(head.size, 5);
        assert_eq!(head.metadata.get("k"), Some(&"v".to_string()));

        let dest = dir.path().join("dest");
        store.get("b/key", &dest).await.unwrap();
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn list_paginates_with_continuation_token() {
        let store = MemoryObjectStore::new();
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        tokio::fs::write(&src, b"x").await.unwrap();

        for k in ["b/a", "b/b", "b/c"] {
            store.put(k, &src, HashMap::new()).await.unwrap();
        }

        let page1 = store.list("b/", 2, None).await.unwrap();
        assert_eq!(page1.objects.len(), 2);
        assert!(page1.is_truncated);

        let page2 = store
            .list("b/", 2, page1.continuation_token.as_deref())
            .await
            .unwrap();
        assert_eq!(page2.objects.len(), 1);
        assert!(!page2.is_truncated);
    }

    #[tokio::test]
    async fn get_missing_key_errors() {
        let store = MemoryObjectStore::new();
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("dest");
        assert!(store.get("missing", &dest).await.is_err());
    }
}
