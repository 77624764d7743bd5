//! S3-backed `ObjectStore`, built on `aws-sdk-s3`.

use super::{ListPage, ListedObject, NativeClient, ObjectHead, ObjectStore, StoreError};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, instrument};

/// Connection parameters for [`S3ObjectStore::new`]. Typically supplied by
/// the CLI rather than read from the environment directly.
#[derive(Debug, Clone, Default)]
pub struct S3Config {
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
    pub profile: Option<String>,
    pub force_path_style: bool,
}

pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub async fn new(config: S3Config) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_sdk_s3::config::Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        if let Some(profile) = &config.profile {
            loader = loader.profile_name(profile);
        }
        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style)
            .build();

        Self {
            client: Client::from_conf(s3_config),
        }
    }

    fn split(full_key: &str) -> Result<(&str, &str), StoreError> {
        full_key
            .split_once('/')
            .ok_or_else(|| StoreError::Other(format!("invalid full key: {full_key}")))
    }
}

impl NativeClient for S3ObjectStore {}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self))]
    async fn head(&self, full_key: &str) -> Result<Option<ObjectHead>, StoreError> {
        let (bucket, key) = Self::split(full_key)?;
        let result = self.client.head_object().bucket(bucket).key(key).send().await;

        match result {
            Ok(output) => Ok(Some(ObjectHead {
                size: output.content_length().unwrap_or(0).max(0) as u64,
                metadata: output.metadata().cloned().unwrap_or_default(),
            })),
            Err(SdkError::ServiceError(e)) if matches!(e.err(), HeadObjectError::NotFound(_)) => Ok(None),
            Err(e) => Err(StoreError::S3(format!("head_object failed: {e}"))),
        }
    }

    #[instrument(skip(self))]
    async fn get(&self, full_key: &str, dest_path: &Path) -> Result<(), StoreError> {
        let (bucket, key) = Self::split(full_key)?;
        let response = self.client.get_object().bucket(bucket).key(key).send().await.map_err(|e| {
            if let SdkError::ServiceError(service_error) = &e {
                if matches!(service_error.err(), GetObjectError::NoSuchKey(_)) {
                    return StoreError::NotFound(full_key.to_string());
                }
            }
            StoreError::S3(format!("get_object failed: {e}"))
        })?;

        let mut body = response.body.into_async_read();
        let mut file = tokio::fs::File::create(dest_path).await?;
        tokio::io::copy(&mut body, &mut file).await?;

        debug!("S3 GET {} -> {:?}", full_key, dest_path);
        Ok(())
    }

    #[instrument(skip(self, metadata))]
    async fn put(
        &self,
        full_key: &str,
        local_path: &Path,
        metadata: HashMap<String, String>,
    ) -> Result<(), StoreError> {
        let (bucket, key) = Self::split(full_key)?;
        let stream = ByteStream::read_from().path(local_path).build().await.map_err(|e| {
            StoreError::Other(format!("failed to open {:?} for upload: {e}", local_path))
        })?;

        let mut request = self.client.put_object().bucket(bucket).key(key).body(stream);
        for (k, v) in metadata {
            request = request.metadata(k, v);
        }
        request
            .send()
            .await
            .map_err(|e| StoreError::S3(format!("put_object failed: {e}")))?;

        debug!("S3 PUT {}", full_key);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(
        &self,
        full_key_prefix: &str,
        max_keys: u32,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        let (bucket, prefix) = match full_key_prefix.split_once('/') {
            Some((b, p)) => (b, p),
            None => (full_key_prefix, ""),
        };

        let mut request = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .max_keys(max_keys as i32);
        if let Some(token) = continuation_token {
            request = request.continuation_token(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StoreError::S3(format!("list_objects_v2 failed: {e}")))?;

        let objects = response
            .contents()
            .iter()
            .filter_map(|o| {
                Some(ListedObject {
                    key: o.key()?.to_string(),
                    size: o.size().unwrap_or(0).max(0) as u64,
                    last_modified: o
                        .last_modified()
                        .and_then(|t| chrono::DateTime::from_timestamp(t.secs(), 0)),
                    etag: o.e_tag().map(|s| s.to_string()),
                })
            })
            .collect();

        Ok(ListPage {
            objects,
            is_truncated: response.is_truncated().unwrap_or(false),
            continuation_token: response.next_continuation_token().map(|s| s.to_string()),
        })
    }

    #[instrument(skip(self))]
    async fn delete(&self, full_key: &str) -> Result<(), StoreError> {
        let (bucket, key) = Self::split(full_key)?;
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StoreError::S3(format!("delete_object failed: {e}")))?;
        Ok(())
    }

    #[instrument(skip(self, metadata))]
    async fn copy(
        &self,
        src_full_key: &str,
        dst_full_key: &str,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<(), StoreError> {
        let (dst_bucket, dst_key) = Self::split(dst_full_key)?;
        let mut request = self
            .client
            .copy_object()
            .bucket(dst_bucket)
            .key(dst_key)
            .copy_source(urlencoding::encode(src_full_key).into_owned());

        if let Some(metadata) = metadata {
            request = request.metadata_directive(aws_sdk_s3::types::MetadataDirective::Replace);
            for (k, v) in metadata {
                request = request.metadata(k, v);
            }
        }

        request
            .send()
            .await
            .map_err(|e| StoreError::S3(format!("copy_object failed: {e}")))?;
        Ok(())
    }

    fn native_client(&self) -> Option<&dyn NativeClient> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_divides_bucket_and_key() {
        let (bucket, key) = S3ObjectStore::split("my-bucket/rel/app.zip").unwrap();
        assert_eq!(bucket, "my-bucket");
        assert_eq!(key, "rel/app.zip");
    }

    #[test]
    fn split_rejects_bucket_only() {
        assert!(S3ObjectStore::split("my-bucket").is_err());
    }
}
