//! `DeltaService` — the core orchestrator. Decides whether a `put` creates
//! a reference, a delta against an existing reference, or a direct upload;
//! hydrates deltas back on `get`; and keeps delta/reference lifecycles
//! consistent on delete.

use crate::cache::ReferenceCache;
use crate::clock::Clock;
use crate::diff::DiffEngine;
use crate::error::DeltaError;
use crate::extensions::{is_delta_candidate, DEFAULT_COMPOUND_EXTENSIONS, DEFAULT_SIMPLE_EXTENSIONS};
use crate::hash::sha256_file;
use crate::metrics::MetricsSink;
use crate::store::{ObjectHead, ObjectStore};
use crate::types::{
    meta_keys, DeleteResult, DeltaMeta, DeltaSpace, DirectMeta, ObjectKey, PutOperation, PutSummary,
    ReferenceMeta, RehydratedTempMeta, VerifyResult, DELTAGLIDER_TOOL,
};
use chrono::Duration;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Default per-delta size budget: a delta larger than `max_ratio` of the
/// original file size is still stored (the caller only gets a warning),
/// matching the non-fatal `PolicyViolationWarning` in the source service.
pub const DEFAULT_MAX_RATIO: f64 = 0.5;

const TEMP_PREFIX: &str = ".deltaglider/tmp/";

pub struct DeltaService<S: ObjectStore> {
    store: Arc<S>,
    diff: Arc<dyn DiffEngine>,
    cache: Arc<dyn ReferenceCache>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
    tool_version: String,
    max_ratio: f64,
}

/// `DeltaService` with the storage backend erased, for callers that decide
/// between S3 and the in-memory adapter at runtime (the CLI does).
pub type DynDeltaService = DeltaService<Box<dyn ObjectStore>>;

impl<S: ObjectStore> DeltaService<S> {
    pub fn new(
        store: Arc<S>,
        diff: Arc<dyn DiffEngine>,
        cache: Arc<dyn ReferenceCache>,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsSink>,
        max_ratio: f64,
    ) -> Self {
        Self {
            store,
            diff,
            cache,
            clock,
            metrics,
            tool_version: DELTAGLIDER_TOOL.to_string(),
            max_ratio,
        }
    }

    fn should_use_delta(&self, filename: &str) -> bool {
        is_delta_candidate(filename, DEFAULT_SIMPLE_EXTENSIONS, DEFAULT_COMPOUND_EXTENSIONS)
    }

    /// Raw existence probe against the storage port, exposed for callers
    /// (the CLI's `get`) that need to test a key before deciding which
    /// object to fetch.
    pub async fn head(&self, bucket: &str, key: &str) -> Result<Option<ObjectHead>, DeltaError> {
        Ok(self.store.head(&format!("{bucket}/{key}")).await?)
    }

    /// Upload `local_file` as a reference, delta, or direct object,
    /// depending on its extension and whether a reference already exists
    /// in `delta_space`.
    #[instrument(skip(self, local_file))]
    pub async fn put(
        &self,
        local_file: &Path,
        delta_space: &DeltaSpace,
        max_ratio: Option<f64>,
        override_name: Option<&str>,
    ) -> Result<PutSummary, DeltaError> {
        let max_ratio = max_ratio.unwrap_or(self.max_ratio);
        let start = self.clock.now();

        let file_size = tokio::fs::metadata(local_file)
            .await
            .map_err(DeltaError::from_io)?
            .len();
        let file_sha256 = sha256_file(local_file)
            .await
            .map_err(DeltaError::from_io)?;
        let original_name = override_name
            .map(str::to_string)
            .or_else(|| local_file.file_name().map(|n| n.to_string_lossy().into_owned()))
            .ok_or_else(|| DeltaError::InvalidArgument("local_file has no file name".to_string()))?;

        info!(
            bucket = %delta_space.bucket,
            prefix = %delta_space.prefix,
            size = file_size,
            "starting put operation"
        );

        let summary = if !self.should_use_delta(&original_name) {
            debug!("uploading directly (no delta for this type)");
            self.upload_direct(local_file, delta_space, &file_sha256, &original_name, file_size)
                .await?
        } else {
            let ref_key = delta_space.reference_key();
            let full_ref_key = format!("{}/{ref_key}", delta_space.bucket);
            let ref_head = self.store.head(&full_ref_key).await?;

            match ref_head {
                None => {
                    self.create_reference(local_file, delta_space, &file_sha256, &original_name, file_size)
                        .await?
                }
                Some(ref_head) => {
                    self.create_delta(
                        local_file,
                        delta_space,
                        &ref_head,
                        &file_sha256,
                        &original_name,
                        file_size,
                        max_ratio,
                    )
                    .await?
                }
            }
        };

        let duration = (self.clock.now() - start).num_milliseconds() as f64 / 1000.0;
        self.metrics.timing("deltaglider.put.duration", duration);
        Ok(summary)
    }

    #[instrument(skip(self))]
    async fn create_reference(
        &self,
        local_file: &Path,
        delta_space: &DeltaSpace,
        file_sha256: &str,
        original_name: &str,
        file_size: u64,
    ) -> Result<PutSummary, DeltaError> {
        let ref_key = delta_space.reference_key();
        let full_ref_key = format!("{}/{ref_key}", delta_space.bucket);

        let ref_meta = ReferenceMeta {
            tool: self.tool_version.clone(),
            source_name: original_name.to_string(),
            file_sha256: file_sha256.to_string(),
            created_at: self.clock.now(),
        };

        info!(key = %ref_key, "creating reference");
        self.store.put(&full_ref_key, local_file, ref_meta.to_metadata()).await?;

        // Re-check: a concurrent writer may have raced us to this key.
        // Last writer wins on content; we bind to whatever SHA now exists.
        let ref_sha256 = match self.store.head(&full_ref_key).await? {
            Some(head) => match meta_keys::resolve(&head.metadata, meta_keys::FILE_SHA256) {
                Some(existing) if existing != file_sha256 => {
                    warn!("reference creation race detected, using existing content");
                    existing.to_string()
                }
                _ => file_sha256.to_string(),
            },
            None => file_sha256.to_string(),
        };

        self.cache.write_ref(&delta_space.bucket, &delta_space.prefix, local_file).await?;
        debug!("cached reference");

        // Zero-diff delta: encoding the reference against itself is a
        // version-identity marker, not a compression opportunity.
        let scratch = tempfile::tempdir().map_err(DeltaError::from_io)?;
        let zero_delta_path = scratch.path().join("zero.delta");
        self.diff.encode(local_file, local_file, &zero_delta_path).await?;
        let delta_size = tokio::fs::metadata(&zero_delta_path)
            .await
            .map_err(DeltaError::from_io)?
            .len();

        let delta_key = delta_space.key_for(&format!("{original_name}.delta"));
        let full_delta_key = format!("{}/{delta_key}", delta_space.bucket);

        let delta_meta = DeltaMeta {
            tool: self.tool_version.clone(),
            original_name: original_name.to_string(),
            file_sha256: file_sha256.to_string(),
            file_size,
            created_at: self.clock.now(),
            ref_key: ref_key.clone(),
            ref_sha256,
            delta_size,
            delta_cmd: self.diff.command_line("reference.bin", original_name),
            note: Some("zero-diff (reference identical)".to_string()),
        };

        info!(key = %delta_key, "creating zero-diff delta");
        self.store
            .put(&full_delta_key, &zero_delta_path, delta_meta.to_metadata())
            .await?;

        self.metrics.increment("deltaglider.reference.created");
        Ok(PutSummary {
            operation: PutOperation::CreateReference,
            bucket: delta_space.bucket.clone(),
            key: ref_key,
            original_name: original_name.to_string(),
            file_size,
            file_sha256: file_sha256.to_string(),
            delta_size: None,
            delta_ratio: None,
            ref_key: None,
            ref_sha256: None,
            cache_hit: false,
            warnings: Vec::new(),
        })
    }

    #[instrument(skip(self, ref_head))]
    #[allow(clippy::too_many_arguments)]
    async fn create_delta(
        &self,
        local_file: &Path,
        delta_space: &DeltaSpace,
        ref_head: &ObjectHead,
        file_sha256: &str,
        original_name: &str,
        file_size: u64,
        max_ratio: f64,
    ) -> Result<PutSummary, DeltaError> {
        let ref_key = delta_space.reference_key();
        let ref_sha256 = meta_keys::resolve(&ref_head.metadata, meta_keys::FILE_SHA256)
            .ok_or_else(|| DeltaError::Configuration("reference metadata missing file SHA256".to_string()))?
            .to_string();

        let cache_hit = self.cache.has_ref(&delta_space.bucket, &delta_space.prefix, &ref_sha256).await;
        if !cache_hit {
            self.cache_reference(delta_space, &ref_sha256).await?;
        }

        let scratch = tempfile::tempdir().map_err(DeltaError::from_io)?;
        let ref_path = scratch.path().join("reference.bin");
        self.cache
            .get_validated_ref(&delta_space.bucket, &delta_space.prefix, &ref_sha256, &ref_path)
            .await?;

        let delta_path = scratch.path().join("out.delta");
        self.diff.encode(&ref_path, local_file, &delta_path).await?;

        let delta_size = tokio::fs::metadata(&delta_path).await.map_err(DeltaError::from_io)?.len();
        let delta_ratio = delta_size as f64 / file_size as f64;

        let mut warnings = Vec::new();
        if delta_ratio > max_ratio {
            warn!(ratio = delta_ratio, threshold = max_ratio, "delta ratio exceeds threshold");
            warnings.push(format!(
                "delta ratio {delta_ratio:.2} exceeds threshold {max_ratio}"
            ));
        }

        let delta_key = delta_space.key_for(&format!("{original_name}.delta"));
        let full_delta_key = format!("{}/{delta_key}", delta_space.bucket);

        let delta_meta = DeltaMeta {
            tool: self.tool_version.clone(),
            original_name: original_name.to_string(),
            file_sha256: file_sha256.to_string(),
            file_size,
            created_at: self.clock.now(),
            ref_key: ref_key.clone(),
            ref_sha256: ref_sha256.clone(),
            delta_size,
            delta_cmd: self.diff.command_line("reference.bin", original_name),
            note: None,
        };

        info!(key = %delta_key, ratio = delta_ratio, "creating delta");
        self.store.put(&full_delta_key, &delta_path, delta_meta.to_metadata()).await?;

        self.metrics.increment("deltaglider.delta.created");
        self.metrics.gauge("deltaglider.delta.ratio", delta_ratio);

        Ok(PutSummary {
            operation: PutOperation::CreateDelta,
            bucket: delta_space.bucket.clone(),
            key: delta_key,
            original_name: original_name.to_string(),
            file_size,
            file_sha256: file_sha256.to_string(),
            delta_size: Some(delta_size),
            delta_ratio: Some(delta_ratio),
            ref_key: Some(ref_key),
            ref_sha256: Some(ref_sha256),
            cache_hit,
            warnings,
        })
    }

    #[instrument(skip(self))]
    async fn cache_reference(&self, delta_space: &DeltaSpace, expected_sha: &str) -> Result<(), DeltaError> {
        let full_ref_key = delta_space.full_reference_key();
        info!(key = %delta_space.reference_key(), "caching reference");

        let tmp = tempfile::NamedTempFile::new().map_err(DeltaError::from_io)?;
        self.store.get(&full_ref_key, tmp.path()).await?;

        let actual_sha = sha256_file(tmp.path()).await.map_err(DeltaError::from_io)?;
        if actual_sha != expected_sha {
            return Err(DeltaError::IntegrityMismatch {
                key: full_ref_key,
                expected: expected_sha.to_string(),
                actual: actual_sha,
            });
        }

        self.cache.write_ref(&delta_space.bucket, &delta_space.prefix, tmp.path()).await?;
        Ok(())
    }

    async fn upload_direct(
        &self,
        local_file: &Path,
        delta_space: &DeltaSpace,
        file_sha256: &str,
        original_name: &str,
        file_size: u64,
    ) -> Result<PutSummary, DeltaError> {
        let key = delta_space.key_for(original_name);
        let full_key = format!("{}/{key}", delta_space.bucket);

        let meta = DirectMeta {
            tool: self.tool_version.clone(),
            original_name: original_name.to_string(),
            file_sha256: file_sha256.to_string(),
            file_size,
            created_at: self.clock.now(),
        };

        info!(key = %key, "uploading directly");
        self.store.put(&full_key, local_file, meta.to_metadata()).await?;
        self.metrics.increment("deltaglider.direct.uploaded");

        Ok(PutSummary {
            operation: PutOperation::UploadDirect,
            bucket: delta_space.bucket.clone(),
            key,
            original_name: original_name.to_string(),
            file_size,
            file_sha256: file_sha256.to_string(),
            delta_size: None,
            delta_ratio: None,
            ref_key: None,
            ref_sha256: None,
            cache_hit: false,
            warnings: Vec::new(),
        })
    }

    /// Download and (if needed) hydrate `object_key` to `out_path`.
    #[instrument(skip(self))]
    pub async fn get(&self, object_key: &ObjectKey, out_path: &Path) -> Result<(), DeltaError> {
        let start = self.clock.now();
        info!(key = %object_key.key, "starting get operation");

        let obj_head = self
            .store
            .head(&object_key.full_key())
            .await?
            .ok_or_else(|| DeltaError::NotFound(object_key.key.clone()))?;

        if meta_keys::resolve(&obj_head.metadata, meta_keys::FILE_SHA256).is_none() {
            // Foreign object: no DeltaGlider metadata at all, pass through.
            debug!("downloading foreign object (no DeltaGlider metadata)");
            self.get_direct(object_key, &obj_head, out_path).await?;
            let duration = (self.clock.now() - start).num_milliseconds() as f64 / 1000.0;
            self.metrics.timing("deltaglider.get.duration", duration);
            return Ok(());
        }

        if meta_keys::resolve(&obj_head.metadata, meta_keys::COMPRESSION) == Some("none") {
            self.get_direct(object_key, &obj_head, out_path).await?;
            let duration = (self.clock.now() - start).num_milliseconds() as f64 / 1000.0;
            self.metrics.timing("deltaglider.get.duration", duration);
            return Ok(());
        }

        let delta_meta = DeltaMeta::from_metadata(&obj_head.metadata)
            .ok_or_else(|| DeltaError::Configuration("delta object missing required metadata".to_string()))?;

        let deltaspace_prefix = match delta_meta.ref_key.rfind('/') {
            Some(idx) => delta_meta.ref_key[..idx].to_string(),
            None => String::new(),
        };
        let delta_space = DeltaSpace::new(object_key.bucket.clone(), deltaspace_prefix);

        let cache_hit = self
            .cache
            .has_ref(&delta_space.bucket, &delta_space.prefix, &delta_meta.ref_sha256)
            .await;
        if !cache_hit {
            self.cache_reference(&delta_space, &delta_meta.ref_sha256).await?;
        }

        let scratch = tempfile::tempdir().map_err(DeltaError::from_io)?;
        let ref_path = scratch.path().join("reference.bin");
        // SECURITY: validated ref copy guards against TOCTOU races on the cache.
        self.cache
            .get_validated_ref(&delta_space.bucket, &delta_space.prefix, &delta_meta.ref_sha256, &ref_path)
            .await?;

        let delta_path = scratch.path().join("delta");
        self.store.get(&object_key.full_key(), &delta_path).await?;

        self.diff.decode(&ref_path, &delta_path, out_path).await?;

        let actual_sha = sha256_file(out_path).await.map_err(DeltaError::from_io)?;
        if actual_sha != delta_meta.file_sha256 {
            return Err(DeltaError::IntegrityMismatch {
                key: object_key.key.clone(),
                expected: delta_meta.file_sha256,
                actual: actual_sha,
            });
        }

        let duration = (self.clock.now() - start).num_milliseconds() as f64 / 1000.0;
        self.metrics.timing("deltaglider.get.duration", duration);
        Ok(())
    }

    async fn get_direct(&self, object_key: &ObjectKey, obj_head: &ObjectHead, out_path: &Path) -> Result<(), DeltaError> {
        self.store.get(&object_key.full_key(), out_path).await?;

        if let Some(expected_sha) = meta_keys::resolve(&obj_head.metadata, meta_keys::FILE_SHA256) {
            let actual_sha = sha256_file(out_path).await.map_err(DeltaError::from_io)?;
            if actual_sha != expected_sha {
                return Err(DeltaError::IntegrityMismatch {
                    key: object_key.key.clone(),
                    expected: expected_sha.to_string(),
                    actual: actual_sha,
                });
            }
        }
        Ok(())
    }

    /// Re-download and re-hydrate `delta_key`, confirming its stored SHA256
    /// still matches the reconstructed bytes.
    #[instrument(skip(self))]
    pub async fn verify(&self, delta_key: &ObjectKey) -> Result<VerifyResult, DeltaError> {
        let start = self.clock.now();
        info!(key = %delta_key.key, "starting verify operation");

        let scratch = tempfile::tempdir().map_err(DeltaError::from_io)?;
        let out_path = scratch.path().join("output");
        self.get(delta_key, &out_path).await?;

        let delta_head = self
            .store
            .head(&delta_key.full_key())
            .await?
            .ok_or_else(|| DeltaError::NotFound(delta_key.key.clone()))?;
        let delta_meta = DeltaMeta::from_metadata(&delta_head.metadata)
            .ok_or_else(|| DeltaError::Configuration("delta object missing required metadata".to_string()))?;

        let actual_sha256 = sha256_file(&out_path).await.map_err(DeltaError::from_io)?;
        let valid = actual_sha256 == delta_meta.file_sha256;

        let duration = (self.clock.now() - start).num_milliseconds() as f64 / 1000.0;
        self.metrics.timing("deltaglider.verify.duration", duration);

        Ok(VerifyResult {
            valid,
            expected_sha256: delta_meta.file_sha256,
            actual_sha256,
            message: if valid {
                "integrity verified".to_string()
            } else {
                "integrity check failed".to_string()
            },
        })
    }

    /// Delete-aware of the reference/delta/direct relationship: deleting a
    /// reference checks for dependent deltas first, deleting the last
    /// delta in a deltaspace cleans up the now-orphaned reference.
    #[instrument(skip(self))]
    pub async fn delete(&self, object_key: &ObjectKey) -> Result<DeleteResult, DeltaError> {
        let start = self.clock.now();
        let full_key = object_key.full_key();
        info!(key = %object_key.key, "starting delete operation");

        let obj_head = self
            .store
            .head(&full_key)
            .await?
            .ok_or_else(|| DeltaError::NotFound(object_key.key.clone()))?;

        let mut result = DeleteResult::new(object_key.bucket.clone(), object_key.key.clone());

        if object_key.key.ends_with("/reference.bin") || object_key.key == "reference.bin" {
            self.delete_reference(object_key, &full_key, &mut result).await?;
        } else if object_key.key.ends_with(".delta") {
            self.delete_delta(object_key, &full_key, &obj_head, &mut result).await?;
        } else if meta_keys::resolve(&obj_head.metadata, meta_keys::COMPRESSION) == Some("none") {
            self.store.delete(&full_key).await?;
            result.deleted = true;
            result.object_type = "direct".to_string();
            result.original_name = meta_keys::resolve(&obj_head.metadata, meta_keys::ORIGINAL_NAME)
                .map(|s| s.to_string())
                .or_else(|| Some(object_key.key.clone()));
        } else {
            self.store.delete(&full_key).await?;
            result.deleted = true;
            result.object_type = "unknown".to_string();
        }

        let duration = (self.clock.now() - start).num_milliseconds() as f64 / 1000.0;
        self.metrics.timing("deltaglider.delete.duration", duration);
        self.metrics.increment(&format!("deltaglider.delete.{}", result.object_type));
        Ok(result)
    }

    async fn delete_reference(&self, object_key: &ObjectKey, full_key: &str, result: &mut DeleteResult) -> Result<(), DeltaError> {
        let prefix = match object_key.key.rfind('/') {
            Some(idx) => &object_key.key[..idx],
            None => "",
        };

        let listing_prefix = if prefix.is_empty() {
            object_key.bucket.clone()
        } else {
            format!("{}/{prefix}", object_key.bucket)
        };
        let objects = crate::store::list_all(self.store.as_ref(), &listing_prefix, 10_000).await?;

        let mut dependent_deltas = Vec::new();
        for obj in &objects {
            if obj.key.ends_with(".delta") && obj.key != object_key.key {
                if let Some(delta_head) = self.store.head(&format!("{}/{}", object_key.bucket, obj.key)).await? {
                    if meta_keys::resolve(&delta_head.metadata, meta_keys::REF_KEY) == Some(object_key.key.as_str()) {
                        dependent_deltas.push(obj.key.clone());
                    }
                }
            }
        }

        if !dependent_deltas.is_empty() {
            warn!(ref_key = %object_key.key, count = dependent_deltas.len(), "reference has dependent deltas");
            result.warnings.push(format!(
                "reference has {} dependent delta(s); deleting it will make those deltas unrecoverable",
                dependent_deltas.len()
            ));
        }

        self.store.delete(full_key).await?;
        result.deleted = true;
        result.object_type = "reference".to_string();
        result.dependent_deltas = dependent_deltas.len();

        if !prefix.is_empty() {
            self.cache.evict(&object_key.bucket, prefix).await;
        }
        Ok(())
    }

    async fn delete_delta(
        &self,
        object_key: &ObjectKey,
        full_key: &str,
        obj_head: &ObjectHead,
        result: &mut DeleteResult,
    ) -> Result<(), DeltaError> {
        self.store.delete(full_key).await?;
        result.deleted = true;
        result.object_type = "delta".to_string();
        result.original_name = Some(
            meta_keys::resolve(&obj_head.metadata, meta_keys::ORIGINAL_NAME)
                .unwrap_or("unknown")
                .to_string(),
        );

        let Some(idx) = object_key.key.rfind('/') else {
            return Ok(());
        };
        let deltaspace_prefix = &object_key.key[..idx];
        let ref_key = format!("{deltaspace_prefix}/reference.bin");

        let listing_prefix = format!("{}/{deltaspace_prefix}", object_key.bucket);
        let objects = crate::store::list_all(self.store.as_ref(), &listing_prefix, 10_000).await?;
        let remaining_deltas = objects
            .iter()
            .filter(|o| o.key.ends_with(".delta") && o.key != object_key.key)
            .count();

        if remaining_deltas == 0 {
            let ref_full_key = format!("{}/{ref_key}", object_key.bucket);
            if self.store.head(&ref_full_key).await?.is_some() {
                self.store.delete(&ref_full_key).await?;
                info!(ref_key = %ref_key, "cleaned up orphaned reference.bin");
                result.cleaned_reference = Some(ref_key);
                self.cache.evict(&object_key.bucket, deltaspace_prefix).await;
            }
        }
        Ok(())
    }

    /// Delete everything under `bucket/prefix`, deleting non-reference
    /// objects first and references last, keeping a reference if a file
    /// outside the deletion scope still depends on it.
    #[instrument(skip(self))]
    pub async fn delete_recursive(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<crate::types::RecursiveDeleteResult, DeltaError> {
        let start = self.clock.now();
        let prefix = prefix.to_string();
        info!(bucket, prefix = %prefix, "starting recursive delete");

        let (mut references, deltas, direct_uploads, other_objects, affected_deltaspaces) =
            self.classify_objects_for_deletion(bucket, &prefix).await?;

        for ds_prefix in &affected_deltaspaces {
            let ref_key = format!("{ds_prefix}/reference.bin");
            if !references.contains(&ref_key) && self.store.head(&format!("{bucket}/{ref_key}")).await?.is_some() {
                references.push(ref_key);
            }
        }

        let mut result = crate::types::RecursiveDeleteResult {
            bucket: bucket.to_string(),
            prefix: prefix.clone(),
            deltas_deleted: deltas.len(),
            references_deleted: references.len(),
            direct_deleted: direct_uploads.len(),
            other_deleted: other_objects.len(),
            ..Default::default()
        };

        for key in other_objects.iter().chain(direct_uploads.iter()).chain(deltas.iter()) {
            match self.store.delete(&format!("{bucket}/{key}")).await {
                Ok(()) => {
                    result.deleted_count += 1;
                    debug!(key = %key, "deleted");
                }
                Err(e) => {
                    result.failed_count += 1;
                    result.errors.push(format!("failed to delete {key}: {e}"));
                }
            }
        }

        let kept = self.delete_references_if_safe(bucket, &prefix, &references, &mut result).await?;
        result.references_deleted -= kept;

        if !references.is_empty() {
            self.cache.evict(bucket, prefix.trim_end_matches('/')).await;
        }

        let duration = (self.clock.now() - start).num_milliseconds() as f64 / 1000.0;
        info!(deleted = result.deleted_count, failed = result.failed_count, "recursive delete complete");
        self.metrics.timing("deltaglider.delete_recursive.duration", duration);
        self.metrics.increment("deltaglider.delete_recursive.completed");

        Ok(result)
    }

    #[allow(clippy::type_complexity)]
    async fn classify_objects_for_deletion(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<(Vec<String>, Vec<String>, Vec<String>, Vec<String>, HashSet<String>), DeltaError> {
        let listing_prefix = if prefix.is_empty() { bucket.to_string() } else { format!("{bucket}/{prefix}") };
        let objects = crate::store::list_all(self.store.as_ref(), &listing_prefix, 10_000).await?;

        let mut references = Vec::new();
        let mut deltas = Vec::new();
        let mut direct_uploads = Vec::new();
        let mut other_objects = Vec::new();
        let mut affected_deltaspaces = HashSet::new();

        for obj in objects {
            if !prefix.is_empty() && !obj.key.starts_with(prefix) {
                continue;
            }

            if obj.key.ends_with("/reference.bin") {
                references.push(obj.key);
            } else if obj.key.ends_with(".delta") {
                if let Some(idx) = obj.key.rfind('/') {
                    affected_deltaspaces.insert(obj.key[..idx].to_string());
                }
                deltas.push(obj.key);
            } else {
                match self.store.head(&format!("{bucket}/{}", obj.key)).await? {
                    Some(head) if meta_keys::resolve(&head.metadata, meta_keys::COMPRESSION) == Some("none") => {
                        direct_uploads.push(obj.key);
                    }
                    _ => other_objects.push(obj.key),
                }
            }
        }

        Ok((references, deltas, direct_uploads, other_objects, affected_deltaspaces))
    }

    async fn delete_references_if_safe(
        &self,
        bucket: &str,
        prefix: &str,
        references: &[String],
        result: &mut crate::types::RecursiveDeleteResult,
    ) -> Result<usize, DeltaError> {
        let mut kept = 0;
        let deletion_prefix_full = if prefix.is_empty() { bucket.to_string() } else { format!("{bucket}/{prefix}") };

        for ref_key in references {
            let deltaspace_prefix = ref_key.strip_suffix("/reference.bin").unwrap_or("");
            let listing_prefix = if deltaspace_prefix.is_empty() { bucket.to_string() } else { format!("{bucket}/{deltaspace_prefix}") };

            let listed = match crate::store::list_all(self.store.as_ref(), &listing_prefix, 10_000).await {
                Ok(listed) => listed,
                Err(e) => {
                    result.failed_count += 1;
                    result.errors.push(format!("failed to delete reference {ref_key}: {e}"));
                    continue;
                }
            };

            let has_remaining_files = listed.iter().any(|obj| {
                let full = format!("{bucket}/{}", obj.key);
                !(!prefix.is_empty() && full.starts_with(&deletion_prefix_full)) && obj.key != *ref_key
            });

            if has_remaining_files {
                kept += 1;
                result.warnings.push(format!("kept reference {ref_key} (still in use)"));
                continue;
            }

            match self.store.delete(&format!("{bucket}/{ref_key}")).await {
                Ok(()) => {
                    result.deleted_count += 1;
                    debug!(ref_key = %ref_key, "deleted reference");
                }
                Err(e) => {
                    result.failed_count += 1;
                    result.errors.push(format!("failed to delete reference {ref_key}: {e}"));
                }
            }
        }

        Ok(kept)
    }

    /// Decompress a delta-compressed object and re-upload it under
    /// `.deltaglider/tmp/` with expiration metadata, for callers that need
    /// a plain presignable object. Returns `None` if `key` is not a
    /// DeltaGlider object.
    #[instrument(skip(self))]
    pub async fn rehydrate_for_download(
        &self,
        bucket: &str,
        key: &str,
        expires_in_seconds: i64,
    ) -> Result<Option<String>, DeltaError> {
        let start = self.clock.now();

        let mut key = key.to_string();
        let mut obj_head = self.store.head(&format!("{bucket}/{key}")).await?;
        if obj_head.is_none() && !key.ends_with(".delta") {
            let delta_key = format!("{key}.delta");
            if let Some(head) = self.store.head(&format!("{bucket}/{delta_key}")).await? {
                obj_head = Some(head);
                key = delta_key;
            }
        }

        let obj_head = obj_head.ok_or_else(|| DeltaError::NotFound(key.clone()))?;
        let is_delta = key.ends_with(".delta");
        let has_dg_metadata = meta_keys::resolve(&obj_head.metadata, meta_keys::FILE_SHA256).is_some();

        if !is_delta && !has_dg_metadata {
            debug!(key = %key, "not a DeltaGlider object, skipping rehydration");
            return Ok(None);
        }

        let original_name = key.strip_suffix(".delta").unwrap_or(&key).to_string();
        let leaf = Path::new(&original_name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| original_name.clone());
        let temp_filename = format!("{}_{}", Uuid::new_v4().simple(), leaf);
        let temp_key = format!("{TEMP_PREFIX}{temp_filename}");

        let scratch = tempfile::tempdir().map_err(DeltaError::from_io)?;
        let decompressed_path = scratch.path().join("decompressed");
        let object_key = ObjectKey::new(bucket, key.clone());
        self.get(&object_key, &decompressed_path).await?;

        let expires_at = self.clock.now() + Duration::seconds(expires_in_seconds);
        let meta = RehydratedTempMeta {
            expires_at,
            original_key: key.clone(),
            original_filename: leaf,
            created_at: self.clock.now(),
        };

        info!(original_key = %key, temp_key = %temp_key, "uploading rehydrated file");
        self.store
            .put(&format!("{bucket}/{temp_key}"), &decompressed_path, meta.to_metadata())
            .await?;

        let duration = (self.clock.now() - start).num_milliseconds() as f64 / 1000.0;
        self.metrics.timing("deltaglider.rehydrate.duration", duration);
        self.metrics.increment("deltaglider.rehydrate.completed");

        Ok(Some(temp_key))
    }

    /// Delete expired objects under `.deltaglider/tmp/`, based on each
    /// object's `dg-expires-at` metadata.
    #[instrument(skip(self))]
    pub async fn purge_temp_files(&self, bucket: &str) -> Result<crate::types::PurgeResult, DeltaError> {
        let start = self.clock.now();
        info!(bucket, prefix = TEMP_PREFIX, "starting temp file purge");

        let mut deleted_count = 0u64;
        let mut expired_count = 0u64;
        let mut error_count = 0u64;
        let mut total_size_freed = 0u64;
        let mut errors = Vec::new();

        let listing_prefix = format!("{bucket}/{TEMP_PREFIX}");
        let objects = crate::store::list_all(self.store.as_ref(), &listing_prefix, 10_000).await?;

        for obj in objects {
            if !obj.key.starts_with(TEMP_PREFIX) {
                continue;
            }

            let obj_head = match self.store.head(&format!("{bucket}/{}", obj.key)).await {
                Ok(Some(head)) => head,
                Ok(None) => continue,
                Err(e) => {
                    error_count += 1;
                    errors.push(format!("error processing {}: {e}", obj.key));
                    continue;
                }
            };

            let Some(expires_at_str) = meta_keys::resolve(&obj_head.metadata, meta_keys::EXPIRES_AT) else {
                continue;
            };

            let expires_at = match chrono::DateTime::parse_from_rfc3339(expires_at_str) {
                Ok(dt) => dt.with_timezone(&chrono::Utc),
                Err(_) => {
                    warn!(key = %obj.key, value = expires_at_str, "invalid expiration format");
                    continue;
                }
            };

            if self.clock.now() >= expires_at {
                expired_count += 1;
                match self.store.delete(&format!("{bucket}/{}", obj.key)).await {
                    Ok(()) => {
                        deleted_count += 1;
                        total_size_freed += obj.size;
                        debug!(key = %obj.key, "deleted expired temp file");
                    }
                    Err(e) => {
                        error_count += 1;
                        errors.push(format!("error processing {}: {e}", obj.key));
                    }
                }
            }
        }

        let duration = (self.clock.now() - start).num_milliseconds() as f64 / 1000.0;
        info!(deleted = deleted_count, size_freed = total_size_freed, "temp file purge complete");
        self.metrics.timing("deltaglider.purge.duration", duration);
        self.metrics.gauge("deltaglider.purge.deleted_count", deleted_count as f64);
        self.metrics.gauge("deltaglider.purge.size_freed", total_size_freed as f64);

        Ok(crate::types::PurgeResult {
            bucket: bucket.to_string(),
            prefix: TEMP_PREFIX.to_string(),
            deleted_count,
            expired_count,
            error_count,
            total_size_freed,
            duration_seconds: duration,
            errors,
        })
    }
}

impl DynDeltaService {
    /// Wire a service from [`crate::config::Config`]: S3 storage, the
    /// `xdelta3` CLI engine, and whichever cache/metrics backend the config
    /// names.
    pub async fn from_config(config: &crate::config::Config) -> Self {
        use crate::cache::{FilesystemReferenceCache, MemoryReferenceCache, ReferenceCache};
        use crate::config::{CacheBackend, MetricsBackend};
        use crate::metrics::{CloudWatchMetrics, LoggingMetrics, MetricsSink, NoopMetrics};
        use crate::store::{S3Config, S3ObjectStore};
        use aws_config::BehaviorVersion;

        let store: Box<dyn ObjectStore> = Box::new(
            S3ObjectStore::new(S3Config {
                endpoint_url: config.endpoint_url.clone(),
                region: config.region.clone(),
                profile: config.profile.clone(),
                force_path_style: config.force_path_style,
            })
            .await,
        );

        let cache: Arc<dyn ReferenceCache> = match config.cache_backend {
            CacheBackend::Filesystem => Arc::new(FilesystemReferenceCache::new(config.cache_dir.clone())),
            CacheBackend::Memory => Arc::new(MemoryReferenceCache::new(config.cache_memory_size_mb)),
        };

        let metrics: Arc<dyn MetricsSink> = match config.metrics {
            MetricsBackend::Noop => Arc::new(NoopMetrics),
            MetricsBackend::Logging => Arc::new(LoggingMetrics::new(config.metrics_namespace.clone())),
            MetricsBackend::Cloudwatch => {
                let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
                let client = aws_sdk_cloudwatch::Client::new(&sdk_config);
                Arc::new(CloudWatchMetrics::new(client, config.metrics_namespace.clone()))
            }
        };

        Self::new(
            Arc::new(store),
            Arc::new(crate::diff::Xdelta3Engine::default()),
            cache,
            Arc::new(crate::clock::UtcClock),
            metrics,
            config.max_ratio,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::FixedClock;
    use crate::diff::DiffError;
    use crate::metrics::NoopMetrics;
    use crate::cache::MemoryReferenceCache;
    use crate::store::MemoryObjectStore;
    use async_trait::async_trait;
    use chrono::Utc;

    /// Fake diff engine: "encodes" by copying the target (or, if it equals
    /// the reference byte-for-byte, an empty marker) so tests don't need
    /// the real `xdelta3` binary.
    struct FakeDiffEngine;

    #[async_trait]
    impl DiffEngine for FakeDiffEngine {
        async fn encode(&self, reference_path: &Path, target_path: &Path, out_delta_path: &Path) -> Result<(), DiffError> {
            let reference = tokio::fs::read(reference_path).await?;
            let target = tokio::fs::read(target_path).await?;
            if reference == target {
                tokio::fs::write(out_delta_path, []).await?;
            } else {
                tokio::fs::write(out_delta_path, target).await?;
            }
            Ok(())
        }

        async fn decode(&self, reference_path: &Path, delta_path: &Path, out_path: &Path) -> Result<(), DiffError> {
            let delta = tokio::fs::read(delta_path).await?;
            if delta.is_empty() {
                tokio::fs::copy(reference_path, out_path).await?;
            } else {
                tokio::fs::write(out_path, delta).await?;
            }
            Ok(())
        }

        fn command_line(&self, reference_name: &str, original_name: &str) -> String {
            format!("xdelta3 -e -9 -s {reference_name} {original_name} {original_name}.delta")
        }
    }

    async fn test_service() -> (DeltaService<MemoryObjectStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let service = DeltaService::new(
            Arc::new(MemoryObjectStore::new()),
            Arc::new(FakeDiffEngine),
            Arc::new(MemoryReferenceCache::new(100)),
            Arc::new(FixedClock::new(Utc::now())),
            Arc::new(NoopMetrics),
            DEFAULT_MAX_RATIO,
        );
        (service, dir)
    }

    async fn write_temp(dir: &Path, name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        tokio::fs::write(&path, data).await.unwrap();
        path
    }

    #[tokio::test]
    async fn first_put_creates_reference_and_zero_diff_delta() {
        let (service, dir) = test_service().await;
        let file = write_temp(dir.path(), "app.zip", b"version one payload").await;
        let space = DeltaSpace::new("bucket", "releases");

        let summary = service.put(&file, &space, None, None).await.unwrap();
        assert_eq!(summary.operation, PutOperation::CreateReference);
        assert_eq!(summary.key, "releases/reference.bin");

        let delta_head = service
            .store
            .head("bucket/releases/app.zip.delta")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            meta_keys::resolve(&delta_head.metadata, meta_keys::NOTE),
            Some("zero-diff (reference identical)")
        );
    }

    #[tokio::test]
    async fn second_version_creates_delta_against_reference() {
        let (service, dir) = test_service().await;
        let space = DeltaSpace::new("bucket", "releases");

        let v1 = write_temp(dir.path(), "app-v1.zip", b"version one payload").await;
        service.put(&v1, &space, None, Some("app.zip")).await.unwrap();

        let v2 = write_temp(dir.path(), "app-v2.zip", b"version two payload, larger").await;
        let summary = service.put(&v2, &space, None, Some("app.zip")).await.unwrap();

        assert_eq!(summary.operation, PutOperation::CreateDelta);
        assert_eq!(summary.key, "releases/app.zip.delta");
        assert!(summary.ref_sha256.is_some());
    }

    #[tokio::test]
    async fn non_candidate_extension_uploads_directly() {
        let (service, dir) = test_service().await;
        let file = write_temp(dir.path(), "notes.txt", b"plain text content").await;
        let space = DeltaSpace::new("bucket", "docs");

        let summary = service.put(&file, &space, None, None).await.unwrap();
        assert_eq!(summary.operation, PutOperation::UploadDirect);
        assert_eq!(summary.key, "docs/notes.txt");
    }

    #[tokio::test]
    async fn get_roundtrips_through_delta() {
        let (service, dir) = test_service().await;
        let space = DeltaSpace::new("bucket", "releases");

        let v1 = write_temp(dir.path(), "app-v1.zip", b"version one payload").await;
        service.put(&v1, &space, None, Some("app.zip")).await.unwrap();
        let v2 = write_temp(dir.path(), "app-v2.zip", b"version two payload, larger").await;
        service.put(&v2, &space, None, Some("app.zip")).await.unwrap();

        let out = dir.path().join("downloaded");
        service
            .get(&ObjectKey::new("bucket", "releases/app.zip.delta"), &out)
            .await
            .unwrap();
        assert_eq!(tokio::fs::read(&out).await.unwrap(), b"version two payload, larger");
    }

    #[tokio::test]
    async fn get_on_foreign_object_passes_through() {
        let (service, dir) = test_service().await;
        let local = write_temp(dir.path(), "plain", b"not uploaded via deltaglider").await;
        service
            .store
            .put("bucket/foreign.bin", &local, std::collections::HashMap::new())
            .await
            .unwrap();

        let out = dir.path().join("out");
        service.get(&ObjectKey::new("bucket", "foreign.bin"), &out).await.unwrap();
        assert_eq!(tokio::fs::read(&out).await.unwrap(), b"not uploaded via deltaglider");
    }

    #[tokio::test]
    async fn deleting_last_delta_cleans_up_reference() {
        let (service, dir) = test_service().await;
        let space = DeltaSpace::new("bucket", "releases");
        let v1 = write_temp(dir.path(), "app.zip", b"payload").await;
        service.put(&v1, &space, None, None).await.unwrap();

        let result = service
            .delete(&ObjectKey::new("bucket", "releases/app.zip.delta"))
            .await
            .unwrap();
        assert_eq!(result.object_type, "delta");
        assert_eq!(result.cleaned_reference.as_deref(), Some("releases/reference.bin"));

        assert!(service.store.head("bucket/releases/reference.bin").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recursive_delete_keeps_reference_still_used_outside_scope() {
        let (service, dir) = test_service().await;
        let space = DeltaSpace::new("bucket", "shared");
        let v1 = write_temp(dir.path(), "a.zip", b"alpha payload").await;
        service.put(&v1, &space, None, Some("a.zip")).await.unwrap();
        let v2 = write_temp(dir.path(), "b.zip", b"beta payload, different").await;
        service.put(&v2, &space, None, Some("b.zip")).await.unwrap();

        // Delete only a.zip.delta, leaving b.zip.delta (and therefore the
        // shared reference) untouched.
        let result = service.delete_recursive("bucket", "shared/a.zip.delta").await.unwrap();
        assert_eq!(result.deltas_deleted, 1);
        assert!(service.store.head("bucket/shared/b.zip.delta").await.unwrap().is_some());
        assert!(service.store.head("bucket/shared/reference.bin").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn recursive_delete_actually_removes_the_targeted_delta() {
        let (service, dir) = test_service().await;
        let space = DeltaSpace::new("bucket", "shared");
        let v1 = write_temp(dir.path(), "a.zip", b"alpha payload").await;
        service.put(&v1, &space, None, Some("a.zip")).await.unwrap();
        let v2 = write_temp(dir.path(), "b.zip", b"beta payload, different").await;
        service.put(&v2, &space, None, Some("b.zip")).await.unwrap();

        service.delete_recursive("bucket", "shared/a.zip.delta").await.unwrap();
        assert!(service.store.head("bucket/shared/a.zip.delta").await.unwrap().is_none());
    }
}
