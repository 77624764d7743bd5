//! Bucket statistics aggregator: a paginated, partial-failure-tolerant scan
//! that reports compression metrics across every object under a bucket.

use crate::store::{list_all, ObjectStore};
use crate::types::{meta_keys, BucketStats};
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tracing::{error, instrument, warn};

const MAX_PAGES: usize = 10_000;
const TOTAL_BUDGET: Duration = Duration::from_secs(600);
const PER_HEAD_TIMEOUT: Duration = Duration::from_secs(60);
const PER_RESULT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_CONCURRENT_HEADS: usize = 10;

/// Scan `bucket`, optionally heading every `*.delta` object (`detailed_stats`)
/// to recover its original (pre-delta) size from metadata.
#[instrument(skip(store))]
pub async fn bucket_stats(store: &dyn ObjectStore, bucket: &str, detailed_stats: bool) -> BucketStats {
    let deadline = tokio::time::Instant::now() + TOTAL_BUDGET;

    let objects = match list_with_bounds(store, bucket, deadline).await {
        Ok(objects) => objects,
        Err(warning) => {
            error!("{warning}");
            let mut stats = BucketStats::default();
            stats.warnings.push(warning);
            return stats;
        }
    };

    if objects.is_empty() {
        return BucketStats::default();
    }

    let mut reference_keys = Vec::new();
    let mut delta_keys = Vec::new();
    let mut direct_sizes = Vec::new();
    let mut warnings = Vec::new();

    for obj in &objects {
        if obj.key.ends_with("/reference.bin") || obj.key == "reference.bin" {
            reference_keys.push(obj.clone());
        } else if obj.key.ends_with(".delta") {
            delta_keys.push(obj.clone());
        } else {
            direct_sizes.push(obj.clone());
        }
    }

    let delta_heads = if detailed_stats {
        head_deltas_bounded(store, bucket, &delta_keys, deadline).await
    } else {
        Vec::new()
    };

    let mut object_count = objects.len() as u64;
    let mut total_size = 0u64;
    let mut compressed_size = 0u64;
    let mut delta_objects = 0u64;
    let mut direct_objects = 0u64;
    let mut any_delta_references_ref = false;
    let reference_size: u64 = reference_keys.iter().map(|obj| obj.size).sum();

    for (idx, obj) in delta_keys.iter().enumerate() {
        delta_objects += 1;
        compressed_size += obj.size;

        let head = delta_heads.get(idx).and_then(|h| h.as_ref());
        match head.and_then(|h| meta_keys::resolve(&h.metadata, meta_keys::FILE_SIZE)) {
            Some(size_str) => match size_str.parse::<u64>() {
                Ok(size) => total_size += size,
                Err(_) => {
                    total_size += obj.size;
                    warnings.push(format!("invalid file_size metadata for {}", obj.key));
                }
            },
            None => {
                total_size += obj.size;
                if detailed_stats {
                    warnings.push(format!("original size unknown for {}, falling back to compressed size", obj.key));
                }
            }
        }

        if head
            .and_then(|h| meta_keys::resolve(&h.metadata, meta_keys::REF_KEY))
            .is_some()
        {
            any_delta_references_ref = true;
        }
    }

    // Without detailed heads we can't confirm reference usage; assume the
    // deltaspace relationship holds rather than warn on every scan.
    if !detailed_stats && !delta_keys.is_empty() {
        any_delta_references_ref = true;
    }

    if !reference_keys.is_empty() && !any_delta_references_ref {
        warnings.push("references exist with no confirmed dependent deltas — possible orphaned storage".to_string());
    } else if any_delta_references_ref {
        compressed_size += reference_size;
    }

    for obj in &direct_sizes {
        direct_objects += 1;
        total_size += obj.size;
        compressed_size += obj.size;
    }

    object_count = object_count.max(reference_keys.len() as u64 + delta_objects + direct_objects);

    let space_saved = total_size.saturating_sub(compressed_size);
    let average_compression_ratio = if total_size > 0 {
        space_saved as f64 / total_size as f64
    } else {
        0.0
    };

    BucketStats {
        object_count,
        total_size,
        compressed_size,
        space_saved,
        average_compression_ratio,
        delta_objects,
        direct_objects,
        warnings,
    }
}

async fn list_with_bounds(
    store: &dyn ObjectStore,
    bucket: &str,
    deadline: tokio::time::Instant,
) -> Result<Vec<crate::store::ListedObject>, String> {
    match tokio::time::timeout_at(deadline, list_all(store, bucket, MAX_PAGES)).await {
        Ok(Ok(objects)) => Ok(objects),
        Ok(Err(e)) => Err(format!("bucket listing failed: {e}")),
        Err(_) => Err("bucket listing exceeded the 10-minute budget".to_string()),
    }
}

async fn head_deltas_bounded(
    store: &dyn ObjectStore,
    bucket: &str,
    deltas: &[crate::store::ListedObject],
    deadline: tokio::time::Instant,
) -> Vec<Option<crate::store::ObjectHead>> {
    let results = stream::iter(deltas.iter().map(|obj| {
        let full_key = format!("{bucket}/{}", obj.key);
        async move {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let budget = PER_HEAD_TIMEOUT.min(remaining);
            match tokio::time::timeout(budget, store.head(&full_key)).await {
                Ok(Ok(head)) => head,
                Ok(Err(_)) | Err(_) => None,
            }
        }
    }))
    .buffer_unordered(MAX_CONCURRENT_HEADS)
    .collect::<Vec<_>>();

    match tokio::time::timeout(PER_RESULT_TIMEOUT * deltas.len().max(1) as u32, results).await {
        Ok(heads) => heads,
        Err(_) => {
            warn!("delta head fan-out exceeded its aggregate result budget, returning partial heads");
            Vec::new()
        }
    }
}
