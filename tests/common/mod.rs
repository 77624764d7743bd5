//! Shared test fixtures: a fake `DiffEngine` that stands in for the real
//! `xdelta3` binary (not guaranteed to be installed on a test runner) and a
//! deterministic binary-data generator.

use async_trait::async_trait;
use deltaglider::cache::MemoryReferenceCache;
use deltaglider::clock::UtcClock;
use deltaglider::diff::{DiffEngine, DiffError};
use deltaglider::metrics::NoopMetrics;
use deltaglider::service::{DeltaService, DEFAULT_MAX_RATIO};
use deltaglider::store::MemoryObjectStore;
use std::path::Path;
use std::sync::Arc;

/// Encodes as an empty delta when target == reference, otherwise stores the
/// target bytes verbatim. Exercises every branch in `DeltaService` that
/// depends on encode/decode round-tripping without requiring the real CLI.
pub struct FakeDiffEngine;

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

pub fn test_service() -> DeltaService<MemoryObjectStore> {
    DeltaService::new(
        Arc::new(MemoryObjectStore::new()),
        Arc::new(FakeDiffEngine),
        Arc::new(MemoryReferenceCache::new(100)),
        Arc::new(UtcClock),
        Arc::new(NoopMetrics),
        DEFAULT_MAX_RATIO,
    )
}

/// Deterministic pseudo-random bytes (xorshift64), so tests don't depend on
/// an external `rand` crate for fixture data.
pub fn generate_binary(size: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.max(1);
    let mut out = Vec::with_capacity(size);
    while out.len() < size {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        out.extend_from_slice(&state.to_le_bytes());
    }
    out.truncate(size);
    out
}

/// Flip `change_ratio` of `data`'s bytes at a deterministic spread of
/// positions, simulating a near-identical "next version" of an artifact.
pub fn mutate_binary(data: &[u8], change_ratio: f64) -> Vec<u8> {
    let mut result = data.to_vec();
    if result.is_empty() {
        return result;
    }
    let changes = ((data.len() as f64) * change_ratio).round() as usize;
    let stride = (result.len() / changes.max(1)).max(1);
    for i in 0..changes {
        let idx = (i * stride) % result.len();
        result[idx] = result[idx].wrapping_add(0x5A).wrapping_add(i as u8);
    }
    result
}
