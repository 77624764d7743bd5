//! Binary-diff engine port: `encode(reference, target, out_delta)` /
//! `decode(reference, delta, out)`, both path-based so a shelled-out tool
//! never needs the whole artifact buffered in memory.

mod xdelta3;

pub use xdelta3::Xdelta3Engine;

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiffError {
    #[error("diff encode failed: {0}")]
    Encode(String),
    #[error("diff decode failed: {0}")]
    Decode(String),
    #[error("diff engine io error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait DiffEngine: Send + Sync {
    /// Write a delta artifact reconstructing `target_path` from
    /// `reference_path` to `out_delta_path`.
    async fn encode(
        &self,
        reference_path: &Path,
        target_path: &Path,
        out_delta_path: &Path,
    ) -> Result<(), DiffError>;

    /// Write the reconstructed target to `out_path`.
    async fn decode(
        &self,
        reference_path: &Path,
        delta_path: &Path,
        out_path: &Path,
    ) -> Result<(), DiffError>;

    /// The literal invocation used for this encode, recorded into
    /// `DeltaMeta.delta_cmd` for diagnostics.
    fn command_line(&self, reference_name: &str, original_name: &str) -> String;
}
