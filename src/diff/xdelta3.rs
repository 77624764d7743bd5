//! Diff engine backed by the `xdelta3` command-line tool.

use super::{DiffEngine, DiffError};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Shells out to `xdelta3 -e -9 -s <reference> <target> <out>` / `xdelta3 -d
/// -s <reference> <delta> <out>`. Any tool producing a bit-exact invertible
/// `(reference, target) -> delta` is an acceptable substitute; this is the
/// reference implementation named in the wire-format metadata.
pub struct Xdelta3Engine {
    binary: String,
}

impl Default for Xdelta3Engine {
    fn default() -> Self {
        Self::new("xdelta3")
    }
}

impl Xdelta3Engine {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

#[async_trait]
impl DiffEngine for Xdelta3Engine {
    async fn encode(
        &self,
        reference_path: &Path,
        target_path: &Path,
        out_delta_path: &Path,
    ) -> Result<(), DiffError> {
        let output = Command::new(&self.binary)
            .arg("-e")
            .arg("-9")
            .arg("-s")
            .arg(reference_path)
            .arg(target_path)
            .arg(out_delta_path)
            .output()
            .await?;

        if !output.status.success() {
            return Err(DiffError::Encode(String::from_utf8_lossy(&output.stderr).into_owned()));
        }
        debug!("xdelta3 encode {:?} -> {:?}", target_path, out_delta_path);
        Ok(())
    }

    async fn decode(
        &self,
        reference_path: &Path,
        delta_path: &Path,
        out_path: &Path,
    ) -> Result<(), DiffError> {
        let output = Command::new(&self.binary)
            .arg("-d")
            .arg("-s")
            .arg(reference_path)
            .arg(delta_path)
            .arg(out_path)
            .output()
            .await?;

        if !output.status.success() {
            return Err(DiffError::Decode(String::from_utf8_lossy(&output.stderr).into_owned()));
        }
        debug!("xdelta3 decode {:?} -> {:?}", delta_path, out_path);
        Ok(())
    }

    fn command_line(&self, reference_name: &str, original_name: &str) -> String {
        format!("xdelta3 -e -9 -s {reference_name} {original_name} {original_name}.delta")
    }
}
