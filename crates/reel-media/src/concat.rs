//! Ordered concatenation of normalized scene segments.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::error::{MediaError, MediaResult};
use crate::filters::build_concat_manifest;
use crate::fs_utils::ScopedFiles;
use crate::toolkit::MediaToolkit;

/// Outcome of a concatenation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcatResult {
    pub output_path: PathBuf,
    /// Probed duration of the joined file
    pub total_duration: f64,
    pub segment_count: usize,
}

/// Manifest path for an output: `<dir>/<stem>-list.txt`.
pub fn manifest_path_for(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "concat".to_string());
    output.with_file_name(format!("{}-list.txt", stem))
}

/// Joins segments with the concat demuxer.
#[derive(Clone)]
pub struct Concatenator {
    toolkit: Arc<dyn MediaToolkit>,
}

impl Concatenator {
    pub fn new(toolkit: Arc<dyn MediaToolkit>) -> Self {
        Self { toolkit }
    }

    /// Join `inputs` in order into `output`.
    ///
    /// The manifest written next to `output` is removed on every exit path.
    pub async fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> MediaResult<ConcatResult> {
        if inputs.is_empty() {
            return Err(MediaError::validation("No input videos to concatenate"));
        }
        if let Some(missing) = inputs.iter().find(|p| !p.exists()) {
            return Err(MediaError::validation(format!(
                "Input video not found: {}",
                missing.display()
            )));
        }

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut scoped = ScopedFiles::new();
        let manifest = scoped.track(manifest_path_for(output));
        tokio::fs::write(&manifest, build_concat_manifest(inputs)).await?;

        info!(segments = inputs.len(), output = %output.display(), "Concatenating segments");
        self.toolkit.concat(&manifest, output).await?;

        if !output.exists() {
            return Err(MediaError::EmptyOutput(output.to_path_buf()));
        }

        let total_duration = self.toolkit.duration(output).await?;
        scoped.remove().await;

        Ok(ConcatResult {
            output_path: output.to_path_buf(),
            total_duration,
            segment_count: inputs.len(),
        })
    }
}
