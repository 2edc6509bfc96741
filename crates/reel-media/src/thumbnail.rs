//! Title thumbnail generation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{MediaError, MediaResult};
use crate::fs_utils::ScopedFiles;
use crate::toolkit::MediaToolkit;
use reel_models::encoding::{THUMBNAIL_HEIGHT, THUMBNAIL_WIDTH};

/// Candidate frame positions as fractions of the video duration.
pub const CANDIDATE_POSITIONS: [f64; 3] = [0.1, 0.5, 0.9];

/// A rendered thumbnail.
#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailResult {
    pub thumbnail_path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Position in the video the frame was taken from, in seconds
    pub source_timestamp: f64,
}

/// Index of the frame to use among `candidates`: the middle one.
pub fn select_best_frame_index(candidates: usize) -> usize {
    candidates / 2
}

/// Renders a titled still from a finished video.
#[derive(Clone)]
pub struct ThumbnailGenerator {
    toolkit: Arc<dyn MediaToolkit>,
    frame_dir: PathBuf,
    width: u32,
    height: u32,
}

impl ThumbnailGenerator {
    /// `frame_dir` holds the candidate frames while a thumbnail is rendered.
    pub fn new(toolkit: Arc<dyn MediaToolkit>, frame_dir: impl Into<PathBuf>) -> Self {
        Self {
            toolkit,
            frame_dir: frame_dir.into(),
            width: THUMBNAIL_WIDTH,
            height: THUMBNAIL_HEIGHT,
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Extract candidate frames, pick one, and draw `title` over it.
    ///
    /// Candidate frames are deleted whether or not rendering succeeds.
    pub async fn generate(&self, video: &Path, title: &str, output: &Path) -> MediaResult<ThumbnailResult> {
        if !video.exists() {
            return Err(MediaError::FileNotFound(video.to_path_buf()));
        }
        let duration = self.toolkit.duration(video).await?;
        self.generate_at(video, duration, title, output).await
    }

    /// Same as [`generate`](Self::generate) for a video whose duration is
    /// already known.
    pub async fn generate_at(
        &self,
        video: &Path,
        duration: f64,
        title: &str,
        output: &Path,
    ) -> MediaResult<ThumbnailResult> {
        if !video.exists() {
            return Err(MediaError::FileNotFound(video.to_path_buf()));
        }
        if !(duration.is_finite() && duration > 0.0) {
            return Err(MediaError::InvalidVideo(format!(
                "Cannot pick frames from {} with duration {}",
                video.display(),
                duration
            )));
        }
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::create_dir_all(&self.frame_dir).await?;

        let timestamps: Vec<f64> = CANDIDATE_POSITIONS.iter().map(|p| duration * p).collect();

        let prefix = Uuid::new_v4().simple().to_string();
        let mut frames = ScopedFiles::new();
        for (i, ts) in timestamps.iter().enumerate() {
            let frame = frames.track(self.frame_dir.join(format!("{}-frame-{}.jpg", prefix, i)));
            self.toolkit.extract_frame(video, *ts, &frame).await?;
        }

        let best = select_best_frame_index(frames.paths().len());
        let source_timestamp = timestamps[best];

        self.toolkit
            .text_overlay(&frames.paths()[best], title, output, self.width, self.height)
            .await?;

        if !output.exists() {
            return Err(MediaError::EmptyOutput(output.to_path_buf()));
        }
        frames.remove().await;

        info!(
            thumbnail = %output.display(),
            source_timestamp,
            "Created thumbnail"
        );

        Ok(ThumbnailResult {
            thumbnail_path: output.to_path_buf(),
            width: self.width,
            height: self.height,
            source_timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFailure, FakeToolkit};
    use tempfile::TempDir;

    fn frame_count(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn test_middle_frame_selected() {
        assert_eq!(select_best_frame_index(3), 1);
        assert_eq!(select_best_frame_index(1), 0);
    }

    #[tokio::test]
    async fn test_generate_uses_middle_frame() {
        let dir = TempDir::new().unwrap();
        let toolkit = Arc::new(FakeToolkit::new());
        let video = toolkit.add_media(dir.path().join("final.mp4"), 40.0).await;
        let frames = dir.path().join("frames");
        let output = dir.path().join("out").join("thumbnail.jpg");

        let result = ThumbnailGenerator::new(toolkit.clone(), &frames)
            .generate(&video, "Deep Sea Giants", &output)
            .await
            .unwrap();

        assert_eq!(result.width, 1920);
        assert_eq!(result.height, 1080);
        assert!((result.source_timestamp - 20.0).abs() < 1e-9);
        assert_eq!(toolkit.frame_timestamps().await, vec![4.0, 20.0, 36.0]);
        assert!(output.exists());
        assert_eq!(frame_count(&frames), 0);
    }

    #[tokio::test]
    async fn test_frames_cleaned_when_overlay_fails() {
        let dir = TempDir::new().unwrap();
        let toolkit = Arc::new(FakeToolkit::new());
        let video = toolkit.add_media(dir.path().join("final.mp4"), 12.0).await;
        toolkit.fail_on("text_overlay", FakeFailure::Process).await;
        let frames = dir.path().join("frames");

        let err = ThumbnailGenerator::new(toolkit, &frames)
            .with_dimensions(1280, 720)
            .generate(&video, "Title", &dir.path().join("thumbnail.jpg"))
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::FfmpegFailed { .. }));
        assert_eq!(frame_count(&frames), 0);
    }

    #[tokio::test]
    async fn test_generate_at_skips_probe() {
        let dir = TempDir::new().unwrap();
        let toolkit = Arc::new(FakeToolkit::new());
        // placeholder file whose duration the toolkit does not know
        let video = dir.path().join("final.mp4");
        std::fs::write(&video, b"x").unwrap();

        let result = ThumbnailGenerator::new(toolkit.clone(), dir.path().join("frames"))
            .generate_at(&video, 10.0, "Title", &dir.path().join("thumbnail.jpg"))
            .await
            .unwrap();

        assert!((result.source_timestamp - 5.0).abs() < 1e-9);
        assert_eq!(toolkit.calls_for("probe").await, 0);
    }

    #[tokio::test]
    async fn test_missing_video() {
        let dir = TempDir::new().unwrap();
        let toolkit = Arc::new(FakeToolkit::new());
        let err = ThumbnailGenerator::new(toolkit, dir.path())
            .generate(&dir.path().join("nope.mp4"), "T", &dir.path().join("t.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}
