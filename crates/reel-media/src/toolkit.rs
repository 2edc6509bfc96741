//! The media toolkit seam: every external ffmpeg/ffprobe operation the
//! pipeline needs, behind one trait.
//!
//! [`FfmpegToolkit`] is the production implementation. Every transform it runs
//! either leaves a non-empty file at the declared output path or returns an
//! error with the partial output removed.

use async_trait::async_trait;
use std::env;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::filters::{build_audio_mix_filter, build_title_overlay_filter, AudioTrack};
use crate::probe::{probe_media, MediaInfo};
use crate::progress::quartile_logger;
use reel_models::EncodingConfig;

const TRANSFORM_DURATION_SECONDS: &str = "reel_media_transform_duration_seconds";
const TRANSFORM_FAILURES_TOTAL: &str = "reel_media_transform_failures_total";

/// Operations on the external media toolkit.
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Check the toolkit is installed and return its version line.
    async fn verify(&self) -> MediaResult<String>;

    /// Probe a media file.
    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo>;

    /// Resolved duration of a media file in seconds.
    async fn duration(&self, path: &Path) -> MediaResult<f64> {
        Ok(self.probe(path).await?.duration)
    }

    /// Write one still frame taken at `timestamp` seconds.
    async fn extract_frame(&self, video: &Path, timestamp: f64, output: &Path) -> MediaResult<()>;

    /// Cut `input` from its start to exactly `duration` seconds.
    async fn trim(&self, input: &Path, duration: f64, output: &Path) -> MediaResult<()>;

    /// Play `input` `loop_count` times back to back, cut to `target` seconds.
    async fn loop_extend(
        &self,
        input: &Path,
        loop_count: u32,
        target: f64,
        output: &Path,
    ) -> MediaResult<()>;

    /// Join the files listed in a concat demuxer manifest.
    async fn concat(&self, manifest: &Path, output: &Path) -> MediaResult<()>;

    /// Replace the video's audio with the delayed, mixed tracks.
    async fn overlay_audio(&self, video: &Path, tracks: &[AudioTrack], output: &Path)
        -> MediaResult<()>;

    /// Render `text` onto a still image scaled to `width`x`height`.
    async fn text_overlay(
        &self,
        image: &Path,
        text: &str,
        output: &Path,
        width: u32,
        height: u32,
    ) -> MediaResult<()>;
}

/// Toolkit configuration.
#[derive(Debug, Clone)]
pub struct ToolkitConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    /// Timeout for probes and version checks
    pub probe_timeout_secs: u64,
    /// Timeout for every transform
    pub transform_timeout_secs: u64,
    /// Encoder settings used when stream copy fails
    pub encoding: EncodingConfig,
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            probe_timeout_secs: 30,
            transform_timeout_secs: 600,
            encoding: EncodingConfig::default(),
        }
    }
}

impl ToolkitConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ffmpeg_path: env::var("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: env::var("FFPROBE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffprobe_path),
            probe_timeout_secs: env::var("MEDIA_PROBE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.probe_timeout_secs),
            transform_timeout_secs: env::var("MEDIA_TRANSFORM_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.transform_timeout_secs),
            encoding: defaults.encoding,
        }
    }
}

/// [`MediaToolkit`] backed by the ffmpeg and ffprobe binaries.
#[derive(Debug, Clone, Default)]
pub struct FfmpegToolkit {
    config: ToolkitConfig,
}

impl FfmpegToolkit {
    pub fn new(config: ToolkitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ToolkitConfig {
        &self.config
    }

    fn runner(&self) -> FfmpegRunner {
        FfmpegRunner::new()
            .with_program(&self.config.ffmpeg_path)
            .with_timeout(self.config.transform_timeout_secs)
    }

    /// Run one transform with timing metrics and progress logging.
    async fn run_transform(
        &self,
        operation: &'static str,
        cmd: &FfmpegCommand,
        expected_secs: f64,
    ) -> MediaResult<()> {
        let start = Instant::now();
        let result = self
            .runner()
            .run_with_progress(cmd, quartile_logger(operation, expected_secs))
            .await;
        let elapsed = start.elapsed().as_secs_f64();

        match &result {
            Ok(()) => {
                metrics::histogram!(TRANSFORM_DURATION_SECONDS, "operation" => operation).record(elapsed);
                debug!(
                    operation,
                    output = %cmd.output().display(),
                    elapsed_secs = elapsed,
                    "FFmpeg transform finished"
                );
            }
            Err(e) => {
                metrics::counter!(TRANSFORM_FAILURES_TOTAL, "operation" => operation).increment(1);
                warn!(operation, error = %e, "FFmpeg transform failed");
            }
        }
        result
    }

    /// Try a stream copy first, then re-encode when the copy is rejected.
    async fn copy_then_encode(
        &self,
        operation: &'static str,
        base: FfmpegCommand,
        expected_secs: f64,
    ) -> MediaResult<()> {
        let copy = base.clone().stream_copy().no_audio();
        match self.run_transform(operation, &copy, expected_secs).await {
            Ok(()) => Ok(()),
            Err(e @ (MediaError::FfmpegFailed { .. } | MediaError::EmptyOutput(_))) => {
                warn!(
                    operation,
                    error = %e,
                    "Stream copy failed, falling back to re-encode"
                );
                let encode = base
                    .output_args(self.config.encoding.video_args())
                    .no_audio();
                self.run_transform(operation, &encode, expected_secs).await
            }
            Err(e) => Err(e),
        }
    }
}

fn ensure_exists(path: &Path) -> MediaResult<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(MediaError::FileNotFound(path.to_path_buf()))
    }
}

fn ensure_positive(what: &str, value: f64) -> MediaResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(MediaError::validation(format!("{} must be positive, got {}", what, value)))
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn verify(&self) -> MediaResult<String> {
        which::which(&self.config.ffmpeg_path).map_err(|_| MediaError::FfmpegNotFound)?;
        which::which(&self.config.ffprobe_path).map_err(|_| MediaError::FfprobeNotFound)?;

        let output = Command::new(&self.config.ffmpeg_path)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(Duration::from_secs(self.config.probe_timeout_secs), output)
            .await
            .map_err(|_| MediaError::Timeout(self.config.probe_timeout_secs))??;

        if !output.status.success() {
            return Err(MediaError::ffmpeg_failed(
                "ffmpeg -version failed",
                None,
                output.status.code(),
            ));
        }

        let version = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        info!(version = %version, "FFmpeg available");
        Ok(version)
    }

    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo> {
        probe_media(&self.config.ffprobe_path, path, self.config.probe_timeout_secs).await
    }

    async fn extract_frame(&self, video: &Path, timestamp: f64, output: &Path) -> MediaResult<()> {
        ensure_exists(video)?;
        let cmd = FfmpegCommand::new(video, output)
            .seek(timestamp.max(0.0))
            .single_frame()
            .output_args(["-q:v", "2"]);
        self.run_transform("extract_frame", &cmd, 0.0).await
    }

    async fn trim(&self, input: &Path, duration: f64, output: &Path) -> MediaResult<()> {
        ensure_exists(input)?;
        ensure_positive("Trim duration", duration)?;
        let base = FfmpegCommand::new(input, output).output_duration(duration);
        self.copy_then_encode("trim", base, duration).await
    }

    async fn loop_extend(
        &self,
        input: &Path,
        loop_count: u32,
        target: f64,
        output: &Path,
    ) -> MediaResult<()> {
        ensure_exists(input)?;
        ensure_positive("Loop target", target)?;
        if loop_count == 0 {
            return Err(MediaError::validation("Loop count must be at least 1"));
        }

        // -stream_loop counts extra plays, not total plays
        let base = FfmpegCommand::new(input, output)
            .input_args(["-stream_loop".to_string(), (loop_count - 1).to_string()])
            .output_duration(target);
        self.copy_then_encode("loop", base, target).await
    }

    async fn concat(&self, manifest: &Path, output: &Path) -> MediaResult<()> {
        ensure_exists(manifest)?;
        let cmd = FfmpegCommand::new(manifest, output)
            .input_args(["-f", "concat", "-safe", "0"])
            .stream_copy();
        self.run_transform("concat", &cmd, 0.0).await
    }

    async fn overlay_audio(
        &self,
        video: &Path,
        tracks: &[AudioTrack],
        output: &Path,
    ) -> MediaResult<()> {
        ensure_exists(video)?;
        if tracks.is_empty() {
            return Err(MediaError::validation("No audio tracks to overlay"));
        }

        let mut cmd = FfmpegCommand::new(video, output);
        for track in tracks {
            ensure_exists(&track.path)?;
            cmd = cmd.add_input(&track.path);
        }

        let cmd = cmd
            .filter_complex(build_audio_mix_filter(tracks))
            .map("0:v")
            .map("[aout]")
            .video_codec("copy")
            .audio_codec(self.config.encoding.audio_codec.clone())
            .audio_bitrate(self.config.encoding.audio_bitrate.clone());

        self.run_transform("audio_overlay", &cmd, 0.0).await
    }

    async fn text_overlay(
        &self,
        image: &Path,
        text: &str,
        output: &Path,
        width: u32,
        height: u32,
    ) -> MediaResult<()> {
        ensure_exists(image)?;
        if width == 0 || height == 0 {
            return Err(MediaError::validation("Overlay dimensions must be non-zero"));
        }

        let cmd = FfmpegCommand::new(image, output)
            .video_filter(build_title_overlay_filter(text, width, height))
            .single_frame()
            .output_args(["-q:v", "2"]);
        self.run_transform("text_overlay", &cmd, 0.0).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let config = ToolkitConfig::default();
        assert_eq!(config.probe_timeout_secs, 30);
        assert_eq!(config.transform_timeout_secs, 600);
    }

    #[tokio::test]
    async fn test_missing_inputs_fail_before_spawn() {
        let toolkit = FfmpegToolkit::default();
        let out = Path::new("/tmp/never-written.mp4");

        let err = toolkit
            .trim(Path::new("/nonexistent/clip.mp4"), 5.0, out)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));

        let err = toolkit
            .concat(Path::new("/nonexistent/list.txt"), out)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_overlay_requires_tracks() {
        let dir = tempfile::TempDir::new().unwrap();
        let video = dir.path().join("concat.mp4");
        tokio::fs::write(&video, b"video").await.unwrap();

        let err = FfmpegToolkit::default()
            .overlay_audio(&video, &[], &dir.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_loop_rejects_zero_count() {
        let dir = tempfile::TempDir::new().unwrap();
        let clip = dir.path().join("clip.mp4");
        tokio::fs::write(&clip, b"video").await.unwrap();

        let err = FfmpegToolkit::default()
            .loop_extend(&clip, 0, 10.0, &dir.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
}
