//! In-process [`MediaToolkit`] for tests.
//!
//! Files are real (written to disk so existence checks hold) but their media
//! durations live in a map, so pipelines can be exercised without ffmpeg.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::error::{MediaError, MediaResult};
use crate::filters::AudioTrack;
use crate::probe::{MediaInfo, StreamInfo};
use crate::toolkit::MediaToolkit;

/// Injected failure for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeFailure {
    /// Non-zero exit
    Process,
    Timeout,
}

/// A recorded toolkit call.
#[derive(Debug, Clone, PartialEq)]
pub struct FakeCall {
    pub operation: &'static str,
    pub output: Option<PathBuf>,
}

#[derive(Default)]
struct FakeState {
    durations: HashMap<PathBuf, f64>,
    calls: Vec<FakeCall>,
    failures: HashMap<&'static str, FakeFailure>,
    concat_inputs: Vec<Vec<PathBuf>>,
    overlay_tracks: Vec<Vec<AudioTrack>>,
    frame_timestamps: Vec<f64>,
}

/// Scripted toolkit that simulates media durations.
#[derive(Default)]
pub struct FakeToolkit {
    state: Mutex<FakeState>,
}

impl FakeToolkit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a placeholder file and register its media duration.
    pub async fn add_media(&self, path: impl Into<PathBuf>, duration: f64) -> PathBuf {
        let path = path.into();
        write_placeholder(&path).await;
        self.state.lock().await.durations.insert(path.clone(), duration);
        path
    }

    /// Make every later call to `operation` fail.
    pub async fn fail_on(&self, operation: &'static str, failure: FakeFailure) {
        self.state.lock().await.failures.insert(operation, failure);
    }

    pub async fn calls(&self) -> Vec<FakeCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn calls_for(&self, operation: &str) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    pub async fn total_calls(&self) -> usize {
        self.state.lock().await.calls.len()
    }

    /// Inputs of each concat call, in manifest order.
    pub async fn concat_inputs(&self) -> Vec<Vec<PathBuf>> {
        self.state.lock().await.concat_inputs.clone()
    }

    /// Tracks of each audio overlay call.
    pub async fn overlay_tracks(&self) -> Vec<Vec<AudioTrack>> {
        self.state.lock().await.overlay_tracks.clone()
    }

    /// Timestamps of every extracted frame.
    pub async fn frame_timestamps(&self) -> Vec<f64> {
        self.state.lock().await.frame_timestamps.clone()
    }

    pub async fn duration_of(&self, path: &Path) -> Option<f64> {
        self.state.lock().await.durations.get(path).copied()
    }

    /// Record the call and return the injected failure, if any.
    async fn record(&self, operation: &'static str, output: Option<&Path>) -> MediaResult<()> {
        let mut state = self.state.lock().await;
        state.calls.push(FakeCall {
            operation,
            output: output.map(Path::to_path_buf),
        });
        match state.failures.get(operation) {
            Some(FakeFailure::Process) => Err(MediaError::ffmpeg_failed(
                format!("{} failed", operation),
                Some("simulated failure".to_string()),
                Some(1),
            )),
            Some(FakeFailure::Timeout) => Err(MediaError::Timeout(600)),
            None => Ok(()),
        }
    }

    async fn write_output(&self, path: &Path, duration: f64) {
        write_placeholder(path).await;
        self.state
            .lock()
            .await
            .durations
            .insert(path.to_path_buf(), duration);
    }
}

async fn write_placeholder(path: &Path) {
    if let Some(parent) = path.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    let _ = tokio::fs::write(path, b"fake media").await;
}

fn require(path: &Path) -> MediaResult<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(MediaError::FileNotFound(path.to_path_buf()))
    }
}

/// Parse `file '<path>'` lines written for the concat demuxer.
fn parse_manifest(text: &str) -> Vec<PathBuf> {
    text.lines()
        .filter_map(|line| line.strip_prefix("file '")?.strip_suffix('\''))
        .map(|p| PathBuf::from(p.replace("'\\''", "'")))
        .collect()
}

#[async_trait]
impl MediaToolkit for FakeToolkit {
    async fn verify(&self) -> MediaResult<String> {
        self.record("verify", None).await?;
        Ok("ffmpeg version fake".to_string())
    }

    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo> {
        require(path)?;
        self.record("probe", None).await?;
        let duration = self.duration_of(path).await.ok_or_else(|| {
            MediaError::InvalidVideo(format!("Could not determine duration for {}", path.display()))
        })?;
        let size = tokio::fs::metadata(path).await?.len();
        Ok(MediaInfo {
            duration,
            size,
            bitrate: 0,
            format_name: "mov,mp4,m4a,3gp,3g2,mj2".to_string(),
            streams: vec![StreamInfo {
                index: 0,
                codec_type: "video".to_string(),
                codec_name: Some("h264".to_string()),
                width: Some(1280),
                height: Some(720),
                fps: Some(30.0),
                duration: Some(duration),
            }],
        })
    }

    async fn extract_frame(&self, video: &Path, timestamp: f64, output: &Path) -> MediaResult<()> {
        require(video)?;
        self.record("extract_frame", Some(output)).await?;
        self.state.lock().await.frame_timestamps.push(timestamp);
        write_placeholder(output).await;
        Ok(())
    }

    async fn trim(&self, input: &Path, duration: f64, output: &Path) -> MediaResult<()> {
        require(input)?;
        self.record("trim", Some(output)).await?;
        self.write_output(output, duration).await;
        Ok(())
    }

    async fn loop_extend(
        &self,
        input: &Path,
        _loop_count: u32,
        target: f64,
        output: &Path,
    ) -> MediaResult<()> {
        require(input)?;
        self.record("loop_extend", Some(output)).await?;
        self.write_output(output, target).await;
        Ok(())
    }

    async fn concat(&self, manifest: &Path, output: &Path) -> MediaResult<()> {
        require(manifest)?;
        self.record("concat", Some(output)).await?;

        let inputs = parse_manifest(&tokio::fs::read_to_string(manifest).await?);
        let mut total = 0.0;
        for input in &inputs {
            require(input)?;
            total += self.duration_of(input).await.unwrap_or(0.0);
        }
        self.state.lock().await.concat_inputs.push(inputs);
        self.write_output(output, total).await;
        Ok(())
    }

    async fn overlay_audio(
        &self,
        video: &Path,
        tracks: &[AudioTrack],
        output: &Path,
    ) -> MediaResult<()> {
        require(video)?;
        if tracks.is_empty() {
            return Err(MediaError::validation("No audio tracks to overlay"));
        }
        self.record("overlay_audio", Some(output)).await?;

        let duration = self.duration_of(video).await.unwrap_or(0.0);
        self.state.lock().await.overlay_tracks.push(tracks.to_vec());
        self.write_output(output, duration).await;
        Ok(())
    }

    async fn text_overlay(
        &self,
        image: &Path,
        _text: &str,
        output: &Path,
        _width: u32,
        _height: u32,
    ) -> MediaResult<()> {
        require(image)?;
        self.record("text_overlay", Some(output)).await?;
        write_placeholder(output).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest_unescapes_quotes() {
        let text = "file '/tmp/a.mp4'\nfile '/tmp/it'\\''s.mp4'\n";
        assert_eq!(
            parse_manifest(text),
            vec![PathBuf::from("/tmp/a.mp4"), PathBuf::from("/tmp/it's.mp4")]
        );
    }
}
