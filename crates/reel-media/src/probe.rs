//! FFprobe media information.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::error::{MediaError, MediaResult};

/// One stream of a probed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub index: u32,
    /// "video", "audio", ...
    pub codec_type: String,
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Frame rate (fps), video only
    pub fps: Option<f64>,
    /// Stream duration in seconds, when reported
    pub duration: Option<f64>,
}

/// Media file information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration: f64,
    /// File size in bytes
    pub size: u64,
    /// Bitrate in bits/second
    pub bitrate: u64,
    /// Container format name (e.g. "mov,mp4,m4a,3gp,3g2,mj2")
    pub format_name: String,
    pub streams: Vec<StreamInfo>,
}

impl MediaInfo {
    pub fn video_stream(&self) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.codec_type == "video")
    }

    pub fn audio_stream(&self) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.codec_type == "audio")
    }

    pub fn has_video(&self) -> bool {
        self.video_stream().is_some()
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    index: u32,
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
}

/// Probe a media file with `ffprobe`, killing it after `timeout_secs`.
pub async fn probe_media(
    ffprobe: impl AsRef<Path>,
    path: impl AsRef<Path>,
    timeout_secs: u64,
) -> MediaResult<MediaInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    which::which(ffprobe.as_ref()).map_err(|_| MediaError::FfprobeNotFound)?;

    let output = Command::new(ffprobe.as_ref())
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(Duration::from_secs(timeout_secs), output)
        .await
        .map_err(|_| MediaError::Timeout(timeout_secs))??;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("FFprobe failed for {}", path.display()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    parse_probe_output(&output.stdout, path)
}

/// Turn ffprobe JSON into [`MediaInfo`], resolving the duration.
pub(crate) fn parse_probe_output(stdout: &[u8], path: &Path) -> MediaResult<MediaInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    let streams: Vec<StreamInfo> = probe
        .streams
        .iter()
        .map(|s| StreamInfo {
            index: s.index,
            codec_type: s.codec_type.clone(),
            codec_name: s.codec_name.clone(),
            width: s.width,
            height: s.height,
            fps: s
                .avg_frame_rate
                .as_deref()
                .and_then(parse_frame_rate)
                .or_else(|| s.r_frame_rate.as_deref().and_then(parse_frame_rate)),
            duration: parse_positive(s.duration.as_deref()),
        })
        .collect();

    // Container duration first, then the first video stream, then the first audio stream
    let duration = parse_positive(probe.format.duration.as_deref())
        .or_else(|| first_stream_duration(&streams, "video"))
        .or_else(|| first_stream_duration(&streams, "audio"))
        .ok_or_else(|| {
            MediaError::InvalidVideo(format!("Could not determine duration for {}", path.display()))
        })?;

    Ok(MediaInfo {
        duration,
        size: probe
            .format
            .size
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
        bitrate: probe
            .format
            .bit_rate
            .as_deref()
            .and_then(|b| b.parse().ok())
            .unwrap_or(0),
        format_name: probe.format.format_name.unwrap_or_default(),
        streams,
    })
}

fn first_stream_duration(streams: &[StreamInfo], codec_type: &str) -> Option<f64> {
    streams
        .iter()
        .find(|s| s.codec_type == codec_type)
        .and_then(|s| s.duration)
}

fn parse_positive(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse().ok()
}
