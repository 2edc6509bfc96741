//! Clip segment download using yt-dlp.
//!
//! Fetches the opening seconds of a source video, video only, capped at a
//! maximum height. Video IDs are validated and output paths are confined to
//! the project's cache directory before any process is spawned.

use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::command::remove_partial_output;
use crate::error::{MediaError, MediaResult};

/// Default resolution cap for fetched segments.
pub const DEFAULT_MAX_HEIGHT: u32 = 720;

static VIDEO_ID_RE: OnceLock<Regex> = OnceLock::new();
static PERMANENT_RE: OnceLock<Vec<Regex>> = OnceLock::new();
static TRANSIENT_RE: OnceLock<Vec<Regex>> = OnceLock::new();

/// Whether `video_id` looks like a platform video ID (11 chars of `[A-Za-z0-9_-]`).
pub fn validate_video_id(video_id: &str) -> bool {
    VIDEO_ID_RE
        .get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]{11}$").expect("valid video id regex"))
        .is_match(video_id)
}

/// Whether a download failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadErrorKind {
    Transient,
    Permanent,
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("valid classification regex"))
        .collect()
}

/// Classify a yt-dlp error message.
///
/// Permanent patterns win over transient ones, and unknown errors are
/// permanent so a broken source cannot retry forever.
pub fn classify_download_error(message: &str) -> DownloadErrorKind {
    let permanent = PERMANENT_RE.get_or_init(|| {
        compile(&[
            r"(?i)video unavailable",
            r"404",
            r"(?i)invalid.*url",
            r"(?i)no space left",
            r"(?i)private video",
            r"(?i)deleted video",
            r"(?i)unsupported",
        ])
    });
    if permanent.iter().any(|re| re.is_match(message)) {
        return DownloadErrorKind::Permanent;
    }

    let transient = TRANSIENT_RE.get_or_init(|| {
        compile(&[
            r"(?i)timeout",
            r"(?i)timed out",
            r"(?i)connection refused",
            r"429",
            r"503",
            r"(?i)network",
            r"(?i)ECONNREFUSED",
            r"(?i)ETIMEDOUT",
        ])
    });
    if transient.iter().any(|re| re.is_match(message)) {
        return DownloadErrorKind::Transient;
    }

    DownloadErrorKind::Permanent
}

/// Lexically resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolve `output_path` against `base_dir` and require it to live under
/// `<cache_dir>/videos/<project_id>/`.
pub fn sanitize_output_path(
    base_dir: &Path,
    cache_dir: &Path,
    project_id: &str,
    output_path: &Path,
) -> MediaResult<PathBuf> {
    if project_id.is_empty() || project_id.contains(['/', '\\']) || project_id == ".." {
        return Err(MediaError::SecurityViolation(format!(
            "Invalid project id: {:?}",
            project_id
        )));
    }

    let allowed = normalize(&base_dir.join(cache_dir).join("videos").join(project_id));
    let resolved = normalize(&base_dir.join(output_path));

    if resolved == allowed || !resolved.starts_with(&allowed) {
        return Err(MediaError::SecurityViolation(format!(
            "Invalid output path: path traversal detected. Path must be within {}",
            allowed.display()
        )));
    }

    Ok(resolved)
}

/// One segment to fetch.
#[derive(Debug, Clone)]
pub struct SegmentRequest {
    pub video_id: String,
    /// Seconds from the start of the source
    pub segment_duration: f64,
    pub output_path: PathBuf,
    pub project_id: String,
}

/// yt-dlp segment downloader.
#[derive(Debug, Clone)]
pub struct SegmentDownloader {
    program: PathBuf,
    base_dir: PathBuf,
    cache_dir: PathBuf,
    max_height: u32,
    timeout_secs: u64,
}

impl SegmentDownloader {
    /// `base_dir` anchors relative output paths; `cache_dir` is resolved against it.
    pub fn new(base_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: PathBuf::from("yt-dlp"),
            base_dir: base_dir.into(),
            cache_dir: cache_dir.into(),
            max_height: DEFAULT_MAX_HEIGHT,
            timeout_secs: 300,
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_max_height(mut self, max_height: u32) -> Self {
        self.max_height = max_height;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Validate the request and return the resolved output path.
    pub fn prepare(&self, request: &SegmentRequest) -> MediaResult<PathBuf> {
        if !validate_video_id(&request.video_id) {
            return Err(MediaError::validation(format!(
                "Invalid video ID format: \"{}\". Must be 11 characters (alphanumeric, dashes, underscores).",
                request.video_id
            )));
        }
        if !(request.segment_duration.is_finite() && request.segment_duration > 0.0) {
            return Err(MediaError::validation(format!(
                "Invalid segment duration: {}",
                request.segment_duration
            )));
        }
        sanitize_output_path(
            &self.base_dir,
            &self.cache_dir,
            &request.project_id,
            &request.output_path,
        )
    }

    /// yt-dlp arguments for a request already resolved to `output`.
    pub fn build_args(&self, request: &SegmentRequest, output: &Path) -> Vec<String> {
        vec![
            format!("https://youtube.com/watch?v={}", request.video_id),
            "--download-sections".to_string(),
            format!("*0-{}", request.segment_duration),
            "-f".to_string(),
            format!("best[height<={}]", self.max_height),
            "-o".to_string(),
            output.to_string_lossy().to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--quiet".to_string(),
            "--postprocessor-args".to_string(),
            "ffmpeg:-an".to_string(),
        ]
    }

    /// Fetch a segment. Returns the absolute path of the written file.
    pub async fn download(&self, request: &SegmentRequest) -> MediaResult<PathBuf> {
        let output = self.prepare(request)?;
        which::which(&self.program).map_err(|_| MediaError::YtDlpNotFound)?;

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!(
            video_id = %request.video_id,
            duration = request.segment_duration,
            output = %output.display(),
            "Starting segment download"
        );

        let args = self.build_args(request, &output);
        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let result = match tokio::time::timeout(Duration::from_secs(self.timeout_secs), child).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(video_id = %request.video_id, "yt-dlp timed out after {} seconds", self.timeout_secs);
                remove_partial_output(&output).await;
                return Err(MediaError::Timeout(self.timeout_secs));
            }
        };

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            debug!("yt-dlp stderr: {}", stderr);
            remove_partial_output(&output).await;

            let message = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(|l| l.trim().to_string())
                .unwrap_or_else(|| format!("yt-dlp exited with code {:?}", result.status.code()));
            return Err(MediaError::download_failed(message));
        }

        match tokio::fs::metadata(&output).await {
            Ok(meta) if meta.len() > 0 => {
                info!(
                    output = %output.display(),
                    size_mb = meta.len() as f64 / (1024.0 * 1024.0),
                    "Downloaded segment successfully"
                );
                Ok(output)
            }
            _ => Err(MediaError::download_failed(format!(
                "Download completed but file not found at {}",
                output.display()
            ))),
        }
    }
}
