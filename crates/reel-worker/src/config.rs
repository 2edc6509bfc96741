//! Worker configuration.

use std::path::PathBuf;

use reel_media::download::DEFAULT_MAX_HEIGHT;
use reel_models::DownloadJob;
use reel_models::encoding::{DURATION_TOLERANCE_SECS, THUMBNAIL_HEIGHT, THUMBNAIL_WIDTH};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Directory relative download paths are resolved against
    pub base_dir: PathBuf,
    /// Cache root holding downloaded clips and queue state
    pub cache_dir: PathBuf,
    /// Parent of per-job temporary directories
    pub work_dir: PathBuf,
    /// Finished videos land in `<output_root>/<project_id>/`
    pub output_root: PathBuf,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
    /// Trim tolerance in seconds
    pub duration_tolerance: f64,
    /// Assembly job rows; `None` keeps them in memory
    pub assembly_store_path: Option<PathBuf>,
    /// Height cap for fetched clip segments
    pub segment_max_height: u32,
    /// yt-dlp timeout in seconds
    pub download_timeout_secs: u64,
    /// Prometheus listener port; metrics are off when unset
    pub metrics_port: Option<u16>,
    /// Downloaded segments older than this are removed at startup
    pub segment_retention_days: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            cache_dir: PathBuf::from(".cache"),
            work_dir: std::env::temp_dir().join("reel"),
            output_root: PathBuf::from(".cache").join("videos"),
            thumbnail_width: THUMBNAIL_WIDTH,
            thumbnail_height: THUMBNAIL_HEIGHT,
            duration_tolerance: DURATION_TOLERANCE_SECS,
            assembly_store_path: None,
            segment_max_height: DEFAULT_MAX_HEIGHT,
            download_timeout_secs: 300,
            metrics_port: None,
            segment_retention_days: 7,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let cache_dir = std::env::var("REEL_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);

        Self {
            base_dir: std::env::var("REEL_BASE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.base_dir),
            work_dir: std::env::var("REEL_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            output_root: std::env::var("REEL_OUTPUT_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| cache_dir.join("videos")),
            thumbnail_width: std::env::var("THUMBNAIL_WIDTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(THUMBNAIL_WIDTH),
            thumbnail_height: std::env::var("THUMBNAIL_HEIGHT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(THUMBNAIL_HEIGHT),
            duration_tolerance: std::env::var("DURATION_TOLERANCE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DURATION_TOLERANCE_SECS),
            assembly_store_path: std::env::var("ASSEMBLY_STORE_PATH").ok().map(PathBuf::from),
            segment_max_height: std::env::var("SEGMENT_MAX_HEIGHT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_HEIGHT),
            download_timeout_secs: std::env::var("DOWNLOAD_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            metrics_port: std::env::var("METRICS_PORT").ok().and_then(|s| s.parse().ok()),
            segment_retention_days: std::env::var("SEGMENT_RETENTION_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.segment_retention_days),
            cache_dir,
        }
    }

    /// Segment download for a chosen suggestion, written under this
    /// config's cache root so the fetcher accepts its output path.
    pub fn segment_job(
        &self,
        suggestion_id: impl Into<String>,
        video_id: impl Into<String>,
        clip_duration: Option<f64>,
        project_id: impl Into<String>,
        scene_number: u32,
    ) -> DownloadJob {
        DownloadJob::for_suggestion(
            &self.cache_dir,
            suggestion_id,
            video_id,
            clip_duration,
            project_id,
            scene_number,
        )
    }

    /// Output directory for one project.
    pub fn project_output_dir(&self, project_id: &str) -> PathBuf {
        self.output_root.join(project_id)
    }
}
