//! yt-dlp backed [`ClipFetcher`].

use async_trait::async_trait;
use reel_media::{classify_download_error, DownloadErrorKind, MediaError, SegmentDownloader, SegmentRequest};
use reel_models::DownloadJob;
use reel_queue::{ClipFetcher, FetchError};
use std::path::PathBuf;

use crate::config::WorkerConfig;

/// Fetches clip segments with yt-dlp and sorts failures for the queue.
pub struct YtDlpFetcher {
    downloader: SegmentDownloader,
}

impl YtDlpFetcher {
    pub fn new(downloader: SegmentDownloader) -> Self {
        Self { downloader }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        let base_dir = config.base_dir.clone();
        Self::new(
            SegmentDownloader::new(base_dir, config.cache_dir.clone())
                .with_max_height(config.segment_max_height)
                .with_timeout(config.download_timeout_secs),
        )
    }
}

/// Map a download error onto the queue's retry decision.
pub fn to_fetch_error(err: MediaError) -> FetchError {
    match err {
        MediaError::Timeout(_) => FetchError::transient(err.to_string()),
        MediaError::DownloadFailed { message } => match classify_download_error(&message) {
            DownloadErrorKind::Transient => FetchError::Transient(message),
            DownloadErrorKind::Permanent => FetchError::Permanent(message),
        },
        MediaError::Io(ref io) => match classify_download_error(&io.to_string()) {
            DownloadErrorKind::Transient => FetchError::transient(err.to_string()),
            DownloadErrorKind::Permanent => FetchError::permanent(err.to_string()),
        },
        other => FetchError::permanent(other.to_string()),
    }
}

#[async_trait]
impl ClipFetcher for YtDlpFetcher {
    async fn fetch(&self, job: &DownloadJob) -> Result<PathBuf, FetchError> {
        let request = SegmentRequest {
            video_id: job.video_id.clone(),
            segment_duration: job.segment_duration,
            output_path: job.output_path.clone(),
            project_id: job.project_id.clone(),
        };
        self.downloader.download(&request).await.map_err(to_fetch_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        assert!(to_fetch_error(MediaError::Timeout(300)).is_transient());
        assert!(to_fetch_error(MediaError::download_failed("HTTP Error 503: Service Unavailable")).is_transient());
        assert!(!to_fetch_error(MediaError::download_failed("ERROR: Private video")).is_transient());
        assert!(!to_fetch_error(MediaError::YtDlpNotFound).is_transient());
        assert!(!to_fetch_error(MediaError::SecurityViolation("path".into())).is_transient());
    }

    #[tokio::test]
    async fn test_invalid_video_id_is_permanent() {
        let fetcher = YtDlpFetcher::from_config(&WorkerConfig::default());
        let job = DownloadJob::for_suggestion(".cache", "s1", "not-valid", None, "proj-1", 1);

        let err = fetcher.fetch(&job).await.unwrap_err();
        assert!(matches!(err, FetchError::Permanent(_)));
        assert!(err.message().contains("Invalid video ID"));
    }

    fn fetcher_without_ytdlp(config: &WorkerConfig) -> YtDlpFetcher {
        YtDlpFetcher::new(
            SegmentDownloader::new(config.base_dir.clone(), config.cache_dir.clone())
                .with_program("/nonexistent/yt-dlp"),
        )
    }

    #[tokio::test]
    async fn test_custom_cache_dir_accepts_configured_jobs() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = WorkerConfig {
            base_dir: dir.path().to_path_buf(),
            cache_dir: PathBuf::from("media-cache"),
            ..WorkerConfig::default()
        };
        let job = config.segment_job("s1", "dQw4w9WgXcQ", Some(12.0), "proj-1", 1);

        // the path passes sanitization and the call gets as far as the binary
        let err = fetcher_without_ytdlp(&config).fetch(&job).await.unwrap_err();
        assert!(err.message().contains("yt-dlp not found"), "{}", err.message());
    }

    #[tokio::test]
    async fn test_job_outside_configured_cache_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = WorkerConfig {
            base_dir: dir.path().to_path_buf(),
            cache_dir: PathBuf::from("media-cache"),
            ..WorkerConfig::default()
        };
        let job = DownloadJob::for_suggestion(".cache", "s1", "dQw4w9WgXcQ", Some(12.0), "proj-1", 1);

        let err = fetcher_without_ytdlp(&config).fetch(&job).await.unwrap_err();
        assert!(matches!(err, FetchError::Permanent(_)));
        assert!(err.message().contains("Security violation"));
    }
}
