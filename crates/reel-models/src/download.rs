//! Download job records for the clip fetch queue.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::job::{JobId, ParseStatusError};

/// Longest segment fetched for a candidate clip, in seconds.
pub const MAX_SEGMENT_DURATION: f64 = 15.0;

/// Cache root used when none is configured.
pub const DEFAULT_CACHE_DIR: &str = ".cache";

/// Download job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Waiting for a free worker slot
    #[default]
    Queued,
    /// Claimed by a worker
    Processing,
    /// Clip is on disk
    Complete,
    /// Permanent failure or retries exhausted
    Failed,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Queued => "queued",
            DownloadStatus::Processing => "processing",
            DownloadStatus::Complete => "complete",
            DownloadStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadStatus::Complete | DownloadStatus::Failed)
    }

    /// Whether a job in this status blocks a duplicate enqueue.
    pub fn blocks_duplicate(&self) -> bool {
        !matches!(self, DownloadStatus::Failed)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(DownloadStatus::Queued),
            "processing" => Ok(DownloadStatus::Processing),
            "complete" => Ok(DownloadStatus::Complete),
            "failed" => Ok(DownloadStatus::Failed),
            other => Err(ParseStatusError::new("download status", other)),
        }
    }
}

/// A request to fetch one candidate clip segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DownloadJob {
    pub id: JobId,
    /// Visual suggestion the clip belongs to (clip identity for dedup)
    pub suggestion_id: String,
    /// Source platform video ID
    pub video_id: String,
    /// Seconds to fetch from the start of the source
    pub segment_duration: f64,
    /// Destination path, relative to the cache root's parent
    pub output_path: PathBuf,
    pub project_id: String,
    pub scene_number: u32,
    #[serde(default)]
    pub status: DownloadStatus,
    #[serde(default)]
    pub retry_count: u32,
    /// Failure reason (last error for failed jobs)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl DownloadJob {
    /// Create a queued download job.
    pub fn new(
        suggestion_id: impl Into<String>,
        video_id: impl Into<String>,
        segment_duration: f64,
        output_path: impl Into<PathBuf>,
        project_id: impl Into<String>,
        scene_number: u32,
    ) -> Self {
        Self {
            id: JobId::new(),
            suggestion_id: suggestion_id.into(),
            video_id: video_id.into(),
            segment_duration,
            output_path: output_path.into(),
            project_id: project_id.into(),
            scene_number,
            status: DownloadStatus::Queued,
            retry_count: 0,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Build the default segment download for a chosen suggestion.
    ///
    /// Fetches at most [`MAX_SEGMENT_DURATION`] seconds and writes to
    /// `<cache_dir>/videos/<project>/suggestions/<video_id>-<duration>s.mp4`.
    /// `cache_dir` must be the cache root the fetcher is configured with.
    pub fn for_suggestion(
        cache_dir: impl AsRef<Path>,
        suggestion_id: impl Into<String>,
        video_id: impl Into<String>,
        clip_duration: Option<f64>,
        project_id: impl Into<String>,
        scene_number: u32,
    ) -> Self {
        let video_id = video_id.into();
        let project_id = project_id.into();
        let segment_duration = segment_duration_for(clip_duration);
        let output_path =
            suggestion_segment_path(cache_dir.as_ref(), &project_id, &video_id, segment_duration);

        Self::new(
            suggestion_id,
            video_id,
            segment_duration,
            output_path,
            project_id,
            scene_number,
        )
    }

    /// Identity used to reject duplicate fetches of the same clip.
    pub fn clip_key(&self) -> &str {
        &self.suggestion_id
    }

    pub fn mark_processing(&mut self) {
        self.status = DownloadStatus::Processing;
    }

    pub fn mark_complete(&mut self) {
        self.status = DownloadStatus::Complete;
        self.error = None;
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = DownloadStatus::Failed;
        self.error = Some(reason.into());
    }

    /// Record a transient failure that will be retried.
    pub fn record_retry(&mut self, error: impl Into<String>) {
        self.retry_count += 1;
        self.error = Some(error.into());
    }

    /// Return an orphaned job to the queue.
    pub fn reset_to_queued(&mut self) {
        self.status = DownloadStatus::Queued;
    }
}

/// Segment length for a clip: its own duration when shorter, capped at 15s.
pub fn segment_duration_for(clip_duration: Option<f64>) -> f64 {
    match clip_duration {
        Some(d) if d > 0.0 => d.min(MAX_SEGMENT_DURATION),
        _ => MAX_SEGMENT_DURATION,
    }
}

/// Cache path for a suggestion's downloaded segment.
pub fn suggestion_segment_path(
    cache_dir: &Path,
    project_id: &str,
    video_id: &str,
    segment_duration: f64,
) -> PathBuf {
    cache_dir
        .join("videos")
        .join(project_id)
        .join("suggestions")
        .join(format!("{}-{}s.mp4", video_id, segment_duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_suggestion_caps_duration() {
        let job = DownloadJob::for_suggestion(DEFAULT_CACHE_DIR, "s1", "dQw4w9WgXcQ", Some(240.0), "p1", 2);
        assert_eq!(job.segment_duration, 15.0);
        assert_eq!(
            job.output_path,
            PathBuf::from(".cache/videos/p1/suggestions/dQw4w9WgXcQ-15s.mp4")
        );
        assert_eq!(job.status, DownloadStatus::Queued);
        assert_eq!(job.retry_count, 0);
    }

    #[test]
    fn test_for_suggestion_uses_given_cache_root() {
        let job = DownloadJob::for_suggestion("/var/cache/reel", "s1", "dQw4w9WgXcQ", Some(8.0), "p1", 1);
        assert_eq!(
            job.output_path,
            PathBuf::from("/var/cache/reel/videos/p1/suggestions/dQw4w9WgXcQ-8s.mp4")
        );
    }

    #[test]
    fn test_short_clip_keeps_own_duration() {
        assert_eq!(segment_duration_for(Some(9.5)), 9.5);
        assert_eq!(segment_duration_for(None), 15.0);
        assert_eq!(segment_duration_for(Some(0.0)), 15.0);
    }

    #[test]
    fn test_record_uses_camel_case_fields() {
        let job = DownloadJob::new("s1", "vid", 10.0, "out.mp4", "p1", 1);
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["suggestionId"], "s1");
        assert_eq!(value["segmentDuration"], 10.0);
        assert_eq!(value["retryCount"], 0);
        assert_eq!(value["status"], "queued");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_failed_jobs_do_not_block_duplicates() {
        assert!(DownloadStatus::Queued.blocks_duplicate());
        assert!(DownloadStatus::Processing.blocks_duplicate());
        assert!(DownloadStatus::Complete.blocks_duplicate());
        assert!(!DownloadStatus::Failed.blocks_duplicate());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        assert_eq!("processing".parse::<DownloadStatus>().unwrap(), DownloadStatus::Processing);
        assert!("downloading".parse::<DownloadStatus>().is_err());
    }
}
