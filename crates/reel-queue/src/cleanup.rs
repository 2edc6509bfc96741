//! Retention for downloaded clip segments.
//!
//! Segments live under `<cache_dir>/videos/<project>/suggestions/`. Files
//! older than the retention window are deleted and the rows that produced
//! them are expired so the clip can be fetched again. Finished project
//! videos next to the `suggestions` directory are never touched.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::store::DownloadJobStore;

/// Default retention window: 7 days.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Directory under each project that holds fetched segments.
pub const SEGMENT_DIR: &str = "suggestions";

const EXPIRED_REASON: &str = "Segment removed by cache cleanup";

#[derive(Debug, Clone, PartialEq)]
pub struct CleanupOptions {
    pub retention: Duration,
    /// Report what would be removed without deleting anything
    pub dry_run: bool,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            dry_run: false,
        }
    }
}

impl CleanupOptions {
    pub fn with_retention_days(mut self, days: u64) -> Self {
        self.retention = Duration::from_secs(days * 24 * 60 * 60);
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// Summary of one cleanup pass. In dry-run mode the file counts are what
/// would have been deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupResult {
    pub files_deleted: usize,
    pub bytes_freed: u64,
    /// Rows expired because their segment was deleted
    pub store_updates: usize,
    /// Stale files no row refers to
    pub orphaned_files: usize,
    pub errors: Vec<String>,
}

#[derive(Debug)]
struct Segment {
    path: PathBuf,
    size: u64,
}

/// Drop `.` components so paths built different ways compare equal.
fn lexical(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

async fn stale_segments_in(dir: &Path, cutoff: SystemTime, errors: &mut Vec<String>) -> Vec<Segment> {
    let mut found = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return found,
        Err(e) => {
            errors.push(format!("Failed to scan {}: {}", dir.display(), e));
            return found;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                errors.push(format!("Failed to scan {}: {}", dir.display(), e));
                break;
            }
        };
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("mp4") {
            continue;
        }
        let meta = match entry.metadata().await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => continue,
            Err(e) => {
                errors.push(format!("Failed to stat {}: {}", path.display(), e));
                continue;
            }
        };
        match meta.modified() {
            Ok(modified) if modified < cutoff => found.push(Segment {
                path,
                size: meta.len(),
            }),
            Ok(_) => {}
            Err(e) => errors.push(format!("Failed to read mtime of {}: {}", path.display(), e)),
        }
    }
    found
}

async fn stale_segments(videos: &Path, cutoff: SystemTime, errors: &mut Vec<String>) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut projects = match fs::read_dir(videos).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %videos.display(), "Video cache does not exist, nothing to clean");
            return segments;
        }
        Err(e) => {
            errors.push(format!("Failed to scan {}: {}", videos.display(), e));
            return segments;
        }
    };

    loop {
        match projects.next_entry().await {
            Ok(Some(entry)) => {
                let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                if is_dir {
                    let dir = entry.path().join(SEGMENT_DIR);
                    segments.extend(stale_segments_in(&dir, cutoff, errors).await);
                }
            }
            Ok(None) => break,
            Err(e) => {
                errors.push(format!("Failed to scan {}: {}", videos.display(), e));
                break;
            }
        }
    }
    segments
}

/// Delete segments older than `options.retention`.
///
/// `base_dir` is what relative row output paths and `cache_dir` are resolved
/// against, as the fetcher does. Failures are collected in
/// [`CleanupResult::errors`]; the pass itself never fails.
pub async fn cleanup_old_segments(
    base_dir: &Path,
    cache_dir: &Path,
    store: &DownloadJobStore,
    options: &CleanupOptions,
) -> CleanupResult {
    let mut result = CleanupResult::default();
    let cutoff = SystemTime::now()
        .checked_sub(options.retention)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let videos = base_dir.join(cache_dir).join("videos");

    info!(
        path = %videos.display(),
        retention_secs = options.retention.as_secs(),
        dry_run = options.dry_run,
        "Starting segment cleanup"
    );

    let stale = stale_segments(&videos, cutoff, &mut result.errors).await;
    if stale.is_empty() {
        debug!("No segments past retention");
        return result;
    }

    let referenced: HashSet<PathBuf> = store
        .all()
        .await
        .iter()
        .map(|row| lexical(&base_dir.join(&row.output_path)))
        .collect();

    let mut removed = HashSet::new();
    for segment in &stale {
        let key = lexical(&segment.path);
        if !referenced.contains(&key) {
            result.orphaned_files += 1;
            debug!(path = %segment.path.display(), "Stale segment has no download row");
        }

        if !options.dry_run {
            if let Err(e) = fs::remove_file(&segment.path).await {
                let message = format!("Failed to delete {}: {}", segment.path.display(), e);
                warn!("{}", message);
                result.errors.push(message);
                continue;
            }
        }
        result.files_deleted += 1;
        result.bytes_freed += segment.size;
        removed.insert(key);
    }

    if !options.dry_run && !removed.is_empty() {
        match store
            .expire_outputs(EXPIRED_REASON, |row| {
                removed.contains(&lexical(&base_dir.join(&row.output_path)))
            })
            .await
        {
            Ok(updated) => result.store_updates = updated,
            Err(e) => result.errors.push(format!("Failed to expire download rows: {}", e)),
        }
        metrics::record_cleanup(result.files_deleted, result.bytes_freed);
    }

    info!(
        files = result.files_deleted,
        bytes_freed = result.bytes_freed,
        store_updates = result.store_updates,
        orphaned = result.orphaned_files,
        errors = result.errors.len(),
        dry_run = options.dry_run,
        "Segment cleanup finished"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::{DownloadJob, DownloadStatus};
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    /// Write `path` with a modification time `age` in the past.
    fn write_aged(path: &Path, bytes: &[u8], age: Duration) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    /// Store with one complete row for `video_id` in `proj-1`.
    async fn store_with_complete(video_id: &str) -> (DownloadJobStore, DownloadJob) {
        let store = DownloadJobStore::in_memory();
        let job = store
            .insert(DownloadJob::for_suggestion(".cache", "sugg-1", video_id, Some(15.0), "proj-1", 1))
            .await
            .unwrap();
        store.claim(&job.id).await.unwrap().unwrap();
        let job = store.complete(&job.id).await.unwrap();
        (store, job)
    }

    #[tokio::test]
    async fn test_old_segments_removed_and_rows_expired() {
        let dir = TempDir::new().unwrap();
        let base = dir.path();
        let (store, job) = store_with_complete("dQw4w9WgXcQ").await;

        let tracked = base.join(&job.output_path);
        write_aged(&tracked, b"0123456789", 8 * DAY);
        let orphan = base.join(".cache/videos/proj-1/suggestions/abcdefghijk-15s.mp4");
        write_aged(&orphan, b"01234", 10 * DAY);
        let fresh = base.join(".cache/videos/proj-2/suggestions/zyxwvutsrqp-15s.mp4");
        write_aged(&fresh, b"012", DAY);
        // finished videos are outside the segment directory
        let final_video = base.join(".cache/videos/proj-1/final.mp4");
        write_aged(&final_video, b"final", 30 * DAY);

        let result = cleanup_old_segments(base, Path::new(".cache"), &store, &CleanupOptions::default()).await;

        assert_eq!(result.files_deleted, 2);
        assert_eq!(result.bytes_freed, 15);
        assert_eq!(result.orphaned_files, 1);
        assert_eq!(result.store_updates, 1);
        assert!(result.errors.is_empty());

        assert!(!tracked.exists());
        assert!(!orphan.exists());
        assert!(fresh.exists());
        assert!(final_video.exists());

        let row = store.get(&job.id).await.unwrap();
        assert_eq!(row.status, DownloadStatus::Failed);
        // the clip can be fetched again
        store
            .insert(DownloadJob::for_suggestion(".cache", "sugg-1", "dQw4w9WgXcQ", Some(15.0), "proj-1", 1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dry_run_deletes_nothing() {
        let dir = TempDir::new().unwrap();
        let base = dir.path();
        let (store, job) = store_with_complete("dQw4w9WgXcQ").await;
        let tracked = base.join(&job.output_path);
        write_aged(&tracked, b"0123456789", 8 * DAY);

        let options = CleanupOptions::default().dry_run();
        let result = cleanup_old_segments(base, Path::new(".cache"), &store, &options).await;

        assert_eq!(result.files_deleted, 1);
        assert_eq!(result.bytes_freed, 10);
        assert_eq!(result.store_updates, 0);
        assert!(tracked.exists());
        assert_eq!(store.get(&job.id).await.unwrap().status, DownloadStatus::Complete);
    }

    #[tokio::test]
    async fn test_retention_is_configurable() {
        let dir = TempDir::new().unwrap();
        let base = dir.path();
        let store = DownloadJobStore::in_memory();
        let segment = base.join("media/videos/proj-1/suggestions/dQw4w9WgXcQ-15s.mp4");
        write_aged(&segment, b"x", 3 * DAY);

        let keep = cleanup_old_segments(base, Path::new("media"), &store, &CleanupOptions::default()).await;
        assert_eq!(keep.files_deleted, 0);
        assert!(segment.exists());

        let options = CleanupOptions::default().with_retention_days(2);
        let purge = cleanup_old_segments(base, Path::new("media"), &store, &options).await;
        assert_eq!(purge.files_deleted, 1);
        assert_eq!(purge.orphaned_files, 1);
        assert!(!segment.exists());
    }

    #[tokio::test]
    async fn test_missing_cache_is_empty_result() {
        let dir = TempDir::new().unwrap();
        let store = DownloadJobStore::in_memory();
        let result =
            cleanup_old_segments(dir.path(), Path::new(".cache"), &store, &CleanupOptions::default()).await;
        assert_eq!(result, CleanupResult::default());
    }
}
