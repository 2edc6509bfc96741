//! Download job rows, the source of truth for job status.
//!
//! Every mutation runs under one lock and is persisted before it becomes
//! visible, so a transition either lands in the store file or not at all.

use reel_models::{DownloadJob, DownloadStatus, JobId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{QueueError, QueueResult};
use crate::json_file;

/// Per-project counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub total: usize,
    pub completed: usize,
    pub processing: usize,
    pub queued: usize,
    pub failed: usize,
}

/// Persisted download job rows.
pub struct DownloadJobStore {
    rows: Mutex<Vec<DownloadJob>>,
    path: Option<PathBuf>,
}

impl DownloadJobStore {
    /// Store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            path: None,
        }
    }

    /// Open a file-backed store, loading any rows already written to `path`.
    pub async fn open(path: impl Into<PathBuf>) -> QueueResult<Self> {
        let path = path.into();
        let rows: Vec<DownloadJob> = json_file::load(&path).await?.unwrap_or_default();
        info!(path = %path.display(), rows = rows.len(), "Opened download job store");
        Ok(Self {
            rows: Mutex::new(rows),
            path: Some(path),
        })
    }

    /// Apply `f` to a copy of the rows, persist, then publish.
    async fn transact<T>(
        &self,
        f: impl FnOnce(&mut Vec<DownloadJob>) -> QueueResult<T>,
    ) -> QueueResult<T> {
        let mut rows = self.rows.lock().await;
        let mut next = rows.clone();
        let out = f(&mut next)?;
        if let Some(path) = &self.path {
            json_file::save(path, &next).await?;
        }
        *rows = next;
        Ok(out)
    }

    fn row_mut<'a>(rows: &'a mut [DownloadJob], id: &JobId) -> QueueResult<&'a mut DownloadJob> {
        rows.iter_mut()
            .find(|j| &j.id == id)
            .ok_or_else(|| QueueError::JobNotFound(id.clone()))
    }

    /// Insert a new queued row, rejecting duplicates of a live or finished clip.
    pub async fn insert(&self, job: DownloadJob) -> QueueResult<DownloadJob> {
        self.transact(|rows| {
            if let Some(existing) = rows
                .iter()
                .find(|j| j.clip_key() == job.clip_key() && j.status.blocks_duplicate())
            {
                return Err(QueueError::DuplicateJob {
                    suggestion_id: job.suggestion_id.clone(),
                    existing: existing.id.clone(),
                    status: existing.status,
                });
            }
            let mut job = job;
            job.status = DownloadStatus::Queued;
            rows.push(job.clone());
            Ok(job)
        })
        .await
    }

    pub async fn get(&self, id: &JobId) -> Option<DownloadJob> {
        self.rows.lock().await.iter().find(|j| &j.id == id).cloned()
    }

    /// Queued, processing or complete row for a clip, if any.
    pub async fn find_active_by_suggestion(&self, suggestion_id: &str) -> Option<DownloadJob> {
        self.rows
            .lock()
            .await
            .iter()
            .find(|j| j.clip_key() == suggestion_id && j.status.blocks_duplicate())
            .cloned()
    }

    /// Check-and-set `queued -> processing`.
    ///
    /// Returns `None` when the row is no longer queued.
    pub async fn claim(&self, id: &JobId) -> QueueResult<Option<DownloadJob>> {
        self.transact(|rows| {
            let row = Self::row_mut(rows, id)?;
            if row.status != DownloadStatus::Queued {
                debug!(job_id = %id, status = %row.status, "Job not claimable");
                return Ok(None);
            }
            row.mark_processing();
            Ok(Some(row.clone()))
        })
        .await
    }

    /// Count a transient failure against a processing row.
    pub async fn record_retry(&self, id: &JobId, error: &str) -> QueueResult<DownloadJob> {
        self.transact(|rows| {
            let row = Self::row_mut(rows, id)?;
            Self::require(row, DownloadStatus::Processing, DownloadStatus::Processing)?;
            row.record_retry(error);
            Ok(row.clone())
        })
        .await
    }

    pub async fn complete(&self, id: &JobId) -> QueueResult<DownloadJob> {
        self.transact(|rows| {
            let row = Self::row_mut(rows, id)?;
            Self::require(row, DownloadStatus::Processing, DownloadStatus::Complete)?;
            row.mark_complete();
            Ok(row.clone())
        })
        .await
    }

    pub async fn fail(&self, id: &JobId, reason: &str) -> QueueResult<DownloadJob> {
        self.transact(|rows| {
            let row = Self::row_mut(rows, id)?;
            Self::require(row, DownloadStatus::Processing, DownloadStatus::Failed)?;
            row.mark_failed(reason);
            Ok(row.clone())
        })
        .await
    }

    /// Fail every complete row whose segment `removed` reports gone, so the
    /// clip can be fetched again. Returns how many rows changed.
    pub async fn expire_outputs(
        &self,
        reason: &str,
        removed: impl Fn(&DownloadJob) -> bool,
    ) -> QueueResult<usize> {
        self.transact(|rows| {
            let mut expired = 0;
            for row in rows
                .iter_mut()
                .filter(|j| j.status == DownloadStatus::Complete)
            {
                if removed(row) {
                    debug!(job_id = %row.id, output = %row.output_path.display(), "Expiring removed segment");
                    row.mark_failed(reason);
                    expired += 1;
                }
            }
            Ok(expired)
        })
        .await
    }

    fn require(row: &DownloadJob, from: DownloadStatus, to: DownloadStatus) -> QueueResult<()> {
        if row.status == from {
            Ok(())
        } else {
            Err(QueueError::InvalidTransition {
                job_id: row.id.clone(),
                from: row.status,
                to,
            })
        }
    }

    /// Reset `processing` rows with no live worker back to `queued`.
    ///
    /// Returns the reset rows in store order.
    pub async fn reset_orphaned(&self, live: &HashSet<JobId>) -> QueueResult<Vec<DownloadJob>> {
        self.transact(|rows| {
            let mut reset = Vec::new();
            for row in rows.iter_mut() {
                if row.status == DownloadStatus::Processing && !live.contains(&row.id) {
                    row.reset_to_queued();
                    reset.push(row.clone());
                }
            }
            Ok(reset)
        })
        .await
    }

    /// Queued rows, oldest first.
    pub async fn queued_rows(&self) -> Vec<DownloadJob> {
        let mut queued: Vec<DownloadJob> = self
            .rows
            .lock()
            .await
            .iter()
            .filter(|j| j.status == DownloadStatus::Queued)
            .cloned()
            .collect();
        queued.sort_by_key(|j| j.created_at);
        queued
    }

    pub async fn all(&self) -> Vec<DownloadJob> {
        self.rows.lock().await.clone()
    }

    /// Counts by status for one project.
    pub async fn status(&self, project_id: &str) -> QueueStatus {
        let rows = self.rows.lock().await;
        let mut status = QueueStatus::default();
        for row in rows.iter().filter(|j| j.project_id == project_id) {
            status.total += 1;
            match row.status {
                DownloadStatus::Queued => status.queued += 1,
                DownloadStatus::Processing => status.processing += 1,
                DownloadStatus::Complete => status.completed += 1,
                DownloadStatus::Failed => status.failed += 1,
            }
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn job(suggestion: &str) -> DownloadJob {
        DownloadJob::for_suggestion(".cache", suggestion, "dQw4w9WgXcQ", Some(12.0), "proj-1", 1)
    }

    #[tokio::test]
    async fn test_duplicate_rejected_until_failed() {
        let store = DownloadJobStore::in_memory();
        let first = store.insert(job("sugg-1")).await.unwrap();

        let err = store.insert(job("sugg-1")).await.unwrap_err();
        assert!(err.is_duplicate());

        store.claim(&first.id).await.unwrap().unwrap();
        store.fail(&first.id, "Video unavailable").await.unwrap();

        // a failed clip may be fetched again
        store.insert(job("sugg-1")).await.unwrap();
        assert_eq!(store.all().await.len(), 2);
    }

    #[tokio::test]
    async fn test_claim_is_check_and_set() {
        let store = DownloadJobStore::in_memory();
        let row = store.insert(job("sugg-1")).await.unwrap();

        let claimed = store.claim(&row.id).await.unwrap().unwrap();
        assert_eq!(claimed.status, DownloadStatus::Processing);
        assert!(store.claim(&row.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transitions_require_processing() {
        let store = DownloadJobStore::in_memory();
        let row = store.insert(job("sugg-1")).await.unwrap();

        let err = store.complete(&row.id).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidTransition { .. }));

        let missing = store.fail(&JobId::from_string("nope"), "x").await.unwrap_err();
        assert!(matches!(missing, QueueError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn test_record_retry_increments() {
        let store = DownloadJobStore::in_memory();
        let row = store.insert(job("sugg-1")).await.unwrap();
        store.claim(&row.id).await.unwrap();

        store.record_retry(&row.id, "HTTP Error 503").await.unwrap();
        let updated = store.record_retry(&row.id, "HTTP Error 429").await.unwrap();

        assert_eq!(updated.retry_count, 2);
        assert_eq!(updated.error.as_deref(), Some("HTTP Error 429"));
        assert_eq!(updated.status, DownloadStatus::Processing);
    }

    #[tokio::test]
    async fn test_reset_orphaned_skips_live_jobs() {
        let store = DownloadJobStore::in_memory();
        let a = store.insert(job("a")).await.unwrap();
        let b = store.insert(job("b")).await.unwrap();
        store.claim(&a.id).await.unwrap();
        store.claim(&b.id).await.unwrap();

        let live: HashSet<JobId> = [b.id.clone()].into_iter().collect();
        let reset = store.reset_orphaned(&live).await.unwrap();

        assert_eq!(reset.len(), 1);
        assert_eq!(reset[0].id, a.id);
        assert_eq!(store.get(&b.id).await.unwrap().status, DownloadStatus::Processing);
    }

    #[tokio::test]
    async fn test_status_counts_by_project() {
        let store = DownloadJobStore::in_memory();
        let a = store.insert(job("a")).await.unwrap();
        let b = store.insert(job("b")).await.unwrap();
        store.insert(job("c")).await.unwrap();
        store
            .insert(DownloadJob::for_suggestion(".cache", "d", "dQw4w9WgXcQ", None, "proj-2", 1))
            .await
            .unwrap();

        store.claim(&a.id).await.unwrap();
        store.complete(&a.id).await.unwrap();
        store.claim(&b.id).await.unwrap();

        assert_eq!(
            store.status("proj-1").await,
            QueueStatus {
                total: 3,
                completed: 1,
                processing: 1,
                queued: 1,
                failed: 0,
            }
        );
        assert_eq!(store.status("proj-2").await.queued, 1);
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("download-jobs.json");

        let id = {
            let store = DownloadJobStore::open(&path).await.unwrap();
            let row = store.insert(job("sugg-1")).await.unwrap();
            store.claim(&row.id).await.unwrap();
            row.id
        };

        let reopened = DownloadJobStore::open(&path).await.unwrap();
        let row = reopened.get(&id).await.unwrap();
        assert_eq!(row.status, DownloadStatus::Processing);
    }
}
