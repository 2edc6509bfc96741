//! Per-job temporary directories.
//!
//! The arena hands out one directory per job id. Callers on the runtime end a
//! lease with [`WorkDir::remove`]; a lease that is simply dropped (early
//! return, panic unwinding) removes its directory synchronously instead.

use reel_models::JobId;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use crate::error::{WorkerError, WorkerResult};

#[derive(Debug, Clone)]
pub struct WorkDirArena {
    root: PathBuf,
    live: Arc<Mutex<HashSet<JobId>>>,
}

impl WorkDirArena {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            live: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create `<root>/<job_id>`. A job id can hold at most one lease.
    pub async fn allocate(&self, job_id: &JobId) -> WorkerResult<WorkDir> {
        {
            let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
            if !live.insert(job_id.clone()) {
                return Err(WorkerError::validation(format!(
                    "Work directory for job {} is already allocated",
                    job_id
                )));
            }
        }

        let path = self.root.join(job_id.as_str());
        let lease = WorkDir {
            job_id: job_id.clone(),
            path,
            live: Arc::clone(&self.live),
            removed: false,
        };
        // on failure the lease drop releases the id
        tokio::fs::create_dir_all(&lease.path).await?;
        debug!(job_id = %job_id, path = %lease.path.display(), "Allocated work directory");
        Ok(lease)
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// A job's private scratch directory.
#[derive(Debug)]
pub struct WorkDir {
    job_id: JobId,
    path: PathBuf,
    live: Arc<Mutex<HashSet<JobId>>>,
    removed: bool,
}

impl WorkDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.path.join(name)
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Delete the directory without blocking the runtime, then release the id.
    pub async fn remove(mut self) {
        let outcome = tokio::fs::remove_dir_all(&self.path).await;
        self.log_removal(outcome);
        self.removed = true;
    }

    fn log_removal(&self, outcome: std::io::Result<()>) {
        match outcome {
            Ok(()) => debug!(job_id = %self.job_id, "Removed work directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                job_id = %self.job_id,
                path = %self.path.display(),
                error = %e,
                "Failed to remove work directory"
            ),
        }
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if !self.removed {
            // fallback for leases that never reached remove(); blocks the caller
            let outcome = std::fs::remove_dir_all(&self.path);
            self.log_removal(outcome);
        }
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_lease_removes_directory_on_drop() {
        let dir = TempDir::new().unwrap();
        let arena = WorkDirArena::new(dir.path());
        let id = JobId::new();

        let lease = arena.allocate(&id).await.unwrap();
        let path = lease.path().to_path_buf();
        std::fs::write(lease.join("scene-1-trimmed.mp4"), b"x").unwrap();
        assert!(path.is_dir());
        assert_eq!(arena.live_count(), 1);

        drop(lease);
        assert!(!path.exists());
        assert_eq!(arena.live_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_deletes_directory_and_releases_id() {
        let dir = TempDir::new().unwrap();
        let arena = WorkDirArena::new(dir.path());
        let id = JobId::new();

        let lease = arena.allocate(&id).await.unwrap();
        let path = lease.path().to_path_buf();
        std::fs::create_dir_all(lease.join("frames")).unwrap();
        std::fs::write(lease.join("frames/frame-001.jpg"), b"x").unwrap();

        lease.remove().await;
        assert!(!path.exists());
        assert_eq!(arena.live_count(), 0);
        // the id can be leased again
        let again = arena.allocate(&id).await.unwrap();
        assert!(again.path().is_dir());
    }

    #[tokio::test]
    async fn test_remove_tolerates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let arena = WorkDirArena::new(dir.path());
        let id = JobId::new();

        let lease = arena.allocate(&id).await.unwrap();
        std::fs::remove_dir_all(lease.path()).unwrap();
        lease.remove().await;
        assert_eq!(arena.live_count(), 0);
    }

    #[tokio::test]
    async fn test_double_allocation_rejected() {
        let dir = TempDir::new().unwrap();
        let arena = WorkDirArena::new(dir.path());
        let id = JobId::new();

        let _lease = arena.allocate(&id).await.unwrap();
        assert!(arena.allocate(&id).await.is_err());
    }
}
