//! Durable snapshot of queued and in-flight downloads.

use chrono::{DateTime, Utc};
use reel_models::{DownloadJob, JobId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::json_file;
use crate::retry::FailureTracker;

/// What the queue looked like after its last transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueState {
    /// Pending jobs in FIFO order
    pub queue: Vec<DownloadJob>,
    /// Jobs running when the snapshot was taken
    pub active: Vec<JobId>,
    pub timestamp: DateTime<Utc>,
}

impl QueueState {
    pub fn new(queue: Vec<DownloadJob>, active: Vec<JobId>) -> Self {
        Self {
            queue,
            active,
            timestamp: Utc::now(),
        }
    }
}

/// Writes [`QueueState`] to disk. Failures are logged, never returned.
pub struct SnapshotWriter {
    path: Option<PathBuf>,
    failures: Mutex<FailureTracker>,
}

impl SnapshotWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            failures: Mutex::new(FailureTracker::new(3)),
        }
    }

    /// Writer that keeps nothing.
    pub fn disabled() -> Self {
        Self {
            path: None,
            failures: Mutex::new(FailureTracker::new(3)),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn save(&self, state: &QueueState) {
        let Some(path) = &self.path else {
            return;
        };
        let mut failures = self.failures.lock().await;
        match json_file::save(path, state).await {
            Ok(()) => {
                failures.record_success();
                debug!(
                    queued = state.queue.len(),
                    active = state.active.len(),
                    "Saved queue snapshot"
                );
            }
            Err(e) => {
                if failures.record_failure() {
                    warn!(path = %path.display(), error = %e, "Failed to save queue snapshot");
                }
            }
        }
    }

    /// Last saved state. A missing or unreadable snapshot yields `None`.
    pub async fn load(&self) -> Option<QueueState> {
        let path = self.path.as_ref()?;
        match json_file::load(path).await {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable queue snapshot");
                None
            }
        }
    }
}
