//! Bounded-concurrency download queue.
//!
//! Jobs are admitted FIFO while fewer than `max_concurrent` are running. A
//! job only runs after its row has been claimed (`queued -> processing`), so
//! a job that was claimed elsewhere or already finished is skipped.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use reel_models::{DownloadJob, JobId};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::error::{FetchError, QueueResult};
use crate::fetch::ClipFetcher;
use crate::metrics;
use crate::retry::RetryConfig;
use crate::snapshot::{QueueState, SnapshotWriter};
use crate::store::{DownloadJobStore, QueueStatus};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum downloads running at once
    pub max_concurrent: usize,
    pub retry: RetryConfig,
    /// Snapshot file; `None` disables snapshots
    pub state_path: Option<PathBuf>,
    /// Job row file; `None` keeps rows in memory
    pub store_path: Option<PathBuf>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            retry: RetryConfig::default(),
            state_path: None,
            store_path: None,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent: std::env::var("DOWNLOAD_MAX_CONCURRENT")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent),
            retry: RetryConfig {
                max_retries: std::env::var("DOWNLOAD_MAX_RETRIES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.retry.max_retries),
                base_delay: Duration::from_millis(
                    std::env::var("DOWNLOAD_RETRY_BASE_MS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(1000),
                ),
                max_delay: Duration::from_millis(
                    std::env::var("DOWNLOAD_RETRY_MAX_MS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(8000),
                ),
            },
            state_path: std::env::var("DOWNLOAD_STATE_PATH").ok().map(PathBuf::from),
            store_path: std::env::var("DOWNLOAD_STORE_PATH").ok().map(PathBuf::from),
        }
    }

    /// Defaults with both files placed under `cache_dir`, unless already set.
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        let cache_dir = cache_dir.into();
        if self.state_path.is_none() {
            self.state_path = Some(cache_dir.join("queue-state.json"));
        }
        if self.store_path.is_none() {
            self.store_path = Some(cache_dir.join("download-jobs.json"));
        }
        self
    }
}

/// What [`DownloadQueue::initialize`] found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Recovery {
    /// `processing` rows returned to `queued`
    pub orphaned: usize,
    /// Jobs placed back on the pending list
    pub resumed: usize,
}

#[derive(Default)]
struct Schedule {
    pending: VecDeque<JobId>,
    active: HashSet<JobId>,
}

struct Inner {
    config: QueueConfig,
    store: Arc<DownloadJobStore>,
    fetcher: Arc<dyn ClipFetcher>,
    snapshot: SnapshotWriter,
    snapshot_gate: tokio::sync::Mutex<()>,
    permits: Arc<Semaphore>,
    schedule: Mutex<Schedule>,
    idle: Notify,
}

/// Download queue handle. Cheap to clone.
#[derive(Clone)]
pub struct DownloadQueue {
    inner: Arc<Inner>,
}

impl DownloadQueue {
    pub fn new(
        config: QueueConfig,
        store: Arc<DownloadJobStore>,
        fetcher: Arc<dyn ClipFetcher>,
    ) -> Self {
        let snapshot = match &config.state_path {
            Some(path) => SnapshotWriter::new(path),
            None => SnapshotWriter::disabled(),
        };
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                fetcher,
                snapshot,
                snapshot_gate: tokio::sync::Mutex::new(()),
                permits,
                schedule: Mutex::new(Schedule::default()),
                idle: Notify::new(),
            }),
        }
    }

    /// Open the configured row store and build a queue over it.
    pub async fn open(config: QueueConfig, fetcher: Arc<dyn ClipFetcher>) -> QueueResult<Self> {
        let store = match &config.store_path {
            Some(path) => DownloadJobStore::open(path).await?,
            None => DownloadJobStore::in_memory(),
        };
        Ok(Self::new(config, Arc::new(store), fetcher))
    }

    pub fn store(&self) -> &Arc<DownloadJobStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    fn schedule(&self) -> std::sync::MutexGuard<'_, Schedule> {
        self.inner
            .schedule
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist a new job and start it when a slot is free.
    ///
    /// Fails with [`crate::QueueError::DuplicateJob`] when the clip already has
    /// a queued, processing or complete job.
    pub async fn enqueue(&self, job: DownloadJob) -> QueueResult<DownloadJob> {
        let job = self.inner.store.insert(job).await?;
        info!(
            job_id = %job.id,
            suggestion_id = %job.suggestion_id,
            video_id = %job.video_id,
            project_id = %job.project_id,
            "Enqueued clip download"
        );
        metrics::record_enqueued();

        self.schedule().pending.push_back(job.id.clone());
        self.save_snapshot().await;
        self.pump();
        Ok(job)
    }

    /// Recover from a previous run and resume pending work.
    ///
    /// Orphaned `processing` rows go first, then the snapshot's order, then
    /// any other queued rows oldest first.
    pub async fn initialize(&self) -> QueueResult<Recovery> {
        let live = self.schedule().active.clone();
        let orphaned = self.inner.store.reset_orphaned(&live).await?;
        for job in &orphaned {
            warn!(job_id = %job.id, video_id = %job.video_id, "Recovered orphaned download");
        }

        let queued = self.inner.store.queued_rows().await;
        let queued_ids: HashSet<&JobId> = queued.iter().map(|j| &j.id).collect();
        let snapshot_order: Vec<JobId> = self
            .inner
            .snapshot
            .load()
            .await
            .map(|s| s.queue.into_iter().map(|j| j.id).collect())
            .unwrap_or_default();

        let ordered = orphaned
            .iter()
            .map(|j| j.id.clone())
            .chain(snapshot_order)
            .chain(queued.iter().map(|j| j.id.clone()));

        let resumed = {
            let mut schedule = self.schedule();
            let mut seen: HashSet<JobId> = schedule.pending.iter().cloned().collect();
            seen.extend(schedule.active.iter().cloned());
            let mut resumed = 0;
            for id in ordered {
                if queued_ids.contains(&id) && seen.insert(id.clone()) {
                    schedule.pending.push_back(id);
                    resumed += 1;
                }
            }
            resumed
        };

        info!(orphaned = orphaned.len(), resumed, "Download queue initialized");
        self.save_snapshot().await;
        self.pump();

        Ok(Recovery {
            orphaned: orphaned.len(),
            resumed,
        })
    }

    /// Start pending jobs while slots are free.
    fn pump(&self) {
        loop {
            let (id, permit) = {
                let mut schedule = self.schedule();
                if schedule.pending.is_empty() {
                    break;
                }
                let Ok(permit) = self.inner.permits.clone().try_acquire_owned() else {
                    break;
                };
                let Some(id) = schedule.pending.pop_front() else {
                    break;
                };
                schedule.active.insert(id.clone());
                (id, permit)
            };

            let queue = self.clone();
            tokio::spawn(async move {
                queue.run(id, permit).await;
            });
        }
        self.report_depth();
    }

    async fn run(&self, id: JobId, permit: OwnedSemaphorePermit) {
        match self.claim(&id).await {
            Ok(Some(job)) => {
                self.save_snapshot().await;
                self.execute(job).await;
            }
            Ok(None) => debug!(job_id = %id, "Skipping job that could not be claimed"),
            Err(e) => error!(
                job_id = %id,
                error = %e,
                "Failed to claim download job, leaving it queued for the next start"
            ),
        }

        self.schedule().active.remove(&id);
        drop(permit);
        self.save_snapshot().await;
        self.pump();

        if self.is_idle() {
            self.inner.idle.notify_waiters();
        }
    }

    /// Claim `id`, retrying store errors with the fetch backoff. The row is
    /// still `queued` when every attempt fails.
    async fn claim(&self, id: &JobId) -> QueueResult<Option<DownloadJob>> {
        let retry = &self.inner.config.retry;
        let mut attempt = 0;
        loop {
            match self.inner.store.claim(id).await {
                Err(e) if retry.can_retry(attempt) => {
                    attempt += 1;
                    let delay = retry.delay_for_retry(attempt);
                    warn!(
                        job_id = %id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Failed to claim download job, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// Fetch with retries, then record the terminal status.
    async fn execute(&self, mut job: DownloadJob) {
        let retry = &self.inner.config.retry;
        let started = Instant::now();

        loop {
            let result = self.inner.fetcher.fetch(&job).await;
            let outcome = match result {
                Ok(path) => {
                    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                        self.inner.store.complete(&job.id).await.map(|_| "complete")
                    } else {
                        let reason = format!("Output file not found after download: {}", path.display());
                        self.inner.store.fail(&job.id, &reason).await.map(|_| "failed")
                    }
                }
                Err(FetchError::Transient(message)) if retry.can_retry(job.retry_count) => {
                    match self.inner.store.record_retry(&job.id, &message).await {
                        Ok(updated) => {
                            job = updated;
                            metrics::record_retry();
                            let delay = retry.delay_for_retry(job.retry_count);
                            warn!(
                                job_id = %job.id,
                                video_id = %job.video_id,
                                retry = job.retry_count,
                                max_retries = retry.max_retries,
                                delay_ms = delay.as_millis() as u64,
                                error = %message,
                                "Transient download failure, retrying"
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        Err(e) => Err(e),
                    }
                }
                Err(FetchError::Transient(message)) => {
                    let reason = format!("Max retries exhausted. Last error: {}", message);
                    self.inner.store.fail(&job.id, &reason).await.map(|_| "exhausted")
                }
                Err(FetchError::Permanent(message)) => {
                    self.inner.store.fail(&job.id, &message).await.map(|_| "failed")
                }
            };

            match outcome {
                Ok(outcome) => {
                    metrics::record_finished(outcome);
                    let elapsed_secs = started.elapsed().as_secs_f64();
                    if outcome == "complete" {
                        info!(job_id = %job.id, video_id = %job.video_id, elapsed_secs, "Clip download complete");
                    } else {
                        warn!(job_id = %job.id, video_id = %job.video_id, outcome, "Clip download failed");
                    }
                }
                Err(e) => error!(job_id = %job.id, error = %e, "Failed to record download outcome"),
            }
            return;
        }
    }

    async fn save_snapshot(&self) {
        // state is read under the gate so an older view never overwrites a newer one
        let _gate = self.inner.snapshot_gate.lock().await;
        let (pending, active) = {
            let schedule = self.schedule();
            let pending: Vec<JobId> = schedule.pending.iter().cloned().collect();
            let mut active: Vec<JobId> = schedule.active.iter().cloned().collect();
            active.sort();
            (pending, active)
        };

        let rows = self.inner.store.all().await;
        let queue = pending
            .iter()
            .filter_map(|id| rows.iter().find(|j| &j.id == id).cloned())
            .collect();
        self.inner.snapshot.save(&QueueState::new(queue, active)).await;
    }

    fn report_depth(&self) {
        let schedule = self.schedule();
        metrics::set_queue_depth(schedule.active.len(), schedule.pending.len());
    }

    fn is_idle(&self) -> bool {
        let schedule = self.schedule();
        schedule.pending.is_empty() && schedule.active.is_empty()
    }

    /// Wait until nothing is pending or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Counts by status for one project.
    pub async fn status(&self, project_id: &str) -> QueueStatus {
        self.inner.store.status(project_id).await
    }

    /// Jobs currently holding a slot.
    pub fn active_count(&self) -> usize {
        self.schedule().active.len()
    }

    /// Jobs waiting for a slot.
    pub fn pending_count(&self) -> usize {
        self.schedule().pending.len()
    }
}
