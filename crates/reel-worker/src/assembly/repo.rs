//! Assembly job rows.
//!
//! Each call is one atomic update under the store lock; file-backed stores
//! persist before the change becomes visible.

use reel_models::{AssemblyJob, AssemblyTransition, JobId};
use reel_queue::json_file;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{WorkerError, WorkerResult};

pub struct AssemblyJobStore {
    rows: Mutex<Vec<AssemblyJob>>,
    path: Option<PathBuf>,
}

impl AssemblyJobStore {
    pub fn in_memory() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            path: None,
        }
    }

    /// Open a file-backed store. Rows left mid-stage by a crash are loaded as
    /// they were; see [`abandon_interrupted`](Self::abandon_interrupted).
    pub async fn open(path: impl Into<PathBuf>) -> WorkerResult<Self> {
        let path = path.into();
        let rows: Vec<AssemblyJob> = json_file::load(&path).await?.unwrap_or_default();
        info!(path = %path.display(), rows = rows.len(), "Opened assembly job store");
        Ok(Self {
            rows: Mutex::new(rows),
            path: Some(path),
        })
    }

    async fn transact<T>(
        &self,
        f: impl FnOnce(&mut Vec<AssemblyJob>) -> WorkerResult<T>,
    ) -> WorkerResult<T> {
        let mut rows = self.rows.lock().await;
        let mut next = rows.clone();
        let out = f(&mut next)?;
        if let Some(path) = &self.path {
            json_file::save(path, &next).await?;
        }
        *rows = next;
        Ok(out)
    }

    /// Insert `job` unless its project already has a pending or processing job.
    pub async fn insert_if_idle(&self, job: AssemblyJob) -> WorkerResult<AssemblyJob> {
        self.transact(|rows| {
            if let Some(active) = rows
                .iter()
                .find(|j| j.project_id == job.project_id && j.is_active())
            {
                return Err(WorkerError::JobAlreadyExists {
                    project_id: job.project_id.clone(),
                    job_id: active.id.clone(),
                });
            }
            rows.push(job.clone());
            Ok(job)
        })
        .await
    }

    pub async fn apply(&self, id: &JobId, transition: AssemblyTransition) -> WorkerResult<AssemblyJob> {
        self.transact(|rows| {
            let row = rows
                .iter_mut()
                .find(|j| &j.id == id)
                .ok_or_else(|| WorkerError::JobNotFound(id.clone()))?;
            row.apply(transition)?;
            Ok(row.clone())
        })
        .await
    }

    /// Fail every pending or processing row with `message`.
    ///
    /// Called once at startup, before any job of this process exists, so
    /// rows a previous process left active stop blocking their project.
    /// Stage and progress are kept for inspection.
    pub async fn abandon_interrupted(&self, message: &str) -> WorkerResult<Vec<JobId>> {
        let abandoned = self
            .transact(|rows| {
                let mut ids = Vec::new();
                for row in rows.iter_mut().filter(|j| j.is_active()) {
                    row.apply(AssemblyTransition::Fail {
                        message: message.to_string(),
                    })?;
                    ids.push(row.id.clone());
                }
                Ok(ids)
            })
            .await?;
        for id in &abandoned {
            warn!(job_id = %id, "Abandoned assembly job interrupted by restart");
        }
        Ok(abandoned)
    }

    pub async fn get(&self, id: &JobId) -> Option<AssemblyJob> {
        self.rows.lock().await.iter().find(|j| &j.id == id).cloned()
    }

    /// Most recently created job for a project.
    pub async fn latest_for_project(&self, project_id: &str) -> Option<AssemblyJob> {
        self.rows
            .lock()
            .await
            .iter()
            .filter(|j| j.project_id == project_id)
            .max_by_key(|j| j.created_at)
            .cloned()
    }

    pub async fn has_active_job(&self, project_id: &str) -> bool {
        self.rows
            .lock()
            .await
            .iter()
            .any(|j| j.project_id == project_id && j.is_active())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::{AssemblyStage, AssemblyStatus};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_one_active_job_per_project() {
        let store = AssemblyJobStore::in_memory();
        let first = store.insert_if_idle(AssemblyJob::new("proj-1", 3)).await.unwrap();

        let err = store
            .insert_if_idle(AssemblyJob::new("proj-1", 3))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::JobAlreadyExists { ref job_id, .. } if *job_id == first.id));

        // other projects are unaffected
        store.insert_if_idle(AssemblyJob::new("proj-2", 1)).await.unwrap();

        store
            .apply(&first.id, AssemblyTransition::Fail { message: "boom".into() })
            .await
            .unwrap();
        assert!(!store.has_active_job("proj-1").await);
        store.insert_if_idle(AssemblyJob::new("proj-1", 3)).await.unwrap();
    }

    #[tokio::test]
    async fn test_latest_for_project() {
        let store = AssemblyJobStore::in_memory();
        let old = store.insert_if_idle(AssemblyJob::new("proj-1", 2)).await.unwrap();
        store.apply(&old.id, AssemblyTransition::Complete).await.unwrap();

        let mut newer = AssemblyJob::new("proj-1", 2);
        newer.created_at = old.created_at + chrono::Duration::seconds(5);
        let newer = store.insert_if_idle(newer).await.unwrap();

        assert_eq!(store.latest_for_project("proj-1").await.unwrap().id, newer.id);
        assert!(store.latest_for_project("proj-9").await.is_none());
    }

    #[tokio::test]
    async fn test_terminal_rows_reject_updates() {
        let store = AssemblyJobStore::in_memory();
        let job = store.insert_if_idle(AssemblyJob::new("proj-1", 1)).await.unwrap();
        store.apply(&job.id, AssemblyTransition::Complete).await.unwrap();

        let err = store
            .apply(
                &job.id,
                AssemblyTransition::Progress {
                    progress: 10,
                    stage: AssemblyStage::Trimming,
                    current_scene: Some(1),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Transition(_)));
        assert_eq!(store.get(&job.id).await.unwrap().status, AssemblyStatus::Complete);
    }

    #[tokio::test]
    async fn test_interrupted_job_released_after_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("assembly-jobs.json");
        let id = {
            let store = AssemblyJobStore::open(&path).await.unwrap();
            let job = store.insert_if_idle(AssemblyJob::new("proj-1", 2)).await.unwrap();
            store
                .apply(
                    &job.id,
                    AssemblyTransition::Progress {
                        progress: 55,
                        stage: AssemblyStage::Concatenating,
                        current_scene: None,
                    },
                )
                .await
                .unwrap();
            store.insert_if_idle(AssemblyJob::new("proj-2", 1)).await.unwrap();
            job.id
        };

        let reopened = AssemblyJobStore::open(&path).await.unwrap();
        assert!(reopened.has_active_job("proj-1").await);

        let abandoned = reopened.abandon_interrupted("Interrupted by restart").await.unwrap();
        assert_eq!(abandoned.len(), 2);
        assert!(abandoned.contains(&id));

        let row = reopened.get(&id).await.unwrap();
        assert_eq!(row.status, AssemblyStatus::Error);
        assert_eq!(row.error_message.as_deref(), Some("Interrupted by restart"));
        assert_eq!(row.current_stage, Some(AssemblyStage::Concatenating));
        assert_eq!(row.progress, 55);
        assert!(!reopened.has_active_job("proj-1").await);

        // a fresh job can now be created for the project
        let fresh = reopened.insert_if_idle(AssemblyJob::new("proj-1", 2)).await.unwrap();
        assert_ne!(fresh.id, id);

        // the abandoned state was persisted
        let again = AssemblyJobStore::open(&path).await.unwrap();
        assert_eq!(again.get(&id).await.unwrap().status, AssemblyStatus::Error);
    }

    #[tokio::test]
    async fn test_abandon_leaves_finished_rows() {
        let store = AssemblyJobStore::in_memory();
        let done = store.insert_if_idle(AssemblyJob::new("proj-1", 1)).await.unwrap();
        store.apply(&done.id, AssemblyTransition::Complete).await.unwrap();

        assert!(store.abandon_interrupted("Interrupted by restart").await.unwrap().is_empty());
        assert_eq!(store.get(&done.id).await.unwrap().status, AssemblyStatus::Complete);
    }
}
