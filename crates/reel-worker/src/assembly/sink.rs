//! Where finished video fields are written for a project.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

use crate::error::{WorkerError, WorkerResult};

/// Video fields recorded on a project once assembly completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectVideo {
    pub video_path: PathBuf,
    pub thumbnail_path: Option<PathBuf>,
    pub duration: f64,
    pub file_size: u64,
    pub assembled_at: DateTime<Utc>,
}

/// Updates a project's video fields.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProjectVideoSink: Send + Sync {
    async fn update_project_video(&self, project_id: &str, video: &ProjectVideo) -> WorkerResult<()>;
}

/// Writes `video.json` next to each project's final video.
#[derive(Debug, Clone)]
pub struct ManifestProjectSink {
    output_root: PathBuf,
}

impl ManifestProjectSink {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }

    pub fn manifest_path(&self, project_id: &str) -> PathBuf {
        self.output_root.join(project_id).join("video.json")
    }
}

#[async_trait]
impl ProjectVideoSink for ManifestProjectSink {
    async fn update_project_video(&self, project_id: &str, video: &ProjectVideo) -> WorkerResult<()> {
        let path = self.manifest_path(project_id);
        reel_queue::json_file::save(&path, video)
            .await
            .map_err(|e| WorkerError::sink(format!("{}: {}", path.display(), e)))?;
        info!(project_id, manifest = %path.display(), "Updated project video fields");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_manifest_written() {
        let dir = TempDir::new().unwrap();
        let sink = ManifestProjectSink::new(dir.path());
        let video = ProjectVideo {
            video_path: dir.path().join("proj-1").join("final.mp4"),
            thumbnail_path: None,
            duration: 33.0,
            file_size: 1024,
            assembled_at: Utc::now(),
        };

        sink.update_project_video("proj-1", &video).await.unwrap();

        let raw = std::fs::read_to_string(sink.manifest_path("proj-1")).unwrap();
        let parsed: ProjectVideo = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, video);
        assert!(raw.contains("\"fileSize\": 1024"));
    }
}
