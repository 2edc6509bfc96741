//! Assembly job records and the scene list consumed by the pipeline.
//!
//! Every scene carries two durations that must not be confused:
//!
//! - `audio_duration`: length of the voiceover. This is the timing authority
//!   for trimming and for audio offsets.
//! - `clip_duration`: native length of the candidate clip. Informational only.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::job::{JobId, ParseStatusError};

/// Assembly job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyStatus {
    #[default]
    Pending,
    Processing,
    Complete,
    Error,
}

impl AssemblyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssemblyStatus::Pending => "pending",
            AssemblyStatus::Processing => "processing",
            AssemblyStatus::Complete => "complete",
            AssemblyStatus::Error => "error",
        }
    }

    /// Pending and processing jobs count against the one-per-project limit.
    pub fn is_active(&self) -> bool {
        matches!(self, AssemblyStatus::Pending | AssemblyStatus::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for AssemblyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssemblyStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AssemblyStatus::Pending),
            "processing" => Ok(AssemblyStatus::Processing),
            "complete" => Ok(AssemblyStatus::Complete),
            "error" => Ok(AssemblyStatus::Error),
            other => Err(ParseStatusError::new("assembly status", other)),
        }
    }
}

/// Processing stage of a running assembly job, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyStage {
    Initializing,
    Trimming,
    Concatenating,
    AudioOverlay,
    Thumbnail,
    Finalizing,
}

impl AssemblyStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssemblyStage::Initializing => "initializing",
            AssemblyStage::Trimming => "trimming",
            AssemblyStage::Concatenating => "concatenating",
            AssemblyStage::AudioOverlay => "audio_overlay",
            AssemblyStage::Thumbnail => "thumbnail",
            AssemblyStage::Finalizing => "finalizing",
        }
    }
}

impl fmt::Display for AssemblyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single atomic update applied to an assembly job row.
#[derive(Debug, Clone, PartialEq)]
pub enum AssemblyTransition {
    /// Stage/progress update; moves the job to processing.
    Progress {
        progress: u8,
        stage: AssemblyStage,
        current_scene: Option<u32>,
    },
    Complete,
    Fail { message: String },
}

/// Rejected transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Job {job_id} is already {status}")]
pub struct TransitionError {
    pub job_id: JobId,
    pub status: AssemblyStatus,
}

/// Assembly job status record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssemblyJob {
    pub id: JobId,
    pub project_id: String,
    pub status: AssemblyStatus,
    /// Progress (0-100)
    pub progress: u8,
    pub current_stage: Option<AssemblyStage>,
    pub current_scene: Option<u32>,
    pub total_scenes: u32,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AssemblyJob {
    /// Create a pending job.
    pub fn new(project_id: impl Into<String>, total_scenes: u32) -> Self {
        Self {
            id: JobId::new(),
            project_id: project_id.into(),
            status: AssemblyStatus::Pending,
            progress: 0,
            current_stage: None,
            current_scene: None,
            total_scenes,
            error_message: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Apply a transition. Terminal jobs accept no further updates.
    pub fn apply(&mut self, transition: AssemblyTransition) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError {
                job_id: self.id.clone(),
                status: self.status,
            });
        }

        let now = Utc::now();
        match transition {
            AssemblyTransition::Progress {
                progress,
                stage,
                current_scene,
            } => {
                self.status = AssemblyStatus::Processing;
                self.progress = progress.min(100);
                self.current_stage = Some(stage);
                if current_scene.is_some() {
                    self.current_scene = current_scene;
                }
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
            }
            AssemblyTransition::Complete => {
                self.status = AssemblyStatus::Complete;
                self.progress = 100;
                self.completed_at = Some(now);
            }
            AssemblyTransition::Fail { message } => {
                self.status = AssemblyStatus::Error;
                self.error_message = Some(message);
                self.completed_at = Some(now);
            }
        }
        Ok(())
    }
}

/// One narrated scene handed to the assembler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssemblyScene {
    pub scene_number: u32,
    /// Voiceover track for this scene
    pub audio_path: PathBuf,
    /// Voiceover length in seconds (timing authority)
    pub audio_duration: f64,
    /// Selected candidate clip on disk
    pub clip_path: PathBuf,
    /// Native clip length in seconds (never used for timing)
    #[serde(default)]
    pub clip_duration: f64,
}

/// Request to assemble a project's scenes into a final video.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssemblyRequest {
    pub project_id: String,
    /// Title rendered onto the thumbnail
    pub title: String,
    pub scenes: Vec<AssemblyScene>,
}

/// Final output of a completed assembly job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssemblyResult {
    pub job_id: JobId,
    pub project_id: String,
    pub video_path: PathBuf,
    pub thumbnail_path: Option<PathBuf>,
    /// Final video duration in seconds
    pub total_duration: f64,
    /// Final video size in bytes
    pub file_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(value: u8, stage: AssemblyStage) -> AssemblyTransition {
        AssemblyTransition::Progress {
            progress: value,
            stage,
            current_scene: None,
        }
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = AssemblyJob::new("p1", 3);
        assert_eq!(job.status, AssemblyStatus::Pending);
        assert!(job.is_active());
        assert!(job.started_at.is_none());
        assert_eq!(job.total_scenes, 3);
    }

    #[test]
    fn test_first_progress_sets_started_at_once() {
        let mut job = AssemblyJob::new("p1", 3);
        job.apply(progress(5, AssemblyStage::Trimming)).unwrap();
        let started = job.started_at;
        assert_eq!(job.status, AssemblyStatus::Processing);
        assert!(started.is_some());

        job.apply(progress(55, AssemblyStage::Concatenating)).unwrap();
        assert_eq!(job.started_at, started);
        assert_eq!(job.current_stage, Some(AssemblyStage::Concatenating));
    }

    #[test]
    fn test_progress_is_clamped() {
        let mut job = AssemblyJob::new("p1", 1);
        job.apply(progress(250, AssemblyStage::Finalizing)).unwrap();
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_scene_is_kept_when_update_omits_it() {
        let mut job = AssemblyJob::new("p1", 2);
        job.apply(AssemblyTransition::Progress {
            progress: 20,
            stage: AssemblyStage::Trimming,
            current_scene: Some(2),
        })
        .unwrap();
        job.apply(progress(55, AssemblyStage::Concatenating)).unwrap();
        assert_eq!(job.current_scene, Some(2));
    }

    #[test]
    fn test_complete_and_fail_are_terminal() {
        let mut done = AssemblyJob::new("p1", 1);
        done.apply(AssemblyTransition::Complete).unwrap();
        assert_eq!(done.progress, 100);
        assert!(done.completed_at.is_some());
        assert!(done.apply(progress(10, AssemblyStage::Trimming)).is_err());

        let mut failed = AssemblyJob::new("p1", 1);
        failed
            .apply(AssemblyTransition::Fail {
                message: "boom".into(),
            })
            .unwrap();
        assert_eq!(failed.status, AssemblyStatus::Error);
        assert_eq!(failed.error_message.as_deref(), Some("boom"));
        assert!(failed.completed_at.is_some());
        assert!(failed.apply(AssemblyTransition::Complete).is_err());
    }

    #[test]
    fn test_status_record_shape() {
        let job = AssemblyJob::new("p1", 4);
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["projectId"], "p1");
        assert_eq!(value["totalScenes"], 4);
        assert!(value["startedAt"].is_null());
        assert!(value["currentStage"].is_null());

        let stage = serde_json::to_value(AssemblyStage::AudioOverlay).unwrap();
        assert_eq!(stage, "audio_overlay");
    }
}
