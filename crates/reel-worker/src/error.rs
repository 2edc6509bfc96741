//! Worker error types.

use reel_models::{JobId, TransitionError};
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid assembly request: {0}")]
    Validation(String),

    #[error("Project {project_id} already has an active assembly job ({job_id})")]
    JobAlreadyExists { project_id: String, job_id: JobId },

    #[error("Assembly job not found: {0}")]
    JobNotFound(JobId),

    #[error("Project update failed: {0}")]
    Sink(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Media error: {0}")]
    Media(#[from] reel_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] reel_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WorkerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether the request was rejected before any external process ran.
    pub fn is_validation(&self) -> bool {
        match self {
            WorkerError::Validation(_) => true,
            WorkerError::Media(e) => e.is_validation(),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, WorkerError::Media(e) if e.is_timeout())
    }

    /// Message recorded on a failed job, including tool stderr when present.
    pub fn job_message(&self) -> String {
        match self {
            WorkerError::Media(e) => e.detailed_message(),
            other => other.to_string(),
        }
    }
}
