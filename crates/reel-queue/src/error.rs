//! Queue error types.

use reel_models::{DownloadStatus, JobId};
use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Clip {suggestion_id} already has a {status} download ({existing})")]
    DuplicateJob {
        suggestion_id: String,
        existing: JobId,
        status: DownloadStatus,
    },

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: JobId,
        from: DownloadStatus,
        to: DownloadStatus,
    },

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, QueueError::DuplicateJob { .. })
    }
}

/// Outcome of a failed fetch attempt, as reported by a [`crate::ClipFetcher`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Worth retrying (network, rate limiting, timeouts)
    #[error("{0}")]
    Transient(String),

    /// Retrying cannot help (unavailable source, bad input, disk full)
    #[error("{0}")]
    Permanent(String),
}

impl FetchError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            FetchError::Transient(m) | FetchError::Permanent(m) => m,
        }
    }
}
