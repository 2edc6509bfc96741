//! Structured job logging utilities.
//!
//! Provides consistent, structured logging for assembly jobs with
//! tracing spans and contextual information.

use reel_models::JobId;
use tracing::{error, info, warn, Span};

/// Job logger for structured logging with consistent formatting.
///
/// Every line carries the job ID, project ID and operation so one
/// assembly run can be followed through interleaved output.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    project_id: String,
    operation: String,
}

impl JobLogger {
    /// Create a new job logger for a specific job and operation.
    pub fn new(job_id: &JobId, project_id: &str, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            project_id: project_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            project_id = %self.project_id,
            operation = %self.operation,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            project_id = %self.project_id,
            operation = %self.operation,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            project_id = %self.project_id,
            operation = %self.operation,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            project_id = %self.project_id,
            operation = %self.operation,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            project_id = %self.project_id,
            operation = %self.operation,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            project_id = %self.project_id,
            operation = %self.operation
        )
    }
}
