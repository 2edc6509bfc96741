//! Stage outcomes.

use reel_models::AssemblyStage;
use std::future::Future;
use std::time::Instant;
use thiserror::Error;

use crate::error::WorkerError;
use crate::metrics;

/// How a stage went wrong, and therefore whether the job can go on.
#[derive(Debug, Error)]
pub enum StageFailure {
    /// Halts the job
    #[error("{stage} failed: {error}")]
    Fatal {
        stage: AssemblyStage,
        #[source]
        error: WorkerError,
    },
    /// Recorded and skipped
    #[error("{stage} degraded: {error}")]
    Degraded {
        stage: AssemblyStage,
        #[source]
        error: WorkerError,
    },
}

impl StageFailure {
    pub fn stage(&self) -> AssemblyStage {
        match self {
            StageFailure::Fatal { stage, .. } | StageFailure::Degraded { stage, .. } => *stage,
        }
    }

    pub fn error(&self) -> &WorkerError {
        match self {
            StageFailure::Fatal { error, .. } | StageFailure::Degraded { error, .. } => error,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, StageFailure::Fatal { .. })
    }
}

/// Stages whose failure leaves the job complete.
pub fn is_optional(stage: AssemblyStage) -> bool {
    matches!(stage, AssemblyStage::Thumbnail)
}

/// Run one stage, timing it and tagging any error.
pub async fn run_stage<T, E, F>(stage: AssemblyStage, fut: F) -> Result<T, StageFailure>
where
    F: Future<Output = Result<T, E>>,
    E: Into<WorkerError>,
{
    let started = Instant::now();
    let result = fut.await;
    metrics::record_stage_duration(stage.as_str(), started.elapsed().as_secs_f64());

    result.map_err(|e| {
        let error = e.into();
        if is_optional(stage) {
            StageFailure::Degraded { stage, error }
        } else {
            StageFailure::Fatal { stage, error }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_media::MediaError;

    #[tokio::test]
    async fn test_thumbnail_failure_is_degraded() {
        let failure = run_stage(AssemblyStage::Thumbnail, async {
            Err::<(), _>(MediaError::internal("no frames"))
        })
        .await
        .unwrap_err();

        assert!(!failure.is_fatal());
        assert_eq!(failure.stage(), AssemblyStage::Thumbnail);
    }

    #[tokio::test]
    async fn test_other_failures_are_fatal() {
        let failure = run_stage(AssemblyStage::Concatenating, async {
            Err::<(), _>(MediaError::Timeout(600))
        })
        .await
        .unwrap_err();

        assert!(failure.is_fatal());
        assert!(failure.error().is_timeout());
        assert!(failure.to_string().starts_with("concatenating failed"));
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let value = run_stage(AssemblyStage::Trimming, async { Ok::<_, WorkerError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
