//! Assembly progress events.

use reel_models::{AssemblyResult, AssemblyStage, JobId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// One published job transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssemblyEvent {
    Progress {
        job_id: JobId,
        progress: u8,
        stage: AssemblyStage,
        current_scene: Option<u32>,
    },
    Warning {
        job_id: JobId,
        message: String,
    },
    Completed {
        job_id: JobId,
        result: AssemblyResult,
    },
    Failed {
        job_id: JobId,
        message: String,
    },
}

impl AssemblyEvent {
    pub fn job_id(&self) -> &JobId {
        match self {
            AssemblyEvent::Progress { job_id, .. }
            | AssemblyEvent::Warning { job_id, .. }
            | AssemblyEvent::Completed { job_id, .. }
            | AssemblyEvent::Failed { job_id, .. } => job_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AssemblyEvent::Completed { .. } | AssemblyEvent::Failed { .. })
    }
}

/// Publishes events to an optional subscriber, in order.
///
/// A dropped receiver only stops delivery; the job carries on.
#[derive(Debug, Clone, Default)]
pub struct ProgressChannel {
    tx: Option<mpsc::UnboundedSender<AssemblyEvent>>,
}

impl ProgressChannel {
    /// Channel plus the receiving end for a subscriber.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AssemblyEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Channel that drops everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn publish(&self, event: AssemblyEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                debug!("Progress subscriber went away");
            }
        }
    }

    pub fn progress(&self, job_id: &JobId, progress: u8, stage: AssemblyStage, current_scene: Option<u32>) {
        self.publish(AssemblyEvent::Progress {
            job_id: job_id.clone(),
            progress,
            stage,
            current_scene,
        });
    }

    pub fn warning(&self, job_id: &JobId, message: impl Into<String>) {
        self.publish(AssemblyEvent::Warning {
            job_id: job_id.clone(),
            message: message.into(),
        });
    }

    pub fn done(&self, result: &AssemblyResult) {
        self.publish(AssemblyEvent::Completed {
            job_id: result.job_id.clone(),
            result: result.clone(),
        });
    }

    pub fn error(&self, job_id: &JobId, message: impl Into<String>) {
        self.publish(AssemblyEvent::Failed {
            job_id: job_id.clone(),
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_delivered_in_order() {
        let (channel, mut rx) = ProgressChannel::new();
        let id = JobId::from_string("job-1");

        channel.progress(&id, 2, AssemblyStage::Initializing, None);
        channel.progress(&id, 5, AssemblyStage::Trimming, Some(1));
        channel.error(&id, "boom");

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        assert_eq!(seen.len(), 3);
        assert!(matches!(seen[1], AssemblyEvent::Progress { progress: 5, .. }));
        assert!(seen[2].is_terminal());
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (channel, rx) = ProgressChannel::new();
        drop(rx);
        channel.warning(&JobId::new(), "nobody listening");
        ProgressChannel::disabled().error(&JobId::new(), "also fine");
    }

    #[test]
    fn test_event_json_shape() {
        let event = AssemblyEvent::Progress {
            job_id: JobId::from_string("job-1"),
            progress: 70,
            stage: AssemblyStage::AudioOverlay,
            current_scene: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["stage"], "audio_overlay");
    }
}
