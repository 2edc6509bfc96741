//! FFmpeg progress reporting.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Progress information from FFmpeg's `-progress` stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Current FPS
    pub fps: f64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Output time as string (HH:MM:SS.microseconds)
    pub out_time: String,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Output position in seconds.
    pub fn out_time_secs(&self) -> f64 {
        self.out_time_ms as f64 / 1000.0
    }

    /// Percentage of an expected output length in seconds.
    pub fn percentage(&self, expected_secs: f64) -> f64 {
        if self.is_complete {
            return 100.0;
        }
        if expected_secs <= 0.0 {
            return 0.0;
        }
        (self.out_time_secs() / expected_secs * 100.0).clamp(0.0, 100.0)
    }

    /// Estimate time remaining in seconds.
    pub fn eta_seconds(&self, expected_secs: f64) -> Option<f64> {
        if self.speed <= 0.0 || self.out_time_ms <= 0 {
            return None;
        }
        let remaining = expected_secs - self.out_time_secs();
        if remaining <= 0.0 {
            return Some(0.0);
        }
        Some(remaining / self.speed)
    }
}

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(FfmpegProgress) + Send + 'static>;

/// Build a callback that logs transform progress at 25% steps.
pub fn quartile_logger(operation: &'static str, expected_secs: f64) -> impl Fn(FfmpegProgress) + Send + 'static {
    let last_quartile = Arc::new(AtomicU8::new(0));
    move |progress: FfmpegProgress| {
        let quartile = (progress.percentage(expected_secs) / 25.0).floor() as u8;
        if quartile > last_quartile.fetch_max(quartile, Ordering::Relaxed) {
            tracing::debug!(
                operation,
                percent = quartile as u32 * 25,
                speed = progress.speed,
                eta_secs = progress.eta_seconds(expected_secs),
                "FFmpeg progress"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percentage() {
        let progress = FfmpegProgress {
            out_time_ms: 5000,
            ..Default::default()
        };

        assert!((progress.percentage(10.0) - 50.0).abs() < 0.01);
        assert!((progress.percentage(4.0) - 100.0).abs() < 0.01);
        assert_eq!(progress.percentage(0.0), 0.0);
    }

    #[test]
    fn test_completed_run_is_full() {
        let progress = FfmpegProgress {
            out_time_ms: 1000,
            is_complete: true,
            ..Default::default()
        };
        assert_eq!(progress.percentage(10.0), 100.0);
    }

    #[test]
    fn test_eta_calculation() {
        let progress = FfmpegProgress {
            out_time_ms: 5000,
            speed: 2.0,
            ..Default::default()
        };

        // 5 seconds remaining at 2x speed
        let eta = progress.eta_seconds(10.0).unwrap();
        assert!((eta - 2.5).abs() < 0.01);
    }
}
