//! Per-scene clip normalization.
//!
//! The voiceover length is the timing authority: a scene's clip is cut when it
//! runs long and looped when it runs short, so the segment always ends up the
//! length of its audio.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{MediaError, MediaResult};
use crate::toolkit::MediaToolkit;
use reel_models::encoding::DURATION_TOLERANCE_SECS;
use reel_models::AssemblyScene;

/// How a clip is brought to its target length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimPlan {
    /// Within tolerance; cut directly to the target.
    ExactMatch,
    /// Clip runs long; cut from the start.
    Trim,
    /// Clip runs short; play it `loop_count` times, then cut.
    Loop { loop_count: u32 },
}

impl TrimPlan {
    pub fn is_loop(&self) -> bool {
        matches!(self, TrimPlan::Loop { .. })
    }
}

/// Decide how to bring a clip of `clip_duration` to `target_duration`.
pub fn plan_trim(clip_duration: f64, target_duration: f64, tolerance: f64) -> TrimPlan {
    let diff = clip_duration - target_duration;
    if diff.abs() < tolerance {
        TrimPlan::ExactMatch
    } else if diff > 0.0 {
        TrimPlan::Trim
    } else {
        TrimPlan::Loop {
            loop_count: (target_duration / clip_duration).ceil() as u32,
        }
    }
}

/// Outcome of normalizing one scene.
#[derive(Debug, Clone, PartialEq)]
pub struct TrimResult {
    pub scene_number: u32,
    pub output_path: PathBuf,
    /// Measured length of the source clip
    pub original_duration: f64,
    /// Voiceover length the segment was cut to
    pub target_duration: f64,
    /// Measured length of the written segment
    pub measured_duration: f64,
    pub plan: TrimPlan,
}

impl TrimResult {
    pub fn was_looped(&self) -> bool {
        self.plan.is_loop()
    }

    pub fn loop_count(&self) -> Option<u32> {
        match self.plan {
            TrimPlan::Loop { loop_count } => Some(loop_count),
            _ => None,
        }
    }

    pub fn within_tolerance(&self, tolerance: f64) -> bool {
        (self.measured_duration - self.target_duration).abs() <= tolerance
    }
}

/// Output file name for a scene's normalized segment.
pub fn trimmed_file_name(scene_number: u32) -> String {
    format!("scene-{}-trimmed.mp4", scene_number)
}

/// Brings scene clips to their voiceover length.
#[derive(Clone)]
pub struct Trimmer {
    toolkit: Arc<dyn MediaToolkit>,
    tolerance: f64,
}

impl Trimmer {
    pub fn new(toolkit: Arc<dyn MediaToolkit>) -> Self {
        Self {
            toolkit,
            tolerance: DURATION_TOLERANCE_SECS,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Normalize one scene's clip into `output_dir`.
    pub async fn trim_scene(&self, scene: &AssemblyScene, output_dir: &Path) -> MediaResult<TrimResult> {
        if !scene.clip_path.exists() {
            return Err(MediaError::validation(format!(
                "Video file not found: {}. Cannot trim scene {}.",
                scene.clip_path.display(),
                scene.scene_number
            )));
        }
        if !(scene.audio_duration.is_finite() && scene.audio_duration > 0.0) {
            return Err(MediaError::validation(format!(
                "Scene {} has invalid audio duration {}",
                scene.scene_number, scene.audio_duration
            )));
        }

        let clip_duration = self.toolkit.duration(&scene.clip_path).await?;
        let target = scene.audio_duration;
        let output_path = output_dir.join(trimmed_file_name(scene.scene_number));
        let plan = plan_trim(clip_duration, target, self.tolerance);

        info!(
            scene_number = scene.scene_number,
            clip_duration,
            audio_duration = target,
            plan = ?plan,
            "Normalizing scene clip"
        );

        match plan {
            TrimPlan::ExactMatch | TrimPlan::Trim => {
                self.toolkit.trim(&scene.clip_path, target, &output_path).await?;
            }
            TrimPlan::Loop { loop_count } => {
                self.toolkit
                    .loop_extend(&scene.clip_path, loop_count, target, &output_path)
                    .await?;
            }
        }

        if !output_path.exists() {
            return Err(MediaError::EmptyOutput(output_path));
        }

        let measured_duration = self.toolkit.duration(&output_path).await?;
        if (measured_duration - target).abs() > self.tolerance {
            warn!(
                scene_number = scene.scene_number,
                expected = target,
                actual = measured_duration,
                "Trimmed segment duration mismatch"
            );
        }

        Ok(TrimResult {
            scene_number: scene.scene_number,
            output_path,
            original_duration: clip_duration,
            target_duration: target,
            measured_duration,
            plan,
        })
    }

    /// Normalize scenes one at a time, in order.
    ///
    /// `on_scene` is called with `(scene_number, index, total)` before each
    /// scene starts.
    pub async fn trim_scenes<F>(
        &self,
        scenes: &[AssemblyScene],
        output_dir: &Path,
        mut on_scene: F,
    ) -> MediaResult<Vec<TrimResult>>
    where
        F: FnMut(u32, usize, usize) + Send,
    {
        let mut results = Vec::with_capacity(scenes.len());
        for (index, scene) in scenes.iter().enumerate() {
            on_scene(scene.scene_number, index, scenes.len());
            results.push(self.trim_scene(scene, output_dir).await?);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeToolkit;
    use tempfile::TempDir;

    fn scene(number: u32, clip: PathBuf, audio_duration: f64) -> AssemblyScene {
        AssemblyScene {
            scene_number: number,
            audio_path: PathBuf::from(format!("scene-{}.mp3", number)),
            audio_duration,
            clip_path: clip,
            clip_duration: 0.0,
        }
    }

    #[test]
    fn test_plan_trim_tolerance() {
        assert_eq!(plan_trim(10.2, 10.0, 0.5), TrimPlan::ExactMatch);
        assert_eq!(plan_trim(9.7, 10.0, 0.5), TrimPlan::ExactMatch);
        assert_eq!(plan_trim(20.0, 10.0, 0.5), TrimPlan::Trim);
        assert_eq!(plan_trim(10.5, 10.0, 0.5), TrimPlan::Trim);
        assert_eq!(plan_trim(10.0, 15.0, 0.5), TrimPlan::Loop { loop_count: 2 });
        assert_eq!(plan_trim(4.0, 12.0, 0.5), TrimPlan::Loop { loop_count: 3 });
        assert_eq!(plan_trim(4.0, 12.1, 0.5), TrimPlan::Loop { loop_count: 4 });
    }

    #[tokio::test]
    async fn test_longer_clip_is_trimmed() {
        let dir = TempDir::new().unwrap();
        let toolkit = Arc::new(FakeToolkit::new());
        let clip = toolkit.add_media(dir.path().join("clip.mp4"), 20.0).await;

        let result = Trimmer::new(toolkit.clone())
            .trim_scene(&scene(1, clip, 10.0), dir.path())
            .await
            .unwrap();

        assert_eq!(result.plan, TrimPlan::Trim);
        assert_eq!(result.output_path, dir.path().join("scene-1-trimmed.mp4"));
        assert!((result.measured_duration - 10.0).abs() < 0.5);
        assert!(!result.was_looped());
        assert_eq!(toolkit.calls_for("loop_extend").await, 0);
    }

    #[tokio::test]
    async fn test_shorter_clip_is_looped() {
        let dir = TempDir::new().unwrap();
        let toolkit = Arc::new(FakeToolkit::new());
        let clip = toolkit.add_media(dir.path().join("clip.mp4"), 10.0).await;

        let result = Trimmer::new(toolkit.clone())
            .trim_scene(&scene(2, clip, 15.0), dir.path())
            .await
            .unwrap();

        assert_eq!(result.loop_count(), Some(2));
        assert!((result.measured_duration - 15.0).abs() < 0.5);
        assert!(result.within_tolerance(0.5));
    }

    #[tokio::test]
    async fn test_matching_clip_takes_exact_path() {
        let dir = TempDir::new().unwrap();
        let toolkit = Arc::new(FakeToolkit::new());
        let clip = toolkit.add_media(dir.path().join("clip.mp4"), 10.2).await;

        let result = Trimmer::new(toolkit.clone())
            .trim_scene(&scene(3, clip, 10.0), dir.path())
            .await
            .unwrap();

        assert_eq!(result.plan, TrimPlan::ExactMatch);
        assert!((result.measured_duration - 10.0).abs() < 0.5);
    }

    #[tokio::test]
    async fn test_missing_clip_aborts_before_toolkit() {
        let dir = TempDir::new().unwrap();
        let toolkit = Arc::new(FakeToolkit::new());

        let err = Trimmer::new(toolkit.clone())
            .trim_scene(&scene(1, dir.path().join("missing.mp4"), 10.0), dir.path())
            .await
            .unwrap_err();

        assert!(err.is_validation());
        assert_eq!(toolkit.total_calls().await, 0);
    }

    #[tokio::test]
    async fn test_batch_reports_scenes_in_order() {
        let dir = TempDir::new().unwrap();
        let toolkit = Arc::new(FakeToolkit::new());
        let a = toolkit.add_media(dir.path().join("a.mp4"), 10.0).await;
        let b = toolkit.add_media(dir.path().join("b.mp4"), 30.0).await;
        let c = toolkit.add_media(dir.path().join("c.mp4"), 8.0).await;
        let scenes = vec![scene(1, a, 10.0), scene(2, b, 15.0), scene(3, c, 8.0)];

        let mut seen = Vec::new();
        let results = Trimmer::new(toolkit)
            .trim_scenes(&scenes, dir.path(), |n, i, total| seen.push((n, i, total)))
            .await
            .unwrap();

        assert_eq!(seen, vec![(1, 0, 3), (2, 1, 3), (3, 2, 3)]);
        let durations: Vec<f64> = results.iter().map(|r| r.measured_duration).collect();
        assert_eq!(durations, vec![10.0, 15.0, 8.0]);
    }
}
