//! Scene assembly pipeline.
//!
//! Drives one job through trimming, concatenation, audio overlay, thumbnail
//! and finalization, recording every transition on the job row.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::Utc;
use reel_media::fs_utils::file_size;
use reel_media::{move_file, AudioTrack, Concatenator, MediaToolkit, ThumbnailGenerator, Trimmer};
use reel_models::{
    AssemblyJob, AssemblyRequest, AssemblyResult, AssemblyScene, AssemblyStage,
    AssemblyTransition, JobId,
};
use tracing::{debug, error, Instrument};

use super::events::ProgressChannel;
use super::repo::AssemblyJobStore;
use super::sink::{ProjectVideo, ProjectVideoSink};
use super::stage::{run_stage, StageFailure};
use super::workdir::{WorkDir, WorkDirArena};
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;

pub const FINAL_VIDEO_NAME: &str = "final.mp4";
pub const THUMBNAIL_NAME: &str = "thumbnail.jpg";

/// Progress reported at the start of each stage.
pub mod progress {
    pub const INITIALIZING: u8 = 2;
    pub const TRIMMING_START: u8 = 5;
    pub const TRIMMING_END: u8 = 50;
    pub const CONCATENATING: u8 = 55;
    pub const AUDIO_OVERLAY: u8 = 70;
    pub const THUMBNAIL: u8 = 85;
    pub const FINALIZING: u8 = 95;

    /// Progress before trimming scene `index` of `total`.
    pub fn trimming(index: usize, total: usize) -> u8 {
        let span = (TRIMMING_END - TRIMMING_START) as usize;
        TRIMMING_START + (span * index / total.max(1)) as u8
    }
}

/// Voiceover timeline: each track starts where the previous scenes' audio ends.
pub fn build_audio_timeline(scenes: &[AssemblyScene]) -> Vec<AudioTrack> {
    let mut start = 0.0;
    scenes
        .iter()
        .map(|scene| {
            let track = AudioTrack::new(scene.audio_path.clone(), start);
            start += scene.audio_duration;
            track
        })
        .collect()
}

/// Reject requests that cannot be assembled before any job is created.
pub fn validate_request(request: &AssemblyRequest) -> WorkerResult<()> {
    if request.project_id.trim().is_empty() {
        return Err(WorkerError::validation("Project id is required"));
    }
    if request.scenes.is_empty() {
        return Err(WorkerError::validation("No scenes to assemble"));
    }

    let mut seen = HashSet::new();
    for scene in &request.scenes {
        if !seen.insert(scene.scene_number) {
            return Err(WorkerError::validation(format!(
                "Duplicate scene number {}",
                scene.scene_number
            )));
        }
        if !(scene.audio_duration.is_finite() && scene.audio_duration > 0.0) {
            return Err(WorkerError::validation(format!(
                "Scene {} has invalid audio duration {}",
                scene.scene_number, scene.audio_duration
            )));
        }
        if !scene.audio_path.exists() {
            return Err(WorkerError::validation(format!(
                "Audio file not found for scene {}: {}",
                scene.scene_number,
                scene.audio_path.display()
            )));
        }
        if !scene.clip_path.exists() {
            return Err(WorkerError::validation(format!(
                "Video file not found for scene {}: {}",
                scene.scene_number,
                scene.clip_path.display()
            )));
        }
    }
    Ok(())
}

/// Runs assembly jobs. At most one job per project is active at a time.
pub struct AssemblyOrchestrator {
    toolkit: Arc<dyn MediaToolkit>,
    jobs: Arc<AssemblyJobStore>,
    sink: Arc<dyn ProjectVideoSink>,
    arena: WorkDirArena,
    leases: Mutex<HashMap<JobId, WorkDir>>,
    events: ProgressChannel,
    output_root: PathBuf,
    tolerance: f64,
    thumbnail_width: u32,
    thumbnail_height: u32,
}

impl AssemblyOrchestrator {
    pub fn new(
        toolkit: Arc<dyn MediaToolkit>,
        jobs: Arc<AssemblyJobStore>,
        sink: Arc<dyn ProjectVideoSink>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            toolkit,
            jobs,
            sink,
            arena: WorkDirArena::new(config.work_dir.clone()),
            leases: Mutex::new(HashMap::new()),
            events: ProgressChannel::disabled(),
            output_root: config.output_root.clone(),
            tolerance: config.duration_tolerance,
            thumbnail_width: config.thumbnail_width,
            thumbnail_height: config.thumbnail_height,
        }
    }

    /// Publish job transitions on `events`.
    pub fn with_events(mut self, events: ProgressChannel) -> Self {
        self.events = events;
        self
    }

    fn leases(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, WorkDir>> {
        self.leases.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a pending job and allocate its work directory.
    ///
    /// Fails with [`WorkerError::JobAlreadyExists`] when the project already
    /// has a pending or processing job.
    pub async fn create_job(&self, project_id: &str, total_scenes: u32) -> WorkerResult<AssemblyJob> {
        let job = self
            .jobs
            .insert_if_idle(AssemblyJob::new(project_id, total_scenes))
            .await?;

        match self.arena.allocate(&job.id).await {
            Ok(lease) => {
                self.leases().insert(job.id.clone(), lease);
                Ok(job)
            }
            Err(e) => {
                // do not leave the project blocked by a job that never ran
                let message = format!("Failed to allocate work directory: {}", e);
                if let Err(fail_err) = self.fail_job(&job.id, &message).await {
                    error!(job_id = %job.id, error = %fail_err, "Failed to record allocation failure");
                }
                Err(e)
            }
        }
    }

    /// Move a job to `processing` at `progress` within `stage`.
    pub async fn update_progress(
        &self,
        job_id: &JobId,
        progress: u8,
        stage: AssemblyStage,
        current_scene: Option<u32>,
    ) -> WorkerResult<AssemblyJob> {
        let job = self
            .jobs
            .apply(
                job_id,
                AssemblyTransition::Progress {
                    progress,
                    stage,
                    current_scene,
                },
            )
            .await?;
        debug!(job_id = %job_id, progress = job.progress, stage = %stage, ?current_scene, "Assembly progress");
        self.events
            .progress(job_id, job.progress, stage, job.current_scene);
        Ok(job)
    }

    /// Mark the job complete and release its work directory.
    pub async fn complete_job(&self, result: &AssemblyResult) -> WorkerResult<AssemblyJob> {
        let applied = self.jobs.apply(&result.job_id, AssemblyTransition::Complete).await;
        self.release(&result.job_id).await;
        let job = applied?;
        self.events.done(result);
        Ok(job)
    }

    /// Mark the job failed with `message` and release its work directory.
    pub async fn fail_job(&self, job_id: &JobId, message: &str) -> WorkerResult<AssemblyJob> {
        let applied = self
            .jobs
            .apply(
                job_id,
                AssemblyTransition::Fail {
                    message: message.to_string(),
                },
            )
            .await;
        self.release(job_id).await;
        let job = applied?;
        self.events.error(job_id, message);
        Ok(job)
    }

    async fn release(&self, job_id: &JobId) {
        let lease = self.leases().remove(job_id);
        if let Some(lease) = lease {
            lease.remove().await;
        }
    }

    pub async fn get_job(&self, job_id: &JobId) -> Option<AssemblyJob> {
        self.jobs.get(job_id).await
    }

    /// Latest job for a project.
    pub async fn get_job_by_project(&self, project_id: &str) -> Option<AssemblyJob> {
        self.jobs.latest_for_project(project_id).await
    }

    pub async fn has_active_job(&self, project_id: &str) -> bool {
        self.jobs.has_active_job(project_id).await
    }

    /// Validate, create a job and run it to completion.
    pub async fn assemble(&self, request: &AssemblyRequest) -> WorkerResult<AssemblyResult> {
        validate_request(request)?;
        let job = self
            .create_job(&request.project_id, request.scenes.len() as u32)
            .await?;
        self.assemble_scenes(&job, request).await
    }

    /// Run the pipeline for an already created job.
    ///
    /// A stage failure fails the job and is returned, as does a failure to
    /// record completion. Thumbnail failure is logged and the job completes
    /// without one.
    pub async fn assemble_scenes(
        &self,
        job: &AssemblyJob,
        request: &AssemblyRequest,
    ) -> WorkerResult<AssemblyResult> {
        let logger = JobLogger::new(&job.id, &job.project_id, "assemble_scenes");
        let span = logger.create_span();
        let started = Instant::now();

        logger.log_start(&format!("{} scenes", request.scenes.len()));
        let outcome = self.run_pipeline(job, request, &logger).instrument(span).await;
        let elapsed = started.elapsed().as_secs_f64();

        let outcome = match outcome {
            Ok(result) => match self.complete_job(&result).await {
                Ok(_) => Ok(result),
                Err(error) => Err(StageFailure::Fatal {
                    stage: AssemblyStage::Finalizing,
                    error,
                }),
            },
            Err(failure) => Err(failure),
        };

        match outcome {
            Ok(result) => {
                metrics::record_assembly_finished("complete", elapsed);
                logger.log_completion(&format!(
                    "{} ({:.1}s, {} bytes)",
                    result.video_path.display(),
                    result.total_duration,
                    result.file_size
                ));
                Ok(result)
            }
            Err(failure) => {
                let stage = failure.stage();
                let error = match failure {
                    StageFailure::Fatal { error, .. } | StageFailure::Degraded { error, .. } => error,
                };
                let message = format!("{} failed: {}", stage, error.job_message());
                logger.log_error(&message);
                metrics::record_assembly_finished("error", elapsed);
                if let Err(e) = self.fail_job(&job.id, &message).await {
                    error!(job_id = %job.id, error = %e, "Failed to record job failure");
                }
                Err(error)
            }
        }
    }

    async fn advance(
        &self,
        job_id: &JobId,
        progress: u8,
        stage: AssemblyStage,
        scene: Option<u32>,
    ) -> Result<(), StageFailure> {
        self.update_progress(job_id, progress, stage, scene)
            .await
            .map(|_| ())
            .map_err(|error| StageFailure::Fatal { stage, error })
    }

    async fn run_pipeline(
        &self,
        job: &AssemblyJob,
        request: &AssemblyRequest,
        logger: &JobLogger,
    ) -> Result<AssemblyResult, StageFailure> {
        self.advance(&job.id, progress::INITIALIZING, AssemblyStage::Initializing, None)
            .await?;
        let work_dir = self
            .leases()
            .get(&job.id)
            .map(|lease| lease.path().to_path_buf())
            .ok_or_else(|| StageFailure::Fatal {
                stage: AssemblyStage::Initializing,
                error: WorkerError::JobNotFound(job.id.clone()),
            })?;

        let mut scenes = request.scenes.clone();
        scenes.sort_by_key(|s| s.scene_number);
        let output_dir = self.output_root.join(&job.project_id);

        // Trimming, one scene at a time
        let trimmer = Trimmer::new(Arc::clone(&self.toolkit)).with_tolerance(self.tolerance);
        let mut segments = Vec::with_capacity(scenes.len());
        for (index, scene) in scenes.iter().enumerate() {
            self.advance(
                &job.id,
                progress::trimming(index, scenes.len()),
                AssemblyStage::Trimming,
                Some(scene.scene_number),
            )
            .await?;
            let trimmed = run_stage(AssemblyStage::Trimming, trimmer.trim_scene(scene, &work_dir)).await?;
            if trimmed.was_looped() {
                metrics::record_looped_scene();
            }
            segments.push(trimmed.output_path);
        }
        self.advance(&job.id, progress::TRIMMING_END, AssemblyStage::Trimming, None)
            .await?;

        // Concatenation in scene order
        self.advance(&job.id, progress::CONCATENATING, AssemblyStage::Concatenating, None)
            .await?;
        let concatenated = run_stage(
            AssemblyStage::Concatenating,
            Concatenator::new(Arc::clone(&self.toolkit))
                .concatenate(&segments, &work_dir.join("concatenated.mp4")),
        )
        .await?;
        logger.log_progress(&format!(
            "joined {} segments ({:.2}s)",
            concatenated.segment_count, concatenated.total_duration
        ));

        // Voiceover timeline, then move into the project directory
        self.advance(&job.id, progress::AUDIO_OVERLAY, AssemblyStage::AudioOverlay, None)
            .await?;
        let tracks = build_audio_timeline(&scenes);
        let final_path = output_dir.join(FINAL_VIDEO_NAME);
        let total_duration = run_stage(AssemblyStage::AudioOverlay, async {
            let mixed = work_dir.join("with-audio.mp4");
            self.toolkit
                .overlay_audio(&concatenated.output_path, &tracks, &mixed)
                .await?;
            let duration = self.toolkit.duration(&mixed).await?;
            move_file(&mixed, &final_path).await?;
            Ok::<_, WorkerError>(duration)
        })
        .await?;

        // Thumbnail; the only stage allowed to fail
        self.advance(&job.id, progress::THUMBNAIL, AssemblyStage::Thumbnail, None)
            .await?;
        let thumbnail_target = output_dir.join(THUMBNAIL_NAME);
        let thumbnail = run_stage(AssemblyStage::Thumbnail, async {
            match tokio::fs::remove_file(&thumbnail_target).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(WorkerError::from(e)),
            }
            let generated = ThumbnailGenerator::new(Arc::clone(&self.toolkit), work_dir.join("frames"))
                .with_dimensions(self.thumbnail_width, self.thumbnail_height)
                .generate_at(&final_path, total_duration, &request.title, &thumbnail_target)
                .await?;
            Ok(generated)
        })
        .await;
        let thumbnail_path = match thumbnail {
            Ok(generated) => Some(generated.thumbnail_path),
            Err(failure) if !failure.is_fatal() => {
                let message = format!("Thumbnail skipped: {}", failure.error().job_message());
                logger.log_warning(&message);
                metrics::record_thumbnail_failure();
                self.events.warning(&job.id, message);
                None
            }
            Err(failure) => return Err(failure),
        };

        // Finalize
        self.advance(&job.id, progress::FINALIZING, AssemblyStage::Finalizing, None)
            .await?;
        let file_size = run_stage(AssemblyStage::Finalizing, file_size(&final_path)).await?;
        let video = ProjectVideo {
            video_path: final_path.clone(),
            thumbnail_path: thumbnail_path.clone(),
            duration: total_duration,
            file_size,
            assembled_at: Utc::now(),
        };
        run_stage(
            AssemblyStage::Finalizing,
            self.sink.update_project_video(&job.project_id, &video),
        )
        .await?;

        Ok(AssemblyResult {
            job_id: job.id.clone(),
            project_id: job.project_id.clone(),
            video_path: final_path,
            thumbnail_path,
            total_duration,
            file_size,
        })
    }
}
