//! Scene assembly worker binary.
//!
//! Usage: `reel-worker [request.json]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reel_media::{check_ytdlp, FfmpegToolkit, MediaToolkit, ToolkitConfig};
use reel_models::AssemblyRequest;
use reel_queue::{cleanup_old_segments, CleanupOptions, DownloadQueue, QueueConfig};
use reel_worker::assembly::ManifestProjectSink;
use reel_worker::{
    AssemblyEvent, AssemblyJobStore, AssemblyOrchestrator, ProgressChannel, WorkerConfig,
    YtDlpFetcher,
};

fn init_tracing() {
    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("reel=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting reel-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        reel_worker::metrics::init_metrics(port).context("failed to start metrics exporter")?;
        info!(port, "Prometheus metrics listener started");
    }

    let toolkit = Arc::new(FfmpegToolkit::new(ToolkitConfig::from_env()));
    let version = toolkit
        .verify()
        .await
        .context("ffmpeg/ffprobe are required")?;
    info!("Using {}", version);

    if let Err(e) = check_ytdlp() {
        warn!("yt-dlp unavailable, clip downloads will fail: {}", e);
    }

    let queue_config = QueueConfig::from_env().with_cache_dir(&config.cache_dir);
    let queue = DownloadQueue::open(queue_config, Arc::new(YtDlpFetcher::from_config(&config)))
        .await
        .context("failed to open download queue")?;
    let recovery = queue.initialize().await.context("download queue recovery failed")?;
    info!(
        orphaned = recovery.orphaned,
        resumed = recovery.resumed,
        "Download queue ready"
    );

    let cleanup = cleanup_old_segments(
        &config.base_dir,
        &config.cache_dir,
        queue.store(),
        &CleanupOptions::default().with_retention_days(config.segment_retention_days),
    )
    .await;
    for e in &cleanup.errors {
        warn!("Segment cleanup: {}", e);
    }

    let jobs = match &config.assembly_store_path {
        Some(path) => AssemblyJobStore::open(path)
            .await
            .context("failed to open assembly job store")?,
        None => AssemblyJobStore::in_memory(),
    };
    let abandoned = jobs
        .abandon_interrupted("Interrupted by restart")
        .await
        .context("failed to release interrupted assembly jobs")?;
    if !abandoned.is_empty() {
        info!(count = abandoned.len(), "Released assembly jobs from a previous run");
    }
    let (events, mut rx) = ProgressChannel::new();
    let orchestrator = AssemblyOrchestrator::new(
        toolkit,
        Arc::new(jobs),
        Arc::new(ManifestProjectSink::new(&config.output_root)),
        &config,
    )
    .with_events(events);

    let event_log = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let AssemblyEvent::Progress { job_id, progress, stage, .. } = &event {
                info!(job_id = %job_id, progress, stage = %stage, "Assembly progress");
            }
        }
    });

    if let Some(request_path) = std::env::args().nth(1).map(PathBuf::from) {
        let raw = tokio::fs::read(&request_path)
            .await
            .with_context(|| format!("failed to read {}", request_path.display()))?;
        let request: AssemblyRequest = serde_json::from_slice(&raw)
            .with_context(|| format!("invalid assembly request {}", request_path.display()))?;

        match orchestrator.assemble(&request).await {
            Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
            Err(e) => {
                error!(project_id = %request.project_id, "Assembly failed: {}", e);
                return Err(e.into());
            }
        }
    }

    if queue.active_count() + queue.pending_count() > 0 {
        info!("Waiting for recovered downloads to finish");
        tokio::select! {
            _ = queue.wait_idle() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal; unfinished downloads resume on next start");
            }
        }
    }

    drop(orchestrator);
    event_log.await.ok();

    info!("Worker shutdown complete");
    Ok(())
}
