use std::path::Path;

use reel_media::{FfmpegToolkit, MediaToolkit, ToolkitConfig};
use reel_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with work_dir={} cache_dir={}",
        config.work_dir.display(),
        config.cache_dir.display()
    );
    ensure_dir(&config.work_dir).await?;
    ensure_dir(&config.cache_dir).await?;
    ensure_dir(&config.output_root).await?;

    let version = FfmpegToolkit::new(ToolkitConfig::from_env())
        .verify()
        .await
        .map_err(|e| anyhow::anyhow!("ffmpeg not available: {}", e))?;
    println!("worker-selfcheck: {}", version);

    let ytdlp = reel_media::check_ytdlp().map_err(|e| anyhow::anyhow!("yt-dlp not available: {}", e))?;
    println!("worker-selfcheck: yt-dlp at {}", ytdlp.display());

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_dir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}
