//! Scene assembly worker.
//!
//! This crate provides:
//! - The assembly orchestrator and its job store
//! - A yt-dlp clip fetcher for the download queue
//! - Worker configuration, logging and metrics

pub mod assembly;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod logging;
pub mod metrics;

pub use assembly::{AssemblyEvent, AssemblyJobStore, AssemblyOrchestrator, ProgressChannel};
pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use fetcher::YtDlpFetcher;
pub use logging::JobLogger;
