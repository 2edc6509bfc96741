//! Shared data models for the reel assembly service.
//!
//! This crate provides Serde-serializable types for:
//! - Download jobs fetched by the clip queue
//! - Assembly jobs, stages and scene lists
//! - Encoding defaults for assembled output

pub mod assembly;
pub mod download;
pub mod encoding;
pub mod job;

// Re-export common types
pub use assembly::{
    AssemblyJob, AssemblyRequest, AssemblyResult, AssemblyScene, AssemblyStage, AssemblyStatus,
    AssemblyTransition, TransitionError,
};
pub use download::{DownloadJob, DownloadStatus};
pub use encoding::EncodingConfig;
pub use job::{JobId, ParseStatusError};
