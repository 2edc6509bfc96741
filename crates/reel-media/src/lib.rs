//! FFmpeg CLI wrapper for scene assembly.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with timeouts and output verification
//! - Probing through ffprobe
//! - The [`MediaToolkit`] seam and its ffmpeg-backed implementation
//! - Scene trimming, concatenation and thumbnail rendering on top of the toolkit
//! - Segment downloads through yt-dlp

pub mod command;
pub mod concat;
pub mod download;
pub mod error;
pub mod filters;
pub mod fs_utils;
pub mod probe;
pub mod progress;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod thumbnail;
pub mod toolkit;
pub mod trimmer;

pub use command::{check_ffmpeg, check_ffprobe, check_ytdlp, FfmpegCommand, FfmpegRunner};
pub use concat::{ConcatResult, Concatenator};
pub use download::{
    classify_download_error, validate_video_id, DownloadErrorKind, SegmentDownloader,
    SegmentRequest,
};
pub use error::{MediaError, MediaResult};
pub use filters::AudioTrack;
pub use fs_utils::{move_file, ScopedFiles};
pub use probe::{probe_media, MediaInfo, StreamInfo};
pub use progress::{FfmpegProgress, ProgressCallback};
pub use thumbnail::{ThumbnailGenerator, ThumbnailResult};
pub use toolkit::{FfmpegToolkit, MediaToolkit, ToolkitConfig};
pub use trimmer::{plan_trim, TrimPlan, TrimResult, Trimmer};
