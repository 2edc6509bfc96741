//! The seam between the queue and whatever actually fetches a clip.

use async_trait::async_trait;
use reel_models::DownloadJob;
use std::path::PathBuf;

use crate::error::FetchError;

/// Fetches one clip segment to disk.
#[async_trait]
pub trait ClipFetcher: Send + Sync {
    /// Fetch the clip for `job` and return the path written.
    ///
    /// The queue checks that the returned path exists before marking the
    /// job complete.
    async fn fetch(&self, job: &DownloadJob) -> Result<PathBuf, FetchError>;
}
