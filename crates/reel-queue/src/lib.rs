//! Clip download queue.
//!
//! This crate provides:
//! - A bounded-concurrency FIFO scheduler over a [`ClipFetcher`]
//! - Durable job rows with atomic claim and status transitions
//! - Snapshot-based crash recovery and exponential retry backoff
//! - Retention cleanup of downloaded segments

pub mod cleanup;
pub mod error;
pub mod fetch;
pub mod json_file;
pub mod metrics;
pub mod queue;
pub mod retry;
pub mod snapshot;
pub mod store;

pub use cleanup::{cleanup_old_segments, CleanupOptions, CleanupResult};
pub use error::{FetchError, QueueError, QueueResult};
pub use fetch::ClipFetcher;
pub use queue::{DownloadQueue, QueueConfig, Recovery};
pub use retry::{FailureTracker, RetryConfig};
pub use snapshot::{QueueState, SnapshotWriter};
pub use store::{DownloadJobStore, QueueStatus};
