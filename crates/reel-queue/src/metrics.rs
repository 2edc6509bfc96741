//! Download queue metrics.

use metrics::{counter, gauge};

/// Metric names as constants for consistency.
pub mod names {
    pub const DOWNLOADS_ENQUEUED_TOTAL: &str = "reel_downloads_enqueued_total";
    pub const DOWNLOADS_FINISHED_TOTAL: &str = "reel_downloads_finished_total";
    pub const DOWNLOAD_RETRIES_TOTAL: &str = "reel_download_retries_total";
    pub const DOWNLOADS_ACTIVE: &str = "reel_downloads_active";
    pub const DOWNLOADS_PENDING: &str = "reel_downloads_pending";
    pub const SEGMENTS_REMOVED_TOTAL: &str = "reel_cache_segments_removed_total";
    pub const SEGMENT_BYTES_FREED_TOTAL: &str = "reel_cache_bytes_freed_total";
}

pub fn record_enqueued() {
    counter!(names::DOWNLOADS_ENQUEUED_TOTAL).increment(1);
}

/// `outcome` is `complete`, `failed` or `exhausted`.
pub fn record_finished(outcome: &'static str) {
    counter!(names::DOWNLOADS_FINISHED_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_retry() {
    counter!(names::DOWNLOAD_RETRIES_TOTAL).increment(1);
}

pub fn set_queue_depth(active: usize, pending: usize) {
    gauge!(names::DOWNLOADS_ACTIVE).set(active as f64);
    gauge!(names::DOWNLOADS_PENDING).set(pending as f64);
}

pub fn record_cleanup(files: usize, bytes: u64) {
    counter!(names::SEGMENTS_REMOVED_TOTAL).increment(files as u64);
    counter!(names::SEGMENT_BYTES_FREED_TOTAL).increment(bytes);
}
