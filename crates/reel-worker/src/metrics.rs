//! Prometheus metrics for the assembly worker.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::{Ipv4Addr, SocketAddr};

/// Install the Prometheus recorder with an HTTP listener on `port`.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
        .install()
}

/// Metric names as constants for consistency.
pub mod names {
    pub const ASSEMBLY_JOBS_TOTAL: &str = "reel_assembly_jobs_total";
    pub const ASSEMBLY_STAGE_DURATION_SECONDS: &str = "reel_assembly_stage_duration_seconds";
    pub const ASSEMBLY_DURATION_SECONDS: &str = "reel_assembly_duration_seconds";
    pub const THUMBNAIL_FAILURES_TOTAL: &str = "reel_thumbnail_failures_total";
    pub const LOOPED_SCENES_TOTAL: &str = "reel_looped_scenes_total";
}

/// `outcome` is `complete` or `error`.
pub fn record_assembly_finished(outcome: &'static str, duration_secs: f64) {
    counter!(names::ASSEMBLY_JOBS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::ASSEMBLY_DURATION_SECONDS, "outcome" => outcome).record(duration_secs);
}

pub fn record_stage_duration(stage: &'static str, duration_secs: f64) {
    histogram!(names::ASSEMBLY_STAGE_DURATION_SECONDS, "stage" => stage).record(duration_secs);
}

pub fn record_thumbnail_failure() {
    counter!(names::THUMBNAIL_FAILURES_TOTAL).increment(1);
}

pub fn record_looped_scene() {
    counter!(names::LOOPED_SCENES_TOTAL).increment(1);
}
