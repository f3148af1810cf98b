//! Prometheus metrics for job processing and the result cache.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use faceit_models::FailureKind;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    // Job lifecycle
    pub const JOBS_SUBMITTED_TOTAL: &str = "faceit_jobs_submitted_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "faceit_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "faceit_jobs_failed_total";
    pub const JOBS_CANCELLED_TOTAL: &str = "faceit_jobs_cancelled_total";
    pub const JOB_DURATION_SECONDS: &str = "faceit_job_duration_seconds";

    // Capacity
    pub const ACTIVE_WORKERS: &str = "faceit_active_workers";
    pub const QUEUED_JOBS: &str = "faceit_queued_jobs";

    // Cache
    pub const CACHE_HITS_TOTAL: &str = "faceit_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "faceit_cache_misses_total";
    pub const CACHE_REJECTIONS_TOTAL: &str = "faceit_cache_rejections_total";
}

/// Serve `/metrics` on `addr`. Must run inside a tokio runtime.
pub fn init_exporter(addr: &str) -> WorkerResult<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| WorkerError::config_error(format!("Invalid METRICS_ADDR {}: {}", addr, e)))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("Failed to start metrics exporter: {}", e)))?;
    info!("Prometheus exporter listening on {}", addr);
    Ok(())
}

pub fn record_job_submitted() {
    counter!(names::JOBS_SUBMITTED_TOTAL).increment(1);
}

pub fn record_job_completed(duration_secs: f64) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS).record(duration_secs);
}

pub fn record_job_failed(kind: FailureKind) {
    let labels = [("kind", kind.as_str().to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_job_cancelled() {
    counter!(names::JOBS_CANCELLED_TOTAL).increment(1);
}

pub fn set_active_workers(count: usize) {
    gauge!(names::ACTIVE_WORKERS).set(count as f64);
}

pub fn set_queued_jobs(count: usize) {
    gauge!(names::QUEUED_JOBS).set(count as f64);
}

pub fn record_cache_hit() {
    counter!(names::CACHE_HITS_TOTAL).increment(1);
}

pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

pub fn record_cache_rejection() {
    counter!(names::CACHE_REJECTIONS_TOTAL).increment(1);
}
