//! Worker configuration.

use std::str::FromStr;
use std::time::Duration;

use faceit_media::SummaryConfig;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum simultaneously running detections
    pub max_workers: usize,
    /// Wall-clock ceiling per job
    pub job_timeout: Duration,
    /// How often finished jobs and stale sessions are reclaimed
    pub cleanup_interval: Duration,
    /// How long finished jobs stay queryable
    pub job_retention: Duration,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub cache_sweep_interval: Duration,
    pub session_max_age: Duration,
    /// Work directory for temporary files
    pub work_dir: String,
    pub summary: SummaryConfig,
    /// Attach JPEG stills to key moments
    pub key_moment_snapshots: bool,
    pub max_upload_mb: usize,
    /// Detector executable and its leading arguments
    pub detector_cmd: Option<String>,
    pub detector_version: String,
    pub ffmpeg_timeout: Duration,
    /// Prometheus listener, e.g. 0.0.0.0:9100
    pub metrics_addr: Option<String>,
    /// Capacity of the in-process progress broadcast
    pub event_buffer: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: 3,
            job_timeout: Duration::from_secs(900), // 15 minutes
            cleanup_interval: Duration::from_secs(600),
            job_retention: Duration::from_secs(3600),
            cache_ttl: Duration::from_secs(300),
            cache_max_entries: 100,
            cache_sweep_interval: Duration::from_secs(60),
            session_max_age: Duration::from_secs(24 * 3600),
            work_dir: "/tmp/faceit".to_string(),
            summary: SummaryConfig::default(),
            key_moment_snapshots: true,
            max_upload_mb: 200,
            detector_cmd: None,
            detector_version: "unknown".to_string(),
            ffmpeg_timeout: Duration::from_secs(300),
            metrics_addr: None,
            event_buffer: 256,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(env_or(key, default))
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let summary = SummaryConfig {
            key_moment_delta: env_or("FACEIT_KEY_MOMENT_DELTA", defaults.summary.key_moment_delta),
            peak_threshold: env_or("FACEIT_PEAK_THRESHOLD", defaults.summary.peak_threshold),
            max_key_moments: env_or("FACEIT_MAX_KEY_MOMENTS", defaults.summary.max_key_moments),
            timeline_max_points: env_or(
                "FACEIT_TIMELINE_MAX_POINTS",
                defaults.summary.timeline_max_points,
            ),
            ..defaults.summary.clone()
        };

        Self {
            max_workers: env_or("FACEIT_MAX_WORKERS", defaults.max_workers).max(1),
            job_timeout: env_secs("FACEIT_JOB_TIMEOUT_SECS", 900),
            cleanup_interval: env_secs("FACEIT_CLEANUP_INTERVAL_SECS", 600),
            job_retention: env_secs("FACEIT_JOB_RETENTION_SECS", 3600),
            cache_ttl: env_secs("FACEIT_CACHE_TTL_SECS", 300),
            cache_max_entries: env_or("FACEIT_CACHE_MAX_ENTRIES", defaults.cache_max_entries),
            cache_sweep_interval: env_secs("FACEIT_CACHE_SWEEP_SECS", 60),
            session_max_age: env_secs("FACEIT_SESSION_MAX_AGE_SECS", 24 * 3600),
            work_dir: std::env::var("FACEIT_WORK_DIR").unwrap_or(defaults.work_dir),
            summary,
            key_moment_snapshots: env_or("FACEIT_KEY_MOMENT_SNAPSHOTS", true),
            max_upload_mb: env_or("FACEIT_MAX_UPLOAD_MB", defaults.max_upload_mb),
            detector_cmd: env_opt("FACEIT_DETECTOR_CMD"),
            detector_version: std::env::var("FACEIT_DETECTOR_VERSION")
                .unwrap_or(defaults.detector_version),
            ffmpeg_timeout: env_secs("FACEIT_FFMPEG_TIMEOUT_SECS", 300),
            metrics_addr: env_opt("METRICS_ADDR"),
            event_buffer: env_or("FACEIT_EVENT_BUFFER", defaults.event_buffer).max(1),
        }
    }

    /// Detector program and arguments split on whitespace.
    pub fn detector_command(&self) -> Option<(String, Vec<String>)> {
        let mut parts = self.detector_cmd.as_deref()?.split_whitespace().map(String::from);
        let program = parts.next()?;
        Some((program, parts.collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.job_timeout, Duration::from_secs(900));
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.summary.key_moment_delta, 0.3);
        assert_eq!(config.summary.peak_threshold, 0.7);
    }

    #[test]
    fn test_detector_command_split() {
        let config = WorkerConfig {
            detector_cmd: Some("python3 -m feat_cli".to_string()),
            ..Default::default()
        };
        let (program, args) = config.detector_command().unwrap();
        assert_eq!(program, "python3");
        assert_eq!(args, vec!["-m", "feat_cli"]);

        assert!(WorkerConfig::default().detector_command().is_none());
    }
}
