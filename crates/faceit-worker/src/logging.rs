//! Structured logging for the worker.

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use faceit_models::JobId;

/// Install the global tracing subscriber.
///
/// `LOG_FORMAT=json` selects JSON lines; anything else gets the ANSI
/// formatter. `RUST_LOG` is honoured on top of the built-in directives.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    for directive in ["faceit=info", "redis=warn"] {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Logs lifecycle events of one analysis job with its id attached.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    stage: String,
}

impl JobLogger {
    pub fn new(job_id: &JobId, stage: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            stage: stage.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(job_id = %self.job_id, stage = %self.stage, "Job started: {}", message);
    }

    pub fn log_progress(&self, progress: f64, message: &str) {
        info!(
            job_id = %self.job_id,
            stage = %self.stage,
            progress = progress,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(job_id = %self.job_id, stage = %self.stage, "Job warning: {}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(job_id = %self.job_id, stage = %self.stage, "Job error: {}", message);
    }

    /// Log the completion of a job with how long it held a slot.
    pub fn log_completion(&self, elapsed_secs: f64) {
        info!(
            job_id = %self.job_id,
            stage = %self.stage,
            elapsed_secs = elapsed_secs,
            "Job completed in {:.2}s", elapsed_secs
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Span carrying the job id, for instrumenting a whole run.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("analysis_job", job_id = %self.job_id, stage = %self.stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id, "detection");

        assert_eq!(logger.job_id(), job_id.to_string());
        assert_eq!(logger.stage(), "detection");
    }

    #[test]
    fn test_job_span_carries_job_id() {
        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id, "job");

        tracing::subscriber::with_default(tracing_subscriber::registry(), || {
            let span = logger.create_span();
            let metadata = span.metadata().unwrap();
            assert_eq!(metadata.name(), "analysis_job");
            assert!(metadata.fields().field("job_id").is_some());
        });
    }
}
