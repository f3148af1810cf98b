//! Worker error types.

use faceit_cache::CacheError;
use faceit_media::MediaError;
use faceit_models::{ConfigError, JobId, JobStatus, SessionId, UploadError};
use faceit_queue::QueueError;
use thiserror::Error;

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors surfaced by the job API and the broker worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Job already exists: {0}")]
    DuplicateJob(JobId),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Session {session_id} already has job {job_id} in progress")]
    SessionBusy { session_id: SessionId, job_id: JobId },

    #[error("Result for job {job_id} is not available (status: {status})")]
    ResultNotReady { job_id: JobId, status: JobStatus },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Caller mistakes: malformed input, unknown ids, duplicate submissions.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            WorkerError::Validation(_)
                | WorkerError::DuplicateJob(_)
                | WorkerError::JobNotFound(_)
                | WorkerError::SessionNotFound(_)
        )
    }

    /// Rejected because of current state rather than bad input.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            WorkerError::SessionBusy { .. } | WorkerError::ResultNotReady { .. }
        )
    }
}

impl From<ConfigError> for WorkerError {
    fn from(err: ConfigError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<UploadError> for WorkerError {
    fn from(err: UploadError) -> Self {
        Self::Validation(err.to_string())
    }
}
