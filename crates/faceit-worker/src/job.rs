//! Job records held by the manager.

use chrono::Utc;
use tokio::sync::watch;

use faceit_models::{
    AnalysisConfig, JobId, JobSnapshot, JobStatus, MediaKind, ProgressEvent, SessionId,
};

/// An uploaded file awaiting analysis.
#[derive(Debug, Clone)]
pub struct Upload {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub content_type: Option<String>,
}

impl Upload {
    pub fn new(bytes: Vec<u8>, filename: impl Into<String>, content_type: Option<String>) -> Self {
        Self {
            bytes,
            filename: filename.into(),
            content_type,
        }
    }

    pub fn kind(&self) -> MediaKind {
        MediaKind::from_filename(&self.filename).unwrap_or(MediaKind::Video)
    }
}

/// Everything a pipeline run needs, handed over when the job starts.
#[derive(Debug, Clone)]
pub struct JobInput {
    pub job_id: JobId,
    pub upload: Upload,
    pub kind: MediaKind,
    pub config: AnalysisConfig,
}

/// Mutable job state behind the manager's lock.
#[derive(Debug)]
pub(crate) struct JobRecord {
    pub snapshot: JobSnapshot,
    /// Dropped once the job starts or reaches a terminal state
    pub payload: Option<Vec<u8>>,
    /// Fencing token of the current run; 0 before the job starts
    pub fence: u64,
    pub cancel: watch::Sender<bool>,
}

impl JobRecord {
    pub fn new(
        job_id: JobId,
        session_id: SessionId,
        upload: Upload,
        config: AnalysisConfig,
        estimated_duration: f64,
    ) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            snapshot: JobSnapshot {
                job_id,
                session_id,
                filename: upload.filename,
                content_type: upload.content_type,
                config,
                status: JobStatus::Queued,
                progress: 0.0,
                message: "Job queued".to_string(),
                result: None,
                error: None,
                failure_kind: None,
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
                estimated_duration,
            },
            payload: Some(upload.bytes),
            fence: 0,
            cancel,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.snapshot.status
    }

    pub fn event(&self) -> ProgressEvent {
        ProgressEvent::new(
            self.snapshot.job_id.clone(),
            self.snapshot.status,
            self.snapshot.progress,
            self.snapshot.message.clone(),
        )
    }

    /// Age since reaching a terminal state.
    pub fn finished_for(&self) -> Option<std::time::Duration> {
        let completed = self.snapshot.completed_at?;
        (Utc::now() - completed).to_std().ok()
    }
}
