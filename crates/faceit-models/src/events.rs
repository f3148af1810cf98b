//! Push notifications for job progress.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{JobId, JobStatus};

/// Emitted on every progress update or state transition of a job.
///
/// Delivery is best-effort; clients recover full state by polling status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: f64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(job_id: JobId, status: JobStatus, progress: f64, message: impl Into<String>) -> Self {
        Self {
            job_id,
            status,
            progress,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
