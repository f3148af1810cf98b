//! Broker task definition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use faceit_models::{AnalysisConfig, JobId, SessionId};

/// One analysis request travelling through the stream.
///
/// The upload itself is stored under [`AnalysisTask::payload_key`] so stream
/// entries stay small.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisTask {
    pub job_id: JobId,
    pub session_id: SessionId,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub config: AnalysisConfig,
    pub payload_len: usize,
    pub estimated_minutes: f64,
    pub created_at: DateTime<Utc>,
}

impl AnalysisTask {
    pub fn new(
        job_id: JobId,
        session_id: SessionId,
        filename: impl Into<String>,
        content_type: Option<String>,
        config: AnalysisConfig,
        payload_len: usize,
    ) -> Self {
        Self {
            job_id,
            session_id,
            filename: filename.into(),
            content_type,
            estimated_minutes: faceit_models::estimate_minutes(payload_len, config.frame_skip),
            config,
            payload_len,
            created_at: Utc::now(),
        }
    }

    pub fn payload_key(&self) -> String {
        format!("faceit:payload:{}", self.job_id)
    }

    /// Deduplication key; a job id is accepted once.
    pub fn idempotency_key(&self) -> String {
        format!("faceit:dedup:{}", self.job_id)
    }
}
