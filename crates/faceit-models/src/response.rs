//! Response envelopes returned to the transport layer.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{AnalysisSummary, JobId, JobStatus, VisualizationStyle};

/// Full analysis result, as cached and as returned by `result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisResponse {
    /// Always "success"
    pub status: String,
    pub message: String,
    pub data: AnalysisData,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisData {
    pub summary: AnalysisSummary,
    pub visualization_type: VisualizationStyle,
    pub metadata: ResultMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResultMetadata {
    pub filename: String,
    pub processed_at: DateTime<Utc>,
    pub detector_version: String,
    /// First characters of the cache fingerprint
    pub cache_key_prefix: String,
}

impl AnalysisResponse {
    pub fn success(
        summary: AnalysisSummary,
        visualization_type: VisualizationStyle,
        metadata: ResultMetadata,
    ) -> Self {
        Self {
            status: "success".to_string(),
            message: format!(
                "Analysis completed. Processed {} data points.",
                summary.total_frames
            ),
            data: AnalysisData {
                summary,
                visualization_type,
                metadata,
            },
            timestamp: Utc::now(),
        }
    }
}

/// Reply to a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub estimated_minutes: f64,
}

/// Reply to a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StatusResponse {
    pub status: JobStatus,
    pub progress: f64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Reply to a cache inspection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CacheStatus {
    pub size: usize,
    pub keys: Vec<String>,
    /// Remaining seconds per key, same order as `keys`
    pub ttls: Vec<u64>,
}
