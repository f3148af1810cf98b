//! Shared data models for the facial-expression analysis backend.
//!
//! This crate provides Serde-serializable types for:
//! - Job and session identifiers
//! - Analysis configuration and client settings parsing
//! - Job lifecycle snapshots and progress events
//! - Analysis summaries and API response envelopes
//! - Upload validation

pub mod config;
pub mod events;
pub mod ids;
pub mod job;
pub mod response;
pub mod summary;
pub mod upload;

// Re-export common types
pub use config::{AnalysisConfig, AnalysisType, ConfigError, VisualizationStyle};
pub use events::ProgressEvent;
pub use ids::{JobId, SessionId};
pub use job::{FailureKind, JobSnapshot, JobStatus};
pub use response::{
    AnalysisData, AnalysisResponse, CacheStatus, ResultMetadata, StatusResponse, SubmitResponse,
};
pub use summary::{
    ActionUnitAnalysis, ActionUnitStats, AnalysisSummary, EmotionAnalysis, EmotionStats,
    KeyMoment, ProcessingConfigEcho, Timeline,
};
pub use upload::{estimate_minutes, MediaKind, UploadError, UploadPolicy};
