//! Facial-expression analysis worker.
//!
//! This crate provides:
//! - `JobManager`: bounded-concurrency job table with timeouts and cancellation
//! - `AnalysisPipeline`: cache lookup, conversion, detection and summarization
//! - `SessionManager`: per-client grouping with one in-flight job per session
//! - `AnalysisService`: the job-oriented API consumed by a transport layer
//! - `JobExecutor`: Redis Streams consumer for broker deployments

pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod job;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod pipeline;
pub mod progress;
pub mod service;
pub mod session;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use events::ProgressHub;
pub use executor::JobExecutor;
pub use job::{JobInput, Upload};
pub use logging::JobLogger;
pub use manager::{JobManager, ManagerConfig, ManagerStats};
pub use pipeline::{AnalysisPipeline, JobRunner};
pub use progress::{ProgressReporter, ProgressUpdate};
pub use service::AnalysisService;
pub use session::{Session, SessionManager, SessionStatus, SessionUpdate};
