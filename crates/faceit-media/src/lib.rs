//! Detection adapter and media helpers.
//!
//! This crate provides:
//! - The `FrameTable` produced by a facial-expression detector
//! - A blocking `FrameDetector` seam and an external-process detector
//! - `DetectionAdapter`, which runs detection off the async scheduler
//! - Pure summarization of frame tables (statistics, timelines, key moments)
//! - FFmpeg/FFprobe helpers for container conversion, frame rate and stills

pub mod adapter;
pub mod command;
pub mod detector;
pub mod error;
pub mod probe;
pub mod summarize;
pub mod table;
pub mod tools;

pub use adapter::DetectionAdapter;
pub use command::{FfmpegCommand, FfmpegRunner};
pub use detector::{DetectRequest, ExternalDetector, FrameDetector};
pub use error::{MediaError, MediaResult};
pub use probe::probe_frame_rate;
pub use summarize::{summarize, SummaryConfig};
pub use table::{Column, FrameTable, EMOTION_COLUMNS, FACE_SCORE_COLUMN, TRACKED_EMOTIONS};
pub use tools::{encode_snapshot, needs_conversion, FfmpegTools, VideoTools};
