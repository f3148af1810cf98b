//! Redis Streams broker for analysis tasks.
//!
//! This crate provides:
//! - Task enqueueing via Redis Streams, payload stored beside the stream
//! - Consumption with acknowledgement, retry counting and a dead-letter stream
//! - Status and result keys with expiry
//! - Progress events via Redis Pub/Sub

pub mod error;
pub mod progress;
pub mod queue;
pub mod task;

pub use error::{QueueError, QueueResult};
pub use progress::ProgressChannel;
pub use queue::{JobQueue, QueueConfig};
pub use task::AnalysisTask;
