//! Stage progress reported by a running pipeline.

use tokio::sync::mpsc;

/// Lowest progress a running job reports.
pub const MIN_STAGE_PROGRESS: f64 = 0.1;
/// Highest progress before the result is committed.
pub const MAX_STAGE_PROGRESS: f64 = 0.95;

/// One stage update.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub progress: f64,
    pub message: String,
}

/// Handle given to a pipeline run for reporting stage progress.
///
/// Values are clamped into the running range. The job manager applies them
/// monotonically, so reporting out of order never moves progress backwards.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ProgressReporter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Reporter whose updates go nowhere.
    pub fn detached() -> Self {
        Self::channel().0
    }

    pub fn report(&self, progress: f64, message: impl Into<String>) {
        let progress = if progress.is_nan() {
            MIN_STAGE_PROGRESS
        } else {
            progress.clamp(MIN_STAGE_PROGRESS, MAX_STAGE_PROGRESS)
        };
        // The job may already be finished or abandoned
        let _ = self.tx.send(ProgressUpdate {
            progress,
            message: message.into(),
        });
    }
}
