//! In-process fan-out of job progress.

use tokio::sync::broadcast;

use faceit_models::ProgressEvent;

/// Broadcasts every job transition and progress update to all subscribers.
///
/// Slow subscribers lag and miss events instead of blocking publishers.
#[derive(Debug, Clone)]
pub struct ProgressHub {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: ProgressEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faceit_models::{JobId, JobStatus};

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let hub = ProgressHub::new(8);
        hub.publish(ProgressEvent::new(JobId::new(), JobStatus::Queued, 0.0, "dropped"));

        let mut rx = hub.subscribe();
        let job_id = JobId::from_string("job-1");
        hub.publish(ProgressEvent::new(job_id.clone(), JobStatus::Processing, 0.1, "go"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.job_id, job_id);
        assert_eq!(event.status, JobStatus::Processing);
        assert_eq!(hub.subscriber_count(), 1);
    }
}
