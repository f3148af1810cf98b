//! Progress events via Redis Pub/Sub, plus a last-known status key per job.

use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
use redis::AsyncCommands;
use tracing::debug;

use faceit_models::{JobId, ProgressEvent};

use crate::error::QueueResult;

/// Channel for publishing and subscribing to job progress.
#[derive(Clone)]
pub struct ProgressChannel {
    client: redis::Client,
    status_ttl: Duration,
}

impl ProgressChannel {
    pub fn new(redis_url: &str, status_ttl: Duration) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client, status_ttl })
    }

    pub fn from_client(client: redis::Client, status_ttl: Duration) -> Self {
        Self { client, status_ttl }
    }

    /// Pub/Sub channel for a job.
    pub fn channel_name(job_id: &JobId) -> String {
        format!("progress:{}", job_id)
    }

    /// Key holding the latest event for a job.
    pub fn status_key(job_id: &JobId) -> String {
        format!("faceit:status:{}", job_id)
    }

    /// Publish an event and record it as the job's latest status.
    pub async fn publish(&self, event: &ProgressEvent) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = Self::channel_name(&event.job_id);
        let payload = serde_json::to_string(event)?;

        conn.set_ex::<_, _, ()>(
            Self::status_key(&event.job_id),
            &payload,
            self.status_ttl.as_secs().max(1),
        )
        .await?;

        debug!("Publishing progress event to {}", channel);
        conn.publish::<_, _, ()>(channel, payload).await?;

        Ok(())
    }

    /// Latest event recorded for a job, if it has not expired.
    pub async fn fetch_status(&self, job_id: &JobId) -> QueueResult<Option<ProgressEvent>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = conn.get(Self::status_key(job_id)).await?;
        Ok(payload.map(|p| serde_json::from_str(&p)).transpose()?)
    }

    /// Subscribe to progress events for a job.
    pub async fn subscribe(
        &self,
        job_id: &JobId,
    ) -> QueueResult<Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(Self::channel_name(job_id)).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}
