//! Task queue using Redis Streams.

use std::time::Duration;

use redis::AsyncCommands;
use tracing::{debug, info, warn};

use faceit_models::{AnalysisResponse, JobId};

use crate::error::{QueueError, QueueResult};
use crate::task::AnalysisTask;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub redis_url: String,
    /// Stream name for tasks
    pub stream_name: String,
    pub consumer_group: String,
    /// Dead letter stream name
    pub dlq_stream_name: String,
    /// Max retries before DLQ
    pub max_retries: u32,
    /// Idle time after which a pending task may be claimed by another worker
    pub visibility_timeout: Duration,
    /// Lifetime of stored results, statuses and payloads
    pub result_expiry: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "faceit:tasks".to_string(),
            consumer_group: "faceit:workers".to_string(),
            dlq_stream_name: "faceit:dlq".to_string(),
            max_retries: 3,
            visibility_timeout: Duration::from_secs(1800),
            result_expiry: Duration::from_secs(3600),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            max_retries: std::env::var("QUEUE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            visibility_timeout: Duration::from_secs(
                std::env::var("QUEUE_VISIBILITY_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1800),
            ),
            result_expiry: Duration::from_secs(
                std::env::var("QUEUE_RESULT_EXPIRES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
        }
    }
}

fn result_key(job_id: &JobId) -> String {
    format!("faceit:result:{}", job_id)
}

fn retry_key(message_id: &str) -> String {
    format!("faceit:retry:{}", message_id)
}

/// Task queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn client(&self) -> &redis::Client {
        &self.client
    }

    async fn conn(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Check the broker answers.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    /// Create the consumer group if it does not exist.
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Store the payload and add the task to the stream.
    pub async fn enqueue(&self, task: &AnalysisTask, payload: &[u8]) -> QueueResult<String> {
        let mut conn = self.conn().await?;
        let expiry = self.config.result_expiry.as_secs();

        // SET NX doubles as the duplicate check
        let dedup_key = task.idempotency_key();
        let fresh: bool = redis::cmd("SET")
            .arg(&dedup_key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(expiry)
            .query_async::<Option<String>>(&mut conn)
            .await?
            .is_some();
        if !fresh {
            warn!("Duplicate task rejected: {}", task.job_id);
            return Err(QueueError::Duplicate(task.job_id.to_string()));
        }

        conn.set_ex::<_, _, ()>(task.payload_key(), payload, expiry).await?;

        let body = serde_json::to_string(task)?;
        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("task")
            .arg(&body)
            .query_async(&mut conn)
            .await?;

        info!("Enqueued task {} with message ID {}", task.job_id, message_id);
        Ok(message_id)
    }

    /// Load the upload for a task.
    pub async fn fetch_payload(&self, task: &AnalysisTask) -> QueueResult<Vec<u8>> {
        let mut conn = self.conn().await?;
        let payload: Option<Vec<u8>> = conn.get(task.payload_key()).await?;
        payload.ok_or_else(|| QueueError::PayloadMissing(task.job_id.to_string()))
    }

    /// Acknowledge and delete a stream entry.
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        conn.del::<_, ()>(retry_key(message_id)).await?;

        debug!("Acknowledged task: {}", message_id);
        Ok(())
    }

    /// Acknowledge a finished task and drop its payload.
    pub async fn complete(&self, message_id: &str, task: &AnalysisTask) -> QueueResult<()> {
        self.ack(message_id).await?;
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(task.payload_key()).await?;
        Ok(())
    }

    /// Move a task to the dead letter stream.
    pub async fn dlq(&self, message_id: &str, task: &AnalysisTask, error: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let body = serde_json::to_string(task)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("task")
            .arg(&body)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.complete(message_id, task).await?;

        warn!("Moved task {} to DLQ: {}", task.job_id, error);
        Ok(())
    }

    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.xlen(&self.config.stream_name).await?)
    }

    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.xlen(&self.config.dlq_stream_name).await?)
    }

    /// Read new tasks for this consumer.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, AnalysisTask)>> {
        let mut conn = self.conn().await?;

        let result: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let mut tasks = Vec::new();
        for stream_key in result.keys {
            for entry in stream_key.ids {
                if let Some(task) = self.decode_entry(&entry.id, &entry.map).await {
                    tasks.push((entry.id.clone(), task));
                }
            }
        }

        Ok(tasks)
    }

    /// Claim tasks left pending by a crashed or retrying worker.
    pub async fn claim_pending(
        &self,
        consumer_name: &str,
        count: usize,
    ) -> QueueResult<Vec<(String, AnalysisTask)>> {
        let mut conn = self.conn().await?;

        let min_idle_ms = self.config.visibility_timeout.as_millis() as u64;

        let pending: redis::streams::StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut claim = redis::cmd("XCLAIM");
        claim
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms);
        for entry in &pending.ids {
            claim.arg(&entry.id);
        }
        let result: redis::streams::StreamClaimReply = claim.query_async(&mut conn).await?;

        let mut tasks = Vec::new();
        for entry in result.ids {
            if let Some(task) = self.decode_entry(&entry.id, &entry.map).await {
                info!("Claimed pending task {}", task.job_id);
                tasks.push((entry.id.clone(), task));
            }
        }

        Ok(tasks)
    }

    async fn decode_entry(
        &self,
        message_id: &str,
        map: &std::collections::HashMap<String, redis::Value>,
    ) -> Option<AnalysisTask> {
        let Some(redis::Value::BulkString(body)) = map.get("task") else {
            return None;
        };
        match serde_json::from_slice::<AnalysisTask>(body) {
            Ok(task) => {
                debug!("Consumed task {} from stream", task.job_id);
                Some(task)
            }
            Err(e) => {
                warn!("Failed to parse task payload: {}", e);
                // Ack malformed entries so they are not redelivered forever
                self.ack(message_id).await.ok();
                None
            }
        }
    }

    pub async fn increment_retry(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.conn().await?;
        let key = retry_key(message_id);
        let count: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, 86400).await?;
        Ok(count)
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Store a completed result for later retrieval.
    pub async fn store_result(&self, job_id: &JobId, result: &AnalysisResponse) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let body = serde_json::to_string(result)?;
        conn.set_ex::<_, _, ()>(result_key(job_id), body, self.config.result_expiry.as_secs())
            .await?;
        Ok(())
    }

    pub async fn fetch_result(&self, job_id: &JobId) -> QueueResult<Option<AnalysisResponse>> {
        let mut conn = self.conn().await?;
        let body: Option<String> = conn.get(result_key(job_id)).await?;
        Ok(body.map(|b| serde_json::from_str(&b)).transpose()?)
    }
}
