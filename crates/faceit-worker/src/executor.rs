//! Broker-mode executor: consumes analysis tasks from Redis Streams.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use faceit_models::{JobSnapshot, JobStatus, ProgressEvent};
use faceit_queue::{AnalysisTask, JobQueue, ProgressChannel};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::job::Upload;
use crate::manager::{signalled, JobManager, ManagerConfig};
use crate::pipeline::JobRunner;

/// Interval between attempts to claim tasks abandoned by other consumers.
const CLAIM_INTERVAL: Duration = Duration::from_secs(30);

/// Consumes tasks, runs them through a local [`JobManager`] and mirrors
/// progress and results back to Redis.
pub struct JobExecutor {
    queue: Arc<JobQueue>,
    progress: ProgressChannel,
    manager: JobManager,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    pub fn new(
        config: &WorkerConfig,
        queue: JobQueue,
        progress: ProgressChannel,
        runner: Arc<dyn JobRunner>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            queue: Arc::new(queue),
            progress,
            manager: JobManager::new(ManagerConfig::from(config), runner),
            shutdown,
            consumer_name: format!("worker-{}", Uuid::new_v4()),
        }
    }

    pub fn manager(&self) -> &JobManager {
        &self.manager
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Run until [`JobExecutor::shutdown`] is called.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting executor '{}' with {} workers",
            self.consumer_name,
            self.manager.config().max_workers
        );

        self.queue.init().await?;

        let (settled_tx, settled_rx) = mpsc::unbounded_channel();
        let relay_task = self.spawn_progress_relay(settled_rx);
        let claim_task = self.spawn_claimer(settled_tx.clone());
        let reaper_task = self.manager.start_reaper();

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = signalled(&mut shutdown_rx) => {
                    info!("Shutdown signal received, stopping executor");
                    break;
                }
                result = self.consume_tasks(&settled_tx) => {
                    if let Err(e) = result {
                        error!("Error consuming tasks: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        let _ = tokio::time::timeout(Duration::from_secs(60), self.wait_for_jobs()).await;

        relay_task.abort();
        self.manager.shutdown();
        let _ = reaper_task.await;

        info!("Executor stopped");
        Ok(())
    }

    async fn consume_tasks(&self, settled: &mpsc::UnboundedSender<ProgressEvent>) -> WorkerResult<()> {
        let available = self.manager.idle_capacity().await;
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let tasks = self
            .queue
            .consume(&self.consumer_name, 1000, available.min(5))
            .await?;
        if tasks.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} tasks", tasks.len());
        for (message_id, task) in tasks {
            let manager = self.manager.clone();
            let queue = Arc::clone(&self.queue);
            let progress = self.progress.clone();
            tokio::spawn(Self::execute_task(
                manager,
                queue,
                progress,
                settled.clone(),
                message_id,
                task,
            ));
        }
        Ok(())
    }

    fn spawn_claimer(&self, settled: mpsc::UnboundedSender<ProgressEvent>) -> JoinHandle<()> {
        let manager = self.manager.clone();
        let queue = Arc::clone(&self.queue);
        let progress = self.progress.clone();
        let consumer_name = self.consumer_name.clone();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLAIM_INTERVAL);
            loop {
                tokio::select! {
                    _ = signalled(&mut shutdown_rx) => break,
                    _ = interval.tick() => {
                        let available = manager.idle_capacity().await;
                        if available == 0 {
                            continue;
                        }
                        match queue.claim_pending(&consumer_name, available.min(5)).await {
                            Ok(tasks) if !tasks.is_empty() => {
                                info!("Claimed {} pending tasks", tasks.len());
                                for (message_id, task) in tasks {
                                    tokio::spawn(Self::execute_task(
                                        manager.clone(),
                                        Arc::clone(&queue),
                                        progress.clone(),
                                        settled.clone(),
                                        message_id,
                                        task,
                                    ));
                                }
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Failed to claim pending tasks: {}", e),
                        }
                    }
                }
            }
        })
    }

    /// Mirror job events to the status key and pub/sub channel.
    ///
    /// Local events are mirrored as they happen, minus terminal ones. Settled
    /// events come from the settle step and are only taken once no local
    /// event is waiting, so a job's terminal status is always written last.
    fn spawn_progress_relay(&self, mut settled: mpsc::UnboundedReceiver<ProgressEvent>) -> JoinHandle<()> {
        let mut events = self.manager.subscribe();
        let progress = self.progress.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    event = events.recv() => match event {
                        Ok(event) if !relays(&event) => {}
                        Ok(event) => publish(&progress, &event).await,
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("Progress relay lagged, {} events dropped", missed);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    Some(event) = settled.recv() => publish(&progress, &event).await,
                }
            }
        })
    }

    /// Run one task and settle its stream entry.
    ///
    /// Completed, cancelled and non-retryable failures are acknowledged.
    /// Retryable failures stay pending for redelivery until the retry budget
    /// is spent, then go to the dead letter stream. The mirrored status only
    /// turns terminal once the entry is settled for good.
    async fn execute_task(
        manager: JobManager,
        queue: Arc<JobQueue>,
        progress: ProgressChannel,
        settled: mpsc::UnboundedSender<ProgressEvent>,
        message_id: String,
        task: AnalysisTask,
    ) {
        let job_id = task.job_id.clone();
        info!("Executing task {}", job_id);

        match progress.fetch_status(&job_id).await {
            Ok(Some(event)) if event.is_terminal() => {
                info!("Task {} already settled as {}, acknowledging", job_id, event.status);
                if let Err(e) = queue.complete(&message_id, &task).await {
                    error!("Failed to ack task {}: {}", job_id, e);
                }
                return;
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to read mirrored status of {}: {}", job_id, e),
        }

        let payload = match queue.fetch_payload(&task).await {
            Ok(payload) => payload,
            Err(e) => {
                error!("Task {} has no payload: {}", job_id, e);
                let message = format!("Analysis failed: {}", e);
                if let Err(e) = queue.dlq(&message_id, &task, &message).await {
                    error!("Failed to move task {} to DLQ: {}", job_id, e);
                    return;
                }
                let _ = settled.send(ProgressEvent::new(job_id.clone(), JobStatus::Failed, 0.0, message));
                return;
            }
        };

        let Some(job) = run_attempt(&manager, &task, payload).await else {
            return;
        };

        let settlement = match job.status {
            JobStatus::Completed => {
                if let Some(result) = &job.result {
                    if let Err(e) = queue.store_result(&job_id, result).await {
                        error!("Failed to store result of {}: {}", job_id, e);
                        return;
                    }
                }
                Settlement::Ack
            }
            JobStatus::Failed if job.failure_kind.is_some_and(|k| k.is_retryable()) => {
                let attempt = queue.increment_retry(&message_id).await.unwrap_or(u32::MAX);
                Settlement::after_retryable_failure(attempt, queue.max_retries())
            }
            status if status.is_terminal() => Settlement::Ack,
            status => {
                debug!("Leaving task {} pending in state {}", job_id, status);
                return;
            }
        };

        let outcome = match settlement {
            Settlement::Ack => queue.complete(&message_id, &task).await,
            Settlement::Retry { attempt, max_retries } => {
                info!(
                    "Task {} failed (attempt {}/{}), leaving pending for retry: {}",
                    job_id,
                    attempt,
                    max_retries,
                    job.error.as_deref().unwrap_or_default()
                );
                Ok(())
            }
            Settlement::DeadLetter => {
                let error = job.error.clone().unwrap_or_default();
                queue.dlq(&message_id, &task, &error).await
            }
        };
        if let Err(e) = outcome {
            error!("Failed to settle task {}: {}", job_id, e);
            return;
        }

        if let Some(event) = settlement.event(&job) {
            let _ = settled.send(event);
        }
    }

    async fn wait_for_jobs(&self) {
        loop {
            let stats = self.manager.stats().await;
            if stats.active_workers == 0 && stats.queued_jobs == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

/// Whether the relay mirrors a local event as soon as it is published.
fn relays(event: &ProgressEvent) -> bool {
    !event.is_terminal()
}

async fn publish(progress: &ProgressChannel, event: &ProgressEvent) {
    if let Err(e) = progress.publish(event).await {
        warn!(job_id = %event.job_id, "Failed to publish progress: {}", e);
    }
}

/// Replace any earlier attempt of the task with a fresh local job and run it.
async fn run_attempt(manager: &JobManager, task: &AnalysisTask, payload: Vec<u8>) -> Option<JobSnapshot> {
    let job_id = &task.job_id;
    if manager.remove_job(job_id).await.is_some() {
        debug!("Replacing previous attempt of {}", job_id);
    }

    let upload = Upload::new(payload, task.filename.clone(), task.content_type.clone());
    if let Err(e) = manager
        .create_job(
            job_id.clone(),
            task.session_id.clone(),
            upload,
            task.config.clone(),
            task.estimated_minutes,
        )
        .await
    {
        warn!("Skipping task {}: {}", job_id, e);
        return None;
    }

    manager.process_job(job_id).await;
    manager.get_job(job_id).await
}

/// How a finished attempt leaves the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    /// Acknowledge and delete the entry
    Ack,
    /// Leave pending for redelivery
    Retry { attempt: u32, max_retries: u32 },
    /// Move to the dead letter stream
    DeadLetter,
}

impl Settlement {
    fn after_retryable_failure(attempt: u32, max_retries: u32) -> Self {
        if attempt >= max_retries {
            Settlement::DeadLetter
        } else {
            Settlement::Retry { attempt, max_retries }
        }
    }

    /// Status to mirror once the entry is settled.
    ///
    /// A retry reports the job as queued again; everything else reports the
    /// terminal state the relay held back.
    fn event(self, job: &JobSnapshot) -> Option<ProgressEvent> {
        match self {
            Settlement::Retry { attempt, max_retries } => Some(ProgressEvent::new(
                job.job_id.clone(),
                JobStatus::Queued,
                0.0,
                format!("Retrying after failure (attempt {}/{})", attempt, max_retries),
            )),
            _ if job.status.is_terminal() => Some(ProgressEvent::new(
                job.job_id.clone(),
                job.status,
                job.progress,
                job.message.clone(),
            )),
            _ => None,
        }
    }
}
