//! Job table, worker slots and the job lifecycle.
//!
//! A job moves `Queued -> Processing -> {Completed, Failed}` or is cancelled
//! from either active state. Every run is stamped with a fencing token when
//! it starts; a finishing run commits its outcome only if the job is still
//! `Processing` under the same token, so a cancelled or timed-out run can
//! never overwrite the terminal state recorded for it.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{broadcast, watch, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use faceit_media::{MediaError, MediaResult};
use faceit_models::{
    AnalysisConfig, AnalysisResponse, FailureKind, JobId, JobSnapshot, JobStatus, ProgressEvent,
    SessionId,
};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::events::ProgressHub;
use crate::job::{JobInput, JobRecord, Upload};
use crate::logging::JobLogger;
use crate::metrics;
use crate::pipeline::JobRunner;
use crate::progress::{ProgressReporter, ProgressUpdate, MIN_STAGE_PROGRESS};

/// Job manager limits.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub max_workers: usize,
    pub job_timeout: Duration,
    pub cleanup_interval: Duration,
    /// Finished jobs older than this are reclaimed
    pub job_retention: Duration,
    pub event_buffer: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_workers: 3,
            job_timeout: Duration::from_secs(900),
            cleanup_interval: Duration::from_secs(600),
            job_retention: Duration::from_secs(3600),
            event_buffer: 256,
        }
    }
}

impl From<&WorkerConfig> for ManagerConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            max_workers: config.max_workers,
            job_timeout: config.job_timeout,
            cleanup_interval: config.cleanup_interval,
            job_retention: config.job_retention,
            event_buffer: config.event_buffer,
        }
    }
}

/// Lifetime totals plus point-in-time counts over the job table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub total_submitted: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,
    /// Queued plus processing
    pub active_jobs: usize,
    /// Records currently held, including finished ones
    pub total_jobs: usize,
    pub queued_jobs: usize,
    pub active_workers: usize,
    pub max_workers: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub cancelled_jobs: usize,
}

enum Outcome {
    Finished(Result<MediaResult<AnalysisResponse>, Box<dyn Any + Send>>),
    TimedOut,
    Cancelled,
}

#[derive(Default)]
struct Totals {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

struct Inner {
    config: ManagerConfig,
    totals: Totals,
    jobs: RwLock<HashMap<JobId, JobRecord>>,
    slots: Arc<Semaphore>,
    runner: Arc<dyn JobRunner>,
    events: ProgressHub,
    next_fence: AtomicU64,
    shutdown: watch::Sender<bool>,
}

/// Owns every job and at most `max_workers` concurrent runs.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

/// Resolves once `rx` holds `true`. Never resolves if the sender goes away
/// without signalling.
pub(crate) async fn signalled(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn failure_kind(err: &MediaError) -> FailureKind {
    match err {
        MediaError::NoFacesDetected => FailureKind::NoFaceDetected,
        MediaError::DetectionFailed(_) | MediaError::DetectorNotFound(_) => {
            FailureKind::DetectorFailure
        }
        MediaError::Timeout(_) => FailureKind::Timeout,
        _ => FailureKind::Internal,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn mark_cancelled(record: &mut JobRecord, message: &str) {
    record.snapshot.status = JobStatus::Cancelled;
    record.snapshot.progress = 0.0;
    record.snapshot.message = message.to_string();
    record.snapshot.completed_at = Some(Utc::now());
    record.payload = None;
    record.cancel.send_replace(true);
}

fn sorted_by_creation(mut jobs: Vec<JobSnapshot>) -> Vec<JobSnapshot> {
    jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    jobs
}

impl JobManager {
    pub fn new(config: ManagerConfig, runner: Arc<dyn JobRunner>) -> Self {
        let max_workers = config.max_workers.max(1);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                slots: Arc::new(Semaphore::new(max_workers)),
                events: ProgressHub::new(config.event_buffer),
                config: ManagerConfig {
                    max_workers,
                    ..config
                },
                jobs: RwLock::new(HashMap::new()),
                totals: Totals::default(),
                runner,
                next_fence: AtomicU64::new(0),
                shutdown,
            }),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &ProgressHub {
        &self.inner.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.events.subscribe()
    }

    /// Register a new job in `Queued`.
    pub async fn create_job(
        &self,
        job_id: JobId,
        session_id: SessionId,
        upload: Upload,
        config: AnalysisConfig,
        estimated_duration: f64,
    ) -> WorkerResult<JobSnapshot> {
        let mut jobs = self.inner.jobs.write().await;
        if jobs.contains_key(&job_id) {
            return Err(WorkerError::DuplicateJob(job_id));
        }

        let record = JobRecord::new(job_id.clone(), session_id, upload, config, estimated_duration);
        let snapshot = record.snapshot.clone();
        self.inner.events.publish(record.event());
        jobs.insert(job_id.clone(), record);

        self.inner.totals.submitted.fetch_add(1, Ordering::Relaxed);
        metrics::record_job_submitted();
        metrics::set_queued_jobs(Self::count(&jobs, JobStatus::Queued));
        info!(job_id = %job_id, "Job queued: {}", snapshot.filename);
        Ok(snapshot)
    }

    pub async fn get_job(&self, job_id: &JobId) -> Option<JobSnapshot> {
        let jobs = self.inner.jobs.read().await;
        jobs.get(job_id).map(|record| record.snapshot.clone())
    }

    /// Cancel a queued or processing job. Returns false if the job is unknown
    /// or already terminal.
    pub async fn cancel_job(&self, job_id: &JobId) -> bool {
        let mut jobs = self.inner.jobs.write().await;
        let Some(record) = jobs.get_mut(job_id) else {
            return false;
        };
        if record.status().is_terminal() {
            return false;
        }

        let was = record.status();
        mark_cancelled(record, "Job cancelled by user");
        self.inner.events.publish(record.event());
        self.inner.totals.cancelled.fetch_add(1, Ordering::Relaxed);
        metrics::record_job_cancelled();
        info!(job_id = %job_id, "Job cancelled while {}", was);
        true
    }

    /// Wait for a slot, run the job and commit its outcome.
    ///
    /// Returns once the job is terminal or was abandoned because it was
    /// cancelled. Unknown or already started jobs are ignored.
    pub async fn process_job(&self, job_id: &JobId) {
        let mut cancel_rx = {
            let jobs = self.inner.jobs.read().await;
            match jobs.get(job_id) {
                Some(record) if record.status() == JobStatus::Queued => record.cancel.subscribe(),
                Some(record) => {
                    debug!(job_id = %job_id, "Not processing job in state {}", record.status());
                    return;
                }
                None => {
                    warn!(job_id = %job_id, "Cannot process unknown job");
                    return;
                }
            }
        };

        let permit = tokio::select! {
            biased;
            _ = signalled(&mut cancel_rx) => {
                debug!(job_id = %job_id, "Job cancelled while waiting for a slot");
                return;
            }
            permit = Arc::clone(&self.inner.slots).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        let Some((input, fence)) = self.start(job_id).await else {
            return;
        };
        self.refresh_gauges().await;

        let logger = JobLogger::new(job_id, "job");
        logger.log_start(&input.upload.filename);
        let started = Instant::now();
        let timeout = self.inner.config.job_timeout;

        let (reporter, mut updates) = ProgressReporter::channel();
        let run = self.inner.runner.run(input, reporter).instrument(logger.create_span());
        let mut run = Box::pin(AssertUnwindSafe(run).catch_unwind());
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = signalled(&mut cancel_rx) => break Outcome::Cancelled,
                _ = &mut deadline => break Outcome::TimedOut,
                result = &mut run => break Outcome::Finished(result),
                Some(update) = updates.recv() => self.apply_progress(job_id, fence, update).await,
            }
        };
        // Abandon the run; a detector already on a blocking thread finishes
        // there and its output is discarded.
        drop(run);

        let elapsed = started.elapsed().as_secs_f64();
        match outcome {
            Outcome::Cancelled => logger.log_warning("Cancelled while processing"),
            Outcome::TimedOut => {
                let message = format!("Analysis timed out after {} seconds", timeout.as_secs_f64());
                logger.log_error(&message);
                self.fail(job_id, fence, FailureKind::Timeout, message).await;
            }
            Outcome::Finished(Ok(Ok(response))) => {
                if self.complete(job_id, fence, response).await {
                    metrics::record_job_completed(elapsed);
                    logger.log_completion(elapsed);
                }
            }
            Outcome::Finished(Ok(Err(e))) => {
                logger.log_error(&e.to_string());
                self.fail(job_id, fence, failure_kind(&e), e.to_string()).await;
            }
            Outcome::Finished(Err(panic)) => {
                let message = format!("Worker panicked: {}", panic_message(&*panic));
                logger.log_error(&message);
                self.fail(job_id, fence, FailureKind::Internal, message).await;
            }
        }

        drop(permit);
        self.refresh_gauges().await;
    }

    async fn start(&self, job_id: &JobId) -> Option<(JobInput, u64)> {
        let mut jobs = self.inner.jobs.write().await;
        let record = jobs.get_mut(job_id)?;
        if record.status() != JobStatus::Queued {
            return None;
        }

        let fence = self.inner.next_fence.fetch_add(1, Ordering::SeqCst) + 1;
        record.fence = fence;
        record.snapshot.status = JobStatus::Processing;
        record.snapshot.started_at = Some(Utc::now());
        record.snapshot.progress = MIN_STAGE_PROGRESS;
        record.snapshot.message = "Processing video...".to_string();

        let upload = Upload {
            bytes: record.payload.take().unwrap_or_default(),
            filename: record.snapshot.filename.clone(),
            content_type: record.snapshot.content_type.clone(),
        };
        let input = JobInput {
            job_id: job_id.clone(),
            kind: upload.kind(),
            upload,
            config: record.snapshot.config.clone(),
        };
        self.inner.events.publish(record.event());
        Some((input, fence))
    }

    /// Raise progress; lower values are ignored.
    async fn apply_progress(&self, job_id: &JobId, fence: u64, update: ProgressUpdate) {
        let mut jobs = self.inner.jobs.write().await;
        let Some(record) = jobs.get_mut(job_id) else {
            return;
        };
        if record.status() != JobStatus::Processing
            || record.fence != fence
            || update.progress < record.snapshot.progress
        {
            return;
        }
        record.snapshot.progress = update.progress;
        record.snapshot.message = update.message;
        self.inner.events.publish(record.event());
    }

    /// Fenced commit helper. Returns the record only if `fence` still owns it.
    fn owned<'a>(
        jobs: &'a mut HashMap<JobId, JobRecord>,
        job_id: &JobId,
        fence: u64,
    ) -> Option<&'a mut JobRecord> {
        let record = jobs.get_mut(job_id)?;
        if record.status() == JobStatus::Processing && record.fence == fence {
            Some(record)
        } else {
            debug!(job_id = %job_id, fence = fence, "Discarding stale outcome");
            None
        }
    }

    async fn complete(&self, job_id: &JobId, fence: u64, response: AnalysisResponse) -> bool {
        let mut jobs = self.inner.jobs.write().await;
        let Some(record) = Self::owned(&mut jobs, job_id, fence) else {
            return false;
        };
        record.snapshot.status = JobStatus::Completed;
        record.snapshot.progress = 1.0;
        record.snapshot.message = "Analysis completed successfully".to_string();
        record.snapshot.result = Some(response);
        record.snapshot.completed_at = Some(Utc::now());
        self.inner.events.publish(record.event());
        self.inner.totals.completed.fetch_add(1, Ordering::Relaxed);
        true
    }

    async fn fail(&self, job_id: &JobId, fence: u64, kind: FailureKind, error: String) {
        let mut jobs = self.inner.jobs.write().await;
        let Some(record) = Self::owned(&mut jobs, job_id, fence) else {
            return;
        };
        record.snapshot.status = JobStatus::Failed;
        record.snapshot.progress = 0.0;
        record.snapshot.message = match kind {
            FailureKind::Timeout => error.clone(),
            _ => format!("Analysis failed: {}", error),
        };
        record.snapshot.error = Some(error);
        record.snapshot.failure_kind = Some(kind);
        record.snapshot.completed_at = Some(Utc::now());
        self.inner.events.publish(record.event());
        self.inner.totals.failed.fetch_add(1, Ordering::Relaxed);
        metrics::record_job_failed(kind);
    }

    fn count(jobs: &HashMap<JobId, JobRecord>, status: JobStatus) -> usize {
        jobs.values().filter(|r| r.status() == status).count()
    }

    async fn refresh_gauges(&self) {
        let jobs = self.inner.jobs.read().await;
        metrics::set_active_workers(Self::count(&jobs, JobStatus::Processing));
        metrics::set_queued_jobs(Self::count(&jobs, JobStatus::Queued));
    }

    /// Jobs currently holding a worker slot.
    pub async fn get_active_jobs(&self) -> Vec<JobSnapshot> {
        self.jobs_in(JobStatus::Processing).await
    }

    /// Jobs waiting for a worker slot.
    pub async fn get_queued_jobs(&self) -> Vec<JobSnapshot> {
        self.jobs_in(JobStatus::Queued).await
    }

    async fn jobs_in(&self, status: JobStatus) -> Vec<JobSnapshot> {
        let jobs = self.inner.jobs.read().await;
        sorted_by_creation(
            jobs.values()
                .filter(|r| r.status() == status)
                .map(|r| r.snapshot.clone())
                .collect(),
        )
    }

    pub async fn stats(&self) -> ManagerStats {
        let jobs = self.inner.jobs.read().await;
        let totals = &self.inner.totals;
        let queued_jobs = Self::count(&jobs, JobStatus::Queued);
        let active_workers = Self::count(&jobs, JobStatus::Processing);
        ManagerStats {
            total_submitted: totals.submitted.load(Ordering::Relaxed),
            total_completed: totals.completed.load(Ordering::Relaxed),
            total_failed: totals.failed.load(Ordering::Relaxed),
            total_cancelled: totals.cancelled.load(Ordering::Relaxed),
            active_jobs: queued_jobs + active_workers,
            total_jobs: jobs.len(),
            queued_jobs,
            active_workers,
            max_workers: self.inner.config.max_workers,
            completed_jobs: Self::count(&jobs, JobStatus::Completed),
            failed_jobs: Self::count(&jobs, JobStatus::Failed),
            cancelled_jobs: Self::count(&jobs, JobStatus::Cancelled),
        }
    }

    /// Free slots not already spoken for by queued jobs.
    pub async fn idle_capacity(&self) -> usize {
        let queued = {
            let jobs = self.inner.jobs.read().await;
            Self::count(&jobs, JobStatus::Queued)
        };
        self.inner.slots.available_permits().saturating_sub(queued)
    }

    /// Drop terminal jobs finished longer than the retention period ago.
    pub async fn cleanup_old_jobs(&self) -> usize {
        let retention = self.inner.config.job_retention;
        let mut jobs = self.inner.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, record| {
            !(record.status().is_terminal()
                && record.finished_for().is_some_and(|age| age >= retention))
        });
        before - jobs.len()
    }

    /// Forget a terminal job so its id can be submitted again.
    pub async fn remove_job(&self, job_id: &JobId) -> Option<JobSnapshot> {
        let mut jobs = self.inner.jobs.write().await;
        if jobs.get(job_id)?.status().is_active() {
            return None;
        }
        jobs.remove(job_id).map(|record| record.snapshot)
    }

    /// Cancel and forget every job of a session.
    pub async fn purge_session(&self, session_id: &SessionId) -> usize {
        let mut jobs = self.inner.jobs.write().await;
        let ids: Vec<JobId> = jobs
            .values()
            .filter(|r| &r.snapshot.session_id == session_id)
            .map(|r| r.snapshot.job_id.clone())
            .collect();

        for id in &ids {
            if let Some(mut record) = jobs.remove(id) {
                if record.status().is_active() {
                    mark_cancelled(&mut record, "Session expired");
                    self.inner.events.publish(record.event());
                    self.inner.totals.cancelled.fetch_add(1, Ordering::Relaxed);
                    metrics::record_job_cancelled();
                }
            }
        }
        ids.len()
    }

    /// Spawn the periodic reclamation loop. Stops on [`JobManager::shutdown`].
    pub fn start_reaper(&self) -> JoinHandle<()> {
        let manager = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        let period = self.inner.config.cleanup_interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = signalled(&mut shutdown) => break,
                    _ = ticker.tick() => {
                        let removed = manager.cleanup_old_jobs().await;
                        if removed > 0 {
                            info!("Reclaimed {} finished jobs", removed);
                        }
                    }
                }
            }
            debug!("Job reaper stopped");
        })
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
    }

    /// A receiver that flips to `true` on shutdown.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }
}
