//! Job-oriented API consumed by a transport layer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use faceit_cache::ResultCache;
use faceit_models::{
    estimate_minutes, AnalysisConfig, AnalysisResponse, CacheStatus, JobId, JobSnapshot, JobStatus,
    ProgressEvent, SessionId, StatusResponse, SubmitResponse, UploadPolicy,
};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::job::Upload;
use crate::manager::{signalled, JobManager, ManagerConfig, ManagerStats};
use crate::pipeline::{AnalysisPipeline, JobRunner};
use crate::session::SessionManager;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Submission, status, results, cancellation and cache administration.
pub struct AnalysisService {
    manager: JobManager,
    sessions: Arc<SessionManager>,
    cache: Arc<ResultCache>,
    upload_policy: UploadPolicy,
    session_max_age: Duration,
    cleanup_interval: Duration,
    cache_sweep_interval: Duration,
}

impl AnalysisService {
    pub fn new(config: &WorkerConfig, runner: Arc<dyn JobRunner>, cache: Arc<ResultCache>) -> Self {
        Self {
            manager: JobManager::new(ManagerConfig::from(config), runner),
            sessions: Arc::new(SessionManager::new()),
            cache,
            upload_policy: UploadPolicy::from_megabytes(config.max_upload_mb),
            session_max_age: config.session_max_age,
            cleanup_interval: config.cleanup_interval,
            cache_sweep_interval: config.cache_sweep_interval,
        }
    }

    /// Service running `pipeline`, sharing the pipeline's cache.
    pub fn with_pipeline(config: &WorkerConfig, pipeline: AnalysisPipeline) -> Self {
        let cache = Arc::clone(pipeline.cache());
        Self::new(config, Arc::new(pipeline), cache)
    }

    pub fn manager(&self) -> &JobManager {
        &self.manager
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Validate and enqueue an upload.
    ///
    /// Without a session id a new session is created. A known session may
    /// only have one job in flight.
    pub async fn submit(
        &self,
        upload: Upload,
        config: AnalysisConfig,
        session_id: Option<SessionId>,
    ) -> WorkerResult<SubmitResponse> {
        self.upload_policy.validate(
            &upload.filename,
            upload.content_type.as_deref(),
            upload.bytes.len(),
        )?;
        config.validate()?;

        let session_id = match session_id {
            Some(id) => {
                if self.sessions.get(&id).await.is_none() {
                    return Err(WorkerError::SessionNotFound(id));
                }
                id
            }
            None => self.sessions.create().await,
        };

        let job_id = JobId::new();
        self.sessions.begin_job(&session_id, &job_id).await?;

        let estimated_minutes = estimate_minutes(upload.bytes.len(), config.frame_skip);
        if let Err(e) = self
            .manager
            .create_job(job_id.clone(), session_id.clone(), upload, config, estimated_minutes)
            .await
        {
            self.sessions.finish_job(&session_id, &job_id, JobStatus::Failed).await;
            return Err(e);
        }

        let manager = self.manager.clone();
        let sessions = Arc::clone(&self.sessions);
        let id = job_id.clone();
        tokio::spawn(async move {
            manager.process_job(&id).await;
            let status = manager
                .get_job(&id)
                .await
                .map(|job| job.status)
                .unwrap_or(JobStatus::Cancelled);
            sessions.finish_job(&session_id, &id, status).await;
        });

        Ok(SubmitResponse {
            job_id,
            estimated_minutes,
        })
    }

    /// Submit with settings given as the raw JSON object clients send.
    pub async fn submit_with_settings(
        &self,
        upload: Upload,
        settings: &str,
        session_id: Option<SessionId>,
    ) -> WorkerResult<SubmitResponse> {
        let config = AnalysisConfig::from_settings_json(settings)?;
        self.submit(upload, config, session_id).await
    }

    pub async fn job(&self, job_id: &JobId) -> WorkerResult<JobSnapshot> {
        self.manager
            .get_job(job_id)
            .await
            .ok_or_else(|| WorkerError::JobNotFound(job_id.clone()))
    }

    pub async fn status(&self, job_id: &JobId) -> WorkerResult<StatusResponse> {
        let job = self.job(job_id).await?;
        Ok(StatusResponse {
            status: job.status,
            progress: job.progress,
            message: job.message,
            error: job.error,
        })
    }

    /// Result of a completed job.
    pub async fn result(&self, job_id: &JobId) -> WorkerResult<AnalysisResponse> {
        let job = self.job(job_id).await?;
        match (job.status, job.result) {
            (JobStatus::Completed, Some(result)) => Ok(result),
            (status, _) => Err(WorkerError::ResultNotReady {
                job_id: job_id.clone(),
                status,
            }),
        }
    }

    pub async fn cancel(&self, job_id: &JobId) -> bool {
        self.manager.cancel_job(job_id).await
    }

    pub async fn active_jobs(&self) -> Vec<JobSnapshot> {
        self.manager.get_active_jobs().await
    }

    pub async fn queued_jobs(&self) -> Vec<JobSnapshot> {
        self.manager.get_queued_jobs().await
    }

    pub async fn stats(&self) -> ManagerStats {
        self.manager.stats().await
    }

    pub async fn cache_clear(&self) -> usize {
        let cleared = self.cache.clear().await;
        info!("Cleared {} cached results", cleared);
        cleared
    }

    pub async fn cache_status(&self) -> CacheStatus {
        self.cache.status().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.manager.subscribe()
    }

    /// Spawn the job reaper, the cache sweeper and the session sweeper.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let cache_sweeper = self.cache.spawn_sweeper(
            self.cache_sweep_interval.max(MIN_INTERVAL),
            self.manager.shutdown_signal(),
        );
        vec![
            self.manager.start_reaper(),
            cache_sweeper,
            self.spawn_session_sweeper(),
        ]
    }

    fn spawn_session_sweeper(&self) -> JoinHandle<()> {
        let manager = self.manager.clone();
        let sessions = Arc::clone(&self.sessions);
        let max_age = self.session_max_age;
        let period = self.cleanup_interval.max(MIN_INTERVAL);
        let mut shutdown = self.manager.shutdown_signal();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = signalled(&mut shutdown) => break,
                    _ = ticker.tick() => {
                        for session_id in sessions.sweep(max_age).await {
                            let purged = manager.purge_session(&session_id).await;
                            debug!(session_id = %session_id, "Purged {} jobs of expired session", purged);
                        }
                    }
                }
            }
        })
    }

    /// Stop background loops. Running jobs are not interrupted.
    pub fn shutdown(&self) {
        self.manager.shutdown();
    }
}
