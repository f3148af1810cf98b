//! The analysis pipeline run for each job.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use faceit_cache::{Fingerprint, PutOutcome, ResultCache};
use faceit_media::{
    encode_snapshot, needs_conversion, summarize, DetectionAdapter, MediaError, MediaResult,
    SummaryConfig, VideoTools,
};
use faceit_models::{AnalysisResponse, AnalysisSummary, MediaKind, ResultMetadata};

use crate::job::JobInput;
use crate::logging::JobLogger;
use crate::metrics;
use crate::progress::ProgressReporter;

/// Frame rate assumed when the container does not report one.
pub const DEFAULT_FRAME_RATE: f64 = 30.0;

/// Work executed while a job holds a worker slot.
///
/// The manager owns timeouts and cancellation; a runner only needs to return
/// the response or the reason it could not produce one. Dropping the future
/// must be safe at any await point.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, input: JobInput, progress: ProgressReporter) -> MediaResult<AnalysisResponse>;
}

/// Cache lookup, conversion, detection, summarization and caching.
pub struct AnalysisPipeline {
    detection: DetectionAdapter,
    tools: Arc<dyn VideoTools>,
    cache: Arc<ResultCache>,
    summary: SummaryConfig,
    snapshots: bool,
    work_dir: PathBuf,
}

impl AnalysisPipeline {
    pub fn new(
        detection: DetectionAdapter,
        tools: Arc<dyn VideoTools>,
        cache: Arc<ResultCache>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            detection,
            tools,
            cache,
            summary: SummaryConfig::default(),
            snapshots: true,
            work_dir: work_dir.into(),
        }
    }

    pub fn with_summary_config(mut self, summary: SummaryConfig) -> Self {
        self.summary = summary;
        self
    }

    /// Attach JPEG stills of key moments to results.
    pub fn with_snapshots(mut self, enabled: bool) -> Self {
        self.snapshots = enabled;
        self
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    async fn write_input(&self, dir: &Path, input: &JobInput) -> MediaResult<PathBuf> {
        let ext = Path::new(&input.upload.filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_else(|| "bin".to_string());
        let path = dir.join(format!("input.{}", ext));
        tokio::fs::write(&path, &input.upload.bytes).await?;
        Ok(path)
    }

    async fn attach_snapshots(&self, path: &Path, summary: &mut AnalysisSummary, logger: &JobLogger) {
        for moment in summary.emotional_key_moments.iter_mut() {
            match self.tools.snapshot(path, moment.timestamp).await {
                Ok(jpeg) => moment.face_frame = Some(encode_snapshot(&jpeg)),
                Err(e) => logger.log_warning(&format!(
                    "Snapshot at {:.2}s unavailable: {}",
                    moment.timestamp, e
                )),
            }
        }
    }
}

#[async_trait]
impl JobRunner for AnalysisPipeline {
    async fn run(&self, input: JobInput, progress: ProgressReporter) -> MediaResult<AnalysisResponse> {
        let logger = JobLogger::new(&input.job_id, "analysis");
        let fingerprint = Fingerprint::make_key(&input.upload.bytes, &input.config);

        if let Some(cached) = self.cache.get(&fingerprint).await {
            metrics::record_cache_hit();
            logger.log_progress(0.95, &format!("Cache hit for {}", fingerprint.short()));
            progress.report(0.95, "Loaded cached analysis");
            return Ok(cached);
        }
        metrics::record_cache_miss();

        progress.report(0.15, "Preparing upload");
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let work_dir = tempfile::Builder::new()
            .prefix("faceit-")
            .tempdir_in(&self.work_dir)?;
        let original = self.write_input(work_dir.path(), &input).await?;

        let mut path = original.clone();
        if input.kind == MediaKind::Video
            && needs_conversion(&input.upload.filename, input.upload.content_type.as_deref())
        {
            progress.report(0.2, "Converting video format");
            match self.tools.convert(&original).await {
                Ok(converted) => path = converted,
                Err(e) => logger.log_warning(&format!("Conversion failed, using original: {}", e)),
            }
        }

        let fps = match input.kind {
            MediaKind::Video => match self.tools.frame_rate(&path).await {
                Ok(fps) => fps,
                Err(e) => {
                    debug!(job_id = %input.job_id, "Frame rate unavailable ({}), assuming {}", e, DEFAULT_FRAME_RATE);
                    DEFAULT_FRAME_RATE
                }
            },
            MediaKind::Image => DEFAULT_FRAME_RATE,
        };

        progress.report(0.3, "Detecting facial expressions");
        logger.log_progress(0.3, "Running detector");
        let table = self.detection.run_detection(&path, input.kind, &input.config).await?;

        progress.report(0.8, format!("Summarizing {} frames", table.len()));
        let config = input.config.clone();
        let settings = self.summary.clone();
        let mut summary = tokio::task::spawn_blocking(move || summarize(&table, &config, &settings, fps))
            .await
            .map_err(|e| MediaError::internal(format!("Summary task join error: {}", e)))?;

        if self.snapshots && input.kind == MediaKind::Video && !summary.emotional_key_moments.is_empty() {
            progress.report(0.9, "Extracting key moment frames");
            self.attach_snapshots(&path, &mut summary, &logger).await;
        }

        let response = AnalysisResponse::success(
            summary,
            input.config.visualization_style,
            ResultMetadata {
                filename: input.upload.filename.clone(),
                processed_at: Utc::now(),
                detector_version: self.detection.detector_version(),
                cache_key_prefix: fingerprint.short().to_string(),
            },
        );

        progress.report(0.95, "Caching result");
        if self.cache.put(fingerprint, response.clone()).await == PutOutcome::Rejected {
            metrics::record_cache_rejection();
            warn!(job_id = %input.job_id, "Result cache full, result not cached");
        }

        Ok(response)
    }
}
