//! Shared fakes for worker tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use faceit_cache::{CacheConfig, ResultCache};
use faceit_media::{
    DetectRequest, DetectionAdapter, FrameDetector, FrameTable, MediaError, MediaResult, VideoTools,
};
use faceit_models::{JobId, JobSnapshot, JobStatus};
use faceit_worker::{AnalysisPipeline, AnalysisService, ManagerStats, Upload, WorkerConfig};

/// Blocks detector threads until opened. Never blocks longer than
/// `GATE_LIMIT`, so a forgotten gate cannot hang the test runtime.
pub struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
}

const GATE_LIMIT: Duration = Duration::from_secs(10);

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            open: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cond.notify_all();
    }

    fn wait(&self) {
        let guard = self.open.lock().unwrap();
        let _ = self
            .cond
            .wait_timeout_while(guard, GATE_LIMIT, |open| !*open)
            .unwrap();
    }
}

enum Behaviour {
    Table(FrameTable),
    Fail(String),
}

pub struct FakeDetector {
    behaviour: Behaviour,
    gate: Option<Arc<Gate>>,
    calls: AtomicUsize,
}

impl FakeDetector {
    pub fn returning(table: FrameTable) -> Arc<Self> {
        Arc::new(Self {
            behaviour: Behaviour::Table(table),
            gate: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn gated(table: FrameTable, gate: Arc<Gate>) -> Arc<Self> {
        Arc::new(Self {
            behaviour: Behaviour::Table(table),
            gate: Some(gate),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            behaviour: Behaviour::Fail(message.to_string()),
            gate: None,
            calls: AtomicUsize::new(0),
        })
    }

    /// Detection calls started so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FrameDetector for FakeDetector {
    fn detect(&self, _request: &DetectRequest) -> MediaResult<FrameTable> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.wait();
        }
        match &self.behaviour {
            Behaviour::Table(table) => Ok(table.clone()),
            Behaviour::Fail(message) => Err(MediaError::detection_failed(message.clone())),
        }
    }

    fn version(&self) -> String {
        "fake-1.0".to_string()
    }
}

/// [`VideoTools`] that never shells out.
#[derive(Default)]
pub struct FakeTools {
    pub fail_conversion: bool,
    pub fail_snapshots: bool,
    pub conversions: AtomicUsize,
}

#[async_trait]
impl VideoTools for FakeTools {
    async fn convert(&self, input: &Path) -> MediaResult<PathBuf> {
        self.conversions.fetch_add(1, Ordering::SeqCst);
        if self.fail_conversion {
            return Err(MediaError::ConversionFailed("codec missing".to_string()));
        }
        let output = input.with_extension("mp4");
        tokio::fs::copy(input, &output).await?;
        Ok(output)
    }

    async fn frame_rate(&self, _path: &Path) -> MediaResult<f64> {
        Ok(25.0)
    }

    async fn snapshot(&self, _path: &Path, _timestamp: f64) -> MediaResult<Vec<u8>> {
        if self.fail_snapshots {
            return Err(MediaError::internal("no frame"));
        }
        Ok(vec![0xFF, 0xD8, 0xFF])
    }
}

/// Four frames with a happiness spike at row 1 and an anger spike at row 2.
pub fn sample_table() -> FrameTable {
    FrameTable::new(vec![0, 30, 60, 90])
        .with_dense_column("anger", vec![0.1, 0.1, 0.6, 0.2])
        .and_then(|t| t.with_dense_column("happiness", vec![0.2, 0.8, 0.1, 0.1]))
        .and_then(|t| t.with_dense_column("neutral", vec![0.7, 0.1, 0.3, 0.7]))
        .and_then(|t| t.with_dense_column("AU12", vec![0.1, 0.9, 0.2, 0.1]))
        .and_then(|t| t.with_dense_column("FaceScore", vec![0.99, 0.98, 0.97, 0.99]))
        .unwrap()
}

pub fn worker_config(max_workers: usize, job_timeout: Duration) -> WorkerConfig {
    WorkerConfig {
        max_workers,
        job_timeout,
        ..Default::default()
    }
}

pub fn cache(max_entries: usize) -> Arc<ResultCache> {
    Arc::new(ResultCache::new(CacheConfig {
        max_entries,
        ..Default::default()
    }))
}

pub fn pipeline(
    detector: Arc<FakeDetector>,
    tools: Arc<FakeTools>,
    cache: Arc<ResultCache>,
    work_dir: &Path,
) -> AnalysisPipeline {
    AnalysisPipeline::new(DetectionAdapter::new(detector), tools, cache, work_dir)
}

pub fn service(
    config: &WorkerConfig,
    detector: Arc<FakeDetector>,
    cache: Arc<ResultCache>,
    work_dir: &Path,
) -> AnalysisService {
    let tools = Arc::new(FakeTools::default());
    AnalysisService::with_pipeline(config, pipeline(detector, tools, cache, work_dir))
}

pub fn video(bytes: &[u8]) -> Upload {
    Upload::new(bytes.to_vec(), "clip.mp4", Some("video/mp4".to_string()))
}

const POLL: Duration = Duration::from_millis(10);
const POLL_LIMIT: usize = 500;

pub async fn wait_for_status(service: &AnalysisService, job_id: &JobId, status: JobStatus) -> JobSnapshot {
    for _ in 0..POLL_LIMIT {
        let job = service.job(job_id).await.unwrap();
        if job.status == status {
            return job;
        }
        tokio::time::sleep(POLL).await;
    }
    panic!("job {} never reached {}", job_id, status);
}

pub async fn wait_for_stats(service: &AnalysisService, check: impl Fn(&ManagerStats) -> bool) -> ManagerStats {
    for _ in 0..POLL_LIMIT {
        let stats = service.stats().await;
        if check(&stats) {
            return stats;
        }
        tokio::time::sleep(POLL).await;
    }
    panic!("stats never matched: {:?}", service.stats().await);
}

pub async fn wait_for_calls(detector: &FakeDetector, calls: usize) {
    for _ in 0..POLL_LIMIT {
        if detector.calls() >= calls {
            return;
        }
        tokio::time::sleep(POLL).await;
    }
    panic!("detector reached {} calls, expected {}", detector.calls(), calls);
}
