//! Facial-expression analysis worker binary.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use faceit_cache::{CacheConfig, RedisStore, ResultCache};
use faceit_media::{DetectionAdapter, ExternalDetector, FfmpegTools};
use faceit_queue::{JobQueue, ProgressChannel};
use faceit_worker::logging::init_tracing;
use faceit_worker::{metrics, AnalysisPipeline, JobExecutor, WorkerConfig};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for rediss://)
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        eprintln!("rustls crypto provider already installed");
    }

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting faceit-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(addr) = &config.metrics_addr {
        if let Err(e) = metrics::init_exporter(addr) {
            error!("{}", e);
            std::process::exit(1);
        }
    }

    let Some((program, args)) = config.detector_command() else {
        error!("FACEIT_DETECTOR_CMD is not set");
        std::process::exit(1);
    };
    let detector = match ExternalDetector::new(&program) {
        Ok(detector) => detector
            .with_args(args)
            .with_version(config.detector_version.clone()),
        Err(e) => {
            error!("Failed to locate detector: {}", e);
            std::process::exit(1);
        }
    };

    let queue = match JobQueue::from_env() {
        Ok(queue) => queue,
        Err(e) => {
            error!("Failed to create job queue: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = queue.ping().await {
        error!("Redis is unreachable: {}", e);
        std::process::exit(1);
    }

    let redis_url = queue.config().redis_url.clone();
    let progress = match ProgressChannel::new(&redis_url, queue.config().result_expiry) {
        Ok(progress) => progress,
        Err(e) => {
            error!("Failed to create progress channel: {}", e);
            std::process::exit(1);
        }
    };

    let mut cache = ResultCache::new(CacheConfig {
        ttl: config.cache_ttl,
        max_entries: config.cache_max_entries,
        ..Default::default()
    });
    match RedisStore::new(&redis_url) {
        Ok(store) => cache = cache.with_store(Arc::new(store)).await,
        Err(e) => warn!("Result cache is memory-only: {}", e),
    }
    let cache = Arc::new(cache);

    let pipeline = AnalysisPipeline::new(
        DetectionAdapter::new(Arc::new(detector)),
        Arc::new(FfmpegTools::new(config.ffmpeg_timeout.as_secs())),
        Arc::clone(&cache),
        &config.work_dir,
    )
    .with_summary_config(config.summary.clone())
    .with_snapshots(config.key_moment_snapshots);

    let executor = Arc::new(JobExecutor::new(&config, queue, progress, Arc::new(pipeline)));
    let sweeper = cache.spawn_sweeper(
        config.cache_sweep_interval.max(Duration::from_millis(1)),
        executor.manager().shutdown_signal(),
    );

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    let _ = sweeper.await;
    info!("Worker shutdown complete");
}
