//! Job lifecycle through the service API with a fake detector.

mod common;

use std::time::Duration;

use common::*;
use faceit_media::FrameTable;
use faceit_models::{AnalysisConfig, FailureKind, JobStatus, ProgressEvent};
use faceit_worker::WorkerError;
use tokio::sync::broadcast;

const LONG: Duration = Duration::from_secs(60);

fn drain(rx: &mut broadcast::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_progress_is_monotonic_until_completion() {
    let dir = tempfile::tempdir().unwrap();
    let detector = FakeDetector::returning(sample_table());
    let service = service(&worker_config(2, LONG), detector, cache(10), dir.path());
    let mut events = service.subscribe();

    let submitted = service
        .submit(video(b"monotonic"), AnalysisConfig::default(), None)
        .await
        .unwrap();
    assert!(submitted.estimated_minutes >= 0.5);

    let job = wait_for_status(&service, &submitted.job_id, JobStatus::Completed).await;
    assert_eq!(job.progress, 1.0);
    assert_eq!(job.message, "Analysis completed successfully");
    assert!(job.started_at.is_some() && job.completed_at.is_some());

    let events: Vec<_> = drain(&mut events)
        .into_iter()
        .filter(|e| e.job_id == submitted.job_id)
        .collect();
    assert_eq!(events.first().map(|e| e.status), Some(JobStatus::Queued));
    assert_eq!(events.last().map(|e| e.status), Some(JobStatus::Completed));
    for pair in events.windows(2) {
        assert!(
            pair[1].progress >= pair[0].progress,
            "progress went backwards: {} -> {}",
            pair[0].progress,
            pair[1].progress
        );
    }

    let result = service.result(&submitted.job_id).await.unwrap();
    assert_eq!(result.status, "success");
    assert_eq!(result.data.summary.total_frames, 4);
    assert_eq!(result.data.metadata.detector_version, "fake-1.0");
}

#[tokio::test]
async fn test_terminal_state_is_final() {
    let dir = tempfile::tempdir().unwrap();
    let detector = FakeDetector::returning(sample_table());
    let service = service(&worker_config(1, LONG), detector.clone(), cache(10), dir.path());

    let submitted = service
        .submit(video(b"final"), AnalysisConfig::default(), None)
        .await
        .unwrap();
    let done = wait_for_status(&service, &submitted.job_id, JobStatus::Completed).await;

    assert!(!service.cancel(&submitted.job_id).await);
    service.manager().process_job(&submitted.job_id).await;

    let after = service.job(&submitted.job_id).await.unwrap();
    assert_eq!(after.status, JobStatus::Completed);
    assert_eq!(after.completed_at, done.completed_at);
    assert_eq!(detector.calls(), 1);
}

#[tokio::test]
async fn test_identical_upload_is_served_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let detector = FakeDetector::returning(sample_table());
    let service = service(&worker_config(2, LONG), detector.clone(), cache(10), dir.path());

    let first = service
        .submit(video(b"same bytes"), AnalysisConfig::default(), None)
        .await
        .unwrap();
    wait_for_status(&service, &first.job_id, JobStatus::Completed).await;

    let second = service
        .submit(video(b"same bytes"), AnalysisConfig::default(), None)
        .await
        .unwrap();
    wait_for_status(&service, &second.job_id, JobStatus::Completed).await;

    assert_eq!(detector.calls(), 1);
    assert_eq!(
        service.result(&first.job_id).await.unwrap(),
        service.result(&second.job_id).await.unwrap()
    );

    // A different threshold is a different analysis
    let third = service
        .submit(
            video(b"same bytes"),
            AnalysisConfig::default().with_detection_threshold(0.8),
            None,
        )
        .await
        .unwrap();
    wait_for_status(&service, &third.job_id, JobStatus::Completed).await;
    assert_eq!(detector.calls(), 2);
}

#[tokio::test]
async fn test_worker_slots_are_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Gate::new();
    let detector = FakeDetector::gated(sample_table(), gate.clone());
    let service = service(&worker_config(2, LONG), detector.clone(), cache(10), dir.path());

    let mut ids = Vec::new();
    for body in [&b"one"[..], &b"two"[..], &b"three"[..]] {
        let submitted = service
            .submit(video(body), AnalysisConfig::default(), None)
            .await
            .unwrap();
        ids.push(submitted.job_id);
    }

    let stats = wait_for_stats(&service, |s| s.active_workers == 2 && s.queued_jobs == 1).await;
    assert_eq!(stats.max_workers, 2);
    wait_for_calls(&detector, 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(detector.calls(), 2);

    let queued = service.queued_jobs().await;
    assert_eq!(queued.len(), 1);
    let waiting = queued[0].job_id.clone();
    let running = service.active_jobs().await[0].job_id.clone();

    // Cancelling a running job frees its slot for the waiting one
    assert!(service.cancel(&running).await);
    wait_for_status(&service, &waiting, JobStatus::Processing).await;
    wait_for_calls(&detector, 3).await;
    assert!(service.stats().await.active_workers <= 2);

    gate.open();
    for id in &ids {
        let expected = if *id == running {
            JobStatus::Cancelled
        } else {
            JobStatus::Completed
        };
        wait_for_status(&service, id, expected).await;
    }

    let cancelled = service.job(&running).await.unwrap();
    assert_eq!(cancelled.progress, 0.0);
    assert!(cancelled.result.is_none());
}

#[tokio::test]
async fn test_cancelled_queued_job_never_runs() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Gate::new();
    let detector = FakeDetector::gated(sample_table(), gate.clone());
    let service = service(&worker_config(1, LONG), detector.clone(), cache(10), dir.path());
    let mut events = service.subscribe();

    let first = service
        .submit(video(b"first"), AnalysisConfig::default(), None)
        .await
        .unwrap();
    wait_for_status(&service, &first.job_id, JobStatus::Processing).await;

    let second = service
        .submit(video(b"second"), AnalysisConfig::default(), None)
        .await
        .unwrap();
    assert_eq!(service.job(&second.job_id).await.unwrap().status, JobStatus::Queued);

    assert!(service.cancel(&second.job_id).await);
    let status = service.status(&second.job_id).await.unwrap();
    assert_eq!(status.status, JobStatus::Cancelled);
    assert_eq!(status.progress, 0.0);

    gate.open();
    wait_for_status(&service, &first.job_id, JobStatus::Completed).await;

    let cancelled = service.job(&second.job_id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.started_at.is_none());
    assert_eq!(detector.calls(), 1);
    assert!(drain(&mut events)
        .iter()
        .filter(|e| e.job_id == second.job_id)
        .all(|e| e.status != JobStatus::Processing));
}

#[tokio::test]
async fn test_timeout_fails_job_and_frees_slot() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Gate::new();
    let detector = FakeDetector::gated(sample_table(), gate.clone());
    let service = service(
        &worker_config(1, Duration::from_millis(200)),
        detector,
        cache(10),
        dir.path(),
    );

    let submitted = service
        .submit(video(b"slow"), AnalysisConfig::default(), None)
        .await
        .unwrap();
    let job = wait_for_status(&service, &submitted.job_id, JobStatus::Failed).await;

    assert_eq!(job.failure_kind, Some(FailureKind::Timeout));
    assert!(job.error.as_deref().unwrap().contains("timed out"));
    assert_eq!(job.progress, 0.0);
    assert_eq!(service.stats().await.active_workers, 0);

    // The abandoned detector finishing later changes nothing
    gate.open();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let after = service.job(&submitted.job_id).await.unwrap();
    assert_eq!(after.status, JobStatus::Failed);
    assert!(after.result.is_none());
    assert!(service.cache_status().await.keys.is_empty());
}

#[tokio::test]
async fn test_no_faces_detected() {
    let dir = tempfile::tempdir().unwrap();
    let detector = FakeDetector::returning(FrameTable::default());
    let service = service(&worker_config(1, LONG), detector, cache(10), dir.path());

    let submitted = service
        .submit(video(b"empty room"), AnalysisConfig::default(), None)
        .await
        .unwrap();
    let job = wait_for_status(&service, &submitted.job_id, JobStatus::Failed).await;

    assert_eq!(job.failure_kind, Some(FailureKind::NoFaceDetected));
    assert!(job.message.to_lowercase().contains("no face"));

    let err = service.result(&submitted.job_id).await.unwrap_err();
    assert!(matches!(err, WorkerError::ResultNotReady { status: JobStatus::Failed, .. }));
}

#[tokio::test]
async fn test_detector_error_is_reported_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let detector = FakeDetector::failing("model weights missing");
    let service = service(&worker_config(1, LONG), detector, cache(10), dir.path());

    let submitted = service
        .submit(video(b"broken"), AnalysisConfig::default(), None)
        .await
        .unwrap();
    let job = wait_for_status(&service, &submitted.job_id, JobStatus::Failed).await;

    assert_eq!(job.failure_kind, Some(FailureKind::DetectorFailure));
    assert_eq!(job.error.as_deref(), Some("model weights missing"));
    assert_eq!(job.message, "Analysis failed: model weights missing");
}

#[tokio::test]
async fn test_full_cache_still_completes() {
    let dir = tempfile::tempdir().unwrap();
    let detector = FakeDetector::returning(sample_table());
    let service = service(&worker_config(1, LONG), detector, cache(1), dir.path());

    for body in [&b"alpha"[..], &b"beta"[..]] {
        let submitted = service
            .submit(video(body), AnalysisConfig::default(), None)
            .await
            .unwrap();
        wait_for_status(&service, &submitted.job_id, JobStatus::Completed).await;
        assert!(service.result(&submitted.job_id).await.is_ok());
    }

    let status = service.cache_status().await;
    assert_eq!(status.size, 1);
    assert_eq!(status.ttls.len(), 1);

    assert_eq!(service.cache_clear().await, 1);
    assert_eq!(service.cache_status().await.size, 0);
}
