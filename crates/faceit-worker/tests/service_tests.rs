//! Submission validation, sessions and lookups.

mod common;

use std::time::Duration;

use common::*;
use faceit_models::{AnalysisConfig, AnalysisType, JobId, JobStatus, SessionId};
use faceit_worker::{SessionStatus, Upload, WorkerError};

const LONG: Duration = Duration::from_secs(60);

#[tokio::test]
async fn test_session_runs_one_job_at_a_time() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Gate::new();
    let detector = FakeDetector::gated(sample_table(), gate.clone());
    let service = service(&worker_config(3, LONG), detector, cache(10), dir.path());

    let first = service
        .submit(video(b"session one"), AnalysisConfig::default(), None)
        .await
        .unwrap();
    let session_id = service.job(&first.job_id).await.unwrap().session_id;
    assert_eq!(
        service.sessions().get(&session_id).await.unwrap().status,
        SessionStatus::Processing
    );

    let err = service
        .submit(video(b"session two"), AnalysisConfig::default(), Some(session_id.clone()))
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert!(matches!(err, WorkerError::SessionBusy { ref job_id, .. } if *job_id == first.job_id));

    gate.open();
    wait_for_status(&service, &first.job_id, JobStatus::Completed).await;

    let mut released = false;
    for _ in 0..200 {
        if service.sessions().get(&session_id).await.unwrap().status == SessionStatus::Ready {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(released, "session was not released");

    let second = service
        .submit(video(b"session two"), AnalysisConfig::default(), Some(session_id.clone()))
        .await
        .unwrap();
    wait_for_status(&service, &second.job_id, JobStatus::Completed).await;
    assert_eq!(service.job(&second.job_id).await.unwrap().session_id, session_id);
}

#[tokio::test]
async fn test_unknown_session_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(
        &worker_config(1, LONG),
        FakeDetector::returning(sample_table()),
        cache(10),
        dir.path(),
    );

    let err = service
        .submit(
            video(b"x"),
            AnalysisConfig::default(),
            Some(SessionId::from_string("does-not-exist")),
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(service.stats().await.total_jobs, 0);
}

#[tokio::test]
async fn test_invalid_submissions_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(
        &worker_config(1, LONG),
        FakeDetector::returning(sample_table()),
        cache(10),
        dir.path(),
    );

    let empty = service
        .submit(video(b""), AnalysisConfig::default(), None)
        .await
        .unwrap_err();
    assert!(empty.is_validation());

    let document = Upload::new(b"%PDF".to_vec(), "notes.pdf", Some("application/pdf".to_string()));
    assert!(service
        .submit(document, AnalysisConfig::default(), None)
        .await
        .unwrap_err()
        .is_validation());

    let zero_skip = AnalysisConfig::default().with_frame_skip(0);
    assert!(service
        .submit(video(b"x"), zero_skip, None)
        .await
        .unwrap_err()
        .is_validation());

    let bad_threshold = AnalysisConfig::default().with_detection_threshold(1.5);
    assert!(service
        .submit(video(b"x"), bad_threshold, None)
        .await
        .unwrap_err()
        .is_validation());

    assert!(service
        .submit_with_settings(video(b"x"), "{not json", None)
        .await
        .unwrap_err()
        .is_validation());
    assert!(service
        .submit_with_settings(video(b"x"), r#"{"analysisType": "poses"}"#, None)
        .await
        .unwrap_err()
        .is_validation());

    assert_eq!(service.stats().await.total_jobs, 0);
}

#[tokio::test]
async fn test_settings_json_drives_analysis() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(
        &worker_config(1, LONG),
        FakeDetector::returning(sample_table()),
        cache(10),
        dir.path(),
    );

    let submitted = service
        .submit_with_settings(
            video(b"emotions only"),
            r#"{"frameSkip": 10, "analysisType": "emotions"}"#,
            None,
        )
        .await
        .unwrap();
    let job = wait_for_status(&service, &submitted.job_id, JobStatus::Completed).await;
    assert_eq!(job.config.frame_skip, 10);
    assert_eq!(job.config.analysis_type, AnalysisType::Emotions);

    let summary = service.result(&submitted.job_id).await.unwrap().data.summary;
    assert!(summary.emotions.is_some());
    assert!(summary.action_units.is_none());
    assert!(!summary.emotional_key_moments.is_empty());
}

#[tokio::test]
async fn test_unknown_job_lookups() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(
        &worker_config(1, LONG),
        FakeDetector::returning(sample_table()),
        cache(10),
        dir.path(),
    );
    let missing = JobId::from_string("missing");

    assert!(matches!(
        service.status(&missing).await.unwrap_err(),
        WorkerError::JobNotFound(_)
    ));
    assert!(service.result(&missing).await.unwrap_err().is_validation());
    assert!(!service.cancel(&missing).await);
}

#[tokio::test]
async fn test_background_loops_stop_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let config = faceit_worker::WorkerConfig {
        cleanup_interval: Duration::from_millis(20),
        cache_sweep_interval: Duration::from_millis(20),
        job_retention: Duration::ZERO,
        ..worker_config(1, LONG)
    };
    let service = service(
        &config,
        FakeDetector::returning(sample_table()),
        cache(10),
        dir.path(),
    );

    let submitted = service
        .submit(video(b"reaped"), AnalysisConfig::default(), None)
        .await
        .unwrap();
    wait_for_status(&service, &submitted.job_id, JobStatus::Completed).await;

    let handles = service.start();
    let mut reclaimed = false;
    for _ in 0..200 {
        if service.job(&submitted.job_id).await.is_err() {
            reclaimed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(reclaimed, "finished job was not reclaimed");

    service.shutdown();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("background loop did not stop")
            .unwrap();
    }
}
