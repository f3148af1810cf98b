//! Runs the blocking detector without stalling the async scheduler.

use std::path::Path;
use std::sync::Arc;

use faceit_models::{AnalysisConfig, MediaKind};
use tracing::debug;

use crate::detector::{DetectRequest, FrameDetector};
use crate::error::{MediaError, MediaResult};
use crate::table::FrameTable;

/// Wraps a [`FrameDetector`] and normalizes its outcome.
#[derive(Clone)]
pub struct DetectionAdapter {
    detector: Arc<dyn FrameDetector>,
}

impl DetectionAdapter {
    pub fn new(detector: Arc<dyn FrameDetector>) -> Self {
        Self { detector }
    }

    pub fn detector_version(&self) -> String {
        self.detector.version()
    }

    /// Run detection on a blocking thread.
    ///
    /// The table is checked for ragged columns before it leaves the adapter.
    /// An empty table becomes [`MediaError::NoFacesDetected`]; every other
    /// detector error, a malformed table included, becomes
    /// [`MediaError::DetectionFailed`] with the original message. Dropping the returned future abandons the call: the
    /// blocking thread runs to completion and its output is discarded.
    pub async fn run_detection(
        &self,
        path: &Path,
        kind: MediaKind,
        config: &AnalysisConfig,
    ) -> MediaResult<FrameTable> {
        let request = DetectRequest::new(path, kind, config);
        let detector = Arc::clone(&self.detector);

        debug!(path = %path.display(), skip = request.skip_frames, "Starting detection");

        let outcome = tokio::task::spawn_blocking(move || detector.detect(&request))
            .await
            .map_err(|e| MediaError::internal(format!("Detection task join error: {}", e)))?;

        match outcome.and_then(FrameTable::validated) {
            Ok(table) if table.is_empty() => Err(MediaError::NoFacesDetected),
            Ok(table) => {
                debug!(rows = table.len(), "Detection finished");
                Ok(table)
            }
            Err(MediaError::NoFacesDetected) => Err(MediaError::NoFacesDetected),
            Err(MediaError::DetectionFailed(message)) => Err(MediaError::DetectionFailed(message)),
            Err(other) => Err(MediaError::DetectionFailed(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticDetector(MediaResult<FrameTable>);

    impl FrameDetector for StaticDetector {
        fn detect(&self, _request: &DetectRequest) -> MediaResult<FrameTable> {
            match &self.0 {
                Ok(table) => Ok(table.clone()),
                Err(MediaError::NoFacesDetected) => Err(MediaError::NoFacesDetected),
                Err(e) => Err(MediaError::internal(e.to_string())),
            }
        }
    }

    fn adapter(outcome: MediaResult<FrameTable>) -> DetectionAdapter {
        DetectionAdapter::new(Arc::new(StaticDetector(outcome)))
    }

    #[tokio::test]
    async fn test_empty_table_is_no_faces() {
        let err = adapter(Ok(FrameTable::default()))
            .run_detection(Path::new("a.mp4"), MediaKind::Video, &AnalysisConfig::default())
            .await
            .unwrap_err();
        assert!(err.is_no_faces());
        assert!(err.to_string().to_lowercase().contains("no face"));
    }

    #[tokio::test]
    async fn test_other_errors_become_detection_failures() {
        let err = adapter(Err(MediaError::internal("CUDA out of memory")))
            .run_detection(Path::new("a.mp4"), MediaKind::Video, &AnalysisConfig::default())
            .await
            .unwrap_err();
        assert!(err.is_detection_failure());
        assert!(err.to_string().contains("CUDA out of memory"));
    }

    #[tokio::test]
    async fn test_ragged_table_is_detection_failure() {
        let table: FrameTable = serde_json::from_str(
            r#"{"frames":[0,30,60],"columns":[{"name":"happiness","values":[0.1,0.9]}]}"#,
        )
        .unwrap();
        let err = adapter(Ok(table))
            .run_detection(Path::new("a.mp4"), MediaKind::Video, &AnalysisConfig::default())
            .await
            .unwrap_err();
        assert!(err.is_detection_failure());
        assert!(err.to_string().contains("happiness"));
    }

    #[tokio::test]
    async fn test_rows_pass_through() {
        let table = FrameTable::new(vec![0, 30])
            .with_dense_column("happiness", vec![0.2, 0.8])
            .unwrap();
        let out = adapter(Ok(table.clone()))
            .run_detection(Path::new("a.mp4"), MediaKind::Video, &AnalysisConfig::default())
            .await
            .unwrap();
        assert_eq!(out, table);
    }
}
