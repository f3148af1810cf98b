//! Video helpers used around detection: container conversion, frame rate
//! lookup and still-frame extraction.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::probe_frame_rate;

/// External video tooling. Every method is best-effort for the caller:
/// a failed conversion falls back to the original file, a missing frame rate
/// to a default and a failed snapshot to no image.
#[async_trait]
pub trait VideoTools: Send + Sync {
    /// Re-encode `input` to a container the detector reads reliably.
    async fn convert(&self, input: &Path) -> MediaResult<PathBuf>;

    async fn frame_rate(&self, path: &Path) -> MediaResult<f64>;

    /// JPEG bytes of the frame at `timestamp` seconds.
    async fn snapshot(&self, path: &Path, timestamp: f64) -> MediaResult<Vec<u8>>;
}

/// Whether an upload should be converted before detection.
pub fn needs_conversion(filename: &str, content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.eq_ignore_ascii_case("video/webm"))
        || filename.to_lowercase().ends_with(".webm")
}

/// Base64 for embedding a still in a JSON response.
pub fn encode_snapshot(jpeg: &[u8]) -> String {
    STANDARD.encode(jpeg)
}

/// [`VideoTools`] backed by the ffmpeg and ffprobe binaries.
#[derive(Debug, Clone, Default)]
pub struct FfmpegTools {
    runner: FfmpegRunner,
}

impl FfmpegTools {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            runner: FfmpegRunner::new().with_timeout(timeout_secs),
        }
    }
}

#[async_trait]
impl VideoTools for FfmpegTools {
    async fn convert(&self, input: &Path) -> MediaResult<PathBuf> {
        let output = input.with_extension("mp4");
        if output == input {
            return Err(MediaError::ConversionFailed(format!(
                "{} is already mp4",
                input.display()
            )));
        }

        info!("Converting {} to mp4", input.display());
        let cmd = FfmpegCommand::new(input, &output)
            .video_codec("libx264")
            .preset("fast")
            .crf(23)
            .audio_codec("aac");

        self.runner
            .run(&cmd)
            .await
            .map_err(|e| MediaError::ConversionFailed(e.to_string()))?;

        let size = tokio::fs::metadata(&output).await.map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(MediaError::ConversionFailed(
                "FFmpeg produced an empty file".to_string(),
            ));
        }

        debug!("Converted file is {} bytes", size);
        Ok(output)
    }

    async fn frame_rate(&self, path: &Path) -> MediaResult<f64> {
        probe_frame_rate(path).await
    }

    async fn snapshot(&self, path: &Path, timestamp: f64) -> MediaResult<Vec<u8>> {
        let cmd = FfmpegCommand::to_stdout(path)
            .seek(timestamp.max(0.0))
            .single_frame()
            .jpeg_quality(5)
            .format("image2")
            .video_codec("mjpeg");

        let bytes = self.runner.run(&cmd).await?;
        if bytes.is_empty() {
            return Err(MediaError::ffmpeg_failed("No frame at timestamp", None, None));
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_conversion() {
        assert!(needs_conversion("recording.webm", None));
        assert!(needs_conversion("blob", Some("video/webm")));
        assert!(needs_conversion("CLIP.WEBM", Some("video/mp4")));
        assert!(!needs_conversion("clip.mp4", Some("video/mp4")));
    }

    #[test]
    fn test_encode_snapshot() {
        assert_eq!(encode_snapshot(&[0xff, 0xd8, 0xff]), "/9j/");
    }

    #[tokio::test]
    async fn test_convert_rejects_mp4_input() {
        let tools = FfmpegTools::new(5);
        let err = tools.convert(Path::new("/tmp/already.mp4")).await.unwrap_err();
        assert!(matches!(err, MediaError::ConversionFailed(_)));
    }
}
