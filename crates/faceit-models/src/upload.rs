//! Upload validation and advisory processing estimates.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "avi", "mov"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// What kind of media an upload holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Image,
}

impl MediaKind {
    /// Classify by file extension.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())?;

        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else {
            None
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum UploadError {
    #[error("Empty upload")]
    Empty,

    #[error("File too large: {size} bytes (max {max} bytes)")]
    TooLarge { size: usize, max: usize },

    #[error("Unsupported file type: {0}")]
    UnsupportedExtension(String),

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),
}

/// Limits applied to incoming uploads.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadPolicy {
    pub max_bytes: usize,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self::from_megabytes(200)
    }
}

impl UploadPolicy {
    pub fn from_megabytes(mb: usize) -> Self {
        Self {
            max_bytes: mb.saturating_mul(1024 * 1024),
        }
    }

    /// Validate an upload and classify it.
    pub fn validate(
        &self,
        filename: &str,
        content_type: Option<&str>,
        size: usize,
    ) -> Result<MediaKind, UploadError> {
        if size == 0 {
            return Err(UploadError::Empty);
        }
        if size > self.max_bytes {
            return Err(UploadError::TooLarge {
                size,
                max: self.max_bytes,
            });
        }

        let kind = MediaKind::from_filename(filename)
            .ok_or_else(|| UploadError::UnsupportedExtension(filename.to_string()))?;

        // Browsers send octet-stream for recorded blobs often enough to allow it.
        if let Some(ct) = content_type {
            let ct = ct.to_lowercase();
            let ok = ct.starts_with("video/")
                || ct.starts_with("image/")
                || ct == "application/octet-stream";
            if !ok {
                return Err(UploadError::UnsupportedContentType(ct));
            }
        }

        Ok(kind)
    }
}

/// Advisory processing time in minutes for a payload.
///
/// Assumes roughly ten seconds of 30 fps video per megabyte and 0.1 s of
/// detector time per analysed frame.
pub fn estimate_minutes(payload_len: usize, frame_skip: u32) -> f64 {
    let megabytes = payload_len as f64 / (1024.0 * 1024.0);
    let duration_secs = megabytes * 10.0;
    let frames = duration_secs * 30.0 / frame_skip.max(1) as f64;
    let minutes = frames * 0.1 / 60.0;
    (minutes.max(0.5) * 10.0).round() / 10.0
}
