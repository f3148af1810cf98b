//! Detector seam.
//!
//! The detector itself (models, landmark and AU extraction) lives outside
//! this workspace. It is called synchronously and may hold the CPU or GPU for
//! minutes, so callers go through [`crate::DetectionAdapter`].

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use faceit_models::{AnalysisConfig, MediaKind};
use tracing::debug;

use crate::error::{MediaError, MediaResult};
use crate::table::FrameTable;

/// Parameters handed to the detector for one file.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectRequest {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub skip_frames: u32,
    pub threshold: f64,
    pub batch_size: u32,
}

impl DetectRequest {
    pub fn new(path: impl AsRef<Path>, kind: MediaKind, config: &AnalysisConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            kind,
            skip_frames: config.frame_skip,
            threshold: config.detection_threshold,
            batch_size: config.batch_size,
        }
    }
}

/// A blocking facial-expression detector.
///
/// Implementations return an empty table or [`MediaError::NoFacesDetected`]
/// when nothing was found; any other error is reported to the job verbatim.
pub trait FrameDetector: Send + Sync {
    fn detect(&self, request: &DetectRequest) -> MediaResult<FrameTable>;

    /// Reported in result metadata.
    fn version(&self) -> String {
        "unknown".to_string()
    }
}

/// Runs a detector executable that prints a JSON frame table on stdout.
///
/// Invoked as `<program> [args..] --input <path> --skip-frames <n>
/// --threshold <t> --batch-size <b> [--image]`. A non-zero exit status is a
/// detection failure carrying the process stderr.
#[derive(Debug, Clone)]
pub struct ExternalDetector {
    program: PathBuf,
    args: Vec<String>,
    version: String,
}

impl ExternalDetector {
    /// Resolve `program` on PATH.
    pub fn new(program: impl AsRef<str>) -> MediaResult<Self> {
        let program = program.as_ref();
        let resolved = which::which(program)
            .map_err(|_| MediaError::DetectorNotFound(program.to_string()))?;

        Ok(Self {
            program: resolved,
            args: Vec::new(),
            version: "external".to_string(),
        })
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    fn build_args(&self, request: &DetectRequest) -> Vec<String> {
        let mut args = self.args.clone();
        args.push("--input".to_string());
        args.push(request.path.to_string_lossy().to_string());
        args.push("--skip-frames".to_string());
        args.push(request.skip_frames.to_string());
        args.push("--threshold".to_string());
        args.push(request.threshold.to_string());
        args.push("--batch-size".to_string());
        args.push(request.batch_size.to_string());
        if request.kind == MediaKind::Image {
            args.push("--image".to_string());
        }
        args
    }
}

impl FrameDetector for ExternalDetector {
    fn detect(&self, request: &DetectRequest) -> MediaResult<FrameTable> {
        if !request.path.exists() {
            return Err(MediaError::FileNotFound(request.path.clone()));
        }

        let args = self.build_args(request);
        debug!("Running detector: {} {}", self.program.display(), args.join(" "));

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("Detector exited with status {:?}", output.status.code())
            } else {
                stderr
            };
            return Err(MediaError::detection_failed(message));
        }

        let table: FrameTable = serde_json::from_slice(&output.stdout)?;
        table.validated()
    }

    fn version(&self) -> String {
        self.version.clone()
    }
}
