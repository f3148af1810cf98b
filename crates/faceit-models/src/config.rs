//! Analysis configuration.
//!
//! A config is captured once at submission and never mutated afterwards. The
//! client sends it as a JSON settings object with camelCase keys.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Which channels of the detector output are summarized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    /// Emotion probabilities only
    Emotions,
    /// Facial action units only
    Aus,
    /// Emotions and action units
    #[default]
    Combined,
    /// Landmarks only (no emotion or AU summary)
    Landmarks,
}

impl AnalysisType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::Emotions => "emotions",
            AnalysisType::Aus => "aus",
            AnalysisType::Combined => "combined",
            AnalysisType::Landmarks => "landmarks",
        }
    }

    /// Whether emotion statistics belong in the summary.
    pub fn includes_emotions(&self) -> bool {
        matches!(self, AnalysisType::Emotions | AnalysisType::Combined)
    }

    /// Whether action-unit statistics belong in the summary.
    pub fn includes_action_units(&self) -> bool {
        matches!(self, AnalysisType::Aus | AnalysisType::Combined)
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AnalysisType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "emotions" => Ok(AnalysisType::Emotions),
            "aus" | "action_units" | "action-units" => Ok(AnalysisType::Aus),
            "combined" => Ok(AnalysisType::Combined),
            "landmarks" => Ok(AnalysisType::Landmarks),
            _ => Err(ConfigError::UnknownAnalysisType(s.to_string())),
        }
    }
}

/// How the client intends to render the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum VisualizationStyle {
    #[default]
    Timeline,
    Heatmap,
    Distribution,
}

impl VisualizationStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisualizationStyle::Timeline => "timeline",
            VisualizationStyle::Heatmap => "heatmap",
            VisualizationStyle::Distribution => "distribution",
        }
    }
}

impl fmt::Display for VisualizationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VisualizationStyle {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "timeline" => Ok(VisualizationStyle::Timeline),
            "heatmap" => Ok(VisualizationStyle::Heatmap),
            "distribution" => Ok(VisualizationStyle::Distribution),
            _ => Err(ConfigError::UnknownVisualization(s.to_string())),
        }
    }
}

/// Configuration errors. All of them reject a submission.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Unknown analysis type: {0}")]
    UnknownAnalysisType(String),

    #[error("Unknown visualization style: {0}")]
    UnknownVisualization(String),

    #[error("frameSkip must be at least 1, got {0}")]
    InvalidFrameSkip(i64),

    #[error("detectionThreshold must be in (0, 1], got {0}")]
    InvalidThreshold(f64),

    #[error("batchSize must be at least 1, got {0}")]
    InvalidBatchSize(i64),

    #[error("Invalid settings JSON: {0}")]
    InvalidJson(String),
}

/// Parameters for one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisConfig {
    /// Analyze every Nth frame
    pub frame_skip: u32,
    pub analysis_type: AnalysisType,
    pub visualization_style: VisualizationStyle,
    /// Minimum face confidence
    pub detection_threshold: f64,
    pub batch_size: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            frame_skip: 30,
            analysis_type: AnalysisType::default(),
            visualization_style: VisualizationStyle::default(),
            detection_threshold: 0.5,
            batch_size: 1,
        }
    }
}

/// Client settings object as sent by the frontend.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsPayload {
    frame_skip: Option<i64>,
    analysis_type: Option<String>,
    visualization_style: Option<String>,
    detection_threshold: Option<f64>,
    batch_size: Option<i64>,
}

impl AnalysisConfig {
    pub fn with_frame_skip(mut self, frame_skip: u32) -> Self {
        self.frame_skip = frame_skip;
        self
    }

    pub fn with_analysis_type(mut self, analysis_type: AnalysisType) -> Self {
        self.analysis_type = analysis_type;
        self
    }

    pub fn with_visualization_style(mut self, style: VisualizationStyle) -> Self {
        self.visualization_style = style;
        self
    }

    pub fn with_detection_threshold(mut self, threshold: f64) -> Self {
        self.detection_threshold = threshold;
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Parse the client settings JSON. Missing keys take defaults; an empty
    /// string is treated as "no settings".
    pub fn from_settings_json(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        let payload: SettingsPayload =
            serde_json::from_str(raw).map_err(|e| ConfigError::InvalidJson(e.to_string()))?;
        let defaults = Self::default();

        let frame_skip = match payload.frame_skip {
            Some(n) if n < 1 || n > u32::MAX as i64 => return Err(ConfigError::InvalidFrameSkip(n)),
            Some(n) => n as u32,
            None => defaults.frame_skip,
        };
        let batch_size = match payload.batch_size {
            Some(n) if n < 1 || n > u32::MAX as i64 => return Err(ConfigError::InvalidBatchSize(n)),
            Some(n) => n as u32,
            None => defaults.batch_size,
        };
        let analysis_type = payload
            .analysis_type
            .as_deref()
            .map(str::parse::<AnalysisType>)
            .transpose()?
            .unwrap_or(defaults.analysis_type);
        let visualization_style = payload
            .visualization_style
            .as_deref()
            .map(str::parse::<VisualizationStyle>)
            .transpose()?
            .unwrap_or(defaults.visualization_style);

        let config = Self {
            frame_skip,
            analysis_type,
            visualization_style,
            detection_threshold: payload
                .detection_threshold
                .unwrap_or(defaults.detection_threshold),
            batch_size,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_skip == 0 {
            return Err(ConfigError::InvalidFrameSkip(0));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(0));
        }
        if !(self.detection_threshold > 0.0 && self.detection_threshold <= 1.0) {
            return Err(ConfigError::InvalidThreshold(self.detection_threshold));
        }
        Ok(())
    }

    /// Canonical string of every parameter that can change the analysis
    /// response. Used as the config half of a cache fingerprint.
    pub fn cache_signature(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.frame_skip, self.analysis_type, self.visualization_style, self.detection_threshold
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AnalysisConfig::default();
        assert_eq!(config.frame_skip, 30);
        assert_eq!(config.analysis_type, AnalysisType::Combined);
        assert_eq!(config.visualization_style, VisualizationStyle::Timeline);
        assert_eq!(config.detection_threshold, 0.5);
        assert_eq!(config.batch_size, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_settings_json_camel_case() {
        let config = AnalysisConfig::from_settings_json(
            r#"{"frameSkip": 10, "analysisType": "emotions", "visualizationStyle": "heatmap", "detectionThreshold": 0.7}"#,
        )
        .unwrap();

        assert_eq!(config.frame_skip, 10);
        assert_eq!(config.analysis_type, AnalysisType::Emotions);
        assert_eq!(config.visualization_style, VisualizationStyle::Heatmap);
        assert_eq!(config.detection_threshold, 0.7);
        assert_eq!(config.batch_size, 1);
    }

    #[test]
    fn test_settings_json_empty_is_default() {
        assert_eq!(
            AnalysisConfig::from_settings_json("  ").unwrap(),
            AnalysisConfig::default()
        );
        assert_eq!(
            AnalysisConfig::from_settings_json("{}").unwrap(),
            AnalysisConfig::default()
        );
    }

    #[test]
    fn test_settings_json_rejects_bad_values() {
        assert_eq!(
            AnalysisConfig::from_settings_json(r#"{"frameSkip": 0}"#),
            Err(ConfigError::InvalidFrameSkip(0))
        );
        assert_eq!(
            AnalysisConfig::from_settings_json(r#"{"detectionThreshold": 1.5}"#),
            Err(ConfigError::InvalidThreshold(1.5))
        );
        assert!(matches!(
            AnalysisConfig::from_settings_json(r#"{"analysisType": "poses"}"#),
            Err(ConfigError::UnknownAnalysisType(_))
        ));
        assert!(matches!(
            AnalysisConfig::from_settings_json("{not json"),
            Err(ConfigError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_analysis_type_channels() {
        assert!(AnalysisType::Combined.includes_emotions());
        assert!(AnalysisType::Combined.includes_action_units());
        assert!(!AnalysisType::Emotions.includes_action_units());
        assert!(!AnalysisType::Landmarks.includes_emotions());
        assert_eq!("action-units".parse::<AnalysisType>().unwrap(), AnalysisType::Aus);
    }

    #[test]
    fn test_cache_signature_ignores_batch_size() {
        let a = AnalysisConfig::default();
        let b = AnalysisConfig::default().with_batch_size(8);
        let c = AnalysisConfig::default().with_frame_skip(15);
        assert_eq!(a.cache_signature(), b.cache_signature());
        assert_ne!(a.cache_signature(), c.cache_signature());
    }
}
