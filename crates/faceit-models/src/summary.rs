//! Summary of one detector run.
//!
//! Maps are `BTreeMap` so the serialized form is stable, which keeps cached
//! responses byte-identical across runs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::AnalysisType;

/// Aggregated analysis of a frame table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisSummary {
    /// Rows in the frame table
    pub total_frames: usize,
    /// Rows whose face score cleared the threshold
    pub faces_detected: usize,
    pub processing_config: ProcessingConfigEcho,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotions: Option<EmotionAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_units: Option<ActionUnitAnalysis>,
    #[serde(default)]
    pub emotional_key_moments: Vec<KeyMoment>,
}

/// Parameters the summary was computed with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProcessingConfigEcho {
    pub frame_skip: u32,
    pub analysis_type: AnalysisType,
    pub detection_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EmotionAnalysis {
    pub statistics: BTreeMap<String, EmotionStats>,
    /// Frames per dominant emotion
    pub dominant_emotions: BTreeMap<String, usize>,
    pub timeline: Timeline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EmotionStats {
    pub mean: f64,
    /// Sample standard deviation, 0 for fewer than two values
    pub std: f64,
    pub min: f64,
    pub max: f64,
    /// Row positions of local maxima above the peak threshold
    pub peaks: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ActionUnitAnalysis {
    pub statistics: BTreeMap<String, ActionUnitStats>,
    pub timeline: Timeline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ActionUnitStats {
    pub mean: f64,
    /// Fraction of frames above 0.5
    pub activation_rate: f64,
    pub max_intensity: f64,
}

/// Downsampled series sharing one time axis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Timeline {
    pub timestamps: Vec<f64>,
    #[serde(flatten)]
    pub series: BTreeMap<String, Vec<f64>>,
}

impl Timeline {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// A frame where a tracked emotion jumped sharply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeyMoment {
    /// Seconds into the video
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub kind: String,
    pub emotion: String,
    pub increase: f64,
    pub reason: String,
    pub frame_number: u64,
    /// Base64 JPEG still of the frame
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_frame: Option<String>,
}

impl KeyMoment {
    pub const EMOTION_SPIKE: &'static str = "emotion_spike";

    pub fn emotion_spike(emotion: impl Into<String>, increase: f64, timestamp: f64, frame_number: u64) -> Self {
        let emotion = emotion.into();
        Self {
            timestamp,
            kind: Self::EMOTION_SPIKE.to_string(),
            reason: format!("Sudden increase in {} (+{:.2})", emotion, increase),
            emotion,
            increase,
            frame_number,
            face_frame: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeline_flattens_series() {
        let mut timeline = Timeline {
            timestamps: vec![0.0, 1.0],
            ..Default::default()
        };
        timeline.series.insert("happiness".to_string(), vec![0.1, 0.9]);

        let json = serde_json::to_value(&timeline).unwrap();
        assert_eq!(json["timestamps"][1], 1.0);
        assert_eq!(json["happiness"][1], 0.9);
    }

    #[test]
    fn test_key_moment_wire_names() {
        let moment = KeyMoment::emotion_spike("surprise", 0.45, 2.5, 75);
        let json = serde_json::to_value(&moment).unwrap();
        assert_eq!(json["type"], "emotion_spike");
        assert_eq!(json["frameNumber"], 75);
        assert!(json.get("faceFrame").is_none());
        assert!(moment.reason.contains("surprise"));
    }
}
