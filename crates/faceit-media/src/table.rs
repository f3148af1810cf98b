//! Per-frame detector output.

use serde::{Deserialize, Serialize};

use crate::error::{MediaError, MediaResult};

/// Emotion columns in the order used for tie-breaking.
pub const EMOTION_COLUMNS: [&str; 7] = [
    "anger",
    "disgust",
    "fear",
    "happiness",
    "sadness",
    "surprise",
    "neutral",
];

/// Emotions eligible for key moments. `neutral` only feeds statistics.
pub const TRACKED_EMOTIONS: [&str; 6] = [
    "anger",
    "disgust",
    "fear",
    "happiness",
    "sadness",
    "surprise",
];

pub const FACE_SCORE_COLUMN: &str = "FaceScore";

/// One named numeric channel. `None` marks a frame the detector skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

/// One row per analysed frame, one column per emotion / action unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameTable {
    /// Source frame index of each row
    #[serde(default)]
    frames: Vec<u64>,
    /// Seconds into the video, when the detector reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    times: Option<Vec<f64>>,
    #[serde(default)]
    columns: Vec<Column>,
}

impl FrameTable {
    pub fn new(frames: Vec<u64>) -> Self {
        Self {
            frames,
            times: None,
            columns: Vec::new(),
        }
    }

    pub fn with_times(mut self, times: Vec<f64>) -> MediaResult<Self> {
        if times.len() != self.frames.len() {
            return Err(MediaError::invalid_table(format!(
                "times has {} rows, expected {}",
                times.len(),
                self.frames.len()
            )));
        }
        self.times = Some(times);
        Ok(self)
    }

    /// Add a column. Its length must match the number of rows.
    pub fn with_column(mut self, name: impl Into<String>, values: Vec<Option<f64>>) -> MediaResult<Self> {
        let name = name.into();
        if values.len() != self.frames.len() {
            return Err(MediaError::invalid_table(format!(
                "column {} has {} rows, expected {}",
                name,
                values.len(),
                self.frames.len()
            )));
        }
        self.columns.push(Column { name, values });
        Ok(self)
    }

    /// Convenience for fully populated columns.
    pub fn with_dense_column(self, name: impl Into<String>, values: Vec<f64>) -> MediaResult<Self> {
        self.with_column(name, values.into_iter().map(Some).collect())
    }

    /// Check a table decoded from an external source. An empty `frames`
    /// list is filled with row positions.
    pub fn validated(mut self) -> MediaResult<Self> {
        if self.frames.is_empty() {
            let rows = self.columns.first().map(|c| c.values.len()).unwrap_or(0);
            self.frames = (0..rows as u64).collect();
        }
        let rows = self.frames.len();
        if let Some(times) = &self.times {
            if times.len() != rows {
                return Err(MediaError::invalid_table(format!(
                    "times has {} rows, expected {}",
                    times.len(),
                    rows
                )));
            }
        }
        if let Some(bad) = self.columns.iter().find(|c| c.values.len() != rows) {
            return Err(MediaError::invalid_table(format!(
                "column {} has {} rows, expected {}",
                bad.name,
                bad.values.len(),
                rows
            )));
        }
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Action-unit columns (`AU01`, `AU12`, `AU_04` ...) in table order.
    pub fn action_unit_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| is_action_unit(&c.name))
    }

    pub fn frame_index(&self, row: usize) -> u64 {
        self.frames.get(row).copied().unwrap_or(row as u64)
    }

    /// Seconds into the video for a row, falling back to frame index / fps.
    pub fn timestamp(&self, row: usize, fps: f64) -> f64 {
        match &self.times {
            Some(times) => times.get(row).copied().unwrap_or(0.0),
            None if fps > 0.0 => self.frame_index(row) as f64 / fps,
            None => row as f64,
        }
    }
}

fn is_action_unit(name: &str) -> bool {
    name.strip_prefix("AU")
        .map(|rest| rest.trim_start_matches('_'))
        .is_some_and(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
}
