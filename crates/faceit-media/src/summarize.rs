//! Aggregation of a frame table into an [`AnalysisSummary`].
//!
//! Everything here is pure and synchronous. Callers run it on a blocking
//! thread because large tables make it CPU-bound.

use std::collections::BTreeMap;

use faceit_models::{
    ActionUnitAnalysis, ActionUnitStats, AnalysisConfig, AnalysisSummary, EmotionAnalysis,
    EmotionStats, KeyMoment, ProcessingConfigEcho, Timeline,
};

use crate::table::{FrameTable, EMOTION_COLUMNS, FACE_SCORE_COLUMN, TRACKED_EMOTIONS};

/// Thresholds and caps used while summarizing.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryConfig {
    /// Minimum frame-to-frame rise that marks a key moment
    pub key_moment_delta: f64,
    /// Minimum value for an emotion peak
    pub peak_threshold: f64,
    pub max_peaks: usize,
    pub max_key_moments: usize,
    pub timeline_max_points: usize,
    /// Value above which an action unit counts as active
    pub activation_threshold: f64,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            key_moment_delta: 0.3,
            peak_threshold: 0.7,
            max_peaks: 10,
            max_key_moments: 10,
            timeline_max_points: 500,
            activation_threshold: 0.5,
        }
    }
}

/// Summarize a detector run.
///
/// `fps` converts frame indices to seconds when the table carries no times.
pub fn summarize(
    table: &FrameTable,
    config: &AnalysisConfig,
    settings: &SummaryConfig,
    fps: f64,
) -> AnalysisSummary {
    let emotions = if config.analysis_type.includes_emotions() {
        emotion_analysis(table, settings, fps)
    } else {
        None
    };
    let action_units = if config.analysis_type.includes_action_units() {
        action_unit_analysis(table, settings, fps)
    } else {
        None
    };
    let emotional_key_moments = if config.analysis_type.includes_emotions() {
        key_moments(table, settings, fps)
    } else {
        Vec::new()
    };

    AnalysisSummary {
        total_frames: table.len(),
        faces_detected: faces_detected(table, config.detection_threshold),
        processing_config: ProcessingConfigEcho {
            frame_skip: config.frame_skip,
            analysis_type: config.analysis_type,
            detection_threshold: config.detection_threshold,
        },
        emotions,
        action_units,
        emotional_key_moments,
    }
}

/// Rows whose face score clears the threshold; every row when the detector
/// reports no score.
fn faces_detected(table: &FrameTable, threshold: f64) -> usize {
    match table.column(FACE_SCORE_COLUMN) {
        Some(scores) => scores
            .iter()
            .filter(|v| v.is_some_and(|s| s > threshold))
            .count(),
        None => table.len(),
    }
}

/// Present, finite values with their row positions.
fn present(values: &[Option<f64>]) -> Vec<(usize, f64)> {
    values
        .iter()
        .enumerate()
        .filter_map(|(row, v)| v.filter(|x| x.is_finite()).map(|x| (row, x)))
        .collect()
}

fn mean(values: &[(usize, f64)]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|(_, v)| v).sum::<f64>() / values.len() as f64
}

/// Sample standard deviation.
fn std_dev(values: &[(usize, f64)]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|(_, v)| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Rows of local maxima above `threshold`, strict on both sides.
fn find_peaks(values: &[(usize, f64)], threshold: f64, max: usize) -> Vec<usize> {
    values
        .windows(3)
        .filter(|w| {
            let (prev, cur, next) = (w[0].1, w[1].1, w[2].1);
            cur > threshold && cur > prev && cur > next
        })
        .map(|w| w[1].0)
        .take(max)
        .collect()
}

fn emotion_analysis(table: &FrameTable, settings: &SummaryConfig, fps: f64) -> Option<EmotionAnalysis> {
    let columns: Vec<(&str, &[Option<f64>])> = EMOTION_COLUMNS
        .iter()
        .filter_map(|name| table.column(name).map(|values| (*name, values)))
        .collect();

    if columns.is_empty() {
        return None;
    }

    let mut statistics = BTreeMap::new();
    for (name, values) in &columns {
        let values = present(values);
        if values.is_empty() {
            continue;
        }
        let min = values.iter().map(|(_, v)| *v).fold(f64::INFINITY, f64::min);
        let max = values.iter().map(|(_, v)| *v).fold(f64::NEG_INFINITY, f64::max);
        statistics.insert(
            name.to_string(),
            EmotionStats {
                mean: mean(&values),
                std: std_dev(&values),
                min,
                max,
                peaks: find_peaks(&values, settings.peak_threshold, settings.max_peaks),
            },
        );
    }

    Some(EmotionAnalysis {
        statistics,
        dominant_emotions: dominant_histogram(table.len(), &columns),
        timeline: timeline(table, &columns, settings.timeline_max_points, fps),
    })
}

/// Count of frames per dominant emotion. Missing values count as 0 and ties
/// go to the earlier column.
fn dominant_histogram(rows: usize, columns: &[(&str, &[Option<f64>])]) -> BTreeMap<String, usize> {
    let mut histogram = BTreeMap::new();
    for row in 0..rows {
        let mut best: Option<(&str, f64)> = None;
        for (name, values) in columns {
            let value = values[row].filter(|v| v.is_finite()).unwrap_or(0.0);
            if best.map_or(true, |(_, b)| value > b) {
                best = Some((*name, value));
            }
        }
        if let Some((name, _)) = best {
            *histogram.entry(name.to_string()).or_insert(0) += 1;
        }
    }
    histogram
}

fn action_unit_analysis(table: &FrameTable, settings: &SummaryConfig, fps: f64) -> Option<ActionUnitAnalysis> {
    let columns: Vec<(&str, &[Option<f64>])> = table
        .action_unit_columns()
        .map(|c| (c.name.as_str(), c.values.as_slice()))
        .collect();

    if columns.is_empty() {
        return None;
    }

    let mut statistics = BTreeMap::new();
    for (name, values) in &columns {
        let values = present(values);
        if values.is_empty() {
            continue;
        }
        let active = values
            .iter()
            .filter(|(_, v)| *v > settings.activation_threshold)
            .count();
        statistics.insert(
            name.to_string(),
            ActionUnitStats {
                mean: mean(&values),
                activation_rate: active as f64 / values.len() as f64,
                max_intensity: values.iter().map(|(_, v)| *v).fold(f64::NEG_INFINITY, f64::max),
            },
        );
    }

    Some(ActionUnitAnalysis {
        statistics,
        timeline: timeline(table, &columns, settings.timeline_max_points, fps),
    })
}

/// Rows kept by uniform stride so at most `max_points` remain and the whole
/// video stays covered.
fn sample_rows(rows: usize, max_points: usize) -> Vec<usize> {
    if rows == 0 || max_points == 0 {
        return Vec::new();
    }
    let stride = rows.div_ceil(max_points).max(1);
    (0..rows).step_by(stride).collect()
}

fn timeline(
    table: &FrameTable,
    columns: &[(&str, &[Option<f64>])],
    max_points: usize,
    fps: f64,
) -> Timeline {
    let rows = sample_rows(table.len(), max_points);
    let timestamps = rows.iter().map(|&r| table.timestamp(r, fps)).collect();
    let series = columns
        .iter()
        .map(|(name, values)| {
            let sampled = rows
                .iter()
                .map(|&r| values[r].filter(|v| v.is_finite()).unwrap_or(0.0))
                .collect();
            (name.to_string(), sampled)
        })
        .collect();

    Timeline { timestamps, series }
}

/// Frames where a tracked emotion rises by more than the configured delta
/// over the previous row. At most one moment per row; when over the cap the
/// largest rises are kept, reported in time order.
fn key_moments(table: &FrameTable, settings: &SummaryConfig, fps: f64) -> Vec<KeyMoment> {
    let columns: Vec<(&str, &[Option<f64>])> = TRACKED_EMOTIONS
        .iter()
        .filter_map(|name| table.column(name).map(|values| (*name, values)))
        .collect();

    let mut found: Vec<(usize, KeyMoment)> = Vec::new();
    for row in 1..table.len() {
        for (name, values) in &columns {
            let (Some(prev), Some(cur)) = (values[row - 1], values[row]) else {
                continue;
            };
            let increase = cur - prev;
            if increase.is_finite() && increase > settings.key_moment_delta {
                found.push((
                    row,
                    KeyMoment::emotion_spike(*name, increase, table.timestamp(row, fps), table.frame_index(row)),
                ));
                break;
            }
        }
    }

    if found.len() > settings.max_key_moments {
        found.sort_by(|a, b| b.1.increase.total_cmp(&a.1.increase).then(a.0.cmp(&b.0)));
        found.truncate(settings.max_key_moments);
        found.sort_by_key(|(row, _)| *row);
    }

    found.into_iter().map(|(_, moment)| moment).collect()
}
