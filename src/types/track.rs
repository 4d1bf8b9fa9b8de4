//! Track types: the raw input table and the fixed-schema sample arrays.
//!
//! A [`TrackFrame`] is the loose, column-oriented table handed in by external
//! parsers. Preprocessing validates it and converts it into a [`Track`]: a
//! struct-of-arrays with a fixed schema plus an extension map for columns the
//! core does not interpret but must pass through.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Column names the core requires on every input frame.
pub const REQUIRED_COLUMNS: [&str; 5] = ["timestamp", "latitude", "longitude", "course", "speed"];

/// A single column of the input table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Series {
    /// Instants, one per row (the `timestamp` column).
    Time(Vec<DateTime<Utc>>),
    /// Numeric values, one per row (every other column).
    Float(Vec<f64>),
}

impl Series {
    /// Number of rows in this column.
    pub fn len(&self) -> usize {
        match self {
            Series::Time(v) => v.len(),
            Series::Float(v) => v.len(),
        }
    }

    /// True when the column has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Row-oriented input table with dynamic columns.
///
/// This is the shape the host's file parsers produce. The core only requires
/// the columns in [`REQUIRED_COLUMNS`]; anything else is carried through
/// preprocessing untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackFrame {
    pub columns: BTreeMap<String, Series>,
}

impl TrackFrame {
    pub fn new() -> Self {
        Self {
            columns: BTreeMap::new(),
        }
    }

    /// Build a frame from parallel sample vectors (the common parser output).
    pub fn from_samples(samples: &[Sample]) -> Self {
        let mut frame = Self::new();
        frame.columns.insert(
            "timestamp".to_string(),
            Series::Time(samples.iter().map(|s| s.timestamp).collect()),
        );
        frame.columns.insert(
            "latitude".to_string(),
            Series::Float(samples.iter().map(|s| s.latitude).collect()),
        );
        frame.columns.insert(
            "longitude".to_string(),
            Series::Float(samples.iter().map(|s| s.longitude).collect()),
        );
        frame.columns.insert(
            "course".to_string(),
            Series::Float(samples.iter().map(|s| s.course).collect()),
        );
        frame.columns.insert(
            "speed".to_string(),
            Series::Float(samples.iter().map(|s| s.speed).collect()),
        );
        frame
    }

    /// Row count, taken from the timestamp column (0 when absent).
    pub fn row_count(&self) -> usize {
        self.columns.get("timestamp").map_or(0, Series::len)
    }

    /// Names of required columns missing from this frame.
    pub fn missing_columns(&self) -> Vec<String> {
        REQUIRED_COLUMNS
            .iter()
            .filter(|name| !self.columns.contains_key(**name))
            .map(|name| (*name).to_string())
            .collect()
    }

    /// Column names, sorted ascending.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }
}

/// One GPS sample: position, course over ground and speed over ground.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    /// Latitude (degrees)
    pub latitude: f64,
    /// Longitude (degrees)
    pub longitude: f64,
    /// Course over ground (degrees, [0, 360))
    pub course: f64,
    /// Speed over ground (knots)
    pub speed: f64,
}

/// Fixed-schema track as parallel arrays.
///
/// All vectors have equal length. `extras` holds pass-through columns keyed by
/// name; their vectors match the schema length as well.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub timestamps: Vec<DateTime<Utc>>,
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
    pub courses: Vec<f64>,
    pub speeds: Vec<f64>,
    /// Pass-through columns preserved from the input frame.
    #[serde(default)]
    pub extras: BTreeMap<String, Vec<f64>>,
}

impl Track {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            timestamps: Vec::with_capacity(capacity),
            latitudes: Vec::with_capacity(capacity),
            longitudes: Vec::with_capacity(capacity),
            courses: Vec::with_capacity(capacity),
            speeds: Vec::with_capacity(capacity),
            extras: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Row view at index `i`. `i` must be in range.
    pub fn sample(&self, i: usize) -> Sample {
        Sample {
            timestamp: self.timestamps[i],
            latitude: self.latitudes[i],
            longitude: self.longitudes[i],
            course: self.courses[i],
            speed: self.speeds[i],
        }
    }

    pub fn push(&mut self, sample: Sample) {
        self.timestamps.push(sample.timestamp);
        self.latitudes.push(sample.latitude);
        self.longitudes.push(sample.longitude);
        self.courses.push(sample.course);
        self.speeds.push(sample.speed);
    }

    /// Total duration between first and last sample (0 for < 2 samples).
    pub fn duration_seconds(&self) -> f64 {
        match (self.timestamps.first(), self.timestamps.last()) {
            (Some(first), Some(last)) => (*last - *first).num_milliseconds() as f64 / 1000.0,
            _ => 0.0,
        }
    }

    /// Column names of the fixed schema plus extras, sorted ascending.
    ///
    /// Matches the column set a [`TrackFrame`] conversion preserves; used by
    /// the cache's track fingerprint.
    pub fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = REQUIRED_COLUMNS.iter().map(|s| (*s).to_string()).collect();
        names.extend(self.extras.keys().cloned());
        names.sort();
        names
    }
}

/// Track after preprocessing: sorted, strictly monotonic timestamps, outliers
/// removed, with explicit derived arrays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessedTrack {
    pub track: Track,
    /// Seconds elapsed since the previous sample; first entry is 0.
    pub time_diffs: Vec<f64>,
    /// Centered moving average of speed (window = `smoothing_window_size`).
    pub speeds_smooth: Vec<f64>,
}

impl ProcessedTrack {
    pub fn len(&self) -> usize {
        self.track.len()
    }

    pub fn is_empty(&self) -> bool {
        self.track.is_empty()
    }

    pub fn duration_seconds(&self) -> f64 {
        self.track.duration_seconds()
    }
}

/// Row-accounting summary produced by preprocessing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PreprocessStats {
    pub original_rows: usize,
    pub processed_rows: usize,
    pub removed_rows: usize,
    pub duration_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_at(secs: i64) -> Sample {
        Sample {
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("valid ts"),
            latitude: 35.6,
            longitude: 139.7,
            course: 90.0,
            speed: 5.0,
        }
    }

    #[test]
    fn frame_reports_missing_columns() {
        let mut frame = TrackFrame::new();
        frame
            .columns
            .insert("timestamp".to_string(), Series::Time(vec![]));
        frame
            .columns
            .insert("speed".to_string(), Series::Float(vec![]));

        let missing = frame.missing_columns();
        assert!(missing.contains(&"latitude".to_string()));
        assert!(missing.contains(&"longitude".to_string()));
        assert!(missing.contains(&"course".to_string()));
        assert_eq!(missing.len(), 3);
    }

    #[test]
    fn frame_from_samples_has_all_required_columns() {
        let frame = TrackFrame::from_samples(&[sample_at(0), sample_at(1)]);
        assert!(frame.missing_columns().is_empty());
        assert_eq!(frame.row_count(), 2);
    }

    #[test]
    fn track_duration_and_column_names() {
        let mut track = Track::with_capacity(2);
        track.push(sample_at(0));
        track.push(sample_at(90));
        track.extras.insert("heel".to_string(), vec![2.0, 3.0]);

        assert!((track.duration_seconds() - 90.0).abs() < 1e-9);
        let names = track.column_names();
        assert_eq!(
            names,
            vec!["course", "heel", "latitude", "longitude", "speed", "timestamp"]
        );
    }

    #[test]
    fn empty_track_duration_is_zero() {
        let track = Track::default();
        assert_eq!(track.duration_seconds(), 0.0);
        assert!(track.is_empty());
    }
}
