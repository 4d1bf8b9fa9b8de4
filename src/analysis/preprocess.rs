//! Track preprocessing kernel.
//!
//! Validates the input frame, sorts by time, drops non-monotonic and outlier
//! rows and derives the arrays the downstream kernels rely on. Reads the
//! `data_processing` parameter namespace.

use statrs::statistics::Statistics;
use tracing::{debug, info};

use crate::params::ParameterRegistry;
use crate::types::{PreprocessStats, ProcessedTrack, Series, Track, TrackFrame, REQUIRED_COLUMNS};

use super::geo::centered_moving_average;
use super::AnalysisError;

/// Preprocess an input frame into a clean track plus row accounting.
///
/// Fails with [`AnalysisError::MissingColumn`] when a required column is
/// absent, [`AnalysisError::EmptyTrack`] for zero rows, and
/// [`AnalysisError::InsufficientData`] when fewer than `min_data_points`
/// rows survive cleaning.
pub fn preprocess_track(
    frame: &TrackFrame,
    registry: &ParameterRegistry,
) -> Result<(ProcessedTrack, PreprocessStats), AnalysisError> {
    let missing = frame.missing_columns();
    if !missing.is_empty() {
        return Err(AnalysisError::MissingColumn(missing.join(", ")));
    }

    let timestamps = match frame.columns.get("timestamp") {
        Some(Series::Time(values)) => values,
        Some(Series::Float(_)) => {
            return Err(AnalysisError::InvalidColumn(
                "timestamp".to_string(),
                "expected instants, found floats".to_string(),
            ))
        }
        None => return Err(AnalysisError::MissingColumn("timestamp".to_string())),
    };

    let original_rows = timestamps.len();
    if original_rows == 0 {
        return Err(AnalysisError::EmptyTrack);
    }

    let float_column = |name: &str| -> Result<&Vec<f64>, AnalysisError> {
        match frame.columns.get(name) {
            Some(Series::Float(values)) => {
                if values.len() != original_rows {
                    return Err(AnalysisError::InvalidColumn(
                        name.to_string(),
                        format!("length {} does not match {} rows", values.len(), original_rows),
                    ));
                }
                Ok(values)
            }
            Some(Series::Time(_)) => Err(AnalysisError::InvalidColumn(
                name.to_string(),
                "expected floats, found instants".to_string(),
            )),
            None => Err(AnalysisError::MissingColumn(name.to_string())),
        }
    };

    let latitudes = float_column("latitude")?;
    let longitudes = float_column("longitude")?;
    let courses = float_column("course")?;
    let speeds = float_column("speed")?;

    // Malformed numerics fail the kernel rather than silently propagating.
    for (name, values) in [
        ("latitude", latitudes),
        ("longitude", longitudes),
        ("course", courses),
        ("speed", speeds),
    ] {
        if values.iter().any(|v| !v.is_finite()) {
            return Err(AnalysisError::InvalidColumn(
                name.to_string(),
                "contains non-finite values".to_string(),
            ));
        }
    }

    let extra_names: Vec<&String> = frame
        .columns
        .keys()
        .filter(|name| !REQUIRED_COLUMNS.contains(&name.as_str()))
        .collect();
    for name in &extra_names {
        float_column(name)?;
    }

    // Sort rows by timestamp (stable), then drop rows that do not strictly
    // advance the clock so downstream time diffs stay positive.
    let mut order: Vec<usize> = (0..original_rows).collect();
    order.sort_by_key(|&i| timestamps[i]);

    let mut kept: Vec<usize> = Vec::with_capacity(original_rows);
    for &i in &order {
        match kept.last() {
            Some(&prev) if timestamps[i] <= timestamps[prev] => {}
            _ => kept.push(i),
        }
    }

    // Speed-outlier removal: mean +/- outlier_threshold sigma.
    let outlier_threshold = registry.get_f64("outlier_threshold").unwrap_or(3.0);
    let kept_speeds: Vec<f64> = kept.iter().map(|&i| speeds[i]).collect();
    let mean = kept_speeds.as_slice().mean();
    let std = kept_speeds.as_slice().std_dev();
    if std.is_finite() && std > 0.0 {
        let lower = mean - outlier_threshold * std;
        let upper = mean + outlier_threshold * std;
        kept.retain(|&i| speeds[i] > lower && speeds[i] < upper);
    }

    let min_data_points = registry.get_usize("min_data_points").unwrap_or(10);
    if kept.len() < min_data_points {
        return Err(AnalysisError::InsufficientData(format!(
            "{} rows after cleaning, {} required",
            kept.len(),
            min_data_points
        )));
    }

    // Materialize the fixed-schema track in cleaned order.
    let mut track = Track::with_capacity(kept.len());
    for &i in &kept {
        track.timestamps.push(timestamps[i]);
        track.latitudes.push(latitudes[i]);
        track.longitudes.push(longitudes[i]);
        track.courses.push(super::geo::normalize_course(courses[i]));
        track.speeds.push(speeds[i].max(0.0));
    }
    for name in extra_names {
        if let Some(Series::Float(values)) = frame.columns.get(name) {
            track
                .extras
                .insert(name.clone(), kept.iter().map(|&i| values[i]).collect());
        }
    }

    // Derived arrays.
    let mut time_diffs = Vec::with_capacity(track.len());
    time_diffs.push(0.0);
    for pair in track.timestamps.windows(2) {
        time_diffs.push((pair[1] - pair[0]).num_milliseconds() as f64 / 1000.0);
    }

    let smoothing_window = registry.get_usize("smoothing_window_size").unwrap_or(3);
    let speeds_smooth = centered_moving_average(&track.speeds, smoothing_window);

    let stats = PreprocessStats {
        original_rows,
        processed_rows: track.len(),
        removed_rows: original_rows - track.len(),
        duration_seconds: track.duration_seconds(),
    };

    debug!(
        original = stats.original_rows,
        processed = stats.processed_rows,
        removed = stats.removed_rows,
        "Preprocessing complete"
    );
    if stats.removed_rows > 0 {
        info!(removed = stats.removed_rows, "Dropped rows during preprocessing");
    }

    Ok((
        ProcessedTrack {
            track,
            time_diffs,
            speeds_smooth,
        },
        stats,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sample;
    use chrono::{TimeZone, Utc};

    fn registry() -> ParameterRegistry {
        ParameterRegistry::new()
    }

    fn samples(n: usize) -> Vec<Sample> {
        (0..n)
            .map(|i| Sample {
                timestamp: Utc.timestamp_opt(1_700_000_000 + i as i64, 0).single().expect("valid ts"),
                latitude: 35.6 + i as f64 * 1e-5,
                longitude: 139.7,
                course: 90.0,
                speed: 5.0 + (i % 3) as f64 * 0.1,
            })
            .collect()
    }

    #[test]
    fn missing_column_is_reported() {
        let mut frame = TrackFrame::from_samples(&samples(20));
        frame.columns.remove("course");
        let err = preprocess_track(&frame, &registry()).expect_err("must fail");
        assert!(matches!(err, AnalysisError::MissingColumn(ref cols) if cols.contains("course")));
    }

    #[test]
    fn empty_track_fails() {
        let frame = TrackFrame::from_samples(&[]);
        let err = preprocess_track(&frame, &registry()).expect_err("must fail");
        assert!(matches!(err, AnalysisError::EmptyTrack));
    }

    #[test]
    fn single_sample_fails_with_insufficient_data() {
        let frame = TrackFrame::from_samples(&samples(1));
        let err = preprocess_track(&frame, &registry()).expect_err("must fail");
        assert!(matches!(err, AnalysisError::InsufficientData(_)));
    }

    #[test]
    fn unsorted_rows_are_sorted_and_deduplicated() {
        let mut rows = samples(20);
        rows.swap(3, 7);
        // Duplicate timestamp: second occurrence must be dropped.
        rows[10].timestamp = rows[9].timestamp;
        let frame = TrackFrame::from_samples(&rows);

        let (processed, stats) = preprocess_track(&frame, &registry()).expect("preprocess");
        assert_eq!(stats.original_rows, 20);
        assert_eq!(stats.processed_rows, 19);
        assert!(processed
            .track
            .timestamps
            .windows(2)
            .all(|w| w[0] < w[1]));
        // First diff is zero, the rest strictly positive.
        assert_eq!(processed.time_diffs[0], 0.0);
        assert!(processed.time_diffs[1..].iter().all(|&d| d > 0.0));
    }

    #[test]
    fn speed_outliers_removed() {
        let mut rows = samples(40);
        rows[20].speed = 90.0; // GPS glitch
        let frame = TrackFrame::from_samples(&rows);

        let (processed, stats) = preprocess_track(&frame, &registry()).expect("preprocess");
        assert_eq!(stats.removed_rows, 1);
        assert!(processed.track.speeds.iter().all(|&s| s < 10.0));
    }

    #[test]
    fn extra_columns_pass_through() {
        let rows = samples(15);
        let mut frame = TrackFrame::from_samples(&rows);
        frame.columns.insert(
            "heel".to_string(),
            Series::Float((0..15).map(|i| i as f64).collect()),
        );

        let (processed, _) = preprocess_track(&frame, &registry()).expect("preprocess");
        let heel = processed.track.extras.get("heel").expect("extra kept");
        assert_eq!(heel.len(), processed.track.len());
    }

    #[test]
    fn non_finite_speed_fails() {
        let mut rows = samples(15);
        rows[3].speed = f64::NAN;
        let frame = TrackFrame::from_samples(&rows);
        let err = preprocess_track(&frame, &registry()).expect_err("must fail");
        assert!(matches!(err, AnalysisError::InvalidColumn(ref name, _) if name == "speed"));
    }
}
