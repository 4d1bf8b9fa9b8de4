//! Strategy-point detection kernel.
//!
//! Consumes a preprocessed track plus the wind estimate and emits categorized
//! decision points: wind shifts, tack opportunities, laylines and mark
//! roundings. Reads the `strategy_detection` namespace (plus the sailing-mode
//! thresholds from `wind_estimation`).
//!
//! The instantaneous wind direction series is derived from heading wander:
//! between maneuvers a boat holds a roughly constant true-wind angle, so the
//! smoothed deviation of the course from the segment mean tracks the wind.

use std::collections::HashMap;
use std::sync::Arc;

use statrs::statistics::Statistics;
use tracing::debug;

use crate::cache::{track_fingerprint, AnalysisCache};
use crate::params::{ParameterNamespace, ParameterRegistry};
use crate::types::{
    Mark, ProcessedTrack, SailingMode, StrategyPoint, StrategyResult, TackSide, WindResult,
};

use super::geo::{
    centered_moving_average, haversine_distance_m, initial_bearing_deg, normalize_course,
    signed_angle_delta, unsigned_angle_between,
};
use super::{polar, AnalysisError};

/// Course jump that starts a new steady-sailing segment (degrees).
const SEGMENT_BREAK_ANGLE: f64 = 30.0;

/// A wind shift must hold at least this long to be reported (seconds).
const MIN_SHIFT_DURATION_SECS: f64 = 15.0;

/// A tack opportunity must persist this long before it is reported (seconds).
const MIN_TACK_HOLD_SECS: f64 = 5.0;

/// Heading-to-mark alignment for layline calls (degrees).
const LAYLINE_ALIGNMENT_CONE: f64 = 5.0;

/// Closest-approach radius counted as rounding a mark (meters).
const MARK_ROUNDING_RADIUS_M: f64 = 50.0;

/// Cache TTL for detection results (seconds).
const STRATEGY_CACHE_TTL_SECS: i64 = 3600;

/// Snapshot of the parameters the detector reads.
#[derive(Debug, Clone, Copy)]
struct StrategyParams {
    min_wind_shift_angle: f64,
    wind_forecast_interval: f64,
    tack_search_radius: f64,
    min_vmg_improvement: f64,
    layline_safety_margin: f64,
    wind_smoothing_window: usize,
    upwind_threshold: f64,
    downwind_threshold: f64,
}

/// Strategy-point detection kernel.
pub struct StrategyDetector {
    registry: Arc<ParameterRegistry>,
    cache: Option<Arc<AnalysisCache>>,
}

impl StrategyDetector {
    pub fn new(registry: Arc<ParameterRegistry>) -> Self {
        Self {
            registry,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<AnalysisCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    fn params(&self) -> StrategyParams {
        StrategyParams {
            min_wind_shift_angle: self.registry.get_f64("min_wind_shift_angle").unwrap_or(5.0),
            wind_forecast_interval: self
                .registry
                .get_i64("wind_forecast_interval")
                .unwrap_or(300) as f64,
            tack_search_radius: self.registry.get_i64("tack_search_radius").unwrap_or(500) as f64,
            min_vmg_improvement: self.registry.get_f64("min_vmg_improvement").unwrap_or(0.05),
            layline_safety_margin: self
                .registry
                .get_f64("layline_safety_margin")
                .unwrap_or(10.0),
            wind_smoothing_window: self.registry.get_usize("wind_smoothing_window").unwrap_or(5),
            upwind_threshold: self.registry.get_f64("upwind_threshold").unwrap_or(45.0),
            downwind_threshold: self.registry.get_f64("downwind_threshold").unwrap_or(120.0),
        }
    }

    // ------------------------------------------------------------------
    // Entry point
    // ------------------------------------------------------------------

    /// Detect strategy points, memoized on track fingerprint, parameter
    /// snapshot, wind estimate and marks.
    pub fn detect(
        &self,
        track: &ProcessedTrack,
        wind: &WindResult,
        marks: &[Mark],
    ) -> Result<StrategyResult, AnalysisError> {
        if track.is_empty() {
            return Err(AnalysisError::EmptyTrack);
        }

        let Some(cache) = &self.cache else {
            return self.perform_detection(track, wind, marks);
        };

        let cache_params = serde_json::json!({
            "data_hash": track_fingerprint(&track.track),
            "strategy_params": self
                .registry
                .get_by_namespace(ParameterNamespace::StrategyDetection),
            "wind": {
                "direction": wind.wind.direction_deg,
                "speed": wind.wind.speed_kn,
            },
            "marks": serde_json::to_value(marks)?,
        });

        let cached = cache.compute_from_params(
            "strategy_detection",
            &cache_params,
            |_| {
                self.perform_detection(track, wind, marks)
                    .and_then(|result| serde_json::to_value(&result).map_err(AnalysisError::from))
            },
            Some(STRATEGY_CACHE_TTL_SECS),
        )?;

        match serde_json::from_value::<StrategyResult>(cached) {
            Ok(result) => Ok(result),
            Err(e) => {
                tracing::warn!(error = %e, "Cached strategy result unusable, recomputing");
                self.perform_detection(track, wind, marks)
            }
        }
    }

    fn perform_detection(
        &self,
        track: &ProcessedTrack,
        wind: &WindResult,
        marks: &[Mark],
    ) -> Result<StrategyResult, AnalysisError> {
        let params = self.params();
        let instantaneous = instantaneous_wind_series(track, wind.wind.direction_deg, &params);

        let optimal = polar::optimal_vmg_angles(wind.wind.speed_kn, &wind.boat_type);

        let wind_shifts = self.detect_wind_shifts(track, &instantaneous, wind, &params, &optimal);
        let tack_points = self.detect_tack_points(track, &instantaneous, &params, &optimal);
        let layline_points =
            self.detect_laylines(track, &instantaneous, marks, &params, &optimal);
        let mark_roundings = self.detect_mark_roundings(track, marks);

        let result =
            StrategyResult::from_categories(wind_shifts, tack_points, layline_points, mark_roundings);

        debug!(
            wind_shifts = result.wind_shift_count,
            tack_points = result.tack_point_count,
            laylines = result.layline_count,
            roundings = result.mark_rounding_count,
            "Strategy detection complete"
        );

        Ok(result)
    }

    // ------------------------------------------------------------------
    // Wind shifts
    // ------------------------------------------------------------------

    fn detect_wind_shifts(
        &self,
        track: &ProcessedTrack,
        instantaneous: &[f64],
        wind: &WindResult,
        params: &StrategyParams,
        optimal: &crate::types::OptimalVmg,
    ) -> Vec<StrategyPoint> {
        let n = track.len();
        let timestamps = &track.track.timestamps;
        let mut shifts = Vec::new();

        let elapsed = |a: usize, b: usize| -> f64 {
            (timestamps[b] - timestamps[a]).num_milliseconds() as f64 / 1000.0
        };

        // Reference direction re-arms after every reported shift.
        let mut reference = instantaneous.first().copied().unwrap_or(0.0);
        let mut i = 1;
        while i < n {
            let shift = signed_angle_delta(instantaneous[i], reference);
            if shift.abs() < params.min_wind_shift_angle {
                i += 1;
                continue;
            }

            // Candidate inflection: require the shifted direction to hold for
            // the minimum duration (or to the end of the track).
            let sign = shift.signum();
            let mut j = i;
            while j + 1 < n
                && elapsed(i, j) < MIN_SHIFT_DURATION_SECS
                && signed_angle_delta(instantaneous[j + 1], reference) * sign
                    >= params.min_wind_shift_angle
            {
                j += 1;
            }

            let duration = elapsed(i, j);
            if duration + 1e-9 < MIN_SHIFT_DURATION_SECS {
                // Did not persist; skip past the blip.
                i = j + 1;
                continue;
            }

            let after = instantaneous[j];
            let shift_angle = signed_angle_delta(after, reference);
            let side = if shift_angle >= 0.0 { "right" } else { "left" };

            // Estimated seconds gained by playing the shift over the
            // forecast horizon (small-angle VMG sensitivity upwind).
            let gain_seconds = params.wind_forecast_interval
                * optimal.upwind_angle.to_radians().sin()
                * shift_angle.abs().to_radians();

            let magnitude = (shift_angle.abs() / 30.0).clamp(0.0, 1.0);
            let persistence = (duration / 60.0).clamp(0.0, 1.0);
            let consequence = (gain_seconds / 60.0).clamp(0.0, 1.0);
            let score = strategic_score(magnitude, persistence, consequence);

            shifts.push(StrategyPoint::WindShift {
                time: timestamps[i],
                latitude: track.track.latitudes[i],
                longitude: track.track.longitudes[i],
                strategic_score: score,
                note: format!(
                    "Wind shifted {:.0} deg {} over {:.0} s",
                    shift_angle.abs(),
                    side,
                    duration
                ),
                shift_angle,
                before_direction: normalize_course(reference),
                after_direction: normalize_course(after),
                wind_speed: wind.wind.speed_kn,
                duration_seconds: duration,
            });

            reference = after;
            i = j + 1;
        }

        shifts
    }

    // ------------------------------------------------------------------
    // Tack points
    // ------------------------------------------------------------------

    fn detect_tack_points(
        &self,
        track: &ProcessedTrack,
        instantaneous: &[f64],
        params: &StrategyParams,
        optimal: &crate::types::OptimalVmg,
    ) -> Vec<StrategyPoint> {
        let n = track.len();
        let timestamps = &track.track.timestamps;
        let mut points = Vec::new();

        // Dedup per (beating/running, current tack): one call per area of
        // the course.
        let mut last_emitted: HashMap<(bool, TackSide), (f64, f64)> = HashMap::new();

        let mut hold_start: Option<(usize, (bool, TackSide))> = None;
        for i in 0..n {
            let course = track.track.courses[i];
            let speed = track.track.speeds[i];
            let rel = signed_angle_delta(course, instantaneous[i]);

            // The opposite-tack question splits at abeam: closer to the wind
            // than 90 degrees the reference is the upwind target, beyond it
            // the downwind target.
            let beating = rel.abs() < 90.0;
            let gain = if beating {
                let current = speed * rel.to_radians().cos();
                let target = speed * optimal.upwind_angle.to_radians().cos();
                relative_gain(current, target)
            } else {
                let current = speed * (180.0 - rel.abs()).to_radians().cos().abs();
                let target = speed * (180.0 - optimal.downwind_angle).to_radians().cos().abs();
                relative_gain(current, target)
            };

            let tack = tack_side(rel);
            let key = (beating, tack);

            if gain < params.min_vmg_improvement {
                hold_start = None;
                continue;
            }

            // The hold window restarts when the point of sail or tack flips:
            // the opportunity must persist on one board.
            let held = match hold_start {
                Some((start, held_key)) if held_key == key => {
                    (timestamps[i] - timestamps[start]).num_milliseconds() as f64 / 1000.0
                }
                _ => {
                    hold_start = Some((i, key));
                    continue;
                }
            };
            if held + 1e-9 < MIN_TACK_HOLD_SECS {
                continue;
            }
            let position = (track.track.latitudes[i], track.track.longitudes[i]);
            let far_enough = last_emitted.get(&key).map_or(true, |(lat, lon)| {
                haversine_distance_m(*lat, *lon, position.0, position.1) > params.tack_search_radius
            });
            if !far_enough {
                continue;
            }
            last_emitted.insert(key, position);

            // Optimal heading on the opposite tack.
            let target_angle = if beating {
                optimal.upwind_angle
            } else {
                optimal.downwind_angle
            };
            let heading_after =
                normalize_course(instantaneous[i] - rel.signum() * target_angle);

            let action = if beating { "Tack" } else { "Jibe" };
            let magnitude = (gain / (3.0 * params.min_vmg_improvement)).clamp(0.0, 1.0);
            let persistence = (held / 30.0).clamp(0.0, 1.0);
            let consequence =
                (gain * params.wind_forecast_interval / 60.0).clamp(0.0, 1.0);
            let score = strategic_score(magnitude, persistence, consequence);

            points.push(StrategyPoint::Tack {
                time: timestamps[i],
                latitude: position.0,
                longitude: position.1,
                strategic_score: score,
                note: format!(
                    "{} suggested: {:.0}% VMG gain on {} tack",
                    action,
                    gain * 100.0,
                    tack.opposite()
                ),
                tack_type: tack,
                suggested_tack: tack.opposite(),
                vmg_gain: gain,
                heading_before: course,
                heading_after,
            });
        }

        points
    }

    // ------------------------------------------------------------------
    // Laylines
    // ------------------------------------------------------------------

    fn detect_laylines(
        &self,
        track: &ProcessedTrack,
        instantaneous: &[f64],
        marks: &[Mark],
        params: &StrategyParams,
        optimal: &crate::types::OptimalVmg,
    ) -> Vec<StrategyPoint> {
        if marks.is_empty() {
            return Vec::new();
        }

        let n = track.len();
        let mut points = Vec::new();
        let mut called: HashMap<(String, TackSide), ()> = HashMap::new();

        for i in 0..n {
            let course = track.track.courses[i];
            let rel = signed_angle_delta(course, instantaneous[i]);
            if classify_mode(rel, params) != SailingMode::Upwind {
                continue;
            }

            for mark in marks {
                let key = (mark.mark_id.clone(), tack_side(rel));
                if called.contains_key(&key) {
                    continue;
                }

                let lat = track.track.latitudes[i];
                let lon = track.track.longitudes[i];
                let bearing = initial_bearing_deg(lat, lon, mark.latitude, mark.longitude);

                // The boat must actually be sailing at the mark.
                if unsigned_angle_between(bearing, course) > LAYLINE_ALIGNMENT_CONE {
                    continue;
                }

                let approach_angle = unsigned_angle_between(bearing, instantaneous[i]);
                let angle_difference = approach_angle - optimal.upwind_angle;
                if angle_difference.abs() > params.layline_safety_margin {
                    continue;
                }

                let distance = haversine_distance_m(lat, lon, mark.latitude, mark.longitude);

                let magnitude =
                    (1.0 - angle_difference.abs() / params.layline_safety_margin.max(1e-9))
                        .clamp(0.0, 1.0);
                let persistence = 0.5;
                let consequence = (1.0 - distance / 2000.0).clamp(0.0, 1.0);
                let score = strategic_score(magnitude, persistence, consequence);

                called.insert(key, ());
                points.push(StrategyPoint::Layline {
                    time: track.track.timestamps[i],
                    latitude: lat,
                    longitude: lon,
                    strategic_score: score,
                    note: format!(
                        "On the layline to {} ({:.0} m out)",
                        mark.mark_id, distance
                    ),
                    mark_id: mark.mark_id.clone(),
                    distance_to_mark: distance,
                    approach_angle,
                    optimal_angle: optimal.upwind_angle,
                    angle_difference,
                });
            }
        }

        points
    }

    // ------------------------------------------------------------------
    // Mark roundings
    // ------------------------------------------------------------------

    fn detect_mark_roundings(&self, track: &ProcessedTrack, marks: &[Mark]) -> Vec<StrategyPoint> {
        let mut points = Vec::new();

        for mark in marks {
            let closest = (0..track.len())
                .map(|i| {
                    let d = haversine_distance_m(
                        track.track.latitudes[i],
                        track.track.longitudes[i],
                        mark.latitude,
                        mark.longitude,
                    );
                    (i, d)
                })
                .min_by(|a, b| a.1.total_cmp(&b.1));

            if let Some((i, distance)) = closest {
                if distance <= MARK_ROUNDING_RADIUS_M {
                    let magnitude = (1.0 - distance / MARK_ROUNDING_RADIUS_M).clamp(0.0, 1.0);
                    let score = strategic_score(magnitude, 0.5, 0.5);
                    points.push(StrategyPoint::MarkRounding {
                        time: track.track.timestamps[i],
                        latitude: track.track.latitudes[i],
                        longitude: track.track.longitudes[i],
                        strategic_score: score,
                        note: format!(
                            "Rounded {} at {:.0} m ({})",
                            mark.mark_id, distance, mark.rounding_side
                        ),
                        mark_id: mark.mark_id.clone(),
                        rounding_side: mark.rounding_side,
                        closest_distance: distance,
                    });
                }
            }
        }

        points
    }
}

// ============================================================================
// Free helpers
// ============================================================================

/// Weighted combination of the three scoring axes, clamped to [0, 1].
fn strategic_score(magnitude: f64, persistence: f64, consequence: f64) -> f64 {
    (0.5 * magnitude + 0.3 * persistence + 0.2 * consequence).clamp(0.0, 1.0)
}

/// Relative VMG improvement of `target` over `current`.
fn relative_gain(current: f64, target: f64) -> f64 {
    if current.abs() < 1e-9 {
        if target > 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        (target - current) / current.abs()
    }
}

fn classify_mode(rel_wind_angle: f64, params: &StrategyParams) -> SailingMode {
    let angle = rel_wind_angle.abs();
    if angle <= params.upwind_threshold {
        SailingMode::Upwind
    } else if angle >= params.downwind_threshold {
        SailingMode::Downwind
    } else {
        SailingMode::Reach
    }
}

/// Wind over the port side (positive relative angle) means port tack.
fn tack_side(rel_wind_angle: f64) -> TackSide {
    if rel_wind_angle >= 0.0 {
        TackSide::Port
    } else {
        TackSide::Starboard
    }
}

/// Per-sample instantaneous wind direction.
///
/// Splits the track into steady segments at large course jumps; within each
/// segment the smoothed course deviation from the segment mean is read as
/// wind wander around the global estimate.
fn instantaneous_wind_series(
    track: &ProcessedTrack,
    wind_direction: f64,
    params: &StrategyParams,
) -> Vec<f64> {
    let n = track.len();
    let courses = &track.track.courses;
    if n == 0 {
        return Vec::new();
    }

    let mut series = vec![wind_direction; n];
    let mut segment_start = 0;

    let flush_segment = |start: usize, end: usize, series: &mut Vec<f64>| {
        let len = end - start;
        if len < 2 {
            return;
        }
        // Unwrap within the segment, then smooth.
        let mut unwrapped = Vec::with_capacity(len);
        unwrapped.push(courses[start]);
        for i in start + 1..end {
            let prev = unwrapped[i - start - 1];
            unwrapped.push(prev + signed_angle_delta(courses[i], courses[i - 1]));
        }
        let window = params.wind_smoothing_window.min(len);
        let smoothed = centered_moving_average(&unwrapped, window.max(1));
        let segment_mean = smoothed.as_slice().mean();
        for i in start..end {
            let deviation = smoothed[i - start] - segment_mean;
            series[i] = normalize_course(wind_direction + deviation);
        }
    };

    for i in 1..n {
        if unsigned_angle_between(courses[i], courses[i - 1]) > SEGMENT_BREAK_ANGLE {
            flush_segment(segment_start, i, &mut series);
            segment_start = i;
        }
    }
    flush_segment(segment_start, n, &mut series);

    series
}
