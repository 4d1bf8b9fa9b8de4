//! Wind estimation kernel.
//!
//! Two estimation paths feed the final pick:
//!
//! 1. **Maneuvers**: tack/jibe bisectors point to (or away from) the wind;
//!    classified bisectors are clustered with a weighted circular mean.
//! 2. **Course/speed**: a polar histogram of boat speed against heading; the
//!    direction maximizing the downwind-minus-upwind speed separation is the
//!    wind axis.
//!
//! The maneuver estimate wins when its confidence clears 0.3, otherwise the
//! course/speed estimate is used.
//!
//! ## Confidence scale
//!
//! Maneuver method: `0.45 * min(n/6, 1) + 0.35 * cluster_tightness +
//! 0.20 * mean_speed_ratio` where tightness is the resultant length of the
//! weighted circular mean. Course/speed method: `0.3 * normalized_separation`
//! (capped at 0.3 so a usable maneuver estimate always takes precedence).

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::{debug, warn};

use crate::cache::{track_fingerprint, AnalysisCache};
use crate::params::{ParameterNamespace, ParameterRegistry};
use crate::types::{
    Maneuver, ManeuverType, OptimalVmg, ProcessedTrack, WindEstimate, WindMethod, WindResult,
};

use super::geo::{
    centered_moving_average, circular_mean_deg, normalize_course, signed_angle_delta,
    unsigned_angle_between,
};
use super::{polar, AnalysisError};

/// Longest heading excursion treated as a single maneuver.
const MAX_MANEUVER_WINDOW_SECS: f64 = 30.0;

/// Classification cones around the wind and anti-wind for tack/jibe
/// labeling (deg). A genuine tack bisector sits close to the wind and a
/// genuine jibe bisector close to the anti-wind; turns near abeam of the
/// wind stay unclassified.
const CLASSIFY_TACK_CONE: f64 = 50.0;
const CLASSIFY_JIBE_CONE: f64 = 130.0;

/// Maneuver count at which the sample-size confidence term saturates.
const CONFIDENCE_SATURATION_COUNT: f64 = 6.0;

/// Cache TTL for estimation results (seconds).
const WIND_CACHE_TTL_SECS: i64 = 3600;

/// Multiplier for the linear wind-speed proxy when no polar table applies.
const LINEAR_WIND_PROXY_FACTOR: f64 = 1.5;

/// Snapshot of the `wind_estimation` namespace.
#[derive(Debug, Clone, Copy)]
struct WindParams {
    min_speed_threshold: f64,
    upwind_threshold: f64,
    downwind_threshold: f64,
    min_tack_angle_change: f64,
    wind_smoothing_window: usize,
}

/// Per-class stats for the maneuver performance summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ManeuverClassPerformance {
    pub count: usize,
    pub avg_speed_ratio: Option<f64>,
    pub avg_duration: Option<f64>,
    pub min_duration: Option<f64>,
    pub max_duration: Option<f64>,
}

/// Tack/jibe performance summary (supplementary analysis).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManeuverPerformance {
    pub maneuver_count: usize,
    pub tack_count: usize,
    pub jibe_count: usize,
    pub tacks: ManeuverClassPerformance,
    pub jibes: ManeuverClassPerformance,
}

/// Heading histogram and sailing-mode split against the estimated wind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindDirectionDistribution {
    /// Sample counts per 10-degree course bin.
    pub course_histogram: Vec<usize>,
    /// Bin centers (degrees).
    pub angle_bins: Vec<f64>,
    pub wind_direction: f64,
    pub upwind_percentage: f64,
    pub reach_percentage: f64,
    pub downwind_percentage: f64,
    pub upwind_threshold: f64,
    pub downwind_threshold: f64,
}

/// Wind estimation kernel.
pub struct WindEstimator {
    registry: Arc<ParameterRegistry>,
    cache: Option<Arc<AnalysisCache>>,
}

impl WindEstimator {
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

    fn params(&self) -> WindParams {
        WindParams {
            min_speed_threshold: self.registry.get_f64("min_speed_threshold").unwrap_or(2.0),
            upwind_threshold: self.registry.get_f64("upwind_threshold").unwrap_or(45.0),
            downwind_threshold: self.registry.get_f64("downwind_threshold").unwrap_or(120.0),
            min_tack_angle_change: self
                .registry
                .get_f64("min_tack_angle_change")
                .unwrap_or(60.0),
            wind_smoothing_window: self.registry.get_usize("wind_smoothing_window").unwrap_or(5),
        }
    }

    // ------------------------------------------------------------------
    // Entry point
    // ------------------------------------------------------------------

    /// Estimate the true wind for a preprocessed track, memoized on the
    /// track fingerprint plus the `wind_estimation` parameter snapshot.
    pub fn estimate(
        &self,
        track: &ProcessedTrack,
        boat_type: &str,
    ) -> Result<WindResult, AnalysisError> {
        if track.is_empty() {
            return Err(AnalysisError::EmptyTrack);
        }

        let Some(cache) = &self.cache else {
            return self.perform_estimation(track, boat_type);
        };

        let cache_params = serde_json::json!({
            "data_hash": track_fingerprint(&track.track),
            "boat_type": boat_type,
            "wind_params": self.registry.get_by_namespace(ParameterNamespace::WindEstimation),
        });

        let cached = cache.compute_from_params(
            "wind_estimation",
            &cache_params,
            |_| {
                self.perform_estimation(track, boat_type)
                    .and_then(|result| serde_json::to_value(&result).map_err(AnalysisError::from))
            },
            Some(WIND_CACHE_TTL_SECS),
        )?;

        match serde_json::from_value::<WindResult>(cached) {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(error = %e, "Cached wind result unusable, recomputing");
                self.perform_estimation(track, boat_type)
            }
        }
    }

    fn perform_estimation(
        &self,
        track: &ProcessedTrack,
        boat_type: &str,
    ) -> Result<WindResult, AnalysisError> {
        let params = self.params();

        // Provisional direction from the track shape, used to classify
        // maneuvers before the final pick.
        let course_speed = self.estimate_from_course_speed(track, &params, boat_type);
        let provisional = (course_speed.confidence > 0.0).then_some(course_speed.direction_deg);

        let mut maneuvers = self.detect_maneuvers_with(track, &params, provisional);
        let from_maneuvers = self.estimate_from_maneuvers(track, &maneuvers, &params, boat_type);

        let wind = if from_maneuvers.confidence > 0.3 {
            from_maneuvers
        } else {
            course_speed
        };

        // Re-classify against the selected direction so the reported labels
        // agree with the reported wind.
        if wind.confidence > 0.0 {
            for maneuver in &mut maneuvers {
                maneuver.maneuver_type = classify_maneuver(maneuver, wind.direction_deg);
            }
        }

        let wind_summary = format!(
            "Wind {:.0} deg at {:.1} kn ({}, confidence {:.2}); {} maneuvers detected",
            wind.direction_deg,
            wind.speed_kn,
            wind.method,
            wind.confidence,
            maneuvers.len()
        );

        debug!(
            direction = wind.direction_deg,
            speed = wind.speed_kn,
            confidence = wind.confidence,
            method = %wind.method,
            maneuvers = maneuvers.len(),
            "Wind estimation complete"
        );

        Ok(WindResult {
            wind,
            detected_maneuvers: maneuvers,
            wind_summary,
            timestamp: Utc::now(),
            boat_type: boat_type.to_string(),
        })
    }

    // ------------------------------------------------------------------
    // Maneuver detection
    // ------------------------------------------------------------------

    /// Detect direction-change maneuvers. Classification against
    /// `provisional_wind` when given, otherwise every maneuver is `Unknown`.
    pub fn detect_maneuvers(
        &self,
        track: &ProcessedTrack,
        provisional_wind: Option<f64>,
    ) -> Vec<Maneuver> {
        let params = self.params();
        self.detect_maneuvers_with(track, &params, provisional_wind)
    }

    fn detect_maneuvers_with(
        &self,
        track: &ProcessedTrack,
        params: &WindParams,
        provisional_wind: Option<f64>,
    ) -> Vec<Maneuver> {
        let n = track.len();
        // A smoothing window wider than the track leaves nothing to scan;
        // the caller falls back to the course/speed method.
        if n < 3 || params.wind_smoothing_window > n {
            return Vec::new();
        }

        let courses = &track.track.courses;
        let speeds = &track.track.speeds;
        let timestamps = &track.track.timestamps;

        // Unwrap headings so cumulative turns cross 0/360 cleanly.
        let mut unwrapped = Vec::with_capacity(n);
        unwrapped.push(courses[0]);
        for i in 1..n {
            let prev = unwrapped[i - 1];
            unwrapped.push(prev + signed_angle_delta(courses[i], courses[i - 1]));
        }
        let smoothed = centered_moving_average(&unwrapped, params.wind_smoothing_window);

        let elapsed = |a: usize, b: usize| -> f64 {
            (timestamps[b] - timestamps[a]).num_milliseconds() as f64 / 1000.0
        };

        let mut maneuvers = Vec::new();
        let mut i = 0usize;
        while i + 1 < n {
            // Find an exit sample inside the bounded window where the
            // cumulative heading change clears the threshold.
            let mut exit = None;
            let mut j = i + 1;
            while j < n && elapsed(i, j) <= MAX_MANEUVER_WINDOW_SECS {
                if (smoothed[j] - smoothed[i]).abs() >= params.min_tack_angle_change {
                    exit = Some(j);
                    break;
                }
                j += 1;
            }

            let Some(mut exit) = exit else {
                i += 1;
                continue;
            };

            // Trim the steady lead-in: advance entry while the turn still
            // clears the threshold from a later start.
            let mut entry = i;
            while entry + 1 < exit
                && (smoothed[exit] - smoothed[entry + 1]).abs() >= params.min_tack_angle_change
            {
                entry += 1;
            }

            // Extend the exit while the turn keeps going the same way.
            let turn_sign = (smoothed[exit] - smoothed[entry]).signum();
            while exit + 1 < n
                && (smoothed[exit + 1] - smoothed[exit]) * turn_sign > 0.1
                && elapsed(entry, exit + 1) <= MAX_MANEUVER_WINDOW_SECS
            {
                exit += 1;
            }

            let start_speed = speeds[entry];
            if start_speed >= params.min_speed_threshold {
                let (min_idx, min_speed) = (entry..=exit)
                    .map(|k| (k, speeds[k]))
                    .min_by(|a, b| a.1.total_cmp(&b.1))
                    .unwrap_or((entry, start_speed));

                let speed_ratio = if start_speed > 0.0 {
                    (min_speed / start_speed).clamp(0.0, 1.0)
                } else {
                    1.0
                };

                let mut maneuver = Maneuver {
                    timestamp: timestamps[min_idx],
                    maneuver_type: ManeuverType::Unknown,
                    duration_seconds: elapsed(entry, exit),
                    start_heading: courses[entry],
                    end_heading: courses[exit],
                    heading_change: (smoothed[exit] - smoothed[entry]).abs(),
                    start_speed,
                    min_speed,
                    end_speed: speeds[exit],
                    speed_ratio,
                    latitude: track.track.latitudes[min_idx],
                    longitude: track.track.longitudes[min_idx],
                };
                if let Some(wind) = provisional_wind {
                    maneuver.maneuver_type = classify_maneuver(&maneuver, wind);
                }
                maneuvers.push(maneuver);
            }

            i = exit + 1;
        }

        debug!(count = maneuvers.len(), "Maneuver detection complete");
        maneuvers
    }

    // ------------------------------------------------------------------
    // Estimation from maneuvers
    // ------------------------------------------------------------------

    fn estimate_from_maneuvers(
        &self,
        track: &ProcessedTrack,
        maneuvers: &[Maneuver],
        params: &WindParams,
        boat_type: &str,
    ) -> WindEstimate {
        if maneuvers.is_empty() {
            return WindEstimate {
                method: WindMethod::Maneuvers,
                ..WindEstimate::unknown()
            };
        }

        // Classified bisectors vote directly: a tack bisector points into the
        // wind, a jibe bisector directly away from it.
        let mut candidates = Vec::new();
        let mut weights = Vec::new();
        let mut ratios = Vec::new();
        for maneuver in maneuvers {
            let bisector = maneuver_bisector(maneuver);
            let candidate = match maneuver.maneuver_type {
                ManeuverType::Tack => bisector,
                ManeuverType::Jibe => normalize_course(bisector + 180.0),
                ManeuverType::Unknown => continue,
            };
            candidates.push(candidate);
            weights.push(maneuver.speed_ratio.max(0.1));
            ratios.push(maneuver.speed_ratio);
        }

        // No classified maneuvers: fall back to the bisector axis with the
        // slow side of the track taken as upwind.
        if candidates.is_empty() {
            return self.estimate_from_bisector_axis(track, maneuvers, params, boat_type);
        }

        let Some((direction, tightness)) = circular_mean_deg(&candidates, &weights) else {
            return self.estimate_from_bisector_axis(track, maneuvers, params, boat_type);
        };

        let mean_ratio = ratios.as_slice().mean().clamp(0.0, 1.0);
        let sample_factor = (candidates.len() as f64 / CONFIDENCE_SATURATION_COUNT).min(1.0);
        let confidence = 0.45 * sample_factor + 0.35 * tightness + 0.20 * mean_ratio;

        let (speed_kn, _) = wind_speed_magnitude(track, params, boat_type);

        WindEstimate {
            direction_deg: direction,
            speed_kn,
            confidence: confidence.clamp(0.0, 1.0),
            method: WindMethod::Maneuvers,
        }
    }

    /// Axial fallback: cluster bisectors modulo 180, then pick the half-axis
    /// whose neighborhood sails slower (that side faces the wind).
    fn estimate_from_bisector_axis(
        &self,
        track: &ProcessedTrack,
        maneuvers: &[Maneuver],
        params: &WindParams,
        boat_type: &str,
    ) -> WindEstimate {
        let doubled: Vec<f64> = maneuvers
            .iter()
            .map(|m| normalize_course(maneuver_bisector(m) * 2.0))
            .collect();
        let weights: Vec<f64> = maneuvers.iter().map(|m| m.speed_ratio.max(0.1)).collect();

        let Some((doubled_mean, tightness)) = circular_mean_deg(&doubled, &weights) else {
            return WindEstimate {
                method: WindMethod::Maneuvers,
                ..WindEstimate::unknown()
            };
        };
        let axis = normalize_course(doubled_mean / 2.0);
        let anti_axis = normalize_course(axis + 180.0);

        let mean_speed_near = |direction: f64| -> Option<f64> {
            let speeds: Vec<f64> = track
                .track
                .courses
                .iter()
                .zip(&track.track.speeds)
                .filter(|(course, speed)| {
                    **speed >= params.min_speed_threshold
                        && unsigned_angle_between(**course, direction) <= params.upwind_threshold
                })
                .map(|(_, speed)| *speed)
                .collect();
            (!speeds.is_empty()).then(|| speeds.as_slice().mean())
        };

        let direction = match (mean_speed_near(axis), mean_speed_near(anti_axis)) {
            (Some(a), Some(b)) if b < a => anti_axis,
            (Some(_), Some(_)) | (Some(_), None) => axis,
            (None, Some(_)) => anti_axis,
            (None, None) => axis,
        };

        let mean_ratio = maneuvers
            .iter()
            .map(|m| m.speed_ratio)
            .collect::<Vec<_>>()
            .as_slice()
            .mean()
            .clamp(0.0, 1.0);
        let sample_factor = (maneuvers.len() as f64 / CONFIDENCE_SATURATION_COUNT).min(1.0);
        // Halved tightness term: axial clustering cannot tell wind from
        // anti-wind by itself.
        let confidence = 0.45 * sample_factor + 0.175 * tightness + 0.20 * mean_ratio;

        let (speed_kn, _) = wind_speed_magnitude(track, params, boat_type);

        WindEstimate {
            direction_deg: direction,
            speed_kn,
            confidence: confidence.clamp(0.0, 1.0),
            method: WindMethod::Maneuvers,
        }
    }

    // ------------------------------------------------------------------
    // Estimation from course/speed
    // ------------------------------------------------------------------

    fn estimate_from_course_speed(
        &self,
        track: &ProcessedTrack,
        params: &WindParams,
        boat_type: &str,
    ) -> WindEstimate {
        let usable: Vec<(f64, f64)> = track
            .track
            .courses
            .iter()
            .zip(&track.track.speeds)
            .filter(|(_, speed)| **speed >= params.min_speed_threshold)
            .map(|(course, speed)| (*course, *speed))
            .collect();

        if usable.len() < 10 {
            return WindEstimate::unknown();
        }

        let overall_mean: f64 = usable.iter().map(|(_, s)| *s).sum::<f64>() / usable.len() as f64;

        // Scan candidate wind directions in 5-degree steps for the one that
        // maximizes downwind-minus-upwind mean speed.
        let mut best: Option<(f64, f64)> = None;
        let mut direction = 0.0;
        while direction < 360.0 {
            let mut upwind = Vec::new();
            let mut downwind = Vec::new();
            for (course, speed) in &usable {
                let angle = unsigned_angle_between(*course, direction);
                if angle <= params.upwind_threshold {
                    upwind.push(*speed);
                } else if angle >= params.downwind_threshold {
                    downwind.push(*speed);
                }
            }
            if upwind.len() >= 3 && downwind.len() >= 3 {
                let separation = downwind.as_slice().mean() - upwind.as_slice().mean();
                if best.map_or(true, |(_, s)| separation > s) {
                    best = Some((direction, separation));
                }
            }
            direction += 5.0;
        }

        let (speed_kn, polar_informed) = wind_speed_magnitude(track, params, boat_type);
        let method = if polar_informed {
            WindMethod::Polar
        } else {
            WindMethod::CourseSpeed
        };

        match best {
            Some((direction, separation)) if separation > 0.0 => {
                let normalized = if overall_mean > 0.0 {
                    (separation / overall_mean).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                WindEstimate {
                    direction_deg: direction,
                    speed_kn,
                    confidence: 0.3 * normalized,
                    method,
                }
            }
            _ => {
                // No symmetric split: use the slowest 10-degree heading bin
                // as a weak upwind indicator.
                let mut bin_speeds: Vec<Vec<f64>> = vec![Vec::new(); 36];
                for (course, speed) in &usable {
                    let bin = ((course / 10.0) as usize).min(35);
                    bin_speeds[bin].push(*speed);
                }
                let slowest = bin_speeds
                    .iter()
                    .enumerate()
                    .filter(|(_, speeds)| speeds.len() >= 3)
                    .min_by(|a, b| {
                        a.1.as_slice()
                            .mean()
                            .total_cmp(&b.1.as_slice().mean())
                    })
                    .map(|(bin, _)| bin as f64 * 10.0 + 5.0);

                match slowest {
                    Some(direction) => WindEstimate {
                        direction_deg: direction,
                        speed_kn,
                        confidence: 0.05,
                        method,
                    },
                    None => WindEstimate::unknown(),
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Derived queries
    // ------------------------------------------------------------------

    /// Optimal VMG angles/targets for a wind speed and boat type.
    pub fn optimal_vmg_angles(&self, wind_speed: f64, boat_type: &str) -> OptimalVmg {
        polar::optimal_vmg_angles(wind_speed, boat_type)
    }

    /// Tack/jibe performance stats over the detected maneuvers.
    pub fn maneuver_performance(&self, maneuvers: &[Maneuver]) -> ManeuverPerformance {
        let class_stats = |class: ManeuverType| -> ManeuverClassPerformance {
            let of_class: Vec<&Maneuver> = maneuvers
                .iter()
                .filter(|m| m.maneuver_type == class)
                .collect();
            if of_class.is_empty() {
                return ManeuverClassPerformance::default();
            }
            let durations: Vec<f64> = of_class.iter().map(|m| m.duration_seconds).collect();
            let ratios: Vec<f64> = of_class.iter().map(|m| m.speed_ratio).collect();
            ManeuverClassPerformance {
                count: of_class.len(),
                avg_speed_ratio: Some(ratios.as_slice().mean()),
                avg_duration: Some(durations.as_slice().mean()),
                min_duration: durations.iter().copied().reduce(f64::min),
                max_duration: durations.iter().copied().reduce(f64::max),
            }
        };

        let tacks = class_stats(ManeuverType::Tack);
        let jibes = class_stats(ManeuverType::Jibe);
        ManeuverPerformance {
            maneuver_count: maneuvers.len(),
            tack_count: tacks.count,
            jibe_count: jibes.count,
            tacks,
            jibes,
        }
    }

    /// Course histogram and sailing-mode split against an estimated wind.
    pub fn wind_direction_distribution(
        &self,
        track: &ProcessedTrack,
        wind_direction: f64,
    ) -> WindDirectionDistribution {
        let params = self.params();
        let mut histogram = vec![0usize; 36];
        let (mut upwind, mut reach, mut downwind) = (0usize, 0usize, 0usize);

        for course in &track.track.courses {
            let bin = ((course / 10.0) as usize).min(35);
            histogram[bin] += 1;

            let angle = unsigned_angle_between(*course, wind_direction);
            if angle <= params.upwind_threshold {
                upwind += 1;
            } else if angle >= params.downwind_threshold {
                downwind += 1;
            } else {
                reach += 1;
            }
        }

        let total = track.len().max(1) as f64;
        WindDirectionDistribution {
            course_histogram: histogram,
            angle_bins: (0..36).map(|i| i as f64 * 10.0 + 5.0).collect(),
            wind_direction,
            upwind_percentage: upwind as f64 / total * 100.0,
            reach_percentage: reach as f64 / total * 100.0,
            downwind_percentage: downwind as f64 / total * 100.0,
            upwind_threshold: params.upwind_threshold,
            downwind_threshold: params.downwind_threshold,
        }
    }
}

/// Bisector of entry/exit headings along the turn direction.
fn maneuver_bisector(maneuver: &Maneuver) -> f64 {
    let turn = signed_angle_delta(maneuver.end_heading, maneuver.start_heading);
    normalize_course(maneuver.start_heading + turn / 2.0)
}

/// Classify a maneuver by where its bisector sits relative to the wind.
fn classify_maneuver(maneuver: &Maneuver, wind_direction: f64) -> ManeuverType {
    let bisector = maneuver_bisector(maneuver);
    let offset = unsigned_angle_between(bisector, wind_direction);
    if offset <= CLASSIFY_TACK_CONE {
        ManeuverType::Tack
    } else if offset >= CLASSIFY_JIBE_CONE {
        ManeuverType::Jibe
    } else {
        ManeuverType::Unknown
    }
}

/// Wind speed magnitude from the fast end of the boat-speed distribution.
///
/// Top-decile boat speed against the boat-type polar when available
/// (`polar_informed = true`), otherwise a linear proxy.
fn wind_speed_magnitude(
    track: &ProcessedTrack,
    params: &WindParams,
    boat_type: &str,
) -> (f64, bool) {
    let mut speeds: Vec<f64> = track
        .track
        .speeds
        .iter()
        .copied()
        .filter(|s| *s >= params.min_speed_threshold)
        .collect();
    if speeds.is_empty() {
        speeds = track.track.speeds.clone();
    }
    if speeds.is_empty() {
        return (0.0, false);
    }

    speeds.sort_by(f64::total_cmp);
    let decile_start = (speeds.len() * 9) / 10;
    let top_decile = &speeds[decile_start.min(speeds.len() - 1)..];
    let observed = top_decile.iter().sum::<f64>() / top_decile.len() as f64;

    match polar::wind_speed_from_boat_speed(observed, boat_type) {
        Some(wind_speed) => (wind_speed, true),
        None => (observed * LINEAR_WIND_PROXY_FACTOR, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sample;
    use chrono::{TimeZone, Utc};

    fn make_track(samples: Vec<Sample>) -> ProcessedTrack {
        let mut track = crate::types::Track::with_capacity(samples.len());
        for sample in samples {
            track.push(sample);
        }
        let mut time_diffs = vec![0.0];
        for pair in track.timestamps.windows(2) {
            time_diffs.push((pair[1] - pair[0]).num_milliseconds() as f64 / 1000.0);
        }
        let speeds_smooth = track.speeds.clone();
        ProcessedTrack {
            track,
            time_diffs,
            speeds_smooth,
        }
    }

    fn sample(secs: i64, course: f64, speed: f64) -> Sample {
        Sample {
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("valid ts"),
            latitude: 35.6 + secs as f64 * 1e-5,
            longitude: 139.7,
            course,
            speed,
        }
    }

    /// Beat to windward against a 0-degree wind: legs at 45 and 315 with
    /// tacks through the bow every 60 samples.
    fn beating_track() -> ProcessedTrack {
        let mut samples = Vec::new();
        let mut t = 0i64;
        for leg in 0..6 {
            let course = if leg % 2 == 0 { 45.0 } else { 315.0 };
            for k in 0..60 {
                // Slow down through the first seconds after each tack.
                let speed = if k < 4 { 3.5 + k as f64 * 0.5 } else { 5.5 };
                samples.push(sample(t, course, speed));
                t += 1;
            }
        }
        make_track(samples)
    }

    fn estimator() -> WindEstimator {
        WindEstimator::new(Arc::new(ParameterRegistry::new()))
    }

    #[test]
    fn detects_tacks_on_beating_track() {
        let track = beating_track();
        let maneuvers = estimator().detect_maneuvers(&track, Some(0.0));
        assert!(
            (4..=6).contains(&maneuvers.len()),
            "expected ~5 maneuvers, got {}",
            maneuvers.len()
        );
        assert!(maneuvers
            .iter()
            .all(|m| m.maneuver_type == ManeuverType::Tack));
        for m in &maneuvers {
            assert!(m.heading_change >= 60.0);
            assert!(m.speed_ratio <= 1.0 && m.speed_ratio > 0.0);
        }
    }

    #[test]
    fn wind_from_maneuvers_points_upwind() {
        let track = beating_track();
        let result = estimator()
            .estimate(&track, "default")
            .expect("estimation succeeds");

        assert!(
            unsigned_angle_between(result.wind.direction_deg, 0.0) <= 20.0,
            "wind direction {} not near 0",
            result.wind.direction_deg
        );
        assert!(result.wind.confidence > 0.3);
        assert_eq!(result.wind.method, WindMethod::Maneuvers);
        assert!(result.wind.speed_kn > 0.0);
    }

    #[test]
    fn smoothing_window_larger_than_track_falls_back() {
        let registry = Arc::new(ParameterRegistry::new());
        registry
            .set("wind_smoothing_window", serde_json::json!(20))
            .expect("valid");
        let estimator = WindEstimator::new(registry);

        // 12 samples < window of 20: no maneuvers detectable.
        let samples: Vec<Sample> = (0..12)
            .map(|i| sample(i, if i < 6 { 45.0 } else { 315.0 }, 5.0))
            .collect();
        let track = make_track(samples);

        let maneuvers = estimator.detect_maneuvers(&track, None);
        assert!(maneuvers.is_empty());

        let result = estimator.estimate(&track, "default").expect("estimate");
        assert_ne!(result.wind.method, WindMethod::Maneuvers);
        assert!(result.wind.confidence <= 0.3);
    }

    #[test]
    fn steady_course_yields_no_maneuvers() {
        let samples: Vec<Sample> = (0..120).map(|i| sample(i, 90.0, 6.0)).collect();
        let track = make_track(samples);
        let maneuvers = estimator().detect_maneuvers(&track, None);
        assert!(maneuvers.is_empty());
    }

    #[test]
    fn estimate_uses_cache_on_second_call() {
        let registry = Arc::new(ParameterRegistry::new());
        let cache = Arc::new(AnalysisCache::new());
        let estimator = WindEstimator::new(registry).with_cache(Arc::clone(&cache));

        let track = beating_track();
        let first = estimator.estimate(&track, "default").expect("estimate");
        let second = estimator.estimate(&track, "default").expect("estimate");

        // Identical including the embedded timestamp: the second call came
        // from the cache.
        assert_eq!(first, second);
        assert!(cache.stats().hit_count >= 1);
    }

    #[test]
    fn maneuver_performance_aggregates() {
        let track = beating_track();
        let est = estimator();
        let maneuvers = est.detect_maneuvers(&track, Some(0.0));
        let perf = est.maneuver_performance(&maneuvers);

        assert_eq!(perf.maneuver_count, maneuvers.len());
        assert_eq!(perf.tack_count, maneuvers.len());
        assert_eq!(perf.jibe_count, 0);
        assert!(perf.tacks.avg_speed_ratio.expect("tacks present") < 1.0);
    }

    #[test]
    fn direction_distribution_percentages_sum() {
        let track = beating_track();
        let dist = estimator().wind_direction_distribution(&track, 0.0);
        let total = dist.upwind_percentage + dist.reach_percentage + dist.downwind_percentage;
        assert!((total - 100.0).abs() < 1e-6);
        assert!(dist.upwind_percentage > 90.0, "beating track is upwind");
        assert_eq!(dist.course_histogram.iter().sum::<usize>(), track.len());
    }
}
