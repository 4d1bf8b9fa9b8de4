//! Performance analysis kernel.
//!
//! Overlays the wind estimate onto the track, computes descriptive and VMG
//! statistics, maneuver efficiency and a 100-point composite score:
//!
//! | component         | weight | formula                                        |
//! |-------------------|--------|------------------------------------------------|
//! | upwind VMG ratio  | 20     | `clamp(max_vmg / optimal_vmg, 0, 1) * 100`     |
//! | downwind VMG ratio| 20     | symmetric                                      |
//! | speed consistency | 30     | `clamp((0.30 - cv) / 0.20, 0, 1) * 100`        |
//! | tack efficiency   | 15     | `clamp((0.70 - loss) / 0.40, 0, 1) * 100`      |
//! | jibe efficiency   | 15     | symmetric                                      |
//!
//! A component without enough data contributes zero points.

use std::sync::Arc;

use statrs::statistics::{Data, OrderStatistics, Statistics};
use tracing::{debug, warn};

use crate::cache::{track_fingerprint, AnalysisCache};
use crate::params::{ParameterNamespace, ParameterRegistry};
use crate::types::{
    AngleVmgBin, BasicStats, ManeuverAnalysis, ManeuverClassStats, ManeuverType,
    OverallPerformance, PerformanceResult, ProcessedTrack, SailingMode, SailingModePercentage,
    SailingModeTime, SpeedStats, TimeSeries, VmgAnalysis, VmgModeAnalysis, VmgStats, WindResult,
};

use super::geo::{cumulative_distance_m, signed_angle_delta};
use super::{polar, AnalysisError};

/// Fewest samples for meaningful statistics.
const MIN_STAT_SAMPLES: usize = 10;

/// Fewest samples per 5-degree bin in the angle/VMG profile.
const MIN_BIN_SAMPLES: usize = 5;

/// Longest time series handed to consumers.
const MAX_TIME_SERIES_POINTS: usize = 1000;

/// Cache TTL for analysis results (seconds).
const PERFORMANCE_CACHE_TTL_SECS: i64 = 3600;

/// Component labels used in the narrative.
const COMPONENT_LABELS: [&str; 5] = [
    "upwind VMG",
    "downwind VMG",
    "speed consistency",
    "tack efficiency",
    "jibe efficiency",
];

/// Snapshot of the parameters the analyzer reads.
#[derive(Debug, Clone, Copy)]
struct PerformanceParams {
    performance_window_size: usize,
    vmg_reference_enabled: bool,
    maneuver_analysis_enabled: bool,
    upwind_threshold: f64,
    downwind_threshold: f64,
}

/// Per-sample wind overlay computed before the statistics passes.
struct WindOverlay {
    rel_wind_angle: Vec<f64>,
    sailing_mode: Vec<SailingMode>,
    upwind_vmg: Vec<Option<f64>>,
    downwind_vmg: Vec<Option<f64>>,
}

/// Performance analysis kernel.
pub struct PerformanceAnalyzer {
    registry: Arc<ParameterRegistry>,
    cache: Option<Arc<AnalysisCache>>,
}

impl PerformanceAnalyzer {
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

    fn params(&self) -> PerformanceParams {
        PerformanceParams {
            performance_window_size: self
                .registry
                .get_usize("performance_window_size")
                .unwrap_or(10),
            vmg_reference_enabled: self.registry.get_bool("vmg_reference_enabled").unwrap_or(true),
            maneuver_analysis_enabled: self
                .registry
                .get_bool("maneuver_analysis_enabled")
                .unwrap_or(true),
            upwind_threshold: self.registry.get_f64("upwind_threshold").unwrap_or(45.0),
            downwind_threshold: self.registry.get_f64("downwind_threshold").unwrap_or(120.0),
        }
    }

    // ------------------------------------------------------------------
    // Entry point
    // ------------------------------------------------------------------

    /// Analyze performance, memoized on track fingerprint, parameter snapshot
    /// and the wind estimate.
    pub fn analyze(
        &self,
        track: &ProcessedTrack,
        wind: &WindResult,
    ) -> Result<PerformanceResult, AnalysisError> {
        if track.is_empty() {
            return Err(AnalysisError::EmptyTrack);
        }

        let Some(cache) = &self.cache else {
            return self.perform_analysis(track, wind);
        };

        let cache_params = serde_json::json!({
            "data_hash": track_fingerprint(&track.track),
            "boat_type": wind.boat_type,
            "performance_params": self
                .registry
                .get_by_namespace(ParameterNamespace::PerformanceAnalysis),
            "wind": {
                "direction": wind.wind.direction_deg,
                "speed": wind.wind.speed_kn,
            },
        });

        let cached = cache.compute_from_params(
            "performance_analysis",
            &cache_params,
            |_| {
                self.perform_analysis(track, wind)
                    .and_then(|result| serde_json::to_value(&result).map_err(AnalysisError::from))
            },
            Some(PERFORMANCE_CACHE_TTL_SECS),
        )?;

        match serde_json::from_value::<PerformanceResult>(cached) {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(error = %e, "Cached performance result unusable, recomputing");
                self.perform_analysis(track, wind)
            }
        }
    }

    fn perform_analysis(
        &self,
        track: &ProcessedTrack,
        wind: &WindResult,
    ) -> Result<PerformanceResult, AnalysisError> {
        let params = self.params();
        let overlay = wind_overlay(track, wind.wind.direction_deg, &params);

        let basic_stats = self.basic_statistics(track, &overlay);
        let vmg_analysis = self.vmg_analysis(track, &overlay, wind, &params);
        let maneuver_analysis = self.maneuver_analysis(wind, &params);
        let time_series = self.time_series(track, &overlay, &params);

        let overall_performance =
            overall_performance(&basic_stats, &vmg_analysis, &maneuver_analysis);

        debug!(
            score = overall_performance.score,
            rating = %overall_performance.rating,
            "Performance analysis complete"
        );

        Ok(PerformanceResult {
            basic_stats,
            vmg_analysis,
            maneuver_analysis,
            time_series,
            overall_performance,
            wind: Some(wind.wind.clone()),
            boat_type: wind.boat_type.clone(),
        })
    }

    // ------------------------------------------------------------------
    // Basic statistics
    // ------------------------------------------------------------------

    fn basic_statistics(&self, track: &ProcessedTrack, overlay: &WindOverlay) -> BasicStats {
        let n = track.len();
        if n < MIN_STAT_SAMPLES {
            return BasicStats {
                data_points: n,
                insufficient_data: true,
                ..BasicStats::default()
            };
        }

        let speeds = &track.track.speeds;
        let mut ordered = Data::new(speeds.clone());
        let speed = SpeedStats {
            mean: speeds.as_slice().mean(),
            max: speeds.iter().copied().fold(f64::MIN, f64::max),
            min: speeds.iter().copied().fold(f64::MAX, f64::min),
            std: speeds.as_slice().std_dev(),
            median: ordered.median(),
            percentile_75: ordered.percentile(75),
            percentile_90: ordered.percentile(90),
        };

        let upwind: Vec<f64> = overlay.upwind_vmg.iter().flatten().copied().collect();
        let downwind: Vec<f64> = overlay.downwind_vmg.iter().flatten().copied().collect();
        let vmg = VmgStats {
            upwind_mean: (!upwind.is_empty()).then(|| upwind.as_slice().mean()),
            upwind_max: upwind.iter().copied().reduce(f64::max),
            downwind_mean: (!downwind.is_empty()).then(|| downwind.as_slice().mean()),
            downwind_max: downwind.iter().copied().reduce(f64::max),
        };

        let mut mode_time = SailingModeTime::default();
        for (mode, dt) in overlay.sailing_mode.iter().zip(&track.time_diffs) {
            match mode {
                SailingMode::Upwind => mode_time.upwind_seconds += dt,
                SailingMode::Reach => mode_time.reach_seconds += dt,
                SailingMode::Downwind => mode_time.downwind_seconds += dt,
            }
        }
        let total_time =
            mode_time.upwind_seconds + mode_time.reach_seconds + mode_time.downwind_seconds;
        let mode_percentage = if total_time > 0.0 {
            SailingModePercentage {
                upwind: mode_time.upwind_seconds / total_time * 100.0,
                reach: mode_time.reach_seconds / total_time * 100.0,
                downwind: mode_time.downwind_seconds / total_time * 100.0,
            }
        } else {
            SailingModePercentage::default()
        };

        BasicStats {
            data_points: n,
            insufficient_data: false,
            duration_seconds: track.duration_seconds(),
            speed: Some(speed),
            vmg: Some(vmg),
            sailing_mode_time: Some(mode_time),
            sailing_mode_percentage: Some(mode_percentage),
            distance_m: Some(cumulative_distance_m(
                &track.track.latitudes,
                &track.track.longitudes,
            )),
        }
    }

    // ------------------------------------------------------------------
    // VMG analysis
    // ------------------------------------------------------------------

    fn vmg_analysis(
        &self,
        track: &ProcessedTrack,
        overlay: &WindOverlay,
        wind: &WindResult,
        params: &PerformanceParams,
    ) -> VmgAnalysis {
        let optimal = params
            .vmg_reference_enabled
            .then(|| polar::optimal_vmg_angles(wind.wind.speed_kn, &wind.boat_type));

        let upwind = mode_vmg_analysis(
            track,
            overlay,
            SailingMode::Upwind,
            optimal.map(|o| o.upwind_angle),
            optimal.and_then(|o| o.upwind_vmg),
        );
        let downwind = mode_vmg_analysis(
            track,
            overlay,
            SailingMode::Downwind,
            optimal.map(|o| o.downwind_angle),
            optimal.and_then(|o| o.downwind_vmg),
        );

        VmgAnalysis {
            insufficient_data: upwind.insufficient_data && downwind.insufficient_data,
            upwind,
            downwind,
        }
    }

    // ------------------------------------------------------------------
    // Maneuver analysis
    // ------------------------------------------------------------------

    fn maneuver_analysis(&self, wind: &WindResult, params: &PerformanceParams) -> ManeuverAnalysis {
        let maneuvers = &wind.detected_maneuvers;
        if !params.maneuver_analysis_enabled || maneuvers.is_empty() {
            return ManeuverAnalysis {
                maneuver_count: maneuvers.len(),
                insufficient_data: true,
                ..ManeuverAnalysis::default()
            };
        }

        let class_stats = |class: ManeuverType| -> ManeuverClassStats {
            let durations: Vec<f64> = maneuvers
                .iter()
                .filter(|m| m.maneuver_type == class)
                .map(|m| m.duration_seconds)
                .collect();
            let losses: Vec<f64> = maneuvers
                .iter()
                .filter(|m| m.maneuver_type == class)
                .map(|m| 1.0 - m.speed_ratio)
                .collect();
            if durations.is_empty() {
                return ManeuverClassStats::default();
            }
            ManeuverClassStats {
                count: durations.len(),
                avg_duration: Some(durations.as_slice().mean()),
                min_duration: durations.iter().copied().reduce(f64::min),
                max_duration: durations.iter().copied().reduce(f64::max),
                avg_speed_loss: Some(losses.as_slice().mean()),
            }
        };

        let tacks = class_stats(ManeuverType::Tack);
        let jibes = class_stats(ManeuverType::Jibe);
        let unknown_count = maneuvers
            .iter()
            .filter(|m| m.maneuver_type == ManeuverType::Unknown)
            .count();

        ManeuverAnalysis {
            maneuver_count: maneuvers.len(),
            insufficient_data: false,
            tack_count: tacks.count,
            jibe_count: jibes.count,
            unknown_count,
            tacks,
            jibes,
        }
    }

    // ------------------------------------------------------------------
    // Time series
    // ------------------------------------------------------------------

    fn time_series(
        &self,
        track: &ProcessedTrack,
        overlay: &WindOverlay,
        params: &PerformanceParams,
    ) -> TimeSeries {
        let n = track.len();
        if n < MIN_STAT_SAMPLES {
            return TimeSeries {
                insufficient_data: true,
                ..TimeSeries::default()
            };
        }

        let window = params.performance_window_size.max(1);
        let speed_smooth = rolling_mean_strict(
            &track.track.speeds.iter().map(|s| Some(*s)).collect::<Vec<_>>(),
            window,
        );
        let upwind_smooth = rolling_mean_strict(&overlay.upwind_vmg, window);
        let downwind_smooth = rolling_mean_strict(&overlay.downwind_vmg, window);

        // Even downsampling to the charting budget.
        let indices: Vec<usize> = if n > MAX_TIME_SERIES_POINTS {
            (0..MAX_TIME_SERIES_POINTS)
                .map(|k| k * (n - 1) / (MAX_TIME_SERIES_POINTS - 1))
                .collect()
        } else {
            (0..n).collect()
        };

        TimeSeries {
            insufficient_data: false,
            timestamps: indices.iter().map(|&i| track.track.timestamps[i]).collect(),
            speed: indices.iter().map(|&i| speed_smooth[i]).collect(),
            course: indices.iter().map(|&i| track.track.courses[i]).collect(),
            rel_wind_angle: indices.iter().map(|&i| overlay.rel_wind_angle[i]).collect(),
            sailing_mode: indices.iter().map(|&i| overlay.sailing_mode[i]).collect(),
            upwind_vmg: indices.iter().map(|&i| upwind_smooth[i]).collect(),
            downwind_vmg: indices.iter().map(|&i| downwind_smooth[i]).collect(),
            window_size: window,
        }
    }

    // ------------------------------------------------------------------
    // Recommendations (supplementary)
    // ------------------------------------------------------------------

    /// Textual VMG coaching notes derived from the angle/VMG profile.
    pub fn vmg_recommendations(&self, vmg: &VmgAnalysis) -> Vec<String> {
        let mut recommendations = Vec::new();

        for (label, mode) in [("upwind", &vmg.upwind), ("downwind", &vmg.downwind)] {
            if mode.insufficient_data {
                continue;
            }
            let (Some(best), Some(optimal)) = (mode.best_angle, mode.optimal_angle) else {
                continue;
            };
            let deviation = best - optimal;
            if deviation.abs() > 10.0 {
                let direction = if deviation > 0.0 { "tighter" } else { "wider" };
                recommendations.push(format!(
                    "Sailing {label}, a {:.0} deg {direction} angle than your observed best \
                     ({best:.0} deg) should improve VMG",
                    deviation.abs()
                ));
            } else {
                recommendations.push(format!(
                    "Your {label} angle ({best:.0} deg) is close to optimal"
                ));
            }
        }

        if recommendations.is_empty() {
            recommendations
                .push("Not enough upwind or downwind sailing to assess VMG angles".to_string());
        }
        recommendations
    }
}

// ============================================================================
// Free helpers
// ============================================================================

/// Compute the per-sample wind overlay.
fn wind_overlay(track: &ProcessedTrack, wind_direction: f64, params: &PerformanceParams) -> WindOverlay {
    let n = track.len();
    let mut rel_wind_angle = Vec::with_capacity(n);
    let mut sailing_mode = Vec::with_capacity(n);
    let mut upwind_vmg = Vec::with_capacity(n);
    let mut downwind_vmg = Vec::with_capacity(n);

    for i in 0..n {
        let rel = signed_angle_delta(track.track.courses[i], wind_direction);
        let speed = track.track.speeds[i];
        let mode = if rel.abs() <= params.upwind_threshold {
            SailingMode::Upwind
        } else if rel.abs() >= params.downwind_threshold {
            SailingMode::Downwind
        } else {
            SailingMode::Reach
        };

        rel_wind_angle.push(rel);
        sailing_mode.push(mode);
        upwind_vmg.push(
            (mode == SailingMode::Upwind).then(|| speed * rel.to_radians().cos()),
        );
        downwind_vmg.push(
            (mode == SailingMode::Downwind)
                .then(|| speed * (180.0 - rel.abs()).to_radians().cos().abs()),
        );
    }

    WindOverlay {
        rel_wind_angle,
        sailing_mode,
        upwind_vmg,
        downwind_vmg,
    }
}

/// Per-mode VMG statistics against the polar optimum.
fn mode_vmg_analysis(
    track: &ProcessedTrack,
    overlay: &WindOverlay,
    mode: SailingMode,
    optimal_angle: Option<f64>,
    optimal_vmg: Option<f64>,
) -> VmgModeAnalysis {
    let vmg_series = match mode {
        SailingMode::Upwind => &overlay.upwind_vmg,
        _ => &overlay.downwind_vmg,
    };

    let indices: Vec<usize> = (0..track.len())
        .filter(|&i| overlay.sailing_mode[i] == mode)
        .collect();

    if indices.len() < MIN_STAT_SAMPLES {
        return VmgModeAnalysis {
            data_points: indices.len(),
            insufficient_data: true,
            optimal_angle,
            optimal_vmg,
            ..VmgModeAnalysis::default()
        };
    }

    let vmg_values: Vec<f64> = indices.iter().filter_map(|&i| vmg_series[i]).collect();
    let angles: Vec<f64> = indices
        .iter()
        .map(|&i| overlay.rel_wind_angle[i].abs())
        .collect();

    // 5-degree angle bins with enough support.
    let mut bins: std::collections::BTreeMap<i64, Vec<f64>> = std::collections::BTreeMap::new();
    for &i in &indices {
        if let Some(vmg) = vmg_series[i] {
            let bin = (overlay.rel_wind_angle[i].abs() / 5.0).round() as i64 * 5;
            bins.entry(bin).or_default().push(vmg);
        }
    }
    let angle_vmg_bins: Vec<AngleVmgBin> = bins
        .into_iter()
        .filter(|(_, values)| values.len() >= MIN_BIN_SAMPLES)
        .map(|(angle, values)| {
            let std = if values.len() > 1 {
                values.as_slice().std_dev()
            } else {
                0.0
            };
            AngleVmgBin {
                angle: angle as f64,
                vmg: values.as_slice().mean(),
                count: values.len(),
                std,
            }
        })
        .collect();

    let best = angle_vmg_bins
        .iter()
        .max_by(|a, b| a.vmg.total_cmp(&b.vmg))
        .copied();

    let max_vmg = vmg_values.iter().copied().reduce(f64::max);
    let performance_ratio = match (max_vmg, optimal_vmg) {
        (Some(max), Some(optimal)) if optimal > 0.0 => Some(max / optimal),
        _ => None,
    };

    VmgModeAnalysis {
        data_points: indices.len(),
        insufficient_data: false,
        mean_vmg: (!vmg_values.is_empty()).then(|| vmg_values.as_slice().mean()),
        max_vmg,
        mean_angle: (!angles.is_empty()).then(|| angles.as_slice().mean()),
        optimal_vmg,
        optimal_angle,
        performance_ratio,
        angle_vmg_bins,
        best_angle: best.map(|b| b.angle),
        best_vmg: best.map(|b| b.vmg),
    }
}

/// Rolling centered mean that goes `None` when any window slot is `None` or
/// the window does not fit (pandas-style strict rolling).
fn rolling_mean_strict(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let n = values.len();
    if window <= 1 {
        return values.to_vec();
    }
    if window > n {
        return vec![None; n];
    }
    let half_left = (window - 1) / 2;
    let half_right = window / 2;
    (0..n)
        .map(|i| {
            if i < half_left || i + half_right >= n {
                return None;
            }
            let slice = &values[i - half_left..=i + half_right];
            let mut sum = 0.0;
            for value in slice {
                sum += (*value)?;
            }
            Some(sum / slice.len() as f64)
        })
        .collect()
}

/// Composite 100-point score with rating and narrative.
fn overall_performance(
    basic: &BasicStats,
    vmg: &VmgAnalysis,
    maneuvers: &ManeuverAnalysis,
) -> OverallPerformance {
    // Component scores on a 0-100 scale; None = insufficient data.
    let upwind_component = vmg
        .upwind
        .performance_ratio
        .map(|ratio| ratio.clamp(0.0, 1.0) * 100.0);
    let downwind_component = vmg
        .downwind
        .performance_ratio
        .map(|ratio| ratio.clamp(0.0, 1.0) * 100.0);

    let consistency_component = basic.speed.and_then(|speed| {
        (speed.mean > 0.0).then(|| {
            let cv = speed.std / speed.mean;
            ((0.30 - cv) / 0.20).clamp(0.0, 1.0) * 100.0
        })
    });

    let tack_component = maneuvers
        .tacks
        .avg_speed_loss
        .map(|loss| ((0.70 - loss) / 0.40).clamp(0.0, 1.0) * 100.0);
    let jibe_component = maneuvers
        .jibes
        .avg_speed_loss
        .map(|loss| ((0.70 - loss) / 0.40).clamp(0.0, 1.0) * 100.0);

    let components = [
        (upwind_component, 0.20),
        (downwind_component, 0.20),
        (consistency_component, 0.30),
        (tack_component, 0.15),
        (jibe_component, 0.15),
    ];

    // Missing components contribute zero.
    let score: f64 = components
        .iter()
        .map(|(component, weight)| component.unwrap_or(0.0) * weight)
        .sum();

    let mut strengths = Vec::new();
    let mut weaknesses = Vec::new();
    for ((component, _), label) in components.iter().zip(COMPONENT_LABELS) {
        match component {
            Some(value) if *value >= 80.0 => strengths.push(label.to_string()),
            Some(value) if *value < 60.0 => weaknesses.push(label.to_string()),
            _ => {}
        }
    }

    let rating = score_to_rating(score);
    let mut summary = format!("Overall performance is {rating} ({score:.1}/100).");
    if !strengths.is_empty() {
        summary.push_str(&format!(" Strengths: {}.", strengths.join(", ")));
    }
    if !weaknesses.is_empty() {
        summary.push_str(&format!(" Areas to improve: {}.", weaknesses.join(", ")));
    }
    if maneuvers.tack_count == 0 {
        summary.push_str(" No tacks were detected in this session.");
    } else if maneuvers.tack_count <= 2 {
        summary.push_str(&format!(
            " Only {} tack(s) detected; more tack practice may help.",
            maneuvers.tack_count
        ));
    }

    OverallPerformance {
        score,
        rating: rating.to_string(),
        summary,
        strengths,
        weaknesses,
    }
}

/// Rating buckets at {90, 80, 70, 60, 50, 40, 30}.
fn score_to_rating(score: f64) -> &'static str {
    if score >= 90.0 {
        "excellent"
    } else if score >= 80.0 {
        "very good"
    } else if score >= 70.0 {
        "good"
    } else if score >= 60.0 {
        "above average"
    } else if score >= 50.0 {
        "average"
    } else if score >= 40.0 {
        "needs improvement"
    } else if score >= 30.0 {
        "below average"
    } else {
        "more practice needed"
    }
}
