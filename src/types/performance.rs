//! Performance analysis result types.
//!
//! Metrics that cannot be computed from the available data are `None` and the
//! owning block sets `insufficient_data`; the composite score treats such
//! components as contributing zero points.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::wind::{SailingMode, WindEstimate};

/// Speed distribution over the processed track (knots).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeedStats {
    pub mean: f64,
    pub max: f64,
    pub min: f64,
    pub std: f64,
    pub median: f64,
    pub percentile_75: f64,
    pub percentile_90: f64,
}

/// Modal VMG aggregates (knots).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VmgStats {
    pub upwind_mean: Option<f64>,
    pub upwind_max: Option<f64>,
    pub downwind_mean: Option<f64>,
    pub downwind_max: Option<f64>,
}

/// Seconds spent on each point of sail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SailingModeTime {
    pub upwind_seconds: f64,
    pub reach_seconds: f64,
    pub downwind_seconds: f64,
}

/// Share of time on each point of sail (percent of the summed mode time).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SailingModePercentage {
    pub upwind: f64,
    pub reach: f64,
    pub downwind: f64,
}

/// Basic descriptive statistics for a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicStats {
    pub data_points: usize,
    pub insufficient_data: bool,
    pub duration_seconds: f64,
    pub speed: Option<SpeedStats>,
    pub vmg: Option<VmgStats>,
    pub sailing_mode_time: Option<SailingModeTime>,
    pub sailing_mode_percentage: Option<SailingModePercentage>,
    /// Cumulative great-circle distance sailed (meters).
    pub distance_m: Option<f64>,
}

/// Mean observed VMG within one 5-degree wind-angle bin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngleVmgBin {
    /// Bin center, unsigned degrees off the wind.
    pub angle: f64,
    pub vmg: f64,
    pub count: usize,
    pub std: f64,
}

/// Per-mode VMG analysis against the polar optimum.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VmgModeAnalysis {
    pub data_points: usize,
    pub insufficient_data: bool,
    pub mean_vmg: Option<f64>,
    pub max_vmg: Option<f64>,
    /// Mean unsigned wind angle sailed in this mode (degrees).
    pub mean_angle: Option<f64>,
    pub optimal_vmg: Option<f64>,
    pub optimal_angle: Option<f64>,
    /// `max_vmg / optimal_vmg` when both are available.
    pub performance_ratio: Option<f64>,
    /// Observed VMG by 5-degree angle bin (bins with >= 5 samples).
    pub angle_vmg_bins: Vec<AngleVmgBin>,
    /// Best observed bin, if any.
    pub best_angle: Option<f64>,
    pub best_vmg: Option<f64>,
}

/// Upwind + downwind VMG analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VmgAnalysis {
    pub insufficient_data: bool,
    pub upwind: VmgModeAnalysis,
    pub downwind: VmgModeAnalysis,
}

/// Duration/speed-loss aggregates for one maneuver class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ManeuverClassStats {
    pub count: usize,
    pub avg_duration: Option<f64>,
    pub min_duration: Option<f64>,
    pub max_duration: Option<f64>,
    /// Mean of `1 - speed_ratio` over the class.
    pub avg_speed_loss: Option<f64>,
}

/// Maneuver efficiency analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManeuverAnalysis {
    pub maneuver_count: usize,
    pub insufficient_data: bool,
    pub tack_count: usize,
    pub jibe_count: usize,
    pub unknown_count: usize,
    pub tacks: ManeuverClassStats,
    pub jibes: ManeuverClassStats,
}

/// Downsampled time series for charting (at most 1000 points).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub insufficient_data: bool,
    pub timestamps: Vec<DateTime<Utc>>,
    /// Moving-average speed; `None` where the window is incomplete.
    pub speed: Vec<Option<f64>>,
    pub course: Vec<f64>,
    pub rel_wind_angle: Vec<f64>,
    pub sailing_mode: Vec<SailingMode>,
    pub upwind_vmg: Vec<Option<f64>>,
    pub downwind_vmg: Vec<Option<f64>>,
    pub window_size: usize,
}

/// Composite score with narrative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverallPerformance {
    /// Composite score in [0, 100].
    pub score: f64,
    pub rating: String,
    pub summary: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
}

/// Full performance analysis output for a track.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceResult {
    pub basic_stats: BasicStats,
    pub vmg_analysis: VmgAnalysis,
    pub maneuver_analysis: ManeuverAnalysis,
    pub time_series: TimeSeries,
    pub overall_performance: OverallPerformance,
    pub wind: Option<WindEstimate>,
    pub boat_type: String,
}
