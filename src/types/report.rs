//! Final analysis report assembled by the report step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Track-level summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSummary {
    pub points: usize,
    pub duration_seconds: f64,
    /// Cumulative distance sailed (meters), when computed.
    pub distance_m: Option<f64>,
}

/// Wind estimate summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindSummary {
    pub direction_deg: f64,
    pub speed_kn: f64,
    pub confidence: f64,
}

/// Strategy detection counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategySummary {
    pub point_count: usize,
    pub wind_shift_count: usize,
    pub tack_point_count: usize,
    pub layline_count: usize,
}

/// Performance score summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub score: f64,
    pub rating: String,
    pub summary: String,
}

/// Report published under the `report` context key at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub timestamp: DateTime<Utc>,
    pub data_summary: DataSummary,
    pub wind_summary: WindSummary,
    pub strategy_summary: StrategySummary,
    pub performance_summary: PerformanceSummary,
}

impl Report {
    /// Equality ignoring the generation timestamp. Two runs over the same
    /// inputs must agree on everything else.
    pub fn same_content(&self, other: &Report) -> bool {
        self.data_summary == other.data_summary
            && self.wind_summary == other.wind_summary
            && self.strategy_summary == other.strategy_summary
            && self.performance_summary == other.performance_summary
    }
}
