//! Strategy point types.
//!
//! Strategy points are a tagged sum over the detected categories. Every
//! variant shares the envelope fields (`time`, position, `strategic_score`,
//! `note`); variant payloads carry the category-specific measurements. The
//! tag is serialized as `point_type` so downstream consumers can dispatch
//! without knowing the Rust enum.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tack the boat is on (wind over the named side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TackSide {
    Port,
    Starboard,
}

impl TackSide {
    pub fn opposite(self) -> Self {
        match self {
            TackSide::Port => TackSide::Starboard,
            TackSide::Starboard => TackSide::Port,
        }
    }
}

impl std::fmt::Display for TackSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TackSide::Port => write!(f, "port"),
            TackSide::Starboard => write!(f, "starboard"),
        }
    }
}

/// A strategic decision point on the track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "point_type", rename_all = "snake_case")]
pub enum StrategyPoint {
    /// Sustained change in true wind direction.
    WindShift {
        time: DateTime<Utc>,
        latitude: f64,
        longitude: f64,
        strategic_score: f64,
        note: String,
        /// Signed shift (positive = veer/right, negative = back/left).
        shift_angle: f64,
        before_direction: f64,
        after_direction: f64,
        wind_speed: f64,
        duration_seconds: f64,
    },
    /// Moment where crossing to the opposite tack improves VMG.
    Tack {
        time: DateTime<Utc>,
        latitude: f64,
        longitude: f64,
        strategic_score: f64,
        note: String,
        /// Tack the boat is currently on.
        tack_type: TackSide,
        suggested_tack: TackSide,
        /// Relative VMG improvement on the suggested tack.
        vmg_gain: f64,
        heading_before: f64,
        heading_after: f64,
    },
    /// The current heading fetches a mark within the safety margin.
    Layline {
        time: DateTime<Utc>,
        latitude: f64,
        longitude: f64,
        strategic_score: f64,
        note: String,
        mark_id: String,
        /// Great-circle distance to the mark (meters).
        distance_to_mark: f64,
        /// Wind angle of the approach course (degrees off the wind).
        approach_angle: f64,
        optimal_angle: f64,
        angle_difference: f64,
    },
    /// Closest approach inside the rounding radius of a mark.
    MarkRounding {
        time: DateTime<Utc>,
        latitude: f64,
        longitude: f64,
        strategic_score: f64,
        note: String,
        mark_id: String,
        rounding_side: super::RoundingSide,
        /// Distance at closest approach (meters).
        closest_distance: f64,
    },
}

impl StrategyPoint {
    pub fn time(&self) -> DateTime<Utc> {
        match self {
            StrategyPoint::WindShift { time, .. }
            | StrategyPoint::Tack { time, .. }
            | StrategyPoint::Layline { time, .. }
            | StrategyPoint::MarkRounding { time, .. } => *time,
        }
    }

    pub fn position(&self) -> (f64, f64) {
        match self {
            StrategyPoint::WindShift {
                latitude,
                longitude,
                ..
            }
            | StrategyPoint::Tack {
                latitude,
                longitude,
                ..
            }
            | StrategyPoint::Layline {
                latitude,
                longitude,
                ..
            }
            | StrategyPoint::MarkRounding {
                latitude,
                longitude,
                ..
            } => (*latitude, *longitude),
        }
    }

    pub fn strategic_score(&self) -> f64 {
        match self {
            StrategyPoint::WindShift {
                strategic_score, ..
            }
            | StrategyPoint::Tack {
                strategic_score, ..
            }
            | StrategyPoint::Layline {
                strategic_score, ..
            }
            | StrategyPoint::MarkRounding {
                strategic_score, ..
            } => *strategic_score,
        }
    }

    pub fn note(&self) -> &str {
        match self {
            StrategyPoint::WindShift { note, .. }
            | StrategyPoint::Tack { note, .. }
            | StrategyPoint::Layline { note, .. }
            | StrategyPoint::MarkRounding { note, .. } => note,
        }
    }
}

/// Categorized strategy detection output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyResult {
    /// Union of all categories, sorted ascending by time.
    pub all_points: Vec<StrategyPoint>,
    pub wind_shifts: Vec<StrategyPoint>,
    pub tack_points: Vec<StrategyPoint>,
    pub layline_points: Vec<StrategyPoint>,
    pub mark_roundings: Vec<StrategyPoint>,
    pub point_count: usize,
    pub wind_shift_count: usize,
    pub tack_point_count: usize,
    pub layline_count: usize,
    pub mark_rounding_count: usize,
}

impl StrategyResult {
    /// Assemble a result from category lists; `all_points` is the time-sorted
    /// union and the counts are derived.
    pub fn from_categories(
        wind_shifts: Vec<StrategyPoint>,
        tack_points: Vec<StrategyPoint>,
        layline_points: Vec<StrategyPoint>,
        mark_roundings: Vec<StrategyPoint>,
    ) -> Self {
        let mut all_points: Vec<StrategyPoint> = wind_shifts
            .iter()
            .chain(tack_points.iter())
            .chain(layline_points.iter())
            .chain(mark_roundings.iter())
            .cloned()
            .collect();
        all_points.sort_by_key(StrategyPoint::time);

        Self {
            point_count: all_points.len(),
            wind_shift_count: wind_shifts.len(),
            tack_point_count: tack_points.len(),
            layline_count: layline_points.len(),
            mark_rounding_count: mark_roundings.len(),
            all_points,
            wind_shifts,
            tack_points,
            layline_points,
            mark_roundings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn shift_at(secs: i64) -> StrategyPoint {
        StrategyPoint::WindShift {
            time: Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("valid ts"),
            latitude: 35.6,
            longitude: 139.7,
            strategic_score: 0.5,
            note: "shift".to_string(),
            shift_angle: 8.0,
            before_direction: 220.0,
            after_direction: 228.0,
            wind_speed: 10.0,
            duration_seconds: 30.0,
        }
    }

    fn tack_at(secs: i64) -> StrategyPoint {
        StrategyPoint::Tack {
            time: Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("valid ts"),
            latitude: 35.6,
            longitude: 139.7,
            strategic_score: 0.4,
            note: "tack".to_string(),
            tack_type: TackSide::Port,
            suggested_tack: TackSide::Starboard,
            vmg_gain: 0.08,
            heading_before: 40.0,
            heading_after: 310.0,
        }
    }

    #[test]
    fn union_is_sorted_and_counted() {
        let result = StrategyResult::from_categories(
            vec![shift_at(100), shift_at(10)],
            vec![tack_at(50)],
            vec![],
            vec![],
        );
        assert_eq!(result.point_count, 3);
        assert_eq!(result.wind_shift_count, 2);
        assert_eq!(result.tack_point_count, 1);
        assert_eq!(result.layline_count, 0);
        let times: Vec<_> = result.all_points.iter().map(StrategyPoint::time).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn point_type_tag_in_json() {
        let json = serde_json::to_value(shift_at(0)).expect("serialize");
        assert_eq!(json["point_type"], "wind_shift");
        assert_eq!(json["shift_angle"], 8.0);
    }

    #[test]
    fn tack_side_opposite() {
        assert_eq!(TackSide::Port.opposite(), TackSide::Starboard);
        assert_eq!(TackSide::Starboard.opposite(), TackSide::Port);
    }
}
