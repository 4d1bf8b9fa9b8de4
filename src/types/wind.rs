//! Wind estimation result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Estimation method that produced a [`WindEstimate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindMethod {
    /// Derived from tack/jibe bisectors.
    Maneuvers,
    /// Derived from the speed-vs-heading polar histogram, wind speed from a
    /// linear proxy.
    CourseSpeed,
    /// Course/speed direction with the wind-speed magnitude read off the
    /// boat-type polar table.
    Polar,
}

impl std::fmt::Display for WindMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindMethod::Maneuvers => write!(f, "maneuvers"),
            WindMethod::CourseSpeed => write!(f, "course_speed"),
            WindMethod::Polar => write!(f, "polar"),
        }
    }
}

/// Estimated true wind vector with a confidence grade.
///
/// `direction_deg` is the direction the wind blows FROM, compass degrees.
/// Confidence is in [0, 1]; the scale is documented per method in the wind
/// estimator module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindEstimate {
    pub direction_deg: f64,
    pub speed_kn: f64,
    pub confidence: f64,
    pub method: WindMethod,
}

impl WindEstimate {
    /// Zero-confidence placeholder used when no estimate can be made.
    pub fn unknown() -> Self {
        Self {
            direction_deg: 0.0,
            speed_kn: 0.0,
            confidence: 0.0,
            method: WindMethod::CourseSpeed,
        }
    }
}

/// Maneuver classification relative to the wind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManeuverType {
    /// Bow crossed through the wind.
    Tack,
    /// Stern crossed through the wind.
    Jibe,
    /// No wind reference available at detection time.
    Unknown,
}

impl std::fmt::Display for ManeuverType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManeuverType::Tack => write!(f, "tack"),
            ManeuverType::Jibe => write!(f, "jibe"),
            ManeuverType::Unknown => write!(f, "unknown"),
        }
    }
}

/// A detected direction-change maneuver.
///
/// `speed_ratio = min_speed / start_speed`; the complementary
/// `1 - speed_ratio` is the speed loss through the turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Maneuver {
    pub timestamp: DateTime<Utc>,
    pub maneuver_type: ManeuverType,
    pub duration_seconds: f64,
    pub start_heading: f64,
    pub end_heading: f64,
    /// Unsigned heading change through the maneuver (degrees).
    pub heading_change: f64,
    pub start_speed: f64,
    pub min_speed: f64,
    pub end_speed: f64,
    pub speed_ratio: f64,
    /// Position at the minimum-speed sample.
    pub latitude: f64,
    pub longitude: f64,
}

impl Maneuver {
    /// Fraction of entry speed lost through the maneuver.
    pub fn speed_loss(&self) -> f64 {
        1.0 - self.speed_ratio
    }
}

/// Full wind estimation output for a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindResult {
    pub wind: WindEstimate,
    pub detected_maneuvers: Vec<Maneuver>,
    /// One-line human summary of the estimate.
    pub wind_summary: String,
    pub timestamp: DateTime<Utc>,
    pub boat_type: String,
}

impl WindResult {
    pub fn maneuver_count(&self) -> usize {
        self.detected_maneuvers.len()
    }

    pub fn tack_count(&self) -> usize {
        self.detected_maneuvers
            .iter()
            .filter(|m| m.maneuver_type == ManeuverType::Tack)
            .count()
    }

    pub fn jibe_count(&self) -> usize {
        self.detected_maneuvers
            .iter()
            .filter(|m| m.maneuver_type == ManeuverType::Jibe)
            .count()
    }
}

/// Optimal VMG targets for a (wind speed, boat type) pair.
///
/// Target VMGs are `None` when the boat type has no polar table (the default
/// fallback angles still apply).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimalVmg {
    /// True wind angle for best upwind VMG (degrees off the wind).
    pub upwind_angle: f64,
    pub upwind_vmg: Option<f64>,
    /// True wind angle for best downwind VMG (degrees off the wind).
    pub downwind_angle: f64,
    pub downwind_vmg: Option<f64>,
}

/// Point-of-sail classification against the estimated wind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SailingMode {
    Upwind,
    Reach,
    Downwind,
}

impl std::fmt::Display for SailingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SailingMode::Upwind => write!(f, "upwind"),
            SailingMode::Reach => write!(f, "reach"),
            SailingMode::Downwind => write!(f, "downwind"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_loss_is_complement_of_ratio() {
        let maneuver = Maneuver {
            timestamp: Utc::now(),
            maneuver_type: ManeuverType::Tack,
            duration_seconds: 8.0,
            start_heading: 45.0,
            end_heading: 315.0,
            heading_change: 90.0,
            start_speed: 6.0,
            min_speed: 3.6,
            end_speed: 5.8,
            speed_ratio: 0.6,
            latitude: 35.6,
            longitude: 139.7,
        };
        assert!((maneuver.speed_loss() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn maneuver_counts_by_type() {
        let mk = |mt: ManeuverType| Maneuver {
            timestamp: Utc::now(),
            maneuver_type: mt,
            duration_seconds: 5.0,
            start_heading: 0.0,
            end_heading: 90.0,
            heading_change: 90.0,
            start_speed: 5.0,
            min_speed: 4.0,
            end_speed: 5.0,
            speed_ratio: 0.8,
            latitude: 0.0,
            longitude: 0.0,
        };
        let result = WindResult {
            wind: WindEstimate::unknown(),
            detected_maneuvers: vec![
                mk(ManeuverType::Tack),
                mk(ManeuverType::Tack),
                mk(ManeuverType::Jibe),
                mk(ManeuverType::Unknown),
            ],
            wind_summary: String::new(),
            timestamp: Utc::now(),
            boat_type: "default".to_string(),
        };
        assert_eq!(result.maneuver_count(), 4);
        assert_eq!(result.tack_count(), 2);
        assert_eq!(result.jibe_count(), 1);
    }

    #[test]
    fn wind_method_serializes_snake_case() {
        let json = serde_json::to_string(&WindMethod::CourseSpeed).expect("serialize");
        assert_eq!(json, "\"course_speed\"");
    }
}
