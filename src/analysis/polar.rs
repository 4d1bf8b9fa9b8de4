//! Boat-type polar tables and optimal VMG targets.
//!
//! Targets by true wind speed for the boat classes the engine knows about.
//! Figures are class-typical values rounded to a tenth of a knot; they are
//! deliberately conservative and serve as reference targets, not certified
//! polars. Unknown boat types fall back to the default angles (42 degrees
//! upwind, 150 downwind) with no target VMG.

use crate::types::OptimalVmg;

/// One polar table row: targets at a given true wind speed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolarEntry {
    /// True wind speed (knots).
    pub wind_speed: f64,
    /// Optimal upwind angle (degrees off the wind).
    pub upwind_angle: f64,
    /// Boat speed at the optimal upwind angle (knots).
    pub upwind_speed: f64,
    /// Optimal downwind angle (degrees off the wind).
    pub downwind_angle: f64,
    /// Boat speed at the optimal downwind angle (knots).
    pub downwind_speed: f64,
}

/// Fallback upwind angle for unknown boat types (degrees).
pub const DEFAULT_UPWIND_ANGLE: f64 = 42.0;

/// Fallback downwind angle for unknown boat types (degrees).
pub const DEFAULT_DOWNWIND_ANGLE: f64 = 150.0;

/// Generic one-design dinghy.
const DEFAULT_TABLE: [PolarEntry; 5] = [
    PolarEntry { wind_speed: 4.0, upwind_angle: 45.0, upwind_speed: 2.4, downwind_angle: 140.0, downwind_speed: 2.8 },
    PolarEntry { wind_speed: 8.0, upwind_angle: 43.0, upwind_speed: 4.1, downwind_angle: 144.0, downwind_speed: 5.1 },
    PolarEntry { wind_speed: 12.0, upwind_angle: 42.0, upwind_speed: 5.0, downwind_angle: 150.0, downwind_speed: 6.4 },
    PolarEntry { wind_speed: 16.0, upwind_angle: 41.0, upwind_speed: 5.4, downwind_angle: 155.0, downwind_speed: 7.3 },
    PolarEntry { wind_speed: 20.0, upwind_angle: 40.0, upwind_speed: 5.6, downwind_angle: 160.0, downwind_speed: 8.0 },
];

/// ILCA/Laser standard rig.
const LASER_TABLE: [PolarEntry; 5] = [
    PolarEntry { wind_speed: 4.0, upwind_angle: 45.0, upwind_speed: 2.2, downwind_angle: 138.0, downwind_speed: 2.6 },
    PolarEntry { wind_speed: 8.0, upwind_angle: 44.0, upwind_speed: 3.9, downwind_angle: 142.0, downwind_speed: 4.8 },
    PolarEntry { wind_speed: 12.0, upwind_angle: 43.0, upwind_speed: 4.7, downwind_angle: 148.0, downwind_speed: 6.0 },
    PolarEntry { wind_speed: 16.0, upwind_angle: 42.0, upwind_speed: 5.1, downwind_angle: 152.0, downwind_speed: 6.9 },
    PolarEntry { wind_speed: 20.0, upwind_angle: 41.0, upwind_speed: 5.3, downwind_angle: 156.0, downwind_speed: 7.5 },
];

/// 470 two-person dinghy.
const TABLE_470: [PolarEntry; 5] = [
    PolarEntry { wind_speed: 4.0, upwind_angle: 44.0, upwind_speed: 2.6, downwind_angle: 140.0, downwind_speed: 3.0 },
    PolarEntry { wind_speed: 8.0, upwind_angle: 42.0, upwind_speed: 4.4, downwind_angle: 146.0, downwind_speed: 5.4 },
    PolarEntry { wind_speed: 12.0, upwind_angle: 41.0, upwind_speed: 5.3, downwind_angle: 152.0, downwind_speed: 6.8 },
    PolarEntry { wind_speed: 16.0, upwind_angle: 40.0, upwind_speed: 5.7, downwind_angle: 157.0, downwind_speed: 7.8 },
    PolarEntry { wind_speed: 20.0, upwind_angle: 39.0, upwind_speed: 5.9, downwind_angle: 162.0, downwind_speed: 8.6 },
];

/// 49er skiff: wider angles, much faster off the wind.
const TABLE_49ER: [PolarEntry; 5] = [
    PolarEntry { wind_speed: 4.0, upwind_angle: 46.0, upwind_speed: 3.2, downwind_angle: 135.0, downwind_speed: 4.2 },
    PolarEntry { wind_speed: 8.0, upwind_angle: 44.0, upwind_speed: 5.6, downwind_angle: 140.0, downwind_speed: 8.0 },
    PolarEntry { wind_speed: 12.0, upwind_angle: 42.0, upwind_speed: 6.8, downwind_angle: 145.0, downwind_speed: 11.5 },
    PolarEntry { wind_speed: 16.0, upwind_angle: 41.0, upwind_speed: 7.4, downwind_angle: 150.0, downwind_speed: 14.5 },
    PolarEntry { wind_speed: 20.0, upwind_angle: 40.0, upwind_speed: 7.8, downwind_angle: 155.0, downwind_speed: 17.0 },
];

/// Table for a boat type, `None` when the type is unknown.
pub fn polar_table(boat_type: &str) -> Option<&'static [PolarEntry]> {
    match boat_type.to_ascii_lowercase().as_str() {
        "default" => Some(&DEFAULT_TABLE),
        "laser" | "ilca" => Some(&LASER_TABLE),
        "470" => Some(&TABLE_470),
        "49er" => Some(&TABLE_49ER),
        _ => None,
    }
}

/// Linear interpolation helper over a polar table, clamped to its ends.
fn interpolate(table: &[PolarEntry], wind_speed: f64, field: impl Fn(&PolarEntry) -> f64) -> f64 {
    if let Some(first) = table.first() {
        if wind_speed <= first.wind_speed {
            return field(first);
        }
    }
    if let Some(last) = table.last() {
        if wind_speed >= last.wind_speed {
            return field(last);
        }
    }
    for pair in table.windows(2) {
        let (lo, hi) = (&pair[0], &pair[1]);
        if wind_speed >= lo.wind_speed && wind_speed <= hi.wind_speed {
            let t = (wind_speed - lo.wind_speed) / (hi.wind_speed - lo.wind_speed);
            return field(lo) + t * (field(hi) - field(lo));
        }
    }
    table.last().map_or(0.0, field)
}

/// Optimal VMG angles and target VMGs for a (wind speed, boat type) pair.
///
/// VMG targets project the table boat speed onto the wind axis:
/// upwind `speed * cos(angle)`, downwind `speed * |cos(180 - angle)|`.
pub fn optimal_vmg_angles(wind_speed: f64, boat_type: &str) -> OptimalVmg {
    let Some(table) = polar_table(boat_type) else {
        return OptimalVmg {
            upwind_angle: DEFAULT_UPWIND_ANGLE,
            upwind_vmg: None,
            downwind_angle: DEFAULT_DOWNWIND_ANGLE,
            downwind_vmg: None,
        };
    };

    let upwind_angle = interpolate(table, wind_speed, |e| e.upwind_angle);
    let upwind_speed = interpolate(table, wind_speed, |e| e.upwind_speed);
    let downwind_angle = interpolate(table, wind_speed, |e| e.downwind_angle);
    let downwind_speed = interpolate(table, wind_speed, |e| e.downwind_speed);

    OptimalVmg {
        upwind_angle,
        upwind_vmg: Some(upwind_speed * upwind_angle.to_radians().cos()),
        downwind_angle,
        downwind_vmg: Some(downwind_speed * (180.0 - downwind_angle).to_radians().cos().abs()),
    }
}

/// Invert the downwind-speed curve: the true wind speed whose target top
/// boat speed best matches an observed fast boat speed. `None` for unknown
/// boat types.
pub fn wind_speed_from_boat_speed(observed_top_speed: f64, boat_type: &str) -> Option<f64> {
    let table = polar_table(boat_type)?;

    let first = table.first()?;
    let last = table.last()?;
    if observed_top_speed <= first.downwind_speed {
        return Some(first.wind_speed);
    }
    if observed_top_speed >= last.downwind_speed {
        return Some(last.wind_speed);
    }
    for pair in table.windows(2) {
        let (lo, hi) = (&pair[0], &pair[1]);
        if observed_top_speed >= lo.downwind_speed && observed_top_speed <= hi.downwind_speed {
            let span = hi.downwind_speed - lo.downwind_speed;
            let t = if span > 0.0 {
                (observed_top_speed - lo.downwind_speed) / span
            } else {
                0.0
            };
            return Some(lo.wind_speed + t * (hi.wind_speed - lo.wind_speed));
        }
    }
    Some(last.wind_speed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_boat_type_gets_fallback_angles() {
        let vmg = optimal_vmg_angles(12.0, "trimaran");
        assert!((vmg.upwind_angle - DEFAULT_UPWIND_ANGLE).abs() < 1e-9);
        assert!((vmg.downwind_angle - DEFAULT_DOWNWIND_ANGLE).abs() < 1e-9);
        assert!(vmg.upwind_vmg.is_none());
        assert!(vmg.downwind_vmg.is_none());
    }

    #[test]
    fn interpolation_between_rows() {
        // Halfway between the 8 kn and 12 kn rows of the default table.
        let vmg = optimal_vmg_angles(10.0, "default");
        assert!((vmg.upwind_angle - 42.5).abs() < 1e-9);
        let upwind_vmg = vmg.upwind_vmg.expect("table present");
        // Between the VMGs of the bracketing rows.
        let lo = 4.1 * 43.0_f64.to_radians().cos();
        let hi = 5.0 * 42.0_f64.to_radians().cos();
        assert!(upwind_vmg > lo.min(hi) && upwind_vmg < lo.max(hi) + 0.2);
    }

    #[test]
    fn clamped_outside_table_range() {
        let low = optimal_vmg_angles(1.0, "default");
        assert!((low.upwind_angle - 45.0).abs() < 1e-9);
        let high = optimal_vmg_angles(40.0, "default");
        assert!((high.upwind_angle - 40.0).abs() < 1e-9);
    }

    #[test]
    fn wind_speed_inversion_monotonic() {
        let slow = wind_speed_from_boat_speed(3.0, "default").expect("known type");
        let fast = wind_speed_from_boat_speed(7.0, "default").expect("known type");
        assert!(slow < fast);
        assert!(wind_speed_from_boat_speed(5.0, "mystery").is_none());
    }

    #[test]
    fn downwind_vmg_uses_gybe_angle_projection() {
        let vmg = optimal_vmg_angles(12.0, "default");
        // downwind 150 deg -> projection factor cos(30)
        let expected = 6.4 * 30.0_f64.to_radians().cos();
        assert!((vmg.downwind_vmg.expect("table present") - expected).abs() < 1e-9);
    }
}
