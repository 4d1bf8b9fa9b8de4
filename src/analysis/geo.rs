//! Geometry and angle helpers shared by the kernels.
//!
//! Angles are compass degrees unless noted; distances are meters.

/// Mean Earth radius (meters).
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two positions (meters).
pub fn haversine_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Initial great-circle bearing from point 1 to point 2 (degrees, [0, 360)).
pub fn initial_bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();
    normalize_course(y.atan2(x).to_degrees())
}

/// Normalize an angle into [0, 360).
pub fn normalize_course(angle: f64) -> f64 {
    let a = angle % 360.0;
    if a < 0.0 {
        a + 360.0
    } else {
        a
    }
}

/// Signed smallest rotation from `reference` to `angle`, in [-180, 180).
pub fn signed_angle_delta(angle: f64, reference: f64) -> f64 {
    let mut delta = (angle - reference) % 360.0;
    if delta < -180.0 {
        delta += 360.0;
    } else if delta >= 180.0 {
        delta -= 360.0;
    }
    delta
}

/// Unsigned smallest angle between two directions, in [0, 180].
pub fn unsigned_angle_between(a: f64, b: f64) -> f64 {
    signed_angle_delta(a, b).abs()
}

/// Weighted circular mean of directions.
///
/// Returns `(mean_direction, resultant_length)` where the resultant length in
/// [0, 1] measures concentration (1 = all aligned). `None` for empty input or
/// an all-zero weight vector.
pub fn circular_mean_deg(angles: &[f64], weights: &[f64]) -> Option<(f64, f64)> {
    if angles.is_empty() || angles.len() != weights.len() {
        return None;
    }
    let total_weight: f64 = weights.iter().sum();
    if total_weight <= 0.0 {
        return None;
    }

    let (mut sin_sum, mut cos_sum) = (0.0_f64, 0.0_f64);
    for (angle, weight) in angles.iter().zip(weights) {
        let rad = angle.to_radians();
        sin_sum += weight * rad.sin();
        cos_sum += weight * rad.cos();
    }

    let resultant = (sin_sum.powi(2) + cos_sum.powi(2)).sqrt() / total_weight;
    if resultant < 1e-12 {
        // Perfectly dispersed directions have no meaningful mean.
        return None;
    }
    let mean = normalize_course(sin_sum.atan2(cos_sum).to_degrees());
    Some((mean, resultant))
}

/// Centered moving average with edge clamping: the window shrinks near the
/// ends so every position gets a value.
pub fn centered_moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    if n == 0 || window <= 1 {
        return values.to_vec();
    }
    let half = window / 2;
    (0..n)
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(n);
            let slice = &values[start..end];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

/// Cumulative great-circle distance along a position sequence (meters).
pub fn cumulative_distance_m(latitudes: &[f64], longitudes: &[f64]) -> f64 {
    latitudes
        .windows(2)
        .zip(longitudes.windows(2))
        .map(|(lats, lons)| haversine_distance_m(lats[0], lons[0], lats[1], lons[1]))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_wraps_both_directions() {
        assert!((normalize_course(370.0) - 10.0).abs() < 1e-9);
        assert!((normalize_course(-10.0) - 350.0).abs() < 1e-9);
        assert!((normalize_course(360.0) - 0.0).abs() < 1e-9);
    }

    #[test]
    fn signed_delta_picks_short_way() {
        assert!((signed_angle_delta(10.0, 350.0) - 20.0).abs() < 1e-9);
        assert!((signed_angle_delta(350.0, 10.0) + 20.0).abs() < 1e-9);
        assert!((signed_angle_delta(180.0, 0.0) + 180.0).abs() < 1e-9);
    }

    #[test]
    fn haversine_known_distance() {
        // One degree of latitude is about 111.2 km.
        let d = haversine_distance_m(35.0, 139.0, 36.0, 139.0);
        assert!((d - 111_195.0).abs() < 500.0, "got {d}");
    }

    #[test]
    fn bearing_cardinal_directions() {
        let north = initial_bearing_deg(35.0, 139.0, 36.0, 139.0);
        assert!(unsigned_angle_between(north, 0.0) < 0.5);
        let east = initial_bearing_deg(35.0, 139.0, 35.0, 140.0);
        assert!(unsigned_angle_between(east, 90.0) < 1.0);
    }

    #[test]
    fn circular_mean_handles_wraparound() {
        let (mean, r) = circular_mean_deg(&[350.0, 10.0], &[1.0, 1.0]).expect("mean exists");
        assert!(unsigned_angle_between(mean, 0.0) < 1e-6);
        assert!(r > 0.98);
    }

    #[test]
    fn circular_mean_of_opposed_directions_is_none() {
        assert!(circular_mean_deg(&[0.0, 180.0], &[1.0, 1.0]).is_none());
    }

    #[test]
    fn moving_average_clamps_edges() {
        let smoothed = centered_moving_average(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_eq!(smoothed.len(), 5);
        assert!((smoothed[0] - 1.5).abs() < 1e-9);
        assert!((smoothed[2] - 3.0).abs() < 1e-9);
        assert!((smoothed[4] - 4.5).abs() < 1e-9);
    }

    #[test]
    fn cumulative_distance_sums_legs() {
        let lats = [35.0, 35.0, 35.0];
        let lons = [139.0, 139.001, 139.002];
        let total = cumulative_distance_m(&lats, &lons);
        let leg = haversine_distance_m(35.0, 139.0, 35.0, 139.001);
        assert!((total - 2.0 * leg).abs() < 1e-6);
    }
}
