//! End-to-end pipeline tests over a synthetic square course.
//!
//! The reference session is ~500 samples at 1 Hz tracing a roughly 1.6 km
//! square centered on (35.6, 139.7) with legs at 0/90/180/270 degrees and a
//! true wind from 225 degrees: the 180/270 legs sail slow (upwind), the 0/90
//! legs fast (downwind), and the boat slows through every corner.

use chrono::{TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use windward::{
    AnalysisCoordinator, Sample, StepStatus, TrackFrame, WindMethod,
};

const DEG_LAT_M: f64 = 111_320.0;
const KNOT_MS: f64 = 0.514_444;

/// Install a test subscriber once so `RUST_LOG=debug cargo test` shows the
/// engine's tracing output.
fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Build the square-course frame. `seed` varies the noise.
fn square_course_frame(seed: u64) -> TrackFrame {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut samples = Vec::with_capacity(500);

    let mut lat = 35.6_f64;
    let mut lon = 139.7_f64;
    let legs = [0.0_f64, 90.0, 180.0, 270.0];
    // Wind from 225: legs toward 180/270 are upwind (slow), 0/90 downwind.
    let base_speed = |course: f64| -> f64 {
        if course < 135.0 {
            8.5
        } else {
            4.6
        }
    };

    let mut t = 0i64;
    for (leg_index, &course) in legs.iter().enumerate() {
        let base = base_speed(course);
        let prev_base = base_speed(legs[(leg_index + 3) % 4]);
        for k in 0..125 {
            // Slow through the corner, accelerating out over ~5 samples.
            let speed = if leg_index > 0 && k < 5 {
                let floor = 0.62 * base.min(prev_base);
                floor + (base - floor) * (k as f64 / 5.0)
            } else {
                base
            };
            let speed = (speed + rng.gen_range(-0.25..0.25)).max(0.5);
            let course_noisy = (course + rng.gen_range(-2.5..2.5)).rem_euclid(360.0);

            samples.push(Sample {
                timestamp: Utc.timestamp_opt(1_700_000_000 + t, 0).single().expect("valid ts"),
                latitude: lat,
                longitude: lon,
                course: course_noisy,
                speed,
            });

            // Advance the position along the leg heading.
            let dist = speed * KNOT_MS;
            lat += dist * course.to_radians().cos() / DEG_LAT_M;
            lon += dist * course.to_radians().sin() / (DEG_LAT_M * lat.to_radians().cos());
            t += 1;
        }
    }

    TrackFrame::from_samples(&samples)
}

fn angular_distance(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}

#[test]
fn square_course_full_analysis() {
    init_tracing();
    let coordinator = AnalysisCoordinator::new();
    coordinator
        .initialize(square_course_frame(7), Vec::new())
        .expect("initialize");

    let summary = coordinator
        .run_workflow(None, None, false)
        .expect("workflow runs");
    assert_eq!(summary.completed, 5, "statuses: {:?}", summary.step_statuses);

    // Preprocessing keeps nearly every row.
    let stats = coordinator.preprocess_stats().expect("stats published");
    assert_eq!(stats.original_rows, 500);
    assert!(
        stats.processed_rows >= 495,
        "only {} rows survived preprocessing",
        stats.processed_rows
    );

    // Wind within 30 degrees of 225 with usable confidence.
    let wind = coordinator.wind_result().expect("wind published");
    assert!(
        angular_distance(wind.wind.direction_deg, 225.0) <= 30.0,
        "wind direction {} too far from 225",
        wind.wind.direction_deg
    );
    assert!(
        wind.wind.confidence >= 0.3,
        "confidence {} below 0.3",
        wind.wind.confidence
    );
    assert!(wind.wind.speed_kn > 0.0);

    // Strategic picture: at least 3 tack or wind-shift calls.
    let strategy = coordinator.strategy_result().expect("strategy published");
    assert!(
        strategy.tack_point_count + strategy.wind_shift_count >= 3,
        "only {} tack points and {} wind shifts",
        strategy.tack_point_count,
        strategy.wind_shift_count
    );
    for point in &strategy.all_points {
        let score = point.strategic_score();
        assert!((0.0..=1.0).contains(&score), "score {score} out of range");
    }

    // Performance score in the expected band.
    let performance = coordinator.performance_result().expect("performance published");
    let score = performance.overall_performance.score;
    assert!(
        (40.0..=90.0).contains(&score),
        "score {score} outside [40, 90]; summary: {}",
        performance.overall_performance.summary
    );

    // Report summarizes the same numbers.
    let report = coordinator.report().expect("report published");
    assert_eq!(report.data_summary.points, stats.processed_rows);
    assert!((report.performance_summary.score - score).abs() < 1e-9);
    assert_eq!(
        report.strategy_summary.point_count,
        strategy.point_count
    );
}

#[test]
fn square_course_noise_variants_agree_on_wind() {
    for seed in [1_u64, 2, 3] {
        let coordinator = AnalysisCoordinator::new();
        coordinator
            .initialize(square_course_frame(seed), Vec::new())
            .expect("initialize");
        coordinator
            .run_workflow(None, None, false)
            .expect("workflow runs");

        let wind = coordinator.wind_result().expect("wind published");
        assert!(
            angular_distance(wind.wind.direction_deg, 225.0) <= 30.0,
            "seed {seed}: wind {} too far from 225",
            wind.wind.direction_deg
        );
        assert!(
            matches!(
                wind.wind.method,
                WindMethod::Maneuvers | WindMethod::CourseSpeed | WindMethod::Polar
            ),
            "seed {seed}: unexpected method"
        );
    }
}

#[test]
fn premature_strategy_step_is_skipped_not_failed() {
    let coordinator = AnalysisCoordinator::new();
    coordinator
        .initialize(square_course_frame(7), Vec::new())
        .expect("initialize");

    let keys_before = coordinator.available_data_keys();
    let report = coordinator
        .run_step("strategy_detection", false)
        .expect("known step");

    assert!(!report.success);
    let snapshot = report.step_status.expect("snapshot");
    assert_eq!(snapshot.status, StepStatus::Skipped);
    let message = snapshot.error_message.expect("skip reason recorded");
    assert!(
        message.contains("preprocess") && message.contains("wind_estimation"),
        "message should name the missing prerequisites: {message}"
    );

    // Context unchanged: only the seeded inputs.
    assert_eq!(coordinator.available_data_keys(), keys_before);
    assert!(coordinator.strategy_result().is_none());
}

#[test]
fn rerun_after_reset_reproduces_the_report() {
    let coordinator = AnalysisCoordinator::new();
    coordinator
        .initialize(square_course_frame(11), Vec::new())
        .expect("initialize");

    coordinator
        .run_workflow(None, None, false)
        .expect("first run");
    let first = coordinator.report().expect("first report");

    coordinator.reset().expect("reset");
    assert!(coordinator.report().is_none(), "reset drops derived keys");
    assert_eq!(coordinator.workflow_status().completed, 0);

    coordinator
        .run_workflow(None, None, false)
        .expect("second run");
    let second = coordinator.report().expect("second report");

    assert!(
        first.same_content(&second),
        "reports differ beyond the timestamp:\n{first:?}\n{second:?}"
    );
}

#[test]
fn empty_track_fails_preprocess_and_skips_downstream() {
    let coordinator = AnalysisCoordinator::new();
    coordinator
        .initialize(TrackFrame::from_samples(&[]), Vec::new())
        .expect("initialize");

    let summary = coordinator
        .run_workflow(None, None, false)
        .expect("workflow runs");
    assert_eq!(summary.completed, 0);
    assert_eq!(summary.failed, 1);

    let snapshot = coordinator.step_status("preprocess").expect("snapshot");
    assert_eq!(snapshot.status, StepStatus::Failed);
    assert!(snapshot.error_message.expect("message").contains("empty"));

    // Nothing downstream ran.
    assert_eq!(
        coordinator
            .step_status("wind_estimation")
            .expect("snapshot")
            .status,
        StepStatus::NotStarted
    );
    assert!(coordinator.wind_result().is_none());
}

#[test]
fn single_sample_track_fails_preprocess() {
    let sample = Sample {
        timestamp: Utc.timestamp_opt(1_700_000_000, 0).single().expect("valid ts"),
        latitude: 35.6,
        longitude: 139.7,
        course: 90.0,
        speed: 5.0,
    };
    let coordinator = AnalysisCoordinator::new();
    coordinator
        .initialize(TrackFrame::from_samples(&[sample]), Vec::new())
        .expect("initialize");

    let summary = coordinator
        .run_workflow(None, None, false)
        .expect("workflow runs");
    assert_eq!(summary.completed, 0);
    assert_eq!(
        coordinator.step_status("preprocess").expect("snapshot").status,
        StepStatus::Failed
    );
}

#[test]
fn background_run_produces_the_same_results() {
    let foreground = AnalysisCoordinator::new();
    foreground
        .initialize(square_course_frame(21), Vec::new())
        .expect("initialize");
    foreground
        .run_workflow(None, None, false)
        .expect("foreground run");
    let expected = foreground.report().expect("foreground report");

    let background = AnalysisCoordinator::new();
    background
        .initialize(square_course_frame(21), Vec::new())
        .expect("initialize");
    background
        .run_workflow_in_background(None)
        .expect("background start");
    background.wait_for_background();

    let status = background.background_status();
    assert!(status.completed, "background status: {status:?}");
    let report = background.report().expect("background report");
    assert!(expected.same_content(&report));
}
