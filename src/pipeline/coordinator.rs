//! Analysis coordinator: the facade over the whole engine.
//!
//! Builds the default workflow DAG
//!
//! ```text
//! preprocess
//!   |--> wind_estimation
//!   |      |--> strategy_detection ----\
//!   |      \--> performance_analysis ---+--> report_creation
//!   \-----------------------------------/
//! ```
//!
//! wiring the registry and cache into each kernel step, and offers run-step /
//! run-all (foreground or worker thread), status queries and typed getters
//! over the published context keys.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analysis::{
    preprocess_track, PerformanceAnalyzer, StrategyDetector, WindEstimator,
};
use crate::cache::AnalysisCache;
use crate::params::ParameterRegistry;
use crate::storage::Storage;
use crate::types::{
    DataSummary, Mark, PerformanceResult, PerformanceSummary, PreprocessStats, ProcessedTrack,
    Report, StrategyResult, StrategySummary, TrackFrame, WindResult, WindSummary,
};
use crate::workflow::{
    AnalysisStep, ContextDelta, ContextValue, DataContext, StepError, StepSnapshot,
    WorkflowController, WorkflowStatus, WorkflowSummary,
};

use super::background::{BackgroundRunner, BackgroundStatus, ProgressCallback};
use super::CoordinatorError;

/// Workflow namespace used by the default build.
const DEFAULT_NAMESPACE: &str = "integrated_workflow";

/// Outcome of a single coordinated step run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRunReport {
    pub success: bool,
    pub step_status: Option<StepSnapshot>,
    pub workflow_status: WorkflowStatus,
}

// ============================================================================
// Step bodies
// ============================================================================

struct PreprocessStep {
    registry: Arc<ParameterRegistry>,
}

impl crate::workflow::StepRun for PreprocessStep {
    fn run(&self, context: &DataContext) -> Result<ContextDelta, StepError> {
        let frame = context
            .get("input_df")
            .and_then(ContextValue::as_frame)
            .ok_or_else(|| StepError::from("context key 'input_df' is not a track frame"))?;

        let (processed, stats) = preprocess_track(frame, &self.registry)?;
        Ok(vec![
            ("processed_df".to_string(), ContextValue::Track(processed)),
            ("stats".to_string(), ContextValue::Stats(stats)),
        ])
    }
}

struct WindEstimationStep {
    estimator: WindEstimator,
    boat_type: String,
}

impl crate::workflow::StepRun for WindEstimationStep {
    fn run(&self, context: &DataContext) -> Result<ContextDelta, StepError> {
        let track = context
            .get("processed_df")
            .and_then(ContextValue::as_track)
            .ok_or_else(|| StepError::from("context key 'processed_df' is not a track"))?;

        let result = self.estimator.estimate(track, &self.boat_type)?;
        Ok(vec![("wind_result".to_string(), ContextValue::Wind(result))])
    }
}

struct StrategyDetectionStep {
    detector: StrategyDetector,
}

impl crate::workflow::StepRun for StrategyDetectionStep {
    fn run(&self, context: &DataContext) -> Result<ContextDelta, StepError> {
        let track = context
            .get("processed_df")
            .and_then(ContextValue::as_track)
            .ok_or_else(|| StepError::from("context key 'processed_df' is not a track"))?;
        let wind = context
            .get("wind_result")
            .and_then(ContextValue::as_wind)
            .ok_or_else(|| StepError::from("context key 'wind_result' is not a wind result"))?;
        let marks = context
            .get("marks")
            .and_then(ContextValue::as_marks)
            .unwrap_or(&[]);

        let result = self.detector.detect(track, wind, marks)?;
        Ok(vec![(
            "strategy_result".to_string(),
            ContextValue::Strategy(result),
        )])
    }
}

struct PerformanceAnalysisStep {
    analyzer: PerformanceAnalyzer,
}

impl crate::workflow::StepRun for PerformanceAnalysisStep {
    fn run(&self, context: &DataContext) -> Result<ContextDelta, StepError> {
        let track = context
            .get("processed_df")
            .and_then(ContextValue::as_track)
            .ok_or_else(|| StepError::from("context key 'processed_df' is not a track"))?;
        let wind = context
            .get("wind_result")
            .and_then(ContextValue::as_wind)
            .ok_or_else(|| StepError::from("context key 'wind_result' is not a wind result"))?;

        let result = self.analyzer.analyze(track, wind)?;
        Ok(vec![(
            "performance_result".to_string(),
            ContextValue::Performance(result),
        )])
    }
}

struct ReportCreationStep;

impl crate::workflow::StepRun for ReportCreationStep {
    fn run(&self, context: &DataContext) -> Result<ContextDelta, StepError> {
        let track = context
            .get("processed_df")
            .and_then(ContextValue::as_track)
            .ok_or_else(|| StepError::from("context key 'processed_df' is not a track"))?;
        let wind = context
            .get("wind_result")
            .and_then(ContextValue::as_wind)
            .ok_or_else(|| StepError::from("context key 'wind_result' is not a wind result"))?;
        let strategy = context
            .get("strategy_result")
            .and_then(ContextValue::as_strategy)
            .ok_or_else(|| StepError::from("context key 'strategy_result' is not a strategy result"))?;
        let performance = context
            .get("performance_result")
            .and_then(ContextValue::as_performance)
            .ok_or_else(|| {
                StepError::from("context key 'performance_result' is not a performance result")
            })?;

        let distance_m = performance.basic_stats.distance_m;
        let report = Report {
            timestamp: Utc::now(),
            data_summary: DataSummary {
                points: track.len(),
                duration_seconds: track.duration_seconds(),
                distance_m,
            },
            wind_summary: WindSummary {
                direction_deg: wind.wind.direction_deg,
                speed_kn: wind.wind.speed_kn,
                confidence: wind.wind.confidence,
            },
            strategy_summary: StrategySummary {
                point_count: strategy.point_count,
                wind_shift_count: strategy.wind_shift_count,
                tack_point_count: strategy.tack_point_count,
                layline_count: strategy.layline_count,
            },
            performance_summary: PerformanceSummary {
                score: performance.overall_performance.score,
                rating: performance.overall_performance.rating.clone(),
                summary: performance.overall_performance.summary.clone(),
            },
        };

        Ok(vec![("report".to_string(), ContextValue::Report(report))])
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Facade wiring registry, cache and kernels into the default workflow.
pub struct AnalysisCoordinator {
    registry: Arc<ParameterRegistry>,
    cache: Arc<AnalysisCache>,
    storage: Option<Arc<dyn Storage>>,
    workflow: Arc<Mutex<WorkflowController>>,
    background: BackgroundRunner,
    boat_type: String,
    initialized: AtomicBool,
}

impl Default for AnalysisCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisCoordinator {
    /// Coordinator with a fresh default registry and cache.
    pub fn new() -> Self {
        Self::with_components(
            Arc::new(ParameterRegistry::new()),
            Arc::new(AnalysisCache::new()),
        )
    }

    /// Coordinator over shared registry and cache instances.
    pub fn with_components(registry: Arc<ParameterRegistry>, cache: Arc<AnalysisCache>) -> Self {
        Self {
            registry,
            cache,
            storage: None,
            workflow: Arc::new(Mutex::new(WorkflowController::new(DEFAULT_NAMESPACE))),
            background: BackgroundRunner::new(),
            boat_type: "default".to_string(),
            initialized: AtomicBool::new(false),
        }
    }

    /// Attach a Storage port for best-effort workflow-state persistence.
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_boat_type(mut self, boat_type: impl Into<String>) -> Self {
        self.boat_type = boat_type.into();
        self
    }

    pub fn registry(&self) -> &Arc<ParameterRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<AnalysisCache> {
        &self.cache
    }

    // ------------------------------------------------------------------
    // Initialization
    // ------------------------------------------------------------------

    /// Build the default workflow over `frame`, seeding the context with the
    /// input and the (possibly empty) mark list.
    pub fn initialize(&self, frame: TrackFrame, marks: Vec<Mark>) -> Result<(), CoordinatorError> {
        self.ensure_idle()?;
        let mut controller = WorkflowController::new(DEFAULT_NAMESPACE);

        controller.add_step(
            AnalysisStep::new(
                "preprocess",
                "Data preprocessing",
                "Cleans and sorts the raw track",
                PreprocessStep {
                    registry: Arc::clone(&self.registry),
                },
            )
            .with_inputs(&["input_df"])
            .with_outputs(&["processed_df", "stats"]),
        );

        controller.add_step(
            AnalysisStep::new(
                "wind_estimation",
                "Wind estimation",
                "Estimates the true wind vector from the track",
                WindEstimationStep {
                    estimator: WindEstimator::new(Arc::clone(&self.registry))
                        .with_cache(Arc::clone(&self.cache)),
                    boat_type: self.boat_type.clone(),
                },
            )
            .with_inputs(&["processed_df"])
            .with_outputs(&["wind_result"])
            .with_dependencies(&["preprocess"]),
        );

        controller.add_step(
            AnalysisStep::new(
                "strategy_detection",
                "Strategy detection",
                "Detects wind shifts, tack opportunities and laylines",
                StrategyDetectionStep {
                    detector: StrategyDetector::new(Arc::clone(&self.registry))
                        .with_cache(Arc::clone(&self.cache)),
                },
            )
            .with_inputs(&["processed_df", "wind_result"])
            .with_outputs(&["strategy_result"])
            .with_dependencies(&["preprocess", "wind_estimation"]),
        );

        controller.add_step(
            AnalysisStep::new(
                "performance_analysis",
                "Performance analysis",
                "Scores speed, VMG and maneuver efficiency",
                PerformanceAnalysisStep {
                    analyzer: PerformanceAnalyzer::new(Arc::clone(&self.registry))
                        .with_cache(Arc::clone(&self.cache)),
                },
            )
            .with_inputs(&["processed_df", "wind_result"])
            .with_outputs(&["performance_result"])
            .with_dependencies(&["preprocess", "wind_estimation"]),
        );

        controller.add_step(
            AnalysisStep::new(
                "report_creation",
                "Report creation",
                "Assembles the final analysis report",
                ReportCreationStep,
            )
            .with_inputs(&[
                "processed_df",
                "wind_result",
                "strategy_result",
                "performance_result",
            ])
            .with_outputs(&["report"])
            .with_dependencies(&[
                "preprocess",
                "wind_estimation",
                "strategy_detection",
                "performance_analysis",
            ]),
        );

        controller.set_data("input_df", ContextValue::Frame(frame));
        controller.set_data("marks", ContextValue::Marks(marks));

        let issues = controller.validate_dependencies();
        if !issues.is_empty() {
            warn!(issues = ?issues, "Workflow dependency validation reported issues");
        }
        controller.optimize_step_order()?;

        *self.lock_workflow() = controller;
        self.initialized.store(true, Ordering::SeqCst);
        info!(boat_type = %self.boat_type, "Analysis workflow initialized");
        Ok(())
    }

    fn lock_workflow(&self) -> std::sync::MutexGuard<'_, WorkflowController> {
        self.workflow.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_initialized(&self) -> Result<(), CoordinatorError> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoordinatorError::NotInitialized)
        }
    }

    fn ensure_idle(&self) -> Result<(), CoordinatorError> {
        if self.background.is_running() {
            Err(CoordinatorError::BackgroundRunning)
        } else {
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Run one step in the foreground.
    pub fn run_step(&self, step_id: &str, force: bool) -> Result<StepRunReport, CoordinatorError> {
        self.ensure_initialized()?;
        self.ensure_idle()?;

        let mut controller = self.lock_workflow();
        let success = controller.run_step(step_id, force)?;
        let report = StepRunReport {
            success,
            step_status: controller.step_status(step_id),
            workflow_status: controller.workflow_status(),
        };
        drop(controller);

        self.save_workflow_state();
        Ok(report)
    }

    /// Run the whole workflow (or a slice of it) in the foreground.
    pub fn run_workflow(
        &self,
        start_from: Option<&str>,
        stop_at: Option<&str>,
        ignore_errors: bool,
    ) -> Result<WorkflowSummary, CoordinatorError> {
        self.ensure_initialized()?;
        self.ensure_idle()?;

        let summary = {
            let mut controller = self.lock_workflow();
            controller.run_workflow(start_from, stop_at, ignore_errors)?
        };

        self.save_workflow_state();
        Ok(summary)
    }

    /// Run the whole workflow on the single worker thread.
    pub fn run_workflow_in_background(
        &self,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<(), CoordinatorError> {
        self.ensure_initialized()?;
        self.background
            .start(Arc::clone(&self.workflow), progress_callback)
    }

    /// Poll the background run status.
    pub fn background_status(&self) -> BackgroundStatus {
        self.background.status()
    }

    /// Request cooperative cancellation of the background run.
    pub fn cancel_background(&self) {
        self.background.cancel();
    }

    /// Block until the background run finishes.
    pub fn wait_for_background(&self) {
        self.background.join();
        self.save_workflow_state();
    }

    /// Reset the workflow: statuses to NotStarted, context back to inputs.
    pub fn reset(&self) -> Result<(), CoordinatorError> {
        self.ensure_idle()?;
        self.lock_workflow().reset_workflow();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Status and results
    // ------------------------------------------------------------------

    pub fn workflow_status(&self) -> WorkflowStatus {
        self.lock_workflow().workflow_status()
    }

    pub fn step_status(&self, step_id: &str) -> Option<StepSnapshot> {
        self.lock_workflow().step_status(step_id)
    }

    pub fn available_data_keys(&self) -> Vec<String> {
        self.lock_workflow().available_data_keys()
    }

    pub fn processed_track(&self) -> Option<ProcessedTrack> {
        self.lock_workflow()
            .get_data("processed_df")
            .and_then(ContextValue::as_track)
            .cloned()
    }

    pub fn preprocess_stats(&self) -> Option<PreprocessStats> {
        self.lock_workflow()
            .get_data("stats")
            .and_then(ContextValue::as_stats)
            .copied()
    }

    pub fn wind_result(&self) -> Option<WindResult> {
        self.lock_workflow()
            .get_data("wind_result")
            .and_then(ContextValue::as_wind)
            .cloned()
    }

    pub fn strategy_result(&self) -> Option<StrategyResult> {
        self.lock_workflow()
            .get_data("strategy_result")
            .and_then(ContextValue::as_strategy)
            .cloned()
    }

    pub fn performance_result(&self) -> Option<PerformanceResult> {
        self.lock_workflow()
            .get_data("performance_result")
            .and_then(ContextValue::as_performance)
            .cloned()
    }

    pub fn report(&self) -> Option<Report> {
        self.lock_workflow()
            .get_data("report")
            .and_then(ContextValue::as_report)
            .cloned()
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Mirror the workflow status to the Storage port. Best effort: failures
    /// are logged and swallowed.
    fn save_workflow_state(&self) {
        let Some(storage) = &self.storage else {
            return;
        };
        let status = self.workflow_status();
        match serde_json::to_value(&status) {
            Ok(value) => {
                let key = format!("workflow_state_{DEFAULT_NAMESPACE}");
                if let Err(e) = storage.save(&key, &value) {
                    warn!(error = %e, "Failed to persist workflow state");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize workflow state"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sample;
    use chrono::TimeZone;

    /// Small beating session: enough rows to pass preprocessing, with tacks.
    fn test_frame() -> TrackFrame {
        let mut samples = Vec::new();
        let mut t = 0i64;
        for leg in 0..4 {
            let course = if leg % 2 == 0 { 45.0 } else { 315.0 };
            for k in 0..45 {
                let speed = if k < 4 { 3.6 + k as f64 * 0.4 } else { 5.4 };
                samples.push(Sample {
                    timestamp: chrono::Utc
                        .timestamp_opt(1_700_000_000 + t, 0)
                        .single()
                        .expect("valid ts"),
                    latitude: 35.6 + t as f64 * 1e-5,
                    longitude: 139.7 + t as f64 * 5e-6,
                    course,
                    speed,
                });
                t += 1;
            }
        }
        TrackFrame::from_samples(&samples)
    }

    #[test]
    fn uninitialized_coordinator_refuses_to_run() {
        let coordinator = AnalysisCoordinator::new();
        assert!(matches!(
            coordinator.run_workflow(None, None, false),
            Err(CoordinatorError::NotInitialized)
        ));
        assert!(matches!(
            coordinator.run_step("preprocess", false),
            Err(CoordinatorError::NotInitialized)
        ));
    }

    #[test]
    fn default_workflow_runs_to_completion() {
        let coordinator = AnalysisCoordinator::new();
        coordinator
            .initialize(test_frame(), Vec::new())
            .expect("initialize");

        let summary = coordinator
            .run_workflow(None, None, false)
            .expect("workflow runs");
        assert_eq!(summary.total, 5);
        assert_eq!(summary.completed, 5, "statuses: {:?}", summary.step_statuses);

        // Every published key is present.
        assert!(coordinator.processed_track().is_some());
        assert!(coordinator.preprocess_stats().is_some());
        assert!(coordinator.wind_result().is_some());
        assert!(coordinator.strategy_result().is_some());
        assert!(coordinator.performance_result().is_some());
        assert!(coordinator.report().is_some());
    }

    #[test]
    fn step_order_is_topological() {
        let coordinator = AnalysisCoordinator::new();
        coordinator
            .initialize(test_frame(), Vec::new())
            .expect("initialize");

        let order = {
            let controller = coordinator.lock_workflow();
            controller.step_ids().to_vec()
        };
        let position = |id: &str| order.iter().position(|s| s == id).expect("step present");
        assert!(position("preprocess") < position("wind_estimation"));
        assert!(position("wind_estimation") < position("strategy_detection"));
        assert!(position("wind_estimation") < position("performance_analysis"));
        assert!(position("report_creation") == order.len() - 1);
    }

    #[test]
    fn background_run_matches_foreground() {
        let coordinator = AnalysisCoordinator::new();
        coordinator
            .initialize(test_frame(), Vec::new())
            .expect("initialize");

        coordinator
            .run_workflow_in_background(None)
            .expect("background start");
        coordinator.wait_for_background();

        let status = coordinator.background_status();
        assert!(status.completed, "status: {status:?}");
        assert!(coordinator.report().is_some());
    }

    #[test]
    fn workflow_state_persisted_when_storage_attached() {
        let storage = Arc::new(crate::storage::MemoryStorage::new());
        let coordinator = AnalysisCoordinator::new()
            .with_storage(Arc::clone(&storage) as Arc<dyn Storage>);
        coordinator
            .initialize(test_frame(), Vec::new())
            .expect("initialize");
        coordinator
            .run_workflow(None, None, false)
            .expect("workflow runs");

        let saved = storage
            .load(&format!("workflow_state_{DEFAULT_NAMESPACE}"))
            .expect("load")
            .expect("present");
        assert_eq!(saved["completed"], 5);
    }
}
