//! Workflow engine.
//!
//! Steps declare their dependencies and input/output keys; the controller
//! validates the DAG, orders the steps topologically and runs them over a
//! shared [`DataContext`]. Step faults never propagate: a failing step is
//! marked Failed with its message captured, a step whose prerequisites are
//! unmet is marked Skipped.

pub mod context;

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use context::{ContextDelta, ContextValue, DataContext};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Unknown step id: {0}")]
    UnknownStep(String),

    #[error("Workflow contains a dependency cycle: {0}")]
    CyclicWorkflow(String),
}

// ============================================================================
// Step status and snapshots
// ============================================================================

/// Lifecycle of a step within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::NotStarted => write!(f, "not_started"),
            StepStatus::InProgress => write!(f, "in_progress"),
            StepStatus::Completed => write!(f, "completed"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Serializable view of a step's definition and state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub step_id: String,
    pub name: String,
    pub description: String,
    pub required_input_keys: Vec<String>,
    pub produces_output_keys: Vec<String>,
    pub dependencies: Vec<String>,
    pub status: StepStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub runtime_seconds: Option<f64>,
    pub error_message: Option<String>,
    pub warnings: Vec<String>,
}

/// One line of the execution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub step_id: String,
    pub status: StepStatus,
    pub time: DateTime<Utc>,
    pub runtime_seconds: Option<f64>,
}

/// Aggregate status of the whole workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub namespace: String,
    pub total_steps: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_progress: usize,
    pub not_started: usize,
    pub skipped: usize,
    pub progress_percentage: f64,
    pub current_step: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub runtime_seconds: Option<f64>,
    /// Most recent entries, newest last (at most 10).
    pub execution_log: Vec<ExecutionLogEntry>,
}

/// Result summary of a [`WorkflowController::run_workflow`] call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub namespace: String,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub step_statuses: BTreeMap<String, StepStatus>,
    pub runtime_seconds: f64,
}

// ============================================================================
// Steps
// ============================================================================

/// Error surfaced by a step function.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct StepError(pub String);

impl From<crate::analysis::AnalysisError> for StepError {
    fn from(err: crate::analysis::AnalysisError) -> Self {
        StepError(err.to_string())
    }
}

impl From<String> for StepError {
    fn from(message: String) -> Self {
        StepError(message)
    }
}

impl From<&str> for StepError {
    fn from(message: &str) -> Self {
        StepError(message.to_string())
    }
}

/// A step's executable body.
///
/// Implementations read their declared inputs from the context and return a
/// delta of produced values; they must not mutate anything else.
pub trait StepRun: Send + Sync {
    fn run(&self, context: &DataContext) -> Result<ContextDelta, StepError>;
}

impl<F> StepRun for F
where
    F: Fn(&DataContext) -> Result<ContextDelta, StepError> + Send + Sync,
{
    fn run(&self, context: &DataContext) -> Result<ContextDelta, StepError> {
        self(context)
    }
}

/// A declared analysis step.
pub struct AnalysisStep {
    pub step_id: String,
    pub name: String,
    pub description: String,
    runner: Box<dyn StepRun>,
    pub required_input_keys: Vec<String>,
    pub produces_output_keys: Vec<String>,
    pub dependencies: Vec<String>,

    // Mutable run state
    pub status: StepStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub runtime_seconds: Option<f64>,
    pub error_message: Option<String>,
    pub warnings: Vec<String>,
}

impl std::fmt::Debug for AnalysisStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisStep")
            .field("step_id", &self.step_id)
            .field("status", &self.status)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

impl AnalysisStep {
    pub fn new(
        step_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        runner: impl StepRun + 'static,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            name: name.into(),
            description: description.into(),
            runner: Box::new(runner),
            required_input_keys: Vec::new(),
            produces_output_keys: Vec::new(),
            dependencies: Vec::new(),
            status: StepStatus::NotStarted,
            start_time: None,
            end_time: None,
            runtime_seconds: None,
            error_message: None,
            warnings: Vec::new(),
        }
    }

    pub fn with_inputs(mut self, keys: &[&str]) -> Self {
        self.required_input_keys = keys.iter().map(|k| (*k).to_string()).collect();
        self
    }

    pub fn with_outputs(mut self, keys: &[&str]) -> Self {
        self.produces_output_keys = keys.iter().map(|k| (*k).to_string()).collect();
        self
    }

    pub fn with_dependencies(mut self, ids: &[&str]) -> Self {
        self.dependencies = ids.iter().map(|k| (*k).to_string()).collect();
        self
    }

    /// Return the step to its pristine NotStarted state.
    pub fn reset(&mut self) {
        self.status = StepStatus::NotStarted;
        self.start_time = None;
        self.end_time = None;
        self.runtime_seconds = None;
        self.error_message = None;
        self.warnings.clear();
    }

    pub fn snapshot(&self) -> StepSnapshot {
        StepSnapshot {
            step_id: self.step_id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            required_input_keys: self.required_input_keys.clone(),
            produces_output_keys: self.produces_output_keys.clone(),
            dependencies: self.dependencies.clone(),
            status: self.status,
            start_time: self.start_time,
            end_time: self.end_time,
            runtime_seconds: self.runtime_seconds,
            error_message: self.error_message.clone(),
            warnings: self.warnings.clone(),
        }
    }
}

// ============================================================================
// Controller
// ============================================================================

/// Orders and runs steps over a shared context.
pub struct WorkflowController {
    pub namespace: String,
    steps: HashMap<String, AnalysisStep>,
    step_order: Vec<String>,
    context: DataContext,
    current_step_id: Option<String>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    execution_log: Vec<ExecutionLogEntry>,
}

impl std::fmt::Debug for WorkflowController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowController")
            .field("namespace", &self.namespace)
            .field("steps", &self.step_order)
            .finish()
    }
}

impl WorkflowController {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            steps: HashMap::new(),
            step_order: Vec::new(),
            context: DataContext::new(),
            current_step_id: None,
            start_time: None,
            end_time: None,
            execution_log: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Append a step. Re-adding an existing id replaces the step and keeps
    /// its position in the order.
    pub fn add_step(&mut self, step: AnalysisStep) {
        if self.steps.contains_key(&step.step_id) {
            warn!(step_id = %step.step_id, "Step id already exists, replacing");
        }
        if !self.step_order.contains(&step.step_id) {
            self.step_order.push(step.step_id.clone());
        }
        self.steps.insert(step.step_id.clone(), step);
    }

    /// Override the traversal order. Unknown ids error; steps left out of the
    /// ordering are logged and keep running last in insertion order.
    pub fn set_step_order(&mut self, step_ids: Vec<String>) -> Result<(), WorkflowError> {
        let missing: Vec<&String> = step_ids
            .iter()
            .filter(|id| !self.steps.contains_key(*id))
            .collect();
        if !missing.is_empty() {
            return Err(WorkflowError::UnknownStep(
                missing
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            ));
        }

        let ordered: HashSet<&String> = step_ids.iter().collect();
        let mut left_out: Vec<String> = self
            .step_order
            .iter()
            .filter(|id| !ordered.contains(*id))
            .cloned()
            .collect();
        if !left_out.is_empty() {
            warn!(steps = ?left_out, "Steps missing from the explicit order, appending");
        }

        self.step_order = step_ids;
        self.step_order.append(&mut left_out);
        Ok(())
    }

    pub fn step_ids(&self) -> &[String] {
        &self.step_order
    }

    // ------------------------------------------------------------------
    // Validation and ordering
    // ------------------------------------------------------------------

    /// Diagnose dependency problems: unknown dependencies, cycles, and
    /// required inputs no dependency produces.
    pub fn validate_dependencies(&self) -> Vec<String> {
        let mut issues = Vec::new();

        for id in &self.step_order {
            if let Some(step) = self.steps.get(id) {
                for dep in &step.dependencies {
                    if !self.steps.contains_key(dep) {
                        issues.push(format!(
                            "Step '{id}' depends on unknown step '{dep}'"
                        ));
                    }
                }
            }
        }

        for cycle in self.find_cycles() {
            issues.push(format!("Dependency cycle detected involving '{cycle}'"));
        }

        // Input coverage: every required key should come from a dependency
        // (or be seeded externally, which validation cannot see - those show
        // up here as advisory findings).
        for id in &self.step_order {
            let Some(step) = self.steps.get(id) else {
                continue;
            };
            let mut available: HashSet<&String> = HashSet::new();
            for dep in &step.dependencies {
                if let Some(dep_step) = self.steps.get(dep) {
                    available.extend(dep_step.produces_output_keys.iter());
                }
            }
            let uncovered: Vec<&String> = step
                .required_input_keys
                .iter()
                .filter(|key| !available.contains(*key) && !self.context.contains_key(key))
                .collect();
            if !uncovered.is_empty() {
                issues.push(format!(
                    "Step '{id}' requires inputs not produced by its dependencies: {}",
                    uncovered
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ));
            }
        }

        issues
    }

    /// Step ids on at least one dependency cycle (three-color DFS).
    fn find_cycles(&self) -> Vec<String> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut colors: HashMap<&String, Color> =
            self.steps.keys().map(|id| (id, Color::White)).collect();
        let mut cycles = Vec::new();

        fn visit<'a>(
            id: &'a String,
            steps: &'a HashMap<String, AnalysisStep>,
            colors: &mut HashMap<&'a String, Color>,
            cycles: &mut Vec<String>,
        ) {
            colors.insert(id, Color::Gray);
            if let Some(step) = steps.get(id) {
                for dep in &step.dependencies {
                    let Some(dep_key) = steps.keys().find(|k| *k == dep) else {
                        continue;
                    };
                    match colors.get(dep_key).copied().unwrap_or(Color::White) {
                        Color::Gray => cycles.push(dep.clone()),
                        Color::White => visit(dep_key, steps, colors, cycles),
                        Color::Black => {}
                    }
                }
            }
            colors.insert(id, Color::Black);
        }

        for id in &self.step_order {
            if let Some(key) = self.steps.keys().find(|k| *k == id) {
                if colors.get(key) == Some(&Color::White) {
                    visit(key, &self.steps, &mut colors, &mut cycles);
                }
            }
        }

        cycles
    }

    /// Topologically sort the steps by their dependencies.
    pub fn optimize_step_order(&mut self) -> Result<(), WorkflowError> {
        let cycles = self.find_cycles();
        if let Some(cycle) = cycles.first() {
            return Err(WorkflowError::CyclicWorkflow(cycle.clone()));
        }

        let mut visited: HashSet<String> = HashSet::new();
        let mut ordered: Vec<String> = Vec::new();

        fn visit(
            id: &String,
            steps: &HashMap<String, AnalysisStep>,
            visited: &mut HashSet<String>,
            ordered: &mut Vec<String>,
        ) {
            if visited.contains(id) {
                return;
            }
            visited.insert(id.clone());
            if let Some(step) = steps.get(id) {
                for dep in &step.dependencies {
                    if steps.contains_key(dep) {
                        visit(dep, steps, visited, ordered);
                    }
                }
            }
            ordered.push(id.clone());
        }

        // Seed from the current order for a deterministic result.
        let seeds = self.step_order.clone();
        for id in &seeds {
            visit(id, &self.steps, &mut visited, &mut ordered);
        }

        self.step_order = ordered;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Prerequisites
    // ------------------------------------------------------------------

    /// Whether a step may run now: every dependency Completed and every
    /// required input key present.
    pub fn check_prerequisites(&self, step_id: &str) -> (bool, Vec<String>) {
        let Some(step) = self.steps.get(step_id) else {
            return (false, vec![format!("Step '{step_id}' does not exist")]);
        };

        let mut missing = Vec::new();
        for dep in &step.dependencies {
            match self.steps.get(dep) {
                None => missing.push(format!("Dependency step '{dep}' does not exist")),
                Some(dep_step) if dep_step.status != StepStatus::Completed => {
                    missing.push(format!(
                        "Dependency step '{dep}' is not completed (status: {})",
                        dep_step.status
                    ));
                }
                Some(_) => {}
            }
        }

        for key in &step.required_input_keys {
            if !self.context.contains_key(key) {
                missing.push(format!("Required input '{key}' is not in the context"));
            }
        }

        (missing.is_empty(), missing)
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Run one step.
    ///
    /// Returns `Ok(true)` on completion, `Ok(false)` when the step was
    /// skipped or failed (details on the step), and `Err` only for an
    /// unknown id. An explicit run always resets the step first; `force`
    /// bypasses the prerequisite check.
    pub fn run_step(&mut self, step_id: &str, force: bool) -> Result<bool, WorkflowError> {
        let (prerequisites_ok, missing) = if self.steps.contains_key(step_id) {
            self.check_prerequisites(step_id)
        } else {
            return Err(WorkflowError::UnknownStep(step_id.to_string()));
        };
        self.context.mark_run_started();

        // The step is taken out of the map for the duration of the run so
        // its body can read the context without aliasing the controller.
        let mut step = self
            .steps
            .remove(step_id)
            .ok_or_else(|| WorkflowError::UnknownStep(step_id.to_string()))?;
        step.reset();

        if !prerequisites_ok && !force {
            warn!(step_id = %step_id, missing = ?missing, "Prerequisites unmet, skipping step");
            step.status = StepStatus::Skipped;
            step.error_message = Some(format!("Prerequisites not met: {}", missing.join("; ")));
            self.steps.insert(step_id.to_string(), step);
            self.log_execution(step_id);
            return Ok(false);
        }

        step.status = StepStatus::InProgress;
        step.start_time = Some(Utc::now());
        self.current_step_id = Some(step_id.to_string());
        info!(step_id = %step_id, name = %step.name, "Starting step");

        let outcome = step.runner.run(&self.context);

        step.end_time = Some(Utc::now());
        step.runtime_seconds = step
            .start_time
            .zip(step.end_time)
            .map(|(start, end)| (end - start).num_milliseconds() as f64 / 1000.0);

        let success = match outcome {
            Ok(delta) => {
                let produced: HashSet<&String> = delta.iter().map(|(key, _)| key).collect();
                let missing_outputs: Vec<String> = step
                    .produces_output_keys
                    .iter()
                    .filter(|key| !produced.contains(key) && !self.context.contains_key(key))
                    .cloned()
                    .collect();

                self.context.apply_delta(delta);
                if missing_outputs.is_empty() {
                    step.status = StepStatus::Completed;
                    info!(
                        step_id = %step_id,
                        runtime = step.runtime_seconds.unwrap_or(0.0),
                        "Step completed"
                    );
                    true
                } else {
                    step.status = StepStatus::Failed;
                    step.error_message = Some(format!(
                        "Step did not produce declared outputs: {}",
                        missing_outputs.join(", ")
                    ));
                    error!(step_id = %step_id, missing = ?missing_outputs, "Step output incomplete");
                    false
                }
            }
            Err(e) => {
                step.status = StepStatus::Failed;
                step.error_message = Some(e.to_string());
                error!(step_id = %step_id, error = %e, "Step failed");
                false
            }
        };

        self.steps.insert(step_id.to_string(), step);
        self.log_execution(step_id);
        self.current_step_id = None;
        Ok(success)
    }

    fn log_execution(&mut self, step_id: &str) {
        if let Some(step) = self.steps.get(step_id) {
            self.execution_log.push(ExecutionLogEntry {
                step_id: step_id.to_string(),
                status: step.status,
                time: Utc::now(),
                runtime_seconds: step.runtime_seconds,
            });
        }
    }

    /// Run steps in order between the optional endpoints (inclusive). Stops
    /// at the first failure unless `ignore_errors`. Refuses to start on a
    /// cyclic graph.
    pub fn run_workflow(
        &mut self,
        start_from: Option<&str>,
        stop_at: Option<&str>,
        ignore_errors: bool,
    ) -> Result<WorkflowSummary, WorkflowError> {
        if let Some(cycle) = self.find_cycles().first() {
            return Err(WorkflowError::CyclicWorkflow(cycle.clone()));
        }

        self.start_time = Some(Utc::now());
        info!(namespace = %self.namespace, "Starting workflow run");

        let start_idx = start_from
            .and_then(|id| self.step_order.iter().position(|s| s == id))
            .unwrap_or(0);
        let stop_idx = stop_at
            .and_then(|id| self.step_order.iter().position(|s| s == id))
            .unwrap_or_else(|| self.step_order.len().saturating_sub(1));

        let steps_to_run: Vec<String> = self
            .step_order
            .iter()
            .skip(start_idx)
            .take(stop_idx.saturating_sub(start_idx) + 1)
            .cloned()
            .collect();

        let total = steps_to_run.len();
        let mut completed = 0usize;
        let mut failed = 0usize;

        for (index, step_id) in steps_to_run.iter().enumerate() {
            debug!(progress = format!("{}/{}", index + 1, total), step_id = %step_id, "Workflow progress");
            let success = self.run_step(step_id, false)?;
            if success {
                completed += 1;
            } else {
                failed += 1;
                if !ignore_errors {
                    error!(step_id = %step_id, "Stopping workflow after failure");
                    break;
                }
            }
        }

        self.end_time = Some(Utc::now());
        let runtime_seconds = self
            .start_time
            .zip(self.end_time)
            .map(|(start, end)| (end - start).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        info!(
            namespace = %self.namespace,
            completed = completed,
            failed = failed,
            total = total,
            "Workflow run finished"
        );

        Ok(WorkflowSummary {
            namespace: self.namespace.clone(),
            total,
            completed,
            failed,
            success_rate: if total > 0 {
                completed as f64 / total as f64
            } else {
                0.0
            },
            step_statuses: steps_to_run
                .iter()
                .filter_map(|id| self.steps.get(id).map(|s| (id.clone(), s.status)))
                .collect(),
            runtime_seconds,
        })
    }

    /// Return every step to NotStarted and drop all non-seeded context.
    pub fn reset_workflow(&mut self) {
        for step in self.steps.values_mut() {
            step.reset();
        }
        self.context.reset();
        self.current_step_id = None;
        self.start_time = None;
        self.end_time = None;
        self.execution_log.clear();
        info!(namespace = %self.namespace, "Workflow reset");
    }

    // ------------------------------------------------------------------
    // Data access and status
    // ------------------------------------------------------------------

    pub fn get_data(&self, key: &str) -> Option<&ContextValue> {
        self.context.get(key)
    }

    pub fn set_data(&mut self, key: impl Into<String>, value: ContextValue) {
        self.context.set(key, value);
    }

    pub fn available_data_keys(&self) -> Vec<String> {
        self.context.keys()
    }

    pub fn context(&self) -> &DataContext {
        &self.context
    }

    pub fn step_status(&self, step_id: &str) -> Option<StepSnapshot> {
        self.steps.get(step_id).map(AnalysisStep::snapshot)
    }

    pub fn workflow_status(&self) -> WorkflowStatus {
        let count = |status: StepStatus| {
            self.steps
                .values()
                .filter(|step| step.status == status)
                .count()
        };

        let total = self.steps.len();
        let completed = count(StepStatus::Completed);
        WorkflowStatus {
            namespace: self.namespace.clone(),
            total_steps: total,
            completed,
            failed: count(StepStatus::Failed),
            in_progress: count(StepStatus::InProgress),
            not_started: count(StepStatus::NotStarted),
            skipped: count(StepStatus::Skipped),
            progress_percentage: if total > 0 {
                completed as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            current_step: self.current_step_id.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            runtime_seconds: self
                .start_time
                .zip(self.end_time)
                .map(|(start, end)| (end - start).num_milliseconds() as f64 / 1000.0),
            execution_log: self
                .execution_log
                .iter()
                .rev()
                .take(10)
                .rev()
                .cloned()
                .collect(),
        }
    }
}
