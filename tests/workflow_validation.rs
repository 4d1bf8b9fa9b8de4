//! Workflow DAG validation and state-machine behavior.

use serde_json::json;

use windward::{
    AnalysisStep, ContextDelta, ContextValue, DataContext, StepError, StepStatus,
    WorkflowController, WorkflowError,
};

fn step(id: &str, deps: &[&str], outputs: &[&str]) -> AnalysisStep {
    let produced: Vec<String> = outputs.iter().map(|s| (*s).to_string()).collect();
    AnalysisStep::new(
        id,
        id,
        "test step",
        move |_: &DataContext| -> Result<ContextDelta, StepError> {
            Ok(produced
                .iter()
                .map(|key| (key.clone(), ContextValue::Json(json!(1))))
                .collect())
        },
    )
    .with_outputs(outputs)
    .with_dependencies(deps)
}

#[test]
fn two_step_cycle_is_rejected_by_every_entry_point() {
    let mut wf = WorkflowController::new("cycle");
    wf.add_step(step("a", &["b"], &[]));
    wf.add_step(step("b", &["a"], &[]));

    let issues = wf.validate_dependencies();
    assert!(
        issues.iter().any(|issue| issue.contains("cycle")),
        "expected a cycle diagnostic in {issues:?}"
    );

    assert!(matches!(
        wf.optimize_step_order(),
        Err(WorkflowError::CyclicWorkflow(_))
    ));
    assert!(matches!(
        wf.run_workflow(None, None, false),
        Err(WorkflowError::CyclicWorkflow(_))
    ));

    // Nothing ran.
    assert_eq!(wf.step_status("a").expect("snapshot").status, StepStatus::NotStarted);
    assert_eq!(wf.step_status("b").expect("snapshot").status, StepStatus::NotStarted);
}

#[test]
fn self_dependency_is_a_cycle() {
    let mut wf = WorkflowController::new("self");
    wf.add_step(step("a", &["a"], &[]));
    assert!(matches!(
        wf.optimize_step_order(),
        Err(WorkflowError::CyclicWorkflow(_))
    ));
}

#[test]
fn unknown_dependency_is_diagnosed_but_not_cyclic() {
    let mut wf = WorkflowController::new("dangling");
    wf.add_step(step("a", &["phantom"], &[]));

    let issues = wf.validate_dependencies();
    assert!(issues.iter().any(|issue| issue.contains("phantom")));
    wf.optimize_step_order().expect("no cycle");
}

#[test]
fn uncovered_inputs_are_reported() {
    let mut wf = WorkflowController::new("coverage");
    wf.add_step(step("producer", &[], &["made"]));
    wf.add_step(
        AnalysisStep::new(
            "consumer",
            "consumer",
            "wants a key nobody makes",
            |_: &DataContext| -> Result<ContextDelta, StepError> { Ok(Vec::new()) },
        )
        .with_inputs(&["made", "never_made"])
        .with_dependencies(&["producer"]),
    );

    let issues = wf.validate_dependencies();
    assert!(
        issues
            .iter()
            .any(|issue| issue.contains("consumer") && issue.contains("never_made")),
        "expected an input-coverage diagnostic in {issues:?}"
    );
}

#[test]
fn topological_order_respects_dependencies() {
    let mut wf = WorkflowController::new("topo");
    // Added intentionally out of order.
    wf.add_step(step("last", &["middle"], &[]));
    wf.add_step(step("middle", &["first"], &[]));
    wf.add_step(step("first", &[], &[]));

    wf.optimize_step_order().expect("acyclic");
    let order = wf.step_ids().to_vec();
    let position = |id: &str| order.iter().position(|s| s == id).expect("present");
    assert!(position("first") < position("middle"));
    assert!(position("middle") < position("last"));
}

#[test]
fn double_reset_equals_single_reset() {
    let mut wf = WorkflowController::new("reset");
    wf.set_data("seed", ContextValue::Json(json!("kept")));
    wf.add_step(step("a", &[], &["x"]));
    wf.add_step(step("b", &["a"], &["y"]));
    wf.run_workflow(None, None, false).expect("runs");
    assert_eq!(wf.available_data_keys(), vec!["seed", "x", "y"]);

    wf.reset_workflow();
    let keys_after_one = wf.available_data_keys();
    let statuses_after_one: Vec<StepStatus> = ["a", "b"]
        .iter()
        .map(|id| wf.step_status(id).expect("snapshot").status)
        .collect();

    wf.reset_workflow();
    let keys_after_two = wf.available_data_keys();
    let statuses_after_two: Vec<StepStatus> = ["a", "b"]
        .iter()
        .map(|id| wf.step_status(id).expect("snapshot").status)
        .collect();

    assert_eq!(keys_after_one, vec!["seed"]);
    assert_eq!(keys_after_one, keys_after_two);
    assert_eq!(statuses_after_one, statuses_after_two);
    assert!(statuses_after_two
        .iter()
        .all(|status| *status == StepStatus::NotStarted));
}

#[test]
fn completed_steps_publish_their_declared_outputs() {
    let mut wf = WorkflowController::new("outputs");
    wf.add_step(step("a", &[], &["x", "y"]));
    wf.add_step(step("b", &["a"], &["z"]));
    wf.run_workflow(None, None, false).expect("runs");

    for id in ["a", "b"] {
        let snapshot = wf.step_status(id).expect("snapshot");
        assert_eq!(snapshot.status, StepStatus::Completed);
        for key in snapshot.produces_output_keys {
            assert!(
                wf.get_data(&key).is_some(),
                "completed step {id} did not publish {key}"
            );
        }
    }
}

#[test]
fn run_slice_between_endpoints() {
    let mut wf = WorkflowController::new("slice");
    wf.add_step(step("one", &[], &["k1"]));
    wf.add_step(step("two", &["one"], &["k2"]));
    wf.add_step(step("three", &["two"], &["k3"]));

    let summary = wf
        .run_workflow(None, Some("two"), false)
        .expect("partial run");
    assert_eq!(summary.total, 2);
    assert_eq!(summary.completed, 2);
    assert_eq!(
        wf.step_status("three").expect("snapshot").status,
        StepStatus::NotStarted
    );

    // Continue from the stop point.
    let summary = wf
        .run_workflow(Some("three"), None, false)
        .expect("tail run");
    assert_eq!(summary.total, 1);
    assert_eq!(summary.completed, 1);
}
