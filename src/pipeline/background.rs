//! Single worker-thread execution of a whole workflow.
//!
//! At most one background run per coordinator. The worker takes the workflow
//! mutex for the duration of each step, so pollers read consistent snapshots
//! between steps and the mutex provides the happens-before edge from one
//! step's writes to the next step's reads. Cancellation is cooperative and
//! only observed at step boundaries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::workflow::WorkflowController;

use super::CoordinatorError;

/// Snapshot of a background run, safe to poll from any thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackgroundStatus {
    pub running: bool,
    /// Fraction of steps finished, in [0, 1].
    pub progress: f64,
    /// Step currently executing (or last executed).
    pub step_id: Option<String>,
    /// True once a run finished with every step completed.
    pub completed: bool,
    pub cancelled: bool,
    pub error: Option<String>,
}

/// Callback invoked from the worker thread after each step transition.
pub type ProgressCallback = Box<dyn Fn(&BackgroundStatus) + Send>;

/// Owns the worker thread and the shared status snapshot.
pub struct BackgroundRunner {
    status: Arc<Mutex<BackgroundStatus>>,
    cancel: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for BackgroundRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundRunner {
    pub fn new() -> Self {
        Self {
            status: Arc::new(Mutex::new(BackgroundStatus::default())),
            cancel: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Current status snapshot.
    pub fn status(&self) -> BackgroundStatus {
        self.status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_running(&self) -> bool {
        self.status().running
    }

    /// Request cancellation; honored before the next step starts.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Block until the current run (if any) finishes.
    pub fn join(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Background worker thread panicked");
                let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
                status.running = false;
                status.error = Some("background worker panicked".to_string());
            }
        }
    }

    /// Start a run over `workflow` on a fresh worker thread.
    pub fn start(
        &self,
        workflow: Arc<Mutex<WorkflowController>>,
        callback: Option<ProgressCallback>,
    ) -> Result<(), CoordinatorError> {
        let mut handle_guard = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = handle_guard.as_ref() {
            if !handle.is_finished() {
                return Err(CoordinatorError::BackgroundRunning);
            }
        }
        // Previous run is done; reap its handle.
        if let Some(finished) = handle_guard.take() {
            let _ = finished.join();
        }

        {
            let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
            *status = BackgroundStatus {
                running: true,
                ..BackgroundStatus::default()
            };
        }
        self.cancel.store(false, Ordering::SeqCst);

        let status = Arc::clone(&self.status);
        let cancel = Arc::clone(&self.cancel);

        let handle = std::thread::spawn(move || {
            run_on_worker(&workflow, &status, &cancel, callback.as_deref());
        });
        *handle_guard = Some(handle);
        Ok(())
    }
}

/// Worker body: run every step in order, publishing progress between steps.
fn run_on_worker(
    workflow: &Arc<Mutex<WorkflowController>>,
    status: &Arc<Mutex<BackgroundStatus>>,
    cancel: &Arc<AtomicBool>,
    callback: Option<&(dyn Fn(&BackgroundStatus) + Send)>,
) {
    let step_ids: Vec<String> = {
        let controller = workflow.lock().unwrap_or_else(|e| e.into_inner());
        controller.step_ids().to_vec()
    };
    let total = step_ids.len();

    let publish = |update: &dyn Fn(&mut BackgroundStatus)| {
        let snapshot = {
            let mut guard = status.lock().unwrap_or_else(|e| e.into_inner());
            update(&mut guard);
            guard.clone()
        };
        if let Some(callback) = callback {
            callback(&snapshot);
        }
    };

    let mut failed = false;
    for (index, step_id) in step_ids.iter().enumerate() {
        if cancel.load(Ordering::SeqCst) {
            info!(step_id = %step_id, "Background run cancelled before step");
            publish(&|s: &mut BackgroundStatus| {
                s.cancelled = true;
            });
            break;
        }

        publish(&|s: &mut BackgroundStatus| {
            s.step_id = Some(step_id.clone());
            s.progress = index as f64 / total.max(1) as f64;
        });

        let success = {
            let mut controller = workflow.lock().unwrap_or_else(|e| e.into_inner());
            match controller.run_step(step_id, false) {
                Ok(success) => {
                    if !success {
                        let message = controller
                            .step_status(step_id)
                            .and_then(|s| s.error_message)
                            .unwrap_or_else(|| format!("Step '{step_id}' did not complete"));
                        let mut guard = status.lock().unwrap_or_else(|e| e.into_inner());
                        guard.error = Some(message);
                    }
                    success
                }
                Err(e) => {
                    let mut guard = status.lock().unwrap_or_else(|e| e.into_inner());
                    guard.error = Some(e.to_string());
                    false
                }
            }
        };

        publish(&|s: &mut BackgroundStatus| {
            s.progress = (index + 1) as f64 / total.max(1) as f64;
        });

        if !success {
            failed = true;
            break;
        }
    }

    let all_completed = {
        let controller = workflow.lock().unwrap_or_else(|e| e.into_inner());
        let ws = controller.workflow_status();
        ws.completed == ws.total_steps && ws.total_steps > 0
    };

    publish(&|s: &mut BackgroundStatus| {
        s.running = false;
        s.completed = all_completed && !failed && !s.cancelled;
        if s.completed {
            s.progress = 1.0;
        }
    });
}
