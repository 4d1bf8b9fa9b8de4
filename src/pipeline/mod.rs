//! Pipeline orchestration.
//!
//! The [`AnalysisCoordinator`] is the facade the host talks to: it wires the
//! parameter registry, the analysis cache and the four kernels into the
//! default workflow DAG, runs steps in the foreground or on a single worker
//! thread, and exposes status snapshots and typed result getters.

pub mod background;
pub mod coordinator;

use thiserror::Error;

pub use background::{BackgroundRunner, BackgroundStatus, ProgressCallback};
pub use coordinator::{AnalysisCoordinator, StepRunReport};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Coordinator is not initialized with track data")]
    NotInitialized,

    #[error("A background run is already in progress")]
    BackgroundRunning,

    #[error(transparent)]
    Workflow(#[from] crate::workflow::WorkflowError),
}
