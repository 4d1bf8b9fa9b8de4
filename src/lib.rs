//! Windward: Sailing Race Tactical Intelligence
//!
//! Batch analysis engine that turns GPS race/training tracks into tactical
//! information: the true wind vector, strategic decision points (wind shifts,
//! tack opportunities, laylines) and a quantitative performance score.
//!
//! ## Architecture
//!
//! - **Analysis kernels**: preprocessing, wind estimation, strategy-point
//!   detection, performance scoring
//! - **Workflow engine**: dependency-ordered steps over a shared data context
//! - **Parameter registry**: typed definitions, namespaces, presets
//! - **Analysis cache**: fingerprint-keyed memoization with TTL and eviction
//! - **Pipeline coordinator**: wires everything into the default workflow

pub mod analysis;
pub mod cache;
pub mod params;
pub mod pipeline;
pub mod storage;
pub mod types;
pub mod workflow;

// Re-export the core data types
pub use types::{
    Mark, Maneuver, ManeuverType, OptimalVmg, PerformanceResult, ProcessedTrack, Report,
    RoundingSide, Sample, Series, StrategyPoint, StrategyResult, Track, TrackFrame, WindEstimate,
    WindMethod, WindResult,
};

// Re-export the kernels
pub use analysis::{
    preprocess_track, AnalysisError, PerformanceAnalyzer, StrategyDetector, WindEstimator,
};

// Re-export the substrate
pub use cache::{AnalysisCache, CacheError, CacheStats};
pub use params::{
    ParameterDefinition, ParameterError, ParameterNamespace, ParameterPreset, ParameterRegistry,
    ValueType,
};
pub use storage::{MemoryStorage, Storage, StorageError, StorageInfo};

// Re-export the workflow engine and facade
pub use pipeline::{AnalysisCoordinator, BackgroundStatus};
pub use workflow::{
    AnalysisStep, ContextDelta, ContextValue, DataContext, StepError, StepRun, StepSnapshot,
    StepStatus, WorkflowController, WorkflowError, WorkflowStatus, WorkflowSummary,
};
