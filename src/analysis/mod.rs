//! Analysis kernels.
//!
//! Four deterministic kernels over preprocessed tracks:
//!
//! - [`preprocess::preprocess_track`] - cleaning, sorting, derived arrays
//! - [`wind::WindEstimator`] - true wind vector with confidence
//! - [`strategy::StrategyDetector`] - wind-shift / tack / layline points
//! - [`performance::PerformanceAnalyzer`] - metrics and composite score
//!
//! All math here is pure geometry/statistics. Kernels read their parameter
//! namespace from the registry, memoize through the analysis cache, and never
//! panic: every fault surfaces as an [`AnalysisError`].

pub mod geo;
pub mod performance;
pub mod polar;
pub mod preprocess;
pub mod strategy;
pub mod wind;

use thiserror::Error;

pub use performance::PerformanceAnalyzer;
pub use preprocess::preprocess_track;
pub use strategy::StrategyDetector;
pub use wind::WindEstimator;

/// Error type shared by the analysis kernels.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Required column missing: {0}")]
    MissingColumn(String),

    #[error("Column '{0}' is invalid: {1}")]
    InvalidColumn(String, String),

    #[error("Track is empty")]
    EmptyTrack,

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Computation failed: {0}")]
    Computation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
