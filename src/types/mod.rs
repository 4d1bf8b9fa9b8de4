//! Core data types shared across kernels, workflow and pipeline.

pub mod mark;
pub mod performance;
pub mod report;
pub mod strategy;
pub mod track;
pub mod wind;

pub use mark::{Mark, RoundingSide};
pub use performance::{
    AngleVmgBin, BasicStats, ManeuverAnalysis, ManeuverClassStats, OverallPerformance,
    PerformanceResult, SailingModePercentage, SailingModeTime, SpeedStats, TimeSeries, VmgAnalysis,
    VmgModeAnalysis, VmgStats,
};
pub use report::{DataSummary, PerformanceSummary, Report, StrategySummary, WindSummary};
pub use strategy::{StrategyPoint, StrategyResult, TackSide};
pub use track::{
    PreprocessStats, ProcessedTrack, Sample, Series, Track, TrackFrame, REQUIRED_COLUMNS,
};
pub use wind::{Maneuver, ManeuverType, OptimalVmg, SailingMode, WindEstimate, WindMethod, WindResult};
