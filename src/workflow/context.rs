//! The shared data context steps read from and write to.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{
    Mark, PerformanceResult, PreprocessStats, ProcessedTrack, Report, StrategyResult, TrackFrame,
    WindResult,
};

/// A value living under a context key.
///
/// A closed sum over the domain types keeps step binding exhaustive and
/// type-checked; `Json` is the escape hatch for host-provided auxiliary data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ContextValue {
    Frame(TrackFrame),
    Track(ProcessedTrack),
    Wind(WindResult),
    Strategy(StrategyResult),
    Performance(PerformanceResult),
    Report(Report),
    Stats(PreprocessStats),
    Marks(Vec<Mark>),
    Json(Value),
}

impl ContextValue {
    pub fn as_frame(&self) -> Option<&TrackFrame> {
        match self {
            ContextValue::Frame(frame) => Some(frame),
            _ => None,
        }
    }

    pub fn as_track(&self) -> Option<&ProcessedTrack> {
        match self {
            ContextValue::Track(track) => Some(track),
            _ => None,
        }
    }

    pub fn as_wind(&self) -> Option<&WindResult> {
        match self {
            ContextValue::Wind(wind) => Some(wind),
            _ => None,
        }
    }

    pub fn as_strategy(&self) -> Option<&StrategyResult> {
        match self {
            ContextValue::Strategy(strategy) => Some(strategy),
            _ => None,
        }
    }

    pub fn as_performance(&self) -> Option<&PerformanceResult> {
        match self {
            ContextValue::Performance(performance) => Some(performance),
            _ => None,
        }
    }

    pub fn as_report(&self) -> Option<&Report> {
        match self {
            ContextValue::Report(report) => Some(report),
            _ => None,
        }
    }

    pub fn as_stats(&self) -> Option<&PreprocessStats> {
        match self {
            ContextValue::Stats(stats) => Some(stats),
            _ => None,
        }
    }

    pub fn as_marks(&self) -> Option<&[Mark]> {
        match self {
            ContextValue::Marks(marks) => Some(marks),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ContextValue::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Keyed values a step hands back for merging into the context.
pub type ContextDelta = Vec<(String, ContextValue)>;

/// String-keyed store shared by the steps of one workflow run.
///
/// Keys written before the first run are "seeded" inputs and survive a
/// workflow reset; everything a step writes is dropped by reset.
#[derive(Debug, Default)]
pub struct DataContext {
    values: HashMap<String, ContextValue>,
    seeded: HashSet<String>,
    run_started: bool,
}

impl DataContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Externally seed a value. Before the first run the key is marked as an
    /// input and survives resets.
    pub fn set(&mut self, key: impl Into<String>, value: ContextValue) {
        let key = key.into();
        if !self.run_started {
            self.seeded.insert(key.clone());
        }
        self.values.insert(key, value);
    }

    /// Merge a step's output delta. Later writes overwrite earlier ones.
    pub fn apply_delta(&mut self, delta: ContextDelta) {
        for (key, value) in delta {
            self.values.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Available keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Freeze the seeded-key set; called by the engine at the first step run.
    pub(crate) fn mark_run_started(&mut self) {
        self.run_started = true;
    }

    /// Drop everything except seeded inputs and re-open seeding.
    pub(crate) fn reset(&mut self) {
        let seeded = std::mem::take(&mut self.seeded);
        self.values.retain(|key, _| seeded.contains(key));
        self.seeded = seeded;
        self.run_started = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn seeded_keys_survive_reset() {
        let mut context = DataContext::new();
        context.set("input_df", ContextValue::Json(json!({"rows": 3})));
        context.mark_run_started();
        context.apply_delta(vec![(
            "wind_result".to_string(),
            ContextValue::Json(json!({"direction": 225.0})),
        )]);

        assert_eq!(context.len(), 2);
        context.reset();
        assert_eq!(context.keys(), vec!["input_df"]);

        // Seeding is open again after a reset.
        context.set("marks", ContextValue::Marks(vec![]));
        context.mark_run_started();
        context.reset();
        assert_eq!(context.keys(), vec!["input_df", "marks"]);
    }

    #[test]
    fn values_written_after_run_start_are_not_seeded() {
        let mut context = DataContext::new();
        context.mark_run_started();
        context.set("late", ContextValue::Json(json!(1)));
        context.reset();
        assert!(context.is_empty());
    }

    #[test]
    fn accessors_reject_wrong_variant() {
        let value = ContextValue::Json(json!(5));
        assert!(value.as_json().is_some());
        assert!(value.as_track().is_none());
        assert!(value.as_wind().is_none());
    }

    #[test]
    fn later_delta_overwrites() {
        let mut context = DataContext::new();
        context.apply_delta(vec![("k".to_string(), ContextValue::Json(json!(1)))]);
        context.apply_delta(vec![("k".to_string(), ContextValue::Json(json!(2)))]);
        assert_eq!(context.get("k").and_then(ContextValue::as_json), Some(&json!(2)));
    }
}
