//! Parameter registry: typed definitions, current values, namespaces, presets.
//!
//! Definitions are registered once at construction and stay fixed; current
//! values mutate through [`ParameterRegistry::set`]. Every mutation is
//! validated against the owning definition and, when the value actually
//! changes, announced to registered change callbacks (batched for
//! [`ParameterRegistry::set_many`], [`ParameterRegistry::apply_preset`] and
//! the reset family).

pub mod defaults;
pub mod export;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::storage::{Storage, StorageError};

pub use export::ParameterExport;

/// Storage key prefix for persisted values and presets.
const STORAGE_KEY_PREFIX: &str = "parameter_manager_";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("Unknown parameter key: {0}")]
    UnknownParameter(String),

    #[error("Invalid value for parameter '{key}': {value}")]
    InvalidValue { key: String, value: Value },

    #[error("Unknown preset id: {0}")]
    UnknownPreset(String),

    #[error("No storage backend configured")]
    NoStorage,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ============================================================================
// Namespaces and Value Types
// ============================================================================

/// Parameter namespaces, one per consuming subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterNamespace {
    WindEstimation,
    StrategyDetection,
    PerformanceAnalysis,
    DataProcessing,
    Visualization,
    General,
}

impl ParameterNamespace {
    pub const ALL: [ParameterNamespace; 6] = [
        ParameterNamespace::WindEstimation,
        ParameterNamespace::StrategyDetection,
        ParameterNamespace::PerformanceAnalysis,
        ParameterNamespace::DataProcessing,
        ParameterNamespace::Visualization,
        ParameterNamespace::General,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ParameterNamespace::WindEstimation => "wind_estimation",
            ParameterNamespace::StrategyDetection => "strategy_detection",
            ParameterNamespace::PerformanceAnalysis => "performance_analysis",
            ParameterNamespace::DataProcessing => "data_processing",
            ParameterNamespace::Visualization => "visualization",
            ParameterNamespace::General => "general",
        }
    }
}

impl std::fmt::Display for ParameterNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Value type accepted by a parameter definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Int,
    Float,
    Bool,
    Str,
    List,
    Map,
}

impl ValueType {
    /// Type predicate against a JSON value. Floats accept integral numbers;
    /// booleans are never numbers.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            ValueType::Int => value.is_i64() || value.is_u64(),
            ValueType::Float => value.is_number(),
            ValueType::Bool => value.is_boolean(),
            ValueType::Str => value.is_string(),
            ValueType::List => value.is_array(),
            ValueType::Map => value.is_object(),
        }
    }
}

// ============================================================================
// Definitions and Presets
// ============================================================================

/// Typed definition of a single parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub key: String,
    pub display_name: String,
    pub description: String,
    pub default: Value,
    pub value_type: ValueType,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub allowed_values: Option<Vec<Value>>,
    #[serde(default)]
    pub unit: Option<String>,
    pub namespace: ParameterNamespace,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_ui_order")]
    pub ui_order: u32,
    #[serde(default)]
    pub ui_advanced: bool,
    #[serde(default)]
    pub ui_hidden: bool,
}

fn default_ui_order() -> u32 {
    999
}

impl ParameterDefinition {
    /// True when `value` satisfies the definition's type, bounds and
    /// allowed-values constraints. The default must satisfy this predicate.
    pub fn validate(&self, value: &Value) -> bool {
        if !self.value_type.matches(value) {
            return false;
        }

        if matches!(self.value_type, ValueType::Int | ValueType::Float) {
            if let Some(v) = value.as_f64() {
                if let Some(min) = self.min {
                    if v < min {
                        return false;
                    }
                }
                if let Some(max) = self.max {
                    if v > max {
                        return false;
                    }
                }
            }
        }

        if let Some(allowed) = &self.allowed_values {
            return allowed.contains(value);
        }

        true
    }
}

/// Named bundle of parameter values.
///
/// Presets are user artifacts: they may reference keys that no longer exist
/// or carry values the current definitions reject. Applying a preset skips
/// such entries with a log line instead of failing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterPreset {
    pub preset_id: String,
    pub name: String,
    pub description: String,
    pub namespace: ParameterNamespace,
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ParameterPreset {
    pub fn new(
        preset_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        namespace: ParameterNamespace,
        parameters: BTreeMap<String, Value>,
        tags: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            preset_id: preset_id.into(),
            name: name.into(),
            description: description.into(),
            namespace,
            parameters,
            tags,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge `parameters` into the preset and bump `updated_at`.
    pub fn update_parameters(&mut self, parameters: BTreeMap<String, Value>) {
        self.parameters.extend(parameters);
        self.updated_at = Utc::now();
    }
}

/// Registry overview counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSummary {
    pub total_parameters: usize,
    pub total_presets: usize,
    pub namespace_parameters: BTreeMap<String, usize>,
    pub namespace_presets: BTreeMap<String, usize>,
    /// Parameters whose current value differs from the default.
    pub modified_parameters: usize,
}

// ============================================================================
// Registry
// ============================================================================

type ChangeCallback = Box<dyn Fn(&BTreeMap<String, Value>) + Send + Sync>;

/// Central parameter registry.
///
/// Shared across workflow instances behind an `Arc`; all mutations are
/// serialized internally so readers observe consistent snapshots.
pub struct ParameterRegistry {
    definitions: RwLock<BTreeMap<String, ParameterDefinition>>,
    values: RwLock<BTreeMap<String, Value>>,
    presets: RwLock<BTreeMap<String, ParameterPreset>>,
    callbacks: Mutex<Vec<(u64, ChangeCallback)>>,
    next_callback_id: AtomicU64,
    storage: Option<Arc<dyn Storage>>,
}

impl std::fmt::Debug for ParameterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterRegistry")
            .field("definitions", &self.read_definitions().len())
            .field("presets", &self.read_presets().len())
            .field("has_storage", &self.storage.is_some())
            .finish()
    }
}

impl Default for ParameterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterRegistry {
    /// Registry pre-populated with the default parameter set and presets.
    pub fn new() -> Self {
        let registry = Self::empty();
        defaults::register_default_parameters(&registry);
        defaults::register_default_presets(&registry);
        registry
    }

    /// Registry with defaults plus a persistence backend.
    pub fn with_storage(storage: Arc<dyn Storage>) -> Self {
        let mut registry = Self::new();
        registry.storage = Some(storage);
        registry
    }

    /// Registry with no definitions at all (test scaffolding).
    pub fn empty() -> Self {
        Self {
            definitions: RwLock::new(BTreeMap::new()),
            values: RwLock::new(BTreeMap::new()),
            presets: RwLock::new(BTreeMap::new()),
            callbacks: Mutex::new(Vec::new()),
            next_callback_id: AtomicU64::new(1),
            storage: None,
        }
    }

    // ------------------------------------------------------------------
    // Lock helpers (poisoned locks degrade to the inner data)
    // ------------------------------------------------------------------

    fn read_definitions(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, ParameterDefinition>> {
        self.definitions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_definitions(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, ParameterDefinition>> {
        self.definitions.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read_values(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Value>> {
        self.values.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_values(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Value>> {
        self.values.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read_presets(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, ParameterPreset>> {
        self.presets.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_presets(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, ParameterPreset>> {
        self.presets.write().unwrap_or_else(|e| e.into_inner())
    }

    // ------------------------------------------------------------------
    // Definitions
    // ------------------------------------------------------------------

    /// Register a definition, replacing any previous one under the same key.
    /// The current value is only initialized when the key is new.
    pub fn register(&self, definition: ParameterDefinition) {
        let key = definition.key.clone();
        let default = definition.default.clone();

        {
            let mut definitions = self.write_definitions();
            if definitions.contains_key(&key) {
                warn!(key = %key, "Parameter key already registered, replacing definition");
            }
            definitions.insert(key.clone(), definition);
        }

        let mut values = self.write_values();
        values.entry(key).or_insert(default);
    }

    /// Definition for `key`, if registered.
    pub fn definition(&self, key: &str) -> Option<ParameterDefinition> {
        self.read_definitions().get(key).cloned()
    }

    /// All definitions in a namespace, sorted by `ui_order` then key.
    pub fn definitions_by_namespace(
        &self,
        namespace: ParameterNamespace,
    ) -> Vec<ParameterDefinition> {
        let mut defs: Vec<ParameterDefinition> = self
            .read_definitions()
            .values()
            .filter(|d| d.namespace == namespace)
            .cloned()
            .collect();
        defs.sort_by(|a, b| a.ui_order.cmp(&b.ui_order).then(a.key.cmp(&b.key)));
        defs
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    /// Set a parameter value. Fails on unknown keys and invalid values; fires
    /// change callbacks when the stored value actually changed.
    pub fn set(&self, key: &str, value: Value) -> Result<(), ParameterError> {
        let delta = self.set_without_notify(key, value)?;
        if let Some(delta) = delta {
            self.notify_changed(&delta);
        }
        Ok(())
    }

    /// Set several parameters, one result per key, one batched change
    /// notification for everything that changed.
    pub fn set_many(
        &self,
        parameters: BTreeMap<String, Value>,
    ) -> BTreeMap<String, Result<(), ParameterError>> {
        let mut results = BTreeMap::new();
        let mut changed = BTreeMap::new();

        for (key, value) in parameters {
            match self.set_without_notify(&key, value) {
                Ok(Some(delta)) => {
                    changed.extend(delta);
                    results.insert(key, Ok(()));
                }
                Ok(None) => {
                    results.insert(key, Ok(()));
                }
                Err(e) => {
                    results.insert(key, Err(e));
                }
            }
        }

        if !changed.is_empty() {
            self.notify_changed(&changed);
        }
        results
    }

    /// Validate and store; returns the delta map when the value changed.
    fn set_without_notify(
        &self,
        key: &str,
        value: Value,
    ) -> Result<Option<BTreeMap<String, Value>>, ParameterError> {
        let definition = self
            .definition(key)
            .ok_or_else(|| ParameterError::UnknownParameter(key.to_string()))?;

        if !definition.validate(&value) {
            warn!(key = %key, value = %value, "Rejected invalid parameter value");
            return Err(ParameterError::InvalidValue {
                key: key.to_string(),
                value,
            });
        }

        let mut values = self.write_values();
        let old = values.insert(key.to_string(), value.clone());
        if old.as_ref() == Some(&value) {
            return Ok(None);
        }

        let mut delta = BTreeMap::new();
        delta.insert(key.to_string(), value);
        Ok(Some(delta))
    }

    /// Current value for `key`, or `None` when unregistered.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.read_values().get(key).cloned()
    }

    /// Current value for `key`, or `default` when unregistered.
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.as_f64())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get_i64(key).and_then(|v| usize::try_from(v).ok())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_string))
    }

    /// Snapshot of all current values in a namespace.
    pub fn get_by_namespace(&self, namespace: ParameterNamespace) -> BTreeMap<String, Value> {
        let definitions = self.read_definitions();
        let values = self.read_values();
        definitions
            .iter()
            .filter(|(_, d)| d.namespace == namespace)
            .map(|(key, d)| {
                let value = values.get(key).cloned().unwrap_or_else(|| d.default.clone());
                (key.clone(), value)
            })
            .collect()
    }

    /// Snapshot of every current value.
    pub fn all_parameters(&self) -> BTreeMap<String, Value> {
        self.read_values().clone()
    }

    // ------------------------------------------------------------------
    // Resets
    // ------------------------------------------------------------------

    /// Restore one parameter to its default.
    pub fn reset(&self, key: &str) -> Result<(), ParameterError> {
        let definition = self
            .definition(key)
            .ok_or_else(|| ParameterError::UnknownParameter(key.to_string()))?;
        if let Some(delta) = self.set_without_notify(key, definition.default)? {
            self.notify_changed(&delta);
        }
        Ok(())
    }

    /// Restore every parameter in a namespace to its default. One batched
    /// notification.
    pub fn reset_namespace(&self, namespace: ParameterNamespace) {
        let defaults: Vec<(String, Value)> = self
            .read_definitions()
            .values()
            .filter(|d| d.namespace == namespace)
            .map(|d| (d.key.clone(), d.default.clone()))
            .collect();
        self.reset_batch(defaults);
    }

    /// Restore every parameter to its default. One batched notification.
    pub fn reset_all(&self) {
        let defaults: Vec<(String, Value)> = self
            .read_definitions()
            .values()
            .map(|d| (d.key.clone(), d.default.clone()))
            .collect();
        self.reset_batch(defaults);
    }

    fn reset_batch(&self, defaults: Vec<(String, Value)>) {
        let mut changed = BTreeMap::new();
        {
            let mut values = self.write_values();
            for (key, default) in defaults {
                let old = values.insert(key.clone(), default.clone());
                if old.as_ref() != Some(&default) {
                    changed.insert(key, default);
                }
            }
        }
        if !changed.is_empty() {
            self.notify_changed(&changed);
        }
    }

    // ------------------------------------------------------------------
    // Presets
    // ------------------------------------------------------------------

    /// Add a preset, replacing any previous one under the same id.
    pub fn add_preset(&self, preset: ParameterPreset) {
        let mut presets = self.write_presets();
        if presets.contains_key(&preset.preset_id) {
            warn!(preset_id = %preset.preset_id, "Preset id already exists, replacing");
        }
        presets.insert(preset.preset_id.clone(), preset);
    }

    pub fn get_preset(&self, preset_id: &str) -> Option<ParameterPreset> {
        self.read_presets().get(preset_id).cloned()
    }

    pub fn delete_preset(&self, preset_id: &str) -> bool {
        self.write_presets().remove(preset_id).is_some()
    }

    pub fn presets_by_namespace(&self, namespace: ParameterNamespace) -> Vec<ParameterPreset> {
        self.read_presets()
            .values()
            .filter(|p| p.namespace == namespace)
            .cloned()
            .collect()
    }

    pub fn all_presets(&self) -> Vec<ParameterPreset> {
        self.read_presets().values().cloned().collect()
    }

    /// Apply a preset. Unknown or invalid entries are skipped with a log
    /// line; everything that changed is announced in one batch.
    pub fn apply_preset(&self, preset_id: &str) -> Result<(), ParameterError> {
        let preset = self
            .get_preset(preset_id)
            .ok_or_else(|| ParameterError::UnknownPreset(preset_id.to_string()))?;

        let mut changed = BTreeMap::new();
        for (key, value) in preset.parameters {
            match self.set_without_notify(&key, value) {
                Ok(Some(delta)) => changed.extend(delta),
                Ok(None) => {}
                Err(e) => {
                    warn!(preset_id = %preset_id, key = %key, error = %e, "Skipping preset entry");
                }
            }
        }

        if !changed.is_empty() {
            self.notify_changed(&changed);
        }
        Ok(())
    }

    /// Capture the current values of a namespace (or everything, for
    /// `General`) as a new preset.
    pub fn create_preset_from_current(
        &self,
        preset_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        namespace: ParameterNamespace,
        tags: Vec<String>,
    ) -> ParameterPreset {
        let parameters = if namespace == ParameterNamespace::General {
            self.all_parameters()
        } else {
            self.get_by_namespace(namespace)
        };

        let preset = ParameterPreset::new(preset_id, name, description, namespace, parameters, tags);
        self.add_preset(preset.clone());
        preset
    }

    // ------------------------------------------------------------------
    // Change notification
    // ------------------------------------------------------------------

    /// Register a change callback; returns a handle usable with
    /// [`ParameterRegistry::remove_change_callback`].
    pub fn add_change_callback(
        &self,
        callback: impl Fn(&BTreeMap<String, Value>) + Send + Sync + 'static,
    ) -> u64 {
        let id = self.next_callback_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Box::new(callback)));
        id
    }

    pub fn remove_change_callback(&self, id: u64) -> bool {
        let mut callbacks = self.callbacks.lock().unwrap_or_else(|e| e.into_inner());
        let before = callbacks.len();
        callbacks.retain(|(cb_id, _)| *cb_id != id);
        callbacks.len() != before
    }

    fn notify_changed(&self, changed: &BTreeMap<String, Value>) {
        debug!(count = changed.len(), "Parameters changed");
        let callbacks = self.callbacks.lock().unwrap_or_else(|e| e.into_inner());
        for (_, callback) in callbacks.iter() {
            callback(changed);
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Persist current values and presets to the Storage port.
    pub fn save(&self) -> Result<(), ParameterError> {
        let storage = self.storage.as_ref().ok_or(ParameterError::NoStorage)?;

        let values = serde_json::to_value(self.all_parameters())?;
        storage.save(&format!("{STORAGE_KEY_PREFIX}values"), &values)?;

        let presets_value = {
            let presets = self.read_presets();
            serde_json::to_value(&*presets)?
        };
        storage.save(&format!("{STORAGE_KEY_PREFIX}presets"), &presets_value)?;

        Ok(())
    }

    /// Load values and presets from the Storage port. Values that fail
    /// validation against the current definitions are discarded silently;
    /// malformed presets are skipped with a log line.
    pub fn load(&self) -> Result<(), ParameterError> {
        let storage = self.storage.as_ref().ok_or(ParameterError::NoStorage)?;

        if let Some(stored) = storage.load(&format!("{STORAGE_KEY_PREFIX}values"))? {
            if let Value::Object(entries) = stored {
                let mut values = self.write_values();
                let definitions = self.read_definitions();
                for (key, value) in entries {
                    if let Some(definition) = definitions.get(&key) {
                        if definition.validate(&value) {
                            values.insert(key, value);
                        }
                    }
                }
            }
        }

        if let Some(stored) = storage.load(&format!("{STORAGE_KEY_PREFIX}presets"))? {
            if let Value::Object(entries) = stored {
                let mut presets = self.write_presets();
                for (id, preset_value) in entries {
                    match serde_json::from_value::<ParameterPreset>(preset_value) {
                        Ok(preset) => {
                            presets.insert(id, preset);
                        }
                        Err(e) => {
                            error!(preset_id = %id, error = %e, "Discarding malformed stored preset");
                        }
                    }
                }
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Summary
    // ------------------------------------------------------------------

    /// Overview counts for UIs and diagnostics.
    pub fn summary(&self) -> ParameterSummary {
        let definitions = self.read_definitions();
        let values = self.read_values();
        let presets = self.read_presets();

        let mut namespace_parameters: BTreeMap<String, usize> = BTreeMap::new();
        for definition in definitions.values() {
            *namespace_parameters
                .entry(definition.namespace.as_str().to_string())
                .or_insert(0) += 1;
        }

        let mut namespace_presets: BTreeMap<String, usize> = BTreeMap::new();
        for preset in presets.values() {
            *namespace_presets
                .entry(preset.namespace.as_str().to_string())
                .or_insert(0) += 1;
        }

        let modified_parameters = definitions
            .iter()
            .filter(|(key, d)| values.get(*key).is_some_and(|v| *v != d.default))
            .count();

        ParameterSummary {
            total_parameters: definitions.len(),
            total_presets: presets.len(),
            namespace_parameters,
            namespace_presets,
            modified_parameters,
        }
    }
}
