//! Parameter/preset export and import.
//!
//! The exchange format is a single JSON document:
//! `{parameters, presets, export_time, version: "1.0"}`. Import tolerates
//! missing sections and unknown keys; each imported value goes through the
//! normal `set` validation and invalid entries are skipped individually.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::{ParameterError, ParameterPreset, ParameterRegistry};

/// Format version written by [`ParameterRegistry::export_parameters`].
pub const EXPORT_FORMAT_VERSION: &str = "1.0";

/// Serialized form of a registry's values and presets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterExport {
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub presets: BTreeMap<String, ParameterPreset>,
    pub export_time: DateTime<Utc>,
    pub version: String,
}

impl ParameterRegistry {
    /// Snapshot current values and presets into the exchange format.
    pub fn export_parameters(&self) -> ParameterExport {
        ParameterExport {
            parameters: self.all_parameters(),
            presets: self
                .all_presets()
                .into_iter()
                .map(|p| (p.preset_id.clone(), p))
                .collect(),
            export_time: Utc::now(),
            version: EXPORT_FORMAT_VERSION.to_string(),
        }
    }

    /// Apply an exported document. Values go through `set` one by one
    /// (invalid or unknown entries are skipped with a log line); presets are
    /// merged by id.
    pub fn import_parameters(
        &self,
        export: &ParameterExport,
        import_values: bool,
        import_presets: bool,
    ) -> Result<(), ParameterError> {
        if import_values {
            let results = self.set_many(export.parameters.clone());
            for (key, result) in results {
                if let Err(e) = result {
                    warn!(key = %key, error = %e, "Skipping imported parameter");
                }
            }
        }

        if import_presets {
            for preset in export.presets.values() {
                self.add_preset(preset.clone());
            }
        }

        Ok(())
    }

    /// Import from a raw JSON value (e.g. a file the host read).
    pub fn import_parameters_json(&self, document: &Value) -> Result<(), ParameterError> {
        let export: ParameterExport = serde_json::from_value(document.clone())?;
        self.import_parameters(&export, true, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn export_import_roundtrip() {
        let registry = ParameterRegistry::new();
        registry.set("upwind_threshold", json!(50.0)).expect("valid");
        registry.set("min_wind_shift_angle", json!(7.5)).expect("valid");
        let export = registry.export_parameters();
        assert_eq!(export.version, EXPORT_FORMAT_VERSION);

        let fresh = ParameterRegistry::new();
        fresh
            .import_parameters(&export, true, true)
            .expect("import succeeds");
        assert_eq!(fresh.get_f64("upwind_threshold"), Some(50.0));
        assert_eq!(fresh.get_f64("min_wind_shift_angle"), Some(7.5));
    }

    #[test]
    fn import_tolerates_missing_sections_and_unknown_keys() {
        let registry = ParameterRegistry::new();
        let document = json!({
            "parameters": {
                "upwind_threshold": 55.0,
                "mystery_key": 1.0
            },
            "export_time": "2026-01-01T00:00:00Z",
            "version": "1.0"
        });
        registry
            .import_parameters_json(&document)
            .expect("import succeeds");
        assert_eq!(registry.get_f64("upwind_threshold"), Some(55.0));
        assert_eq!(registry.get("mystery_key"), None);
    }

    #[test]
    fn preset_roundtrip_is_identity() {
        let registry = ParameterRegistry::new();
        let original = registry.get_preset("wind_estimation_light").expect("shipped");
        let json = serde_json::to_value(&original).expect("serialize");
        let restored: ParameterPreset = serde_json::from_value(json).expect("deserialize");
        assert_eq!(original, restored);
    }
}
