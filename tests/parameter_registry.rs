//! Parameter registry isolation, presets and persistence.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;

use windward::{
    MemoryStorage, ParameterNamespace, ParameterPreset, ParameterRegistry, Storage,
};

#[test]
fn setting_one_parameter_leaves_the_rest_alone() {
    let registry = ParameterRegistry::new();
    let before = registry.all_parameters();

    registry
        .set("upwind_threshold", json!(50.0))
        .expect("valid value");

    assert_eq!(registry.get_f64("upwind_threshold"), Some(50.0));
    assert_eq!(registry.get_f64("downwind_threshold"), Some(120.0));

    // Exactly one key changed.
    let after = registry.all_parameters();
    let changed: Vec<&String> = after
        .iter()
        .filter(|(key, value)| before.get(*key) != Some(*value))
        .map(|(key, _)| key)
        .collect();
    assert_eq!(changed, vec!["upwind_threshold"]);
}

#[test]
fn namespace_reset_does_not_cross_namespaces() {
    let registry = ParameterRegistry::new();
    registry
        .set("upwind_threshold", json!(50.0))
        .expect("valid value");
    registry
        .set("min_wind_shift_angle", json!(8.0))
        .expect("valid value");

    registry.reset_namespace(ParameterNamespace::WindEstimation);

    assert_eq!(registry.get_f64("upwind_threshold"), Some(45.0));
    // The strategy namespace keeps its modified value.
    assert_eq!(registry.get_f64("min_wind_shift_angle"), Some(8.0));

    registry.reset_all();
    assert_eq!(registry.get_f64("min_wind_shift_angle"), Some(5.0));
    assert_eq!(registry.summary().modified_parameters, 0);
}

#[test]
fn namespace_snapshot_is_complete_and_isolated() {
    let registry = ParameterRegistry::new();
    let wind = registry.get_by_namespace(ParameterNamespace::WindEstimation);
    assert_eq!(wind.len(), 5);
    for key in [
        "min_speed_threshold",
        "upwind_threshold",
        "downwind_threshold",
        "min_tack_angle_change",
        "wind_smoothing_window",
    ] {
        assert!(wind.contains_key(key), "missing {key}");
    }

    let strategy = registry.get_by_namespace(ParameterNamespace::StrategyDetection);
    assert!(!strategy.contains_key("upwind_threshold"));
    assert_eq!(strategy.len(), 5);
}

#[test]
fn invalid_set_is_a_reported_no_op() {
    let registry = ParameterRegistry::new();

    assert!(registry.set("upwind_threshold", json!(200.0)).is_err());
    assert!(registry.set("upwind_threshold", json!("fifty")).is_err());
    assert!(registry.set("no_such_parameter", json!(1)).is_err());

    assert_eq!(registry.get_f64("upwind_threshold"), Some(45.0));
}

#[test]
fn preset_roundtrip_is_identity() {
    let mut parameters = BTreeMap::new();
    parameters.insert("min_speed_threshold".to_string(), json!(1.5));
    parameters.insert("upwind_threshold".to_string(), json!(48.0));
    let preset = ParameterPreset::new(
        "custom_light",
        "Custom light air",
        "Hand-tuned for a lake session",
        ParameterNamespace::WindEstimation,
        parameters,
        vec!["custom".to_string()],
    );

    let value = serde_json::to_value(&preset).expect("serialize");
    let restored: ParameterPreset = serde_json::from_value(value).expect("deserialize");
    assert_eq!(preset, restored);
}

#[test]
fn shipped_presets_change_their_namespace_only() {
    let registry = ParameterRegistry::new();
    registry
        .set("min_wind_shift_angle", json!(12.0))
        .expect("valid value");

    registry
        .apply_preset("wind_estimation_strong")
        .expect("shipped preset");

    assert_eq!(registry.get_f64("min_speed_threshold"), Some(3.0));
    assert_eq!(registry.get_f64("upwind_threshold"), Some(40.0));
    assert_eq!(registry.get_i64("wind_smoothing_window"), Some(3));
    // Untouched namespace keeps the custom value.
    assert_eq!(registry.get_f64("min_wind_shift_angle"), Some(12.0));
}

#[test]
fn create_preset_from_current_captures_the_namespace() {
    let registry = ParameterRegistry::new();
    registry
        .set("tack_search_radius", json!(800))
        .expect("valid value");

    let preset = registry.create_preset_from_current(
        "strategy_custom",
        "Custom strategy",
        "",
        ParameterNamespace::StrategyDetection,
        vec![],
    );
    assert_eq!(preset.parameters.get("tack_search_radius"), Some(&json!(800)));
    assert_eq!(preset.parameters.len(), 5);

    // Applying it later restores the captured values.
    registry.reset_all();
    registry.apply_preset("strategy_custom").expect("stored preset");
    assert_eq!(registry.get_i64("tack_search_radius"), Some(800));
}

#[test]
fn save_and_load_through_the_storage_port() {
    let storage = Arc::new(MemoryStorage::new());

    {
        let registry = ParameterRegistry::with_storage(Arc::clone(&storage) as Arc<dyn Storage>);
        registry.set("outlier_threshold", json!(5.0)).expect("valid");
        registry.create_preset_from_current(
            "processing_strict",
            "Strict cleaning",
            "",
            ParameterNamespace::DataProcessing,
            vec![],
        );
        registry.save().expect("save succeeds");
    }

    let registry = ParameterRegistry::with_storage(Arc::clone(&storage) as Arc<dyn Storage>);
    assert_eq!(registry.get_f64("outlier_threshold"), Some(3.0));
    registry.load().expect("load succeeds");
    assert_eq!(registry.get_f64("outlier_threshold"), Some(5.0));
    assert!(registry.get_preset("processing_strict").is_some());
}

#[test]
fn export_survives_a_file_roundtrip() {
    let registry = ParameterRegistry::new();
    registry.set("upwind_threshold", json!(50.0)).expect("valid");
    let export = registry.export_parameters();

    // The host owns file I/O; simulate its write/read cycle.
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("params.json");
    std::fs::write(&path, serde_json::to_vec_pretty(&export).expect("serialize"))
        .expect("write");

    let raw = std::fs::read_to_string(&path).expect("read");
    let document: serde_json::Value = serde_json::from_str(&raw).expect("parse");

    let fresh = ParameterRegistry::new();
    fresh.import_parameters_json(&document).expect("import");
    assert_eq!(fresh.get_f64("upwind_threshold"), Some(50.0));
}

#[test]
fn export_import_tolerates_unknown_keys() {
    let registry = ParameterRegistry::new();
    registry.set("min_data_points", json!(20)).expect("valid");
    let mut export = registry.export_parameters();
    assert_eq!(export.version, "1.0");

    // Simulate a document from a newer version with an extra key.
    export
        .parameters
        .insert("future_parameter".to_string(), json!(1));

    let fresh = ParameterRegistry::new();
    fresh
        .import_parameters(&export, true, true)
        .expect("import succeeds");
    assert_eq!(fresh.get_i64("min_data_points"), Some(20));
    assert_eq!(fresh.get("future_parameter"), None);
}
