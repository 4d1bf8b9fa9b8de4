//! Default parameter definitions and presets.
//!
//! Centralises the contractual parameter set registered at construction.
//! Names, types, bounds and units are part of the public contract; kernels
//! read them by key through their namespace snapshot.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use super::{ParameterDefinition, ParameterNamespace, ParameterPreset, ParameterRegistry, ValueType};

/// Builder shorthand for a definition with sensible UI defaults.
#[allow(clippy::too_many_arguments)]
fn definition(
    key: &str,
    display_name: &str,
    description: &str,
    default: Value,
    value_type: ValueType,
    min: Option<f64>,
    max: Option<f64>,
    unit: Option<&str>,
    namespace: ParameterNamespace,
    category: &str,
    ui_order: u32,
) -> ParameterDefinition {
    ParameterDefinition {
        key: key.to_string(),
        display_name: display_name.to_string(),
        description: description.to_string(),
        default,
        value_type,
        min,
        max,
        allowed_values: None,
        unit: unit.map(str::to_string),
        namespace,
        category: category.to_string(),
        tags: Vec::new(),
        ui_order,
        ui_advanced: false,
        ui_hidden: false,
    }
}

/// Register the contractual default parameter set on `registry`.
pub fn register_default_parameters(registry: &ParameterRegistry) {
    use ParameterNamespace::*;

    // ========================================================================
    // Wind estimation
    // ========================================================================

    registry.register(definition(
        "min_speed_threshold",
        "Minimum speed threshold",
        "Samples slower than this are too noisy to inform the wind estimate",
        json!(2.0),
        ValueType::Float,
        Some(0.1),
        Some(10.0),
        Some("kn"),
        WindEstimation,
        "basic",
        1,
    ));
    registry.register(definition(
        "upwind_threshold",
        "Upwind classification angle",
        "Maximum unsigned wind angle classified as upwind sailing",
        json!(45.0),
        ValueType::Float,
        Some(30.0),
        Some(60.0),
        Some("deg"),
        WindEstimation,
        "classification",
        2,
    ));
    registry.register(definition(
        "downwind_threshold",
        "Downwind classification angle",
        "Minimum unsigned wind angle classified as downwind sailing",
        json!(120.0),
        ValueType::Float,
        Some(90.0),
        Some(150.0),
        Some("deg"),
        WindEstimation,
        "classification",
        3,
    ));
    registry.register(definition(
        "min_tack_angle_change",
        "Maneuver detection angle",
        "Minimum heading change that counts as a tack or jibe",
        json!(60.0),
        ValueType::Float,
        Some(30.0),
        Some(120.0),
        Some("deg"),
        WindEstimation,
        "maneuver detection",
        4,
    ));
    let mut smoothing = definition(
        "wind_smoothing_window",
        "Wind smoothing window",
        "Moving-average window for the instantaneous wind direction series",
        json!(5),
        ValueType::Int,
        Some(1.0),
        Some(20.0),
        None,
        WindEstimation,
        "advanced",
        10,
    );
    smoothing.ui_advanced = true;
    registry.register(smoothing);

    // ========================================================================
    // Strategy detection
    // ========================================================================

    registry.register(definition(
        "min_wind_shift_angle",
        "Minimum wind shift angle",
        "Smallest sustained direction change reported as a wind shift",
        json!(5.0),
        ValueType::Float,
        Some(1.0),
        Some(30.0),
        Some("deg"),
        StrategyDetection,
        "wind shifts",
        1,
    ));
    registry.register(definition(
        "wind_forecast_interval",
        "Wind forecast interval",
        "Horizon used when projecting the wind field forward",
        json!(300),
        ValueType::Int,
        Some(60.0),
        Some(1800.0),
        Some("s"),
        StrategyDetection,
        "forecast",
        2,
    ));
    registry.register(definition(
        "tack_search_radius",
        "Tack search radius",
        "Minimum spacing between reported tack opportunities",
        json!(500),
        ValueType::Int,
        Some(100.0),
        Some(2000.0),
        Some("m"),
        StrategyDetection,
        "tack points",
        3,
    ));
    registry.register(definition(
        "min_vmg_improvement",
        "Minimum VMG improvement",
        "Relative VMG gain required to report a tack opportunity",
        json!(0.05),
        ValueType::Float,
        Some(0.01),
        Some(0.2),
        None,
        StrategyDetection,
        "tack points",
        4,
    ));
    registry.register(definition(
        "layline_safety_margin",
        "Layline safety margin",
        "Angular margin around the optimal approach angle for layline calls",
        json!(10.0),
        ValueType::Float,
        Some(0.0),
        Some(30.0),
        Some("deg"),
        StrategyDetection,
        "laylines",
        5,
    ));

    // ========================================================================
    // Performance analysis
    // ========================================================================

    registry.register(definition(
        "performance_window_size",
        "Performance window size",
        "Moving window for the performance time-series smoothing",
        json!(10),
        ValueType::Int,
        Some(1.0),
        Some(50.0),
        None,
        PerformanceAnalysis,
        "basic",
        1,
    ));
    registry.register(definition(
        "vmg_reference_enabled",
        "VMG polar reference",
        "Compare observed VMG against the boat-type polar targets",
        json!(true),
        ValueType::Bool,
        None,
        None,
        None,
        PerformanceAnalysis,
        "vmg",
        2,
    ));
    registry.register(definition(
        "maneuver_analysis_enabled",
        "Maneuver analysis",
        "Run the detailed tack/jibe efficiency analysis",
        json!(true),
        ValueType::Bool,
        None,
        None,
        None,
        PerformanceAnalysis,
        "maneuvers",
        3,
    ));

    // ========================================================================
    // Data processing
    // ========================================================================

    registry.register(definition(
        "smoothing_window_size",
        "Smoothing window size",
        "Centered moving-average window applied to speed during preprocessing",
        json!(3),
        ValueType::Int,
        Some(1.0),
        Some(20.0),
        None,
        DataProcessing,
        "preprocessing",
        1,
    ));
    registry.register(definition(
        "outlier_threshold",
        "Outlier threshold",
        "Samples outside this many standard deviations of mean speed are dropped",
        json!(3.0),
        ValueType::Float,
        Some(1.0),
        Some(10.0),
        Some("sigma"),
        DataProcessing,
        "preprocessing",
        2,
    ));
    registry.register(definition(
        "min_data_points",
        "Minimum data points",
        "Fewest samples a track may have after cleaning",
        json!(10),
        ValueType::Int,
        Some(5.0),
        Some(100.0),
        None,
        DataProcessing,
        "validation",
        3,
    ));

    // ========================================================================
    // Visualization
    // ========================================================================

    let mut tile_provider = definition(
        "map_tile_provider",
        "Map tile provider",
        "Tile source used by the map layer",
        json!("OpenStreetMap"),
        ValueType::Str,
        None,
        None,
        None,
        Visualization,
        "map",
        1,
    );
    tile_provider.allowed_values = Some(vec![
        json!("OpenStreetMap"),
        json!("CartoDB"),
        json!("Stamen"),
    ]);
    registry.register(tile_provider);

    registry.register(definition(
        "track_line_width",
        "Track line width",
        "Stroke width of the rendered track",
        json!(2),
        ValueType::Int,
        Some(1.0),
        Some(10.0),
        None,
        Visualization,
        "style",
        2,
    ));
    registry.register(definition(
        "track_line_color",
        "Track line color",
        "Stroke color of the rendered track",
        json!("#0066CC"),
        ValueType::Str,
        None,
        None,
        None,
        Visualization,
        "style",
        3,
    ));
    registry.register(definition(
        "show_wind_arrows",
        "Show wind arrows",
        "Overlay estimated wind arrows on the map",
        json!(true),
        ValueType::Bool,
        None,
        None,
        None,
        Visualization,
        "wind",
        4,
    ));

    // ========================================================================
    // General
    // ========================================================================

    registry.register(definition(
        "data_sync_interval",
        "Data sync interval",
        "Automatic persistence interval",
        json!(60),
        ValueType::Int,
        Some(10.0),
        Some(3600.0),
        Some("s"),
        General,
        "system",
        1,
    ));
    registry.register(definition(
        "debug_mode",
        "Debug mode",
        "Enable verbose diagnostic logging",
        json!(false),
        ValueType::Bool,
        None,
        None,
        None,
        General,
        "system",
        2,
    ));
}

/// Register the shipped presets on `registry`.
pub fn register_default_presets(registry: &ParameterRegistry) {
    let preset = |id: &str,
                  name: &str,
                  description: &str,
                  namespace: ParameterNamespace,
                  entries: &[(&str, Value)],
                  tags: &[&str]| {
        let parameters: BTreeMap<String, Value> = entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        ParameterPreset::new(
            id,
            name,
            description,
            namespace,
            parameters,
            tags.iter().map(|t| (*t).to_string()).collect(),
        )
    };

    registry.add_preset(preset(
        "wind_estimation_standard",
        "Standard wind estimation",
        "Settings suited to typical sailing conditions",
        ParameterNamespace::WindEstimation,
        &[
            ("min_speed_threshold", json!(2.0)),
            ("upwind_threshold", json!(45.0)),
            ("downwind_threshold", json!(120.0)),
            ("min_tack_angle_change", json!(60.0)),
            ("wind_smoothing_window", json!(5)),
        ],
        &["standard"],
    ));
    registry.add_preset(preset(
        "wind_estimation_light",
        "Light air",
        "Tuned for light-wind sessions where boat speed is low",
        ParameterNamespace::WindEstimation,
        &[
            ("min_speed_threshold", json!(1.0)),
            ("upwind_threshold", json!(50.0)),
            ("downwind_threshold", json!(130.0)),
            ("min_tack_angle_change", json!(70.0)),
            ("wind_smoothing_window", json!(8)),
        ],
        &["light air", "special conditions"],
    ));
    registry.add_preset(preset(
        "wind_estimation_strong",
        "Heavy air",
        "Tuned for strong-wind sessions with fast, tight maneuvers",
        ParameterNamespace::WindEstimation,
        &[
            ("min_speed_threshold", json!(3.0)),
            ("upwind_threshold", json!(40.0)),
            ("downwind_threshold", json!(110.0)),
            ("min_tack_angle_change", json!(50.0)),
            ("wind_smoothing_window", json!(3)),
        ],
        &["heavy air", "special conditions"],
    ));
    registry.add_preset(preset(
        "strategy_detection_standard",
        "Standard strategy detection",
        "Settings suited to typical race analysis",
        ParameterNamespace::StrategyDetection,
        &[
            ("min_wind_shift_angle", json!(5.0)),
            ("wind_forecast_interval", json!(300)),
            ("tack_search_radius", json!(500)),
            ("min_vmg_improvement", json!(0.05)),
            ("layline_safety_margin", json!(10.0)),
        ],
        &["standard"],
    ));
    registry.add_preset(preset(
        "strategy_detection_sensitive",
        "Shift sensitive",
        "Reports smaller wind shifts and marginal tack opportunities",
        ParameterNamespace::StrategyDetection,
        &[
            ("min_wind_shift_angle", json!(3.0)),
            ("wind_forecast_interval", json!(180)),
            ("tack_search_radius", json!(600)),
            ("min_vmg_improvement", json!(0.03)),
            ("layline_safety_margin", json!(15.0)),
        ],
        &["sensitive", "detail"],
    ));
    registry.add_preset(preset(
        "performance_analysis_standard",
        "Standard performance analysis",
        "Settings suited to routine training analysis",
        ParameterNamespace::PerformanceAnalysis,
        &[
            ("performance_window_size", json!(10)),
            ("vmg_reference_enabled", json!(true)),
            ("maneuver_analysis_enabled", json!(true)),
        ],
        &["standard", "training"],
    ));
    registry.add_preset(preset(
        "performance_analysis_detailed",
        "Detailed performance analysis",
        "Shorter smoothing window for fine-grained review",
        ParameterNamespace::PerformanceAnalysis,
        &[
            ("performance_window_size", json!(5)),
            ("vmg_reference_enabled", json!(true)),
            ("maneuver_analysis_enabled", json!(true)),
        ],
        &["detailed", "advanced"],
    ));
}
