//! Cache key fingerprints.
//!
//! A fingerprint is the stable string identity of a (prefix, parameter-set)
//! pair: `prefix || "_" || md5(canonical_json(params))`. Canonical JSON sorts
//! map keys ascending (serde_json's default map is BTreeMap-backed), carries
//! no whitespace and serializes floats with full round-trip precision.

use serde_json::Value;

use crate::types::Track;

/// Canonical JSON text for `value`: sorted keys, no whitespace.
pub fn canonical_json(value: &Value) -> String {
    value.to_string()
}

/// Fingerprint for a (prefix, params) pair.
pub fn fingerprint(prefix: &str, params: &Value) -> String {
    let digest = md5::compute(canonical_json(params).as_bytes());
    format!("{prefix}_{digest:x}")
}

/// Approximate identity of a track for memoization.
///
/// Hashes `{first_row, last_row, row_count, column_names}` with instants as
/// ISO-8601 — an accepted approximation, not a content hash: two tracks that
/// agree on endpoints, length and columns collide.
pub fn track_fingerprint(track: &Track) -> String {
    if track.is_empty() {
        return "empty_track".to_string();
    }

    let row_value = |i: usize| {
        let sample = track.sample(i);
        let mut row = serde_json::Map::new();
        row.insert(
            "timestamp".to_string(),
            Value::String(sample.timestamp.to_rfc3339()),
        );
        row.insert("latitude".to_string(), json_f64(sample.latitude));
        row.insert("longitude".to_string(), json_f64(sample.longitude));
        row.insert("course".to_string(), json_f64(sample.course));
        row.insert("speed".to_string(), json_f64(sample.speed));
        for (name, values) in &track.extras {
            row.insert(name.clone(), json_f64(values[i]));
        }
        Value::Object(row)
    };

    let descriptor = serde_json::json!({
        "first_row": row_value(0),
        "last_row": row_value(track.len() - 1),
        "row_count": track.len(),
        "column_names": track.column_names(),
    });

    let digest = md5::compute(canonical_json(&descriptor).as_bytes());
    format!("{digest:x}")
}

fn json_f64(v: f64) -> Value {
    serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number)
}
