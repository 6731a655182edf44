//! Claim values from `key=value` pairs

use serde_json::Value as JsonValue;

use crate::error::{KubeError, Result};
use crate::object::set_nested;

/// Parse `--set` arguments into a nested document
///
/// Dotted keys create nested maps; later pairs win.
pub fn parse_set_values(set_args: &[String]) -> Result<JsonValue> {
    let mut values = JsonValue::Object(serde_json::Map::new());

    for arg in set_args {
        let (key, val) = arg.split_once('=').ok_or_else(|| {
            KubeError::InvalidManifest(format!(
                "Invalid --set format: '{}'. Expected key=value",
                arg
            ))
        })?;
        set_path(&mut values, key, typed_value(val))?;
    }

    Ok(values)
}

/// Type a raw value: bool, null, integer, float, JSON list/map, else string
pub fn typed_value(val: &str) -> JsonValue {
    if val == "true" {
        JsonValue::Bool(true)
    } else if val == "false" {
        JsonValue::Bool(false)
    } else if val == "null" {
        JsonValue::Null
    } else if let Ok(num) = val.parse::<i64>() {
        JsonValue::Number(num.into())
    } else if let Some(num) = val.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
        JsonValue::Number(num)
    } else if val.starts_with('[') || val.starts_with('{') {
        serde_json::from_str(val).unwrap_or_else(|_| JsonValue::String(val.to_string()))
    } else {
        JsonValue::String(val.to_string())
    }
}

/// Set a dotted path, e.g. `ingress.host`
pub fn set_path(values: &mut JsonValue, key: &str, value: JsonValue) -> Result<()> {
    let parts: Vec<&str> = key.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(KubeError::InvalidManifest(format!(
            "Invalid value key '{}'",
            key
        )));
    }
    set_nested(values, &parts, value)
}

/// Deep merge `overlay` into `base`, overlay wins
pub fn merge(base: &mut JsonValue, overlay: &JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}
