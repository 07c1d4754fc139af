//! Untyped document values exchanged with templates and live resources
//!
//! Resources fetched from the store, template outputs and step return values
//! are all tree-shaped documents. They stay untyped only at those boundaries.

use serde_json::{Map, Value};

/// A tagged document value (string, number, bool, list, map or null)
pub type Document = Value;

/// A string-keyed document map
pub type DocumentMap = Map<String, Value>;

/// Overlay `overlay` onto `base` key by key. Later writes win and nested
/// maps are replaced wholesale, not merged.
pub fn shallow_merge(base: &mut DocumentMap, overlay: &DocumentMap) {
    for (key, value) in overlay {
        base.insert(key.clone(), value.clone());
    }
}

/// Render a value in its plain textual form: strings without quotes,
/// numbers and booleans canonically, lists as `[a b]` and maps as `map[k:v]`.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "<nil>".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(display_value).collect();
            format!("[{}]", parts.join(" "))
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", k, display_value(&map[k])))
                .collect();
            format!("map[{}]", parts.join(" "))
        }
    }
}

/// Compare a document value against a literal expected string.
///
/// Strings compare verbatim; numbers and booleans compare by their canonical
/// text. Lists, maps and null never match a literal.
pub fn matches_literal(value: &Value, expected: &str) -> bool {
    match value {
        Value::String(s) => s == expected,
        Value::Number(_) | Value::Bool(_) => display_value(value) == expected,
        _ => false,
    }
}

/// Compare two document values, treating numbers as floats so `3` equals `3.0`
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Convert a YAML value into a document
pub fn from_yaml(value: serde_yaml::Value) -> Result<Document, serde_json::Error> {
    serde_json::to_value(value)
}
