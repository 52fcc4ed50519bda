use crate::errors::Result;
use serde::Serialize;
use serde_json::{Map, Value};

/// Serialize `value` and sort every object's keys recursively.
pub fn to_canonical_value<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    Ok(sort_keys(serde_json::to_value(value)?))
}

/// Rebuild every object with its keys in lexicographic order.
///
/// Arrays keep their order: collections are sorted (or deliberately ordered)
/// before they reach this point.
pub fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            let mut sorted = Map::with_capacity(entries.len());
            for (key, value) in entries {
                sorted.insert(key, sort_keys(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Pretty-printed text with a trailing newline
pub fn render(value: &Value) -> Result<String> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    Ok(text)
}

/// Path of the first point where `left` and `right` differ, e.g.
/// `$["by_symbol"]["a\\b"]["refs"][3]`
pub fn first_difference(left: &Value, right: &Value) -> Option<String> {
    difference_at(left, right, "$".to_string())
}

fn difference_at(left: &Value, right: &Value, path: String) -> Option<String> {
    match (left, right) {
        (Value::Object(l), Value::Object(r)) => {
            let mut keys: Vec<&String> = l.keys().chain(r.keys()).collect();
            keys.sort();
            keys.dedup();
            keys.into_iter().find_map(|key| {
                let child = format!("{path}[{}]", Value::String(key.clone()));
                match (l.get(key), r.get(key)) {
                    (Some(a), Some(b)) => difference_at(a, b, child),
                    _ => Some(child),
                }
            })
        }
        (Value::Array(l), Value::Array(r)) => {
            let shared = l.iter().zip(r.iter()).enumerate().find_map(|(i, (a, b))| {
                difference_at(a, b, format!("{path}[{i}]"))
            });
            match shared {
                Some(found) => Some(found),
                None if l.len() != r.len() => Some(format!("{path}[{}]", l.len().min(r.len()))),
                None => None,
            }
        }
        (l, r) if l == r => None,
        _ => Some(path),
    }
}
