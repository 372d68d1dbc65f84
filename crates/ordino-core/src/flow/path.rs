//! Dotted-path access into context data.
//!
//! Action `output` targets and template references address context values
//! by dotted path (`customer.address.street`, `cart.items.0.name`).
//! Reads walk objects by key and arrays by numeric segment; writes create
//! intermediate objects as needed.

use serde_json::{Map, Value};

/// Resolve a dotted path against a data map.
///
/// Returns `None` when any segment is missing, when a non-numeric segment
/// hits an array, or when a path continues past a scalar.
pub fn get_path<'a>(data: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = data.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Write `value` at a dotted path, creating intermediate objects.
///
/// Existing non-object intermediates are replaced by objects so that the
/// write always lands. Array indexing is read-only; a numeric segment on
/// the write side creates an object keyed by the digits.
pub fn set_path(data: &mut Map<String, Value>, path: &str, value: Value) {
    if path.is_empty() {
        return;
    }

    let mut parts: Vec<&str> = path.split('.').collect();
    let Some(last) = parts.pop() else {
        return;
    };

    let mut current = data;
    for part in parts {
        let slot = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Some(map) = slot.as_object_mut() else {
            return;
        };
        current = map;
    }

    current.insert(last.to_string(), value);
}
