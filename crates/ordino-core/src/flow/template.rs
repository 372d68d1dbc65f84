//! Template interpolation for action configs.
//!
//! Flow authors reference context data inside action configs with
//! `{{ ... }}` placeholders. A placeholder holds a fallback chain of
//! segments separated by `||`; each segment is either a dotted context
//! path or a quoted literal, and the first truthy segment wins:
//!
//! ```text
//! "Deliver to {{ customer.address.street || customer.last_address || 'our counter' }}"
//! ```
//!
//! Truthiness follows the context rules (`null`, `false`, `0`, and the
//! empty string are falsy). When no segment is truthy the last segment's
//! value is used; an unresolvable reference renders as the empty string.

use serde_json::{Map, Value};
use thiserror::Error;

use ordino_types::context::is_truthy;

use super::path::get_path;

/// Errors raised while interpolating a template.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// A `{{` with no matching `}}`.
    #[error("unbalanced braces in template '{0}'")]
    Unbalanced(String),
}

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// Interpolate every placeholder in `template` into a string.
///
/// Scalars render bare, arrays and objects render as compact JSON,
/// null renders as the empty string.
pub fn interpolate(template: &str, data: &Map<String, Value>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(TemplateError::Unbalanced(template.to_string()));
        };
        out.push_str(&render(&resolve_chain(&after[..end], data)));
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Interpolate a template, preserving the JSON type when the template is
/// exactly one placeholder.
///
/// `"{{ cart.items }}"` yields the array itself; `"items: {{ cart.items }}"`
/// falls back to string interpolation.
pub fn interpolate_value(template: &str, data: &Map<String, Value>) -> Result<Value, TemplateError> {
    let trimmed = template.trim();
    if let Some(inner) = trimmed.strip_prefix("{{").and_then(|s| s.strip_suffix("}}")) {
        if !inner.contains("{{") && !inner.contains("}}") {
            return Ok(resolve_chain(inner, data));
        }
    }

    interpolate(template, data).map(Value::String)
}

/// Recursively interpolate every string value in a config object.
///
/// Strings go through [`interpolate_value`], so a config field holding a
/// single placeholder keeps the referenced value's JSON type. Keys are
/// never interpolated.
pub fn interpolate_object(config: &Value, data: &Map<String, Value>) -> Result<Value, TemplateError> {
    match config {
        Value::String(s) => interpolate_value(s, data),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(interpolate_object(item, data)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), interpolate_object(value, data)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

// ---------------------------------------------------------------------------
// Chain resolution
// ---------------------------------------------------------------------------

/// Resolve a fallback chain: first truthy segment wins, otherwise the
/// last segment's resolved value (possibly null).
fn resolve_chain(expr: &str, data: &Map<String, Value>) -> Value {
    let mut last = Value::Null;
    for segment in split_chain(expr) {
        if segment.is_empty() {
            continue;
        }
        let value = resolve_segment(segment, data);
        if is_truthy(&value) {
            return value;
        }
        last = value;
    }
    last
}

/// Split on `||`, ignoring pipes inside quoted literals.
fn split_chain(expr: &str) -> Vec<&str> {
    let bytes = expr.as_bytes();
    let mut segments = Vec::new();
    let mut quote: Option<u8> = None;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match (quote, bytes[i]) {
            (Some(q), b) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'\'') => quote = Some(b'\''),
            (None, b'"') => quote = Some(b'"'),
            (None, b'|') if bytes.get(i + 1) == Some(&b'|') => {
                segments.push(expr[start..i].trim());
                i += 2;
                start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    segments.push(expr[start..].trim());
    segments
}

/// A segment is a quoted literal or a dotted context path.
fn resolve_segment(segment: &str, data: &Map<String, Value>) -> Value {
    if let Some(literal) = strip_quotes(segment) {
        return Value::String(literal.to_string());
    }
    get_path(data, segment).cloned().unwrap_or(Value::Null)
}

fn strip_quotes(s: &str) -> Option<&str> {
    let first = *s.as_bytes().first()?;
    if (first == b'\'' || first == b'"') && s.len() >= 2 && s.as_bytes()[s.len() - 1] == first {
        Some(&s[1..s.len() - 1])
    } else {
        None
    }
}

/// Render a resolved value into template output.
fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // Objects and arrays render as compact JSON
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
