//! Helpers for coercing loosely-shaped model replies
//!
//! Vision models wrap JSON in markdown fences, report confidence as either
//! a fraction or a percentage, and use "unknown" or "" for missing values.
//! These helpers normalize all of that before the stages validate fields.

use crate::error::ServiceError;
use serde_json::{Map, Value};

/// Placeholder strings treated as "no value"
const EMPTY_MARKERS: &[&str] = &["", "unknown", "n/a", "none", "null", "unidentified"];

/// Remove a surrounding ```json ... ``` fence, if present
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Optional "json" tag; the body may follow on the same line
    let body = match rest.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => &rest[4..],
        _ => rest,
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parse a text reply as JSON, tolerating a markdown fence
pub fn parse_json_reply(text: &str) -> Result<Value, ServiceError> {
    let body = strip_code_fence(text);
    serde_json::from_str(body).map_err(|e| {
        ServiceError::MalformedResponse(format!("reply is not valid JSON: {}", e))
    })
}

/// View a reply as a JSON object
pub fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>, ServiceError> {
    value
        .as_object()
        .ok_or_else(|| ServiceError::MalformedResponse(format!("{} reply is not an object", what)))
}

/// First present, non-null field among `keys`
pub fn field<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find(|value| !value.is_null())
}

/// Optional string field; placeholders like "unknown" become None
pub fn optional_string(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    let text = match field(object, keys)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if EMPTY_MARKERS.contains(&text.to_ascii_lowercase().as_str()) {
        None
    } else {
        Some(text)
    }
}

/// List of non-empty strings (missing field → empty list)
pub fn string_list(object: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    match field(object, keys) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

/// Numeric field as f32, accepting numeric strings
pub fn number(value: &Value) -> Option<f32> {
    let n = match value {
        Value::Number(n) => n.as_f64()? as f32,
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f32>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Confidence in 0.0-1.0
///
/// Values above 1.0 (up to 100) are read as percentages.
pub fn confidence(value: &Value) -> Option<f32> {
    let raw = number(value)?;
    let scaled = if raw > 1.0 && raw <= 100.0 { raw / 100.0 } else { raw };
    Some(scaled.clamp(0.0, 1.0))
}
