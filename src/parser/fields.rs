//! Typed field extraction from parsed maps.
//!
//! Model output is loose about key spelling (`detailed_feedback`,
//! `detailedFeedback`, `Detailed Feedback`) and about value types (scores
//! as `7`, `"7"` or `"7/10"`). These helpers absorb that looseness.

use super::JsonMap;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static LEADING_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(-?\d+(?:\.\d+)?)").unwrap());

static BULLET_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s+").unwrap());

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Look up `key`, falling back to a match that ignores case and separators.
pub fn lookup<'a>(map: &'a JsonMap, key: &str) -> Option<&'a Value> {
    if let Some(value) = map.get(key) {
        return Some(value);
    }
    let wanted = normalize_key(key);
    map.iter()
        .find(|(k, _)| normalize_key(k) == wanted)
        .map(|(_, v)| v)
}

/// String field. Numbers and booleans are stringified; blank strings are `None`.
pub fn field_str(map: &JsonMap, key: &str) -> Option<String> {
    let text = match lookup(map, key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Numeric field. Accepts JSON numbers and strings that start with a number.
pub fn field_f64(map: &JsonMap, key: &str) -> Option<f64> {
    value_f64(lookup(map, key)?)
}

pub fn value_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => LEADING_NUMBER.captures(s)?.get(1)?.as_str().parse().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// List field. Accepts an array, or a string with one item per line
/// (bullets and numbering stripped). Missing fields yield an empty list.
pub fn field_list(map: &JsonMap, key: &str) -> Vec<String> {
    match lookup(map, key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .lines()
            .map(|line| BULLET_PREFIX.replace(line, "").trim().to_string())
            .filter(|line| !line.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

/// Nested object field.
pub fn field_map<'a>(map: &'a JsonMap, key: &str) -> Option<&'a JsonMap> {
    lookup(map, key)?.as_object()
}

/// Clamp a reviewer score into the 1-10 range.
pub fn clamp_score(score: f64) -> f64 {
    score.clamp(1.0, 10.0)
}
