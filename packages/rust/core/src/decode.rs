//! Tolerant decoding of JSON objects from language model completions.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^```json|^```|```$").expect("valid regex"));

static OBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));

/// Extract a JSON object from free-form model output.
///
/// Strips code fences, falls back to the outermost `{...}` span when the
/// text has leading commentary, and retries once with single quotes
/// swapped for double quotes. Anything that does not decode to an object
/// yields an empty map.
pub fn decode_json_object(text: &str) -> Map<String, Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Map::new();
    }

    let stripped = FENCE_RE.replace_all(trimmed, "");
    let mut candidate = stripped.trim();
    if !candidate.starts_with('{') {
        if let Some(m) = OBJECT_RE.find(candidate) {
            candidate = m.as_str();
        }
    }

    if let Some(map) = parse_object(candidate) {
        return map;
    }
    parse_object(&candidate.replace('\'', "\"")).unwrap_or_default()
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}
