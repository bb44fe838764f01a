//! Normalization of raw model text into a [`DetectionResult`].
//!
//! The model is asked for `{"objects": [...], "description": "..."}` but older
//! prompts (and some models) answer with a bare array, wrap the JSON in a
//! markdown fence, or surround it with prose. All of these collapse into one
//! shape here; anything unrecoverable becomes an empty result.

use serde_json::{Deserializer, Value};
use tracing::debug;

use crate::types::{BoundingBox, DetectedObject, DetectionResult};

/// Opening brackets tried before giving up on embedded-array recovery.
const MAX_ARRAY_CANDIDATES: usize = 32;

/// Turn the model's reply into a [`DetectionResult`]. Never fails.
pub fn normalize_model_output(raw: &str) -> DetectionResult {
    let text = strip_code_fence(raw.trim());

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        if let Some(result) = from_value(&value) {
            return result;
        }
    }

    match first_embedded_array(text) {
        Some(entries) => DetectionResult::from_objects(objects_from_entries(&entries)),
        None => {
            debug!("No JSON array recoverable from model output ({} chars)", raw.len());
            DetectionResult::empty()
        }
    }
}

fn from_value(value: &Value) -> Option<DetectionResult> {
    match value {
        Value::Array(entries) => Some(DetectionResult::from_objects(objects_from_entries(entries))),
        Value::Object(map) => {
            let objects = map.get("objects").and_then(Value::as_array);
            let description = map
                .get("description")
                .and_then(Value::as_str)
                .filter(|d| !d.trim().is_empty())
                .map(str::to_string);
            if objects.is_none() && description.is_none() {
                return None;
            }
            Some(DetectionResult {
                objects: objects.map(|o| objects_from_entries(o)).unwrap_or_default(),
                description,
            })
        }
        _ => None,
    }
}

/// First well-formed JSON array that starts somewhere inside `text`.
/// Stops at the first one that parses; only the first few `[` are tried.
fn first_embedded_array(text: &str) -> Option<Vec<Value>> {
    text.match_indices('[').take(MAX_ARRAY_CANDIDATES).find_map(|(start, _)| {
        let mut stream = Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Array(entries))) => Some(entries),
            _ => None,
        }
    })
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Opening line may carry an info string such as "json".
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn objects_from_entries(entries: &[Value]) -> Vec<DetectedObject> {
    entries.iter().filter_map(object_from_entry).collect()
}

fn object_from_entry(entry: &Value) -> Option<DetectedObject> {
    let label = entry.get("label")?.as_str()?.trim();
    if label.is_empty() {
        return None;
    }
    let confidence = entry
        .get("confidence")
        .and_then(Value::as_f64)
        .map(unit_interval)
        .unwrap_or(0.0);
    let bbox = entry.get("bbox").map(bbox_from_value).unwrap_or_default();
    Some(DetectedObject::new(label, confidence, bbox))
}

fn bbox_from_value(value: &Value) -> BoundingBox {
    let coord = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_f64)
            .map(unit_interval)
            .unwrap_or(0.0)
    };
    BoundingBox {
        x: coord("x"),
        y: coord("y"),
        width: coord("width"),
        height: coord("height"),
    }
}

fn unit_interval(v: f64) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0) as f32
    }
}
