use serde::{Deserialize, Serialize};

/// Bounding box in normalized image coordinates (0.0 to 1.0).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// A labeled object found in a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub label: String,
    pub confidence: f32, // 0.0 to 1.0
    pub bbox: BoundingBox,
}

impl DetectedObject {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}

/// Normalized output of one vision call.
///
/// `objects` is always present (possibly empty); `description` is the scene
/// sentence when the model produced one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub objects: Vec<DetectedObject>,
    pub description: Option<String>,
}

impl DetectionResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_objects(objects: Vec<DetectedObject>) -> Self {
        Self {
            objects,
            description: None,
        }
    }
}
