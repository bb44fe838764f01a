// Turns a detection result into the sentence spoken to the user

use vision_core::{DetectedObject, DetectionResult};

/// Objects at or below this confidence are not narrated.
pub const CONFIDENCE_THRESHOLD: f32 = 0.6;

#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    /// `None` means nothing worth saying; synthesis is skipped.
    pub narration: Option<String>,
    /// Full detection list, unfiltered.
    pub objects: Vec<DetectedObject>,
}

#[derive(Debug, Clone, Copy)]
pub struct ResponseComposer {
    confidence_threshold: f32,
}

impl Default for ResponseComposer {
    fn default() -> Self {
        Self {
            confidence_threshold: CONFIDENCE_THRESHOLD,
        }
    }
}

impl ResponseComposer {
    pub fn with_threshold(confidence_threshold: f32) -> Self {
        Self {
            confidence_threshold,
        }
    }

    pub fn compose(&self, result: &DetectionResult) -> Composition {
        Composition {
            narration: self.narration_for(result),
            objects: result.objects.clone(),
        }
    }

    /// A model-written description wins; otherwise list the confident labels.
    pub fn narration_for(&self, result: &DetectionResult) -> Option<String> {
        if let Some(description) = result.description.as_deref() {
            if !description.trim().is_empty() {
                return Some(description.to_string());
            }
        }

        let labels: Vec<&str> = result
            .objects
            .iter()
            .filter(|o| o.confidence > self.confidence_threshold)
            .map(|o| o.label.as_str())
            .collect();

        match labels.as_slice() {
            [] => None,
            [only] => Some(format!("I see a {only} in the image.")),
            [init @ .., last] => {
                let head = init
                    .iter()
                    .map(|label| format!("a {label}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                Some(format!("I see {head} and a {last} in the image."))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vision_core::BoundingBox;

    fn obj(label: &str, confidence: f32) -> DetectedObject {
        DetectedObject::new(label, confidence, BoundingBox::default())
    }

    fn compose(objects: Vec<DetectedObject>, description: Option<&str>) -> Composition {
        ResponseComposer::default().compose(&DetectionResult {
            objects,
            description: description.map(str::to_string),
        })
    }

    #[test]
    fn test_single_confident_object() {
        let c = compose(vec![obj("cat", 0.9)], None);
        assert_eq!(c.narration.as_deref(), Some("I see a cat in the image."));
        assert_eq!(c.objects.len(), 1);
    }

    #[test]
    fn test_low_confidence_filtered_from_narration_only() {
        let c = compose(vec![obj("cat", 0.9), obj("dog", 0.3)], None);
        assert_eq!(c.narration.as_deref(), Some("I see a cat in the image."));
        assert_eq!(c.objects, vec![obj("cat", 0.9), obj("dog", 0.3)]);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let c = compose(vec![obj("cup", 0.6)], None);
        assert_eq!(c.narration, None);
        assert_eq!(c.objects.len(), 1);
    }

    #[test]
    fn test_several_objects_in_detection_order() {
        let c = compose(
            vec![obj("cat", 0.9), obj("dog", 0.8), obj("lamp", 0.1), obj("chair", 0.7)],
            None,
        );
        assert_eq!(
            c.narration.as_deref(),
            Some("I see a cat, a dog and a chair in the image.")
        );
    }

    #[test]
    fn test_two_objects() {
        let c = compose(vec![obj("person", 0.95), obj("bicycle", 0.85)], None);
        assert_eq!(
            c.narration.as_deref(),
            Some("I see a person and a bicycle in the image.")
        );
    }

    #[test]
    fn test_description_used_verbatim() {
        let description = "A person standing next to a red bicycle.";
        let c = compose(vec![obj("person", 0.99)], Some(description));
        assert_eq!(c.narration.as_deref(), Some(description));
        assert_eq!(c.objects.len(), 1);
    }

    #[test]
    fn test_blank_description_falls_back_to_objects() {
        let c = compose(vec![obj("tree", 0.7)], Some("   "));
        assert_eq!(c.narration.as_deref(), Some("I see a tree in the image."));
    }

    #[test]
    fn test_empty_result_has_no_narration() {
        let c = ResponseComposer::default().compose(&DetectionResult::empty());
        assert_eq!(c.narration, None);
        assert!(c.objects.is_empty());
    }

    #[test]
    fn test_custom_threshold() {
        let composer = ResponseComposer::with_threshold(0.2);
        let narration = composer.narration_for(&DetectionResult::from_objects(vec![obj("dog", 0.3)]));
        assert_eq!(narration.as_deref(), Some("I see a dog in the image."));
    }
}
