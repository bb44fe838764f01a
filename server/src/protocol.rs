//! JSON messages exchanged over the frames WebSocket.
//!
//! Every message is an object tagged by `"type"`.

use std::fmt;

use serde::{Deserialize, Serialize};
use tts_core::NarrationPayload;
use vision_core::DetectedObject;

use crate::gate::Rejection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Connected,
    Busy,
    Throttled,
}

impl From<Rejection> for StatusKind {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Busy => StatusKind::Busy,
            Rejection::Throttled => StatusKind::Throttled,
        }
    }
}

/// Base64 audio as sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioPayload {
    pub data: String,
    pub format: String,
    pub text: String,
}

impl From<&NarrationPayload> for AudioPayload {
    fn from(payload: &NarrationPayload) -> Self {
        Self {
            data: payload.audio_base64(),
            format: payload.format.to_string(),
            text: payload.text.clone(),
        }
    }
}

/// Terminal artifact of a successfully processed frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutgoingResult {
    pub objects: Vec<DetectedObject>,
    pub audio: Option<NarrationPayload>,
}

impl OutgoingResult {
    pub fn empty() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Status {
        status: StatusKind,
    },
    Error {
        message: String,
    },
    DetectionResult {
        objects: Vec<DetectedObject>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audio: Option<AudioPayload>,
    },
}

impl ServerEvent {
    pub fn status(status: StatusKind) -> Self {
        ServerEvent::Status { status }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    pub fn empty_result() -> Self {
        ServerEvent::from(OutgoingResult::empty())
    }

    pub fn to_json(&self) -> String {
        // Plain data enum: serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!("Failed to serialize server event: {}", e);
            r#"{"type":"error","message":"Server error: serialization failed"}"#.to_string()
        })
    }
}

impl From<OutgoingResult> for ServerEvent {
    fn from(result: OutgoingResult) -> Self {
        ServerEvent::DetectionResult {
            audio: result.audio.as_ref().map(AudioPayload::from),
            objects: result.objects,
        }
    }
}

/// Client-chosen frame identifier, echoed only in logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrameId {
    Text(String),
    Number(serde_json::Number),
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameId::Text(s) => f.write_str(s),
            FrameId::Number(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundFrame {
    #[serde(default)]
    pub frame_id: Option<FrameId>,
    /// Base64 image, optionally as a data URI.
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Frame(InboundFrame),
}

impl ClientEvent {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use vision_core::BoundingBox;

    fn as_value(event: &ServerEvent) -> Value {
        serde_json::from_str(&event.to_json()).unwrap()
    }

    #[test]
    fn test_status_event_shape() {
        assert_eq!(
            as_value(&ServerEvent::status(StatusKind::Connected)),
            json!({"type": "status", "status": "connected"})
        );
        assert_eq!(
            as_value(&ServerEvent::status(Rejection::Throttled.into())),
            json!({"type": "status", "status": "throttled"})
        );
    }

    #[test]
    fn test_error_event_shape() {
        assert_eq!(
            as_value(&ServerEvent::error("No image data received")),
            json!({"type": "error", "message": "No image data received"})
        );
    }

    #[test]
    fn test_empty_result_omits_audio() {
        assert_eq!(
            as_value(&ServerEvent::empty_result()),
            json!({"type": "detection_result", "objects": []})
        );
    }

    #[test]
    fn test_result_with_audio() {
        let result = OutgoingResult {
            objects: vec![DetectedObject::new("cat", 0.5, BoundingBox::default())],
            audio: Some(NarrationPayload::mp3(vec![0xFF, 0xFB, 0x90], "I see a cat in the image.")),
        };
        let value = as_value(&ServerEvent::from(result));
        assert_eq!(value["type"], "detection_result");
        assert_eq!(value["objects"][0]["label"], "cat");
        assert_eq!(value["objects"][0]["bbox"]["width"], 0.0);
        assert_eq!(
            value["audio"],
            json!({"data": "//uQ", "format": "mp3", "text": "I see a cat in the image."})
        );
    }

    #[test]
    fn test_parse_frame_with_string_and_numeric_ids() {
        let ClientEvent::Frame(frame) =
            ClientEvent::parse(r#"{"type":"frame","frame_id":"f-1","data":"aGk="}"#).unwrap();
        assert_eq!(frame.frame_id, Some(FrameId::Text("f-1".into())));
        assert_eq!(frame.data, "aGk=");

        let ClientEvent::Frame(frame) =
            ClientEvent::parse(r#"{"type":"frame","frame_id":42,"data":""}"#).unwrap();
        assert_eq!(frame.frame_id.map(|id| id.to_string()).as_deref(), Some("42"));
    }

    #[test]
    fn test_parse_frame_without_data() {
        let ClientEvent::Frame(frame) = ClientEvent::parse(r#"{"type":"frame"}"#).unwrap();
        assert!(frame.frame_id.is_none());
        assert!(frame.data.is_empty());
    }

    #[test]
    fn test_parse_rejects_unknown_messages() {
        assert!(ClientEvent::parse(r#"{"type":"hello"}"#).is_err());
        assert!(ClientEvent::parse("not json").is_err());
    }
}
