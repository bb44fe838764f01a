//! Remote multimodal object detection.
//!
//! [`VisionClient`] talks to any OpenAI-compatible chat completion endpoint
//! (Gemini's compatibility layer by default) and turns the model's free-form
//! reply into a [`DetectionResult`].

mod error;
mod parse;
mod types;

use std::{
    env,
    sync::{PoisonError, RwLock},
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use error::DetectionError;
pub use parse::normalize_model_output;
pub use types::{BoundingBox, DetectedObject, DetectionResult};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai/";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_TOKENS: u16 = 2000;
/// Longest slice of a remote error body kept in [`DetectionError::Remote`].
const MAX_ERROR_BODY: usize = 300;

/// Anything that can turn image bytes into a detection result.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, image: &[u8]) -> Result<DetectionResult, DetectionError>;
}

#[derive(Clone)]
pub struct VisionConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl VisionConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Reads `GEMINI_API_KEY` (required), `VISION_MODEL`, `VISION_BASE_URL`
    /// and `DETECTION_TIMEOUT_SECS`.
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = env::var("GEMINI_API_KEY")
            .context("GEMINI_API_KEY must be set in the environment")?;

        let mut config = Self::new(api_key);
        if let Ok(model) = env::var("VISION_MODEL") {
            config.model = model;
        }
        if let Ok(base_url) = env::var("VISION_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(secs) = env::var("DETECTION_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

impl std::fmt::Debug for VisionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

// Parts of the config that can be swapped while the server runs.
#[derive(Clone)]
struct Endpoint {
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u16,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

pub struct VisionClient {
    client: Client,
    endpoint: RwLock<Endpoint>,
    timeout: Duration,
}

impl VisionClient {
    pub fn new(config: VisionConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            endpoint: RwLock::new(Endpoint {
                api_key: config.api_key,
                base_url: config.base_url,
                model: config.model,
            }),
            timeout: config.timeout,
        })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::new(VisionConfig::from_env()?)
    }

    pub fn model(&self) -> String {
        self.endpoint().model
    }

    /// Swap model, credentials or endpoint for subsequent requests.
    /// Requests already in flight keep the values they started with.
    pub fn update_client(
        &self,
        model: Option<&str>,
        api_key: Option<&str>,
        base_url: Option<&str>,
    ) {
        let mut endpoint = self
            .endpoint
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(model) = model {
            endpoint.model = model.to_string();
            tracing::info!("Vision model updated to {}", model);
        }
        if let Some(api_key) = api_key {
            endpoint.api_key = api_key.to_string();
        }
        if let Some(base_url) = base_url {
            endpoint.base_url = base_url.to_string();
        }
        if api_key.is_some() || base_url.is_some() {
            tracing::info!("Vision API client updated");
        }
    }

    fn endpoint(&self) -> Endpoint {
        self.endpoint
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Detector for VisionClient {
    async fn detect(&self, image: &[u8]) -> Result<DetectionResult, DetectionError> {
        let endpoint = self.endpoint();
        let request_id = short_request_id();
        let prompt = detection_prompt(&request_id);
        let data_url = format!(
            "data:{};base64,{}",
            sniff_image_mime(image),
            general_purpose::STANDARD.encode(image)
        );

        let body = ChatRequest {
            model: &endpoint.model,
            messages: vec![Message {
                role: "user",
                content: vec![
                    ContentPart::Text { text: &prompt },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                ],
            }],
            max_tokens: MAX_TOKENS,
        };

        let url = format!("{}/chat/completions", endpoint.base_url.trim_end_matches('/'));
        debug!("[Detect {}] Sending {} image bytes to {}", request_id, image.len(), endpoint.model);

        let response = self
            .client
            .post(url)
            .bearer_auth(&endpoint.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DetectionError::from_request(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            truncate_on_char_boundary(&mut message, MAX_ERROR_BODY);
            return Err(DetectionError::Remote {
                status: status.as_u16(),
                message,
            });
        }

        let reply = response
            .json::<ChatResponse>()
            .await
            .map_err(|e| DetectionError::from_request(e, self.timeout))?;

        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(DetectionError::EmptyResponse)?;

        let result = normalize_model_output(&content);
        debug!(
            "[Detect {}] Reply of {} chars normalized to {} objects (description: {})",
            request_id,
            content.len(),
            result.objects.len(),
            result.description.is_some()
        );
        Ok(result)
    }
}

fn detection_prompt(request_id: &str) -> String {
    format!(
        "INDEPENDENT REQUEST {request_id}: analyze only this image.\n\
         1. List the visible objects as a JSON array of entries shaped like \
         {{\"label\": \"object\", \"confidence\": 0.95, \"bbox\": {{\"x\": 0.1, \"y\": 0.2, \"width\": 0.3, \"height\": 0.4}}}}.\n\
         2. Add a brief (one or two sentence) description of the scene for a blind person.\n\
         Answer with {{\"objects\": [...], \"description\": \"...\"}} using normalized coordinates (0-1). \
         Return only JSON, no extra text."
    )
}

fn short_request_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// Best-effort MIME type from magic bytes; cameras send JPEG unless told otherwise.
pub fn sniff_image_mime(image: &[u8]) -> &'static str {
    match image {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "image/jpeg",
    }
}

fn truncate_on_char_boundary(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}
