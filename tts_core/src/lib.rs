mod cache;
mod error;

use std::{env, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine; // for STANDARD.encode()
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::NarrationCache;

pub use error::SynthesisError;

/// Container format of every [`NarrationPayload`].
pub const AUDIO_FORMAT: &str = "mp3";

pub const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io";
pub const DEFAULT_VOICE_ID: &str = "JBFqnCBsd6RMkjVDRZzb";
pub const DEFAULT_MODEL_ID: &str = "eleven_multilingual_v2";
pub const DEFAULT_OUTPUT_FORMAT: &str = "mp3_44100_128";

/// Encoded speech for one narration sentence.
#[derive(Debug, Clone, PartialEq)]
pub struct NarrationPayload {
    pub audio: Vec<u8>,
    pub format: &'static str,
    pub text: String,
}

impl NarrationPayload {
    pub fn mp3(audio: Vec<u8>, text: impl Into<String>) -> Self {
        Self {
            audio,
            format: AUDIO_FORMAT,
            text: text.into(),
        }
    }

    pub fn audio_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.audio)
    }
}

/// Text in, encoded audio out.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<NarrationPayload, SynthesisError>;
}

#[derive(Clone)]
pub struct TtsConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub voice_id: String,
    pub model_id: String,
    pub output_format: String,
    pub timeout: Duration,
    pub cache_size: usize,
    pub cache_ttl: Duration,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            voice_id: DEFAULT_VOICE_ID.to_string(),
            model_id: DEFAULT_MODEL_ID.to_string(),
            output_format: DEFAULT_OUTPUT_FORMAT.to_string(),
            timeout: Duration::from_secs(15),
            cache_size: 500,
            cache_ttl: Duration::from_secs(3600), // 1 hour TTL
        }
    }
}

impl TtsConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let api_key = env::var("ELEVENLABS_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());

        let output_format = match env::var("TTS_OUTPUT_FORMAT") {
            Ok(format) if format.starts_with("mp3_") => format,
            Ok(format) => {
                warn!("TTS_OUTPUT_FORMAT={format} is not an mp3 format, using {DEFAULT_OUTPUT_FORMAT}");
                defaults.output_format
            }
            Err(_) => defaults.output_format,
        };

        let timeout = env::var("SYNTHESIS_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout);

        let cache_size = env::var("TTS_CACHE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.cache_size);

        let cache_ttl = env::var("TTS_CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.cache_ttl);

        Self {
            api_key,
            base_url: env::var("TTS_BASE_URL").unwrap_or(defaults.base_url),
            voice_id: env::var("TTS_VOICE_ID").unwrap_or(defaults.voice_id),
            model_id: env::var("TTS_MODEL_ID").unwrap_or(defaults.model_id),
            output_format,
            timeout,
            cache_size,
            cache_ttl,
        }
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
}

/// ElevenLabs text-to-speech with a narration cache in front.
pub struct TtsManager {
    client: Client,
    config: TtsConfig,
    // Response cache: (voice + model + text) -> mp3 bytes
    cache: Option<NarrationCache>,
}

impl TtsManager {
    pub fn new(config: TtsConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;
        let cache = NarrationCache::new(config.cache_size, config.cache_ttl);
        Ok(Self {
            client,
            config,
            cache,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    pub fn voice_id(&self) -> &str {
        &self.config.voice_id
    }

    async fn request_speech(&self, api_key: &str, text: &str) -> Result<Vec<u8>, SynthesisError> {
        let url = format!(
            "{}/v1/text-to-speech/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.voice_id
        );

        let response = self
            .client
            .post(url)
            .query(&[("output_format", self.config.output_format.as_str())])
            .header("xi-api-key", api_key)
            .header(reqwest::header::ACCEPT, "audio/mpeg")
            .json(&SpeechRequest {
                text,
                model_id: &self.config.model_id,
            })
            .send()
            .await
            .map_err(|e| SynthesisError::from_request(e, self.config.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let message: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(300)
                .collect();
            return Err(SynthesisError::Remote {
                status: status.as_u16(),
                message,
            });
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| SynthesisError::from_request(e, self.config.timeout))?;
        if audio.is_empty() {
            return Err(SynthesisError::EmptyAudio);
        }
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl SpeechSynthesizer for TtsManager {
    async fn synthesize(&self, text: &str) -> Result<NarrationPayload, SynthesisError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(SynthesisError::NotConfigured)?;

        let cache_key = NarrationCache::key(&self.config.voice_id, &self.config.model_id, text);
        if let Some(cache) = &self.cache {
            if let Some(audio) = cache.get(&cache_key).await {
                debug!("Narration cache hit ({} bytes)", audio.len());
                return Ok(NarrationPayload::mp3(audio, text));
            }
        }

        let audio = self.request_speech(api_key, text).await?;
        debug!("Synthesized {} bytes of audio for {} chars", audio.len(), text.len());

        if let Some(cache) = &self.cache {
            cache.put(cache_key, audio.clone()).await;
        }
        Ok(NarrationPayload::mp3(audio, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const FAKE_MP3: &[u8] = b"ID3\x04\x00fake-mp3-frames";

    fn manager_for(server: &mockito::ServerGuard, cache_size: usize) -> TtsManager {
        TtsManager::new(TtsConfig {
            api_key: Some("eleven-key".to_string()),
            base_url: server.url(),
            cache_size,
            ..TtsConfig::default()
        })
        .unwrap()
    }

    fn speech_path() -> String {
        format!("/v1/text-to-speech/{DEFAULT_VOICE_ID}")
    }

    #[tokio::test]
    async fn test_synthesize_returns_mp3_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", speech_path().as_str())
            .match_query(Matcher::UrlEncoded("output_format".into(), DEFAULT_OUTPUT_FORMAT.into()))
            .match_header("xi-api-key", "eleven-key")
            .match_body(Matcher::PartialJsonString(format!(
                r#"{{"text": "I see a cat in the image.", "model_id": "{DEFAULT_MODEL_ID}"}}"#
            )))
            .with_status(200)
            .with_header("content-type", "audio/mpeg")
            .with_body(FAKE_MP3)
            .create_async()
            .await;

        let payload = manager_for(&server, 10)
            .synthesize("I see a cat in the image.")
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(payload.audio, FAKE_MP3);
        assert_eq!(payload.format, "mp3");
        assert_eq!(payload.text, "I see a cat in the image.");
    }

    #[tokio::test]
    async fn test_repeated_text_is_served_from_cache() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", speech_path().as_str())
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(FAKE_MP3)
            .expect(1)
            .create_async()
            .await;

        let tts = manager_for(&server, 10);
        let first = tts.synthesize("I see a chair in the image.").await.unwrap();
        let second = tts.synthesize("I see a chair in the image.").await.unwrap();
        mock.assert_async().await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_cache_disabled_calls_api_every_time() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", speech_path().as_str())
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(FAKE_MP3)
            .expect(2)
            .create_async()
            .await;

        let tts = manager_for(&server, 0);
        tts.synthesize("Hello").await.unwrap();
        tts.synthesize("Hello").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_remote_error_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", speech_path().as_str())
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(r#"{"detail": "invalid api key"}"#)
            .create_async()
            .await;

        let err = manager_for(&server, 10).synthesize("Hello").await.unwrap_err();
        match err {
            SynthesisError::Remote { status, message } => {
                assert_eq!(status, 401);
                assert!(message.contains("invalid api key"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_body_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", speech_path().as_str())
            .match_query(Matcher::Any)
            .with_status(200)
            .create_async()
            .await;

        let err = manager_for(&server, 10).synthesize("Hello").await.unwrap_err();
        assert!(matches!(err, SynthesisError::EmptyAudio));
    }

    #[tokio::test]
    async fn test_missing_api_key_is_not_configured() {
        let tts = TtsManager::new(TtsConfig::default()).unwrap();
        assert!(!tts.is_configured());
        let err = tts.synthesize("Hello").await.unwrap_err();
        assert!(matches!(err, SynthesisError::NotConfigured));
    }

    #[test]
    fn test_audio_base64() {
        let payload = NarrationPayload::mp3(vec![0xFF, 0xFB, 0x90], "x");
        assert_eq!(payload.audio_base64(), "//uQ");
    }
}
