use std::time::Duration;

use thiserror::Error;

/// Speech synthesis errors. None of these fail a frame; callers drop the audio.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("speech synthesis is not configured (missing API key)")]
    NotConfigured,

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("speech request timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),

    #[error("TTS API returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("TTS API returned no audio")]
    EmptyAudio,
}

impl SynthesisError {
    pub(crate) fn from_request(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            SynthesisError::Timeout(timeout)
        } else {
            SynthesisError::Transport(err)
        }
    }
}
