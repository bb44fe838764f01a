use std::time::Duration;

use thiserror::Error;

/// Failures of the remote vision call.
///
/// Malformed model output is not represented here: it is normalized to an
/// empty [`crate::DetectionResult`] instead.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("vision request timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),

    #[error("vision API returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("vision API response contained no message content")]
    EmptyResponse,
}

impl DetectionError {
    /// Maps a reqwest failure, keeping timeouts distinct from other transport errors.
    pub(crate) fn from_request(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            DetectionError::Timeout(timeout)
        } else {
            DetectionError::Transport(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_error_display() {
        let err = DetectionError::Remote {
            status: 429,
            message: "quota exceeded".to_string(),
        };
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("quota exceeded"));

        let err = DetectionError::Timeout(Duration::from_secs(15));
        assert_eq!(err.to_string(), "vision request timed out after 15s");
    }
}
