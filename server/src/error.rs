use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use vision_core::DetectionError;

use crate::validation::ValidationError;

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Detection error: {0}")]
    Detection(#[from] DetectionError),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::InvalidInput(err.to_string())
    }
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Detection(e) => {
                tracing::error!("Detection error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Detection error: {}", e))
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}

/// Why an admitted (or attempted) frame ended without a normal result.
///
/// The `Display` text is what the client receives in its `error` event.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Detection error: {0}")]
    Detection(#[from] DetectionError),

    #[error("Server error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_frame_error_messages() {
        assert_eq!(
            FrameError::from(ValidationError::Empty).to_string(),
            "No image data received"
        );
        assert_eq!(
            FrameError::from(DetectionError::Timeout(Duration::from_secs(15))).to_string(),
            "Detection error: vision request timed out after 15s"
        );
        assert_eq!(
            FrameError::Internal("boom".into()).to_string(),
            "Server error: boom"
        );
    }

    #[test]
    fn test_api_error_status_codes() {
        let response = ApiError::from(ValidationError::Empty).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ApiError::from(DetectionError::EmptyResponse).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
