use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use thiserror::Error;

/// Maximum decoded image size accepted from a client
pub const DEFAULT_MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

// Browsers always pad, but hand-rolled clients often don't.
const FRAME_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Frame payload rejected before it reaches the admission gate.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No image data received")]
    Empty,

    #[error("Image data is not valid base64: {0}")]
    NotBase64(String),

    #[error("Image too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
}

/// `data:image/jpeg;base64,AAAA` -> `AAAA`. Plain base64 is returned unchanged.
pub fn strip_data_uri(data: &str) -> &str {
    match data.split_once(',') {
        Some((_, payload)) => payload,
        None => data,
    }
}

/// Decode a base64 (optionally data-URI prefixed) image payload.
pub fn decode_image_payload(data: &str, max_bytes: usize) -> Result<Vec<u8>, ValidationError> {
    let payload = strip_data_uri(data).trim();
    if payload.is_empty() {
        return Err(ValidationError::Empty);
    }

    // Cheap upper bound before allocating: 4 base64 chars -> 3 bytes.
    let estimated = payload.len() / 4 * 3;
    if estimated > max_bytes.saturating_add(3) {
        return Err(ValidationError::TooLarge {
            size: estimated,
            max: max_bytes,
        });
    }

    let decoded = if payload.bytes().any(|b| b.is_ascii_whitespace()) {
        let compact: String = payload.split_ascii_whitespace().collect();
        FRAME_BASE64.decode(compact)
    } else {
        FRAME_BASE64.decode(payload)
    };
    let image = decoded.map_err(|e| ValidationError::NotBase64(e.to_string()))?;

    validate_image_bytes(&image, max_bytes)?;
    Ok(image)
}

/// Checks for raw (binary) frames.
pub fn validate_image_bytes(image: &[u8], max_bytes: usize) -> Result<(), ValidationError> {
    if image.is_empty() {
        return Err(ValidationError::Empty);
    }
    if image.len() > max_bytes {
        return Err(ValidationError::TooLarge {
            size: image.len(),
            max: max_bytes,
        });
    }
    Ok(())
}
