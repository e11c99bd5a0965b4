//! Error types for the identification pipeline

use thiserror::Error;

/// Errors raised by the identification and attribution core.
///
/// Nothing here is retried internally; every error propagates to the caller,
/// which decides policy (retry, status mapping, logging).
#[derive(Debug, Error)]
pub enum Error {
    /// Input bytes are not a readable JPEG/PNG image. A client-input fault.
    #[error("failed to decode image: {0}")]
    Decode(String),

    /// The model artifact could not be loaded. Fatal at startup; the
    /// process must not begin serving without a model.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// The numeric runtime failed during a forward pass. A server fault.
    #[error("inference failed: {0}")]
    Inference(String),

    /// Classification succeeded but the gradient of the target class with
    /// respect to the captured feature map could not be computed. Kept
    /// distinct from [`Error::Inference`] so callers can tell the two apart.
    #[error("gradient unavailable for attribution: {0}")]
    GradientUnavailable(String),

    /// Invalid deployment configuration: model/catalog arity mismatch,
    /// unknown target layer, out-of-range target class.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Overlay opacity outside [0, 1]. A caller input error.
    #[error("opacity must be in [0, 1], got {0}")]
    InvalidOpacity(f32),

    /// The inference pool's admission capacity is exhausted. Callers should
    /// apply backpressure or shed load; nothing is queued without bound.
    #[error("inference pool is at capacity")]
    Overloaded,
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Decode(err.to_string())
    }
}

impl From<candle_core::Error> for Error {
    fn from(err: candle_core::Error) -> Self {
        Error::Inference(err.to_string())
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_from_image_error() {
        let err = image::load_from_memory(b"definitely not an image").unwrap_err();
        let err: Error = err.into();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_error_messages_are_distinct() {
        let gradient = Error::GradientUnavailable("no path".to_string());
        let inference = Error::Inference("no path".to_string());
        assert_ne!(gradient.to_string(), inference.to_string());
    }

    #[test]
    fn test_invalid_opacity_reports_value() {
        let err = Error::InvalidOpacity(1.5);
        assert!(err.to_string().contains("1.5"));
    }
}
