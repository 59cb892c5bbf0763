//! Error types for medledger core records.

use thiserror::Error;

/// Errors raised while building, validating or decoding core records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("invalid {field}: {reason}")]
    InvalidId { field: &'static str, reason: String },

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}
