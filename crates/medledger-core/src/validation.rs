//! Structural checks on caller-supplied identifiers and envelopes.
//!
//! These run before any ledger state is consulted. They reject malformed
//! input; they say nothing about whether the caller is allowed to act.

use crate::envelope::Envelope;
use crate::error::CoreError;

/// Longest identifier accepted.
pub const MAX_ID_LEN: usize = 128;

/// Validate one identifier.
///
/// Identifiers must be non-empty, at most [`MAX_ID_LEN`] bytes, and free of
/// whitespace and control characters.
pub fn validate_id(field: &'static str, id: &str) -> Result<(), CoreError> {
    if id.is_empty() {
        return Err(CoreError::InvalidId {
            field,
            reason: "must not be empty".into(),
        });
    }
    if id.len() > MAX_ID_LEN {
        return Err(CoreError::InvalidId {
            field,
            reason: format!("longer than {MAX_ID_LEN} bytes"),
        });
    }
    if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(CoreError::InvalidId {
            field,
            reason: format!("contains whitespace or control characters: {id:?}"),
        });
    }
    Ok(())
}

/// Validate an envelope before it is stored.
pub fn validate_envelope(envelope: &Envelope) -> Result<(), CoreError> {
    validate_id("version id", envelope.version_id.as_str())?;
    validate_id("lab id", envelope.lab_id().as_str())
        .map_err(|e| CoreError::InvalidEnvelope(e.to_string()))?;
    validate_id("patient ref", envelope.patient_ref().as_str())
        .map_err(|e| CoreError::InvalidEnvelope(e.to_string()))?;

    if envelope.metadata.issued_at < 0 {
        return Err(CoreError::InvalidEnvelope(format!(
            "issued_at before the epoch: {}",
            envelope.metadata.issued_at
        )));
    }

    for recipient in envelope.recipients() {
        validate_id("ek_for recipient", recipient.as_str())
            .map_err(|e| CoreError::InvalidEnvelope(e.to_string()))?;
    }

    Ok(())
}
