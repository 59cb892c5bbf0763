//! Error types for the engine.

use serde::Serialize;
use thiserror::Error;

use medledger_access::{AccessDenial, AccessError};
use medledger_core::{ActorId, CoreError, ReportId, VersionId};
use medledger_store::StoreError;

/// Errors that can occur during engine operations.
///
/// Every variant is recoverable by the caller. A failed mutation has
/// written nothing.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Unknown report or version id.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller does not own the chain it tried to change.
    #[error("forbidden for {actor}: {reason}")]
    Forbidden { actor: ActorId, reason: String },

    /// An update or revoke precondition does not hold.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// The chain was hard-revoked by its lab.
    #[error("report {0} has been revoked by the issuing lab")]
    ChainRevoked(ReportId),

    /// The requester is not in the effective access set.
    #[error("{requester} is not authorized to open {version}: {denial}")]
    NotAuthorized {
        requester: ActorId,
        version: VersionId,
        denial: AccessDenial,
    },

    /// The request named a lab other than the issuer.
    #[error("lab mismatch: report issued by {expected}, request names {claimed}")]
    LabMismatch { expected: ActorId, claimed: ActorId },

    /// The current version carries no lab signature.
    #[error("version {0} is not signed by its lab")]
    MissingSignature(VersionId),

    /// The version id is already taken.
    #[error("version {0} already exists")]
    DuplicateVersion(VersionId),

    /// Malformed identifier or envelope.
    #[error("invalid input: {0}")]
    InvalidInput(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Engine configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

/// What the caller should do about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Remediation {
    /// Ask the patient to share the report (again).
    RequestGrant,
    /// The lab has to act: wrong lab named, or the report is unsigned.
    ContactLab,
    /// The report no longer exists for any purpose.
    PermanentlyVoid,
    /// The request itself is wrong and must be changed.
    FixRequest,
    /// Transient backend failure.
    Retry,
}

impl EngineError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::Forbidden { .. } => "FORBIDDEN",
            EngineError::InvalidTransition(_) => "INVALID_TRANSITION",
            EngineError::ChainRevoked(_) => "CHAIN_REVOKED",
            EngineError::NotAuthorized { .. } => "NOT_AUTHORIZED",
            EngineError::LabMismatch { .. } => "LAB_MISMATCH",
            EngineError::MissingSignature(_) => "MISSING_SIGNATURE",
            EngineError::DuplicateVersion(_) => "DUPLICATE_VERSION",
            EngineError::InvalidInput(_) => "INVALID_INPUT",
            EngineError::Store(_) => "STORE",
            EngineError::Config(_) => "CONFIG",
        }
    }

    pub fn remediation(&self) -> Remediation {
        match self {
            EngineError::NotAuthorized { .. } => Remediation::RequestGrant,
            EngineError::LabMismatch { .. } | EngineError::MissingSignature(_) => {
                Remediation::ContactLab
            }
            EngineError::ChainRevoked(_) => Remediation::PermanentlyVoid,
            EngineError::NotFound(_)
            | EngineError::Forbidden { .. }
            | EngineError::InvalidTransition(_)
            | EngineError::DuplicateVersion(_)
            | EngineError::InvalidInput(_)
            | EngineError::Config(_) => Remediation::FixRequest,
            EngineError::Store(_) => Remediation::Retry,
        }
    }

    /// A serializable view of this error for the requesting actor.
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            code: self.code(),
            message: self.to_string(),
            remediation: self.remediation(),
            denial: match self {
                EngineError::NotAuthorized { denial, .. } => Some(*denial),
                _ => None,
            },
        }
    }
}

/// An engine error as surfaced to the requesting actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub code: &'static str,
    pub message: String,
    pub remediation: Remediation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denial: Option<AccessDenial>,
}

impl From<AccessError> for EngineError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::NotFound(what) => EngineError::NotFound(what),
            AccessError::Forbidden { actor, reason } => EngineError::Forbidden { actor, reason },
            AccessError::InvalidTransition(msg) => EngineError::InvalidTransition(msg),
            AccessError::ChainRevoked(report) => EngineError::ChainRevoked(report),
            AccessError::NotAuthorized {
                requester,
                version,
                denial,
            } => EngineError::NotAuthorized {
                requester,
                version,
                denial,
            },
            AccessError::LabMismatch { expected, claimed } => {
                EngineError::LabMismatch { expected, claimed }
            }
            AccessError::MissingSignature(version) => EngineError::MissingSignature(version),
            AccessError::DuplicateVersion(version) => EngineError::DuplicateVersion(version),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_errors_keep_their_variant() {
        let err: EngineError = AccessError::ChainRevoked(ReportId::from("R-1")).into();
        assert!(matches!(err, EngineError::ChainRevoked(_)));
        assert_eq!(err.remediation(), Remediation::PermanentlyVoid);

        let err: EngineError = AccessError::NotAuthorized {
            requester: ActorId::from("HOSP-01"),
            version: VersionId::from("R-1"),
            denial: AccessDenial::Withdrawn,
        }
        .into();
        assert_eq!(err.code(), "NOT_AUTHORIZED");
        assert_eq!(err.remediation(), Remediation::RequestGrant);
    }

    #[test]
    fn test_error_report_serializes() {
        let err = EngineError::NotAuthorized {
            requester: ActorId::from("HOSP-01"),
            version: VersionId::from("R-2"),
            denial: AccessDenial::NeverGranted,
        };
        let json = serde_json::to_value(err.report()).unwrap();
        assert_eq!(json["code"], "NOT_AUTHORIZED");
        assert_eq!(json["remediation"], "REQUEST_GRANT");
        assert_eq!(json["denial"], "NEVER_GRANTED");

        let json = serde_json::to_value(EngineError::MissingSignature(VersionId::from("R-2")).report())
            .unwrap();
        assert_eq!(json["remediation"], "CONTACT_LAB");
        assert!(json.get("denial").is_none());
    }
}
