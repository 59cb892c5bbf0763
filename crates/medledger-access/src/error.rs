//! Error types for access resolution.

use serde::Serialize;
use thiserror::Error;

use medledger_core::{ActorId, ReportId, VersionId};

/// Why a requester is not in the effective access set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessDenial {
    /// The requester was never given access to this version.
    NeverGranted,
    /// The patient withdrew the requester's access.
    Withdrawn,
}

impl std::fmt::Display for AccessDenial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessDenial::NeverGranted => f.write_str("access was never granted"),
            AccessDenial::Withdrawn => f.write_str("access was withdrawn by the patient"),
        }
    }
}

/// Errors that can occur while resolving or changing access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
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

    /// The requester named a lab other than the issuer of the current version.
    #[error("lab mismatch: report issued by {expected}, request names {claimed}")]
    LabMismatch { expected: ActorId, claimed: ActorId },

    /// The current version carries no lab signature.
    #[error("version {0} is not signed by its lab")]
    MissingSignature(VersionId),

    /// The version id is already taken.
    #[error("version {0} already exists")]
    DuplicateVersion(VersionId),
}

/// Result type for access operations.
pub type Result<T> = std::result::Result<T, AccessError>;
