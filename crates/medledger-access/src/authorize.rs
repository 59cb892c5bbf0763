//! Open authorization.
//!
//! A request names any version of a chain, but is always judged against the
//! chain's current version. Access withdrawn at the current version cannot
//! be bypassed by naming an older, frozen version id.

use std::collections::BTreeSet;

use bytes::Bytes;

use medledger_core::{ActorId, ChainLedger, VersionId};

use crate::chain::VersionChain;
use crate::error::{AccessError, Result};
use crate::state::AccessState;

/// Everything the decryption collaborator needs for one authorized open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptionRequest {
    /// The current version the request was redirected to.
    pub version_id: VersionId,
    pub requester: ActorId,
    pub ciphertext: Bytes,
    /// Canonical metadata bytes, to be checked as additional authenticated data.
    pub aad: Vec<u8>,
    /// Key material wrapped for the requester, if the ledger carries any.
    pub wrapped_key: Option<Bytes>,
}

/// Decide whether `requester` may open the chain `requested` belongs to.
///
/// Checks run in a fixed order: revoked chain, lab mismatch, effective
/// access, then signature. Returns the current version id on success.
pub fn authorize_open(
    ledger: &ChainLedger,
    requested: &VersionId,
    requester: &ActorId,
    claimed_lab: &ActorId,
) -> Result<VersionId> {
    if !ledger.contains(requested) {
        return Err(AccessError::NotFound(format!("version {requested}")));
    }
    if ledger.is_hard_revoked() {
        return Err(AccessError::ChainRevoked(ledger.report_id.clone()));
    }

    let current = VersionChain::from_ledger(ledger).resolve_current(requested)?;
    let state = AccessState::from_ledger(ledger, &current)?;
    let envelope = state.envelope();

    if envelope.lab_id() != claimed_lab {
        return Err(AccessError::LabMismatch {
            expected: envelope.lab_id().clone(),
            claimed: claimed_lab.clone(),
        });
    }
    if let Some(denial) = state.denial_for(requester) {
        return Err(AccessError::NotAuthorized {
            requester: requester.clone(),
            version: current,
            denial,
        });
    }
    if !envelope.has_sig() {
        return Err(AccessError::MissingSignature(current));
    }

    Ok(current)
}

/// Authorize and assemble the collaborator's input in one pass.
pub fn prepare_decryption(
    ledger: &ChainLedger,
    requested: &VersionId,
    requester: &ActorId,
    claimed_lab: &ActorId,
) -> Result<DecryptionRequest> {
    let version_id = authorize_open(ledger, requested, requester, claimed_lab)?;
    let state = AccessState::from_ledger(ledger, &version_id)?;
    let envelope = state.envelope();

    Ok(DecryptionRequest {
        requester: requester.clone(),
        ciphertext: envelope.ciphertext.clone(),
        aad: envelope.aad_bytes(),
        wrapped_key: state.wrapped_key_for(requester).cloned(),
        version_id,
    })
}

/// Effective access of `version`.
pub fn effective_access(ledger: &ChainLedger, version: &VersionId) -> Result<BTreeSet<ActorId>> {
    AccessState::from_ledger(ledger, version).map(|state| state.effective_access())
}
