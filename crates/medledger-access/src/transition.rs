//! Precondition checks for the four mutating operations.
//!
//! Each `plan_*` function inspects one chain snapshot and either rejects the
//! request or returns the exact record to append. Callers run these inside
//! the chain's critical section and commit the returned record in a single
//! store write, so a rejected request never leaves a trace.

use bytes::Bytes;

use medledger_core::{
    ActorId, ChainLedger, Envelope, GrantEntry, HardRevocation, SoftRevocation, VersionId,
    VersionLink,
};

use crate::chain::VersionChain;
use crate::error::{AccessError, Result};
use crate::state::AccessState;

/// How patient sharing treats the version id it is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharePolicy {
    /// Record shares against the chain's current version instead of the one named.
    pub resolve_to_current: bool,
    /// Append a grant even when the recipient already has access.
    pub record_redundant_grants: bool,
}

impl Default for SharePolicy {
    fn default() -> Self {
        Self {
            resolve_to_current: true,
            record_redundant_grants: true,
        }
    }
}

/// Outcome of planning a grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantPlan {
    /// The version the grant applies to.
    pub version_id: VersionId,
    /// The entry to append, if any.
    pub entry: Option<GrantEntry>,
    /// Whether the recipient gains access.
    pub changes_access: bool,
}

/// Outcome of planning a soft revocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokePlan {
    /// The version the revocation applies to.
    pub version_id: VersionId,
    /// The entry to append, or `None` if the recipient is already revoked.
    pub entry: Option<SoftRevocation>,
}

/// Check a lab update of `old` to `new_envelope`.
pub fn plan_update(
    ledger: &ChainLedger,
    old: &VersionId,
    lab: &ActorId,
    new_envelope: &Envelope,
    now: i64,
) -> Result<VersionLink> {
    let chain = VersionChain::from_ledger(ledger);
    let current = chain.resolve_current(old)?;

    if ledger.is_hard_revoked() {
        return Err(AccessError::ChainRevoked(ledger.report_id.clone()));
    }
    require_issuing_lab(ledger, lab)?;
    if new_envelope.lab_id() != lab {
        return Err(AccessError::Forbidden {
            actor: lab.clone(),
            reason: format!(
                "new envelope names lab {}, not the updating lab",
                new_envelope.lab_id()
            ),
        });
    }
    if &current != old {
        return Err(AccessError::InvalidTransition(format!(
            "cannot update from non-current version {old}; current is {current}"
        )));
    }
    if Some(new_envelope.patient_ref()) != ledger.patient() {
        return Err(AccessError::InvalidTransition(format!(
            "update cannot move report {} to patient {}",
            ledger.report_id,
            new_envelope.patient_ref()
        )));
    }
    if ledger.contains(&new_envelope.version_id) {
        return Err(AccessError::DuplicateVersion(new_envelope.version_id.clone()));
    }

    Ok(VersionLink {
        report_id: ledger.report_id.clone(),
        old: old.clone(),
        new: new_envelope.version_id.clone(),
        lab_id: lab.clone(),
        at: now,
    })
}

/// Check a lab hard revocation of the whole chain.
pub fn plan_hard_revoke(
    ledger: &ChainLedger,
    lab: &ActorId,
    reason: Option<&str>,
    now: i64,
) -> Result<HardRevocation> {
    require_issuing_lab(ledger, lab)?;
    if ledger.is_hard_revoked() {
        return Err(AccessError::InvalidTransition(format!(
            "report {} is already revoked",
            ledger.report_id
        )));
    }

    Ok(HardRevocation {
        report_id: ledger.report_id.clone(),
        lab_id: lab.clone(),
        reason: reason.map(str::trim).filter(|r| !r.is_empty()).map(String::from),
        at: now,
    })
}

/// Check a patient share of `requested` with `recipient`.
pub fn plan_grant(
    ledger: &ChainLedger,
    requested: &VersionId,
    patient: &ActorId,
    recipient: &ActorId,
    wrapped_key: Option<Bytes>,
    now: i64,
    policy: SharePolicy,
) -> Result<GrantPlan> {
    let version_id = sharing_target(ledger, requested, patient, policy)?;
    let state = AccessState::from_ledger(ledger, &version_id)?;

    let changes_access = recipient != patient && !state.has_access(recipient);
    let entry = (changes_access || policy.record_redundant_grants).then(|| GrantEntry {
        seq: ledger.next_seq(),
        version_id: version_id.clone(),
        from: patient.clone(),
        to: recipient.clone(),
        wrapped_key,
        at: now,
    });

    Ok(GrantPlan {
        version_id,
        entry,
        changes_access,
    })
}

/// Check a patient withdrawal of `recipient`'s access to `requested`.
pub fn plan_soft_revoke(
    ledger: &ChainLedger,
    requested: &VersionId,
    patient: &ActorId,
    recipient: &ActorId,
    now: i64,
    policy: SharePolicy,
) -> Result<RevokePlan> {
    let version_id = sharing_target(ledger, requested, patient, policy)?;
    let state = AccessState::from_ledger(ledger, &version_id)?;

    let entry = (!state.is_withdrawn(recipient)).then(|| SoftRevocation {
        seq: ledger.next_seq(),
        version_id: version_id.clone(),
        patient: patient.clone(),
        recipient: recipient.clone(),
        at: now,
    });

    Ok(RevokePlan { version_id, entry })
}

/// Resolve the version a share or unshare applies to, checking ownership.
fn sharing_target(
    ledger: &ChainLedger,
    requested: &VersionId,
    patient: &ActorId,
    policy: SharePolicy,
) -> Result<VersionId> {
    let chain = VersionChain::from_ledger(ledger);
    let current = chain.resolve_current(requested)?;

    if ledger.is_hard_revoked() {
        return Err(AccessError::ChainRevoked(ledger.report_id.clone()));
    }

    let owner = ledger
        .envelope(requested)
        .map(Envelope::patient_ref)
        .ok_or_else(|| AccessError::NotFound(format!("version {requested}")))?;
    if owner != patient {
        return Err(AccessError::Forbidden {
            actor: patient.clone(),
            reason: format!("report {} belongs to another patient", ledger.report_id),
        });
    }

    if policy.resolve_to_current {
        Ok(current)
    } else if &current == requested {
        Ok(current)
    } else {
        Err(AccessError::InvalidTransition(format!(
            "version {requested} is superseded by {current} and cannot be shared"
        )))
    }
}

fn require_issuing_lab(ledger: &ChainLedger, lab: &ActorId) -> Result<()> {
    match ledger.issuing_lab() {
        Some(issuer) if issuer == lab => Ok(()),
        Some(_) => Err(AccessError::Forbidden {
            actor: lab.clone(),
            reason: format!("report {} was issued by another lab", ledger.report_id),
        }),
        None => Err(AccessError::NotFound(format!(
            "origin envelope of report {}",
            ledger.report_id
        ))),
    }
}
