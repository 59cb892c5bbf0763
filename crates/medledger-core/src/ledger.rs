//! Append-only ledger records.
//!
//! Four kinds of fact are ever written for a chain: version links (lab
//! updates), grants and soft revocations (patient sharing), and at most one
//! hard revocation (lab, terminal). Nothing is updated or deleted; current
//! state is always recomputed by replaying these records.

use bytes::Bytes;
use ciborium::value::Value;
use serde::{Deserialize, Serialize};

use crate::canonical::{canonical_entry_bytes, keys};
use crate::digest::Blake3Hash;
use crate::envelope::Envelope;
use crate::types::{ActorId, EntryId, ReportId, VersionId};

/// Domain tag for entry ids.
const ENTRY_ID_DOMAIN: &[u8] = b"medledger:entry:v1:";

/// Discriminator for ledger records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum EntryKind {
    /// A lab issued the first version of a report.
    Publish = 0x0001,
    /// A lab superseded the current version.
    Update = 0x0002,
    /// A lab voided the whole chain.
    HardRevoke = 0x0003,
    /// A patient shared a version with a recipient.
    Grant = 0x0100,
    /// A patient withdrew a recipient's access to a version.
    SoftRevoke = 0x0101,
}

impl EntryKind {
    /// Convert to u16 for serialization.
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// A record that can be content-addressed.
pub trait LedgerRecord {
    /// The record kind.
    fn kind(&self) -> EntryKind;

    /// The record body as a CBOR map with integer keys.
    ///
    /// The kind is added by [`canonical_entry_bytes`].
    fn body(&self) -> Vec<(Value, Value)>;

    /// Blake3 over the canonical encoding.
    fn entry_id(&self) -> EntryId {
        let bytes = canonical_entry_bytes(self);
        EntryId(Blake3Hash::hash_with_domain(ENTRY_ID_DOMAIN, &bytes).0)
    }
}

fn int(key: u64) -> Value {
    Value::Integer(key.into())
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn opt_bytes(b: Option<&Bytes>) -> Value {
    b.map_or(Value::Null, |b| Value::Bytes(b.to_vec()))
}

/// Patient-initiated sharing of one version with one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantEntry {
    /// Position in the chain's sharing log.
    pub seq: u64,
    pub version_id: VersionId,
    /// The patient who shared.
    pub from: ActorId,
    /// The recipient.
    pub to: ActorId,
    /// The content key re-wrapped for the recipient, if the patient supplied one.
    pub wrapped_key: Option<Bytes>,
    /// Unix milliseconds.
    pub at: i64,
}

impl LedgerRecord for GrantEntry {
    fn kind(&self) -> EntryKind {
        EntryKind::Grant
    }

    fn body(&self) -> Vec<(Value, Value)> {
        vec![
            (int(keys::SEQ), Value::Integer(self.seq.into())),
            (int(keys::VERSION_ID), text(self.version_id.as_str())),
            (int(keys::ACTOR), text(self.from.as_str())),
            (int(keys::SUBJECT), text(self.to.as_str())),
            (int(keys::KEY), opt_bytes(self.wrapped_key.as_ref())),
            (int(keys::AT), Value::Integer(self.at.into())),
        ]
    }
}

/// Patient-initiated withdrawal of one recipient's access to one version.
///
/// Only future authorization checks are affected; copies already decrypted
/// by the recipient are out of reach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftRevocation {
    /// Position in the chain's sharing log (shared with grants).
    pub seq: u64,
    pub version_id: VersionId,
    pub patient: ActorId,
    pub recipient: ActorId,
    pub at: i64,
}

impl LedgerRecord for SoftRevocation {
    fn kind(&self) -> EntryKind {
        EntryKind::SoftRevoke
    }

    fn body(&self) -> Vec<(Value, Value)> {
        vec![
            (int(keys::SEQ), Value::Integer(self.seq.into())),
            (int(keys::VERSION_ID), text(self.version_id.as_str())),
            (int(keys::ACTOR), text(self.patient.as_str())),
            (int(keys::SUBJECT), text(self.recipient.as_str())),
            (int(keys::AT), Value::Integer(self.at.into())),
        ]
    }
}

/// Supersession of `old` by `new`, created by a lab update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionLink {
    pub report_id: ReportId,
    pub old: VersionId,
    pub new: VersionId,
    pub lab_id: ActorId,
    pub at: i64,
}

impl LedgerRecord for VersionLink {
    fn kind(&self) -> EntryKind {
        EntryKind::Update
    }

    fn body(&self) -> Vec<(Value, Value)> {
        vec![
            (int(keys::REPORT_ID), text(self.report_id.as_str())),
            (int(keys::VERSION_ID), text(self.old.as_str())),
            (int(keys::SUBJECT), text(self.new.as_str())),
            (int(keys::ACTOR), text(self.lab_id.as_str())),
            (int(keys::AT), Value::Integer(self.at.into())),
        ]
    }
}

/// Terminal, lab-initiated invalidation of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardRevocation {
    pub report_id: ReportId,
    pub lab_id: ActorId,
    pub reason: Option<String>,
    pub at: i64,
}

impl LedgerRecord for HardRevocation {
    fn kind(&self) -> EntryKind {
        EntryKind::HardRevoke
    }

    fn body(&self) -> Vec<(Value, Value)> {
        vec![
            (int(keys::REPORT_ID), text(self.report_id.as_str())),
            (int(keys::ACTOR), text(self.lab_id.as_str())),
            (
                int(keys::REASON),
                self.reason.as_deref().map_or(Value::Null, text),
            ),
            (int(keys::AT), Value::Integer(self.at.into())),
        ]
    }
}

impl LedgerRecord for Envelope {
    fn kind(&self) -> EntryKind {
        EntryKind::Publish
    }

    fn body(&self) -> Vec<(Value, Value)> {
        vec![
            (int(keys::VERSION_ID), text(self.version_id.as_str())),
            (int(keys::ACTOR), text(self.lab_id().as_str())),
            (int(keys::SUBJECT), text(self.patient_ref().as_str())),
            (
                int(keys::DIGEST),
                Value::Bytes(self.cipher_digest().as_bytes().to_vec()),
            ),
            (int(keys::AT), Value::Integer(self.metadata.issued_at.into())),
        ]
    }
}

/// Every record of one chain, read in a single consistent snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLedger {
    /// The chain's origin id.
    pub report_id: ReportId,

    /// The cached current pointer. Derivable from `links`.
    pub current_pointer: VersionId,

    /// Envelopes of every version, in issuance order.
    pub envelopes: Vec<Envelope>,

    /// Supersession links, in append order.
    pub links: Vec<VersionLink>,

    /// Grants, in `seq` order.
    pub grants: Vec<GrantEntry>,

    /// Soft revocations, in `seq` order.
    pub soft_revocations: Vec<SoftRevocation>,

    /// The hard revocation, once applied.
    pub hard_revocation: Option<HardRevocation>,
}

impl ChainLedger {
    /// A fresh chain holding only its origin envelope.
    pub fn genesis(envelope: Envelope) -> Self {
        let report_id = envelope.version_id.to_report_id();
        Self {
            current_pointer: envelope.version_id.clone(),
            report_id,
            envelopes: vec![envelope],
            links: Vec::new(),
            grants: Vec::new(),
            soft_revocations: Vec::new(),
            hard_revocation: None,
        }
    }

    /// The envelope of `version_id`, if it belongs to this chain.
    pub fn envelope(&self, version_id: &VersionId) -> Option<&Envelope> {
        self.envelopes.iter().find(|e| &e.version_id == version_id)
    }

    /// Whether `version_id` belongs to this chain.
    pub fn contains(&self, version_id: &VersionId) -> bool {
        self.envelope(version_id).is_some()
    }

    /// The first envelope of the chain.
    pub fn origin(&self) -> Option<&Envelope> {
        self.envelope(&self.report_id.as_version())
    }

    /// The lab that owns the chain.
    pub fn issuing_lab(&self) -> Option<&ActorId> {
        self.origin().map(Envelope::lab_id)
    }

    /// The patient that owns the chain's sharing rights.
    pub fn patient(&self) -> Option<&ActorId> {
        self.origin().map(Envelope::patient_ref)
    }

    pub fn is_hard_revoked(&self) -> bool {
        self.hard_revocation.is_some()
    }

    /// Grants recorded against one version.
    pub fn grants_for<'a>(&'a self, version_id: &'a VersionId) -> impl Iterator<Item = &'a GrantEntry> {
        self.grants.iter().filter(move |g| &g.version_id == version_id)
    }

    /// Soft revocations recorded against one version.
    pub fn soft_revocations_for<'a>(
        &'a self,
        version_id: &'a VersionId,
    ) -> impl Iterator<Item = &'a SoftRevocation> {
        self.soft_revocations
            .iter()
            .filter(move |r| &r.version_id == version_id)
    }

    /// The `seq` the next grant or soft revocation must carry.
    pub fn next_seq(&self) -> u64 {
        let max_grant = self.grants.iter().map(|g| g.seq).max().unwrap_or(0);
        let max_revoke = self.soft_revocations.iter().map(|r| r.seq).max().unwrap_or(0);
        max_grant.max(max_revoke) + 1
    }
}
