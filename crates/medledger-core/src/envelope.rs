//! Report envelope: everything a lab publishes for one version.
//!
//! An envelope is written once by the issuing lab and never mutated. The
//! ciphertext, the wrapped per-recipient keys and the lab signature are
//! opaque here: they are produced and consumed by the cryptographic
//! collaborators outside this engine.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::canonical::canonical_metadata_bytes;
use crate::digest::Blake3Hash;
use crate::types::{ActorId, VersionId};

/// Domain tag for ciphertext digests.
const CIPHER_DIGEST_DOMAIN: &[u8] = b"medledger:ciphertext:v1:";

/// Issuance metadata, bound to the ciphertext as additional authenticated data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    /// The lab that issued this version.
    pub lab_id: ActorId,

    /// Pseudonym of the patient the report is about.
    pub patient_ref: ActorId,

    /// Issuance time (Unix milliseconds).
    pub issued_at: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_short: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// The immutable bundle stored for one report version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// The version this envelope belongs to.
    pub version_id: VersionId,

    /// Issuance metadata.
    pub metadata: EnvelopeMetadata,

    /// Recipients holding a per-recipient key, mapped to the wrapped key bytes.
    pub ek_for: BTreeMap<ActorId, Bytes>,

    /// The encrypted report body.
    pub ciphertext: Bytes,

    /// The issuing lab's signature over ciphertext and metadata, if any.
    pub signature: Option<Bytes>,
}

impl Envelope {
    /// The issuing lab.
    pub fn lab_id(&self) -> &ActorId {
        &self.metadata.lab_id
    }

    /// The patient the report is about.
    pub fn patient_ref(&self) -> &ActorId {
        &self.metadata.patient_ref
    }

    /// Recipients with a per-recipient key, in lexicographic order.
    pub fn recipients(&self) -> impl Iterator<Item = &ActorId> {
        self.ek_for.keys()
    }

    /// The wrapped key issued to `recipient`, if the lab issued one.
    pub fn wrapped_key(&self, recipient: &ActorId) -> Option<&Bytes> {
        self.ek_for.get(recipient)
    }

    /// Whether the lab signed this envelope.
    pub fn has_sig(&self) -> bool {
        self.signature.as_ref().is_some_and(|sig| !sig.is_empty())
    }

    /// Byte length of the ciphertext.
    pub fn cipher_len(&self) -> usize {
        self.ciphertext.len()
    }

    /// Digest of the ciphertext, as published on the ledger.
    pub fn cipher_digest(&self) -> Blake3Hash {
        Blake3Hash::hash_with_domain(CIPHER_DIGEST_DOMAIN, &self.ciphertext)
    }

    /// The additional authenticated data handed to the decryption collaborator.
    pub fn aad_bytes(&self) -> Vec<u8> {
        canonical_metadata_bytes(&self.version_id, &self.metadata)
    }
}

/// Builder for envelopes.
pub struct EnvelopeBuilder {
    envelope: Envelope,
}

impl EnvelopeBuilder {
    /// Start an envelope for `version_id`, issued by `lab_id` about `patient_ref`.
    pub fn new(
        version_id: impl Into<VersionId>,
        lab_id: impl Into<ActorId>,
        patient_ref: impl Into<ActorId>,
    ) -> Self {
        Self {
            envelope: Envelope {
                version_id: version_id.into(),
                metadata: EnvelopeMetadata {
                    lab_id: lab_id.into(),
                    patient_ref: patient_ref.into(),
                    issued_at: 0,
                    exam_type: None,
                    result_short: None,
                    note: None,
                },
                ek_for: BTreeMap::new(),
                ciphertext: Bytes::new(),
                signature: None,
            },
        }
    }

    pub fn issued_at(mut self, ts: i64) -> Self {
        self.envelope.metadata.issued_at = ts;
        self
    }

    pub fn exam_type(mut self, exam_type: impl Into<String>) -> Self {
        self.envelope.metadata.exam_type = non_empty(exam_type.into());
        self
    }

    pub fn result_short(mut self, result_short: impl Into<String>) -> Self {
        self.envelope.metadata.result_short = non_empty(result_short.into());
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.envelope.metadata.note = non_empty(note.into());
        self
    }

    /// Record a wrapped key for `recipient`.
    pub fn key_for(mut self, recipient: impl Into<ActorId>, wrapped_key: impl Into<Bytes>) -> Self {
        self.envelope
            .ek_for
            .insert(recipient.into(), wrapped_key.into());
        self
    }

    pub fn ciphertext(mut self, ciphertext: impl Into<Bytes>) -> Self {
        self.envelope.ciphertext = ciphertext.into();
        self
    }

    pub fn signature(mut self, signature: impl Into<Bytes>) -> Self {
        self.envelope.signature = Some(signature.into());
        self
    }

    pub fn build(self) -> Envelope {
        self.envelope
    }
}

// Empty optional metadata is omitted from the AAD.
fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        EnvelopeBuilder::new("R-2025-0001", "LAB-01", "PAT-123")
            .issued_at(1_736_870_400_000)
            .exam_type("Emocromo")
            .result_short("Nella norma")
            .key_for("PAT-123", b"wrapped-for-patient".to_vec())
            .ciphertext(b"\x01\x02\x03\x04".to_vec())
            .signature(b"lab-signature".to_vec())
            .build()
    }

    #[test]
    fn test_derived_fields() {
        let env = sample();
        assert!(env.has_sig());
        assert_eq!(env.cipher_len(), 4);
        assert_eq!(env.recipients().collect::<Vec<_>>(), [&ActorId::from("PAT-123")]);
        assert_eq!(env.lab_id().as_str(), "LAB-01");
    }

    #[test]
    fn test_empty_signature_counts_as_unsigned() {
        let env = EnvelopeBuilder::new("R-1", "LAB-01", "PAT-1")
            .signature(Bytes::new())
            .build();
        assert!(!env.has_sig());
    }

    #[test]
    fn test_blank_metadata_is_omitted() {
        let env = EnvelopeBuilder::new("R-1", "LAB-01", "PAT-1").note("   ").build();
        assert_eq!(env.metadata.note, None);
    }

    #[test]
    fn test_aad_binds_version_id() {
        let env = sample();
        let mut other = env.clone();
        other.version_id = VersionId::from("R-2025-0002");
        assert_ne!(env.aad_bytes(), other.aad_bytes());
        assert_eq!(env.aad_bytes(), sample().aad_bytes());
    }

    #[test]
    fn test_cipher_digest_tracks_ciphertext() {
        let env = sample();
        let mut tampered = env.clone();
        tampered.ciphertext = Bytes::from_static(b"\x01\x02\x03\x05");
        assert_ne!(env.cipher_digest(), tampered.cipher_digest());
    }
}
