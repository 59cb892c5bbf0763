//! Golden test vectors for deterministic verification.
//!
//! Each vector pins the canonical CBOR bytes of one ledger record or one
//! metadata block. Entry ids and the decryption AAD are computed over these
//! bytes, so any drift here silently changes every stored id.

use serde::Serialize;

use medledger_core::{
    canonical_entry_bytes, canonical_metadata_bytes, ActorId, EnvelopeMetadata, GrantEntry,
    HardRevocation, LedgerRecord, ReportId, SoftRevocation, VersionId, VersionLink,
};

use crate::fixtures::ISSUED_AT;

/// The record a vector encodes.
#[derive(Debug, Clone)]
pub enum VectorInput {
    Grant(GrantEntry),
    SoftRevocation(SoftRevocation),
    Link(VersionLink),
    HardRevocation(HardRevocation),
    Metadata(VersionId, EnvelopeMetadata),
}

impl VectorInput {
    /// Canonical bytes of the input.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            VectorInput::Grant(r) => canonical_entry_bytes(r),
            VectorInput::SoftRevocation(r) => canonical_entry_bytes(r),
            VectorInput::Link(r) => canonical_entry_bytes(r),
            VectorInput::HardRevocation(r) => canonical_entry_bytes(r),
            VectorInput::Metadata(v, m) => canonical_metadata_bytes(v, m),
        }
    }

    /// Entry id, for ledger records.
    pub fn entry_id_hex(&self) -> Option<String> {
        let id = match self {
            VectorInput::Grant(r) => r.entry_id(),
            VectorInput::SoftRevocation(r) => r.entry_id(),
            VectorInput::Link(r) => r.entry_id(),
            VectorInput::HardRevocation(r) => r.entry_id(),
            VectorInput::Metadata(..) => return None,
        };
        Some(id.to_hex())
    }
}

/// A golden test vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    pub input: VectorInput,
    /// Expected canonical bytes (hex).
    pub expected_bytes: &'static str,
}

/// A computed vector, for export to other implementations.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorOutput {
    pub name: String,
    pub canonical_bytes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
}

fn v(s: &str) -> VersionId {
    VersionId::from(s)
}

fn a(s: &str) -> ActorId {
    ActorId::from(s)
}

/// Get all golden test vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "grant without wrapped key",
            input: VectorInput::Grant(GrantEntry {
                seq: 1,
                version_id: v("R-2025-0001"),
                from: a("PAT-123"),
                to: a("HOSP-01"),
                wrapped_key: None,
                at: ISSUED_AT,
            }),
            expected_bytes: "a700190100026b522d323032352d3030303103675041542d3132330467484f53502d30310501061b00000194658b100007f6",
        },
        GoldenVector {
            name: "soft revocation one minute later",
            input: VectorInput::SoftRevocation(SoftRevocation {
                seq: 2,
                version_id: v("R-2025-0001"),
                patient: a("PAT-123"),
                recipient: a("HOSP-01"),
                at: ISSUED_AT + 60_000,
            }),
            expected_bytes: "a600190101026b522d323032352d3030303103675041542d3132330467484f53502d30310502061b00000194658bfa60",
        },
        GoldenVector {
            name: "version link",
            input: VectorInput::Link(VersionLink {
                report_id: ReportId::from("R-2025-0001"),
                old: v("R-2025-0001"),
                new: v("R-2025-0002"),
                lab_id: a("LAB-01"),
                at: ISSUED_AT + 3_600_000,
            }),
            expected_bytes: "a60002016b522d323032352d30303031026b522d323032352d3030303103664c41422d3031046b522d323032352d30303032061b0000019465c1fe80",
        },
        GoldenVector {
            name: "hard revocation with reason",
            input: VectorInput::HardRevocation(HardRevocation {
                report_id: ReportId::from("R-2025-0001"),
                lab_id: a("LAB-01"),
                reason: Some("sample mix-up".to_string()),
                at: ISSUED_AT + 7_200_000,
            }),
            expected_bytes: "a50003016b522d323032352d3030303103664c41422d3031061b0000019465f8ed00086d73616d706c65206d69782d7570",
        },
        GoldenVector {
            name: "hard revocation without reason",
            input: VectorInput::HardRevocation(HardRevocation {
                report_id: ReportId::from("R-1"),
                lab_id: a("L"),
                reason: None,
                at: 0,
            }),
            expected_bytes: "a500030163522d3103614c060008f6",
        },
        GoldenVector {
            name: "metadata with exam type only",
            input: VectorInput::Metadata(
                v("R-2025-0001"),
                EnvelopeMetadata {
                    lab_id: a("LAB-01"),
                    patient_ref: a("PAT-123"),
                    issued_at: ISSUED_AT,
                    exam_type: Some("Hemogram".to_string()),
                    result_short: None,
                    note: None,
                },
            ),
            expected_bytes: "a5026b522d323032352d3030303110664c41422d303111675041542d313233121b00000194658b1000136848656d6f6772616d",
        },
    ]
}

/// Compute every vector.
pub fn compute_all_vectors() -> Vec<VectorOutput> {
    all_vectors()
        .into_iter()
        .map(|vector| VectorOutput {
            name: vector.name.to_string(),
            canonical_bytes: hex::encode(vector.input.canonical_bytes()),
            entry_id: vector.input.entry_id_hex(),
        })
        .collect()
}

/// Check every vector. Returns `(name, matches, actual_hex)` per vector.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    all_vectors()
        .into_iter()
        .map(|vector| {
            let actual = hex::encode(vector.input.canonical_bytes());
            (vector.name.to_string(), actual == vector.expected_bytes, actual)
        })
        .collect()
}
