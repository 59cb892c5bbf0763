//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use medledger::{EmitRequest, Engine, EngineConfig, Result};
use medledger_core::{ActorId, Envelope, EnvelopeBuilder, VersionId};
use medledger_store::MemoryStore;

/// Issuance time used by every fixture envelope (2025-01-14T16:00:00Z).
pub const ISSUED_AT: i64 = 1_736_870_400_000;

/// The cast of one report: its lab, its patient and two consumers.
#[derive(Debug, Clone)]
pub struct ReportFixture {
    pub lab: ActorId,
    pub patient: ActorId,
    pub hospital: ActorId,
    pub doctor: ActorId,
}

impl ReportFixture {
    /// `LAB-01`, `PAT-123`, `HOSP-01`, `DOC-01`.
    pub fn new() -> Self {
        Self {
            lab: ActorId::from("LAB-01"),
            patient: ActorId::from("PAT-123"),
            hospital: ActorId::from("HOSP-01"),
            doctor: ActorId::from("DOC-01"),
        }
    }

    /// A fixture for an unrelated lab and patient.
    pub fn numbered(n: usize) -> Self {
        Self {
            lab: ActorId::new(format!("LAB-{n:02}")),
            patient: ActorId::new(format!("PAT-{n:03}")),
            hospital: ActorId::new(format!("HOSP-{n:02}")),
            doctor: ActorId::new(format!("DOC-{n:02}")),
        }
    }

    /// A signed envelope for `version`, with a key only for the patient.
    pub fn envelope(&self, version: &str) -> Envelope {
        EnvelopeBuilder::new(version, self.lab.clone(), self.patient.clone())
            .issued_at(ISSUED_AT)
            .exam_type("Hemogram")
            .key_for(self.patient.clone(), format!("wrapped:{version}").into_bytes())
            .ciphertext(format!("sealed:{version}").into_bytes())
            .signature(format!("sig:{}", self.lab).into_bytes())
            .build()
    }

    /// Like [`ReportFixture::envelope`], with no lab signature.
    pub fn unsigned_envelope(&self, version: &str) -> Envelope {
        EnvelopeBuilder::new(version, self.lab.clone(), self.patient.clone())
            .issued_at(ISSUED_AT)
            .key_for(self.patient.clone(), b"wrapped".to_vec())
            .ciphertext(b"sealed".to_vec())
            .build()
    }

    /// Emit `version` as the origin of a new chain.
    pub async fn emit(&self, engine: &Engine<MemoryStore>, version: &str) -> Result<VersionId> {
        engine
            .emit(EmitRequest::new(self.lab.clone(), self.envelope(version)))
            .await
    }
}

impl Default for ReportFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// A memory-backed engine with default configuration.
pub fn memory_engine() -> Engine<MemoryStore> {
    Engine::new(MemoryStore::new(), EngineConfig::default())
}

/// Fixtures for `count` unrelated reports.
pub fn multi_report_fixtures(count: usize) -> Vec<ReportFixture> {
    (1..=count).map(ReportFixture::numbered).collect()
}
