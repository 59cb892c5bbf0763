//! # Medledger
//!
//! Versioning and access resolution for encrypted medical reports.
//!
//! ## Overview
//!
//! A lab issues a report as the first version of a chain and may later
//! supersede it or hard-revoke the whole chain. The patient shares the
//! report with hospitals and doctors and may withdraw those shares. A
//! consumer asks to open a report by any version id and is judged against
//! the chain's current version.
//!
//! - **Chain**: origin version plus the update links that superseded it
//! - **Hard revocation**: lab-owned, terminal, blocks every later mutation and open
//! - **Grant / soft revocation**: patient-owned, per version, reversible
//! - **Effective access**: recipients of a version, never including its patient
//!
//! Status and access are recomputed from the append-only ledger on every
//! read. The engine never sees plaintext: an authorized open yields a
//! [`DecryptionRequest`] for an external decryption collaborator.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use medledger::{EmitRequest, Engine, EngineConfig};
//! use medledger::core::EnvelopeBuilder;
//! use medledger::store::SqliteStore;
//!
//! async fn example() -> medledger::Result<()> {
//!     let store = SqliteStore::open("reports.db")?;
//!     let engine = Engine::new(store, EngineConfig::default());
//!
//!     let envelope = EnvelopeBuilder::new("R-2025-0001", "LAB-01", "PAT-123")
//!         .key_for("PAT-123", b"wrapped".to_vec())
//!         .ciphertext(b"...".to_vec())
//!         .signature(b"lab-sig".to_vec())
//!         .build();
//!     let v1 = engine.emit(EmitRequest::new("LAB-01", envelope)).await?;
//!
//!     engine
//!         .share(&v1, &"PAT-123".into(), &"HOSP-01".into(), None)
//!         .await?;
//!     let request = engine
//!         .open(&v1, &"HOSP-01".into(), &"LAB-01".into())
//!         .await?;
//!     # let _ = request;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `medledger::core` - Identifiers, envelopes, ledger records
//! - `medledger::access` - Chain resolution and access replay
//! - `medledger::store` - Storage abstraction, memory and SQLite backends

pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod locks;
pub mod metrics;

// Re-export component crates
pub use medledger_access as access;
pub use medledger_core as core;
pub use medledger_store as store;

// Re-export main types for convenience
pub use audit::{EnvelopeSummary, GrantRecord, ReportState, VersionView};
pub use config::EngineConfig;
pub use engine::{EmitRequest, Engine, ShareReceipt, UnshareReceipt};
pub use error::{EngineError, ErrorReport, Remediation, Result};
pub use locks::ChainLocks;
pub use metrics::{LatencyStats, MetricsReport, SizeStats, VersionSize};

// Re-export commonly used component types
pub use medledger_access::{AccessDenial, DecryptionRequest, ReportStatus, Role, RoleDirectory, SharedWith};
pub use medledger_core::{
    ActorId, EntryId, Envelope, EnvelopeBuilder, EnvelopeMetadata, ReportId, VersionId,
};
