//! # Medledger Core
//!
//! Pure records for the medledger report access engine: identifiers,
//! envelopes, append-only ledger entries, and their canonical encoding.
//!
//! This crate contains no I/O, no storage, no locking. Everything here is
//! either an immutable value or a pure function over one.
//!
//! ## Key Types
//!
//! - [`ReportId`] / [`VersionId`] - A report family and one version inside it
//! - [`ActorId`] - A patient, lab, hospital or doctor identifier
//! - [`Envelope`] - Issuance metadata, ciphertext and recipient key list for one version
//! - [`GrantEntry`], [`SoftRevocation`], [`VersionLink`], [`HardRevocation`] - Ledger records
//! - [`ChainLedger`] - Every record of one chain, as read in a single snapshot
//!
//! ## Canonicalization
//!
//! Ledger records and envelope metadata are encoded with deterministic CBOR.
//! See the [`canonical`] module.

pub mod canonical;
pub mod digest;
pub mod envelope;
pub mod error;
pub mod ledger;
pub mod types;
pub mod validation;

pub use canonical::{canonical_entry_bytes, canonical_metadata_bytes};
pub use digest::Blake3Hash;
pub use envelope::{Envelope, EnvelopeBuilder, EnvelopeMetadata};
pub use error::CoreError;
pub use ledger::{
    ChainLedger, EntryKind, GrantEntry, HardRevocation, LedgerRecord, SoftRevocation, VersionLink,
};
pub use types::{ActorId, EntryId, ReportId, VersionId};
pub use validation::{validate_envelope, validate_id};
