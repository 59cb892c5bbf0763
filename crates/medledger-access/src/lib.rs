//! # Medledger Access
//!
//! Version chain resolution, grant ledger replay and open authorization.
//!
//! ## Overview
//!
//! Access is never stored as a flag. A chain's status, its current version
//! and the recipients of each version are derived on every read by
//! replaying the append-only records of one [`ChainLedger`] snapshot.
//!
//! ## Key Concepts
//!
//! - **Version chain**: origin version plus update links; only the last link's
//!   target is current
//! - **Hard revocation**: lab-owned, terminal, applies to the whole chain
//! - **Grant / soft revocation**: patient-owned, per version, replayed in `seq`
//!   order; a later grant reinstates a withdrawn recipient
//! - **Effective access**: `(ek_for ∪ granted) \ withdrawn \ {patient}`
//!
//! Requests against a superseded version are judged by the current
//! version's access set.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use medledger_access::{authorize_open, ReportStatus, VersionChain};
//! # fn demo(ledger: &medledger_core::ChainLedger) -> medledger_access::Result<()> {
//! let v = medledger_core::VersionId::from("R-2025-0001");
//! let chain = VersionChain::from_ledger(ledger);
//! if chain.resolve_status(&v)? == ReportStatus::Valid {
//!     let hosp = "HOSP-01".into();
//!     let lab = "LAB-01".into();
//!     let current = authorize_open(ledger, &v, &hosp, &lab)?;
//! #   let _ = current;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! [`ChainLedger`]: medledger_core::ChainLedger

pub mod authorize;
pub mod chain;
pub mod error;
pub mod roles;
pub mod state;
pub mod transition;

pub use authorize::{authorize_open, effective_access, prepare_decryption, DecryptionRequest};
pub use chain::{ReportStatus, VersionChain};
pub use error::{AccessDenial, AccessError, Result};
pub use roles::{Role, RoleDirectory, SharedWith};
pub use state::AccessState;
pub use transition::{
    plan_grant, plan_hard_revoke, plan_soft_revoke, plan_update, GrantPlan, RevokePlan,
    SharePolicy,
};
