//! # Medledger Testkit
//!
//! Testing utilities for medledger.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Canonical bytes of ledger records, pinned for cross-implementation checks
//! - **Generators**: Proptest strategies for identifiers and operation sequences
//! - **Fixtures**: A report cast (lab, patient, consumers) and envelope builders
//!
//! ## Golden Vectors
//!
//! ```rust
//! use medledger_testkit::vectors::verify_all_vectors;
//!
//! for (name, matches, actual) in verify_all_vectors() {
//!     assert!(matches, "{name}: {actual}");
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use medledger_testkit::{apply_op, memory_engine, ops, ReportFixture};
//!
//! proptest! {
//!     #[test]
//!     fn patient_never_has_access(ops in ops(&ReportFixture::new(), 24)) {
//!         // emit, apply every op, check effective access
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{memory_engine, multi_report_fixtures, ReportFixture, ISSUED_AT};
pub use generators::{apply_op, op, ops, Op};
pub use vectors::{all_vectors, compute_all_vectors, verify_all_vectors, GoldenVector, VectorInput};
