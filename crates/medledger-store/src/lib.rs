//! # Medledger Store
//!
//! Storage abstraction for the medledger report ledger. Provides a
//! trait-based interface for ledger persistence with SQLite and in-memory
//! implementations.
//!
//! ## Overview
//!
//! The store abstracts ledger storage behind the [`Store`] trait, allowing
//! the engine to be storage-agnostic. The primary implementation is
//! [`SqliteStore`], with [`MemoryStore`] for testing.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`InsertResult`] - Result of appending a record
//!
//! ## Usage
//!
//! ```rust,no_run
//! use medledger_store::{SqliteStore, Store, InsertResult};
//! use medledger_core::EnvelopeBuilder;
//!
//! async fn example() -> medledger_store::Result<()> {
//!     // Open a SQLite database
//!     let store = SqliteStore::open("ledger.db")?;
//!
//!     // Or use an in-memory database for testing
//!     let store = SqliteStore::open_memory()?;
//!
//!     let envelope = EnvelopeBuilder::new("R-2025-0001", "LAB-01", "PAT-123").build();
//!     assert_eq!(store.insert_chain(&envelope).await?, InsertResult::Inserted);
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Append-only**: grants, revocations and links are never updated or deleted
//! - **Atomic appends**: one transaction (or one write guard) per method
//! - **Snapshot reads**: a chain is always read whole, never piecemeal
//! - **Cached pointer**: `current_id` is a cache over the version links

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{InsertResult, Store, StoreExt};
