//! Store trait: the abstract interface for ledger persistence.
//!
//! The engine only ever talks to storage through this trait. Implementations
//! include SQLite (primary) and in-memory (for tests).

use async_trait::async_trait;

use medledger_core::{
    ChainLedger, Envelope, GrantEntry, HardRevocation, ReportId, SoftRevocation, VersionId,
    VersionLink,
};

use crate::error::Result;

/// Result of appending a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// The record was appended.
    Inserted,
    /// A record with the same key already exists. Nothing was written.
    AlreadyExists,
}

impl InsertResult {
    pub fn is_inserted(self) -> bool {
        matches!(self, InsertResult::Inserted)
    }
}

/// The Store trait: async interface for ledger persistence.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, blocking work runs on `spawn_blocking`.
///
/// # Design Notes
///
/// - **Append-only**: records are inserted, never updated or deleted. The one
///   mutable value is the cached current pointer of each chain.
/// - **Atomic appends**: every method writes all of its rows or none.
/// - **Snapshot reads**: [`Store::load_chain`] returns every record of a chain
///   as of one instant. A concurrent [`Store::append_version`] is either fully
///   visible or not at all.
/// - **No policy**: the store checks key uniqueness only. Ownership, status
///   and ordering rules are enforced by the caller before appending.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Lab records
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a chain from its origin envelope.
    ///
    /// Returns `AlreadyExists` if any chain holds a version with this id.
    async fn insert_chain(&self, envelope: &Envelope) -> Result<InsertResult>;

    /// Append a new version, its supersession link, and move the chain's
    /// current pointer to it, in one write.
    ///
    /// Returns `AlreadyExists` if the new version id is taken.
    async fn append_version(&self, envelope: &Envelope, link: &VersionLink)
        -> Result<InsertResult>;

    /// Record the chain's hard revocation.
    ///
    /// Returns `AlreadyExists` if the chain is already revoked.
    async fn mark_hard_revoked(&self, revocation: &HardRevocation) -> Result<InsertResult>;

    // ─────────────────────────────────────────────────────────────────────────
    // Patient records
    // ─────────────────────────────────────────────────────────────────────────

    /// Append a grant to the chain's sharing log.
    ///
    /// Returns `AlreadyExists` if the `seq` is taken.
    async fn append_grant(&self, report_id: &ReportId, grant: &GrantEntry)
        -> Result<InsertResult>;

    /// Append a soft revocation to the chain's sharing log.
    ///
    /// Returns `AlreadyExists` if the `seq` is taken.
    async fn append_soft_revocation(
        &self,
        report_id: &ReportId,
        revocation: &SoftRevocation,
    ) -> Result<InsertResult>;

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Get an envelope by version id.
    async fn get_envelope(&self, version_id: &VersionId) -> Result<Option<Envelope>>;

    /// The chain a version belongs to.
    async fn chain_of(&self, version_id: &VersionId) -> Result<Option<ReportId>>;

    /// Every record of one chain, read in a single snapshot.
    async fn load_chain(&self, report_id: &ReportId) -> Result<Option<ChainLedger>>;

    /// Every envelope, in insertion order.
    async fn list_envelopes(&self) -> Result<Vec<Envelope>>;

    /// Every chain id, in creation order.
    async fn list_chains(&self) -> Result<Vec<ReportId>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Maintenance
    // ─────────────────────────────────────────────────────────────────────────

    /// Overwrite the cached current pointer of a chain.
    ///
    /// Only used to repair a pointer that disagrees with the replayed links.
    async fn set_current_pointer(&self, report_id: &ReportId, current: &VersionId) -> Result<()>;
}

/// Extension trait for common store patterns.
pub trait StoreExt: Store {
    /// Load the chain that `version_id` belongs to.
    ///
    /// The version-to-chain mapping never changes once written, so the
    /// two reads cannot observe a torn state.
    fn load_chain_of(
        &self,
        version_id: &VersionId,
    ) -> impl std::future::Future<Output = Result<Option<ChainLedger>>> + Send;
}

impl<S: Store + ?Sized> StoreExt for S {
    async fn load_chain_of(&self, version_id: &VersionId) -> Result<Option<ChainLedger>> {
        match self.chain_of(version_id).await? {
            Some(report_id) => self.load_chain(&report_id).await,
            None => Ok(None),
        }
    }
}
