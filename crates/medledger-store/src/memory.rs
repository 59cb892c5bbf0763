//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use medledger_core::{
    ChainLedger, Envelope, GrantEntry, HardRevocation, ReportId, SoftRevocation, VersionId,
    VersionLink,
};

use crate::error::{Result, StoreError};
use crate::traits::{InsertResult, Store};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock; every
/// write holds the single write guard for its whole append, so readers see
/// either all of it or none of it.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Chains indexed by report id.
    chains: HashMap<ReportId, ChainLedger>,

    /// Chain creation order.
    chain_order: Vec<ReportId>,

    /// Version index: version id -> owning chain.
    versions: HashMap<VersionId, ReportId>,

    /// Envelope insertion order across all chains.
    envelope_order: Vec<VersionId>,
}

impl MemoryStoreInner {
    fn chain_mut(&mut self, report_id: &ReportId) -> Result<&mut ChainLedger> {
        self.chains
            .get_mut(report_id)
            .ok_or_else(|| StoreError::ChainNotFound(report_id.to_string()))
    }

    fn seq_taken(chain: &ChainLedger, seq: u64) -> bool {
        chain.grants.iter().any(|g| g.seq == seq)
            || chain.soft_revocations.iter().any(|r| r.seq == seq)
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_chain(&self, envelope: &Envelope) -> Result<InsertResult> {
        let mut inner = self.write()?;

        let version_id = envelope.version_id.clone();
        if inner.versions.contains_key(&version_id) {
            return Ok(InsertResult::AlreadyExists);
        }

        let chain = ChainLedger::genesis(envelope.clone());
        let report_id = chain.report_id.clone();
        inner.versions.insert(version_id.clone(), report_id.clone());
        inner.envelope_order.push(version_id);
        inner.chain_order.push(report_id.clone());
        inner.chains.insert(report_id, chain);

        Ok(InsertResult::Inserted)
    }

    async fn append_version(
        &self,
        envelope: &Envelope,
        link: &VersionLink,
    ) -> Result<InsertResult> {
        let mut inner = self.write()?;

        if inner.versions.contains_key(&envelope.version_id) {
            return Ok(InsertResult::AlreadyExists);
        }

        let chain = inner.chain_mut(&link.report_id)?;
        chain.envelopes.push(envelope.clone());
        chain.links.push(link.clone());
        chain.current_pointer = link.new.clone();

        inner
            .versions
            .insert(envelope.version_id.clone(), link.report_id.clone());
        inner.envelope_order.push(envelope.version_id.clone());

        Ok(InsertResult::Inserted)
    }

    async fn mark_hard_revoked(&self, revocation: &HardRevocation) -> Result<InsertResult> {
        let mut inner = self.write()?;
        let chain = inner.chain_mut(&revocation.report_id)?;

        if chain.hard_revocation.is_some() {
            return Ok(InsertResult::AlreadyExists);
        }
        chain.hard_revocation = Some(revocation.clone());

        Ok(InsertResult::Inserted)
    }

    async fn append_grant(
        &self,
        report_id: &ReportId,
        grant: &GrantEntry,
    ) -> Result<InsertResult> {
        let mut inner = self.write()?;
        let chain = inner.chain_mut(report_id)?;

        if MemoryStoreInner::seq_taken(chain, grant.seq) {
            return Ok(InsertResult::AlreadyExists);
        }
        let at = chain.grants.partition_point(|g| g.seq < grant.seq);
        chain.grants.insert(at, grant.clone());

        Ok(InsertResult::Inserted)
    }

    async fn append_soft_revocation(
        &self,
        report_id: &ReportId,
        revocation: &SoftRevocation,
    ) -> Result<InsertResult> {
        let mut inner = self.write()?;
        let chain = inner.chain_mut(report_id)?;

        if MemoryStoreInner::seq_taken(chain, revocation.seq) {
            return Ok(InsertResult::AlreadyExists);
        }
        let at = chain
            .soft_revocations
            .partition_point(|r| r.seq < revocation.seq);
        chain.soft_revocations.insert(at, revocation.clone());

        Ok(InsertResult::Inserted)
    }

    async fn get_envelope(&self, version_id: &VersionId) -> Result<Option<Envelope>> {
        let inner = self.read()?;
        Ok(inner
            .versions
            .get(version_id)
            .and_then(|report_id| inner.chains.get(report_id))
            .and_then(|chain| chain.envelope(version_id))
            .cloned())
    }

    async fn chain_of(&self, version_id: &VersionId) -> Result<Option<ReportId>> {
        let inner = self.read()?;
        Ok(inner.versions.get(version_id).cloned())
    }

    async fn load_chain(&self, report_id: &ReportId) -> Result<Option<ChainLedger>> {
        let inner = self.read()?;
        Ok(inner.chains.get(report_id).cloned())
    }

    async fn list_envelopes(&self) -> Result<Vec<Envelope>> {
        let inner = self.read()?;
        let envelopes = inner
            .envelope_order
            .iter()
            .filter_map(|v| {
                let report_id = inner.versions.get(v)?;
                inner.chains.get(report_id)?.envelope(v).cloned()
            })
            .collect();
        Ok(envelopes)
    }

    async fn list_chains(&self) -> Result<Vec<ReportId>> {
        let inner = self.read()?;
        Ok(inner.chain_order.clone())
    }

    async fn set_current_pointer(&self, report_id: &ReportId, current: &VersionId) -> Result<()> {
        let mut inner = self.write()?;
        let chain = inner.chain_mut(report_id)?;
        if !chain.contains(current) {
            return Err(StoreError::InvalidData(format!(
                "version {current} does not belong to chain {report_id}"
            )));
        }
        chain.current_pointer = current.clone();
        Ok(())
    }
}
