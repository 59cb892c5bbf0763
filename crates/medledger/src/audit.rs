//! Read-only audit surface.
//!
//! Everything here is recomputed from a chain snapshot on each call and
//! serializes with camelCase field names. Role grouping is for display only;
//! nothing in this module feeds an access decision.

use std::collections::BTreeSet;

use serde::Serialize;

use medledger_access::{AccessState, ReportStatus, SharedWith, VersionChain};
use medledger_core::{
    ActorId, ChainLedger, Envelope, EnvelopeMetadata, GrantEntry, LedgerRecord, ReportId,
    VersionId,
};
use medledger_store::Store;

use crate::engine::Engine;
use crate::error::Result;

/// One stored envelope, without its ciphertext or key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeSummary {
    pub version_id: VersionId,
    pub report_id: ReportId,
    pub metadata: EnvelopeMetadata,
    pub has_sig: bool,
    /// Recipients the lab issued keys to.
    pub ek_for: Vec<ActorId>,
    pub cipher_len: usize,
    /// Hex Blake3 of the ciphertext.
    pub cipher_digest: String,
}

impl EnvelopeSummary {
    fn new(report_id: ReportId, envelope: &Envelope) -> Self {
        Self {
            version_id: envelope.version_id.clone(),
            report_id,
            metadata: envelope.metadata.clone(),
            has_sig: envelope.has_sig(),
            ek_for: envelope.recipients().cloned().collect(),
            cipher_len: envelope.cipher_len(),
            cipher_digest: envelope.cipher_digest().to_hex(),
        }
    }
}

/// Status of one version and where its chain currently points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportState {
    pub report_id: ReportId,
    pub version_id: VersionId,
    pub status: ReportStatus,
    pub current_id: VersionId,
    /// Successors of `version_id`, oldest first.
    pub updated_chain: Vec<VersionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_reason: Option<String>,
}

/// One grant as it appears in the sharing log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRecord {
    pub seq: u64,
    pub version_id: VersionId,
    pub from: ActorId,
    pub to: ActorId,
    pub at: i64,
    pub entry_id: String,
}

impl From<&GrantEntry> for GrantRecord {
    fn from(grant: &GrantEntry) -> Self {
        Self {
            seq: grant.seq,
            version_id: grant.version_id.clone(),
            from: grant.from.clone(),
            to: grant.to.clone(),
            at: grant.at,
            entry_id: grant.entry_id().to_hex(),
        }
    }
}

/// Everything the ledger says about one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionView {
    pub version_id: VersionId,
    pub report_id: ReportId,
    pub status: ReportStatus,
    pub current_id: VersionId,
    pub effective_access: BTreeSet<ActorId>,
    pub revoked_for: BTreeSet<ActorId>,
    pub grants: Vec<GrantRecord>,
}

fn view_of(chain: &VersionChain<'_>, ledger: &ChainLedger, envelope: &Envelope) -> Result<VersionView> {
    let version = &envelope.version_id;
    let state = AccessState::from_ledger(ledger, version)?;
    Ok(VersionView {
        version_id: version.clone(),
        report_id: ledger.report_id.clone(),
        status: chain.resolve_status(version)?,
        current_id: chain.current(),
        effective_access: state.effective_access(),
        revoked_for: state.soft_revoked(),
        grants: state.grant_history().iter().map(|g| GrantRecord::from(*g)).collect(),
    })
}

impl<S: Store> Engine<S> {
    /// Every stored envelope, in issuance order.
    pub async fn list_envelopes(&self) -> Result<Vec<EnvelopeSummary>> {
        let envelopes = self.store().list_envelopes().await?;
        let mut summaries = Vec::with_capacity(envelopes.len());
        for envelope in &envelopes {
            let report_id = match self.store().chain_of(&envelope.version_id).await? {
                Some(report_id) => report_id,
                None => envelope.version_id.to_report_id(),
            };
            summaries.push(EnvelopeSummary::new(report_id, envelope));
        }
        tracing::debug!(count = summaries.len(), "envelopes listed");
        Ok(summaries)
    }

    /// Status, current id and successors of one version.
    pub async fn report_state(&self, version: &VersionId) -> Result<ReportState> {
        let ledger = self.snapshot_of(version).await?;
        let chain = VersionChain::from_ledger(&ledger);
        Ok(ReportState {
            report_id: ledger.report_id.clone(),
            version_id: version.clone(),
            status: chain.resolve_status(version)?,
            current_id: chain.current(),
            updated_chain: chain.updated_chain(version)?,
            revoked_reason: ledger
                .hard_revocation
                .as_ref()
                .and_then(|r| r.reason.clone()),
        })
    }

    /// Grants recorded against the current version of `version`'s chain.
    pub async fn grant_history(&self, version: &VersionId) -> Result<Vec<GrantRecord>> {
        let ledger = self.snapshot_of(version).await?;
        let current = VersionChain::from_ledger(&ledger).current();
        let state = AccessState::from_ledger(&ledger, &current)?;
        Ok(state.grant_history().iter().map(|g| GrantRecord::from(*g)).collect())
    }

    /// Recipients currently soft-revoked on the current version.
    pub async fn revoked_for(&self, version: &VersionId) -> Result<BTreeSet<ActorId>> {
        let ledger = self.snapshot_of(version).await?;
        let current = VersionChain::from_ledger(&ledger).current();
        Ok(AccessState::from_ledger(&ledger, &current)?.soft_revoked())
    }

    /// One view per known version, chains in creation order.
    pub async fn ledger_view(&self) -> Result<Vec<VersionView>> {
        let mut views = Vec::new();
        for report_id in self.store().list_chains().await? {
            let ledger = self.load(&report_id).await?;
            let chain = VersionChain::from_ledger(&ledger);
            for envelope in &ledger.envelopes {
                views.push(view_of(&chain, &ledger, envelope)?);
            }
        }
        Ok(views)
    }

    /// Effective access of the current version, grouped by role.
    pub async fn shared_with_by_role(&self, version: &VersionId) -> Result<SharedWith> {
        let ledger = self.snapshot_of(version).await?;
        let current = VersionChain::from_ledger(&ledger).current();
        let access = AccessState::from_ledger(&ledger, &current)?.effective_access();
        Ok(self.roles.group(&access))
    }
}
