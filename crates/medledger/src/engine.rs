//! The Engine: lab, patient and consumer operations over report chains.
//!
//! Every mutation follows the same shape: resolve the chain, take the
//! chain's critical section, reload a snapshot, check preconditions on that
//! snapshot, and commit exactly one store write. A rejected request writes
//! nothing. Reads skip the critical section and work on one snapshot.

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;

use medledger_access::{
    self as access, plan_grant, plan_hard_revoke, plan_soft_revoke, plan_update,
    DecryptionRequest, ReportStatus, RoleDirectory, VersionChain,
};
use medledger_core::{
    validate_envelope, validate_id, ActorId, ChainLedger, EntryId, Envelope, LedgerRecord,
    ReportId, VersionId,
};
use medledger_store::{InsertResult, Store, StoreExt};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::locks::ChainLocks;
use crate::metrics::OperationTimings;

/// A lab's request to issue the first version of a report.
#[derive(Debug, Clone)]
pub struct EmitRequest {
    /// The lab making the request. Must match the envelope's lab.
    pub lab: ActorId,
    pub envelope: Envelope,
}

impl EmitRequest {
    pub fn new(lab: impl Into<ActorId>, envelope: Envelope) -> Self {
        Self {
            lab: lab.into(),
            envelope,
        }
    }
}

/// Outcome of a patient share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareReceipt {
    /// The version the grant was recorded against.
    pub version_id: VersionId,
    /// The appended grant, if one was appended.
    pub entry_id: Option<EntryId>,
    /// Whether the recipient gained access.
    pub access_changed: bool,
}

/// Outcome of a patient unshare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnshareReceipt {
    /// The version the revocation was recorded against.
    pub version_id: VersionId,
    /// The appended revocation, or `None` if the recipient was already revoked.
    pub entry_id: Option<EntryId>,
}

impl UnshareReceipt {
    pub fn is_noop(&self) -> bool {
        self.entry_id.is_none()
    }
}

/// The report versioning and access-resolution engine.
///
/// Cheap to share: wrap it in an `Arc` and call it from any number of tasks.
pub struct Engine<S: Store> {
    /// The storage backend.
    store: Arc<S>,
    /// Configuration.
    config: EngineConfig,
    /// One critical section per chain.
    locks: ChainLocks,
    /// Latency samples per operation.
    timings: OperationTimings,
    /// Display grouping for the audit surface.
    pub(crate) roles: RoleDirectory,
}

impl<S: Store> Engine<S> {
    /// Create a new engine over `store`.
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self {
            store: Arc::new(store),
            config,
            locks: ChainLocks::new(),
            timings: OperationTimings::new(),
            roles: RoleDirectory::new(),
        }
    }

    /// Use `roles` to group recipients on the audit surface.
    pub fn with_roles(mut self, roles: RoleDirectory) -> Self {
        self.roles = roles;
        self
    }

    /// Get the store reference.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn timings(&self) -> &OperationTimings {
        &self.timings
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lab Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Issue the first version of a new report chain.
    pub async fn emit(&self, request: EmitRequest) -> Result<VersionId> {
        let _timer = self.timings.start("emit");
        let EmitRequest { lab, envelope } = request;
        validate_id("lab id", lab.as_str())?;
        validate_envelope(&envelope)?;

        if envelope.lab_id() != &lab {
            tracing::warn!(lab = %lab, version = %envelope.version_id, "emit for another lab rejected");
            return Err(EngineError::Forbidden {
                actor: lab,
                reason: format!("envelope names lab {}", envelope.lab_id()),
            });
        }

        let report_id = envelope.version_id.to_report_id();
        let _guard = self.locks.lock(&report_id).await;

        match self.store.insert_chain(&envelope).await? {
            InsertResult::Inserted => {
                tracing::info!(
                    report = %report_id,
                    lab = %lab,
                    patient = %envelope.patient_ref(),
                    recipients = envelope.ek_for.len(),
                    "report issued"
                );
                Ok(envelope.version_id)
            }
            InsertResult::AlreadyExists => {
                tracing::warn!(version = %envelope.version_id, "emit of existing version rejected");
                Err(EngineError::DuplicateVersion(envelope.version_id))
            }
        }
    }

    /// Supersede the chain's current version `old` with `new_envelope`.
    pub async fn update(
        &self,
        old: &VersionId,
        lab: &ActorId,
        new_envelope: Envelope,
    ) -> Result<VersionId> {
        let _timer = self.timings.start("update");
        validate_envelope(&new_envelope)?;

        let report_id = self.chain_of(old).await?;
        let _guard = self.locks.lock(&report_id).await;
        let ledger = self.load(&report_id).await?;

        let link = plan_update(&ledger, old, lab, &new_envelope, now_millis())
            .map_err(|e| rejected("update", &report_id, e))?;

        match self.store.append_version(&new_envelope, &link).await? {
            InsertResult::Inserted => {
                tracing::info!(
                    report = %report_id,
                    old = %link.old,
                    new = %link.new,
                    "report updated"
                );
                Ok(link.new)
            }
            InsertResult::AlreadyExists => Err(EngineError::DuplicateVersion(link.new)),
        }
    }

    /// Hard-revoke the chain `report_or_version` belongs to. Terminal.
    pub async fn revoke(
        &self,
        report_or_version: &VersionId,
        lab: &ActorId,
        reason: Option<&str>,
    ) -> Result<()> {
        let _timer = self.timings.start("revoke");
        let report_id = self.chain_of(report_or_version).await?;
        let _guard = self.locks.lock(&report_id).await;
        let ledger = self.load(&report_id).await?;

        let revocation = plan_hard_revoke(&ledger, lab, reason, now_millis())
            .map_err(|e| rejected("revoke", &report_id, e))?;

        match self.store.mark_hard_revoked(&revocation).await? {
            InsertResult::Inserted => {
                tracing::info!(
                    report = %report_id,
                    lab = %lab,
                    reason = revocation.reason.as_deref().unwrap_or(""),
                    "report revoked"
                );
                Ok(())
            }
            InsertResult::AlreadyExists => Err(EngineError::InvalidTransition(format!(
                "report {report_id} is already revoked"
            ))),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Patient Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Share a report with `recipient`.
    ///
    /// `wrapped_key` is the content key re-wrapped for the recipient, passed
    /// through to the decryption collaborator untouched.
    pub async fn share(
        &self,
        version: &VersionId,
        patient: &ActorId,
        recipient: &ActorId,
        wrapped_key: Option<Bytes>,
    ) -> Result<ShareReceipt> {
        let _timer = self.timings.start("share");
        validate_id("recipient", recipient.as_str())?;

        let report_id = self.chain_of(version).await?;
        let _guard = self.locks.lock(&report_id).await;
        let ledger = self.load(&report_id).await?;

        let plan = plan_grant(
            &ledger,
            version,
            patient,
            recipient,
            wrapped_key,
            now_millis(),
            self.config.share_policy(),
        )
        .map_err(|e| rejected("share", &report_id, e))?;

        let entry_id = match plan.entry {
            Some(grant) => {
                let inserted = self.store.append_grant(&report_id, &grant).await?;
                expect_inserted(inserted, &report_id, grant.seq)?;
                Some(grant.entry_id())
            }
            None => None,
        };

        if plan.changes_access {
            tracing::info!(
                report = %report_id,
                version = %plan.version_id,
                recipient = %recipient,
                "report shared"
            );
        } else {
            tracing::debug!(
                report = %report_id,
                version = %plan.version_id,
                recipient = %recipient,
                recorded = entry_id.is_some(),
                "share left access unchanged"
            );
        }

        Ok(ShareReceipt {
            version_id: plan.version_id,
            entry_id,
            access_changed: plan.changes_access,
        })
    }

    /// Withdraw `recipient`'s access.
    pub async fn unshare(
        &self,
        version: &VersionId,
        patient: &ActorId,
        recipient: &ActorId,
    ) -> Result<UnshareReceipt> {
        let _timer = self.timings.start("unshare");
        validate_id("recipient", recipient.as_str())?;

        let report_id = self.chain_of(version).await?;
        let _guard = self.locks.lock(&report_id).await;
        let ledger = self.load(&report_id).await?;

        let plan = plan_soft_revoke(
            &ledger,
            version,
            patient,
            recipient,
            now_millis(),
            self.config.share_policy(),
        )
        .map_err(|e| rejected("unshare", &report_id, e))?;

        let entry_id = match plan.entry {
            Some(revocation) => {
                let inserted = self
                    .store
                    .append_soft_revocation(&report_id, &revocation)
                    .await?;
                expect_inserted(inserted, &report_id, revocation.seq)?;
                tracing::info!(
                    report = %report_id,
                    version = %plan.version_id,
                    recipient = %recipient,
                    "share withdrawn"
                );
                Some(revocation.entry_id())
            }
            None => {
                tracing::debug!(
                    report = %report_id,
                    recipient = %recipient,
                    "recipient already revoked"
                );
                None
            }
        };

        Ok(UnshareReceipt {
            version_id: plan.version_id,
            entry_id,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Consumer Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Decide whether `requester` may open `report`. Returns the current
    /// version whose access rules granted the open.
    pub async fn authorize_open(
        &self,
        report: &VersionId,
        requester: &ActorId,
        claimed_lab: &ActorId,
    ) -> Result<VersionId> {
        let _timer = self.timings.start("authorize_open");
        let ledger = self.snapshot_of(report).await?;
        match access::authorize_open(&ledger, report, requester, claimed_lab) {
            Ok(current) => {
                tracing::debug!(
                    report = %ledger.report_id,
                    version = %current,
                    requester = %requester,
                    "open authorized"
                );
                Ok(current)
            }
            Err(e) => {
                tracing::warn!(
                    report = %ledger.report_id,
                    requester = %requester,
                    error = %e,
                    "open denied"
                );
                Err(e.into())
            }
        }
    }

    /// Authorize an open and hand back what the decryption collaborator needs.
    pub async fn open(
        &self,
        report: &VersionId,
        requester: &ActorId,
        claimed_lab: &ActorId,
    ) -> Result<DecryptionRequest> {
        let _timer = self.timings.start("open");
        let ledger = self.snapshot_of(report).await?;
        access::prepare_decryption(&ledger, report, requester, claimed_lab).map_err(|e| {
            tracing::warn!(
                report = %ledger.report_id,
                requester = %requester,
                error = %e,
                "open denied"
            );
            EngineError::from(e)
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Query Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// The current version of the chain `version` belongs to.
    pub async fn resolve_current(&self, version: &VersionId) -> Result<VersionId> {
        let _timer = self.timings.start("resolve_current");
        let ledger = self.snapshot_of(version).await?;
        Ok(VersionChain::from_ledger(&ledger).resolve_current(version)?)
    }

    /// Status of one version.
    pub async fn resolve_status(&self, version: &VersionId) -> Result<ReportStatus> {
        let _timer = self.timings.start("resolve_status");
        let ledger = self.snapshot_of(version).await?;
        Ok(VersionChain::from_ledger(&ledger).resolve_status(version)?)
    }

    /// Effective access of one version, as that version's own log says.
    ///
    /// Opens are judged by the current version; see [`Engine::authorize_open`].
    pub async fn effective_access(&self, version: &VersionId) -> Result<BTreeSet<ActorId>> {
        let _timer = self.timings.start("effective_access");
        let ledger = self.snapshot_of(version).await?;
        Ok(access::effective_access(&ledger, version)?)
    }

    /// The stored envelope of one version.
    pub async fn envelope(&self, version: &VersionId) -> Result<Envelope> {
        self.store
            .get_envelope(version)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("version {version}")))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Maintenance
    // ─────────────────────────────────────────────────────────────────────────

    /// Recompute every chain's current pointer from its version links and
    /// repair the ones that drifted. Returns the repaired chains.
    pub async fn rebuild_current_pointers(&self) -> Result<Vec<(ReportId, VersionId)>> {
        let _timer = self.timings.start("rebuild_current_pointers");
        let mut repaired = Vec::new();

        for report_id in self.store.list_chains().await? {
            let _guard = self.locks.lock(&report_id).await;
            let ledger = self.load(&report_id).await?;

            let drift = VersionChain::from_ledger(&ledger).pointer_drift();
            if let Some(current) = drift {
                tracing::warn!(
                    report = %report_id,
                    cached = %ledger.current_pointer,
                    replayed = %current,
                    "repairing current pointer"
                );
                self.store.set_current_pointer(&report_id, &current).await?;
                repaired.push((report_id, current));
            }
        }

        tracing::debug!(repaired = repaired.len(), "current pointers rebuilt");
        Ok(repaired)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Snapshot helpers
    // ─────────────────────────────────────────────────────────────────────────

    async fn chain_of(&self, version: &VersionId) -> Result<ReportId> {
        self.store
            .chain_of(version)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("version {version}")))
    }

    pub(crate) async fn load(&self, report_id: &ReportId) -> Result<ChainLedger> {
        self.store
            .load_chain(report_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("report {report_id}")))
    }

    pub(crate) async fn snapshot_of(&self, version: &VersionId) -> Result<ChainLedger> {
        self.store
            .load_chain_of(version)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("version {version}")))
    }
}

fn rejected(op: &'static str, report_id: &ReportId, err: access::AccessError) -> EngineError {
    tracing::warn!(op, report = %report_id, error = %err, "mutation rejected");
    err.into()
}

/// A sharing-log slot chosen under the chain lock must still be free.
fn expect_inserted(result: InsertResult, report_id: &ReportId, seq: u64) -> Result<()> {
    match result {
        InsertResult::Inserted => Ok(()),
        InsertResult::AlreadyExists => Err(EngineError::InvalidTransition(format!(
            "sharing log position {seq} of report {report_id} was taken by another writer"
        ))),
    }
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
