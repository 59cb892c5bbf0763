//! Version chain and status resolution.
//!
//! A chain starts at its origin version and grows by lab updates, each of
//! which links the then-current version to a new one. Because an update may
//! only target the current version, every version has at most one
//! successor and the walk forward is deterministic.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use medledger_core::{ChainLedger, ReportId, VersionId};

use crate::error::{AccessError, Result};

/// Lifecycle status of a report version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    /// Current and not hard-revoked.
    Valid,
    /// Superseded by a newer version.
    Updated,
    /// The chain was hard-revoked. Terminal; overrides `Updated`.
    Revoked,
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportStatus::Valid => f.write_str("VALID"),
            ReportStatus::Updated => f.write_str("UPDATED"),
            ReportStatus::Revoked => f.write_str("REVOKED"),
        }
    }
}

/// Successor index over one chain's version links.
#[derive(Debug)]
pub struct VersionChain<'a> {
    ledger: &'a ChainLedger,
    successor: HashMap<&'a VersionId, &'a VersionId>,
}

impl<'a> VersionChain<'a> {
    /// Index the links of `ledger`.
    ///
    /// # Panics
    ///
    /// Panics if a version has two successors. That can only happen if the
    /// ledger was written around the engine, and resolving it to either
    /// branch would silently pick a winner.
    pub fn from_ledger(ledger: &'a ChainLedger) -> Self {
        let mut successor = HashMap::with_capacity(ledger.links.len());
        for link in &ledger.links {
            if let Some(existing) = successor.insert(&link.old, &link.new) {
                tracing::error!(
                    report = %ledger.report_id,
                    version = %link.old,
                    first = %existing,
                    second = %link.new,
                    "version has two successors"
                );
                panic!(
                    "ledger corruption in chain {}: version {} superseded by both {} and {}",
                    ledger.report_id, link.old, existing, link.new
                );
            }
        }
        Self { ledger, successor }
    }

    pub fn report_id(&self) -> &ReportId {
        &self.ledger.report_id
    }

    /// Walk forward from `from` to the version nothing supersedes.
    ///
    /// # Panics
    ///
    /// Panics if the links form a cycle.
    pub fn resolve_current(&self, from: &VersionId) -> Result<VersionId> {
        self.walk(from).map(|path| path.last().cloned().unwrap_or_else(|| from.clone()))
    }

    /// The chain's current version.
    pub fn current(&self) -> VersionId {
        let origin = self.ledger.report_id.as_version();
        self.walk_unchecked(&origin)
            .last()
            .cloned()
            .unwrap_or(origin)
    }

    /// The versions that superseded `from`, oldest first.
    pub fn updated_chain(&self, from: &VersionId) -> Result<Vec<VersionId>> {
        self.walk(from)
    }

    /// Status of `from`: `Revoked` if the chain is hard-revoked, `Updated` if
    /// a newer version exists, `Valid` otherwise.
    pub fn resolve_status(&self, from: &VersionId) -> Result<ReportStatus> {
        let current = self.resolve_current(from)?;
        if self.ledger.is_hard_revoked() {
            Ok(ReportStatus::Revoked)
        } else if &current != from {
            Ok(ReportStatus::Updated)
        } else {
            Ok(ReportStatus::Valid)
        }
    }

    /// Whether `version` is the chain's current version.
    pub fn is_current(&self, version: &VersionId) -> bool {
        self.ledger.contains(version) && !self.successor.contains_key(version)
    }

    /// The replayed current version, if the cached pointer disagrees with it.
    pub fn pointer_drift(&self) -> Option<VersionId> {
        let replayed = self.current();
        (replayed != self.ledger.current_pointer).then_some(replayed)
    }

    fn walk(&self, from: &VersionId) -> Result<Vec<VersionId>> {
        if !self.ledger.contains(from) {
            return Err(AccessError::NotFound(format!(
                "version {from} in report {}",
                self.ledger.report_id
            )));
        }
        Ok(self.walk_unchecked(from))
    }

    fn walk_unchecked(&self, from: &VersionId) -> Vec<VersionId> {
        let mut path = Vec::new();
        let mut seen: HashSet<&VersionId> = HashSet::new();
        let mut cursor = from;
        seen.insert(cursor);

        while let Some(&next) = self.successor.get(cursor) {
            if !seen.insert(next) {
                tracing::error!(
                    report = %self.ledger.report_id,
                    version = %next,
                    "version links form a cycle"
                );
                panic!(
                    "ledger corruption in chain {}: version links cycle through {}",
                    self.ledger.report_id, next
                );
            }
            path.push(next.clone());
            cursor = next;
        }

        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medledger_core::{ActorId, EnvelopeBuilder, HardRevocation, VersionLink};

    fn chain_of(versions: &[&str]) -> ChainLedger {
        let mut ledger =
            ChainLedger::genesis(EnvelopeBuilder::new(versions[0], "LAB-01", "PAT-123").build());
        for pair in versions.windows(2) {
            ledger
                .envelopes
                .push(EnvelopeBuilder::new(pair[1], "LAB-01", "PAT-123").build());
            ledger.links.push(VersionLink {
                report_id: ledger.report_id.clone(),
                old: VersionId::from(pair[0]),
                new: VersionId::from(pair[1]),
                lab_id: ActorId::from("LAB-01"),
                at: 0,
            });
        }
        ledger.current_pointer = VersionId::from(*versions.last().unwrap());
        ledger
    }

    #[test]
    fn test_single_version_is_valid_and_current() {
        let ledger = chain_of(&["R-1"]);
        let chain = VersionChain::from_ledger(&ledger);
        let r1 = VersionId::from("R-1");

        assert_eq!(chain.resolve_current(&r1).unwrap(), r1);
        assert_eq!(chain.resolve_status(&r1).unwrap(), ReportStatus::Valid);
        assert!(chain.is_current(&r1));
        assert!(chain.updated_chain(&r1).unwrap().is_empty());
    }

    #[test]
    fn test_walk_reaches_latest_from_any_version() {
        let ledger = chain_of(&["R-1", "R-2", "R-3"]);
        let chain = VersionChain::from_ledger(&ledger);

        for v in ["R-1", "R-2", "R-3"] {
            assert_eq!(
                chain.resolve_current(&VersionId::from(v)).unwrap(),
                VersionId::from("R-3")
            );
        }
        assert_eq!(
            chain.updated_chain(&VersionId::from("R-1")).unwrap(),
            vec![VersionId::from("R-2"), VersionId::from("R-3")]
        );
        assert_eq!(
            chain.resolve_status(&VersionId::from("R-2")).unwrap(),
            ReportStatus::Updated
        );
        assert_eq!(
            chain.resolve_status(&VersionId::from("R-3")).unwrap(),
            ReportStatus::Valid
        );
    }

    #[test]
    fn test_revoked_overrides_updated() {
        let mut ledger = chain_of(&["R-1", "R-2"]);
        ledger.hard_revocation = Some(HardRevocation {
            report_id: ledger.report_id.clone(),
            lab_id: ActorId::from("LAB-01"),
            reason: None,
            at: 0,
        });
        let chain = VersionChain::from_ledger(&ledger);

        assert_eq!(
            chain.resolve_status(&VersionId::from("R-1")).unwrap(),
            ReportStatus::Revoked
        );
        assert_eq!(
            chain.resolve_status(&VersionId::from("R-2")).unwrap(),
            ReportStatus::Revoked
        );
    }

    #[test]
    fn test_unknown_version_is_not_found() {
        let ledger = chain_of(&["R-1"]);
        let chain = VersionChain::from_ledger(&ledger);
        assert!(matches!(
            chain.resolve_current(&VersionId::from("R-9")),
            Err(AccessError::NotFound(_))
        ));
    }

    #[test]
    fn test_pointer_drift_detected() {
        let mut ledger = chain_of(&["R-1", "R-2"]);
        let chain = VersionChain::from_ledger(&ledger);
        assert_eq!(chain.pointer_drift(), None);

        ledger.current_pointer = VersionId::from("R-1");
        let chain = VersionChain::from_ledger(&ledger);
        assert_eq!(chain.pointer_drift(), Some(VersionId::from("R-2")));
    }

    #[test]
    #[should_panic(expected = "cycle")]
    fn test_cycle_aborts() {
        let mut ledger = chain_of(&["R-1", "R-2"]);
        ledger.links.push(VersionLink {
            report_id: ledger.report_id.clone(),
            old: VersionId::from("R-2"),
            new: VersionId::from("R-1"),
            lab_id: ActorId::from("LAB-01"),
            at: 0,
        });
        let chain = VersionChain::from_ledger(&ledger);
        let _ = chain.resolve_current(&VersionId::from("R-1"));
    }

    #[test]
    #[should_panic(expected = "superseded by both")]
    fn test_fork_aborts() {
        let mut ledger = chain_of(&["R-1", "R-2"]);
        ledger
            .envelopes
            .push(EnvelopeBuilder::new("R-3", "LAB-01", "PAT-123").build());
        ledger.links.push(VersionLink {
            report_id: ledger.report_id.clone(),
            old: VersionId::from("R-1"),
            new: VersionId::from("R-3"),
            lab_id: ActorId::from("LAB-01"),
            at: 0,
        });
        let _ = VersionChain::from_ledger(&ledger);
    }
}
