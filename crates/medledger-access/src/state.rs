//! Access state computation for one version.
//!
//! The access state is computed by replaying the grant ledger and the soft
//! revocation set of a version in `seq` order, on top of the recipients the
//! lab issued keys to. Nothing here is cached; every read replays.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;

use medledger_core::{ActorId, ChainLedger, Envelope, GrantEntry, VersionId};

use crate::error::{AccessDenial, AccessError, Result};

/// One step of the replay.
enum Event<'a> {
    Grant(&'a GrantEntry),
    Withdraw(&'a ActorId),
}

/// Replayed access state of a single version.
#[derive(Debug)]
pub struct AccessState<'a> {
    envelope: &'a Envelope,

    /// Latest grant per recipient.
    granted: BTreeMap<&'a ActorId, &'a GrantEntry>,

    /// Recipients whose latest sharing event is a withdrawal.
    withdrawn: BTreeSet<&'a ActorId>,

    /// Every grant on this version, in `seq` order.
    history: Vec<&'a GrantEntry>,
}

impl<'a> AccessState<'a> {
    /// Replay the sharing log of `version_id` in `ledger`.
    pub fn from_ledger(ledger: &'a ChainLedger, version_id: &'a VersionId) -> Result<Self> {
        let envelope = ledger.envelope(version_id).ok_or_else(|| {
            AccessError::NotFound(format!("version {version_id} in report {}", ledger.report_id))
        })?;

        let mut events: Vec<(u64, Event<'a>)> = ledger
            .grants_for(version_id)
            .map(|g| (g.seq, Event::Grant(g)))
            .chain(
                ledger
                    .soft_revocations_for(version_id)
                    .map(|r| (r.seq, Event::Withdraw(&r.recipient))),
            )
            .collect();
        events.sort_by_key(|(seq, _)| *seq);

        let mut state = Self {
            envelope,
            granted: BTreeMap::new(),
            withdrawn: BTreeSet::new(),
            history: Vec::new(),
        };
        for (_, event) in events {
            state.apply(event);
        }
        Ok(state)
    }

    fn apply(&mut self, event: Event<'a>) {
        match event {
            Event::Grant(grant) => {
                // A fresh grant reinstates a withdrawn recipient.
                self.withdrawn.remove(&grant.to);
                self.granted.insert(&grant.to, grant);
                self.history.push(grant);
            }
            Event::Withdraw(recipient) => {
                self.withdrawn.insert(recipient);
            }
        }
    }

    pub fn envelope(&self) -> &'a Envelope {
        self.envelope
    }

    /// The patient the version is about. Never part of the effective set.
    pub fn patient(&self) -> &'a ActorId {
        self.envelope.patient_ref()
    }

    /// `(ek_for ∪ granted) \ withdrawn \ {patient}`, in lexicographic order.
    pub fn effective_access(&self) -> BTreeSet<ActorId> {
        self.envelope
            .recipients()
            .chain(self.granted.keys().copied())
            .filter(|a| self.admits(a))
            .cloned()
            .collect()
    }

    /// Whether `requester` is in the effective access set.
    pub fn has_access(&self, requester: &ActorId) -> bool {
        (self.envelope.wrapped_key(requester).is_some() || self.granted.contains_key(requester))
            && self.admits(requester)
    }

    fn admits(&self, actor: &ActorId) -> bool {
        actor != self.patient() && !self.withdrawn.contains(actor)
    }

    /// Why `requester` has no access, or `None` if they have it.
    pub fn denial_for(&self, requester: &ActorId) -> Option<AccessDenial> {
        if self.has_access(requester) {
            None
        } else if self.withdrawn.contains(requester) {
            Some(AccessDenial::Withdrawn)
        } else {
            Some(AccessDenial::NeverGranted)
        }
    }

    /// Recipients currently soft-revoked on this version.
    pub fn soft_revoked(&self) -> BTreeSet<ActorId> {
        self.withdrawn.iter().map(|a| (*a).clone()).collect()
    }

    /// Whether `recipient` is currently soft-revoked.
    pub fn is_withdrawn(&self, recipient: &ActorId) -> bool {
        self.withdrawn.contains(recipient)
    }

    /// Key material for the decryption collaborator.
    ///
    /// The lab-issued key wins; otherwise the key carried by the latest grant.
    pub fn wrapped_key_for(&self, requester: &ActorId) -> Option<&'a Bytes> {
        if !self.has_access(requester) {
            return None;
        }
        let envelope: &'a Envelope = self.envelope;
        envelope.wrapped_key(requester).or_else(|| {
            let grant: &'a GrantEntry = *self.granted.get(requester)?;
            grant.wrapped_key.as_ref()
        })
    }

    /// Every grant on this version, oldest first.
    pub fn grant_history(&self) -> &[&'a GrantEntry] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medledger_core::{EnvelopeBuilder, SoftRevocation};

    const V: &str = "R-2025-0001";

    struct LedgerBuilder {
        ledger: ChainLedger,
    }

    impl LedgerBuilder {
        fn new() -> Self {
            let env = EnvelopeBuilder::new(V, "LAB-01", "PAT-123")
                .key_for("PAT-123", b"k-pat".to_vec())
                .build();
            Self {
                ledger: ChainLedger::genesis(env),
            }
        }

        fn with_lab_key(mut self, recipient: &str) -> Self {
            self.ledger.envelopes[0]
                .ek_for
                .insert(ActorId::from(recipient), Bytes::from_static(b"k-lab"));
            self
        }

        fn grant(mut self, to: &str) -> Self {
            let seq = self.ledger.next_seq();
            self.ledger.grants.push(GrantEntry {
                seq,
                version_id: VersionId::from(V),
                from: ActorId::from("PAT-123"),
                to: ActorId::from(to),
                wrapped_key: Some(Bytes::from(format!("k-{to}-{seq}"))),
                at: seq as i64,
            });
            self
        }

        fn revoke(mut self, recipient: &str) -> Self {
            let seq = self.ledger.next_seq();
            self.ledger.soft_revocations.push(SoftRevocation {
                seq,
                version_id: VersionId::from(V),
                patient: ActorId::from("PAT-123"),
                recipient: ActorId::from(recipient),
                at: seq as i64,
            });
            self
        }
    }

    fn access(ledger: &ChainLedger) -> BTreeSet<ActorId> {
        let v = VersionId::from(V);
        AccessState::from_ledger(ledger, &v).unwrap().effective_access()
    }

    fn ids(names: &[&str]) -> BTreeSet<ActorId> {
        names.iter().map(|n| ActorId::from(*n)).collect()
    }

    #[test]
    fn test_patient_is_never_listed() {
        let ledger = LedgerBuilder::new().grant("PAT-123").ledger;
        assert!(access(&ledger).is_empty());
    }

    #[test]
    fn test_grants_and_lab_keys_union() {
        let ledger = LedgerBuilder::new()
            .with_lab_key("DOC-07")
            .grant("HOSP-02")
            .grant("HOSP-01")
            .ledger;
        assert_eq!(access(&ledger), ids(&["DOC-07", "HOSP-01", "HOSP-02"]));
    }

    #[test]
    fn test_duplicate_grants_do_not_inflate() {
        let once = LedgerBuilder::new().grant("HOSP-01").ledger;
        let twice = LedgerBuilder::new().grant("HOSP-01").grant("HOSP-01").ledger;
        assert_eq!(access(&once), access(&twice));
        assert_eq!(access(&twice).len(), 1);
    }

    #[test]
    fn test_withdraw_then_regrant() {
        let withdrawn = LedgerBuilder::new().grant("HOSP-01").revoke("HOSP-01").ledger;
        assert!(access(&withdrawn).is_empty());

        let v = VersionId::from(V);
        let state = AccessState::from_ledger(&withdrawn, &v).unwrap();
        assert_eq!(
            state.denial_for(&ActorId::from("HOSP-01")),
            Some(AccessDenial::Withdrawn)
        );
        assert_eq!(
            state.denial_for(&ActorId::from("HOSP-99")),
            Some(AccessDenial::NeverGranted)
        );

        let regranted = LedgerBuilder::new()
            .grant("HOSP-01")
            .revoke("HOSP-01")
            .grant("HOSP-01")
            .ledger;
        assert_eq!(access(&regranted), ids(&["HOSP-01"]));
    }

    #[test]
    fn test_withdraw_removes_lab_issued_recipient() {
        let ledger = LedgerBuilder::new().with_lab_key("DOC-07").revoke("DOC-07").ledger;
        assert!(access(&ledger).is_empty());
    }

    #[test]
    fn test_wrapped_key_prefers_lab_key() {
        let ledger = LedgerBuilder::new()
            .with_lab_key("HOSP-01")
            .grant("HOSP-01")
            .grant("HOSP-02")
            .grant("HOSP-02")
            .ledger;
        let v = VersionId::from(V);
        let state = AccessState::from_ledger(&ledger, &v).unwrap();

        assert_eq!(
            state.wrapped_key_for(&ActorId::from("HOSP-01")).unwrap().as_ref(),
            b"k-lab"
        );
        // latest grant wins
        assert_eq!(
            state.wrapped_key_for(&ActorId::from("HOSP-02")).unwrap().as_ref(),
            b"k-HOSP-02-3"
        );
        assert_eq!(state.wrapped_key_for(&ActorId::from("PAT-123")), None);
        assert_eq!(state.grant_history().len(), 3);
    }

    #[test]
    fn test_unknown_version() {
        let ledger = LedgerBuilder::new().ledger;
        let v = VersionId::from("R-404");
        assert!(matches!(
            AccessState::from_ledger(&ledger, &v),
            Err(AccessError::NotFound(_))
        ));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        const POOL: [&str; 4] = ["HOSP-01", "DOC-01", "DOC-02", "PAT-123"];

        fn events() -> impl Strategy<Value = Vec<(bool, usize)>> {
            prop::collection::vec((any::<bool>(), 0..POOL.len()), 0..32)
        }

        proptest! {
            #[test]
            fn test_latest_event_decides(events in events()) {
                let mut builder = LedgerBuilder::new();
                for (is_grant, who) in &events {
                    builder = if *is_grant {
                        builder.grant(POOL[*who])
                    } else {
                        builder.revoke(POOL[*who])
                    };
                }
                let access = access(&builder.ledger);

                for (i, name) in POOL.iter().enumerate() {
                    let last = events.iter().rev().find(|(_, who)| *who == i);
                    let expected = *name != "PAT-123" && matches!(last, Some((true, _)));
                    prop_assert_eq!(access.contains(&ActorId::from(*name)), expected);
                }
            }
        }
    }
}
