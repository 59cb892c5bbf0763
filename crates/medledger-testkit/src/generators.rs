//! Proptest generators for property-based testing.
//!
//! The main generator is a sequence of [`Op`]s against one report chain,
//! drawn from a small actor pool so that shares, unshares and opens collide.

use proptest::prelude::*;

use medledger::{Engine, Result};
use medledger_core::{ActorId, EnvelopeBuilder, VersionId};
use medledger_store::Store;

use crate::fixtures::{ReportFixture, ISSUED_AT};

/// Generate a well-formed identifier.
pub fn id() -> impl Strategy<Value = String> {
    "[A-Z]{2,4}-[0-9]{1,4}".prop_map(String::from)
}

/// Generate an identifier that must be rejected.
pub fn malformed_id() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        "[A-Z]{1,3} [0-9]{1,3}".prop_map(String::from),
        "[A-Z]{1,3}\t[0-9]{1,3}".prop_map(String::from),
        Just("X".repeat(129)),
    ]
}

/// Generate one of the fixture's consumers, a stranger, or the patient.
pub fn actor(fixture: &ReportFixture) -> impl Strategy<Value = ActorId> {
    prop_oneof![
        3 => Just(fixture.hospital.clone()),
        3 => Just(fixture.doctor.clone()),
        1 => Just(ActorId::from("HOSP-99")),
        1 => Just(fixture.patient.clone()),
    ]
}

/// One step against a report chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// The patient shares with `to`.
    Share { to: ActorId },
    /// The patient withdraws `to`.
    Unshare { to: ActorId },
    /// The lab supersedes the current version.
    Update,
    /// The lab hard-revokes the chain.
    Revoke,
    /// Someone other than the patient tries to share.
    ForeignShare { to: ActorId },
    /// Another lab tries to update.
    ForeignUpdate,
}

/// Generate a single op.
pub fn op(fixture: &ReportFixture) -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => actor(fixture).prop_map(|to| Op::Share { to }),
        3 => actor(fixture).prop_map(|to| Op::Unshare { to }),
        2 => Just(Op::Update),
        1 => Just(Op::Revoke),
        1 => actor(fixture).prop_map(|to| Op::ForeignShare { to }),
        1 => Just(Op::ForeignUpdate),
    ]
}

/// Generate a sequence of up to `max_len` ops.
pub fn ops(fixture: &ReportFixture, max_len: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(op(fixture), 0..=max_len)
}

/// Apply `op` to the chain whose origin is `origin`.
///
/// `step` names new versions created by [`Op::Update`].
pub async fn apply_op<S: Store>(
    engine: &Engine<S>,
    fixture: &ReportFixture,
    origin: &VersionId,
    step: usize,
    op: &Op,
) -> Result<()> {
    match op {
        Op::Share { to } => engine
            .share(origin, &fixture.patient, to, None)
            .await
            .map(drop),
        Op::Unshare { to } => engine
            .unshare(origin, &fixture.patient, to)
            .await
            .map(drop),
        Op::Update => {
            let current = engine.resolve_current(origin).await?;
            let next = fixture.envelope(&format!("{origin}.{step}"));
            engine.update(&current, &fixture.lab, next).await.map(drop)
        }
        Op::Revoke => engine.revoke(origin, &fixture.lab, None).await,
        Op::ForeignShare { to } => engine
            .share(origin, &ActorId::from("PAT-999"), to, None)
            .await
            .map(drop),
        Op::ForeignUpdate => {
            let current = engine.resolve_current(origin).await?;
            let next =
                EnvelopeBuilder::new(format!("{origin}.x{step}"), "LAB-99", fixture.patient.clone())
                    .issued_at(ISSUED_AT)
                    .build();
            engine
                .update(&current, &ActorId::from("LAB-99"), next)
                .await
                .map(drop)
        }
    }
}
