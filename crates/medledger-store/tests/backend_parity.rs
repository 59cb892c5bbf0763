//! The in-memory and SQLite backends must return identical snapshots for the
//! same sequence of appends.

use medledger_core::{
    ActorId, EnvelopeBuilder, GrantEntry, ReportId, SoftRevocation, VersionId, VersionLink,
};
use medledger_store::{InsertResult, MemoryStore, SqliteStore, Store};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Grant { seq: u64, to: u8 },
    Withdraw { seq: u64, to: u8 },
    Update,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u64..12, 0u8..4).prop_map(|(seq, to)| Op::Grant { seq, to }),
        (1u64..12, 0u8..4).prop_map(|(seq, to)| Op::Withdraw { seq, to }),
        Just(Op::Update),
    ]
}

async fn apply(store: &dyn Store, ops: &[Op]) -> Vec<InsertResult> {
    let report = ReportId::from("R-1");
    let mut results = vec![store
        .insert_chain(&EnvelopeBuilder::new("R-1", "LAB-01", "PAT-1").build())
        .await
        .unwrap()];
    let mut current = 1u32;

    for op in ops {
        let version = VersionId::from(format!("R-{current}"));
        let result = match op {
            Op::Grant { seq, to } => store
                .append_grant(
                    &report,
                    &GrantEntry {
                        seq: *seq,
                        version_id: version,
                        from: ActorId::from("PAT-1"),
                        to: ActorId::from(format!("HOSP-{to}")),
                        wrapped_key: None,
                        at: *seq as i64,
                    },
                )
                .await,
            Op::Withdraw { seq, to } => store
                .append_soft_revocation(
                    &report,
                    &SoftRevocation {
                        seq: *seq,
                        version_id: version,
                        patient: ActorId::from("PAT-1"),
                        recipient: ActorId::from(format!("HOSP-{to}")),
                        at: *seq as i64,
                    },
                )
                .await,
            Op::Update => {
                let next = format!("R-{}", current + 1);
                let link = VersionLink {
                    report_id: report.clone(),
                    old: version,
                    new: VersionId::from(next.as_str()),
                    lab_id: ActorId::from("LAB-01"),
                    at: 0,
                };
                current += 1;
                store
                    .append_version(&EnvelopeBuilder::new(next, "LAB-01", "PAT-1").build(), &link)
                    .await
            }
        };
        results.push(result.unwrap());
    }
    results
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn backends_agree(ops in prop::collection::vec(op(), 0..24)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let memory = MemoryStore::new();
            let sqlite = SqliteStore::open_memory().unwrap();

            let a = apply(&memory, &ops).await;
            let b = apply(&sqlite, &ops).await;
            assert_eq!(a, b);

            let report = ReportId::from("R-1");
            let left = memory.load_chain(&report).await.unwrap();
            let right = sqlite.load_chain(&report).await.unwrap();
            assert_eq!(left, right);
        });
    }
}
