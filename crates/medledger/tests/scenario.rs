//! End-to-end lifecycle of one report: issue, share, update, unshare, revoke.

use std::collections::BTreeSet;

use medledger::store::{MemoryStore, SqliteStore, Store};
use medledger::{
    AccessDenial, ActorId, EmitRequest, Engine, EngineConfig, EngineError, Envelope,
    EnvelopeBuilder, Remediation, ReportStatus, VersionId,
};

const ISSUED_AT: i64 = 1_736_870_400_000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn envelope(id: &str, result: &str) -> Envelope {
    EnvelopeBuilder::new(id, "LAB-01", "PAT-123")
        .issued_at(ISSUED_AT)
        .exam_type("Hemogram")
        .result_short(result)
        .key_for("PAT-123", b"wrapped-for-patient".to_vec())
        .ciphertext(format!("sealed {result}").into_bytes())
        .signature(b"lab-01-signature".to_vec())
        .build()
}

struct Actors {
    patient: ActorId,
    hospital: ActorId,
    lab: ActorId,
}

fn actors() -> Actors {
    Actors {
        patient: ActorId::from("PAT-123"),
        hospital: ActorId::from("HOSP-01"),
        lab: ActorId::from("LAB-01"),
    }
}

async fn run_lifecycle<S: Store>(engine: Engine<S>) -> anyhow::Result<()> {
    let Actors {
        patient,
        hospital,
        lab,
    } = actors();
    let v1 = VersionId::from("R-2025-0001");
    let v2 = VersionId::from("R-2025-0002");

    // Issue: the patient holds a key but is never in effective access
    engine
        .emit(EmitRequest::new(lab.clone(), envelope("R-2025-0001", "normal")))
        .await?;
    assert_eq!(engine.resolve_status(&v1).await?, ReportStatus::Valid);
    assert_eq!(engine.resolve_current(&v1).await?, v1);
    assert!(engine.effective_access(&v1).await?.is_empty());

    // Share with the hospital
    let receipt = engine.share(&v1, &patient, &hospital, None).await?;
    assert!(receipt.access_changed);
    assert_eq!(
        engine.effective_access(&v1).await?,
        BTreeSet::from([hospital.clone()])
    );
    assert_eq!(engine.authorize_open(&v1, &hospital, &lab).await?, v1);

    // Update: the old id redirects to the new version's access set
    engine
        .update(&v1, &lab, envelope("R-2025-0002", "corrected"))
        .await?;
    assert_eq!(engine.resolve_status(&v1).await?, ReportStatus::Updated);
    assert_eq!(engine.resolve_status(&v2).await?, ReportStatus::Valid);
    assert_eq!(engine.resolve_current(&v1).await?, v2);

    let err = engine.authorize_open(&v1, &hospital, &lab).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::NotAuthorized {
            denial: AccessDenial::NeverGranted,
            ..
        }
    ));

    // Re-share on the current version, through the old id
    let receipt = engine.share(&v1, &patient, &hospital, None).await?;
    assert_eq!(receipt.version_id, v2);
    assert_eq!(engine.authorize_open(&v1, &hospital, &lab).await?, v2);
    assert_eq!(engine.authorize_open(&v2, &hospital, &lab).await?, v2);

    let opened = engine.open(&v1, &hospital, &lab).await?;
    assert_eq!(opened.version_id, v2);
    assert_eq!(opened.ciphertext.as_ref(), b"sealed corrected");

    // Unshare on the current version
    let receipt = engine.unshare(&v2, &patient, &hospital).await?;
    assert!(!receipt.is_noop());
    assert!(engine.effective_access(&v2).await?.is_empty());

    let err = engine.authorize_open(&v2, &hospital, &lab).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::NotAuthorized {
            denial: AccessDenial::Withdrawn,
            ..
        }
    ));
    assert_eq!(err.remediation(), Remediation::RequestGrant);

    // Hard revoke: terminal, overrides UPDATED
    engine.revoke(&v1, &lab, Some("sample mix-up")).await?;
    assert_eq!(engine.resolve_status(&v1).await?, ReportStatus::Revoked);
    assert_eq!(engine.resolve_status(&v2).await?, ReportStatus::Revoked);

    let err = engine.authorize_open(&v2, &hospital, &lab).await.unwrap_err();
    assert!(matches!(err, EngineError::ChainRevoked(_)));
    assert_eq!(err.remediation(), Remediation::PermanentlyVoid);
    assert!(matches!(
        engine.share(&v2, &patient, &hospital, None).await,
        Err(EngineError::ChainRevoked(_))
    ));
    assert!(matches!(
        engine
            .update(&v2, &lab, envelope("R-2025-0003", "again"))
            .await,
        Err(EngineError::ChainRevoked(_))
    ));
    assert!(matches!(
        engine.revoke(&v2, &lab, None).await,
        Err(EngineError::InvalidTransition(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_lifecycle_in_memory() -> anyhow::Result<()> {
    init_tracing();
    run_lifecycle(Engine::new(MemoryStore::new(), EngineConfig::default())).await
}

#[tokio::test]
async fn test_lifecycle_on_sqlite() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("reports.db");

    run_lifecycle(Engine::new(SqliteStore::open(&path)?, EngineConfig::default())).await?;

    // State survives a reopen and is still derived from the ledger
    let engine = Engine::new(SqliteStore::open(&path)?, EngineConfig::default());
    let v1 = VersionId::from("R-2025-0001");
    assert_eq!(engine.resolve_status(&v1).await?, ReportStatus::Revoked);
    assert_eq!(
        engine.resolve_current(&v1).await?,
        VersionId::from("R-2025-0002")
    );
    assert_eq!(engine.list_envelopes().await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_update_preconditions() -> anyhow::Result<()> {
    init_tracing();
    let engine = Engine::new(MemoryStore::new(), EngineConfig::default());
    let Actors { lab, .. } = actors();
    let v1 = VersionId::from("R-2025-0001");

    engine
        .emit(EmitRequest::new(lab.clone(), envelope("R-2025-0001", "normal")))
        .await?;
    engine
        .update(&v1, &lab, envelope("R-2025-0002", "corrected"))
        .await?;

    // Old is no longer current
    assert!(matches!(
        engine
            .update(&v1, &lab, envelope("R-2025-0003", "fork"))
            .await,
        Err(EngineError::InvalidTransition(_))
    ));

    // Another lab
    assert!(matches!(
        engine
            .update(
                &VersionId::from("R-2025-0002"),
                &ActorId::from("LAB-02"),
                envelope("R-2025-0003", "foreign"),
            )
            .await,
        Err(EngineError::Forbidden { .. })
    ));

    // Different patient
    let other_patient = EnvelopeBuilder::new("R-2025-0003", "LAB-01", "PAT-999")
        .issued_at(ISSUED_AT)
        .signature(b"sig".to_vec())
        .build();
    assert!(matches!(
        engine
            .update(&VersionId::from("R-2025-0002"), &lab, other_patient)
            .await,
        Err(EngineError::InvalidTransition(_))
    ));

    // Reusing an id inside the chain
    assert!(matches!(
        engine
            .update(&VersionId::from("R-2025-0002"), &lab, envelope("R-2025-0001", "loop"))
            .await,
        Err(EngineError::DuplicateVersion(_))
    ));

    // Unknown id
    assert!(matches!(
        engine
            .update(&VersionId::from("R-404"), &lab, envelope("R-2025-0009", "x"))
            .await,
        Err(EngineError::NotFound(_))
    ));

    // None of the failures wrote anything
    let views = engine.ledger_view().await?;
    assert_eq!(views.len(), 2);
    assert_eq!(
        engine.resolve_current(&v1).await?,
        VersionId::from("R-2025-0002")
    );
    Ok(())
}

#[tokio::test]
async fn test_open_failure_order() -> anyhow::Result<()> {
    init_tracing();
    let engine = Engine::new(MemoryStore::new(), EngineConfig::default());
    let Actors {
        patient,
        hospital,
        lab,
    } = actors();
    let v1 = VersionId::from("R-2025-0001");

    let unsigned = EnvelopeBuilder::new("R-2025-0001", "LAB-01", "PAT-123")
        .issued_at(ISSUED_AT)
        .key_for("PAT-123", b"k".to_vec())
        .build();
    engine.emit(EmitRequest::new(lab.clone(), unsigned)).await?;

    // Lab mismatch is checked before access
    assert!(matches!(
        engine
            .authorize_open(&v1, &hospital, &ActorId::from("LAB-02"))
            .await,
        Err(EngineError::LabMismatch { .. })
    ));
    assert!(matches!(
        engine.authorize_open(&v1, &hospital, &lab).await,
        Err(EngineError::NotAuthorized { .. })
    ));

    // Access is checked before the signature
    engine.share(&v1, &patient, &hospital, None).await?;
    let err = engine.authorize_open(&v1, &hospital, &lab).await.unwrap_err();
    assert!(matches!(err, EngineError::MissingSignature(_)));
    assert_eq!(err.remediation(), Remediation::ContactLab);

    // The patient is never in effective access
    assert!(matches!(
        engine.authorize_open(&v1, &patient, &lab).await,
        Err(EngineError::NotAuthorized { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_only_the_owning_patient_shares() -> anyhow::Result<()> {
    init_tracing();
    let engine = Engine::new(MemoryStore::new(), EngineConfig::default());
    let Actors { hospital, lab, .. } = actors();
    let v1 = VersionId::from("R-2025-0001");
    engine
        .emit(EmitRequest::new(lab, envelope("R-2025-0001", "normal")))
        .await?;

    let intruder = ActorId::from("PAT-999");
    assert!(matches!(
        engine.share(&v1, &intruder, &hospital, None).await,
        Err(EngineError::Forbidden { .. })
    ));
    assert!(matches!(
        engine.unshare(&v1, &intruder, &hospital).await,
        Err(EngineError::Forbidden { .. })
    ));
    assert!(matches!(
        engine
            .share(&v1, &ActorId::from("PAT-123"), &ActorId::from(""), None)
            .await,
        Err(EngineError::InvalidInput(_))
    ));
    assert!(engine.grant_history(&v1).await?.is_empty());
    Ok(())
}
