//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend. It uses rusqlite with bundled
//! SQLite, wrapped in async via tokio::spawn_blocking. Every append runs in
//! one transaction and every chain read in another, which is what gives the
//! engine its all-or-nothing writes and untorn snapshots.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use medledger_core::{
    ActorId, ChainLedger, Envelope, EnvelopeMetadata, GrantEntry, HardRevocation, LedgerRecord,
    ReportId, SoftRevocation, VersionId, VersionLink,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{InsertResult, Store};

const ENVELOPE_COLUMNS: &str = "version_id, lab_id, patient_ref, issued_at, exam_type, \
     result_short, note, ek_for, ciphertext, signature";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Poisoned(format!("connection mutex: {e}")))?;
            f(&mut *conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row helpers
// ─────────────────────────────────────────────────────────────────────────────

fn encode_keys(ek_for: &BTreeMap<ActorId, Bytes>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(ek_for, &mut buf)
        .map_err(|e| StoreError::Serialization(format!("ek_for: {e}")))?;
    Ok(buf)
}

fn decode_keys(raw: &[u8]) -> Result<BTreeMap<ActorId, Bytes>> {
    ciborium::from_reader(raw).map_err(|e| StoreError::Serialization(format!("ek_for: {e}")))
}

fn row_to_envelope(row: &rusqlite::Row<'_>) -> rusqlite::Result<Envelope> {
    let ek_for_raw: Vec<u8> = row.get("ek_for")?;
    let ek_for = decode_keys(&ek_for_raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Blob, Box::new(e)))?;
    let ciphertext: Vec<u8> = row.get("ciphertext")?;
    let signature: Option<Vec<u8>> = row.get("signature")?;

    Ok(Envelope {
        version_id: VersionId::from(row.get::<_, String>("version_id")?),
        metadata: EnvelopeMetadata {
            lab_id: ActorId::from(row.get::<_, String>("lab_id")?),
            patient_ref: ActorId::from(row.get::<_, String>("patient_ref")?),
            issued_at: row.get("issued_at")?,
            exam_type: row.get("exam_type")?,
            result_short: row.get("result_short")?,
            note: row.get("note")?,
        },
        ek_for,
        ciphertext: Bytes::from(ciphertext),
        signature: signature.map(Bytes::from),
    })
}

fn row_to_link(row: &rusqlite::Row<'_>) -> rusqlite::Result<VersionLink> {
    Ok(VersionLink {
        report_id: ReportId::from(row.get::<_, String>("report_id")?),
        old: VersionId::from(row.get::<_, String>("old_id")?),
        new: VersionId::from(row.get::<_, String>("new_id")?),
        lab_id: ActorId::from(row.get::<_, String>("lab_id")?),
        at: row.get("at")?,
    })
}

fn row_to_grant(row: &rusqlite::Row<'_>) -> rusqlite::Result<GrantEntry> {
    let wrapped_key: Option<Vec<u8>> = row.get("wrapped_key")?;
    Ok(GrantEntry {
        seq: row.get::<_, i64>("seq")? as u64,
        version_id: VersionId::from(row.get::<_, String>("version_id")?),
        from: ActorId::from(row.get::<_, String>("from_id")?),
        to: ActorId::from(row.get::<_, String>("to_id")?),
        wrapped_key: wrapped_key.map(Bytes::from),
        at: row.get("at")?,
    })
}

fn row_to_soft_revocation(row: &rusqlite::Row<'_>) -> rusqlite::Result<SoftRevocation> {
    Ok(SoftRevocation {
        seq: row.get::<_, i64>("seq")? as u64,
        version_id: VersionId::from(row.get::<_, String>("version_id")?),
        patient: ActorId::from(row.get::<_, String>("patient_id")?),
        recipient: ActorId::from(row.get::<_, String>("recipient_id")?),
        at: row.get("at")?,
    })
}

fn row_to_hard_revocation(row: &rusqlite::Row<'_>) -> rusqlite::Result<HardRevocation> {
    Ok(HardRevocation {
        report_id: ReportId::from(row.get::<_, String>("report_id")?),
        lab_id: ActorId::from(row.get::<_, String>("lab_id")?),
        reason: row.get("reason")?,
        at: row.get("at")?,
    })
}

fn exists(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<bool> {
    Ok(conn.query_row(sql, params, |row| row.get(0))?)
}

fn require_chain(conn: &Connection, report_id: &str) -> Result<()> {
    if exists(
        conn,
        "SELECT EXISTS(SELECT 1 FROM chains WHERE report_id = ?1)",
        params![report_id],
    )? {
        Ok(())
    } else {
        Err(StoreError::ChainNotFound(report_id.to_string()))
    }
}

fn version_exists(conn: &Connection, version_id: &str) -> Result<bool> {
    exists(
        conn,
        "SELECT EXISTS(SELECT 1 FROM envelopes WHERE version_id = ?1)",
        params![version_id],
    )
}

fn seq_taken(conn: &Connection, report_id: &str, seq: u64) -> Result<bool> {
    exists(
        conn,
        "SELECT EXISTS(SELECT 1 FROM grants WHERE report_id = ?1 AND seq = ?2)
             OR EXISTS(SELECT 1 FROM soft_revocations WHERE report_id = ?1 AND seq = ?2)",
        params![report_id, seq as i64],
    )
}

fn insert_envelope(conn: &Connection, report_id: &str, envelope: &Envelope) -> Result<()> {
    let metadata = &envelope.metadata;
    conn.execute(
        "INSERT INTO envelopes (
            version_id, report_id, lab_id, patient_ref, issued_at, exam_type,
            result_short, note, ek_for, ciphertext, signature, entry_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            envelope.version_id.as_str(),
            report_id,
            metadata.lab_id.as_str(),
            metadata.patient_ref.as_str(),
            metadata.issued_at,
            metadata.exam_type,
            metadata.result_short,
            metadata.note,
            encode_keys(&envelope.ek_for)?,
            envelope.ciphertext.as_ref(),
            envelope.signature.as_ref().map(|s| s.as_ref()),
            envelope.entry_id().as_bytes().as_slice(),
        ],
    )?;
    Ok(())
}

fn select_chain(conn: &Connection, report_id: &str) -> Result<Option<ChainLedger>> {
    let current: Option<String> = conn
        .query_row(
            "SELECT current_id FROM chains WHERE report_id = ?1",
            params![report_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(current) = current else {
        return Ok(None);
    };

    let envelopes = conn
        .prepare(&format!(
            "SELECT {ENVELOPE_COLUMNS} FROM envelopes WHERE report_id = ?1 ORDER BY rowid"
        ))?
        .query_map(params![report_id], row_to_envelope)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let links = conn
        .prepare(
            "SELECT report_id, old_id, new_id, lab_id, at FROM version_links
             WHERE report_id = ?1 ORDER BY rowid",
        )?
        .query_map(params![report_id], row_to_link)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let grants = conn
        .prepare(
            "SELECT seq, version_id, from_id, to_id, wrapped_key, at FROM grants
             WHERE report_id = ?1 ORDER BY seq",
        )?
        .query_map(params![report_id], row_to_grant)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let soft_revocations = conn
        .prepare(
            "SELECT seq, version_id, patient_id, recipient_id, at FROM soft_revocations
             WHERE report_id = ?1 ORDER BY seq",
        )?
        .query_map(params![report_id], row_to_soft_revocation)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let hard_revocation = conn
        .query_row(
            "SELECT report_id, lab_id, reason, at FROM hard_revocations WHERE report_id = ?1",
            params![report_id],
            row_to_hard_revocation,
        )
        .optional()?;

    if envelopes.is_empty() {
        return Err(StoreError::InvalidData(format!(
            "chain {report_id} has no envelopes"
        )));
    }

    Ok(Some(ChainLedger {
        report_id: ReportId::from(report_id),
        current_pointer: VersionId::from(current),
        envelopes,
        links,
        grants,
        soft_revocations,
        hard_revocation,
    }))
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_chain(&self, envelope: &Envelope) -> Result<InsertResult> {
        let envelope = envelope.clone();

        self.run(move |conn| {
            let tx = conn.transaction()?;
            let version_id = envelope.version_id.as_str();

            if version_exists(&tx, version_id)? {
                return Ok(InsertResult::AlreadyExists);
            }

            let report_id = envelope.version_id.to_report_id();
            tx.execute(
                "INSERT INTO chains (report_id, current_id, created_at) VALUES (?1, ?2, ?3)",
                params![report_id.as_str(), version_id, envelope.metadata.issued_at],
            )?;
            insert_envelope(&tx, report_id.as_str(), &envelope)?;

            tx.commit()?;
            Ok(InsertResult::Inserted)
        })
        .await
    }

    async fn append_version(
        &self,
        envelope: &Envelope,
        link: &VersionLink,
    ) -> Result<InsertResult> {
        let envelope = envelope.clone();
        let link = link.clone();

        self.run(move |conn| {
            let tx = conn.transaction()?;
            let report_id = link.report_id.as_str();

            require_chain(&tx, report_id)?;
            if version_exists(&tx, envelope.version_id.as_str())? {
                return Ok(InsertResult::AlreadyExists);
            }

            insert_envelope(&tx, report_id, &envelope)?;
            tx.execute(
                "INSERT INTO version_links (report_id, old_id, new_id, lab_id, at, entry_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    report_id,
                    link.old.as_str(),
                    link.new.as_str(),
                    link.lab_id.as_str(),
                    link.at,
                    link.entry_id().as_bytes().as_slice(),
                ],
            )?;
            tx.execute(
                "UPDATE chains SET current_id = ?2 WHERE report_id = ?1",
                params![report_id, link.new.as_str()],
            )?;

            tx.commit()?;
            Ok(InsertResult::Inserted)
        })
        .await
    }

    async fn mark_hard_revoked(&self, revocation: &HardRevocation) -> Result<InsertResult> {
        let revocation = revocation.clone();

        self.run(move |conn| {
            let tx = conn.transaction()?;
            let report_id = revocation.report_id.as_str();

            require_chain(&tx, report_id)?;
            if exists(
                &tx,
                "SELECT EXISTS(SELECT 1 FROM hard_revocations WHERE report_id = ?1)",
                params![report_id],
            )? {
                return Ok(InsertResult::AlreadyExists);
            }

            tx.execute(
                "INSERT INTO hard_revocations (report_id, lab_id, reason, at, entry_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    report_id,
                    revocation.lab_id.as_str(),
                    revocation.reason,
                    revocation.at,
                    revocation.entry_id().as_bytes().as_slice(),
                ],
            )?;

            tx.commit()?;
            Ok(InsertResult::Inserted)
        })
        .await
    }

    async fn append_grant(
        &self,
        report_id: &ReportId,
        grant: &GrantEntry,
    ) -> Result<InsertResult> {
        let report_id = report_id.clone();
        let grant = grant.clone();

        self.run(move |conn| {
            let tx = conn.transaction()?;
            let report_id = report_id.as_str();

            require_chain(&tx, report_id)?;
            if seq_taken(&tx, report_id, grant.seq)? {
                return Ok(InsertResult::AlreadyExists);
            }

            tx.execute(
                "INSERT INTO grants (
                    report_id, seq, version_id, from_id, to_id, wrapped_key, at, entry_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    report_id,
                    grant.seq as i64,
                    grant.version_id.as_str(),
                    grant.from.as_str(),
                    grant.to.as_str(),
                    grant.wrapped_key.as_ref().map(|k| k.as_ref()),
                    grant.at,
                    grant.entry_id().as_bytes().as_slice(),
                ],
            )?;

            tx.commit()?;
            Ok(InsertResult::Inserted)
        })
        .await
    }

    async fn append_soft_revocation(
        &self,
        report_id: &ReportId,
        revocation: &SoftRevocation,
    ) -> Result<InsertResult> {
        let report_id = report_id.clone();
        let revocation = revocation.clone();

        self.run(move |conn| {
            let tx = conn.transaction()?;
            let report_id = report_id.as_str();

            require_chain(&tx, report_id)?;
            if seq_taken(&tx, report_id, revocation.seq)? {
                return Ok(InsertResult::AlreadyExists);
            }

            tx.execute(
                "INSERT INTO soft_revocations (
                    report_id, seq, version_id, patient_id, recipient_id, at, entry_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    report_id,
                    revocation.seq as i64,
                    revocation.version_id.as_str(),
                    revocation.patient.as_str(),
                    revocation.recipient.as_str(),
                    revocation.at,
                    revocation.entry_id().as_bytes().as_slice(),
                ],
            )?;

            tx.commit()?;
            Ok(InsertResult::Inserted)
        })
        .await
    }

    async fn get_envelope(&self, version_id: &VersionId) -> Result<Option<Envelope>> {
        let version_id = version_id.clone();

        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {ENVELOPE_COLUMNS} FROM envelopes WHERE version_id = ?1"),
                params![version_id.as_str()],
                row_to_envelope,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn chain_of(&self, version_id: &VersionId) -> Result<Option<ReportId>> {
        let version_id = version_id.clone();

        self.run(move |conn| {
            let report_id: Option<String> = conn
                .query_row(
                    "SELECT report_id FROM envelopes WHERE version_id = ?1",
                    params![version_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(report_id.map(ReportId::from))
        })
        .await
    }

    async fn load_chain(&self, report_id: &ReportId) -> Result<Option<ChainLedger>> {
        let report_id = report_id.clone();

        self.run(move |conn| {
            // One read transaction for the whole snapshot.
            let tx = conn.transaction()?;
            let chain = select_chain(&tx, report_id.as_str())?;
            tx.commit()?;
            Ok(chain)
        })
        .await
    }

    async fn list_envelopes(&self) -> Result<Vec<Envelope>> {
        self.run(|conn| {
            let envelopes = conn
                .prepare(&format!(
                    "SELECT {ENVELOPE_COLUMNS} FROM envelopes ORDER BY rowid"
                ))?
                .query_map([], row_to_envelope)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(envelopes)
        })
        .await
    }

    async fn list_chains(&self) -> Result<Vec<ReportId>> {
        self.run(|conn| {
            let chains = conn
                .prepare("SELECT report_id FROM chains ORDER BY rowid")?
                .query_map([], |row| row.get::<_, String>(0))?
                .map(|r| r.map(ReportId::from))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(chains)
        })
        .await
    }

    async fn set_current_pointer(&self, report_id: &ReportId, current: &VersionId) -> Result<()> {
        let report_id = report_id.clone();
        let current = current.clone();

        self.run(move |conn| {
            let tx = conn.transaction()?;
            require_chain(&tx, report_id.as_str())?;

            let owner: Option<String> = tx
                .query_row(
                    "SELECT report_id FROM envelopes WHERE version_id = ?1",
                    params![current.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if owner.as_deref() != Some(report_id.as_str()) {
                return Err(StoreError::InvalidData(format!(
                    "version {current} does not belong to chain {report_id}"
                )));
            }

            tx.execute(
                "UPDATE chains SET current_id = ?2 WHERE report_id = ?1",
                params![report_id.as_str(), current.as_str()],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medledger_core::EnvelopeBuilder;

    fn envelope(id: &str) -> Envelope {
        EnvelopeBuilder::new(id, "LAB-01", "PAT-123")
            .issued_at(1_736_870_400_000)
            .exam_type("CBC")
            .result_short("normal")
            .key_for("PAT-123", b"k-pat".to_vec())
            .key_for("DOC-07", b"k-doc".to_vec())
            .ciphertext(b"ciphertext".to_vec())
            .signature(b"sig".to_vec())
            .build()
    }

    fn link(old: &str, new: &str) -> VersionLink {
        VersionLink {
            report_id: ReportId::from("R-1"),
            old: VersionId::from(old),
            new: VersionId::from(new),
            lab_id: ActorId::from("LAB-01"),
            at: 100,
        }
    }

    fn grant(seq: u64, version: &str, to: &str) -> GrantEntry {
        GrantEntry {
            seq,
            version_id: VersionId::from(version),
            from: ActorId::from("PAT-123"),
            to: ActorId::from(to),
            wrapped_key: Some(Bytes::from_static(b"k-hosp")),
            at: 200 + seq as i64,
        }
    }

    #[tokio::test]
    async fn test_envelope_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        let env = envelope("R-1");

        assert_eq!(store.insert_chain(&env).await.unwrap(), InsertResult::Inserted);
        assert_eq!(
            store.insert_chain(&env).await.unwrap(),
            InsertResult::AlreadyExists
        );

        let loaded = store
            .get_envelope(&VersionId::from("R-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, env);
        assert!(store
            .get_envelope(&VersionId::from("R-404"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_chain_snapshot() {
        let store = SqliteStore::open_memory().unwrap();
        let report = ReportId::from("R-1");
        store.insert_chain(&envelope("R-1")).await.unwrap();
        store.append_grant(&report, &grant(1, "R-1", "HOSP-01")).await.unwrap();
        store
            .append_version(&envelope("R-2"), &link("R-1", "R-2"))
            .await
            .unwrap();
        store
            .append_soft_revocation(
                &report,
                &SoftRevocation {
                    seq: 2,
                    version_id: VersionId::from("R-1"),
                    patient: ActorId::from("PAT-123"),
                    recipient: ActorId::from("HOSP-01"),
                    at: 300,
                },
            )
            .await
            .unwrap();
        store.append_grant(&report, &grant(3, "R-2", "HOSP-02")).await.unwrap();

        let chain = store.load_chain(&report).await.unwrap().unwrap();
        assert_eq!(chain.current_pointer, VersionId::from("R-2"));
        assert_eq!(chain.envelopes.len(), 2);
        assert_eq!(chain.links, vec![link("R-1", "R-2")]);
        assert_eq!(chain.grants.iter().map(|g| g.seq).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(chain.soft_revocations.len(), 1);
        assert!(chain.hard_revocation.is_none());
        assert_eq!(chain.next_seq(), 4);
    }

    #[tokio::test]
    async fn test_duplicate_seq_and_unknown_chain() {
        let store = SqliteStore::open_memory().unwrap();
        let report = ReportId::from("R-1");
        store.insert_chain(&envelope("R-1")).await.unwrap();

        store.append_grant(&report, &grant(1, "R-1", "HOSP-01")).await.unwrap();
        assert_eq!(
            store.append_grant(&report, &grant(1, "R-1", "HOSP-02")).await.unwrap(),
            InsertResult::AlreadyExists
        );

        let err = store
            .append_grant(&ReportId::from("R-9"), &grant(1, "R-9", "HOSP-01"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ChainNotFound(_)));
    }

    #[tokio::test]
    async fn test_hard_revocation_and_pointer_repair() {
        let store = SqliteStore::open_memory().unwrap();
        let report = ReportId::from("R-1");
        store.insert_chain(&envelope("R-1")).await.unwrap();
        store
            .append_version(&envelope("R-2"), &link("R-1", "R-2"))
            .await
            .unwrap();

        let rev = HardRevocation {
            report_id: report.clone(),
            lab_id: ActorId::from("LAB-01"),
            reason: Some("sample mix-up".into()),
            at: 400,
        };
        assert!(store.mark_hard_revoked(&rev).await.unwrap().is_inserted());
        assert_eq!(
            store.mark_hard_revoked(&rev).await.unwrap(),
            InsertResult::AlreadyExists
        );

        store
            .set_current_pointer(&report, &VersionId::from("R-1"))
            .await
            .unwrap();
        let chain = store.load_chain(&report).await.unwrap().unwrap();
        assert_eq!(chain.current_pointer, VersionId::from("R-1"));
        assert_eq!(chain.hard_revocation, Some(rev));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_chain(&envelope("R-1")).await.unwrap();
            store
                .append_version(&envelope("R-2"), &link("R-1", "R-2"))
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.list_chains().await.unwrap(), vec![ReportId::from("R-1")]);
        assert_eq!(
            store.chain_of(&VersionId::from("R-2")).await.unwrap(),
            Some(ReportId::from("R-1"))
        );
        let ids: Vec<_> = store
            .list_envelopes()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.version_id)
            .collect();
        assert_eq!(ids, vec![VersionId::from("R-1"), VersionId::from("R-2")]);
    }
}
