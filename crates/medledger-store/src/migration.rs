//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema v{current} is newer than supported v{CURRENT_VERSION}"
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
        tracing::debug!(from = current, to = CURRENT_VERSION, "schema migrated");
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- One row per report chain
        CREATE TABLE chains (
            report_id TEXT PRIMARY KEY,       -- origin version id
            current_id TEXT NOT NULL,         -- cached, reconstructible from version_links
            created_at INTEGER NOT NULL       -- origin issued_at (Unix ms)
        );

        -- Envelope store: immutable, keyed by version id
        CREATE TABLE envelopes (
            version_id TEXT PRIMARY KEY,
            report_id TEXT NOT NULL REFERENCES chains(report_id),
            lab_id TEXT NOT NULL,
            patient_ref TEXT NOT NULL,
            issued_at INTEGER NOT NULL,
            exam_type TEXT,
            result_short TEXT,
            note TEXT,
            ek_for BLOB NOT NULL,             -- CBOR map recipient -> wrapped key
            ciphertext BLOB NOT NULL,
            signature BLOB,
            entry_id BLOB NOT NULL            -- 32 bytes, Blake3 of canonical bytes
        );

        -- Version chain links, one per lab update
        CREATE TABLE version_links (
            report_id TEXT NOT NULL REFERENCES chains(report_id),
            old_id TEXT NOT NULL UNIQUE,      -- a version is superseded at most once
            new_id TEXT NOT NULL UNIQUE,
            lab_id TEXT NOT NULL,
            at INTEGER NOT NULL,
            entry_id BLOB NOT NULL
        );

        -- Grant ledger
        CREATE TABLE grants (
            report_id TEXT NOT NULL REFERENCES chains(report_id),
            seq INTEGER NOT NULL,             -- shared with soft_revocations
            version_id TEXT NOT NULL REFERENCES envelopes(version_id),
            from_id TEXT NOT NULL,
            to_id TEXT NOT NULL,
            wrapped_key BLOB,
            at INTEGER NOT NULL,
            entry_id BLOB NOT NULL,
            PRIMARY KEY (report_id, seq)
        );

        -- Soft revocation set
        CREATE TABLE soft_revocations (
            report_id TEXT NOT NULL REFERENCES chains(report_id),
            seq INTEGER NOT NULL,
            version_id TEXT NOT NULL REFERENCES envelopes(version_id),
            patient_id TEXT NOT NULL,
            recipient_id TEXT NOT NULL,
            at INTEGER NOT NULL,
            entry_id BLOB NOT NULL,
            PRIMARY KEY (report_id, seq)
        );

        -- Terminal lab revocations, at most one per chain
        CREATE TABLE hard_revocations (
            report_id TEXT PRIMARY KEY REFERENCES chains(report_id),
            lab_id TEXT NOT NULL,
            reason TEXT,
            at INTEGER NOT NULL,
            entry_id BLOB NOT NULL
        );

        CREATE INDEX idx_envelopes_report ON envelopes(report_id);
        CREATE INDEX idx_links_report ON version_links(report_id);
        CREATE INDEX idx_grants_version ON grants(version_id);
        CREATE INDEX idx_soft_revocations_version ON soft_revocations(version_id);
        "#,
    )?;

    Ok(())
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
