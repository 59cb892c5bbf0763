//! Canonical CBOR encoding for deterministic serialization.
//!
//! Follows RFC 8949 Core Deterministic Encoding:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - No floats (timestamps are i64 milliseconds)
//!
//! Entry ids and the AAD handed to the decryption collaborator are computed
//! over these bytes, so the same record must encode identically everywhere.

use ciborium::value::Value;

use crate::envelope::EnvelopeMetadata;
use crate::ledger::LedgerRecord;
use crate::types::VersionId;

/// Field keys (integer keys for compact encoding).
///
/// Keys 0-23 encode as single bytes in CBOR.
pub(crate) mod keys {
    pub const KIND: u64 = 0;
    pub const REPORT_ID: u64 = 1;
    pub const VERSION_ID: u64 = 2;
    pub const ACTOR: u64 = 3;
    pub const SUBJECT: u64 = 4;
    pub const SEQ: u64 = 5;
    pub const AT: u64 = 6;
    pub const KEY: u64 = 7;
    pub const REASON: u64 = 8;
    pub const DIGEST: u64 = 9;

    // Envelope metadata
    pub const LAB_ID: u64 = 16;
    pub const PATIENT_REF: u64 = 17;
    pub const ISSUED_AT: u64 = 18;
    pub const EXAM_TYPE: u64 = 19;
    pub const RESULT_SHORT: u64 = 20;
    pub const NOTE: u64 = 21;
}

/// Encode a ledger record to canonical bytes.
pub fn canonical_entry_bytes<R: LedgerRecord + ?Sized>(record: &R) -> Vec<u8> {
    let mut entries = record.body();
    entries.push((
        Value::Integer(keys::KIND.into()),
        Value::Integer(record.kind().to_u16().into()),
    ));
    encode(&Value::Map(entries))
}

/// Encode envelope metadata, bound to its version id.
///
/// Absent optional fields are omitted rather than encoded as null, so adding
/// an exam type later does not change the bytes of envelopes without one.
pub fn canonical_metadata_bytes(version_id: &VersionId, metadata: &EnvelopeMetadata) -> Vec<u8> {
    let mut entries = vec![
        (
            Value::Integer(keys::VERSION_ID.into()),
            Value::Text(version_id.as_str().to_string()),
        ),
        (
            Value::Integer(keys::LAB_ID.into()),
            Value::Text(metadata.lab_id.as_str().to_string()),
        ),
        (
            Value::Integer(keys::PATIENT_REF.into()),
            Value::Text(metadata.patient_ref.as_str().to_string()),
        ),
        (
            Value::Integer(keys::ISSUED_AT.into()),
            Value::Integer(metadata.issued_at.into()),
        ),
    ];

    let optional = [
        (keys::EXAM_TYPE, &metadata.exam_type),
        (keys::RESULT_SHORT, &metadata.result_short),
        (keys::NOTE, &metadata.note),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            entries.push((Value::Integer(key.into()), Value::Text(value.clone())));
        }
    }

    encode(&Value::Map(entries))
}

/// Encode a CBOR value to canonical bytes.
fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_value_to(&mut buf, value);
    buf
}

fn encode_value_to(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => {
            encode_head(buf, 2, b.len() as u64);
            buf.extend_from_slice(b);
        }
        Value::Text(s) => {
            encode_head(buf, 3, s.len() as u64);
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Array(items) => {
            encode_head(buf, 4, items.len() as u64);
            for item in items {
                encode_value_to(buf, item);
            }
        }
        Value::Map(entries) => encode_map(buf, entries),
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Null => buf.push(0xf6),
        // Records in this crate only build the variants above.
        other => unreachable!("non-canonical CBOR value: {other:?}"),
    }
}

fn encode_integer(buf: &mut Vec<u8>, i: ciborium::value::Integer) {
    let n: i128 = i.into();
    if n >= 0 {
        encode_head(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        encode_head(buf, 1, (-1 - n) as u64);
    }
}

/// Write a major type with its argument in the shortest form.
fn encode_head(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    match n {
        0..=23 => buf.push(mt | n as u8),
        24..=0xff => {
            buf.push(mt | 24);
            buf.push(n as u8);
        }
        0x100..=0xffff => {
            buf.push(mt | 25);
            buf.extend_from_slice(&(n as u16).to_be_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            buf.push(mt | 26);
            buf.extend_from_slice(&(n as u32).to_be_bytes());
        }
        _ => {
            buf.push(mt | 27);
            buf.extend_from_slice(&n.to_be_bytes());
        }
    }
}

/// Keys are sorted by their encoded bytes.
fn encode_map(buf: &mut Vec<u8>, entries: &[(Value, Value)]) {
    let mut pairs: Vec<(Vec<u8>, &Value)> = entries
        .iter()
        .map(|(k, v)| (encode(k), v))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_head(buf, 5, pairs.len() as u64);
    for (key, value) in pairs {
        buf.extend_from_slice(&key);
        encode_value_to(buf, value);
    }
}
