use anyhow::{anyhow, Result};
use rusqlite::{Connection, Row};

use crate::audit::hash_entry;

/// Outcome of a successful chain walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainReport {
    pub records: u64,
    /// Hash of the last record, or all zeroes for an empty log.
    pub head: [u8; 32],
}

/// Walk `audit_records` in id order and check every hash link.
pub fn verify_chain(conn: &Connection) -> Result<ChainReport> {
    verify_chain_with(conn, |_, _| {})
}

/// Like `verify_chain`, calling `on_record(id, entry_hash)` for each verified row.
pub fn verify_chain_with<F>(conn: &Connection, mut on_record: F) -> Result<ChainReport>
where
    F: FnMut(i64, [u8; 32]),
{
    let mut stmt = conn.prepare(
        "SELECT id, payload_json, prev_hash, entry_hash FROM audit_records ORDER BY id ASC",
    )?;
    let mut rows = stmt.query([])?;
    let mut expected_prev = [0u8; 32];
    let mut records = 0u64;

    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let payload: String = row.get(1)?;
        let prev_hash = blob32(row, 2)?;
        let entry_hash = blob32(row, 3)?;

        if prev_hash != expected_prev {
            return Err(anyhow!(
                "integrity check failed at id {}: prev_hash={}, expected_prev={}",
                id,
                hex::encode(prev_hash),
                hex::encode(expected_prev)
            ));
        }

        let computed = hash_entry(&expected_prev, payload.as_bytes());
        if computed != entry_hash {
            return Err(anyhow!(
                "integrity check failed at id {}: computed_hash={}, stored_hash={}",
                id,
                hex::encode(computed),
                hex::encode(entry_hash)
            ));
        }

        on_record(id, entry_hash);
        expected_prev = entry_hash;
        records += 1;
    }

    Ok(ChainReport {
        records,
        head: expected_prev,
    })
}

fn blob32(row: &Row<'_>, idx: usize) -> Result<[u8; 32]> {
    let bytes: Vec<u8> = row.get(idx)?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| anyhow!("expected 32-byte blob at col {}", idx))
}
