use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::Mutex;

use super::{hash_entry, AuditSink, LogRecord};

/// Hash-chained SQLite audit log.
///
/// Each row stores the JSON record, the previous row's hash and
/// `sha256(prev_hash || payload_json)`. `verify::verify_chain` walks the chain.
pub struct SqliteAuditLog {
    conn: Mutex<Connection>,
}

impl SqliteAuditLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::with_connection(conn)
    }

    /// Open an existing log for inspection. The schema is left untouched and
    /// appends fail.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// All records in append order.
    pub fn read_records(&self) -> Result<Vec<LogRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT payload_json FROM audit_records ORDER BY id ASC")?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let payload: String = row.get(0)?;
            records.push(serde_json::from_str(&payload)?);
        }
        Ok(records)
    }

    /// Run `f` against the underlying connection (verification, reporting).
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("audit database lock poisoned"))
    }
}

pub(crate) fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;

        CREATE TABLE IF NOT EXISTS audit_records (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          created_at INTEGER NOT NULL,
          payload_json TEXT NOT NULL,
          prev_hash BLOB NOT NULL,
          entry_hash BLOB NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_created ON audit_records(created_at);
        "#,
    )?;
    Ok(())
}

impl AuditSink for SqliteAuditLog {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn append(&self, record: &LogRecord) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let prev_hash = match tx
            .query_row(
                "SELECT entry_hash FROM audit_records ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?
        {
            Some(bytes) => <[u8; 32]>::try_from(bytes.as_slice())
                .map_err(|_| anyhow!("corrupt audit log: entry_hash size"))?,
            None => [0u8; 32],
        };

        let payload_json = serde_json::to_string(record)?;
        let entry_hash = hash_entry(&prev_hash, payload_json.as_bytes());
        let created_at = chrono::Utc::now().timestamp();

        tx.execute(
            r#"
            INSERT INTO audit_records(created_at, payload_json, prev_hash, entry_hash)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                created_at,
                payload_json,
                prev_hash.to_vec(),
                entry_hash.to_vec()
            ],
        )?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::RecognitionStatus;
    use std::sync::Arc;

    #[test]
    fn records_come_back_in_order() {
        let log = SqliteAuditLog::open_in_memory().unwrap();
        log.append(&LogRecord::recognized("alice")).unwrap();
        log.append(&LogRecord::not_recognized()).unwrap();
        let records = log.read_records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "alice");
        assert_eq!(records[1].status, RecognitionStatus::NotRecognized);
    }

    #[test]
    fn rows_link_to_previous_hash() {
        let log = SqliteAuditLog::open_in_memory().unwrap();
        log.append(&LogRecord::recognized("a")).unwrap();
        log.append(&LogRecord::recognized("b")).unwrap();
        let links: Vec<(Vec<u8>, Vec<u8>)> = log
            .with_conn(|conn| {
                let mut stmt =
                    conn.prepare("SELECT prev_hash, entry_hash FROM audit_records ORDER BY id")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .unwrap();
        assert_eq!(links[0].0, vec![0u8; 32]);
        assert_eq!(links[1].0, links[0].1);
    }

    #[test]
    fn read_only_open_reads_but_never_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        {
            let log = SqliteAuditLog::open(&path).unwrap();
            log.append(&LogRecord::recognized("alice")).unwrap();
        }

        let reader = SqliteAuditLog::open_read_only(&path).unwrap();
        assert_eq!(reader.read_records().unwrap().len(), 1);
        assert!(reader.append(&LogRecord::recognized("mallory")).is_err());
        drop(reader);

        let log = SqliteAuditLog::open(&path).unwrap();
        assert_eq!(log.read_records().unwrap().len(), 1);
    }

    #[test]
    fn read_only_open_does_not_create_a_missing_db() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db");
        assert!(SqliteAuditLog::open_read_only(&path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn concurrent_appends_are_all_kept() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(SqliteAuditLog::open(dir.path().join("audit.db")).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for j in 0..10 {
                        log.append(&LogRecord::recognized(&format!("u{}{}", i, j)))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(log.read_records().unwrap().len(), 40);
    }
}
