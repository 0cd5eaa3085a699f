//! Append-only audit log of recognition outcomes.
//!
//! Every completed recognition produces exactly one `LogRecord`
//! `{Timestamp, Name, Status}`. Sinks implement `AuditSink::append` as a single
//! serialized append; there is no read-modify-write of the whole log, so
//! concurrent completions cannot lose each other's records.
//!
//! Sinks:
//! - `CsvAuditLog`: `Timestamp,Name,Status` CSV consumed by the dashboard
//! - `SqliteAuditLog`: hash-chained SQLite table (tamper-evident)
//! - `MemoryAuditLog`: in-process, for tests and dry runs
//! - `FanoutAuditLog`: appends to several sinks

mod csv;
mod sqlite;

pub use csv::{read_csv_records, CsvAuditLog};
pub use sqlite::SqliteAuditLog;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use crate::vision::NOT_RECOGNIZED;

/// Local wall-clock format used in the `Timestamp` column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecognitionStatus {
    #[serde(rename = "Recognized")]
    Recognized,
    #[serde(rename = "Not Recognized")]
    NotRecognized,
}

impl RecognitionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recognized => "Recognized",
            Self::NotRecognized => NOT_RECOGNIZED,
        }
    }
}

impl fmt::Display for RecognitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecognitionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "Recognized" => Ok(Self::Recognized),
            "Not Recognized" => Ok(Self::NotRecognized),
            other => Err(anyhow!("unknown recognition status '{}'", other)),
        }
    }
}

/// One audit entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Status")]
    pub status: RecognitionStatus,
}

impl LogRecord {
    /// Record stamped with the current local time.
    pub fn now(name: &str, status: RecognitionStatus) -> Self {
        Self {
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
            name: name.to_string(),
            status,
        }
    }

    pub fn recognized(name: &str) -> Self {
        Self::now(name, RecognitionStatus::Recognized)
    }

    pub fn not_recognized() -> Self {
        Self::now(NOT_RECOGNIZED, RecognitionStatus::NotRecognized)
    }
}

/// Destination for audit records. Appends may arrive from many threads at once.
pub trait AuditSink: Send + Sync {
    fn name(&self) -> &'static str;

    fn append(&self, record: &LogRecord) -> Result<()>;
}

/// In-memory audit log.
#[derive(Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditLog {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn append(&self, record: &LogRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow!("memory audit log lock poisoned"))?
            .push(record.clone());
        Ok(())
    }
}

/// Appends each record to every configured sink.
///
/// A failing sink does not stop the others; the first error is returned after
/// all sinks were attempted.
pub struct FanoutAuditLog {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditLog {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl AuditSink for FanoutAuditLog {
    fn name(&self) -> &'static str {
        "fanout"
    }

    fn append(&self, record: &LogRecord) -> Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.append(record) {
                let e = e.context(format!("{} audit sink", sink.name()));
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Hashes an audit payload with the previous chain hash.
pub fn hash_entry(prev_hash: &[u8; 32], payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash);
    hasher.update(payload);
    hasher.finalize().into()
}
