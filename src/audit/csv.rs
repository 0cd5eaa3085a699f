use anyhow::{anyhow, Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{AuditSink, LogRecord};

const HEADER: &str = "Timestamp,Name,Status\n";

/// Dashboard-compatible CSV audit log.
///
/// The file is opened in append mode and each record is written with a single
/// `write_all` under the lock, so concurrent appends never interleave.
pub struct CsvAuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl CsvAuditLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open audit csv {}", path.display()))?;
        let len = file
            .metadata()
            .with_context(|| format!("stat audit csv {}", path.display()))?
            .len();
        if len == 0 {
            file.write_all(HEADER.as_bytes())
                .with_context(|| format!("write audit csv header {}", path.display()))?;
        }
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for CsvAuditLog {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn append(&self, record: &LogRecord) -> Result<()> {
        let line = format!(
            "{},{},{}\n",
            csv_field(&record.timestamp),
            csv_field(&record.name),
            csv_field(record.status.as_str())
        );
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("audit csv lock poisoned"))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append to {}", self.path.display()))?;
        file.flush()?;
        Ok(())
    }
}

/// Read every record from a CSV audit log written by `CsvAuditLog`.
pub fn read_csv_records(path: impl AsRef<Path>) -> Result<Vec<LogRecord>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read audit csv {}", path.display()))?;
    let mut records = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        if line.trim().is_empty() || (idx == 0 && line.starts_with("Timestamp")) {
            continue;
        }
        let fields = split_csv_line(line);
        let [timestamp, name, status] = fields.as_slice() else {
            return Err(anyhow!(
                "{}:{}: expected 3 fields, found {}",
                path.display(),
                idx + 1,
                fields.len()
            ));
        };
        records.push(LogRecord {
            timestamp: timestamp.clone(),
            name: name.clone(),
            status: status
                .parse()
                .with_context(|| format!("{}:{}", path.display(), idx + 1))?,
        });
    }
    Ok(records)
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, quoted) {
            ('"', true) if chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            ('"', _) => quoted = !quoted,
            (',', false) => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}
