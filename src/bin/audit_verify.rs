//! audit_verify - external verifier for the SQLite audit log hash chain
//!
//! Recomputes every entry hash from its payload and predecessor, so edits,
//! deletions and reordering of audit records are detected without trusting
//! the daemon that wrote them.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use facegate::audit::SqliteAuditLog;
use facegate::verify::verify_chain_with;

#[derive(Parser, Debug)]
#[command(
    name = "audit_verify",
    about = "Verify facegate audit log integrity (hash chain)"
)]
struct Args {
    /// Path to the audit SQLite DB
    #[arg(long, env = "FACEGATE_AUDIT_DB", default_value = "facegate_audit.db")]
    db: PathBuf,

    /// Print every verified entry
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    if !args.db.is_file() {
        return Err(anyhow!("audit db {} does not exist", args.db.display()));
    }
    let log = SqliteAuditLog::open_read_only(&args.db)?;

    println!("audit_verify: checking {}", args.db.display());
    let report = log.with_conn(|conn| {
        verify_chain_with(conn, |id, entry_hash| {
            if args.verbose {
                println!("  record {}: hash={} OK", id, &hex::encode(entry_hash)[..16]);
            }
        })
    })?;

    println!("verified {} audit records", report.records);
    println!("chain head: {}", hex::encode(report.head));
    println!("OK: audit chain verified.");
    Ok(())
}
