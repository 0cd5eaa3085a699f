//! audit_report - recognition counts per person from the audit log

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use facegate::artifact::write_atomic;
use facegate::audit::{read_csv_records, SqliteAuditLog};
use facegate::report::{recognition_counts, render_table};
use facegate::LogRecord;

#[derive(Parser, Debug)]
#[command(
    name = "audit_report",
    about = "Summarize recognitions per person from a facegate audit log"
)]
struct Args {
    /// CSV audit log
    #[arg(long, env = "FACEGATE_AUDIT_CSV")]
    csv: Option<PathBuf>,

    /// SQLite audit log; takes precedence over `--csv`
    #[arg(long)]
    db: Option<PathBuf>,

    /// Also write the counts as JSON to this path
    #[arg(long, value_name = "PATH")]
    json: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let records = load_records(&args)?;
    let counts = recognition_counts(&records);

    println!(
        "audit_report: {} records, {} recognized identities",
        records.len(),
        counts.len()
    );
    if counts.is_empty() {
        println!("no recognitions recorded");
    } else {
        print!("{}", render_table(&counts));
    }

    if let Some(path) = &args.json {
        let json = serde_json::to_vec_pretty(&counts)?;
        write_atomic(path, &json).with_context(|| format!("write {}", path.display()))?;
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn load_records(args: &Args) -> Result<Vec<LogRecord>> {
    match (&args.csv, &args.db) {
        (_, Some(db)) => {
            if !db.is_file() {
                return Err(anyhow!("audit db {} does not exist", db.display()));
            }
            SqliteAuditLog::open_read_only(db)?.read_records()
        }
        (Some(csv), None) => read_csv_records(csv),
        (None, None) => Err(anyhow!("pass --csv or --db")),
    }
}
