//! Export the audit trail as JSON Lines.
//!
//! One [`AuditRecord`](rag_coder_core::models::AuditRecord) per line, in
//! append order, so a reviewer can replay every prompt and model answer
//! behind a coding decision without opening the SQLite file.

use anyhow::Result;
use std::io::Write;
use std::path::Path;

use crate::config::Config;
use crate::db;
use crate::sqlite_audit::SqliteAuditLog;

/// Export audit records, optionally restricted to one batch.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub async fn run_export(config: &Config, output: Option<&Path>, batch: Option<&str>) -> Result<()> {
    let pool = db::connect(config).await?;
    let log = SqliteAuditLog::new(pool.clone());
    let records = log.read_records(batch).await?;

    let mut lines = String::new();
    for record in &records {
        lines.push_str(&serde_json::to_string(record)?);
        lines.push('\n');
    }

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &lines)?;
            eprintln!(
                "Exported {} audit records to {}",
                records.len(),
                path.display()
            );
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(lines.as_bytes())?;
            stdout.flush()?;
        }
    }

    pool.close().await;
    Ok(())
}
