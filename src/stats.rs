//! Audit log statistics.
//!
//! Summarizes what the audit log holds: record counts, outcome breakdowns,
//! and one line per batch. Used by `ragcoder stats` to confirm that runs
//! finished and to spot batches with many failures.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

/// One batch as recorded in `batch_runs` / `batch_summaries`.
struct BatchLine {
    batch_id: String,
    started_at: String,
    model: String,
    responses: i64,
    status: Option<String>,
    assignments: Option<i64>,
    errors: Option<i64>,
    skipped: Option<i64>,
}

/// Run the stats command: query the audit log and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total_records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_records")
        .fetch_one(&pool)
        .await?;

    let total_batches: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM batch_runs")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.audit.log_path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("RAG Coder — Audit Log Stats");
    println!("===========================");
    println!();
    println!("  Audit log:   {}", config.audit.log_path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Batches:     {}", total_batches);
    println!("  Records:     {}", total_records);

    let outcome_rows = sqlx::query(
        r#"
        SELECT outcome_kind, COUNT(*) AS n
        FROM audit_records
        GROUP BY outcome_kind
        ORDER BY n DESC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    if !outcome_rows.is_empty() {
        println!();
        println!("  By attempt outcome:");
        for row in &outcome_rows {
            let kind: String = row.get("outcome_kind");
            let n: i64 = row.get("n");
            println!("    {:<22} {:>8}", kind, n);
        }
    }

    let batch_rows = sqlx::query(
        r#"
        SELECT r.batch_id, r.started_at, r.model, r.response_count,
               s.status, s.assignments, s.errors, s.skipped
        FROM batch_runs r
        LEFT JOIN batch_summaries s ON s.batch_id = r.batch_id
        ORDER BY r.started_at DESC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let batches: Vec<BatchLine> = batch_rows
        .iter()
        .map(|row| BatchLine {
            batch_id: row.get("batch_id"),
            started_at: row.get("started_at"),
            model: row.get("model"),
            responses: row.get("response_count"),
            status: row.get("status"),
            assignments: row.get("assignments"),
            errors: row.get("errors"),
            skipped: row.get("skipped"),
        })
        .collect();

    if !batches.is_empty() {
        println!();
        println!("  By batch:");
        println!(
            "  {:<36} {:<17} {:<20} {:>6} {:>6} {:>6} {:>7}  {}",
            "BATCH", "STARTED", "MODEL", "RESP", "CODED", "ERRORS", "SKIPPED", "STATUS"
        );
        println!("  {}", "-".repeat(120));

        for b in &batches {
            println!(
                "  {:<36} {:<17} {:<20} {:>6} {:>6} {:>6} {:>7}  {}",
                b.batch_id,
                format_started(&b.started_at),
                b.model,
                b.responses,
                display_count(b.assignments),
                display_count(b.errors),
                display_count(b.skipped),
                b.status.as_deref().unwrap_or("unfinished")
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

fn display_count(n: Option<i64>) -> String {
    n.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string())
}

fn format_started(rfc3339: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(rfc3339)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|_| rfc3339.to_string())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn started_falls_back_to_raw_text() {
        assert_eq!(format_started("2026-03-01T09:15:00+00:00"), "2026-03-01 09:15");
        assert_eq!(format_started("yesterday"), "yesterday");
    }
}
