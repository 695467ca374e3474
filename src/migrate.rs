//! Audit database schema.
//!
//! All tables are append-only: `BEFORE UPDATE` and `BEFORE DELETE`
//! triggers abort any attempt to rewrite history. Running the migrations
//! more than once is safe.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create tables, indexes, and append-only triggers on an open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // One row per coding attempt
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_records (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            batch_id TEXT NOT NULL,
            response_id TEXT NOT NULL,
            attempt_number INTEGER NOT NULL,
            recorded_at TEXT NOT NULL,
            prompt_text TEXT NOT NULL,
            prompt_hash TEXT NOT NULL,
            outcome_kind TEXT NOT NULL,
            outcome_json TEXT,
            parsed_json TEXT NOT NULL,
            terminal INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Batch start markers
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batch_runs (
            batch_id TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            provider TEXT NOT NULL,
            model TEXT NOT NULL,
            codebook_hash TEXT NOT NULL,
            responses_hash TEXT NOT NULL,
            response_count INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Batch end markers; absent for batches that died on a fatal error
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batch_summaries (
            batch_id TEXT PRIMARY KEY,
            finished_at TEXT NOT NULL,
            status TEXT NOT NULL,
            assignments INTEGER NOT NULL,
            errors INTEGER NOT NULL,
            skipped INTEGER NOT NULL,
            detail TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    for table in ["audit_records", "batch_runs", "batch_summaries"] {
        sqlx::query(&format!(
            "CREATE TRIGGER IF NOT EXISTS {table}_no_update BEFORE UPDATE ON {table} \
             BEGIN SELECT RAISE(ABORT, '{table} is append-only'); END"
        ))
        .execute(pool)
        .await?;
        sqlx::query(&format!(
            "CREATE TRIGGER IF NOT EXISTS {table}_no_delete BEFORE DELETE ON {table} \
             BEGIN SELECT RAISE(ABORT, '{table} is append-only'); END"
        ))
        .execute(pool)
        .await?;
    }

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_audit_response ON audit_records(batch_id, response_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
