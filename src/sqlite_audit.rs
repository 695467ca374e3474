//! SQLite-backed [`AuditSink`] implementation.
//!
//! Appends go through a WAL-mode [`SqlitePool`]; SQLite serializes writers,
//! so concurrent appends from in-flight responses are safe. The schema's
//! triggers (see [`crate::migrate`]) reject any `UPDATE` or `DELETE`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use rag_coder_core::audit::AuditSink;
use rag_coder_core::models::{AuditParse, AuditRecord, BatchOutcome, BatchStatus, ModelOutcome};
use rag_coder_core::CodingError;

/// Metadata written when a batch starts.
#[derive(Debug, Clone)]
pub struct BatchRun {
    pub batch_id: String,
    pub provider: String,
    pub model: String,
    pub codebook_hash: String,
    pub responses_hash: String,
    pub response_count: usize,
}

/// SQLite implementation of the [`AuditSink`] trait.
pub struct SqliteAuditLog {
    pool: SqlitePool,
}

impl SqliteAuditLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Record that a batch has started.
    pub async fn record_batch_start(&self, run: &BatchRun) -> Result<(), CodingError> {
        sqlx::query(
            r#"
            INSERT INTO batch_runs (batch_id, started_at, provider, model,
                                    codebook_hash, responses_hash, response_count)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.batch_id)
        .bind(Utc::now().to_rfc3339())
        .bind(&run.provider)
        .bind(&run.model)
        .bind(&run.codebook_hash)
        .bind(&run.responses_hash)
        .bind(run.response_count as i64)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(())
    }

    /// Record how a batch ended.
    pub async fn record_batch_end(&self, outcome: &BatchOutcome) -> Result<(), CodingError> {
        let (status, skipped, detail) = match &outcome.status {
            BatchStatus::Complete => ("complete", 0usize, None),
            BatchStatus::Incomplete {
                reason,
                skipped_response_ids,
            } => ("incomplete", skipped_response_ids.len(), Some(reason.clone())),
        };
        sqlx::query(
            r#"
            INSERT INTO batch_summaries (batch_id, finished_at, status, assignments,
                                         errors, skipped, detail)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&outcome.batch_id)
        .bind(Utc::now().to_rfc3339())
        .bind(status)
        .bind(outcome.assignments.len() as i64)
        .bind(outcome.error_report.len() as i64)
        .bind(skipped as i64)
        .bind(detail)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(())
    }

    /// Read records back in append order, optionally for one batch.
    pub async fn read_records(&self, batch_id: Option<&str>) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT batch_id, response_id, attempt_number, recorded_at, prompt_text,
                   prompt_hash, outcome_json, parsed_json, terminal
            FROM audit_records
            WHERE (?1 IS NULL OR batch_id = ?1)
            ORDER BY seq
            "#,
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let recorded_at: String = row.get("recorded_at");
            let outcome_json: Option<String> = row.get("outcome_json");
            let parsed_json: String = row.get("parsed_json");
            let attempt: i64 = row.get("attempt_number");
            let terminal: i64 = row.get("terminal");

            let model_outcome: Option<ModelOutcome> = match outcome_json {
                Some(json) => Some(serde_json::from_str(&json)?),
                None => None,
            };
            let parsed: AuditParse = serde_json::from_str(&parsed_json)?;

            records.push(AuditRecord {
                batch_id: row.get("batch_id"),
                response_id: row.get("response_id"),
                attempt_number: attempt as u32,
                timestamp: chrono::DateTime::parse_from_rfc3339(&recorded_at)?.with_timezone(&Utc),
                prompt_text: row.get("prompt_text"),
                prompt_hash: row.get("prompt_hash"),
                model_outcome,
                parsed,
                terminal: terminal != 0,
            });
        }
        Ok(records)
    }
}

fn persistence(e: impl std::fmt::Display) -> CodingError {
    CodingError::Persistence(e.to_string())
}

#[async_trait]
impl AuditSink for SqliteAuditLog {
    async fn append(&self, record: &AuditRecord) -> Result<(), CodingError> {
        let outcome_kind = record
            .model_outcome
            .as_ref()
            .map(|o| o.kind_label())
            .unwrap_or("skipped");
        let outcome_json = record
            .model_outcome
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(persistence)?;
        let parsed_json = serde_json::to_string(&record.parsed).map_err(persistence)?;

        sqlx::query(
            r#"
            INSERT INTO audit_records (batch_id, response_id, attempt_number, recorded_at,
                                       prompt_text, prompt_hash, outcome_kind, outcome_json,
                                       parsed_json, terminal)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.batch_id)
        .bind(&record.response_id)
        .bind(record.attempt_number as i64)
        .bind(record.timestamp.to_rfc3339())
        .bind(&record.prompt_text)
        .bind(&record.prompt_hash)
        .bind(outcome_kind)
        .bind(outcome_json)
        .bind(parsed_json)
        .bind(record.terminal as i64)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;

        Ok(())
    }
}
