//! The `ragcoder run` command.
//!
//! Loads the inputs, opens the audit log, runs one batch through the
//! [`Orchestrator`], and writes the coded dataset and error report.
//!
//! A batch is cancelled by Ctrl-C or by `batch.time_budget_secs`; either
//! way in-flight responses finish and are audited before the command
//! returns.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use rag_coder_core::models::{AssignmentCategory, BatchOutcome, BatchStatus};

use crate::cancel::CancelSignal;
use crate::config::Config;
use crate::gateway::{self, ModelGateway};
use crate::input;
use crate::orchestrator::{BatchSettings, Orchestrator};
use crate::output;
use crate::progress::ProgressMode;
use crate::sqlite_audit::{BatchRun, SqliteAuditLog};
use crate::{db, migrate};

/// Options from the command line.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Code only the first `limit` responses.
    pub limit: Option<usize>,
    pub progress: ProgressMode,
}

/// Run one batch. Returns `true` when every response was attempted.
pub async fn run_batch(config: &Config, options: RunOptions) -> Result<bool> {
    let codebook = input::load_codebook(&config.codebook)?;
    let mut responses = input::load_responses(&config.responses)?;
    if let Some(limit) = options.limit {
        responses.truncate(limit);
    }

    let client = gateway::create_client(&config.gateway)?;
    let gateway = Arc::new(ModelGateway::from_config(client, &config.gateway));

    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let audit = Arc::new(SqliteAuditLog::new(pool.clone()));

    let batch_id = uuid::Uuid::new_v4().to_string();
    audit
        .record_batch_start(&BatchRun {
            batch_id: batch_id.clone(),
            provider: config.gateway.provider.clone(),
            model: config.gateway.model_name().to_string(),
            codebook_hash: file_hash(&config.codebook.path)?,
            responses_hash: file_hash(&config.responses.path)?,
            response_count: responses.len(),
        })
        .await?;

    let cancel = CancelSignal::new();
    let budget_task = config
        .batch
        .time_budget()
        .map(|budget| cancel.cancel_after(budget));
    let interrupt_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, finishing in-flight responses");
                cancel.cancel("interrupted by user");
            }
        })
    };

    let settings = BatchSettings {
        selection: config.context_selection.params(),
        instructions: config.prompt.instructions(),
        concurrency_limit: config.batch.concurrency_limit,
    };
    let orchestrator = Orchestrator::new(Arc::new(codebook), settings, gateway, audit.clone());
    let reporter = options.progress.reporter();
    let result = orchestrator
        .run(&batch_id, responses, &cancel, reporter.as_ref())
        .await;

    interrupt_task.abort();
    if let Some(task) = budget_task {
        task.abort();
    }

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            pool.close().await;
            return Err(e).with_context(|| format!("batch {} aborted", batch_id));
        }
    };

    let delimiter = config.output_delimiter();
    let error_path = config.output.error_report_path();
    output::write_assignments(&config.output.path, delimiter, &outcome.assignments)?;
    output::write_error_report(&error_path, delimiter, &outcome.error_report)?;
    audit.record_batch_end(&outcome).await?;

    print_summary(&outcome, &config.output.path, &error_path);

    pool.close().await;
    Ok(outcome.is_complete())
}

fn print_summary(outcome: &BatchOutcome, output_path: &Path, error_path: &Path) {
    let count = |category: AssignmentCategory| {
        outcome
            .assignments
            .iter()
            .filter(|a| a.category() == category)
            .count()
    };

    println!("Batch {}", outcome.batch_id);
    println!("  coded:    {}", count(AssignmentCategory::Coded));
    println!("  no code:  {}", count(AssignmentCategory::NoCode));
    println!("  failed:   {}", count(AssignmentCategory::Failed));
    println!("  empty:    {}", count(AssignmentCategory::Empty));
    println!("  results:  {}", output_path.display());
    println!(
        "  errors:   {} ({} entries)",
        error_path.display(),
        outcome.error_report.len()
    );
    if let BatchStatus::Incomplete {
        reason,
        skipped_response_ids,
    } = &outcome.status
    {
        println!(
            "  INCOMPLETE: {}; {} response(s) not attempted",
            reason,
            skipped_response_ids.len()
        );
    }
}

/// SHA-256 of a file's bytes, hex encoded.
fn file_hash(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}
