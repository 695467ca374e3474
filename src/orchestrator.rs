//! Batch orchestrator: codes every response with bounded concurrency.
//!
//! For each response the orchestrator selects context, builds the prompt,
//! calls the [`ModelGateway`], appends one audit record per attempt as soon
//! as that attempt finishes, and parses the terminal answer. Responses are independent: a failure on one
//! becomes a placeholder assignment plus an error report entry, and the
//! batch continues.
//!
//! # Failure scopes
//!
//! | Failure | Effect |
//! |---------|--------|
//! | transient model error | retried by the gateway |
//! | permanent model error, unparseable answer | per-response, batch continues |
//! | `Auth` model error, audit write failure | batch-fatal: cancel, drain, return `Err` |
//!
//! # Cancellation
//!
//! A [`CancelSignal`] (user interrupt or time budget) stops new responses
//! from starting. In-flight responses finish their current attempt without
//! scheduling further retries and are audited; responses that never started
//! are listed in [`BatchStatus::Incomplete`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use rag_coder_core::audit::AuditSink;
use rag_coder_core::models::{
    AuditParse, AuditRecord, BatchOutcome, BatchStatus, CodingAssignment, ErrorKind, ErrorReport,
    ErrorReportEntry, ModelOutcome, ResponseRecord,
};
use rag_coder_core::parse::{self, ParseOutcome};
use rag_coder_core::prompt::{self, Instructions};
use rag_coder_core::select::{self, SelectionParams};
use rag_coder_core::{Codebook, CodingError};

use crate::cancel::CancelSignal;
use crate::gateway::{Attempt, ModelGateway};
use crate::progress::{BatchProgressEvent, BatchProgressReporter};

/// Per-batch tuning.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub selection: SelectionParams,
    pub instructions: Instructions,
    /// Maximum responses in flight at once.
    pub concurrency_limit: usize,
}

/// What one response contributed to the batch.
struct ResponseResult {
    assignment: CodingAssignment,
    error: Option<ErrorReportEntry>,
}

/// Everything a coding task needs, shared across tasks.
struct Shared {
    batch_id: String,
    codebook: Arc<Codebook>,
    settings: BatchSettings,
    gateway: Arc<ModelGateway>,
    audit: Arc<dyn AuditSink>,
    cancel: CancelSignal,
}

/// Runs coding batches against one codebook, gateway, and audit log.
pub struct Orchestrator {
    codebook: Arc<Codebook>,
    settings: BatchSettings,
    gateway: Arc<ModelGateway>,
    audit: Arc<dyn AuditSink>,
}

impl Orchestrator {
    pub fn new(
        codebook: Arc<Codebook>,
        settings: BatchSettings,
        gateway: Arc<ModelGateway>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            codebook,
            settings,
            gateway,
            audit,
        }
    }

    /// Code every response in `responses`.
    ///
    /// On success the outcome holds exactly one assignment per started
    /// response, in input order.
    ///
    /// # Errors
    ///
    /// - [`CodingError::Schema`] for duplicate response ids.
    /// - [`CodingError::Config`] for an empty codebook, `k == 0`, or a zero
    ///   concurrency limit.
    /// - Batch-fatal errors ([`CodingError::is_batch_fatal`]) raised while
    ///   coding, after in-flight responses have drained.
    pub async fn run(
        &self,
        batch_id: &str,
        responses: Vec<ResponseRecord>,
        cancel: &CancelSignal,
        progress: &dyn BatchProgressReporter,
    ) -> Result<BatchOutcome, CodingError> {
        self.check_preconditions(&responses)?;

        let total = responses.len();
        tracing::info!(
            batch_id,
            responses = total,
            codebook = self.codebook.len(),
            concurrency = self.settings.concurrency_limit,
            model = self.gateway.model_name(),
            "starting batch"
        );
        progress.report(BatchProgressEvent::Started {
            batch_id: batch_id.to_string(),
            total: total as u64,
        });

        let shared = Arc::new(Shared {
            batch_id: batch_id.to_string(),
            codebook: self.codebook.clone(),
            settings: self.settings.clone(),
            gateway: self.gateway.clone(),
            audit: self.audit.clone(),
            cancel: cancel.clone(),
        });
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency_limit));

        let mut results: Vec<Option<ResponseResult>> = (0..total).map(|_| None).collect();
        let mut task_index = HashMap::new();
        let mut set = JoinSet::new();
        let mut fatal: Option<CodingError> = None;
        let mut finished = 0u64;
        let mut started = 0usize;
        let collect = Collect {
            responses: &responses,
            cancel,
            progress,
            total,
        };

        for (idx, response) in responses.iter().cloned().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            let shared = shared.clone();
            let handle = set.spawn(async move {
                let _permit = permit;
                let result = code_response(&shared, response).await;
                if let Err(e) = &result {
                    shared.cancel.cancel(e.to_string());
                }
                result
            });
            task_index.insert(handle.id(), idx);
            started += 1;

            while let Some(joined) = set.try_join_next_with_id() {
                collect.handle(joined, &task_index, &mut results, &mut fatal, &mut finished);
            }
        }

        if let Some(reason) = cancel.reason() {
            if started < total {
                progress.report(BatchProgressEvent::Cancelling { reason });
            }
        }

        while let Some(joined) = set.join_next_with_id().await {
            collect.handle(joined, &task_index, &mut results, &mut fatal, &mut finished);
        }

        if let Some(err) = fatal {
            tracing::error!(batch_id, "batch aborted: {}", err);
            return Err(err);
        }

        let mut assignments = Vec::with_capacity(started);
        let mut error_report = ErrorReport::default();
        let mut skipped = Vec::new();
        for (response, result) in responses.iter().zip(results) {
            match result {
                Some(r) => {
                    if let Some(entry) = r.error {
                        error_report.entries.push(entry);
                    }
                    assignments.push(r.assignment);
                }
                None => skipped.push(response.response_id.clone()),
            }
        }

        let status = if skipped.is_empty() {
            BatchStatus::Complete
        } else {
            BatchStatus::Incomplete {
                reason: cancel.reason().unwrap_or_else(|| "cancelled".to_string()),
                skipped_response_ids: skipped,
            }
        };

        tracing::info!(
            batch_id,
            assignments = assignments.len(),
            errors = error_report.len(),
            complete = matches!(status, BatchStatus::Complete),
            "batch finished"
        );

        Ok(BatchOutcome {
            batch_id: batch_id.to_string(),
            assignments,
            error_report,
            status,
        })
    }

    fn check_preconditions(&self, responses: &[ResponseRecord]) -> Result<(), CodingError> {
        if self.codebook.is_empty() {
            return Err(CodingError::Config("codebook has no entries".into()));
        }
        if self.settings.selection.k == 0 {
            return Err(CodingError::Config("context_selection.k must be >= 1".into()));
        }
        if self.settings.concurrency_limit == 0 {
            return Err(CodingError::Config("batch.concurrency_limit must be >= 1".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for r in responses {
            if !seen.insert(r.response_id.as_str()) {
                return Err(CodingError::Schema(format!(
                    "duplicate response_id '{}'",
                    r.response_id
                )));
            }
        }
        Ok(())
    }
}

/// Borrowed state for folding one finished task into the batch.
struct Collect<'a> {
    responses: &'a [ResponseRecord],
    cancel: &'a CancelSignal,
    progress: &'a dyn BatchProgressReporter,
    total: usize,
}

impl Collect<'_> {
    fn handle(
        &self,
        joined: Result<(tokio::task::Id, Result<ResponseResult, CodingError>), tokio::task::JoinError>,
        task_index: &HashMap<tokio::task::Id, usize>,
        results: &mut [Option<ResponseResult>],
        fatal: &mut Option<CodingError>,
        finished: &mut u64,
    ) {
        let (idx, result) = match joined {
            Ok((id, result)) => (task_index.get(&id).copied(), result),
            Err(e) => {
                let Some(idx) = task_index.get(&e.id()).copied() else {
                    return;
                };
                let response_id = &self.responses[idx].response_id;
                let message = format!("coding task failed: {}", e);
                tracing::error!(response_id = %response_id, "{}", message);
                let result = ResponseResult {
                    assignment: CodingAssignment::model_failure(response_id, &message),
                    error: Some(ErrorReportEntry::model_failure(
                        response_id,
                        ErrorKind::Unknown,
                        &message,
                    )),
                };
                (Some(idx), Ok(result))
            }
        };
        let Some(idx) = idx else {
            return;
        };

        match result {
            Ok(r) => {
                *finished += 1;
                self.progress.report(BatchProgressEvent::Coded {
                    response_id: r.assignment.response_id.clone(),
                    outcome: r.assignment.category().as_str(),
                    n: *finished,
                    total: self.total as u64,
                });
                results[idx] = Some(r);
            }
            Err(e) => {
                tracing::error!(
                    response_id = %self.responses[idx].response_id,
                    "batch-fatal error: {}",
                    e
                );
                self.cancel.cancel(e.to_string());
                if fatal.is_none() {
                    *fatal = Some(e);
                }
            }
        }
    }
}

/// Code one response end to end, auditing every attempt.
async fn code_response(
    shared: &Shared,
    response: ResponseRecord,
) -> Result<ResponseResult, CodingError> {
    let response_id = response.response_id.as_str();

    if response.is_blank() {
        tracing::debug!(response_id, "blank response, not sent to model");
        let assignment = CodingAssignment::empty_response(response_id);
        shared
            .audit
            .append(&AuditRecord {
                batch_id: shared.batch_id.clone(),
                response_id: response_id.to_string(),
                attempt_number: 1,
                timestamp: Utc::now(),
                prompt_text: String::new(),
                prompt_hash: prompt::prompt_hash(""),
                model_outcome: None,
                parsed: AuditParse::Assignment {
                    assignment: assignment.clone(),
                },
                terminal: true,
            })
            .await?;
        return Ok(ResponseResult {
            assignment,
            error: None,
        });
    }

    let context = select::select(&response, &shared.codebook, &shared.settings.selection)?;
    let prompt_text = prompt::build(&response, &context, &shared.settings.instructions);
    let prompt_hash = prompt::prompt_hash(&prompt_text);
    tracing::debug!(
        response_id,
        candidates = context.entries.len(),
        strategy = ?context.strategy,
        "prompt built"
    );

    let mut attempts = shared.gateway.generate(&prompt_text);
    let mut outcome: Option<ResponseResult> = None;
    let mut auth_failure: Option<String> = None;

    while let Some(attempt) = attempts.next(&shared.cancel).await {
        let Attempt {
            outcome: model_outcome,
            started_at,
            terminal,
            retry_cancelled,
        } = attempt;

        let parsed = match &model_outcome {
            ModelOutcome::Success { raw_text, .. } => {
                let parsed = parse::parse(response_id, raw_text, &shared.codebook);
                let error = match &parsed {
                    ParseOutcome::Parsed(_) => None,
                    ParseOutcome::Unparseable { reason, .. } => {
                        tracing::warn!(response_id, "unparseable model answer: {}", reason);
                        Some(ErrorReportEntry::parse_failure(response_id, reason))
                    }
                };
                let assignment = parsed.into_assignment();
                outcome = Some(ResponseResult {
                    assignment: assignment.clone(),
                    error,
                });
                AuditParse::Assignment { assignment }
            }
            ModelOutcome::Failure {
                error_kind,
                message,
                ..
            } => {
                if terminal {
                    let mut summary = format!(
                        "{} after {} attempt(s): {}",
                        error_kind,
                        model_outcome.attempt_number(),
                        message
                    );
                    if retry_cancelled {
                        summary.push_str(" (retries stopped by cancellation)");
                    }
                    if *error_kind == ErrorKind::Auth {
                        auth_failure = Some(message.clone());
                    }
                    outcome = Some(ResponseResult {
                        assignment: CodingAssignment::model_failure(response_id, &summary),
                        error: Some(ErrorReportEntry::model_failure(
                            response_id,
                            *error_kind,
                            &summary,
                        )),
                    });
                }
                AuditParse::Error {
                    message: message.clone(),
                }
            }
        };

        shared
            .audit
            .append(&AuditRecord {
                batch_id: shared.batch_id.clone(),
                response_id: response_id.to_string(),
                attempt_number: model_outcome.attempt_number(),
                timestamp: started_at,
                prompt_text: prompt_text.clone(),
                prompt_hash: prompt_hash.clone(),
                model_outcome: Some(model_outcome),
                parsed,
                terminal,
            })
            .await?;
    }

    if let Some(message) = auth_failure {
        return Err(CodingError::Model {
            kind: ErrorKind::Auth,
            message,
        });
    }

    Ok(outcome.unwrap_or_else(|| {
        let message = "model gateway made no attempt";
        ResponseResult {
            assignment: CodingAssignment::model_failure(response_id, message),
            error: Some(ErrorReportEntry::model_failure(
                response_id,
                ErrorKind::Unknown,
                message,
            )),
        }
    }))
}
