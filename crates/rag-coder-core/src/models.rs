//! Core data models used throughout RAG Coder.
//!
//! These types represent the codebook, the responses being coded, the
//! per-attempt model outcomes, and the audit records that flow through the
//! coding pipeline.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single coding category. Identity is `code_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodebookEntry {
    pub code_id: String,
    pub label: String,
    pub description: String,
    /// Example excerpts that were coded with this category.
    #[serde(default)]
    pub examples: Vec<String>,
}

impl CodebookEntry {
    pub fn new(code_id: &str, label: &str, description: &str) -> Self {
        Self {
            code_id: code_id.to_string(),
            label: label.to_string(),
            description: description.to_string(),
            examples: Vec::new(),
        }
    }
}

/// A free-text survey response to be coded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub response_id: String,
    pub raw_text: String,
    /// Respondent metadata carried through from the input file, unused by the engine.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ResponseRecord {
    pub fn new(response_id: &str, raw_text: &str) -> Self {
        Self {
            response_id: response_id.to_string(),
            raw_text: raw_text.to_string(),
            metadata: BTreeMap::new(),
        }
    }

    /// True when the response has no codeable content.
    pub fn is_blank(&self) -> bool {
        self.raw_text.trim().is_empty()
    }
}

/// How the grounding context for a prompt was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// The whole codebook fit under `max_full_codebook`.
    Full,
    /// Top-K entries by lexical overlap with the response.
    Ranked,
}

/// Codebook entries chosen as grounding for one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptContext {
    pub response_id: String,
    pub entries: Vec<CodebookEntry>,
    pub strategy: SelectionStrategy,
}

/// Failure taxonomy of the model boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    RateLimitExceeded,
    Timeout,
    Network,
    Auth,
    InvalidRequest,
    Unknown,
}

impl ErrorKind {
    /// Transient failures are retried by the gateway; the rest terminate at once.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimitExceeded | ErrorKind::Timeout | ErrorKind::Network
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimitExceeded => "RateLimitExceeded",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Network => "Network",
            ErrorKind::Auth => "Auth",
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single model invocation attempt.
///
/// `retry_count` is the number of attempts made before this one, so the
/// first attempt carries `0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelOutcome {
    Success {
        raw_text: String,
        latency_ms: u64,
        retry_count: u32,
    },
    Failure {
        error_kind: ErrorKind,
        message: String,
        retry_count: u32,
    },
}

impl ModelOutcome {
    pub fn retry_count(&self) -> u32 {
        match self {
            ModelOutcome::Success { retry_count, .. } | ModelOutcome::Failure { retry_count, .. } => {
                *retry_count
            }
        }
    }

    /// 1-based attempt number.
    pub fn attempt_number(&self) -> u32 {
        self.retry_count() + 1
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ModelOutcome::Success { .. })
    }

    /// Short label used in logs and the audit table.
    pub fn kind_label(&self) -> &'static str {
        match self {
            ModelOutcome::Success { .. } => "success",
            ModelOutcome::Failure { error_kind, .. } => error_kind.as_str(),
        }
    }
}

/// How a [`CodingAssignment`] came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    /// The model used the answer schema. The code list may be empty.
    Ok,
    /// The model answered but the schema was not recognizable.
    Unparseable,
    /// The model gateway ended in a terminal failure.
    ModelFailure,
    /// The response text was blank and was never sent to the model.
    EmptyResponse,
}

impl ParseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseStatus::Ok => "ok",
            ParseStatus::Unparseable => "unparseable",
            ParseStatus::ModelFailure => "model_failure",
            ParseStatus::EmptyResponse => "empty_response",
        }
    }
}

/// User-facing outcome category of an assignment.
///
/// Coded, explicitly uncoded, and failed responses are never conflated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignmentCategory {
    Coded,
    NoCode,
    Failed,
    Empty,
}

impl AssignmentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentCategory::Coded => "coded",
            AssignmentCategory::NoCode => "no_code",
            AssignmentCategory::Failed => "failed",
            AssignmentCategory::Empty => "empty",
        }
    }
}

/// Final coding decision for one response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodingAssignment {
    pub response_id: String,
    /// Ordered set of codebook ids, always a subset of the codebook.
    pub code_ids: Vec<String>,
    pub rationale: String,
    /// Verbatim spans of the response quoted by the model as evidence.
    #[serde(default)]
    pub evidence: Vec<String>,
    /// The model flagged its choice as a closest match rather than a clear fit.
    #[serde(default)]
    pub ambiguous: bool,
    pub parse_status: ParseStatus,
    /// Parser warnings, e.g. out-of-vocabulary ids that were dropped.
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl CodingAssignment {
    /// An assignment with no codes, the given rationale, and `status`.
    pub fn uncoded(response_id: &str, rationale: &str, status: ParseStatus) -> Self {
        Self {
            response_id: response_id.to_string(),
            code_ids: Vec::new(),
            rationale: rationale.to_string(),
            evidence: Vec::new(),
            ambiguous: false,
            parse_status: status,
            warnings: Vec::new(),
        }
    }

    /// Placeholder for a response whose model call never succeeded.
    pub fn model_failure(response_id: &str, message: &str) -> Self {
        Self::uncoded(response_id, message, ParseStatus::ModelFailure)
    }

    /// Assignment for a blank response that was never sent to the model.
    pub fn empty_response(response_id: &str) -> Self {
        Self::uncoded(response_id, "", ParseStatus::EmptyResponse)
    }

    pub fn category(&self) -> AssignmentCategory {
        match self.parse_status {
            ParseStatus::Ok if self.code_ids.is_empty() => AssignmentCategory::NoCode,
            ParseStatus::Ok => AssignmentCategory::Coded,
            ParseStatus::Unparseable | ParseStatus::ModelFailure => AssignmentCategory::Failed,
            ParseStatus::EmptyResponse => AssignmentCategory::Empty,
        }
    }
}

/// What the orchestrator derived from one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditParse {
    Assignment { assignment: CodingAssignment },
    Error { message: String },
}

/// One immutable entry in the audit trail, written per attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub batch_id: String,
    pub response_id: String,
    /// 1-based attempt number within this response's retry sequence.
    pub attempt_number: u32,
    /// When the attempt started; for blank responses, when the record was written.
    pub timestamp: DateTime<Utc>,
    pub prompt_text: String,
    /// SHA-256 of `prompt_text`, hex encoded.
    pub prompt_hash: String,
    /// `None` only for blank responses, which never reach the model.
    pub model_outcome: Option<ModelOutcome>,
    pub parsed: AuditParse,
    /// True for the last record of a response's attempt sequence.
    pub terminal: bool,
}

/// One row of the batch error report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReportEntry {
    pub response_id: String,
    /// An [`ErrorKind`] name, or `ParseError`.
    pub error_kind: String,
    pub message: String,
}

impl ErrorReportEntry {
    pub fn model_failure(response_id: &str, kind: ErrorKind, message: &str) -> Self {
        Self {
            response_id: response_id.to_string(),
            error_kind: kind.to_string(),
            message: message.to_string(),
        }
    }

    pub fn parse_failure(response_id: &str, message: &str) -> Self {
        Self {
            response_id: response_id.to_string(),
            error_kind: "ParseError".to_string(),
            message: message.to_string(),
        }
    }
}

/// Responses that ended in an unrecoverable failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub entries: Vec<ErrorReportEntry>,
}

impl ErrorReport {
    pub fn contains(&self, response_id: &str) -> bool {
        self.entries.iter().any(|e| e.response_id == response_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Whether a batch ran to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchStatus {
    Complete,
    /// Cancelled before every response was attempted.
    Incomplete {
        reason: String,
        skipped_response_ids: Vec<String>,
    },
}

/// Everything a batch run produces besides the audit log.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub batch_id: String,
    pub assignments: Vec<CodingAssignment>,
    pub error_report: ErrorReport,
    pub status: BatchStatus,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.status == BatchStatus::Complete
    }
}
