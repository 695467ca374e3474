//! Model gateway: retry, backoff, pacing, and timing around a [`ModelClient`].
//!
//! The gateway owns the attempt loop for one prompt. [`ModelGateway::generate`]
//! returns an [`Attempts`] sequence that drives the [`AttemptState`] machine
//! from `rag_coder_core::retry`: each call to [`Attempts::next`] sleeps the
//! jittered backoff if a retry is due, makes one model call, and hands the
//! [`Attempt`] back so the caller can audit it before the next one starts.
//!
//! Once the [`CancelSignal`] fires, no further retry is scheduled and the
//! attempt just made becomes the terminal one.
//!
//! # Providers
//!
//! Use [`create_client`] to build the HTTP client named by
//! `gateway.provider`:
//!
//! | Config Value | Client | Credentials |
//! |-------------|--------|-------------|
//! | `"gemini"` | [`GeminiClient`] | `GOOGLE_API_KEY` |
//! | `"openai"` | [`OpenAIClient`] | `OPENAI_API_KEY` |
//! | `"ollama"` | [`OllamaClient`] | none |

pub mod providers;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use rag_coder_core::model::ModelClient;
use rag_coder_core::models::{ErrorKind, ModelOutcome};
use rag_coder_core::retry::{AttemptResult, AttemptState, RetryPolicy};

use crate::cancel::CancelSignal;
use crate::config::GatewayConfig;

pub use providers::{GeminiClient, OllamaClient, OpenAIClient};

/// One model call and when it started.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub outcome: ModelOutcome,
    pub started_at: DateTime<Utc>,
    /// No further attempt follows this one.
    pub terminal: bool,
    /// A retry was due but the batch was cancelled.
    pub retry_cancelled: bool,
}

/// Shared entry point to the model, one per batch.
pub struct ModelGateway {
    client: Arc<dyn ModelClient>,
    policy: RetryPolicy,
    timeout: Duration,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl ModelGateway {
    pub fn new(client: Arc<dyn ModelClient>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            client,
            policy,
            timeout,
            min_interval: Duration::ZERO,
            last_request: Mutex::new(None),
        }
    }

    /// Build a gateway from the `[gateway]` section.
    pub fn from_config(client: Arc<dyn ModelClient>, config: &GatewayConfig) -> Self {
        Self::new(
            client,
            config.retry_policy(),
            Duration::from_secs(config.timeout_secs),
        )
        .with_min_interval(Duration::from_millis(config.min_request_interval_ms))
    }

    /// Space consecutive requests at least `interval` apart, across all tasks.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn model_name(&self) -> &str {
        self.client.model_name()
    }

    /// Start the attempt sequence for `prompt`.
    ///
    /// Nothing is sent until [`Attempts::next`] is awaited.
    pub fn generate<'a>(&'a self, prompt: &'a str) -> Attempts<'a> {
        Attempts {
            gateway: self,
            prompt,
            state: AttemptState::Pending,
            stopped: false,
        }
    }

    async fn attempt(&self, prompt: &str, retry_count: u32) -> ModelOutcome {
        self.pace().await;

        let started = Instant::now();
        let result = tokio::time::timeout(self.timeout, self.client.complete(prompt)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(raw_text)) => ModelOutcome::Success {
                raw_text,
                latency_ms,
                retry_count,
            },
            Ok(Err(e)) => ModelOutcome::Failure {
                error_kind: e.kind,
                message: e.message,
                retry_count,
            },
            Err(_) => ModelOutcome::Failure {
                error_kind: ErrorKind::Timeout,
                message: format!("no response within {}s", self.timeout.as_secs_f64()),
                retry_count,
            },
        }
    }

    async fn pace(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Attempts for one prompt, until success, a permanent failure, exhausted
/// retries, or cancellation.
pub struct Attempts<'a> {
    gateway: &'a ModelGateway,
    prompt: &'a str,
    state: AttemptState,
    stopped: bool,
}

impl Attempts<'_> {
    /// Make the next attempt, or return `None` once the sequence is over.
    pub async fn next(&mut self, cancel: &CancelSignal) -> Option<Attempt> {
        if self.stopped || self.state.is_terminal() {
            return None;
        }

        let failed_so_far = self.state.attempts_made();
        if failed_so_far > 0 {
            let delay = self.gateway.policy.delay_for(failed_so_far);
            tracing::debug!(attempt = failed_so_far + 1, ?delay, "backing off");
            tokio::time::sleep(delay).await;
        }

        let started_at = Utc::now();
        let outcome = self.gateway.attempt(self.prompt, failed_so_far).await;
        let result = match &outcome {
            ModelOutcome::Success { .. } => AttemptResult::Ok,
            ModelOutcome::Failure {
                error_kind,
                message,
                ..
            } => {
                tracing::warn!(
                    attempt = failed_so_far + 1,
                    kind = %error_kind,
                    "model call failed: {}",
                    message
                );
                AttemptResult::Err(*error_kind)
            }
        };
        self.state = self.state.clone().next(result, &self.gateway.policy);

        if !self.state.is_terminal() && cancel.is_cancelled() {
            tracing::info!(attempt = failed_so_far + 1, "cancelled, not retrying");
            self.stopped = true;
        }

        Some(Attempt {
            outcome,
            started_at,
            terminal: self.stopped || self.state.is_terminal(),
            retry_cancelled: self.stopped,
        })
    }
}

/// Create the [`ModelClient`] named by `config.provider`.
///
/// # Errors
///
/// Returns an error for unknown providers, a missing model name, or a
/// missing API key.
pub fn create_client(config: &GatewayConfig) -> Result<Arc<dyn ModelClient>> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiClient::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIClient::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaClient::new(config)?)),
        other => bail!("Unknown gateway provider: {}", other),
    }
}
