//! The generative-model capability.
//!
//! [`ModelClient`] is the opaque `(prompt) -> raw text` function behind the
//! model gateway. Implementations make exactly one request per call and
//! classify failures into [`ErrorKind`]s; retrying is the gateway's job.

use async_trait::async_trait;
use std::fmt;

use crate::models::ErrorKind;

/// A classified failure from a single model call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCallError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ModelCallError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ModelCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ModelCallError {}

/// A generative model reachable over some transport.
///
/// Constructed once per batch run and shared by reference; there is no
/// ambient global client.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Model identifier recorded in logs (e.g. `"gemini-1.5-pro"`).
    fn model_name(&self) -> &str;

    /// Issue one generation request.
    async fn complete(&self, prompt: &str) -> Result<String, ModelCallError>;
}
