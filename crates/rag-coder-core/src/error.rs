//! Typed error taxonomy for the coding engine.
//!
//! Parse failures are deliberately absent: an unrecognizable model answer
//! is recorded as [`ParseStatus::Unparseable`](crate::models::ParseStatus)
//! data, not raised as an error.

use thiserror::Error;

use crate::models::ErrorKind;

/// Errors raised by the coding engine.
///
/// | Variant | Scope |
/// |---------|-------|
/// | `Schema` | fatal, raised before any model call |
/// | `Config` | fatal |
/// | `Model` | batch-fatal only for [`ErrorKind::Auth`]; otherwise per-response |
/// | `Persistence` | batch-fatal |
#[derive(Debug, Error)]
pub enum CodingError {
    #[error("schema error: {0}")]
    Schema(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("model error ({kind}): {message}")]
    Model { kind: ErrorKind, message: String },

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl CodingError {
    /// Whether this error must stop the whole batch.
    pub fn is_batch_fatal(&self) -> bool {
        match self {
            CodingError::Schema(_) | CodingError::Config(_) | CodingError::Persistence(_) => true,
            CodingError::Model { kind, .. } => *kind == ErrorKind::Auth,
        }
    }
}

pub type Result<T> = std::result::Result<T, CodingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_is_batch_fatal_but_timeout_is_not() {
        let auth = CodingError::Model {
            kind: ErrorKind::Auth,
            message: "bad key".into(),
        };
        let timeout = CodingError::Model {
            kind: ErrorKind::Timeout,
            message: "slow".into(),
        };
        assert!(auth.is_batch_fatal());
        assert!(!timeout.is_batch_fatal());
        assert!(CodingError::Persistence("disk full".into()).is_batch_fatal());
    }

    #[test]
    fn display_includes_kind() {
        let err = CodingError::Model {
            kind: ErrorKind::RateLimitExceeded,
            message: "429".into(),
        };
        assert_eq!(err.to_string(), "model error (RateLimitExceeded): 429");
    }
}
