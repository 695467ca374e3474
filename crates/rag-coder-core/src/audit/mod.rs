//! Audit trail abstraction.
//!
//! The [`AuditSink`] trait is the only way coding decisions are persisted.
//! `append` is the sole mutation: implementations never reorder, rewrite,
//! or delete earlier records, and must tolerate concurrent callers.
//!
//! Each response's attempts are appended by a single task in attempt
//! order, so per-response ordering holds even when records from different
//! responses interleave.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::AuditRecord;

pub use memory::InMemoryAuditLog;

/// Append-only, durable audit log.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append one record.
    ///
    /// # Errors
    ///
    /// [`CodingError::Persistence`](crate::CodingError::Persistence) if the
    /// underlying store cannot be written. Callers treat this as batch-fatal.
    async fn append(&self, record: &AuditRecord) -> Result<()>;
}
