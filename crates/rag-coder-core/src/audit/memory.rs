//! In-memory [`AuditSink`] for tests and dry runs.
//!
//! Records live in a `Vec` behind a `std::sync::Mutex`. A sink can be
//! switched into a failing mode to exercise persistence-error handling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{CodingError, Result};
use crate::models::AuditRecord;

use super::AuditSink;

/// In-memory audit log.
#[derive(Default)]
pub struct InMemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
    fail_writes: AtomicBool,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `append` fail with a persistence error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of all records in append order.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Records for one response, in append order.
    pub fn records_for(&self, response_id: &str) -> Vec<AuditRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.response_id == response_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditLog {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CodingError::Persistence(
                "in-memory audit log is read-only".to_string(),
            ));
        }
        let mut records = self
            .records
            .lock()
            .map_err(|_| CodingError::Persistence("audit log lock poisoned".to_string()))?;
        records.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuditParse, CodingAssignment};
    use chrono::Utc;

    fn record(response_id: &str, attempt: u32) -> AuditRecord {
        AuditRecord {
            batch_id: "b1".into(),
            response_id: response_id.into(),
            attempt_number: attempt,
            timestamp: Utc::now(),
            prompt_text: String::new(),
            prompt_hash: String::new(),
            model_outcome: None,
            parsed: AuditParse::Assignment {
                assignment: CodingAssignment::empty_response(response_id),
            },
            terminal: true,
        }
    }

    #[tokio::test]
    async fn appends_in_order() {
        let log = InMemoryAuditLog::new();
        log.append(&record("a", 1)).await.unwrap();
        log.append(&record("b", 1)).await.unwrap();
        log.append(&record("a", 2)).await.unwrap();

        let a: Vec<u32> = log.records_for("a").iter().map(|r| r.attempt_number).collect();
        assert_eq!(a, vec![1, 2]);
        assert_eq!(log.len(), 3);
    }

    #[tokio::test]
    async fn failing_mode_returns_persistence_error() {
        let log = InMemoryAuditLog::new();
        log.fail_writes(true);
        let err = log.append(&record("a", 1)).await.unwrap_err();
        assert!(matches!(err, CodingError::Persistence(_)));
        assert!(log.is_empty());
    }
}
