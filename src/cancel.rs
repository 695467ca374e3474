//! Cooperative cancellation for a batch run.
//!
//! A Ctrl-C handler and the time budget both cancel the same
//! [`CancelSignal`]. The orchestrator stops starting responses and the
//! gateway stops scheduling retries once it fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Cooperative cancellation shared by the CLI and the orchestrator.
///
/// The first reason given wins; later calls to [`cancel`](Self::cancel)
/// are ignored.
#[derive(Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    /// Resolves once the signal has been cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(Option::is_some).await;
    }

    /// Cancel automatically once `budget` has elapsed.
    pub fn cancel_after(&self, budget: Duration) -> tokio::task::JoinHandle<()> {
        let signal = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            signal.cancel(format!("time budget of {}s exhausted", budget.as_secs()));
        })
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}
