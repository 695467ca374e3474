//! Batch progress reporting.
//!
//! Reports observable progress during `ragcoder run` so users see how many
//! responses are finished and how many failed. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for a batch run.
#[derive(Clone, Debug)]
pub enum BatchProgressEvent {
    /// The batch has started; `total` responses are queued.
    Started { batch_id: String, total: u64 },
    /// One more response is finished.
    Coded {
        response_id: String,
        /// `coded`, `no_code`, `failed`, or `empty`.
        outcome: &'static str,
        n: u64,
        total: u64,
    },
    /// Cancellation was requested; no new responses will start.
    Cancelling { reason: String },
}

/// Reports batch progress. Implementations write to stderr (human or JSON).
pub trait BatchProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the orchestrator's collection loop.
    fn report(&self, event: BatchProgressEvent);
}

/// Human-friendly progress on stderr: "coding  1,234 / 5,000 responses (3 failed)".
pub struct StderrProgress {
    failed: std::sync::atomic::AtomicU64,
}

impl StderrProgress {
    pub fn new() -> Self {
        Self {
            failed: std::sync::atomic::AtomicU64::new(0),
        }
    }
}

impl Default for StderrProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchProgressReporter for StderrProgress {
    fn report(&self, event: BatchProgressEvent) {
        use std::sync::atomic::Ordering;

        let line = match &event {
            BatchProgressEvent::Started { batch_id, total } => {
                format!("batch {}  {} responses queued\n", batch_id, format_number(*total))
            }
            BatchProgressEvent::Coded {
                outcome, n, total, ..
            } => {
                let failed = if *outcome == "failed" {
                    self.failed.fetch_add(1, Ordering::Relaxed) + 1
                } else {
                    self.failed.load(Ordering::Relaxed)
                };
                format!(
                    "coding  {} / {} responses ({} failed)\n",
                    format_number(*n),
                    format_number(*total),
                    format_number(failed)
                )
            }
            BatchProgressEvent::Cancelling { reason } => {
                format!("cancelling  {}; waiting for in-flight responses\n", reason)
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl BatchProgressReporter for JsonProgress {
    fn report(&self, event: BatchProgressEvent) {
        let obj = match &event {
            BatchProgressEvent::Started { batch_id, total } => serde_json::json!({
                "event": "started",
                "batch_id": batch_id,
                "total": total
            }),
            BatchProgressEvent::Coded {
                response_id,
                outcome,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "response_id": response_id,
                "outcome": outcome,
                "n": n,
                "total": total
            }),
            BatchProgressEvent::Cancelling { reason } => serde_json::json!({
                "event": "cancelling",
                "reason": reason
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl BatchProgressReporter for NoProgress {
    fn report(&self, _event: BatchProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Parse a `--progress` value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn BatchProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress::new()),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
