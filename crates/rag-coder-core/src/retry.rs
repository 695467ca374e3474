//! Retry policy and per-response attempt state machine.
//!
//! The gateway's retry loop is driven by [`AttemptState`]:
//!
//! ```text
//! Pending ──▶ Retrying(n) ──▶ Succeeded
//!    │            │  ▲
//!    │            └──┘ (transient failure, attempts left)
//!    └────────────┴──────▶ Failed
//! ```
//!
//! Every transition consumes exactly one attempt, so the attempt count
//! recorded in audit records is `AttemptState::attempts_made()`.
//!
//! # Backoff
//!
//! Delay before attempt `n + 1` is `base × 2^(n-1)`, capped at `max`,
//! then scaled by a random factor in `[0.5, 1.5)`.

use std::time::Duration;

use rand::Rng;

use crate::models::ErrorKind;

/// Retry tuning, decoupled from application config.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts per response (including the first). Values below 1 act as 1.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Apply ±50% jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(32),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Unjittered delay after `failed_attempts` consecutive failures.
    pub fn base_delay(&self, failed_attempts: u32) -> Duration {
        if failed_attempts == 0 {
            return Duration::ZERO;
        }
        let exp = (failed_attempts - 1).min(16);
        let delay = self.backoff_base.saturating_mul(1u32 << exp);
        delay.min(self.backoff_max)
    }

    /// Delay to wait after `failed_attempts` failures, jitter applied.
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let delay = self.base_delay(failed_attempts);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let factor = rand::rng().random_range(0.5..1.5);
        delay.mul_f64(factor)
    }
}

/// Where a response's attempt sequence currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptState {
    /// No attempt made yet.
    Pending,
    /// `n` attempts have failed transiently; another is allowed.
    Retrying(u32),
    /// Succeeded on attempt number `n`.
    Succeeded(u32),
    /// Gave up after `attempts` attempts.
    Failed { attempts: u32, kind: ErrorKind },
}

/// Result of one attempt, as seen by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptResult {
    Ok,
    Err(ErrorKind),
}

impl AttemptState {
    /// Attempts already made.
    pub fn attempts_made(&self) -> u32 {
        match self {
            AttemptState::Pending => 0,
            AttemptState::Retrying(n) | AttemptState::Succeeded(n) => *n,
            AttemptState::Failed { attempts, .. } => *attempts,
        }
    }

    /// True once no further attempt will be made.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Succeeded(_) | AttemptState::Failed { .. }
        )
    }

    /// Advance after an attempt completes.
    ///
    /// Terminal states are absorbing.
    pub fn next(self, result: AttemptResult, policy: &RetryPolicy) -> AttemptState {
        if self.is_terminal() {
            return self;
        }
        let attempts = self.attempts_made() + 1;
        match result {
            AttemptResult::Ok => AttemptState::Succeeded(attempts),
            AttemptResult::Err(kind)
                if kind.is_transient() && attempts < policy.effective_max_attempts() =>
            {
                AttemptState::Retrying(attempts)
            }
            AttemptResult::Err(kind) => AttemptState::Failed { attempts, kind },
        }
    }
}
