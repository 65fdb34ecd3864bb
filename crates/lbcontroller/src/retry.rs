//! Retry policy with exponential backoff for reconcile errors
//!
//! Errors are classified as transient or permanent. Transient errors are
//! requeued with a growing delay until the retry budget is spent, permanent
//! errors are given up on immediately.

use std::time::Duration;

use tracing::{debug, warn};

/// Maximum number of requeues before a key is dropped
pub const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff
const BASE_DELAY: Duration = Duration::from_millis(500);

/// Maximum delay between retries
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Error classification for retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transient errors that should be retried with backoff
    /// Examples: connection failures, timeouts, unexpected API status codes
    Transient,
    /// Permanent errors that will not recover without intervention
    /// Examples: malformed API payloads, invalid source objects
    Permanent,
}

/// Errors that know whether retrying them can help
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

/// What the worker should do with a key after a failed reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue with backoff
    Requeue,
    /// Forget the key and report the error
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_delay: BASE_DELAY,
            max_delay: MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay before the `attempt`-th requeue (1-based): base, 2*base, 4*base, ...
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_delay)
    }

    /// Decide based on error kind and how often the key was requeued already
    pub fn decide(&self, requeues: u32, kind: ErrorKind) -> RetryDecision {
        match kind {
            ErrorKind::Transient if requeues < self.max_retries => {
                debug!(
                    requeues,
                    max_retries = self.max_retries,
                    "Transient error, retrying"
                );
                RetryDecision::Requeue
            }
            ErrorKind::Transient => {
                warn!(
                    requeues,
                    max_retries = self.max_retries,
                    "Max retries exceeded, dropping key"
                );
                RetryDecision::GiveUp
            }
            ErrorKind::Permanent => {
                warn!("Permanent error, dropping key");
                RetryDecision::GiveUp
            }
        }
    }
}
