//! Bounded exponential backoff with cooperative cancellation.
//!
//! Every call that reaches an external system goes through [`with_retry`].
//! Whether a failure is worth retrying is decided by [`classify`], which is the
//! only place that inspects error text.

use crate::error::{Result, ToolError};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Lower-cased substrings that mark a failure as transient.
///
/// - `rate limit`: GitHub secondary rate limits, HTTP 429 bodies
/// - `timeout`, `timed out`, `etimedout`: client or socket timeouts
/// - `503`: upstream unavailable
/// - `econnreset`, `connection reset`: dropped connections
pub const TRANSIENT_SIGNATURES: &[&str] = &[
    "rate limit",
    "timeout",
    "timed out",
    "etimedout",
    "503",
    "econnreset",
    "connection reset",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Fatal,
    Aborted,
}

pub fn classify(err: &ToolError) -> ErrorClass {
    match err {
        ToolError::Aborted => ErrorClass::Aborted,
        ToolError::Validation(_) | ToolError::InvalidArguments(_) => ErrorClass::Fatal,
        ToolError::ExecutionFailed(msg) | ToolError::Io(msg) => {
            if is_transient_message(msg) {
                ErrorClass::Transient
            } else {
                ErrorClass::Fatal
            }
        }
    }
}

pub fn is_transient_message(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    TRANSIENT_SIGNATURES.iter().any(|sig| lower.contains(sig))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay slept after the failed attempt number `attempt` (0-based): `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

pub fn check_aborted(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(ToolError::Aborted);
    }
    Ok(())
}

/// Run `op` until it succeeds, fails fatally, or runs out of attempts.
///
/// Cancellation is checked before every attempt and wakes a pending backoff
/// sleep early; an attempt already in flight is never interrupted.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        check_aborted(cancel)?;
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let is_last = attempt + 1 >= attempts;
        if is_last || classify(&err) != ErrorClass::Transient {
            return Err(err);
        }

        let delay = policy.delay_for(attempt);
        tracing::warn!(
            attempt = attempt + 1,
            max_attempts = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient failure, backing off"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {}
        }
        attempt += 1;
    }
}
