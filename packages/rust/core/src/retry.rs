//! Generic retry-with-backoff around fallible external calls.

use std::future::Future;

use tracing::warn;

use eventharvest_shared::{HarvestError, Result, RetryPolicy};

/// How a failed external call should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Provider throttling; back off and retry.
    RateLimit,
    /// Timeouts and gateway errors; back off and retry.
    Transient,
    /// Anything else; give up immediately.
    Fatal,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorClass::Fatal)
    }
}

const RATE_LIMIT_MARKERS: &[&str] = &["rate limit", "rate_limit_exceeded", "429", "requests per min"];

const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "502",
    "503",
    "504",
    "temporarily unavailable",
];

/// Classify an error by matching markers in its rendered message.
pub fn classify(error: &HarvestError) -> ErrorClass {
    let message = error.to_string().to_lowercase();
    if RATE_LIMIT_MARKERS.iter().any(|m| message.contains(m)) {
        ErrorClass::RateLimit
    } else if TRANSIENT_MARKERS.iter().any(|m| message.contains(m)) {
        ErrorClass::Transient
    } else {
        ErrorClass::Fatal
    }
}

/// Run `op` up to `policy.max_attempts` times.
///
/// Retryable failures sleep for [`RetryPolicy::delay_for`] before the next
/// attempt; a fatal failure is returned at once. On exhaustion the last
/// error is returned.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let class = classify(&e);
                if !class.is_retryable() {
                    warn!(label, attempt, error = %e, "call failed, not retrying");
                    return Err(e);
                }
                if attempt >= max_attempts {
                    warn!(label, attempt, error = %e, "retries exhausted");
                    return Err(e);
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    label,
                    attempt,
                    ?class,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retryable failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
