//! Retry policy for token exchange and refresh calls.
//!
//! Classification is driven by [`ProviderErrorCode`]; message matching is
//! only consulted for errors that arrive without a useful code (for example
//! an `InternalError` wrapping an opaque transport failure).

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::{ProviderError, ProviderErrorCode};

/// Total attempts, including the first one.
pub const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY: Duration = Duration::from_millis(1_000);
const MAX_JITTER: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_millis(10_000);

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// The server asked us to slow down (429).
    RateLimited,
    /// Connection reset, timeout or DNS failure.
    Transient,
    /// Anything else: retrying would give the same answer.
    Fatal,
}

impl RetryDecision {
    pub fn should_retry(&self) -> bool {
        !matches!(self, Self::Fatal)
    }
}

const RATE_LIMIT_HINTS: &[&str] = &["rate limit", "too many requests"];
const TRANSIENT_HINTS: &[&str] = &[
    "connection reset",
    "econnreset",
    "timed out",
    "timeout",
    "enotfound",
    "dns error",
    "failed to lookup address",
];

/// Classifies an error for retry purposes.
pub fn classify(err: &ProviderError) -> RetryDecision {
    match err.code() {
        ProviderErrorCode::RateLimited => return RetryDecision::RateLimited,
        ProviderErrorCode::NetworkError => return RetryDecision::Transient,
        // HTTP statuses other than 429 are authoritative answers.
        _ if err.status().is_some() => return RetryDecision::Fatal,
        ProviderErrorCode::InternalError | ProviderErrorCode::InvalidResponse => {}
        _ => return RetryDecision::Fatal,
    }

    let message = err.message().to_ascii_lowercase();
    if RATE_LIMIT_HINTS.iter().any(|hint| message.contains(hint)) {
        RetryDecision::RateLimited
    } else if TRANSIENT_HINTS.iter().any(|hint| message.contains(hint)) {
        RetryDecision::Transient
    } else {
        RetryDecision::Fatal
    }
}

/// Attempt budget and backoff curve.
///
/// The default waits `min(1000 * 2^attempt + jitter, 10000)` ms before retry
/// number `attempt` (0-based), with jitter drawn from `[0, 1000)` ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: BASE_DELAY,
            max_jitter: MAX_JITTER,
            max_delay: MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Same attempt budget without any waiting, for tests against mock servers.
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = match self.max_jitter.as_millis() as u64 {
            0 => 0,
            max => rand::rng().random_range(0..max),
        };
        self.delay_with_jitter(attempt, Duration::from_millis(jitter_ms))
    }

    fn delay_with_jitter(&self, attempt: u32, jitter: Duration) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        exp.saturating_add(jitter).min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails fatally or the attempt budget is
    /// spent, sleeping between retryable failures. `op` receives the 0-based
    /// attempt number. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let decision = classify(&err);
                    if !decision.should_retry() || attempt + 1 >= self.max_attempts {
                        return Err(err);
                    }
                    let delay = self.delay(attempt);
                    warn!(
                        operation = label,
                        attempt = attempt + 1,
                        ?decision,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Delay before retry number `attempt` under the default policy.
pub fn backoff_delay(attempt: u32) -> Duration {
    RetryPolicy::default().delay(attempt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn classify_by_code() {
        assert_eq!(
            classify(&ProviderError::rate_limited("HTTP 429").with_status(429)),
            RetryDecision::RateLimited
        );
        assert_eq!(
            classify(&ProviderError::network("connection refused")),
            RetryDecision::Transient
        );
        assert_eq!(
            classify(&ProviderError::bad_request("HTTP 400").with_status(400)),
            RetryDecision::Fatal
        );
        assert_eq!(
            classify(&ProviderError::server("HTTP 503").with_status(503)),
            RetryDecision::Fatal
        );
        assert_eq!(
            classify(&ProviderError::authorization("state mismatch")),
            RetryDecision::Fatal
        );
    }

    #[test]
    fn message_fallback_only_for_uncoded_errors() {
        assert_eq!(
            classify(&ProviderError::internal("read ECONNRESET")),
            RetryDecision::Transient
        );
        assert_eq!(
            classify(&ProviderError::internal("Too Many Requests")),
            RetryDecision::RateLimited
        );
        assert_eq!(
            classify(&ProviderError::internal("something odd")),
            RetryDecision::Fatal
        );
        // A coded error is never reinterpreted from its text.
        assert_eq!(
            classify(&ProviderError::bad_request("upstream timeout").with_status(400)),
            RetryDecision::Fatal
        );
    }

    #[test]
    fn backoff_formula() {
        let policy = RetryPolicy::default();
        let ms = Duration::from_millis;
        assert_eq!(policy.delay_with_jitter(0, ms(0)), ms(1_000));
        assert_eq!(policy.delay_with_jitter(1, ms(500)), ms(2_500));
        assert_eq!(policy.delay_with_jitter(2, ms(999)), ms(4_999));
        assert_eq!(policy.delay_with_jitter(4, ms(0)), ms(10_000));
        assert_eq!(policy.delay_with_jitter(40, ms(999)), ms(10_000));
        assert_eq!(RetryPolicy::immediate().delay(2), Duration::ZERO);

        for attempt in 0..3 {
            let delay = backoff_delay(attempt);
            let floor = Duration::from_millis(1_000 << attempt);
            assert!(delay >= floor && delay < floor + Duration::from_millis(1_000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_gives_up_after_three_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::default().run("test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::rate_limited("HTTP 429").with_status(429)) }
        })
        .await;
        assert_eq!(result.unwrap_err().code(), ProviderErrorCode::RateLimited);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::default().run("test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::bad_request("HTTP 400").with_status(400)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failure() {
        let value = RetryPolicy::default().run("test", |attempt| async move {
            if attempt == 0 {
                Err(ProviderError::network("connection reset by peer"))
            } else {
                Ok(attempt)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 1);
    }
}
