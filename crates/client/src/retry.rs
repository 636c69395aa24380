//! Bounded retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use intelcache_core::AppConfig;
use rand::Rng;

use crate::cancel::Cancellation;
use crate::error::{ErrorClass, FetchError};

/// Longest provider `Retry-After` hint that is honored as-is.
pub const DEFAULT_MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

/// Backoff parameters for one executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound (exclusive) of the uniform jitter added to each backoff.
    pub max_jitter: Duration,
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_jitter: Duration::from_secs(1),
            max_retry_after: DEFAULT_MAX_RETRY_AFTER,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_backoff(),
            max_jitter: config.jitter(),
            max_retry_after: DEFAULT_MAX_RETRY_AFTER,
        }
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry + U[0, jitter)`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(2u32.saturating_pow(retry));
        exp.saturating_add(jitter(self.max_jitter))
    }

    /// Delay after `err`, preferring the provider's rate-limit hint.
    pub fn delay_after(&self, retry: u32, err: &FetchError) -> Duration {
        match err {
            FetchError::RateLimited { retry_after: Some(hint) } => (*hint).min(self.max_retry_after),
            _ => self.backoff(retry),
        }
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..max_ms))
}

/// Terminal failure of a retried call.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct RetryError {
    pub error: FetchError,
    pub attempts: u32,
    /// True when the attempt budget ran out on a retryable error.
    pub exhausted: bool,
}

/// Successful value plus how many attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Runs one operation under a `RetryPolicy`.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke `attempt` until it succeeds, `classify` calls its error fatal,
    /// or the attempt budget is spent.
    ///
    /// `attempt` receives the 1-based attempt number. Backoff sleeps end early
    /// on cancellation, which surfaces as `FetchError::Cancelled`.
    pub async fn run<T, C, F, Fut>(
        &self, classify: C, cancel: &Cancellation, mut attempt: F,
    ) -> Result<Attempted<T>, RetryError>
    where
        C: Fn(&FetchError) -> ErrorClass,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempts = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(RetryError { error: FetchError::Cancelled, attempts, exhausted: false });
            }

            attempts += 1;
            let error = match attempt(attempts).await {
                Ok(value) => return Ok(Attempted { value, attempts }),
                Err(e) => e,
            };

            if classify(&error) == ErrorClass::Fatal {
                return Err(RetryError { error, attempts, exhausted: false });
            }
            if attempts >= self.policy.max_attempts {
                return Err(RetryError { error, attempts, exhausted: true });
            }

            let delay = self.policy.delay_after(attempts - 1, &error);
            tracing::debug!(attempt = attempts, delay_ms = delay.as_millis() as u64, error = %error, "retrying");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return Err(RetryError { error: FetchError::Cancelled, attempts, exhausted: false });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancellation;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter() -> RetryPolicy {
        RetryPolicy { max_jitter: Duration::ZERO, ..RetryPolicy::default() }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = no_jitter();
        assert_eq!(policy.backoff(0), Duration::from_secs(2));
        assert_eq!(policy.backoff(1), Duration::from_secs(4));
        assert_eq!(policy.backoff(2), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_jitter_is_bounded() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.backoff(0);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay < Duration::from_secs(3));
        }
    }

    #[test]
    fn test_retry_after_hint_is_capped() {
        let policy = no_jitter();
        let hinted = FetchError::RateLimited { retry_after: Some(Duration::from_secs(7)) };
        assert_eq!(policy.delay_after(0, &hinted), Duration::from_secs(7));

        let huge = FetchError::RateLimited { retry_after: Some(Duration::from_secs(3600)) };
        assert_eq!(policy.delay_after(0, &huge), DEFAULT_MAX_RETRY_AFTER);

        let unhinted = FetchError::RateLimited { retry_after: None };
        assert_eq!(policy.delay_after(1, &unhinted), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_retryable_failures_then_success() {
        let executor = RetryExecutor::new(no_jitter());
        let calls = AtomicU32::new(0);

        let result = executor
            .run(FetchError::class, &Cancellation::never(), |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err(FetchError::Timeout) } else { Ok("payload") } }
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result, Attempted { value: "payload", attempts: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_stops_immediately() {
        let executor = RetryExecutor::new(no_jitter());
        let calls = AtomicU32::new(0);

        let err = executor
            .run(FetchError::class, &Cancellation::never(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(FetchError::Client { status: 403 }) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.attempts, 1);
        assert!(!err.exhausted);
        assert!(matches!(err.error, FetchError::Client { status: 403 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_last_error() {
        let executor = RetryExecutor::new(no_jitter());
        let start = tokio::time::Instant::now();

        let err = executor
            .run(FetchError::class, &Cancellation::never(), |_| async {
                Err::<(), _>(FetchError::Server { status: 503 })
            })
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 3);
        assert!(err.exhausted);
        // 2s + 4s of backoff between three attempts.
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_classifier_overrides_default() {
        let executor = RetryExecutor::new(no_jitter());
        let calls = AtomicU32::new(0);

        let err = executor
            .run(|_| ErrorClass::Fatal, &Cancellation::never(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(FetchError::Timeout) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!err.exhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_backoff() {
        let executor = RetryExecutor::new(no_jitter());
        let (handle, cancel) = cancellation();
        let calls = AtomicU32::new(0);

        let run = executor.run(FetchError::class, &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(FetchError::Timeout) }
        });
        let trigger = async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            handle.cancel();
        };

        let (result, ()) = tokio::join!(run, trigger);
        let err = result.unwrap_err();

        assert!(matches!(err.error, FetchError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
