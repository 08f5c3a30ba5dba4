//! Retry with exponential backoff
//!
//! Every remote call made by the transport client goes through a
//! [`BackoffExecutor`]. Failures are classified by their status code: only
//! transient codes are retried, everything else is returned to the caller on
//! the first attempt.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Code, Error, Result};

/// Default number of attempts, including the first one
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default wait before the first retry
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Default upper bound for a single wait
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Default growth factor between consecutive waits
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Largest growth factor a configuration may ask for
pub const MAX_MULTIPLIER: f64 = 100.0;

/// Retry policy shared read-only by every call of a client
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Wait that follows `current`, capped at `max_backoff`
    ///
    /// Products that overflow a [`Duration`] or are not finite saturate to
    /// `max_backoff`.
    pub fn next_backoff(&self, current: Duration) -> Duration {
        let factor = self.multiplier.max(1.0);
        Duration::try_from_secs_f64(current.as_secs_f64() * factor)
            .map_or(self.max_backoff, |next| next.min(self.max_backoff))
    }
}

/// Runs operations under a [`RetryPolicy`]
///
/// Cancelling the executor's token aborts the in-flight attempt as well as
/// any pending backoff wait; the caller then sees [`Error::Cancelled`].
#[derive(Debug, Clone)]
pub struct BackoffExecutor {
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl BackoffExecutor {
    pub fn new(policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self { policy, cancel }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `operation` until it succeeds, fails permanently, or the attempt
    /// budget is spent. Exhaustion returns the last error.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut backoff = self.policy.initial_backoff;
        let mut last_error = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = self.policy.next_backoff(backoff);
            }

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                result = operation() => result,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    tracing::debug!(
                        attempt = attempt + 1,
                        max_attempts,
                        next_backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "retryable failure"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::remote(Code::Unknown, "no attempt was made")))
    }

    /// Variant for operations without a success value
    pub async fn execute_unit<F, Fut>(&self, operation: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.execute(operation).await
    }
}

impl Default for BackoffExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), CancellationToken::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_executor() -> (BackoffExecutor, Arc<AtomicU32>) {
        (BackoffExecutor::default(), Arc::new(AtomicU32::new(0)))
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_millis(100));
        assert_eq!(policy.max_backoff, Duration::from_secs(5));
        assert_eq!(policy.multiplier, 2.0);
    }

    #[test]
    fn test_next_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(3),
            multiplier: 2.0,
        };
        let second = policy.next_backoff(policy.initial_backoff);
        assert_eq!(second, Duration::from_secs(2));
        assert_eq!(policy.next_backoff(second), Duration::from_secs(3));
        assert_eq!(
            policy.next_backoff(Duration::from_secs(3)),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn test_next_backoff_saturates_on_overflow() {
        for multiplier in [f64::INFINITY, 1e30, f64::MAX] {
            let policy = RetryPolicy {
                multiplier,
                ..Default::default()
            };
            assert_eq!(
                policy.next_backoff(policy.initial_backoff),
                policy.max_backoff
            );
            assert_eq!(policy.next_backoff(Duration::MAX), policy.max_backoff);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_exhausts_attempts() {
        let (executor, attempts) = counting_executor();
        let start = tokio::time::Instant::now();

        let result: Result<()> = executor
            .execute(|| {
                let attempts = attempts.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(Error::unavailable(format!("attempt {n}")))
                }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 5);
        let err = result.unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
        assert!(err.to_string().contains("attempt 5"));

        // 100 + 200 + 400 + 800 ms of backoff between five attempts
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1500));
        assert!(elapsed < Duration::from_millis(1600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_runs_once() {
        let (executor, attempts) = counting_executor();

        let result: Result<()> = executor
            .execute(|| {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(Error::not_found("missing"))
                }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(result.unwrap_err().is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failures() {
        let (executor, attempts) = counting_executor();

        let value = executor
            .execute(|| {
                let attempts = attempts.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(Error::remote(Code::ResourceExhausted, "slow down"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_backoff() {
        let cancel = CancellationToken::new();
        let executor = BackoffExecutor::new(RetryPolicy::default(), cancel.clone());
        let attempts = Arc::new(AtomicU32::new(0));

        let result: Result<()> = executor
            .execute(|| {
                let attempts = attempts.clone();
                let cancel = cancel.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    cancel.cancel();
                    Err(Error::unavailable("down"))
                }
            })
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_inflight_attempt() {
        let cancel = CancellationToken::new();
        let executor = BackoffExecutor::new(RetryPolicy::default(), cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result: Result<()> = executor
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let executor = BackoffExecutor::new(
            RetryPolicy {
                max_attempts: 0,
                ..Default::default()
            },
            CancellationToken::new(),
        );
        let attempts = Arc::new(AtomicU32::new(0));

        executor
            .execute_unit(|| {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
