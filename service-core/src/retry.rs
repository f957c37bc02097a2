//! Retry utilities with exponential backoff.
//!
//! The policy is a plain value so callers can inject a deterministic one in
//! tests (no jitter, paused tokio clock).

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::{info, warn};

/// Configuration for retry behavior.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Never less than 1.
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound for a single backoff.
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth.
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to every backoff.
    pub add_jitter: bool,
    /// Give up once the next sleep would cross this wall-clock budget.
    pub max_elapsed: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            add_jitter: true,
            max_elapsed: Some(Duration::from_secs(30)),
        }
    }
}

impl RetryPolicy {
    /// Calculate the sleep before retry number `retry` (0-based).
    pub fn backoff_duration(&self, retry: u32) -> Duration {
        let backoff = self.initial_backoff.as_millis() as f64
            * self.backoff_multiplier.powi(retry.min(i32::MAX as u32) as i32);
        let backoff_ms = backoff.min(self.max_backoff.as_millis() as f64) as u64;

        let mut duration = Duration::from_millis(backoff_ms);

        if self.add_jitter {
            let jitter = (backoff_ms as f64 * 0.25 * rand::thread_rng().r#gen::<f64>()) as u64;
            duration += Duration::from_millis(jitter);
        }

        duration
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("{operation} failed after {attempts} attempt(s): {last_error}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last_error: E,
    },

    #[error("{operation} failed with a non-retryable error: {last_error}")]
    Permanent { operation: String, last_error: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::Permanent { .. } => 1,
        }
    }
}

/// Run `f` until it succeeds, the policy is exhausted, or `is_retryable`
/// rejects an error.
///
/// # Example
/// ```ignore
/// let session = retry_with_backoff(
///     &RetryPolicy::default(),
///     "store_connect",
///     || backend.open(),
///     |e| e.is_transient(),
/// )
/// .await?;
/// ```
pub async fn retry_with_backoff<F, Fut, T, E, R>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut f: F,
    is_retryable: R,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let started = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match f().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        operation = operation_name,
                        attempt, "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(error) => {
                if !is_retryable(&error) {
                    warn!(
                        operation = operation_name,
                        error = %error,
                        "Operation failed with non-retryable error"
                    );
                    return Err(RetryError::Permanent {
                        operation: operation_name.to_string(),
                        last_error: error,
                    });
                }

                if attempt >= max_attempts {
                    warn!(
                        operation = operation_name,
                        attempt,
                        error = %error,
                        "Operation failed after max attempts"
                    );
                    return Err(RetryError::Exhausted {
                        operation: operation_name.to_string(),
                        attempts: attempt,
                        last_error: error,
                    });
                }

                let backoff = policy.backoff_duration(attempt - 1);

                if let Some(budget) = policy.max_elapsed
                    && started.elapsed() + backoff > budget
                {
                    warn!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        error = %error,
                        "Operation failed and retry budget is spent"
                    );
                    return Err(RetryError::Exhausted {
                        operation: operation_name.to_string(),
                        attempts: attempt,
                        last_error: error,
                    });
                }

                warn!(
                    operation = operation_name,
                    attempt,
                    error = %error,
                    backoff_ms = backoff.as_millis() as u64,
                    "Operation failed, retrying after backoff"
                );

                sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn deterministic(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            add_jitter: false,
            max_elapsed: None,
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_duration() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            ..deterministic(5)
        };

        assert_eq!(policy.backoff_duration(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_duration(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_duration(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_duration(3), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(400),
            add_jitter: true,
            ..deterministic(3)
        };

        for _ in 0..50 {
            let backoff = policy.backoff_duration(0);
            assert!(backoff >= Duration::from_millis(400));
            assert!(backoff <= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_first_attempt() {
        let result =
            retry_with_backoff(&deterministic(3), "test_op", || async { Ok::<_, String>(42) }, |_| true)
                .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(
            &deterministic(5),
            "test_op",
            || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("down".to_string())
                    } else {
                        Ok("up")
                    }
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap(), "up");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(
            &deterministic(4),
            "test_op",
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("down".to_string()) }
            },
            |_| true,
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_permanent_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(
            &deterministic(4),
            "test_op",
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("bad credentials".to_string()) }
            },
            |_| false,
        )
        .await;

        assert!(matches!(result, Err(RetryError::Permanent { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_when_elapsed_budget_is_spent() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            max_elapsed: Some(Duration::from_secs(4)),
            ..deterministic(100)
        };
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(
            &policy,
            "test_op",
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("down".to_string()) }
            },
            |_| true,
        )
        .await;

        // Sleeps of 1s and 2s fit the budget; the following 4s sleep would not.
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
