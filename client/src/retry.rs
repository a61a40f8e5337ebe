use std::{future::Future, time::Duration};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry policy for transient server failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request (including the first attempt).
    pub max_attempts: usize,
    /// Initial backoff delay after the first retryable failure.
    pub initial_backoff: Duration,
    /// Maximum backoff delay between attempts.
    pub max_backoff: Duration,
    /// Whether non-idempotent requests (e.g., additive pushes) may be retried.
    pub retry_non_idempotent: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            retry_non_idempotent: false,
        }
    }
}

impl RetryPolicy {
    /// Three attempts with a doubling delay, the policy used for totals sync.
    pub fn sync() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(4),
            retry_non_idempotent: false,
        }
    }

    /// No delay between attempts.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            retry_non_idempotent: false,
        }
    }

    /// Attempts allowed for a request of the given idempotency
    pub fn attempts_for(&self, idempotent: bool) -> usize {
        if idempotent || self.retry_non_idempotent {
            self.max_attempts.max(1)
        } else {
            1
        }
    }

    /// Delay before retry number `attempt` (0-based): `initial * 2^attempt`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        std::cmp::min(
            self.initial_backoff.saturating_mul(factor),
            self.max_backoff,
        )
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are exhausted. The last error is returned.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    idempotent: bool,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.attempts_for(idempotent);
    let mut attempt = 0usize;
    loop {
        attempt += 1;
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if attempt >= max_attempts || !is_retryable(&err) {
            debug!(attempt, max_attempts, %err, "giving up");
            return Err(err);
        }

        let backoff = policy.backoff((attempt - 1) as u32);
        warn!(attempt, max_attempts, ?backoff, %err, "request failed, retrying");
        if backoff > Duration::ZERO {
            sleep(backoff).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Transient(bool);

    impl std::fmt::Display for Transient {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "transient={}", self.0)
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            retry_non_idempotent: false,
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn test_non_idempotent_gets_one_attempt() {
        let policy = RetryPolicy::sync();
        assert_eq!(policy.attempts_for(true), 3);
        assert_eq!(policy.attempts_for(false), 1);

        let policy = RetryPolicy {
            retry_non_idempotent: true,
            ..RetryPolicy::sync()
        };
        assert_eq!(policy.attempts_for(false), 3);
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = &AtomicUsize::new(0);
        let result: Result<usize, Transient> =
            retry(&RetryPolicy::immediate(3), true, |e: &Transient| e.0, move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(Transient(true))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts() {
        let calls = &AtomicUsize::new(0);
        let result: Result<(), Transient> =
            retry(&RetryPolicy::immediate(3), true, |e: &Transient| e.0, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Transient(true))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent_error() {
        let calls = &AtomicUsize::new(0);
        let result: Result<(), Transient> =
            retry(&RetryPolicy::immediate(3), true, |e: &Transient| e.0, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Transient(false))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
