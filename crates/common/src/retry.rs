//! Bounded retry policy for recoverable failures.

use std::future::Future;
use std::time::Duration;

/// Classifies an error as transient (worth retrying) or permanent.
pub trait Recoverable {
    /// Returns true if repeating the failed operation may succeed.
    fn is_recoverable(&self) -> bool;
}

/// A bounded-attempt retry policy.
///
/// `max_retries` counts re-attempts, so an operation runs at most
/// `max_retries + 1` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Retry limit used for speaker commands and storage transactions.
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Creates a policy allowing `max_retries` re-attempts with no delay.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            delay: Duration::ZERO,
        }
    }

    /// Creates a policy that never retries.
    pub fn no_retry() -> Self {
        Self::new(0)
    }

    /// Sets the pause between attempts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Returns the maximum number of re-attempts.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the pause between attempts.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Returns true if another attempt is allowed after `retries` re-attempts.
    pub fn can_retry(&self, retries: u32) -> bool {
        retries < self.max_retries
    }

    /// Returns true if `error` is recoverable and the budget is not exhausted.
    pub fn should_retry<E: Recoverable>(&self, error: &E, retries: u32) -> bool {
        error.is_recoverable() && self.can_retry(retries)
    }

    /// Runs `op` until it succeeds, fails permanently, or the retry budget
    /// runs out. The last error is returned on exhaustion.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        E: Recoverable + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut retries = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if self.should_retry(&e, retries) => {
                    retries += 1;
                    tracing::warn!(
                        operation,
                        attempt = retries,
                        max_retries = self.max_retries,
                        error = %e,
                        "recoverable failure, retrying"
                    );
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_RETRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError {
        recoverable: bool,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (recoverable: {})", self.recoverable)
        }
    }

    impl Recoverable for TestError {
        fn is_recoverable(&self) -> bool {
            self.recoverable
        }
    }

    #[test]
    fn test_default_allows_three_retries() {
        let policy = RetryPolicy::default();
        assert!(policy.can_retry(0));
        assert!(policy.can_retry(2));
        assert!(!policy.can_retry(3));
    }

    #[test]
    fn test_should_retry_requires_recoverable_error() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(&TestError { recoverable: true }, 0));
        assert!(!policy.should_retry(&TestError { recoverable: false }, 0));
    }

    #[tokio::test]
    async fn test_run_gives_up_after_budget() {
        let policy = RetryPolicy::new(3);
        let attempts = AtomicU32::new(0);
        let counter = &attempts;

        let result: Result<(), TestError> = policy
            .run("always_fails", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TestError { recoverable: true })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_run_stops_on_permanent_error() {
        let policy = RetryPolicy::new(3);
        let attempts = AtomicU32::new(0);
        let counter = &attempts;

        let result: Result<(), TestError> = policy
            .run("permanent", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TestError { recoverable: false })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_returns_first_success() {
        let policy = RetryPolicy::new(3);
        let attempts = AtomicU32::new(0);
        let counter = &attempts;

        let result: Result<u32, TestError> = policy
            .run("flaky", move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(TestError { recoverable: true })
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
    }
}
