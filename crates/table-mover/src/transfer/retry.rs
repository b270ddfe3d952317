//! Bounded retry with fixed or exponential backoff.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{MoverError, Result};

/// Exponential backoff never sleeps longer than this.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// How often and how patiently an operation is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub exponential: bool,
}

impl RetryPolicy {
    pub const SOURCE_LEASE: Self = Self {
        max_attempts: 30,
        initial_backoff: Duration::from_secs(2),
        exponential: true,
    };

    pub const DESTINATION_LEASE: Self = Self {
        max_attempts: 30,
        initial_backoff: Duration::from_secs(1),
        exponential: true,
    };

    pub const BATCH_EXECUTE: Self = Self {
        max_attempts: 3,
        initial_backoff: Duration::from_secs(1),
        exponential: false,
    };

    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: *self,
            failures: 0,
            next: self.initial_backoff,
        }
    }
}

/// Attempt bookkeeping for retry loops that hold a mutable borrow across
/// attempts and so cannot hand a closure to [`RetryCaller`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    failures: u32,
    next: Duration,
}

impl Backoff {
    /// Record a failed attempt.
    ///
    /// Returns the delay before the next attempt, or `None` once the policy
    /// is exhausted.
    pub fn on_failure(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= self.policy.max_attempts {
            return None;
        }

        let delay = self.next;
        if self.policy.exponential {
            self.next = (self.next * 2).min(MAX_BACKOFF);
        }
        Some(delay)
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

type Recover<'r> = Box<dyn FnMut(&MoverError) + Send + 'r>;

/// Runs a fallible async operation until it succeeds or the policy gives up.
pub struct RetryCaller<'r> {
    operation: String,
    policy: RetryPolicy,
    recover: Option<Recover<'r>>,
}

impl<'r> RetryCaller<'r> {
    pub fn new(operation: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            operation: operation.into(),
            policy,
            recover: None,
        }
    }

    /// Callback run after each failure that will be retried.
    pub fn with_recover(mut self, recover: impl FnMut(&MoverError) + Send + 'r) -> Self {
        self.recover = Some(Box::new(recover));
        self
    }

    /// Invoke `op` until it returns `Ok`.
    ///
    /// After `max_attempts` failures the last error is wrapped in
    /// [`MoverError::RetryExhausted`].
    pub async fn call<T, F, Fut>(mut self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.policy.backoff();

        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let Some(delay) = backoff.on_failure() else {
                return Err(MoverError::retry_exhausted(
                    self.operation,
                    backoff.failures(),
                    err,
                ));
            };

            warn!(
                "{} failed (attempt {}/{}): {}; retrying in {:?}",
                self.operation,
                backoff.failures(),
                self.policy.max_attempts,
                err,
                delay
            );
            tokio::time::sleep(delay).await;

            if let Some(recover) = self.recover.as_mut() {
                recover(&err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn transient() -> MoverError {
        MoverError::connection("SOURCE", "connection refused")
    }

    #[test]
    fn test_exponential_backoff_caps() {
        let mut backoff = RetryPolicy::SOURCE_LEASE.backoff();
        let delays: Vec<u64> = (0..8)
            .filter_map(|_| backoff.on_failure())
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32, 60, 60, 60]);
    }

    #[test]
    fn test_fixed_backoff_exhausts() {
        let mut backoff = RetryPolicy::BATCH_EXECUTE.backoff();
        assert_eq!(backoff.on_failure(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.on_failure(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.on_failure(), None);
        assert_eq!(backoff.failures(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_succeeds_on_third_attempt() {
        let started = Instant::now();
        let mut calls = 0u32;

        let value = RetryCaller::new("lease SOURCE connection", RetryPolicy::SOURCE_LEASE)
            .call(|| {
                calls += 1;
                let attempt = calls;
                async move {
                    if attempt < 3 {
                        Err(transient())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert!(started.elapsed() <= Duration::from_secs(8));
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_wraps_last_cause() {
        let mut calls = 0u32;
        let err = RetryCaller::new("execute batch", RetryPolicy::BATCH_EXECUTE)
            .call(|| {
                calls += 1;
                async { Err::<(), _>(transient()) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls, 3);
        match err {
            MoverError::RetryExhausted {
                attempts, source, ..
            } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, MoverError::Connection { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_runs_between_attempts() {
        let mut recovered = 0u32;
        let mut calls = 0u32;

        let result = RetryCaller::new("execute batch", RetryPolicy::BATCH_EXECUTE)
            .with_recover(|_| recovered += 1)
            .call(|| {
                calls += 1;
                let attempt = calls;
                async move {
                    if attempt == 1 {
                        Err(transient())
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(recovered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_needs_no_sleep() {
        let started = Instant::now();
        let value = RetryCaller::new("ping", RetryPolicy::DESTINATION_LEASE)
            .call(|| async { Ok::<_, MoverError>(42) })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
