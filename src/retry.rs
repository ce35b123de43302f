//! Bounded fixed-wait retries with cooperative cancellation.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Attempt budget and fixed delay between attempts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay between the end of one attempt and the start of the next.
    pub wait: Duration,
}

impl RetryPolicy {
    /// Remote installation: five attempts a minute apart.
    pub const SETUP: Self = Self::new(5, Duration::from_secs(60));

    /// Direct connectivity check: two attempts ten seconds apart.
    pub const VERIFICATION: Self = Self::new(2, Duration::from_secs(10));

    /// Builds a policy. A zero attempt budget is treated as one attempt.
    #[must_use]
    pub const fn new(max_attempts: u32, wait: Duration) -> Self {
        Self { max_attempts, wait }
    }

    const fn budget(&self) -> u32 {
        if self.max_attempts == 0 { 1 } else { self.max_attempts }
    }
}

/// Classifies errors as worth retrying or not.
pub trait Transient {
    /// Returns `true` when another attempt could succeed.
    fn is_transient(&self) -> bool;
}

impl Transient for crate::transport::TransportError {
    fn is_transient(&self) -> bool {
        Self::is_transient(self)
    }
}

/// Outcome of an operation that did not succeed under [`retry`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RetryError<E> {
    /// The final attempt failed, or an attempt failed with a permanent error.
    #[error("{0}")]
    Failed(E),
    /// Cancellation was observed before the next attempt started.
    #[error("cancelled before the next attempt")]
    Cancelled,
}

/// Runs `operation` until it succeeds, fails permanently, or the policy's
/// budget is spent.
///
/// Cancellation is checked before every attempt and interrupts the wait
/// between attempts; an attempt already running is never interrupted.
///
/// # Errors
///
/// Returns [`RetryError::Failed`] carrying the last error unchanged, or
/// [`RetryError::Cancelled`] when `cancel` fired first.
pub async fn retry<T, E, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    E: Transient + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let budget = policy.budget();
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_transient() || attempt >= budget {
            return Err(RetryError::Failed(err));
        }

        warn!(
            operation = label,
            attempt,
            max_attempts = budget,
            wait_secs = policy.wait.as_secs(),
            error = %err,
            "attempt failed; retrying"
        );
        tokio::select! {
            () = cancel.cancelled() => return Err(RetryError::Cancelled),
            () = tokio::time::sleep(policy.wait) => {}
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    use rstest::rstest;

    use super::*;

    const FAST_WAIT: Duration = Duration::from_millis(5);

    #[derive(Debug, PartialEq, Eq)]
    struct Flaky {
        transient: bool,
    }

    impl std::fmt::Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky (transient: {})", self.transient)
        }
    }

    impl Transient for Flaky {
        fn is_transient(&self) -> bool {
            self.transient
        }
    }

    async fn run_failing(
        policy: RetryPolicy,
        transient: bool,
        cancel: &CancellationToken,
    ) -> (u32, Result<(), RetryError<Flaky>>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = retry(policy, cancel, "test", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Err::<(), _>(Flaky { transient }) }
        })
        .await;
        (calls.load(Ordering::SeqCst), result)
    }

    #[test]
    fn stage_policies_match_install_and_probe_budgets() {
        assert_eq!(RetryPolicy::SETUP.max_attempts, 5);
        assert_eq!(RetryPolicy::SETUP.wait, Duration::from_secs(60));
        assert_eq!(RetryPolicy::VERIFICATION.max_attempts, 2);
        assert_eq!(RetryPolicy::VERIFICATION.wait, Duration::from_secs(10));
    }

    #[rstest]
    #[case(5)]
    #[case(2)]
    #[tokio::test]
    async fn transient_failures_stop_at_budget(#[case] max_attempts: u32) {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::new(max_attempts, FAST_WAIT);
        let started = Instant::now();

        let (calls, result) = run_failing(policy, true, &cancel).await;

        assert_eq!(calls, max_attempts);
        assert_eq!(result, Err(RetryError::Failed(Flaky { transient: true })));
        assert!(
            started.elapsed() >= FAST_WAIT * (max_attempts - 1),
            "attempts must be spaced by the policy wait"
        );
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::new(5, FAST_WAIT);

        let (calls, result) = run_failing(policy, false, &cancel).await;

        assert_eq!(calls, 1);
        assert_eq!(result, Err(RetryError::Failed(Flaky { transient: false })));
    }

    #[tokio::test]
    async fn zero_budget_still_makes_one_attempt() {
        let cancel = CancellationToken::new();
        let (calls, _) = run_failing(RetryPolicy::new(0, FAST_WAIT), true, &cancel).await;
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn success_after_failures_returns_value() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result = retry(RetryPolicy::new(5, FAST_WAIT), &cancel, "test", || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call < 2 {
                    Err(Flaky { transient: true })
                } else {
                    Ok(call)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
    }

    #[tokio::test]
    async fn cancelled_token_prevents_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (calls, result) = run_failing(RetryPolicy::new(5, FAST_WAIT), true, &cancel).await;

        assert_eq!(calls, 0);
        assert_eq!(result, Err(RetryError::Cancelled));
    }

    #[tokio::test]
    async fn cancellation_interrupts_wait() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let policy = RetryPolicy::new(5, Duration::from_secs(60));
        let started = Instant::now();

        let (calls, result) = run_failing(policy, true, &cancel).await;

        assert_eq!(calls, 1);
        assert_eq!(result, Err(RetryError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
