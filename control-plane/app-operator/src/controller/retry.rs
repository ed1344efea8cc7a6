//! Bounded re-read-and-retry for optimistic-concurrency writes.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay after the `attempt`-th failure (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Backoff plus up to 10% random jitter.
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        let jitter_cap = (base.as_millis() as u64) / 10;
        if jitter_cap == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=jitter_cap))
    }
}

/// Errors that a fresh read may resolve.
pub trait Conflict {
    fn is_conflict(&self) -> bool;
}

impl Conflict for crate::store::StoreError {
    fn is_conflict(&self) -> bool {
        crate::store::StoreError::is_conflict(self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("still conflicting after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
    #[error("{0}")]
    Failed(E),
    #[error("cancelled")]
    Cancelled,
}

/// Run `op` until it succeeds, fails with a non-conflict error, runs out of
/// attempts or `cancel` fires. `op` receives the 1-based attempt number and
/// must re-read whatever it writes on every call.
pub async fn retry_on_conflict<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Conflict + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            r = op(attempt) => r,
        };
        match result {
            Ok(v) => return Ok(v),
            Err(e) if !e.is_conflict() => return Err(RetryError::Failed(e)),
            Err(e) if attempt >= max_attempts => {
                return Err(RetryError::Exhausted { attempts: attempt, last: e });
            }
            Err(e) => {
                let delay = policy.delay(attempt);
                debug!(attempt, ?delay, error = %e, "write conflict; re-reading");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

/// Await `fut` unless `cancel` fires first.
pub async fn with_cancel<T, Fut>(
    cancel: &CancellationToken,
    fut: Fut,
) -> Option<T>
where
    Fut: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        v = fut => Some(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum TestErr {
        Stale,
        Broken,
    }

    impl std::fmt::Display for TestErr {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Conflict for TestErr {
        fn is_conflict(&self) -> bool {
            matches!(self, TestErr::Stale)
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let p = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        };
        assert_eq!(p.backoff(1), Duration::from_millis(10));
        assert_eq!(p.backoff(2), Duration::from_millis(20));
        assert_eq!(p.backoff(3), Duration::from_millis(40));
        assert_eq!(p.backoff(4), Duration::from_millis(50));
        assert_eq!(p.backoff(40), Duration::from_millis(50));
        for attempt in 1..6 {
            let d = p.delay(attempt);
            assert!(d >= p.backoff(attempt));
            assert!(d <= p.backoff(attempt) + p.backoff(attempt) / 10);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn conflicts_are_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let out = retry_on_conflict(&fast(), &CancellationToken::new(), move |attempt| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 { Err(TestErr::Stale) } else { Ok(attempt) }
            }
        })
        .await;
        assert_eq!(out.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_attempts() {
        let out: Result<(), _> =
            retry_on_conflict(&fast(), &CancellationToken::new(), |_| async {
                Err(TestErr::Stale)
            })
            .await;
        match out {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert_eq!(last, TestErr::Stale);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let out: Result<(), _> =
            retry_on_conflict(&fast(), &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestErr::Broken) }
            })
            .await;
        assert!(matches!(out, Err(RetryError::Failed(TestErr::Broken))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out: Result<(), RetryError<TestErr>> =
            retry_on_conflict(&fast(), &cancel, |_| async { Err(TestErr::Stale) }).await;
        assert!(matches!(out, Err(RetryError::Cancelled)));
        assert_eq!(with_cancel(&cancel, async { 1 }).await, None);
    }
}
