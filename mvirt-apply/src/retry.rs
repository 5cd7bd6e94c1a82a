//! Retry controller - a backoff-driven combinator over a unit of work.
//!
//! The combinator knows nothing about conflicts: the work function's error
//! type decides what is retryable through [`Retryable`].

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::context::{CallContext, Cancelled};

/// Classifies an error as worth retrying.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Backoff policy: the delay before the next retry, or `None` to give up.
pub trait Backoff: Send {
    fn next_delay(&mut self) -> Option<Duration>;
}

/// Exponential backoff with a delay cap and an optional retry limit.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    pub max_retries: Option<u32>,
    retries: u32,
    current: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64, max_retries: Option<u32>) -> Self {
        Self {
            initial,
            max,
            multiplier,
            max_retries,
            retries: 0,
            current: initial,
        }
    }
}

impl Default for ExponentialBackoff {
    /// 500ms doubling up to 30s, at most 10 retries.
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30), 2.0, Some(10))
    }
}

impl Backoff for ExponentialBackoff {
    fn next_delay(&mut self) -> Option<Duration> {
        if self.max_retries.is_some_and(|max| self.retries >= max) {
            return None;
        }
        self.retries += 1;
        let delay = self.current.min(self.max);
        // An unusable multiplier or an overflowing product saturates at the cap.
        self.current = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max)
            .min(self.max);
        Some(delay)
    }
}

/// Fixed delay between retries.
#[derive(Debug, Clone)]
pub struct ConstantBackoff {
    pub delay: Duration,
    pub max_retries: Option<u32>,
    retries: u32,
}

impl ConstantBackoff {
    pub fn new(delay: Duration, max_retries: Option<u32>) -> Self {
        Self {
            delay,
            max_retries,
            retries: 0,
        }
    }
}

impl Backoff for ConstantBackoff {
    fn next_delay(&mut self) -> Option<Duration> {
        if self.max_retries.is_some_and(|max| self.retries >= max) {
            return None;
        }
        self.retries += 1;
        Some(self.delay)
    }
}

/// Never retry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl Backoff for NoRetry {
    fn next_delay(&mut self) -> Option<Duration> {
        None
    }
}

/// Run `work` until it succeeds, fails with a non-retryable error, the
/// backoff gives up (the last error is returned), or `ctx` is cancelled.
///
/// `work` receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut>(ctx: &CallContext, backoff: &mut dyn Backoff, mut work: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + From<Cancelled> + Display,
{
    let mut attempt = 1;
    loop {
        ctx.check()?;
        match work(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => match backoff.next_delay() {
                Some(delay) => {
                    warn!(attempt, ?delay, "Retrying after retryable failure: {}", e);
                    ctx.sleep(delay).await?;
                    attempt += 1;
                }
                None => {
                    warn!(attempt, "Giving up after retryable failure: {}", e);
                    return Err(e);
                }
            },
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thiserror::Error;

    #[derive(Debug, Error, PartialEq)]
    enum TestError {
        #[error("busy")]
        Busy,
        #[error("broken")]
        Broken,
        #[error(transparent)]
        Cancelled(#[from] Cancelled),
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Busy)
        }
    }

    #[test]
    fn test_exponential_backoff() {
        let mut b = ExponentialBackoff::new(
            Duration::from_millis(100),
            Duration::from_millis(350),
            2.0,
            Some(4),
        );
        let delays: Vec<_> = std::iter::from_fn(|| b.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(350),
                Duration::from_millis(350),
            ]
        );
    }

    #[test]
    fn test_exponential_backoff_saturates_on_bad_multiplier() {
        for multiplier in [-1.0, f64::INFINITY, f64::NAN, f64::MAX] {
            let mut b = ExponentialBackoff::new(
                Duration::from_millis(100),
                Duration::from_millis(350),
                multiplier,
                Some(3),
            );
            let delays: Vec<_> = std::iter::from_fn(|| b.next_delay()).collect();
            assert_eq!(
                delays,
                vec![
                    Duration::from_millis(100),
                    Duration::from_millis(350),
                    Duration::from_millis(350),
                ],
                "multiplier {multiplier}"
            );
        }
    }

    #[test]
    fn test_constant_backoff_limit() {
        let mut b = ConstantBackoff::new(Duration::from_millis(10), Some(2));
        assert!(b.next_delay().is_some());
        assert!(b.next_delay().is_some());
        assert!(b.next_delay().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let ctx = CallContext::background();
        let mut backoff = ConstantBackoff::new(Duration::from_secs(1), None);
        let mut seen = Vec::new();

        let result: Result<u32, TestError> = retry(&ctx, &mut backoff, |attempt| {
            seen.push(attempt);
            async move {
                if attempt < 3 {
                    Err(TestError::Busy)
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let ctx = CallContext::background();
        let mut calls = 0;
        let result: Result<(), TestError> = retry(&ctx, &mut ConstantBackoff::new(Duration::ZERO, None), |_| {
            calls += 1;
            async { Err(TestError::Broken) }
        })
        .await;

        assert_eq!(result, Err(TestError::Broken));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_exhausted_returns_last_error() {
        let ctx = CallContext::background();
        let mut calls = 0;
        let result: Result<(), TestError> = retry(&ctx, &mut NoRetry, |_| {
            calls += 1;
            async { Err(TestError::Busy) }
        })
        .await;

        assert_eq!(result, Err(TestError::Busy));
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_retrying() {
        let ctx = CallContext::background().with_timeout(Duration::from_secs(5));
        let mut backoff = ConstantBackoff::new(Duration::from_secs(2), None);
        let mut calls = 0;
        let result: Result<(), TestError> = retry(&ctx, &mut backoff, |_| {
            calls += 1;
            async { Err(TestError::Busy) }
        })
        .await;

        assert_eq!(result, Err(TestError::Cancelled(Cancelled::DeadlineExceeded)));
        assert_eq!(calls, 3);
    }
}
