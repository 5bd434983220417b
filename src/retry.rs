//! Bounded retry with backoff, modelled as an explicit state machine.
//!
//! [`Backoff`] owns the attempt counter and the delay schedule and answers
//! one question after every failure: retry after some delay, or give up.
//! [`with_backoff`] drives an async operation through it. Both the fetcher's
//! per-request retries and the orchestrator's per-task retries use it.
//!
//! # Delay schedule
//!
//! ```text
//! exponential: delay = min(base_delay * 2^(attempt-1), max_delay) + jitter(0..=jitter)
//! fixed:       delay = base_delay + jitter(0..=jitter)
//! ```

use crate::error::{PipelineError, Result};
use rand::{Rng, rng};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    Exponential,
    Fixed,
}

/// How many times to try, and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Upper bound of the random delay added to every backoff.
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(30),
            strategy: BackoffStrategy::Exponential,
            jitter: Duration::from_millis(250),
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: Duration::ZERO,
        }
    }

    /// Deterministic part of the delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let shift = attempt.saturating_sub(1).min(31);
                self.base_delay
                    .saturating_mul(1u32 << shift)
                    .min(self.max_delay)
            }
        }
    }
}

#[cfg(test)]
impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Attempt counter plus policy. One instance per logical operation.
#[derive(Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    failures: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    /// Number of failures recorded so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a failure and decide what happens next.
    pub fn on_failure(&mut self, err: &PipelineError) -> RetryDecision {
        self.record(err.is_retryable())
    }

    fn record(&mut self, retryable: bool) -> RetryDecision {
        self.failures += 1;
        if !retryable || self.failures >= self.policy.max_attempts {
            return RetryDecision::GiveUp;
        }
        let mut delay = self.policy.delay_for(self.failures);
        let jitter_ms = self.policy.jitter.as_millis() as u64;
        if jitter_ms > 0 {
            delay += Duration::from_millis(rng().random_range(0..=jitter_ms));
        }
        RetryDecision::RetryAfter(delay)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are exhausted. `op` receives the 1-based attempt number.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, operation: &str, op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_backoff_if(policy, operation, PipelineError::is_retryable, op).await
}

/// Like [`with_backoff`], with the caller deciding which errors are retried.
pub async fn with_backoff_if<T, F, Fut, R>(
    policy: &RetryPolicy,
    operation: &str,
    retryable: R,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    R: Fn(&PipelineError) -> bool,
{
    let total_t0 = Instant::now();
    let mut backoff = Backoff::new(policy.clone());

    loop {
        let attempt = backoff.failures() + 1;
        let attempt_t0 = Instant::now();
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => match backoff.record(retryable(&e)) {
                RetryDecision::GiveUp => {
                    error!(
                        operation,
                        attempt,
                        max = policy.max_attempts,
                        retryable = retryable(&e),
                        elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                        error = %e,
                        "giving up"
                    );
                    return Err(e);
                }
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        operation,
                        attempt,
                        max = policy.max_attempts,
                        elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64,
                        ?delay,
                        error = %e,
                        "attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn transient() -> PipelineError {
        PipelineError::TransientNetwork("connection reset".into())
    }

    #[test]
    fn test_exponential_schedule_is_capped() {
        let policy = RetryPolicy::exponential(10, Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(5), Duration::from_secs(16));
        assert_eq!(policy.delay_for(6), Duration::from_secs(30));
        assert_eq!(policy.delay_for(40), Duration::from_secs(30));
    }

    #[test]
    fn test_fixed_schedule() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(300));
        assert_eq!(policy.delay_for(1), Duration::from_secs(300));
        assert_eq!(policy.delay_for(2), Duration::from_secs(300));
    }

    #[test]
    fn test_backoff_gives_up_after_max_attempts() {
        let policy = RetryPolicy::exponential(3, Duration::from_millis(10)).with_jitter(Duration::ZERO);
        let mut backoff = Backoff::new(policy);
        assert_eq!(
            backoff.on_failure(&transient()),
            RetryDecision::RetryAfter(Duration::from_millis(10))
        );
        assert_eq!(
            backoff.on_failure(&transient()),
            RetryDecision::RetryAfter(Duration::from_millis(20))
        );
        assert_eq!(backoff.on_failure(&transient()), RetryDecision::GiveUp);
        assert_eq!(backoff.failures(), 3);
    }

    #[test]
    fn test_backoff_gives_up_immediately_on_fatal_error() {
        let mut backoff = Backoff::new(RetryPolicy::exponential(5, Duration::from_millis(1)));
        let decision = backoff.on_failure(&PipelineError::Auth("apiKeyInvalid".into()));
        assert_eq!(decision, RetryDecision::GiveUp);
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let policy = RetryPolicy::fixed(10, Duration::from_millis(100)).with_jitter(Duration::from_millis(50));
        let mut backoff = Backoff::new(policy);
        for _ in 0..5 {
            match backoff.on_failure(&transient()) {
                RetryDecision::RetryAfter(d) => {
                    assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(150))
                }
                RetryDecision::GiveUp => panic!("should retry"),
            }
        }
    }

    #[tokio::test]
    async fn test_with_backoff_recovers_from_transient_failures() {
        let calls = Cell::new(0u32);
        let policy = RetryPolicy::fixed(3, Duration::ZERO);
        let result = with_backoff(&policy, "test", |attempt| {
            calls.set(calls.get() + 1);
            async move {
                if attempt < 3 {
                    Err(transient())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_with_backoff_surfaces_last_error() {
        let calls = Cell::new(0u32);
        let policy = RetryPolicy::fixed(2, Duration::ZERO);
        let result: Result<()> = with_backoff(&policy, "test", |_| {
            calls.set(calls.get() + 1);
            async { Err(transient()) }
        })
        .await;
        assert!(matches!(result, Err(PipelineError::TransientNetwork(_))));
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn test_with_backoff_if_narrows_retries() {
        let calls = Cell::new(0u32);
        let policy = RetryPolicy::fixed(3, Duration::ZERO);
        let result: Result<()> = with_backoff_if(
            &policy,
            "test",
            |e| matches!(e, PipelineError::TransientNetwork(_)),
            |_| {
                calls.set(calls.get() + 1);
                async { Err(PipelineError::Warehouse("syntax error".into())) }
            },
        )
        .await;
        assert!(matches!(result, Err(PipelineError::Warehouse(_))));
        assert_eq!(calls.get(), 1);
    }
}
