use crate::error::Classify;
use crate::metrics::RETRY_ATTEMPTS_TOTAL;
use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Retry policy with exponential backoff
///
/// The delay preceding attempt `n` (0-indexed) is
/// `min(initial_delay * backoff_factor^n, max_delay)`, so the first sleep is
/// already one factor step above `initial_delay`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (1 = single attempt, no retries)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff duration in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Maximum backoff duration in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Backoff multiplier, must be greater than 1
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    10000
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl RetryPolicy {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Check the policy's numeric constraints
    pub fn validate(&self) -> Result<(), InvalidPolicy> {
        if self.max_retries == 0 {
            return Err(InvalidPolicy::ZeroAttempts);
        }
        if self.backoff_factor <= 1.0 {
            return Err(InvalidPolicy::FactorNotAboveOne(self.backoff_factor));
        }
        Ok(())
    }
}

/// Policy constraint violations reported by [`RetryPolicy::validate`]
#[derive(Error, Debug, PartialEq)]
pub enum InvalidPolicy {
    #[error("max_retries must be at least 1")]
    ZeroAttempts,

    #[error("backoff_factor must be greater than 1 (got {0})")]
    FactorNotAboveOne(f64),
}

/// Observer notified before each backoff sleep.
///
/// `attempt` is the 0-indexed attempt that just failed, `delay` the sleep
/// about to be taken. Implementations are infallible by construction and
/// cannot abort the retry loop.
pub trait RetryObserver: Send + Sync {
    fn on_retry(&self, attempt: u32, delay: Duration, error: &dyn std::error::Error);
}

/// Observer that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RetryObserver for NoopObserver {
    fn on_retry(&self, _attempt: u32, _delay: Duration, _error: &dyn std::error::Error) {}
}

/// Observer that logs each retry at warn level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RetryObserver for TracingObserver {
    fn on_retry(&self, attempt: u32, delay: Duration, error: &dyn std::error::Error) {
        warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying after transient failure"
        );
    }
}

/// Retry executor with exponential backoff and error classification
pub struct RetryExecutor {
    policy: RetryPolicy,
    observer: Arc<dyn RetryObserver>,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("observer", &"<observer>")
            .finish()
    }
}

impl RetryExecutor {
    /// Create a new retry executor
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Create a retry executor with an injected observer
    pub fn with_observer(policy: RetryPolicy, observer: Arc<dyn RetryObserver>) -> Self {
        Self { policy, observer }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute an operation, retrying transient failures with backoff.
    ///
    /// Permanent errors and the final transient error propagate unchanged.
    /// Dropping the returned future between attempts abandons the loop.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: Classify + std::error::Error,
    {
        // validate() enforces >= 1; a zero still performs one attempt
        let max_attempts = self.policy.max_retries.max(1);
        let mut backoff = self.create_backoff();

        for attempt in 0..max_attempts {
            debug!(attempt, max_attempts, "Executing operation");

            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(attempt, "Operation succeeded after retries");
                    }
                    return Ok(result);
                }
                Err(e) => {
                    if !e.is_transient() {
                        debug!(attempt, error = %e, "Permanent error, not retrying");
                        return Err(e);
                    }

                    if attempt + 1 == max_attempts {
                        warn!(
                            attempts = max_attempts,
                            error = %e,
                            "Operation failed after max attempts"
                        );
                        return Err(e);
                    }

                    if let Some(delay) = backoff.next_backoff() {
                        counter!(RETRY_ATTEMPTS_TOTAL).increment(1);
                        self.observer.on_retry(attempt, delay, &e);
                        debug!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Transient error, retrying after backoff"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        warn!(attempt, error = %e, "Backoff exhausted");
                        return Err(e);
                    }
                }
            }
        }

        unreachable!("retry loop returns on the final attempt")
    }

    /// The first interval is one factor step above the initial delay, so the
    /// sleep preceding attempt n is initial * factor^n. Randomization is off
    /// to keep the schedule deterministic.
    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.policy.initial_delay().mul_f64(self.policy.backoff_factor))
            .with_max_interval(self.policy.max_delay())
            .with_multiplier(self.policy.backoff_factor)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None) // max attempts handled by the loop
            .build()
    }
}

/// One-shot convenience for call sites that do not hold an executor
pub async fn retry_with_backoff<T, E, F, Fut>(operation: F, policy: RetryPolicy) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Classify + std::error::Error,
{
    RetryExecutor::new(policy).run(operation).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay_ms: 10,
            max_delay_ms: 40,
            backoff_factor: 2.0,
        }
    }

    #[test]
    fn test_policy_validation() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert_eq!(
            RetryPolicy {
                max_retries: 0,
                ..Default::default()
            }
            .validate(),
            Err(InvalidPolicy::ZeroAttempts)
        );
        assert_eq!(
            RetryPolicy {
                backoff_factor: 1.0,
                ..Default::default()
            }
            .validate(),
            Err(InvalidPolicy::FactorNotAboveOne(1.0))
        );
    }

    #[test]
    fn test_backoff_schedule_is_deterministic_and_capped() {
        let executor = RetryExecutor::new(RetryPolicy {
            max_retries: 5,
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            backoff_factor: 2.0,
        });

        let mut backoff = executor.create_backoff();
        let delays: Vec<u64> = (0..4)
            .map(|_| backoff.next_backoff().unwrap().as_millis() as u64)
            .collect();

        // Sleeps preceding attempts 1..4: doubled each time, capped at max
        assert_eq!(delays, vec![200, 400, 800, 1000]);
    }

    #[tokio::test]
    async fn test_succeeds_immediately() {
        let executor = RetryExecutor::new(fast_policy(3));
        let attempts = AtomicU32::new(0);

        let result = executor
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, StoreError>("success") }
            })
            .await;

        assert_eq!(result, Ok("success"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let executor = RetryExecutor::new(fast_policy(3));
        let attempts = AtomicU32::new(0);

        let result = executor
            .run(|| {
                let current = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if current < 2 {
                        Err(StoreError::Throttled("slow down".into()))
                    } else {
                        Ok("success")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("success"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_performs_exactly_max_attempts() {
        let executor = RetryExecutor::new(fast_policy(3));
        let attempts = AtomicU32::new(0);

        let result = executor
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(StoreError::Unavailable("maintenance".into())) }
            })
            .await;

        // Final transient error surfaces unchanged
        assert_eq!(result, Err(StoreError::Unavailable("maintenance".into())));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_short_circuits() {
        let executor = RetryExecutor::new(fast_policy(5));
        let attempts = AtomicU32::new(0);

        let start = Instant::now();
        let result = executor
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(StoreError::Unauthorized("expired token".into())) }
            })
            .await;

        assert_eq!(result, Err(StoreError::Unauthorized("expired token".into())));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        // No backoff sleep on the permanent path
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_single_attempt_policy_never_sleeps() {
        let executor = RetryExecutor::new(fast_policy(1));
        let attempts = AtomicU32::new(0);

        let start = Instant::now();
        let result = executor
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(StoreError::Network("reset".into())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_retry_with_backoff_free_function() {
        let attempts = AtomicU32::new(0);

        let result = retry_with_backoff(
            || {
                let current = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if current == 0 {
                        Err(StoreError::Network("reset".into()))
                    } else {
                        Ok(5)
                    }
                }
            },
            fast_policy(2),
        )
        .await;

        assert_eq!(result, Ok(5));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    struct RecordingObserver {
        seen: Mutex<Vec<(u32, u64)>>,
    }

    impl RetryObserver for RecordingObserver {
        fn on_retry(&self, attempt: u32, delay: Duration, _error: &dyn std::error::Error) {
            self.seen
                .lock()
                .unwrap()
                .push((attempt, delay.as_millis() as u64));
        }
    }

    #[tokio::test]
    async fn test_observer_sees_each_retry_with_its_delay() {
        let observer = Arc::new(RecordingObserver {
            seen: Mutex::new(Vec::new()),
        });
        let executor = RetryExecutor::with_observer(fast_policy(4), observer.clone());

        let _ = executor
            .run(|| async { Err::<(), _>(StoreError::Overloaded("capacity".into())) })
            .await;

        // Failed attempts 0..2 trigger sleeps of 20, 40, then capped 40 ms
        assert_eq!(*observer.seen.lock().unwrap(), vec![(0, 20), (1, 40), (2, 40)]);
    }
}
