use super::types::{CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerSnapshot, CircuitState};
use crate::error::ResilienceError;
use crate::metrics::{BREAKER_REJECTED_TOTAL, BREAKER_STATE, BREAKER_TRANSITIONS_TOTAL};
use metrics::{counter, gauge};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Circuit breaker guarding one logical resource.
///
/// Bookkeeping lives behind a single lock per instance; the guarded operation
/// itself always runs with no lock held, so a slow remote call never
/// serializes unrelated breaker traffic.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: RwLock<State>,
    /// Logical resource this breaker guards (e.g. a table name)
    resource: String,
}

#[derive(Debug)]
struct State {
    circuit_state: CircuitState,
    /// Consecutive failures observed while closed; reset on every transition
    /// into closed and on any closed-state success
    consecutive_failures: u32,
    /// Consecutive successes observed while half-open
    consecutive_successes: u32,
    /// Probe calls currently in flight while half-open
    half_open_probes: u32,
    /// While open, calls before this instant are rejected
    next_attempt_at: Option<Instant>,
    /// Diagnostic only
    last_failure_at: Option<Instant>,
    metrics: CircuitBreakerMetrics,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(resource: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let resource = resource.into();
        info!(
            resource = %resource,
            failure_threshold = config.failure_threshold,
            success_threshold = config.success_threshold,
            timeout_ms = config.timeout_ms,
            "Creating circuit breaker"
        );

        Self {
            config,
            state: RwLock::new(State {
                circuit_state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                half_open_probes: 0,
                next_attempt_at: None,
                last_failure_at: None,
                metrics: CircuitBreakerMetrics::default(),
            }),
            resource,
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Run an operation under the breaker.
    ///
    /// While open and cooling down, the call is rejected with
    /// [`ResilienceError::CircuitOpen`] and the operation is never invoked.
    /// Operation errors pass through unchanged inside
    /// [`ResilienceError::Inner`]; a per-call timeout surfaces as
    /// [`ResilienceError::Timeout`] and counts as a failure.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if let Err(retry_after) = self.admit().await {
            return Err(ResilienceError::CircuitOpen {
                resource: self.resource.clone(),
                retry_after_ms: retry_after.as_millis() as u64,
            });
        }

        let outcome = match self.config.request_timeout() {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(result) => result.map_err(ResilienceError::Inner),
                Err(_) => Err(ResilienceError::timeout(limit)),
            },
            None => operation().await.map_err(ResilienceError::Inner),
        };

        match &outcome {
            Ok(_) => self.record_success().await,
            Err(ResilienceError::Timeout { elapsed_ms }) => {
                warn!(
                    resource = %self.resource,
                    elapsed_ms,
                    "Guarded operation timed out"
                );
                self.record_timeout().await;
            }
            Err(ResilienceError::Inner(e)) => {
                debug!(resource = %self.resource, error = %e, "Guarded operation failed");
                self.record_failure().await;
            }
            // Rejections are produced before the operation runs
            Err(ResilienceError::CircuitOpen { .. }) => {}
        }

        outcome
    }

    /// Run an operation under the breaker, degrading to `fallback` on
    /// rejection or terminal failure. The fallback's value is returned as a
    /// normal success; fallbacks are infallible by signature.
    pub async fn execute_with_fallback<T, E, F, Fut, FB>(&self, operation: F, fallback: FB) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        FB: FnOnce() -> T,
    {
        match self.execute(operation).await {
            Ok(value) => value,
            Err(e) => {
                warn!(resource = %self.resource, error = %e, "Serving fallback value");
                fallback()
            }
        }
    }

    /// Admission check; `Err` carries the remaining cooldown
    async fn admit(&self) -> Result<(), Duration> {
        let mut state = self.state.write().await;

        match state.circuit_state {
            CircuitState::Closed => {
                state.metrics.total_requests += 1;
                Ok(())
            }
            CircuitState::Open => {
                let now = Instant::now();
                match state.next_attempt_at {
                    Some(at) if now >= at => {
                        self.transition_to_half_open(&mut state);
                        state.metrics.total_requests += 1;
                        state.half_open_probes += 1;
                        Ok(())
                    }
                    Some(at) => {
                        state.metrics.rejected_requests += 1;
                        counter!(BREAKER_REJECTED_TOTAL, "resource" => self.resource.clone())
                            .increment(1);
                        debug!(
                            resource = %self.resource,
                            retry_after_ms = (at - now).as_millis() as u64,
                            "Circuit open, rejecting call"
                        );
                        Err(at - now)
                    }
                    None => {
                        warn!(resource = %self.resource, "Circuit open without a probe deadline");
                        state.metrics.rejected_requests += 1;
                        Err(self.config.timeout())
                    }
                }
            }
            CircuitState::HalfOpen => {
                if state.half_open_probes < self.config.half_open_max_probes {
                    state.metrics.total_requests += 1;
                    state.half_open_probes += 1;
                    debug!(
                        resource = %self.resource,
                        probes = state.half_open_probes,
                        max = self.config.half_open_max_probes,
                        "Admitting half-open probe"
                    );
                    Ok(())
                } else {
                    state.metrics.rejected_requests += 1;
                    counter!(BREAKER_REJECTED_TOTAL, "resource" => self.resource.clone())
                        .increment(1);
                    debug!(resource = %self.resource, "Probe limit reached, rejecting call");
                    Err(Duration::ZERO)
                }
            }
        }
    }

    async fn record_success(&self) {
        let mut state = self.state.write().await;
        state.metrics.successful_requests += 1;

        match state.circuit_state {
            CircuitState::Closed => {
                state.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                state.consecutive_successes += 1;
                state.half_open_probes = state.half_open_probes.saturating_sub(1);

                debug!(
                    resource = %self.resource,
                    consecutive_successes = state.consecutive_successes,
                    threshold = self.config.success_threshold,
                    "Half-open probe succeeded"
                );

                if state.consecutive_successes >= self.config.success_threshold {
                    self.transition_to_closed(&mut state);
                }
            }
            CircuitState::Open => {
                // A probe result can land after a concurrent probe reopened us
                debug!(resource = %self.resource, "Success recorded while open");
            }
        }
    }

    async fn record_failure(&self) {
        let mut state = self.state.write().await;
        state.metrics.failed_requests += 1;
        state.last_failure_at = Some(Instant::now());

        match state.circuit_state {
            CircuitState::Closed => {
                state.consecutive_failures += 1;

                debug!(
                    resource = %self.resource,
                    consecutive_failures = state.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    "Call failed in closed state"
                );

                if state.consecutive_failures >= self.config.failure_threshold {
                    self.transition_to_open(&mut state);
                }
            }
            CircuitState::HalfOpen => {
                state.half_open_probes = state.half_open_probes.saturating_sub(1);
                warn!(
                    resource = %self.resource,
                    "Half-open probe failed, reopening circuit"
                );
                // A single half-open failure reopens, regardless of the
                // failure threshold; consecutive_failures is untouched
                self.transition_to_open(&mut state);
            }
            CircuitState::Open => {
                debug!(resource = %self.resource, "Failure recorded while open");
            }
        }
    }

    async fn record_timeout(&self) {
        {
            let mut state = self.state.write().await;
            state.metrics.timeout_count += 1;
        }
        // A timeout is a failure for state-machine purposes
        self.record_failure().await;
    }

    /// Get current state
    pub async fn state(&self) -> CircuitState {
        self.state.read().await.circuit_state
    }

    /// Get cumulative counters
    pub async fn metrics(&self) -> CircuitBreakerMetrics {
        self.state.read().await.metrics.clone()
    }

    /// Point-in-time view for health endpoints
    pub async fn snapshot(&self) -> CircuitBreakerSnapshot {
        let state = self.state.read().await;
        let now = Instant::now();

        CircuitBreakerSnapshot {
            resource: self.resource.clone(),
            state: state.circuit_state,
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
            next_attempt_in_ms: state
                .next_attempt_at
                .map(|at| at.saturating_duration_since(now).as_millis() as u64),
            last_failure_age_ms: state
                .last_failure_at
                .map(|at| now.saturating_duration_since(at).as_millis() as u64),
            metrics: state.metrics.clone(),
        }
    }

    fn transition_to_open(&self, state: &mut State) {
        info!(
            resource = %self.resource,
            consecutive_failures = state.consecutive_failures,
            cooldown_ms = self.config.timeout_ms,
            "Circuit breaker opening"
        );

        state.circuit_state = CircuitState::Open;
        state.next_attempt_at = Some(Instant::now() + self.config.timeout());
        state.consecutive_successes = 0;
        state.half_open_probes = 0;
        state.metrics.circuit_opened_count += 1;
        self.emit_transition("open", 1.0);
    }

    fn transition_to_half_open(&self, state: &mut State) {
        info!(
            resource = %self.resource,
            "Circuit breaker transitioning to half-open"
        );

        state.circuit_state = CircuitState::HalfOpen;
        state.consecutive_successes = 0;
        state.half_open_probes = 0;
        state.metrics.circuit_half_opened_count += 1;
        self.emit_transition("half_open", 2.0);
    }

    fn transition_to_closed(&self, state: &mut State) {
        info!(
            resource = %self.resource,
            consecutive_successes = state.consecutive_successes,
            "Circuit breaker closing"
        );

        state.circuit_state = CircuitState::Closed;
        state.next_attempt_at = None;
        state.consecutive_failures = 0;
        state.consecutive_successes = 0;
        state.half_open_probes = 0;
        state.metrics.circuit_closed_count += 1;
        self.emit_transition("closed", 0.0);
    }

    fn emit_transition(&self, to: &'static str, gauge_value: f64) {
        counter!(
            BREAKER_TRANSITIONS_TOTAL,
            "resource" => self.resource.clone(),
            "to" => to
        )
        .increment(1);
        gauge!(BREAKER_STATE, "resource" => self.resource.clone()).set(gauge_value);
    }
}
