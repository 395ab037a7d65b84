use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected until the cooldown elapses
    Open,
    /// Probe calls are testing whether the dependency recovered
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "Closed"),
            CircuitState::Open => write!(f, "Open"),
            CircuitState::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures while closed before opening the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive successes while half-open before closing
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Cooldown in milliseconds before an open circuit admits a probe
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Probe calls allowed in flight while half-open
    #[serde(default = "default_half_open_max_probes")]
    pub half_open_max_probes: u32,

    /// Per-call timeout in milliseconds; `None` disables it
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: Option<u64>,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_half_open_max_probes() -> u32 {
    3
}

fn default_request_timeout_ms() -> Option<u64> {
    Some(30_000)
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout_ms: default_timeout_ms(),
            half_open_max_probes: default_half_open_max_probes(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

/// Cumulative circuit breaker counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct CircuitBreakerMetrics {
    /// Calls admitted past the breaker
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Calls rejected without invoking the operation
    pub rejected_requests: u64,
    pub timeout_count: u64,
    pub circuit_opened_count: u64,
    pub circuit_half_opened_count: u64,
    pub circuit_closed_count: u64,
}

/// Point-in-time view of a breaker for health endpoints
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub resource: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Remaining cooldown before the next probe is admitted, if open
    pub next_attempt_in_ms: Option<u64>,
    /// Age of the most recent failure
    pub last_failure_age_ms: Option<u64>,
    pub metrics: CircuitBreakerMetrics,
}
