//! Resilience layer for calls to an unreliable remote key/document store.
//!
//! Three composable primitives — a retry executor with exponential backoff,
//! a circuit breaker, and a TTL-bounded cache — plus the access convention
//! composing them: cache-first read, breaker-guarded call, retry inside the
//! call, graceful degradation on protracted failure.
//!
//! All configuration arrives through constructor arguments; instances are
//! explicitly built and owned by the composition root, one per logical
//! resource.

pub mod access;
pub mod breaker;
pub mod cache;
pub mod error;
pub mod metrics;
pub mod retry;

pub use access::{DataSource, Fetched, ResilientResource, ResourceConfig};
pub use breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerRegistry,
    CircuitBreakerSnapshot, CircuitState,
};
pub use cache::{CacheStats, TtlCache, TtlCacheConfig};
pub use error::{Classify, ErrorClass, ResilienceError, StoreError, StoreResult};
pub use retry::{
    retry_with_backoff, NoopObserver, RetryExecutor, RetryObserver, RetryPolicy, TracingObserver,
};

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "resilience=debug".into()),
        )
        .with_target(false)
        .compact()
        .init();
}
