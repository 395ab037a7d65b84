use super::breaker::CircuitBreaker;
use super::types::{CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Breaker instances for a set of logical resources.
///
/// Owned by the composition root and handed out explicitly, so breaker
/// lifetime and test isolation do not depend on process-wide singletons.
/// All callers naming the same resource share one breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerRegistry {
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
    /// Configuration applied to resources without an explicit override
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    /// Create a registry with a default per-resource configuration
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: Arc::new(DashMap::new()),
            default_config,
        }
    }

    /// Get or create the breaker guarding a resource
    pub fn breaker(&self, resource: &str) -> Arc<CircuitBreaker> {
        self.breaker_with(resource, self.default_config.clone())
    }

    /// Get the breaker guarding a resource, creating it with a specific
    /// configuration. The configuration only applies on first creation;
    /// callers sharing a resource share its breaker as-is.
    pub fn breaker_with(&self, resource: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(resource.to_string())
            .or_insert_with(|| {
                debug!(resource, "Creating circuit breaker for resource");
                Arc::new(CircuitBreaker::new(resource.to_string(), config))
            })
            .clone()
    }

    /// Current state of a resource's breaker; an unknown resource reads as
    /// closed, since its first call would start that way
    pub async fn state(&self, resource: &str) -> CircuitState {
        match self.breakers.get(resource) {
            Some(breaker) => breaker.state().await,
            None => CircuitState::Closed,
        }
    }

    /// Resources with a registered breaker
    pub fn resources(&self) -> Vec<String> {
        self.breakers.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshots of every registered breaker, for health endpoints
    pub async fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|e| e.value().clone()).collect();

        let mut results = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            results.push(breaker.snapshot().await);
        }
        results
    }
}
