use crate::breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::cache::{TtlCache, TtlCacheConfig};
use crate::error::{Classify, ResilienceError};
use crate::metrics::FETCH_DEGRADED_TOTAL;
use crate::retry::{RetryExecutor, RetryObserver, RetryPolicy};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a fetched value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataSource {
    /// Fresh from the remote store
    Remote,
    /// Served from the cache within its TTL
    Cache,
    /// Served from the cache after the remote path failed
    Stale,
    /// Caller-supplied degraded substitute
    Fallback,
}

/// A value plus its provenance, so callers can mark degraded responses
/// instead of presenting substitute data as fresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched<V> {
    pub value: V,
    pub source: DataSource,
}

impl<V> Fetched<V> {
    pub fn is_degraded(&self) -> bool {
        matches!(self.source, DataSource::Stale | DataSource::Fallback)
    }
}

/// Per-resource resilience configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub cache: TtlCacheConfig,
}

/// Resilient read access to one logical remote resource.
///
/// Every read follows the same convention: cache first; on a miss, the
/// remote load runs inside the retry executor inside the breaker; the cache
/// is populated only on a confirmed remote success; protracted failure
/// degrades to a fallback or to recent cached data rather than an outage.
pub struct ResilientResource<V> {
    name: String,
    cache: TtlCache<String, V>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryExecutor,
}

impl<V> std::fmt::Debug for ResilientResource<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientResource")
            .field("name", &self.name)
            .field("breaker", &self.breaker)
            .finish()
    }
}

impl<V> ResilientResource<V>
where
    V: Clone,
{
    /// Create a resource with its own breaker
    pub fn new(name: impl Into<String>, config: ResourceConfig) -> Self {
        let name = name.into();
        let breaker = Arc::new(CircuitBreaker::new(name.clone(), config.breaker.clone()));
        Self::with_breaker(name, config, breaker)
    }

    /// Create a resource sharing an externally owned breaker, typically one
    /// handed out by a [`CircuitBreakerRegistry`](crate::breaker::CircuitBreakerRegistry)
    pub fn with_breaker(
        name: impl Into<String>,
        config: ResourceConfig,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let name = name.into();
        Self {
            cache: TtlCache::new(name.clone(), config.cache),
            retry: RetryExecutor::new(config.retry),
            breaker,
            name,
        }
    }

    /// Replace the retry observer (logging/metrics backends per deployment)
    pub fn with_retry_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        let policy = self.retry.policy().clone();
        self.retry = RetryExecutor::with_observer(policy, observer);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn cache(&self) -> &TtlCache<String, V> {
        &self.cache
    }

    /// Resilient read with no fallback.
    ///
    /// On a cache miss the load runs retried and breaker-guarded. If that
    /// ultimately fails, the cache is consulted once more — a concurrent
    /// caller may have repopulated it — and a value found there is served as
    /// [`DataSource::Stale`]; only then does the error surface, unchanged.
    pub async fn fetch<E, F, Fut>(
        &self,
        key: &str,
        load: F,
    ) -> Result<Fetched<V>, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<V, E>>,
        E: Classify + std::error::Error,
    {
        let cache_key = key.to_string();

        if let Some(value) = self.cache.get(&cache_key).await {
            debug!(resource = %self.name, "Serving cached value");
            return Ok(Fetched {
                value,
                source: DataSource::Cache,
            });
        }

        match self.load_remote(&cache_key, load).await {
            Ok(value) => Ok(Fetched {
                value,
                source: DataSource::Remote,
            }),
            Err(err) => {
                if let Some(value) = self.cache.get(&cache_key).await {
                    warn!(
                        resource = %self.name,
                        error = %err,
                        "Remote load failed, serving stale cached value"
                    );
                    counter!(
                        FETCH_DEGRADED_TOTAL,
                        "resource" => self.name.clone(),
                        "source" => "stale"
                    )
                    .increment(1);
                    return Ok(Fetched {
                        value,
                        source: DataSource::Stale,
                    });
                }
                Err(err)
            }
        }
    }

    /// Resilient read degrading to `fallback` on rejection or terminal
    /// failure. The fallback value is never cached — the cache holds only
    /// confirmed remote data — and the result's source marks it degraded.
    pub async fn fetch_or<E, F, Fut, FB>(&self, key: &str, load: F, fallback: FB) -> Fetched<V>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<V, E>>,
        E: Classify + std::error::Error,
        FB: FnOnce() -> V,
    {
        let cache_key = key.to_string();

        if let Some(value) = self.cache.get(&cache_key).await {
            debug!(resource = %self.name, "Serving cached value");
            return Fetched {
                value,
                source: DataSource::Cache,
            };
        }

        match self.load_remote(&cache_key, load).await {
            Ok(value) => Fetched {
                value,
                source: DataSource::Remote,
            },
            Err(err) => {
                warn!(
                    resource = %self.name,
                    error = %err,
                    "Remote load failed, serving fallback value"
                );
                counter!(
                    FETCH_DEGRADED_TOTAL,
                    "resource" => self.name.clone(),
                    "source" => "fallback"
                )
                .increment(1);
                Fetched {
                    value: fallback(),
                    source: DataSource::Fallback,
                }
            }
        }
    }

    /// Breaker-guarded, retried load; populates the cache on success only
    async fn load_remote<E, F, Fut>(
        &self,
        cache_key: &str,
        mut load: F,
    ) -> Result<V, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<V, E>>,
        E: Classify + std::error::Error,
    {
        let value = self.breaker.execute(|| self.retry.run(&mut load)).await?;
        self.cache
            .insert(cache_key.to_string(), value.clone())
            .await;
        Ok(value)
    }
}
