use metrics::{describe_counter, describe_gauge};

pub const RETRY_ATTEMPTS_TOTAL: &str = "resilience_retry_attempts_total";
pub const BREAKER_TRANSITIONS_TOTAL: &str = "resilience_breaker_transitions_total";
pub const BREAKER_STATE: &str = "resilience_breaker_state";
pub const BREAKER_REJECTED_TOTAL: &str = "resilience_breaker_rejected_total";
pub const CACHE_HITS_TOTAL: &str = "resilience_cache_hits_total";
pub const CACHE_MISSES_TOTAL: &str = "resilience_cache_misses_total";
pub const CACHE_EVICTIONS_TOTAL: &str = "resilience_cache_evictions_total";
pub const FETCH_DEGRADED_TOTAL: &str = "resilience_fetch_degraded_total";

/// Register metric descriptions with the installed recorder.
///
/// Emission happens regardless; installing a recorder and exporting is the
/// host service's concern.
pub fn describe_metrics() {
    describe_counter!(
        RETRY_ATTEMPTS_TOTAL,
        "Total number of retry attempts after transient failures"
    );

    describe_counter!(
        BREAKER_TRANSITIONS_TOTAL,
        "Total number of circuit breaker state transitions"
    );
    describe_gauge!(
        BREAKER_STATE,
        "Circuit breaker state (0 = closed, 1 = open, 2 = half-open)"
    );
    describe_counter!(
        BREAKER_REJECTED_TOTAL,
        "Total number of calls rejected by an open circuit breaker"
    );

    describe_counter!(CACHE_HITS_TOTAL, "Total number of cache hits");
    describe_counter!(CACHE_MISSES_TOTAL, "Total number of cache misses");
    describe_counter!(
        CACHE_EVICTIONS_TOTAL,
        "Total number of entries evicted at capacity"
    );

    describe_counter!(
        FETCH_DEGRADED_TOTAL,
        "Total number of reads served from a stale or fallback source"
    );
}
