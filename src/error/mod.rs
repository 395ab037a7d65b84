use std::time::Duration;
use thiserror::Error;

/// Result type for remote store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// How a failure should be treated by the retry layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Expected to resolve shortly; safe to retry
    Transient,
    /// Will not resolve by retrying; fail fast
    Permanent,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::Permanent => write!(f, "permanent"),
        }
    }
}

/// Classification of an error as transient or permanent.
///
/// Implemented by the transport layer on its error type so classification is
/// compile-time checked. Anything not explicitly transient must classify as
/// permanent.
pub trait Classify {
    fn class(&self) -> ErrorClass;

    fn is_transient(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient)
    }
}

/// Errors reported by the remote key/document store transport.
///
/// This is the default transport taxonomy; callers with their own transport
/// error type implement [`Classify`] on it instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store overloaded: {0}")]
    Overloaded(String),

    #[error("request throttled: {0}")]
    Throttled(String),

    #[error("store temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed request: {0}")]
    BadRequest(String),

    #[error("authorization failed: {0}")]
    Unauthorized(String),

    #[error("unexpected store response: {0}")]
    Unexpected(String),
}

impl Classify for StoreError {
    fn class(&self) -> ErrorClass {
        match self {
            StoreError::Overloaded(_)
            | StoreError::Throttled(_)
            | StoreError::Unavailable(_)
            | StoreError::Network(_) => ErrorClass::Transient,
            StoreError::BadRequest(_) | StoreError::Unauthorized(_) | StoreError::Unexpected(_) => {
                ErrorClass::Permanent
            }
        }
    }
}

/// Terminal outcome of a guarded call.
///
/// Operation errors pass through [`ResilienceError::Inner`] unchanged; the
/// other variants are conditions this layer raises itself and never come from
/// the wrapped operation.
#[derive(Error, Debug)]
pub enum ResilienceError<E> {
    /// The operation's own error, surfaced unchanged
    #[error(transparent)]
    Inner(E),

    /// Rejected without invoking the operation: the breaker is open and the
    /// cooldown has not elapsed
    #[error("circuit open for {resource}; next probe in {retry_after_ms}ms")]
    CircuitOpen { resource: String, retry_after_ms: u64 },

    /// The operation outlived the per-call timeout
    #[error("operation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },
}

impl<E> ResilienceError<E> {
    /// The operation error, if this outcome carries one
    pub fn into_inner(self) -> Option<E> {
        match self {
            ResilienceError::Inner(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ResilienceError::CircuitOpen { .. })
    }

    pub fn timeout(elapsed: Duration) -> Self {
        ResilienceError::Timeout {
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Overloaded("capacity".into()).is_transient());
        assert!(StoreError::Throttled("rate".into()).is_transient());
        assert!(StoreError::Unavailable("maintenance".into()).is_transient());
        assert!(StoreError::Network("reset".into()).is_transient());
    }

    #[test]
    fn test_permanent_classification() {
        assert!(!StoreError::BadRequest("bad key".into()).is_transient());
        assert!(!StoreError::Unauthorized("expired token".into()).is_transient());
        // Unrecognized store responses fail fast rather than retry forever
        assert!(!StoreError::Unexpected("???".into()).is_transient());
    }

    #[test]
    fn test_inner_error_passes_through_unchanged() {
        let err: ResilienceError<StoreError> =
            ResilienceError::Inner(StoreError::Unauthorized("expired token".into()));
        assert_eq!(err.to_string(), "authorization failed: expired token");
        assert_eq!(
            err.into_inner(),
            Some(StoreError::Unauthorized("expired token".into()))
        );
    }

    #[test]
    fn test_circuit_open_display() {
        let err: ResilienceError<StoreError> = ResilienceError::CircuitOpen {
            resource: "appointments".to_string(),
            retry_after_ms: 1500,
        };
        assert!(err.is_circuit_open());
        assert_eq!(
            err.to_string(),
            "circuit open for appointments; next probe in 1500ms"
        );
        assert!(err.into_inner().is_none());
    }
}
