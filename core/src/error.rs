//! Terminal error taxonomy for the retry engine.
//!
//! Permanent and policy-declined failures surface the caller's
//! original error; everything else terminates with a dedicated
//! variant. Configuration problems are detected eagerly, before any
//! attempt runs.

use crate::circuit_breaker::CircuitState;
use crate::classifier::FailureDomain;
use std::sync::Arc;
use std::time::Duration;

/// Invalid engine or policy configuration, detected eagerly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("max_attempts must be at least 1 (got {0})")]
    MaxAttempts(u32),

    #[error("overall timeout must be greater than zero")]
    OverallTimeout,

    #[error("invalid backoff configuration: {0}")]
    Backoff(String),
}

/// Terminal outcome of a failed orchestration run.
///
/// The operation error is shared as `Arc<E>` with the attempt history
/// and any event clones, so the original error survives for
/// caller-side matching.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The original error, propagated without retry: the failure was
    /// classified permanent or the policy declined a delay.
    #[error("{0}")]
    Operation(Arc<E>),

    /// Every permitted attempt was consumed.
    #[error("operation failed after {attempts} attempts (last domain: {domain}): {last_error}")]
    Exhausted {
        attempts: u32,
        domain: FailureDomain,
        last_error: Arc<E>,
    },

    /// The externally supplied cancellation signal fired.
    #[error("retry cancelled by caller")]
    Cancelled,

    /// The overall deadline elapsed.
    #[error("retry deadline exceeded after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// The circuit breaker refused admission at preflight.
    #[error("circuit breaker is {state}")]
    CircuitOpen { state: CircuitState },

    #[error("invalid retry configuration: {0}")]
    Configuration(#[from] ConfigError),
}

impl<E> RetryError<E> {
    /// The operation error behind this terminal error, when there is
    /// one (`Operation` and `Exhausted` carry it).
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            RetryError::Operation(err) => Some(err),
            RetryError::Exhausted { last_error, .. } => Some(last_error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpError;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_display_messages() {
        let err: RetryError<HttpError> = RetryError::Exhausted {
            attempts: 3,
            domain: FailureDomain::Transient,
            last_error: Arc::new(HttpError::new("bad gateway").with_status(502)),
        };
        assert_eq!(
            err.to_string(),
            "operation failed after 3 attempts (last domain: transient): HTTP 502: bad gateway"
        );

        let open: RetryError<HttpError> = RetryError::CircuitOpen {
            state: CircuitState::Open,
        };
        assert_eq!(open.to_string(), "circuit breaker is open");
    }

    #[test]
    fn test_operation_variant_displays_original() {
        let err: RetryError<HttpError> =
            RetryError::Operation(Arc::new(HttpError::new("not found").with_status(404)));
        assert_eq!(err.to_string(), "HTTP 404: not found");
        assert_eq!(
            err.operation_error().and_then(HttpError::status),
            Some(404)
        );
    }

    #[test]
    fn test_config_error_converts() {
        let err: RetryError<HttpError> = ConfigError::MaxAttempts(0).into();
        assert!(matches!(
            err,
            RetryError::Configuration(ConfigError::MaxAttempts(0))
        ));
        assert_eq!(
            err.to_string(),
            "invalid retry configuration: max_attempts must be at least 1 (got 0)"
        );
    }
}
