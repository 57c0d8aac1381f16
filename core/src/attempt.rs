//! Attempt records, observation events, and the successful-run result.
//!
//! One `RetryAttempt` is appended to the run's history per operation
//! invocation (and per terminal preflight failure). The outcome is a
//! sum type, so success and failure are mutually exclusive by
//! construction. Failure records share the operation error as
//! `Arc<E>` with emitted events and the terminal error.

use crate::circuit_breaker::CircuitState;
use crate::classifier::FailureDomain;
use crate::metrics::RetryMetrics;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// What made an attempt fail.
#[derive(Debug)]
pub enum FailureCause<E> {
    /// The operation itself returned an error.
    Operation(Arc<E>),
    /// The circuit breaker refused admission at preflight.
    CircuitOpen(CircuitState),
    /// Cancellation (or the deadline) was observed.
    Cancelled,
    /// Informational: preflight paused for the rate-limit window.
    RateLimitWait(Duration),
}

impl<E> Clone for FailureCause<E> {
    fn clone(&self) -> Self {
        match self {
            FailureCause::Operation(err) => FailureCause::Operation(Arc::clone(err)),
            FailureCause::CircuitOpen(state) => FailureCause::CircuitOpen(*state),
            FailureCause::Cancelled => FailureCause::Cancelled,
            FailureCause::RateLimitWait(wait) => FailureCause::RateLimitWait(*wait),
        }
    }
}

/// Outcome of one attempt: success, or failure with its domain.
#[derive(Debug)]
pub enum AttemptOutcome<E> {
    Succeeded,
    Failed {
        domain: FailureDomain,
        cause: FailureCause<E>,
    },
}

impl<E> Clone for AttemptOutcome<E> {
    fn clone(&self) -> Self {
        match self {
            AttemptOutcome::Succeeded => AttemptOutcome::Succeeded,
            AttemptOutcome::Failed { domain, cause } => AttemptOutcome::Failed {
                domain: *domain,
                cause: cause.clone(),
            },
        }
    }
}

/// One attempt record. Append-only; never mutated after creation.
#[derive(Debug)]
pub struct RetryAttempt<E> {
    /// 1-based, strictly increasing within one run.
    pub number: u32,
    pub outcome: AttemptOutcome<E>,
    /// The delay applied after this attempt. Zero for the terminal
    /// success and for failures that are not retried.
    pub delay: Duration,
    pub at: DateTime<Utc>,
}

impl<E> RetryAttempt<E> {
    pub fn succeeded(number: u32) -> Self {
        Self {
            number,
            outcome: AttemptOutcome::Succeeded,
            delay: Duration::ZERO,
            at: Utc::now(),
        }
    }

    pub fn failed(
        number: u32,
        domain: FailureDomain,
        cause: FailureCause<E>,
        delay: Duration,
    ) -> Self {
        Self {
            number,
            outcome: AttemptOutcome::Failed { domain, cause },
            delay,
            at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Succeeded)
    }

    /// The failure domain, for failed attempts.
    pub fn domain(&self) -> Option<FailureDomain> {
        match &self.outcome {
            AttemptOutcome::Succeeded => None,
            AttemptOutcome::Failed { domain, .. } => Some(*domain),
        }
    }

    /// The operation error, when this attempt failed with one.
    pub fn error(&self) -> Option<&E> {
        match &self.outcome {
            AttemptOutcome::Failed {
                cause: FailureCause::Operation(err),
                ..
            } => Some(err),
            _ => None,
        }
    }
}

impl<E> Clone for RetryAttempt<E> {
    fn clone(&self) -> Self {
        Self {
            number: self.number,
            outcome: self.outcome.clone(),
            delay: self.delay,
            at: self.at,
        }
    }
}

/// Event kind delivered to the observation hook.
///
/// Exactly one terminal kind (`Success`, `Failure`, or `Cancelled`)
/// is emitted per run, always last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryEventKind {
    Attempt,
    Success,
    Failure,
    Cancelled,
}

/// A transient observation emitted synchronously to the caller's
/// hook. Events are not stored by the engine.
#[derive(Debug)]
pub struct RetryEvent<E> {
    pub kind: RetryEventKind,
    pub attempt: RetryAttempt<E>,
    /// History length so far; preflight rate-limit waits do not
    /// advance it.
    pub attempts_so_far: u32,
    /// Estimated remaining wait before the next invocation.
    pub remaining_hint: Option<Duration>,
    pub is_final: bool,
}

/// Successful completion: the value, the full attempt history
/// (ownership transferred to the caller), and derived metrics.
#[derive(Debug)]
pub struct RetryResult<T, E> {
    pub value: T,
    pub attempts: Vec<RetryAttempt<E>>,
    pub metrics: RetryMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpError;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_outcome_accessors() {
        let ok: RetryAttempt<HttpError> = RetryAttempt::succeeded(3);
        assert!(ok.is_success());
        assert_eq!(ok.domain(), None);
        assert!(ok.error().is_none());
        assert_eq!(ok.delay, Duration::ZERO);

        let err = RetryAttempt::failed(
            1,
            FailureDomain::Transient,
            FailureCause::Operation(Arc::new(HttpError::new("boom").with_status(500))),
            Duration::from_millis(80),
        );
        assert!(!err.is_success());
        assert_eq!(err.domain(), Some(FailureDomain::Transient));
        assert_eq!(err.error().map(HttpError::status), Some(Some(500)));
    }

    #[test]
    fn test_clone_shares_the_error() {
        let source = Arc::new(HttpError::new("boom"));
        let record = RetryAttempt::failed(
            1,
            FailureDomain::Unknown,
            FailureCause::Operation(Arc::clone(&source)),
            Duration::ZERO,
        );

        let copy = record.clone();
        drop(record);

        // Two records plus the local handle point at one error.
        assert_eq!(Arc::strong_count(&source), 2);
        assert_eq!(copy.number, 1);
    }

    #[test]
    fn test_event_kind_serde_round_trip() {
        let json = serde_json::to_string(&RetryEventKind::Cancelled).expect("serialize kind");
        assert_eq!(json, "\"cancelled\"");
        let back: RetryEventKind = serde_json::from_str(&json).expect("deserialize kind");
        assert_eq!(back, RetryEventKind::Cancelled);
    }
}
