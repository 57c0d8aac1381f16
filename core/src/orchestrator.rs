//! The retry orchestration loop.
//!
//! Drives attempts against a user-supplied operation: preflight
//! checks (cancellation, circuit-breaker admission, rate-limit
//! exhaustion), the invocation itself, failure classification, delay
//! computation with the Retry-After override, event emission, and
//! cancellable inter-attempt sleeps.
//!
//! The in-flight invocation is never raced against cancellation; a
//! signal is observed at the next preflight check or during a sleep.
//! Timers backing the overall deadline are scoped to the run and
//! released on every exit path.
//!
//! # Example
//! ```ignore
//! use redrive_core::{retry, HttpError, RetryOptions};
//!
//! let result = retry(
//!     || async { fetch_report().await },
//!     RetryOptions {
//!         max_attempts: 5,
//!         overall_timeout: Some(Duration::from_secs(30)),
//!         ..RetryOptions::default()
//!     },
//! )
//! .await?;
//! println!("{} after {} attempts", result.value, result.attempts.len());
//! ```

use crate::attempt::FailureCause;
use crate::attempt::RetryAttempt;
use crate::attempt::RetryEvent;
use crate::attempt::RetryEventKind;
use crate::attempt::RetryResult;
use crate::circuit_breaker::CircuitBreaker;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::classifier::FailureClassifier;
use crate::classifier::FailureDomain;
use crate::classifier::HttpAwareClassifier;
use crate::error::ConfigError;
use crate::error::RetryError;
use crate::http::WithResponseMeta;
use crate::metrics;
use crate::policy;
use crate::policy::DelayPolicy;
use crate::policy::RateLimitAwareBackoff;
use crate::rate_limit::RateLimitSource;
use crate::rate_limit::RateLimitTracker;
use redrive_async_utils::CancelCause;
use redrive_async_utils::CancelScope;
use redrive_async_utils::OrCancelExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Observation hook invoked synchronously with each `RetryEvent`.
pub type EventHook<E> = Box<dyn FnMut(RetryEvent<E>) + Send>;

/// Configuration for one orchestration run.
///
/// Build with struct-update syntax over `RetryOptions::default()`.
/// Validation is eager: a zero `max_attempts` or a zero
/// `overall_timeout` fails before any attempt runs.
pub struct RetryOptions<E> {
    /// Maximum number of operation invocations (≥ 1).
    pub max_attempts: u32,
    pub policy: Arc<dyn DelayPolicy>,
    pub classifier: Arc<dyn FailureClassifier>,
    /// External cancellation signal. Composed with the overall
    /// deadline; the operation itself is never interrupted mid-flight.
    pub cancel: Option<CancellationToken>,
    pub overall_timeout: Option<Duration>,
    /// Advisory flag recording caller intent; does not alter engine
    /// behavior.
    pub idempotent: bool,
    pub on_event: Option<EventHook<E>>,
    /// When set, a per-run breaker guards admission.
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    /// When set, a per-run tracker paces against the window.
    pub rate_limit: Option<RateLimitSource>,
}

impl<E> Default for RetryOptions<E> {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            policy: Arc::new(RateLimitAwareBackoff::default()),
            classifier: Arc::new(HttpAwareClassifier),
            cancel: None,
            overall_timeout: None,
            idempotent: false,
            on_event: None,
            circuit_breaker: None,
            rate_limit: None,
        }
    }
}

impl<E> RetryOptions<E> {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::MaxAttempts(self.max_attempts));
        }
        if let Some(timeout) = self.overall_timeout
            && timeout.is_zero()
        {
            return Err(ConfigError::OverallTimeout);
        }
        Ok(())
    }
}

/// Execute `operation` under the retry orchestration loop.
///
/// Returns the success value with the full attempt history and
/// derived metrics, or a terminal `RetryError`. Permanent failures
/// and policy-declined delays propagate the operation's original
/// error; exhaustion, cancellation, deadline, breaker refusal, and
/// configuration problems use their dedicated variants.
pub async fn retry<T, E, F, Fut>(
    mut operation: F,
    options: RetryOptions<E>,
) -> Result<RetryResult<T, E>, RetryError<E>>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T, E>> + Send,
    E: WithResponseMeta + Send + Sync + 'static,
{
    options.validate()?;

    let RetryOptions {
        max_attempts,
        policy,
        classifier,
        cancel,
        overall_timeout,
        idempotent: _,
        mut on_event,
        circuit_breaker,
        rate_limit,
    } = options;

    let scope = CancelScope::new(cancel.as_ref(), overall_timeout);
    let started = Instant::now();
    let mut breaker = circuit_breaker.map(CircuitBreaker::new);
    let (mut tracker, supplier) = match rate_limit {
        Some(RateLimitSource::Value(state)) => (Some(RateLimitTracker::with_state(state)), None),
        Some(RateLimitSource::Supplier(supplier)) => {
            (Some(RateLimitTracker::new()), Some(supplier))
        }
        None => (None, None),
    };

    let mut history: Vec<RetryAttempt<E>> = Vec::new();
    let mut attempt: u32 = 1;

    loop {
        // Preflight: cancellation already signaled.
        if scope.is_cancelled() {
            return Err(finish_cancelled(
                &mut history,
                &mut on_event,
                attempt,
                &scope,
                started,
            ));
        }

        // Preflight: circuit-breaker admission. A refusal is terminal
        // even when attempts remain.
        if let Some(breaker) = breaker.as_mut()
            && !breaker.try_acquire()
        {
            let state = breaker.state();
            let record = RetryAttempt::failed(
                attempt,
                FailureDomain::Transient,
                FailureCause::CircuitOpen(state),
                Duration::ZERO,
            );
            history.push(record.clone());
            emit(
                &mut on_event,
                RetryEvent {
                    kind: RetryEventKind::Failure,
                    attempt: record,
                    attempts_so_far: history.len() as u32,
                    remaining_hint: None,
                    is_final: true,
                },
            );
            tracing::warn!(attempt, state = %state, "circuit breaker refused admission");
            return Err(RetryError::CircuitOpen { state });
        }

        // Preflight: rate-limit window. The wait does not consume an
        // attempt slot; the informational record is emitted but not
        // appended to history.
        if let Some(tracker) = tracker.as_mut() {
            if let Some(supplier) = supplier.as_ref()
                && let Some(fresh) = supplier()
            {
                tracker.set_state(fresh);
            }
            if tracker.is_rate_limited() {
                let wait = tracker.time_until_reset().unwrap_or(Duration::ZERO);
                let record: RetryAttempt<E> = RetryAttempt::failed(
                    attempt,
                    FailureDomain::RateLimit,
                    FailureCause::RateLimitWait(wait),
                    wait,
                );
                emit(
                    &mut on_event,
                    RetryEvent {
                        kind: RetryEventKind::Attempt,
                        attempt: record,
                        attempts_so_far: history.len() as u32,
                        remaining_hint: Some(wait),
                        is_final: false,
                    },
                );
                tracing::debug!(
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    "rate limit window exhausted; waiting for reset"
                );
                if tokio::time::sleep(wait)
                    .or_cancel(scope.token())
                    .await
                    .is_err()
                {
                    return Err(finish_cancelled(
                        &mut history,
                        &mut on_event,
                        attempt,
                        &scope,
                        started,
                    ));
                }
                continue;
            }
        }

        match operation().await {
            Ok(value) => {
                let record: RetryAttempt<E> = RetryAttempt::succeeded(attempt);
                history.push(record.clone());
                if let Some(breaker) = breaker.as_mut() {
                    breaker.record_success();
                }
                if let Some(tracker) = tracker.as_mut() {
                    tracker.decrement(None);
                }
                emit(
                    &mut on_event,
                    RetryEvent {
                        kind: RetryEventKind::Success,
                        attempt: record,
                        attempts_so_far: history.len() as u32,
                        remaining_hint: None,
                        is_final: true,
                    },
                );
                tracing::debug!(attempt, "operation succeeded");
                let metrics = metrics::compute(&history, true);
                return Ok(RetryResult {
                    value,
                    attempts: history,
                    metrics,
                });
            }
            Err(err) => {
                let err = Arc::new(err);
                let meta = err.response_meta();
                let domain = classifier.classify(err.as_ref(), meta);

                // Permanent failures are never retried; the original
                // error propagates.
                if domain == FailureDomain::Permanent {
                    tracing::warn!(attempt, domain = %domain, error = %err, "permanent failure; not retrying");
                    return Err(fail_without_retry(
                        &mut history,
                        &mut on_event,
                        breaker.as_mut(),
                        attempt,
                        domain,
                        err,
                    ));
                }

                let mut delay = policy.delay_for(attempt, domain, err.as_ref());

                // A server-supplied Retry-After overrides the policy
                // for rate-limited failures, even a declined one.
                if domain == FailureDomain::RateLimit
                    && let Some(retry_after) = meta.and_then(|m| m.retry_after)
                {
                    delay = Some(policy::jittered_retry_after(retry_after));
                }

                let Some(delay) = delay else {
                    tracing::warn!(attempt, domain = %domain, error = %err, "policy declined retry; propagating error");
                    return Err(fail_without_retry(
                        &mut history,
                        &mut on_event,
                        breaker.as_mut(),
                        attempt,
                        domain,
                        err,
                    ));
                };
                let delay = policy::clamp_delay(delay);

                let record = RetryAttempt::failed(
                    attempt,
                    domain,
                    FailureCause::Operation(Arc::clone(&err)),
                    delay,
                );
                history.push(record.clone());
                if let Some(breaker) = breaker.as_mut() {
                    breaker.record_failure();
                }
                if let Some(tracker) = tracker.as_mut()
                    && let Some(headers) = meta.and_then(|m| m.headers.as_ref())
                {
                    tracker.update_from_headers(headers);
                }

                let is_last = attempt >= max_attempts;
                if is_last {
                    emit(
                        &mut on_event,
                        RetryEvent {
                            kind: RetryEventKind::Attempt,
                            attempt: record.clone(),
                            attempts_so_far: history.len() as u32,
                            remaining_hint: None,
                            is_final: false,
                        },
                    );
                    emit(
                        &mut on_event,
                        RetryEvent {
                            kind: RetryEventKind::Failure,
                            attempt: record,
                            attempts_so_far: history.len() as u32,
                            remaining_hint: None,
                            is_final: true,
                        },
                    );
                    tracing::warn!(attempt, domain = %domain, error = %err, "retry attempts exhausted");
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        domain,
                        last_error: err,
                    });
                }

                emit(
                    &mut on_event,
                    RetryEvent {
                        kind: RetryEventKind::Attempt,
                        attempt: record,
                        attempts_so_far: history.len() as u32,
                        remaining_hint: Some(delay),
                        is_final: false,
                    },
                );
                tracing::warn!(
                    attempt,
                    domain = %domain,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed; backing off"
                );

                if tokio::time::sleep(delay)
                    .or_cancel(scope.token())
                    .await
                    .is_err()
                {
                    return Err(finish_cancelled(
                        &mut history,
                        &mut on_event,
                        attempt.saturating_add(1),
                        &scope,
                        started,
                    ));
                }
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

fn emit<E>(on_event: &mut Option<EventHook<E>>, event: RetryEvent<E>) {
    if let Some(hook) = on_event.as_mut() {
        hook(event);
    }
}

/// Record a zero-delay failed attempt for a non-retried failure, emit
/// the non-final `Attempt` event followed by the terminal `Failure`
/// event, and hand back the original error.
fn fail_without_retry<E>(
    history: &mut Vec<RetryAttempt<E>>,
    on_event: &mut Option<EventHook<E>>,
    breaker: Option<&mut CircuitBreaker>,
    number: u32,
    domain: FailureDomain,
    err: Arc<E>,
) -> RetryError<E> {
    let record = RetryAttempt::failed(
        number,
        domain,
        FailureCause::Operation(Arc::clone(&err)),
        Duration::ZERO,
    );
    history.push(record.clone());
    if let Some(breaker) = breaker {
        breaker.record_failure();
    }
    let attempts_so_far = history.len() as u32;
    emit(
        on_event,
        RetryEvent {
            kind: RetryEventKind::Attempt,
            attempt: record.clone(),
            attempts_so_far,
            remaining_hint: None,
            is_final: false,
        },
    );
    emit(
        on_event,
        RetryEvent {
            kind: RetryEventKind::Failure,
            attempt: record,
            attempts_so_far,
            remaining_hint: None,
            is_final: true,
        },
    );
    RetryError::Operation(err)
}

/// Record the cancelled attempt, emit the terminal `Cancelled` event,
/// and map the trip cause to `Cancelled` or `Timeout`.
fn finish_cancelled<E>(
    history: &mut Vec<RetryAttempt<E>>,
    on_event: &mut Option<EventHook<E>>,
    number: u32,
    scope: &CancelScope,
    started: Instant,
) -> RetryError<E> {
    let record = RetryAttempt::failed(
        number,
        FailureDomain::Unknown,
        FailureCause::Cancelled,
        Duration::ZERO,
    );
    history.push(record.clone());
    emit(
        on_event,
        RetryEvent {
            kind: RetryEventKind::Cancelled,
            attempt: record,
            attempts_so_far: history.len() as u32,
            remaining_hint: None,
            is_final: true,
        },
    );
    match scope.cause() {
        Some(CancelCause::Deadline) => {
            let elapsed = started.elapsed();
            tracing::debug!(
                attempt = number,
                elapsed_ms = elapsed.as_millis() as u64,
                "retry deadline exceeded"
            );
            RetryError::Timeout { elapsed }
        }
        _ => {
            tracing::debug!(attempt = number, "retry cancelled");
            RetryError::Cancelled
        }
    }
}
