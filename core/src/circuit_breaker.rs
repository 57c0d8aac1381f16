//! Circuit breaker guarding operation execution.
//!
//! Three-state admission machine: `closed → open → half-open`.
//! Closed admits everything and counts consecutive failures; at the
//! failure threshold it opens. Open refuses admission until the
//! timeout has elapsed since the last recorded failure, at which
//! point the next admission check (not a background timer) moves to
//! half-open. Half-open admits probes; enough successes close the
//! breaker, any failure reopens it.
//!
//! Methods take `&mut self` and are not internally synchronized. The
//! orchestrator builds one instance per run; callers sharing an
//! instance across runs must serialize access themselves.

use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        f.write_str(name)
    }
}

/// Callback invoked on actual state transitions with (from, to).
pub type StateChangeHook = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

/// Circuit breaker configuration.
#[derive(Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures while closed before tripping open.
    pub failure_threshold: u32,
    /// Successes while half-open before closing.
    pub success_threshold: u32,
    /// How long the breaker stays open after the last failure.
    pub timeout: Duration,
    pub on_state_change: Option<StateChangeHook>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            on_state_change: None,
        }
    }
}

impl fmt::Debug for CircuitBreakerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("failure_threshold", &self.failure_threshold)
            .field("success_threshold", &self.success_threshold)
            .field("timeout", &self.timeout)
            .field("on_state_change", &self.on_state_change.is_some())
            .finish()
    }
}

/// Admission-control state machine.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_failure_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            last_failure_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Admission check before executing a call.
    ///
    /// While open, performs the open → half-open transition once the
    /// timeout has elapsed since the last recorded failure, admitting
    /// that call.
    pub fn try_acquire(&mut self) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if let Some(at) = self.last_failure_at
                    && at.elapsed() >= self.config.timeout
                {
                    self.transition(CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::Closed => {
                self.failures = 0;
            }
            CircuitState::HalfOpen => {
                self.successes += 1;
                if self.successes >= self.config.success_threshold {
                    self.failures = 0;
                    self.successes = 0;
                    self.transition(CircuitState::Closed);
                }
            }
            // A success while open means the caller bypassed
            // try_acquire; it does not move the state machine.
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&mut self) {
        self.last_failure_at = Some(Instant::now());
        match self.state {
            CircuitState::Closed => {
                self.failures += 1;
                if self.failures >= self.config.failure_threshold {
                    self.transition(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                self.successes = 0;
                self.transition(CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Force closed with all counters cleared. Fires the transition
    /// callback only if the state actually changed.
    pub fn reset(&mut self) {
        self.failures = 0;
        self.successes = 0;
        self.last_failure_at = None;
        self.transition(CircuitState::Closed);
    }

    fn transition(&mut self, next: CircuitState) {
        if self.state == next {
            return;
        }
        let prev = self.state;
        self.state = next;
        tracing::warn!(from = %prev, to = %next, "circuit breaker state change");
        if let Some(hook) = &self.config.on_state_change {
            hook(prev, next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn breaker(failure_threshold: u32, success_threshold: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold,
            success_threshold,
            timeout,
            on_state_change: None,
        })
    }

    #[test]
    fn test_trips_open_at_failure_threshold() {
        let mut cb = breaker(3, 1, Duration::from_secs(30));

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.try_acquire(), "open breaker must refuse admission");
    }

    #[test]
    fn test_success_resets_failure_counter_while_closed() {
        let mut cb = breaker(3, 1, Duration::from_secs(30));

        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();

        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_timeout_then_closes_on_successes() {
        let mut cb = breaker(1, 2, Duration::from_millis(30));

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.try_acquire());

        std::thread::sleep(Duration::from_millis(40));
        assert!(cb.try_acquire(), "timeout elapsed, probe must be admitted");
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let mut cb = breaker(1, 2, Duration::from_millis(20));

        cb.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        assert!(cb.try_acquire());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.try_acquire(), "fresh failure restarts the open window");
    }

    #[test]
    fn test_callback_fires_on_actual_transitions_only() {
        let transitions: Arc<Mutex<Vec<(CircuitState, CircuitState)>>> =
            Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&transitions);
        let mut cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 1,
            timeout: Duration::from_millis(20),
            on_state_change: Some(Arc::new(move |from, to| {
                seen.lock().unwrap().push((from, to));
            })),
        });

        cb.record_failure();
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        assert!(cb.try_acquire());
        cb.record_success();

        let recorded = transitions.lock().unwrap().clone();
        assert_eq!(
            recorded,
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[test]
    fn test_reset_fires_callback_only_when_state_changes() {
        let count = Arc::new(Mutex::new(0u32));
        let seen = Arc::clone(&count);
        let mut cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            timeout: Duration::from_secs(30),
            on_state_change: Some(Arc::new(move |_, _| {
                *seen.lock().unwrap() += 1;
            })),
        });

        cb.reset();
        assert_eq!(*count.lock().unwrap(), 0, "reset from closed is a no-op");

        cb.record_failure();
        assert_eq!(*count.lock().unwrap(), 1);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(*count.lock().unwrap(), 2, "reset from open is a transition");
    }
}
