//! Local cache of a remote rate-limit window.
//!
//! Tracks locally supplied state; it does not coordinate across
//! processes. The tracker consumes `x-ratelimit-*` headers observed
//! on responses and answers preflight questions: is the window
//! exhausted, how close to it are we, and how long until it resets.
//!
//! Methods take `&mut self` and are not internally synchronized; the
//! orchestrator builds one tracker per run, and callers sharing one
//! must serialize access themselves.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// One rate-limit window: what remains of the limit, and when the
/// window resets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitWindow {
    pub remaining: u32,
    pub limit: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitWindow {
    /// Parse a window from lower-cased response headers. Returns
    /// `None` unless all of `x-ratelimit-remaining`,
    /// `x-ratelimit-limit`, and `x-ratelimit-reset` (epoch seconds)
    /// parse.
    pub fn from_headers(headers: &HashMap<String, String>) -> Option<Self> {
        let remaining = headers.get("x-ratelimit-remaining")?.trim().parse().ok()?;
        let limit = headers.get("x-ratelimit-limit")?.trim().parse().ok()?;
        let reset_secs = headers.get("x-ratelimit-reset")?.trim().parse().ok()?;
        let reset_at = DateTime::from_timestamp(reset_secs, 0)?;
        Some(Self {
            remaining,
            limit,
            reset_at,
        })
    }
}

/// Tracker state: a global window plus an optional per-endpoint map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitState {
    pub window: RateLimitWindow,
    pub endpoints: HashMap<String, RateLimitWindow>,
}

impl RateLimitState {
    pub fn new(remaining: u32, limit: u32, reset_at: DateTime<Utc>) -> Self {
        Self {
            window: RateLimitWindow {
                remaining,
                limit,
                reset_at,
            },
            endpoints: HashMap::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>, window: RateLimitWindow) -> Self {
        self.endpoints.insert(endpoint.into(), window);
        self
    }
}

/// How a run obtains its rate-limit state.
///
/// `Value` seeds the run's tracker once; `Supplier` is re-consulted at
/// each preflight, letting a caller feed externally updated window state
/// into the run (a `Some` return replaces the tracker's state, `None`
/// keeps what the tracker has, including header-derived updates).
pub enum RateLimitSource {
    Value(RateLimitState),
    Supplier(Box<dyn Fn() -> Option<RateLimitState> + Send + Sync>),
}

impl fmt::Debug for RateLimitSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitSource::Value(state) => f.debug_tuple("Value").field(state).finish(),
            RateLimitSource::Supplier(_) => f.write_str("Supplier(..)"),
        }
    }
}

/// Rate-limit window tracker.
#[derive(Debug, Clone, Default)]
pub struct RateLimitTracker {
    state: Option<RateLimitState>,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: RateLimitState) -> Self {
        Self { state: Some(state) }
    }

    pub fn state(&self) -> Option<&RateLimitState> {
        self.state.as_ref()
    }

    pub fn set_state(&mut self, state: RateLimitState) {
        self.state = Some(state);
    }

    /// True iff the global window is spent and has not reset yet.
    pub fn is_rate_limited(&self) -> bool {
        match &self.state {
            Some(state) => state.window.remaining == 0 && Utc::now() < state.window.reset_at,
            None => false,
        }
    }

    /// True when utilization `(limit − remaining) / limit` has reached
    /// `1 − threshold`. Without state (or with a zero limit) there is
    /// nothing to back off from.
    pub fn should_backoff(&self, threshold: f64) -> bool {
        let Some(state) = &self.state else {
            return false;
        };
        let window = &state.window;
        if window.limit == 0 {
            return false;
        }
        let used = f64::from(window.limit.saturating_sub(window.remaining));
        used / f64::from(window.limit) >= 1.0 - threshold
    }

    /// Time until the global window resets, floored at zero. `None`
    /// when no state is held.
    pub fn time_until_reset(&self) -> Option<Duration> {
        self.state.as_ref().map(|state| {
            state
                .window
                .reset_at
                .signed_duration_since(Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
        })
    }

    /// Consume one unit from the global window and, when keyed and
    /// present, from the endpoint's window. Floors at zero.
    pub fn decrement(&mut self, endpoint: Option<&str>) {
        let Some(state) = &mut self.state else {
            return;
        };
        state.window.remaining = state.window.remaining.saturating_sub(1);
        if let Some(key) = endpoint
            && let Some(window) = state.endpoints.get_mut(key)
        {
            window.remaining = window.remaining.saturating_sub(1);
        }
    }

    /// Replace the global window from fresh response headers. The
    /// replacement is all-or-nothing: unless all three `x-ratelimit-*`
    /// values parse, existing state is left untouched. Per-endpoint
    /// windows are preserved.
    pub fn update_from_headers(&mut self, headers: &HashMap<String, String>) {
        let Some(window) = RateLimitWindow::from_headers(headers) else {
            return;
        };
        match &mut self.state {
            Some(state) => state.window = window,
            None => {
                self.state = Some(RateLimitState {
                    window,
                    endpoints: HashMap::new(),
                });
            }
        }
    }
}
