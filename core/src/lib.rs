//! Retry orchestration for fallible async operations.
//!
//! The engine wraps an async operation in a policy-driven retry loop:
//! failures are classified into domains (rate-limit, transient,
//! permanent, unknown), delays come from a pluggable backoff policy
//! with server `Retry-After` hints taking precedence, and optional
//! circuit-breaker and rate-limit-window guards gate admission before
//! each attempt. Every run produces a full attempt history, a stream
//! of observation events, and aggregate metrics.
//!
//! # Example
//! ```no_run
//! use redrive_core::HttpError;
//! use redrive_core::RetryOptions;
//! use redrive_core::retry;
//!
//! # async fn run() {
//! let result = retry(
//!     || async { Err::<String, _>(HttpError::new("backend unavailable").with_status(503)) },
//!     RetryOptions {
//!         max_attempts: 4,
//!         ..RetryOptions::default()
//!     },
//! )
//! .await;
//! # let _ = result;
//! # }
//! ```

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod attempt;
pub mod circuit_breaker;
pub mod classifier;
pub mod error;
pub mod http;
pub mod metrics;
pub mod orchestrator;
pub mod policy;
pub mod rate_limit;

pub use attempt::{
    AttemptOutcome, FailureCause, RetryAttempt, RetryEvent, RetryEventKind, RetryResult,
};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, StateChangeHook};
pub use classifier::{FailureClassifier, FailureDomain, HttpAwareClassifier};
pub use error::{ConfigError, RetryError};
pub use http::{HttpError, ResponseMeta, WithResponseMeta, normalize_headers, parse_retry_after};
pub use metrics::{DomainCounts, RetryMetrics};
pub use orchestrator::{EventHook, RetryOptions, retry};
pub use policy::{DelayPolicy, ExponentialBackoff, MAX_DELAY, RateLimitAwareBackoff};
pub use rate_limit::{RateLimitSource, RateLimitState, RateLimitTracker, RateLimitWindow};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
