//! Failure classification for retry decisions.
//!
//! Maps a raw error plus optional response metadata to a
//! `FailureDomain`. The engine is polymorphic over any
//! `FailureClassifier`; `HttpAwareClassifier` is the default.

use crate::http::ResponseMeta;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;

/// Classification bucket for a failed attempt.
///
/// Drives whether the failure is retried and how its delay is
/// computed. Assigned once per failure by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureDomain {
    /// The dependency is throttling; pacing comes from its window.
    RateLimit,
    /// Expected to clear on its own; retry with backoff.
    Transient,
    /// Will not succeed on retry; fail immediately.
    Permanent,
    /// Nothing conclusive; retried conservatively.
    Unknown,
}

impl fmt::Display for FailureDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureDomain::RateLimit => "rate_limit",
            FailureDomain::Transient => "transient",
            FailureDomain::Permanent => "permanent",
            FailureDomain::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Capability for mapping failures to domains.
pub trait FailureClassifier: Send + Sync {
    fn classify(
        &self,
        error: &(dyn std::error::Error + 'static),
        meta: Option<&ResponseMeta>,
    ) -> FailureDomain;
}

/// Message tokens that mark a failure as transient when no conclusive
/// response metadata is available. Matched case-insensitively against
/// the error's display text.
const TRANSIENT_TOKENS: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "dns error",
    "network",
    "temporar",
    "unavailable",
];

/// Default classifier.
///
/// Rule order, first match wins: status 429 → rate-limit; a parsed
/// Retry-After (any status) → rate-limit; status ≥ 500 → transient;
/// status 400..500 → permanent; transient message token → transient;
/// otherwise unknown.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpAwareClassifier;

impl FailureClassifier for HttpAwareClassifier {
    fn classify(
        &self,
        error: &(dyn std::error::Error + 'static),
        meta: Option<&ResponseMeta>,
    ) -> FailureDomain {
        if let Some(meta) = meta {
            if meta.status == Some(429) {
                return FailureDomain::RateLimit;
            }
            if meta.retry_after.is_some() {
                return FailureDomain::RateLimit;
            }
            if let Some(status) = meta.status {
                if status >= 500 {
                    return FailureDomain::Transient;
                }
                if (400..500).contains(&status) {
                    return FailureDomain::Permanent;
                }
            }
        }

        let message = error.to_string().to_lowercase();
        if TRANSIENT_TOKENS.iter().any(|token| message.contains(token)) {
            return FailureDomain::Transient;
        }

        FailureDomain::Unknown
    }
}
