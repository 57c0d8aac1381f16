//! Aggregate statistics derived from a finished attempt history.
//!
//! A single-pass reduction; nothing here is stored by the engine.

use crate::attempt::AttemptOutcome;
use crate::attempt::RetryAttempt;
use crate::classifier::FailureDomain;
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;

/// Failed-attempt counts per domain. All four domains are always
/// present, zero-initialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainCounts {
    pub rate_limit: u32,
    pub transient: u32,
    pub permanent: u32,
    pub unknown: u32,
}

impl DomainCounts {
    pub fn count(&self, domain: FailureDomain) -> u32 {
        match domain {
            FailureDomain::RateLimit => self.rate_limit,
            FailureDomain::Transient => self.transient,
            FailureDomain::Permanent => self.permanent,
            FailureDomain::Unknown => self.unknown,
        }
    }

    pub fn total(&self) -> u32 {
        self.rate_limit + self.transient + self.permanent + self.unknown
    }

    fn record(&mut self, domain: FailureDomain) {
        match domain {
            FailureDomain::RateLimit => self.rate_limit += 1,
            FailureDomain::Transient => self.transient += 1,
            FailureDomain::Permanent => self.permanent += 1,
            FailureDomain::Unknown => self.unknown += 1,
        }
    }
}

/// Derived run statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryMetrics {
    /// `(n − 1) / n` for runs of more than one attempt, else 0.
    pub retry_rate: f64,
    /// 1.0 for a successful run, 0.0 otherwise.
    pub success_rate: f64,
    /// Mean of the positive delays among all-but-the-last attempt.
    pub average_delay: Duration,
    pub failure_domains: DomainCounts,
    /// `attempts − 1`, floored at 0.
    pub total_retries: u32,
}

/// Reduce a finished history into metrics.
pub fn compute<E>(attempts: &[RetryAttempt<E>], succeeded: bool) -> RetryMetrics {
    let n = attempts.len() as u32;
    let mut failure_domains = DomainCounts::default();
    for attempt in attempts {
        if let AttemptOutcome::Failed { domain, .. } = &attempt.outcome {
            failure_domains.record(*domain);
        }
    }

    let all_but_last = &attempts[..attempts.len().saturating_sub(1)];
    let mut delay_sum = Duration::ZERO;
    let mut delay_count: u32 = 0;
    for attempt in all_but_last {
        if attempt.delay > Duration::ZERO {
            delay_sum += attempt.delay;
            delay_count += 1;
        }
    }
    let average_delay = if delay_count > 0 {
        delay_sum / delay_count
    } else {
        Duration::ZERO
    };

    RetryMetrics {
        retry_rate: if n > 1 {
            f64::from(n - 1) / f64::from(n)
        } else {
            0.0
        },
        success_rate: if succeeded { 1.0 } else { 0.0 },
        average_delay,
        failure_domains,
        total_retries: n.saturating_sub(1),
    }
}
