//! Delay policies: attempt number + failure domain → backoff delay.
//!
//! A policy returning `None` tells the orchestrator to stop retrying.
//! Both reference strategies share the exponential math
//! `min(base × multiplier^(attempt−1), cap)` with ±25% jitter; they
//! differ only in which domains they decline.

use crate::classifier::FailureDomain;
use crate::error::ConfigError;
use rand::Rng;
use std::time::Duration;

/// Hard ceiling applied to every computed inter-attempt delay.
pub const MAX_DELAY: Duration = Duration::from_millis(300_000);

/// Jitter applied to policy-computed delays.
const POLICY_JITTER: f64 = 0.25;

/// Jitter applied to server-supplied Retry-After overrides.
pub(crate) const RETRY_AFTER_JITTER: f64 = 0.10;

/// Capability for computing inter-attempt delays.
///
/// `attempt` is 1-based. `None` means "do not retry"; the orchestrator
/// then propagates the original error.
pub trait DelayPolicy: Send + Sync {
    fn delay_for(
        &self,
        attempt: u32,
        domain: FailureDomain,
        error: &(dyn std::error::Error + 'static),
    ) -> Option<Duration>;
}

/// Exponential backoff with jitter.
///
/// Declines `Permanent` and `RateLimit` domains; rate-limit pacing is
/// deferred entirely to the orchestrator's Retry-After override.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    cap: Duration,
    multiplier: f64,
}

impl ExponentialBackoff {
    /// Construct with eager validation: the multiplier must be finite
    /// and greater than zero, and the cap at least the base.
    pub fn new(base: Duration, cap: Duration, multiplier: f64) -> Result<Self, ConfigError> {
        validate(base, cap, multiplier)?;
        Ok(Self {
            base,
            cap,
            multiplier,
        })
    }

    fn raw_delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powf(f64::from(attempt.saturating_sub(1)));
        let raw_ms = self.base.as_millis() as f64 * factor;
        let capped_ms = raw_ms.min(self.cap.as_millis() as f64);
        apply_jitter(Duration::from_millis(capped_ms as u64), POLICY_JITTER)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            cap: Duration::from_millis(10_000),
            multiplier: 2.0,
        }
    }
}

impl DelayPolicy for ExponentialBackoff {
    fn delay_for(
        &self,
        attempt: u32,
        domain: FailureDomain,
        _error: &(dyn std::error::Error + 'static),
    ) -> Option<Duration> {
        match domain {
            FailureDomain::Permanent | FailureDomain::RateLimit => None,
            FailureDomain::Transient | FailureDomain::Unknown => Some(self.raw_delay(attempt)),
        }
    }
}

/// Exponential backoff that also paces rate-limited failures.
///
/// Identical math, but only `Permanent` is declined: rate-limited
/// attempts get the exponential delay as a fallback, and a server
/// Retry-After still overrides it in the orchestrator. This is the
/// engine's default policy.
#[derive(Debug, Clone, Default)]
pub struct RateLimitAwareBackoff {
    inner: ExponentialBackoff,
}

impl RateLimitAwareBackoff {
    pub fn new(base: Duration, cap: Duration, multiplier: f64) -> Result<Self, ConfigError> {
        Ok(Self {
            inner: ExponentialBackoff::new(base, cap, multiplier)?,
        })
    }
}

impl DelayPolicy for RateLimitAwareBackoff {
    fn delay_for(
        &self,
        attempt: u32,
        domain: FailureDomain,
        _error: &(dyn std::error::Error + 'static),
    ) -> Option<Duration> {
        match domain {
            FailureDomain::Permanent => None,
            _ => Some(self.inner.raw_delay(attempt)),
        }
    }
}

fn validate(base: Duration, cap: Duration, multiplier: f64) -> Result<(), ConfigError> {
    if !multiplier.is_finite() || multiplier <= 0.0 {
        return Err(ConfigError::Backoff(format!(
            "multiplier must be finite and greater than zero (got {multiplier})"
        )));
    }
    if cap < base {
        return Err(ConfigError::Backoff(format!(
            "cap {cap:?} must be at least base {base:?}"
        )));
    }
    Ok(())
}

/// Apply jitter to a duration.
///
/// Adds random variation (±jitter_factor) to prevent thundering herd.
/// Example: 100ms with 0.25 jitter → 75ms to 125ms.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }
    let mut rng_instance = rand::rng();
    let jitter = rng_instance.random_range(-jitter_factor..=jitter_factor);
    let multiplier = 1.0 + jitter;
    let jittered_ms = (duration.as_millis() as f64 * multiplier).max(0.0) as u64;
    Duration::from_millis(jittered_ms)
}

/// Server-supplied Retry-After with ±10% jitter, for the
/// orchestrator's rate-limit override.
pub(crate) fn jittered_retry_after(retry_after: Duration) -> Duration {
    apply_jitter(retry_after, RETRY_AFTER_JITTER)
}

/// Clamp a computed delay into `[0, MAX_DELAY]`.
pub(crate) fn clamp_delay(delay: Duration) -> Duration {
    delay.min(MAX_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn probe_error() -> std::io::Error {
        std::io::Error::other("probe")
    }

    fn delay_ms(policy: &dyn DelayPolicy, attempt: u32, domain: FailureDomain) -> Option<u128> {
        policy
            .delay_for(attempt, domain, &probe_error())
            .map(|d| d.as_millis())
    }

    #[test]
    fn test_exponential_growth_within_jitter_bounds() {
        let policy = ExponentialBackoff::new(
            Duration::from_millis(100),
            Duration::from_millis(10_000),
            2.0,
        )
        .expect("valid config");

        for (attempt, low, high) in [(1, 75, 125), (2, 150, 250), (3, 300, 500)] {
            let ms = delay_ms(&policy, attempt, FailureDomain::Transient)
                .expect("transient must get a delay");
            assert!(
                (low..=high).contains(&ms),
                "attempt {attempt}: delay {ms}ms outside [{low}, {high}]"
            );
        }
    }

    #[test]
    fn test_cap_bounds_the_delay() {
        let policy = ExponentialBackoff::new(
            Duration::from_millis(100),
            Duration::from_millis(1_000),
            2.0,
        )
        .expect("valid config");

        for _ in 0..50 {
            let ms = delay_ms(&policy, 30, FailureDomain::Transient).expect("delay");
            assert!(ms <= 1_250, "capped delay with jitter must stay <= 1250, got {ms}");
        }
    }

    #[test]
    fn test_permanent_is_declined_by_both_strategies() {
        let exponential = ExponentialBackoff::default();
        let aware = RateLimitAwareBackoff::default();

        assert_eq!(delay_ms(&exponential, 1, FailureDomain::Permanent), None);
        assert_eq!(delay_ms(&aware, 1, FailureDomain::Permanent), None);
    }

    #[test]
    fn test_rate_limit_declined_only_by_plain_exponential() {
        let exponential = ExponentialBackoff::default();
        let aware = RateLimitAwareBackoff::default();

        assert_eq!(delay_ms(&exponential, 2, FailureDomain::RateLimit), None);
        assert!(delay_ms(&aware, 2, FailureDomain::RateLimit).is_some());
        assert!(delay_ms(&aware, 2, FailureDomain::Unknown).is_some());
    }

    #[test]
    fn test_invalid_construction_fails_eagerly() {
        let base = Duration::from_millis(100);
        let cap = Duration::from_millis(1_000);

        for multiplier in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let result = ExponentialBackoff::new(base, cap, multiplier);
            assert!(
                matches!(result, Err(ConfigError::Backoff(_))),
                "multiplier {multiplier} must be rejected"
            );
        }

        let result = RateLimitAwareBackoff::new(cap, base, 2.0);
        assert!(matches!(result, Err(ConfigError::Backoff(_))), "cap < base");
    }

    #[test]
    fn test_jitter_range() {
        let duration = Duration::from_millis(1000);

        for _ in 0..100 {
            let jittered = apply_jitter(duration, 0.25).as_millis();
            assert!(
                (750..=1250).contains(&jittered),
                "jittered value {jittered} out of range [750, 1250]"
            );
        }
    }

    #[test]
    fn test_retry_after_jitter_is_tight() {
        let retry_after = Duration::from_secs(100);

        for _ in 0..100 {
            let jittered = jittered_retry_after(retry_after).as_millis();
            assert!(
                (90_000..=110_000).contains(&jittered),
                "retry-after jitter {jittered} out of range [90000, 110000]"
            );
        }
    }

    #[test]
    fn test_clamp_delay_ceiling() {
        assert_eq!(clamp_delay(Duration::from_secs(600)), MAX_DELAY);
        assert_eq!(
            clamp_delay(Duration::from_millis(40)),
            Duration::from_millis(40)
        );
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let policy = ExponentialBackoff::default();
        assert_eq!(policy.base, Duration::from_millis(100));
        assert_eq!(policy.cap, Duration::from_millis(10_000));
        assert_eq!(policy.multiplier, 2.0);
    }
}
