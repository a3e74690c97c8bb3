//! Per-source configuration: admission rate, cache TTL, retry and breaker policy.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};

use super::ClassificationTable;
use crate::errors::{GateError, Result};

/// Exponential backoff policy for retrying one source.
///
/// The delay after failed attempt `n` (0-based) is
/// `min(base_delay * multiplier^n, max_delay)`, stretched by a random factor
/// in `[1, 1 + jitter]` and capped at `max_delay` again.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total provider invocations allowed, including the first one.
    pub max_attempts: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "base_delay_ms")]
    pub base_delay: Duration,
    pub multiplier: f64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "max_delay_ms")]
    pub max_delay: Duration,
    /// Fraction of random stretch applied to each delay, `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 1.5,
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Deterministic delay after the given failed attempt (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Delay with jitter applied, never beyond `max_delay`.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay(attempt);
        if self.jitter <= 0.0 {
            return delay;
        }

        let factor = 1.0 + rand::thread_rng().gen_range(0.0..=self.jitter);
        Duration::from_secs_f64((delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64()))
    }

    pub fn validate(&self, source: &str) -> Result<()> {
        if self.max_attempts < 1 {
            return Err(invalid(source, "max_attempts must be at least 1"));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(invalid(source, "multiplier must be a finite number >= 1"));
        }
        if self.max_delay < self.base_delay {
            return Err(invalid(source, "max_delay must not be shorter than base_delay"));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(invalid(source, "jitter must be within 0.0..=1.0"));
        }
        Ok(())
    }
}

/// Circuit breaker thresholds for one source.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failed calls before the circuit opens.
    pub failure_threshold: u32,
    /// Time to wait before testing recovery.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "recovery_timeout_secs")]
    pub recovery_timeout: Duration,
    /// Successes needed in HalfOpen before the circuit closes.
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_success_threshold: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Breaker that opens two failures after the retry budget, as for the built-in sources.
    pub fn for_retry_policy(retry: &RetryPolicy) -> Self {
        Self {
            failure_threshold: retry.max_attempts + 2,
            ..Self::default()
        }
    }
}

/// Everything the gate needs to know about one source.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Token bucket size: the largest burst admitted at once.
    pub capacity: u32,
    /// Sustained admission rate, tokens per second.
    pub refill_rate: f64,
    /// TTL for cached responses unless a call overrides it.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "default_ttl_secs")]
    pub default_ttl: Duration,
    /// Deadline for a single provider invocation.
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>", no_default)]
    #[serde(rename = "timeout_ms")]
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
    pub classification: ClassificationTable,
}

impl Default for SourceConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            capacity: 20,
            refill_rate: 2.0,
            default_ttl: Duration::from_secs(10 * 60),
            timeout: Some(Duration::from_secs(10)),
            circuit_breaker: CircuitBreakerConfig::for_retry_policy(&retry),
            retry,
            classification: ClassificationTable::default(),
        }
    }
}

impl SourceConfig {
    /// Config for a source admitting `requests_per_second`, with the burst
    /// capacity the built-in sources use (ten seconds of traffic, at least 10).
    pub fn with_rate(requests_per_second: f64) -> Self {
        let burst = (requests_per_second * 10.0).floor().max(10.0);
        Self {
            capacity: burst.min(u32::MAX as f64) as u32,
            refill_rate: requests_per_second,
            ..Self::default()
        }
    }

    pub fn validate(&self, source: &str) -> Result<()> {
        if self.capacity == 0 {
            return Err(invalid(source, "capacity must be positive"));
        }
        if !self.refill_rate.is_finite() || self.refill_rate <= 0.0 {
            return Err(invalid(source, "refill_rate must be a positive number"));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(invalid(source, "timeout must be positive when set"));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(invalid(source, "circuit_breaker.failure_threshold must be positive"));
        }
        if self.circuit_breaker.half_open_success_threshold == 0 {
            return Err(invalid(
                source,
                "circuit_breaker.half_open_success_threshold must be positive",
            ));
        }
        self.retry.validate(source)
    }
}

fn invalid(source: &str, message: &str) -> GateError {
    GateError::InvalidConfig(format!("source '{}': {}", source, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_then_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(500),
            jitter: 0.0,
        };

        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(3), Duration::from_millis(500));
        assert_eq!(policy.delay(40), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            jitter: 0.2,
            ..RetryPolicy::default()
        };

        for _ in 0..50 {
            let delay = policy.jittered_delay(0);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1200));
        }
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let zero_attempts = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(zero_attempts.validate("x").is_err());

        let shrinking = RetryPolicy {
            multiplier: 0.5,
            ..RetryPolicy::default()
        };
        assert!(shrinking.validate("x").is_err());

        let inverted = RetryPolicy {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(1),
            ..RetryPolicy::default()
        };
        assert!(inverted.validate("x").is_err());

        let no_capacity = SourceConfig {
            capacity: 0,
            ..SourceConfig::default()
        };
        assert!(no_capacity.validate("x").is_err());

        let no_rate = SourceConfig {
            refill_rate: 0.0,
            ..SourceConfig::default()
        };
        assert!(no_rate.validate("x").is_err());

        assert!(SourceConfig::default().validate("x").is_ok());
    }

    #[test]
    fn test_with_rate_burst_capacity() {
        assert_eq!(SourceConfig::with_rate(0.2).capacity, 10);
        assert_eq!(SourceConfig::with_rate(5.0).capacity, 50);
    }

    #[test]
    fn test_deserialize_millisecond_fields() {
        let config: SourceConfig = serde_json::from_str(
            r#"{"capacity": 5, "refill_rate": 5.0, "default_ttl_secs": 60,
                "retry": {"max_attempts": 2, "base_delay_ms": 250}}"#,
        )
        .unwrap();

        assert_eq!(config.capacity, 5);
        assert_eq!(config.default_ttl, Duration::from_secs(60));
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.retry.multiplier, 1.5);
        assert_eq!(config.timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_explicit_timeout_and_null() {
        let config: SourceConfig = serde_json::from_str(r#"{"timeout_ms": 2500}"#).unwrap();
        assert_eq!(config.timeout, Some(Duration::from_millis(2500)));

        let config: SourceConfig = serde_json::from_str(r#"{"timeout_ms": null}"#).unwrap();
        assert_eq!(config.timeout, None);
    }
}
