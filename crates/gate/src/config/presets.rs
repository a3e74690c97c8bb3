//! Built-in source presets and fallback chains.

use std::collections::BTreeMap;
use std::time::Duration;

use super::{CircuitBreakerConfig, ClassificationTable, RetryPolicy, SourceConfig};

/// Id of the config used for sources without an entry of their own.
pub const DEFAULT_SOURCE: &str = "default";

/// Name of the chain used for request types without a chain of their own.
pub const DEFAULT_CHAIN: &str = "default";

struct Preset {
    id: &'static str,
    requests_per_second: f64,
    max_attempts: u32,
    backoff: f64,
    ttl_minutes: u64,
    timeout_secs: u64,
}

const PRESETS: &[Preset] = &[
    Preset {
        id: "yahoo_finance",
        requests_per_second: 2.0,
        max_attempts: 5,
        backoff: 1.5,
        ttl_minutes: 15,
        timeout_secs: 10,
    },
    Preset {
        id: "finnhub",
        requests_per_second: 5.0,
        max_attempts: 3,
        backoff: 2.0,
        ttl_minutes: 10,
        timeout_secs: 10,
    },
    // Free tier: 5 calls per minute.
    Preset {
        id: "alpha_vantage",
        requests_per_second: 0.2,
        max_attempts: 3,
        backoff: 2.0,
        ttl_minutes: 30,
        timeout_secs: 15,
    },
    Preset {
        id: "iex_cloud",
        requests_per_second: 100.0,
        max_attempts: 3,
        backoff: 1.5,
        ttl_minutes: 5,
        timeout_secs: 10,
    },
    Preset {
        id: "yfinance",
        requests_per_second: 2.0,
        max_attempts: 3,
        backoff: 1.5,
        ttl_minutes: 15,
        timeout_secs: 10,
    },
];

impl Preset {
    fn to_config(&self) -> SourceConfig {
        let retry = RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_secs(1),
            multiplier: self.backoff,
            max_delay: Duration::from_secs(60),
            jitter: 0.2,
        };

        let classification = if self.id == "alpha_vantage" {
            // Throttled responses come back as a note in an otherwise normal body.
            ClassificationTable::default().with_markers(&["call frequency"])
        } else {
            ClassificationTable::default()
        };

        SourceConfig {
            default_ttl: Duration::from_secs(self.ttl_minutes * 60),
            timeout: Some(Duration::from_secs(self.timeout_secs)),
            circuit_breaker: CircuitBreakerConfig::for_retry_policy(&retry),
            retry,
            classification,
            ..SourceConfig::with_rate(self.requests_per_second)
        }
    }
}

/// Config shared by every source without a preset.
pub fn default_source() -> SourceConfig {
    let retry = RetryPolicy {
        jitter: 0.2,
        max_delay: Duration::from_secs(60),
        ..RetryPolicy::default()
    };
    SourceConfig {
        circuit_breaker: CircuitBreakerConfig::for_retry_policy(&retry),
        retry,
        ..SourceConfig::with_rate(2.0)
    }
}

/// Preset configs keyed by source id.
pub fn sources() -> BTreeMap<String, SourceConfig> {
    PRESETS
        .iter()
        .map(|preset| (preset.id.to_string(), preset.to_config()))
        .collect()
}

/// Preset fallback chains keyed by request type.
pub fn fallback_chains() -> BTreeMap<String, Vec<String>> {
    let chains: [(&str, &[&str]); 5] = [
        ("stock", &["finnhub", "yfinance", "alpha_vantage", "iex_cloud"]),
        ("crypto", &["coingecko", "alpha_vantage"]),
        ("forex", &["yfinance", "alpha_vantage"]),
        ("economic", &["fred", "world_bank"]),
        (DEFAULT_CHAIN, &["yfinance", "finnhub"]),
    ];

    chains
        .iter()
        .map(|(request_type, ids)| {
            (
                request_type.to_string(),
                ids.iter().map(|id| id.to_string()).collect(),
            )
        })
        .collect()
}
