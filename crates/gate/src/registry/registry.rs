//! Registry owning the shared state of every source.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, info};
use serde::Serialize;

use super::{CircuitBreaker, CircuitState, RateLimitConfig, RateLimiter};
use crate::cache::CacheStore;
use crate::client::RateLimitedClient;
use crate::clock::{Clock, SystemClock};
use crate::config::GateConfig;
use crate::errors::Result;
use crate::stats::{ErrorRecord, StatsRecorder};

/// Number of recent errors reported per source by [`SourceRegistry::health`].
const HEALTH_RECENT_ERRORS: usize = 3;

/// Health summary of one source.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SourceHealth {
    /// True while the circuit is closed.
    pub healthy: bool,
    pub circuit_state: CircuitState,
    pub failure_count: u32,
    pub success_rate: f64,
    pub remaining_tokens: f64,
    pub capacity: u32,
    pub recent_errors: Vec<ErrorRecord>,
}

/// One limiter bucket, breaker and client per source, plus the shared cache
/// and stats recorder.
///
/// Every caller of a source must go through the same registry for its rate
/// limit to hold. Independent registries share nothing.
pub struct SourceRegistry {
    config: GateConfig,
    cache: Arc<dyn CacheStore>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    stats: Arc<StatsRecorder>,
    clients: DashMap<String, Arc<RateLimitedClient>>,
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.config.sources.keys().collect::<Vec<_>>())
            .field("clients", &self.clients.len())
            .finish_non_exhaustive()
    }
}

impl SourceRegistry {
    /// Validate `config` and set up limiter and breaker for every configured source.
    pub fn new(config: GateConfig, cache: Arc<dyn CacheStore>) -> Result<Self> {
        Self::with_clock(config, cache, Arc::new(SystemClock))
    }

    /// Like [`new`](Self::new), timestamping recorded errors with `clock`.
    pub fn with_clock(
        config: GateConfig,
        cache: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let limiter = RateLimiter::with_default(RateLimitConfig::from(&config.default_source));
        let breaker = CircuitBreaker::with_config(config.default_source.circuit_breaker.clone());
        for (source, source_config) in &config.sources {
            limiter.configure(source, RateLimitConfig::from(source_config));
            breaker.configure(source, source_config.circuit_breaker.clone());
        }

        info!(
            "Source registry ready with {} configured sources and {} fallback chains",
            config.sources.len(),
            config.fallback_chains.len()
        );

        Ok(Self {
            stats: Arc::new(StatsRecorder::with_clock(config.error_history, clock)),
            config,
            cache,
            limiter: Arc::new(limiter),
            breaker: Arc::new(breaker),
            clients: DashMap::new(),
        })
    }

    /// The client of `source`, created on first use. Unknown sources get the
    /// default source config.
    pub fn client(&self, source: &str) -> Arc<RateLimitedClient> {
        if let Some(client) = self.clients.get(source) {
            return Arc::clone(client.value());
        }

        let entry = self.clients.entry(source.to_string()).or_insert_with(|| {
            debug!("Creating client for source '{}'", source);
            Arc::new(RateLimitedClient::new(
                source,
                self.config.source(source).clone(),
                Arc::clone(&self.limiter),
                Arc::clone(&self.breaker),
                Arc::clone(&self.cache),
                Arc::clone(&self.stats),
            ))
        });
        Arc::clone(entry.value())
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn stats(&self) -> &StatsRecorder {
        &self.stats
    }

    /// Health of every configured or used source.
    pub fn health(&self) -> BTreeMap<String, SourceHealth> {
        let mut sources: BTreeSet<String> = self.config.sources.keys().cloned().collect();
        sources.extend(self.clients.iter().map(|c| c.key().clone()));
        let snapshots = self.stats.snapshot_all();
        sources.extend(snapshots.keys().cloned());

        sources
            .into_iter()
            .map(|source| {
                let circuit_state = self.breaker.state(&source);
                let health = SourceHealth {
                    healthy: circuit_state == CircuitState::Closed,
                    circuit_state,
                    failure_count: self.breaker.failure_count(&source),
                    success_rate: snapshots.get(&source).map_or(0.0, |s| s.success_rate),
                    remaining_tokens: (self.limiter.remaining_tokens(&source) * 100.0).round()
                        / 100.0,
                    capacity: self.config.source(&source).capacity,
                    recent_errors: self.stats.recent_errors(&source, HEALTH_RECENT_ERRORS),
                };
                (source, health)
            })
            .collect()
    }

    /// Purge expired cache entries.
    pub fn purge_expired(&self) -> Result<usize> {
        let removed = self.cache.purge_expired()?;
        info!("Purged {} expired cache entries", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::errors::GateError;

    fn registry() -> SourceRegistry {
        SourceRegistry::new(GateConfig::default(), Arc::new(MemoryCacheStore::new())).unwrap()
    }

    #[test]
    fn test_client_is_shared_per_source() {
        let registry = registry();
        let a = registry.client("finnhub");
        let b = registry.client("finnhub");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.config().refill_rate, 5.0);
    }

    #[test]
    fn test_unknown_source_gets_default_config() {
        let registry = registry();
        let client = registry.client("coingecko");
        assert_eq!(client.config(), &registry.config().default_source);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = GateConfig::default();
        config.fallback_chains.insert("stock".into(), Vec::new());

        let result = SourceRegistry::new(config, Arc::new(MemoryCacheStore::new()));
        assert!(matches!(result, Err(GateError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_limiter_uses_source_capacity() {
        let registry = registry();
        assert_eq!(registry.limiter().remaining_tokens("alpha_vantage"), 10.0);
        assert_eq!(registry.limiter().remaining_tokens("iex_cloud"), 1000.0);
    }

    #[test]
    fn test_health_reports_open_circuit() {
        let registry = registry();
        for _ in 0..5 {
            registry.breaker().record_failure("finnhub");
        }
        registry.stats().record_error("finnhub", "quote_AAPL", "429");

        let health = registry.health();
        assert!(!health["finnhub"].healthy);
        assert_eq!(health["finnhub"].circuit_state, CircuitState::Open);
        assert_eq!(health["finnhub"].recent_errors.len(), 1);
        assert!(health["yfinance"].healthy);
        assert_eq!(health["iex_cloud"].capacity, 1000);
    }
}
