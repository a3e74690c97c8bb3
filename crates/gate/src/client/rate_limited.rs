//! Rate-limited, caching client for a single source.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;

use crate::cache::CacheStore;
use crate::config::SourceConfig;
use crate::errors::{ErrorClass, ProviderError, SourceFailure};
use crate::provider::Provider;
use crate::registry::{CircuitBreaker, RateLimiter};
use crate::stats::{StatEvent, StatsRecorder};

/// Per-call switches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallOptions {
    /// Read from and write to the cache.
    pub use_cache: bool,
    /// TTL for the stored response instead of the source's default.
    pub ttl_override: Option<Duration>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            ttl_override: None,
        }
    }
}

impl CallOptions {
    /// Always call the provider and leave the cache untouched.
    pub fn bypass_cache() -> Self {
        Self {
            use_cache: false,
            ttl_override: None,
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            use_cache: true,
            ttl_override: Some(ttl),
        }
    }
}

/// A value together with how it was obtained.
#[derive(Clone, Debug, PartialEq)]
pub struct Fetched<T> {
    pub value: T,
    /// Source that produced the value.
    pub source: String,
    pub from_cache: bool,
    /// Provider invocations made. Zero for cache hits.
    pub attempts: u32,
    /// Time spent waiting on the rate limiter.
    pub waited: Duration,
}

impl<T> Fetched<T> {
    pub fn into_value(self) -> T {
        self.value
    }

    /// `(value, source)`.
    pub fn into_parts(self) -> (T, String) {
        (self.value, self.source)
    }
}

struct Answered<T> {
    value: T,
    attempts: u32,
    response_time: Duration,
}

struct Abandoned {
    failure: SourceFailure,
    /// Whether the failure says something about the source's health.
    counts_against_source: bool,
}

/// Wraps every call to one source with cache, circuit breaker, rate limiter
/// and retry policy.
///
/// Obtain clients from [`SourceRegistry::client`](crate::SourceRegistry::client)
/// so that every caller of a source shares its bucket and breaker.
pub struct RateLimitedClient {
    source: String,
    config: SourceConfig,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    cache: Arc<dyn CacheStore>,
    stats: Arc<StatsRecorder>,
}

impl std::fmt::Debug for RateLimitedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedClient")
            .field("source", &self.source)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RateLimitedClient {
    pub fn new(
        source: impl Into<String>,
        config: SourceConfig,
        limiter: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
        cache: Arc<dyn CacheStore>,
        stats: Arc<StatsRecorder>,
    ) -> Self {
        Self {
            source: source.into(),
            config,
            limiter,
            breaker,
            cache,
            stats,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// [`call_with_cache_and_limit`](Self::call_with_cache_and_limit) with default options.
    pub async fn call<T, P>(&self, provider: &P, query_key: &str) -> Result<Fetched<T>, SourceFailure>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        P: Provider<T> + ?Sized,
    {
        self.call_with_cache_and_limit(provider, query_key, CallOptions::default())
            .await
    }

    /// Serve `query_key` from cache, or call the provider under the source's
    /// limits and cache the answer.
    ///
    /// A cache hit never touches the breaker, the limiter or the provider. On
    /// a miss the breaker is consulted, one token is acquired, and the provider
    /// is invoked until it succeeds, fails permanently, or the retry budget is
    /// spent.
    pub async fn call_with_cache_and_limit<T, P>(
        &self,
        provider: &P,
        query_key: &str,
        options: CallOptions,
    ) -> Result<Fetched<T>, SourceFailure>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        P: Provider<T> + ?Sized,
    {
        let source = self.source.as_str();
        self.stats.record(source, StatEvent::Call);

        if options.use_cache {
            if let Some(value) = self.read_cache::<T>(query_key) {
                debug!("{}: cache hit for {}", source, query_key);
                self.stats.record(source, StatEvent::Hit);
                return Ok(Fetched {
                    value,
                    source: self.source.clone(),
                    from_cache: true,
                    attempts: 0,
                    waited: Duration::ZERO,
                });
            }
        }
        self.stats.record(source, StatEvent::Miss);

        if !self.breaker.is_allowed(source) {
            warn!("{}: circuit breaker open, rejecting {}", source, query_key);
            let failure = SourceFailure::circuit_open(source);
            self.stats.record(source, StatEvent::CircuitRejected);
            self.stats.record(source, StatEvent::Failure);
            self.stats.record_error(source, query_key, &failure.message);
            return Err(failure);
        }

        let waited = self.limiter.acquire(source).await;
        if !waited.is_zero() {
            debug!("{}: waited {:?} for a token", source, waited);
            self.stats.record(source, StatEvent::Wait(waited));
        }

        match self.invoke_with_retry(provider, query_key).await {
            Ok(answered) => {
                self.breaker.record_success(source);
                if options.use_cache {
                    let ttl = options.ttl_override.unwrap_or(self.config.default_ttl);
                    self.write_cache(query_key, &answered.value, ttl);
                }
                self.stats
                    .record(source, StatEvent::Success(answered.response_time));
                info!(
                    "{}: {} (attempt {}, {:?})",
                    source, query_key, answered.attempts, answered.response_time
                );

                Ok(Fetched {
                    value: answered.value,
                    source: self.source.clone(),
                    from_cache: false,
                    attempts: answered.attempts,
                    waited,
                })
            }
            Err(abandoned) => {
                if abandoned.counts_against_source {
                    self.breaker.record_failure(source);
                }
                self.stats.record(source, StatEvent::Failure);
                Err(abandoned.failure)
            }
        }
    }

    async fn invoke_with_retry<T, P>(
        &self,
        provider: &P,
        query_key: &str,
    ) -> Result<Answered<T>, Abandoned>
    where
        P: Provider<T> + ?Sized,
    {
        let source = self.source.as_str();
        let retry = &self.config.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.stats.record(source, StatEvent::ProviderCall);

            let started = Instant::now();
            let outcome = match self.config.timeout {
                Some(limit) => match tokio::time::timeout(limit, provider.fetch()).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ProviderError::Timeout(format!(
                        "no response within {:?}",
                        limit
                    ))),
                },
                None => provider.fetch().await,
            };

            let err = match outcome {
                Ok(value) => {
                    return Ok(Answered {
                        value,
                        attempts: attempt,
                        response_time: started.elapsed(),
                    })
                }
                Err(err) => err,
            };
            let message = err.to_string();
            self.stats.record_error(source, query_key, &message);

            match self.config.classification.classify(&err) {
                ErrorClass::Permanent => {
                    error!("{}: {} - {}", source, query_key, message);
                    return Err(Abandoned {
                        failure: SourceFailure::permanent(source, attempt, message),
                        counts_against_source: is_credential_error(&err),
                    });
                }
                ErrorClass::Transient(kind) if attempt >= retry.max_attempts => {
                    error!(
                        "{}: {} failed after {} attempt(s). Last error: {}",
                        source, query_key, attempt, message
                    );
                    return Err(Abandoned {
                        failure: SourceFailure::exhausted(source, kind, attempt, message),
                        counts_against_source: true,
                    });
                }
                ErrorClass::Transient(_) => {
                    let delay = retry.jittered_delay(attempt - 1);
                    warn!(
                        "{}: {}. Retry {}/{} in {:?}",
                        source, message, attempt, retry.max_attempts, delay
                    );
                    self.stats.record(source, StatEvent::Retry);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn read_cache<T: DeserializeOwned>(&self, query_key: &str) -> Option<T> {
        let payload = match self.cache.get(&self.source, query_key) {
            Ok(payload) => payload?,
            Err(e) => {
                warn!("{}: cache read failed for {}: {}", self.source, query_key, e);
                return None;
            }
        };

        match serde_json::from_value(payload) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    "{}: cached entry for {} does not match the requested type: {}",
                    self.source, query_key, e
                );
                None
            }
        }
    }

    fn write_cache<T: Serialize>(&self, query_key: &str, value: &T, ttl: Duration) {
        let payload = match serde_json::to_value(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("{}: response for {} is not cacheable: {}", self.source, query_key, e);
                return;
            }
        };

        if let Err(e) = self.cache.put(&self.source, query_key, payload, ttl) {
            warn!("{}: cache write failed for {}: {}", self.source, query_key, e);
        }
    }
}

/// Bad credentials fail every request, so they count against the source.
fn is_credential_error(err: &ProviderError) -> bool {
    matches!(
        err,
        ProviderError::Unauthorized(_) | ProviderError::Http { status: 401 | 403, .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;

    use crate::cache::MemoryCacheStore;
    use crate::config::{CircuitBreakerConfig, RetryPolicy};
    use crate::errors::FailureReason;
    use crate::registry::{CircuitState, RateLimitConfig};

    fn source_config(max_attempts: u32) -> SourceConfig {
        let retry = RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(1),
            jitter: 0.0,
        };
        SourceConfig {
            capacity: 5,
            refill_rate: 5.0,
            circuit_breaker: CircuitBreakerConfig::for_retry_policy(&retry),
            retry,
            ..SourceConfig::default()
        }
    }

    fn client(config: SourceConfig) -> (RateLimitedClient, Arc<MemoryCacheStore>) {
        let cache = Arc::new(MemoryCacheStore::new());
        let limiter = Arc::new(RateLimiter::new());
        limiter.configure("mock", RateLimitConfig::from(&config));
        let breaker = Arc::new(CircuitBreaker::new());
        breaker.configure("mock", config.circuit_breaker.clone());

        let client = RateLimitedClient::new(
            "mock",
            config,
            limiter,
            breaker,
            cache.clone(),
            Arc::new(StatsRecorder::default()),
        );
        (client, cache)
    }

    /// Fails with `error` for the first `failures` calls, then returns the call number.
    fn flaky(
        calls: Arc<AtomicU32>,
        failures: u32,
        error: ProviderError,
    ) -> impl Fn() -> futures::future::Ready<Result<u32, ProviderError>> + Send + Sync {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            futures::future::ready(if n <= failures {
                Err(error.clone())
            } else {
                Ok(n)
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_skips_provider() {
        let (client, _) = client(source_config(3));
        let calls = Arc::new(AtomicU32::new(0));
        let provider = flaky(calls.clone(), 0, ProviderError::Other(String::new()));

        let first = client.call(&provider, "quote_AAPL").await.unwrap();
        let second = client.call(&provider, "quote_AAPL").await.unwrap();

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(second.value, 1);
        assert_eq!(second.attempts, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = client.stats.snapshot("mock").unwrap();
        assert_eq!(stats.calls_total, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.provider_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let (client, _) = client(source_config(3));
        let calls = Arc::new(AtomicU32::new(0));
        let provider = flaky(calls.clone(), 2, ProviderError::RateLimited("429".into()));

        let started = Instant::now();
        let fetched = client.call(&provider, "k").await.unwrap();

        assert_eq!(fetched.value, 3);
        assert_eq!(fetched.attempts, 3);
        // 100ms then 200ms of backoff.
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(client.stats.snapshot("mock").unwrap().retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_fail() {
        let (client, _) = client(source_config(2));
        let calls = Arc::new(AtomicU32::new(0));
        let provider = flaky(calls.clone(), 2, ProviderError::Timeout("slow".into()));

        let failure = client.call(&provider, "k").await.unwrap_err();

        assert_eq!(failure.reason, FailureReason::Timeout);
        assert_eq!(failure.attempts, 2);
        assert!(failure.exhausted);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(client.breaker.failure_count("mock"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let (client, cache) = client(source_config(5));
        let calls = Arc::new(AtomicU32::new(0));
        let provider = flaky(calls.clone(), 10, ProviderError::NotFound("ZZZZ".into()));

        let failure = client.call(&provider, "k").await.unwrap_err();

        assert_eq!(failure.reason, FailureReason::PermanentError);
        assert_eq!(failure.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.breaker.failure_count("mock"), 0);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_not_found_with_marker_in_url_is_not_retried() {
        let (client, _) = client(source_config(3));
        let calls = Arc::new(AtomicU32::new(0));
        let error = ProviderError::Http {
            status: 404,
            message: "https://finnhub.io/api/v1/stock/candle?symbol=ZZZZ&from=1704290000".into(),
        };
        let provider = flaky(calls.clone(), 10, error);

        let failure = client.call(&provider, "k").await.unwrap_err();

        assert_eq!(failure.reason, FailureReason::PermanentError);
        assert_eq!(failure.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.stats.snapshot("mock").unwrap().provider_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_counts_against_breaker() {
        let (client, _) = client(source_config(1));
        let calls = Arc::new(AtomicU32::new(0));
        let provider = flaky(calls.clone(), 10, ProviderError::Unauthorized("bad key".into()));

        for _ in 0..3 {
            client.call(&provider, "k").await.unwrap_err();
        }
        assert_eq!(client.breaker.state("mock"), CircuitState::Open);

        let failure = client.call(&provider, "k").await.unwrap_err();
        assert_eq!(failure.reason, FailureReason::CircuitOpen);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(client.stats.snapshot("mock").unwrap().circuit_rejections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_bounds_each_attempt() {
        let config = SourceConfig {
            timeout: Some(Duration::from_millis(50)),
            ..source_config(2)
        };
        let (client, _) = client(config);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let provider = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n == 1 {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                }
                Ok::<_, ProviderError>(n)
            }
        };

        let fetched = client.call(&provider, "k").await.unwrap();
        assert_eq!(fetched.value, 2);
        assert_eq!(fetched.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_options() {
        let (client, cache) = client(source_config(1));
        let calls = Arc::new(AtomicU32::new(0));
        let provider = flaky(calls.clone(), 0, ProviderError::Other(String::new()));

        client
            .call_with_cache_and_limit(&provider, "k", CallOptions::bypass_cache())
            .await
            .unwrap();
        assert!(cache.is_empty());

        client
            .call_with_cache_and_limit(&provider, "k", CallOptions::with_ttl(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(cache.get("mock", "k").unwrap(), Some(json!(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatched_cache_entry_is_a_miss() {
        let (client, cache) = client(source_config(1));
        cache
            .put("mock", "k", json!({"unexpected": true}), Duration::from_secs(60))
            .unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let provider = flaky(calls.clone(), 0, ProviderError::Other(String::new()));

        let fetched = client.call(&provider, "k").await.unwrap();
        assert!(!fetched.from_cache);
        assert_eq!(fetched.value, 1);
    }
}
