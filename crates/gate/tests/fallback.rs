//! End-to-end fallback across a chain of sources.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use quotegate::{
    CircuitState, FailureReason, GateConfig, GateError, MemoryCacheStore, MultiSourceFetcher,
    ProviderError, RetryPolicy, SourceCalls, SourceConfig, SourceRegistry,
};

fn quick_source() -> SourceConfig {
    SourceConfig {
        capacity: 10,
        refill_rate: 10.0,
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(10),
            multiplier: 2.0,
            max_delay: Duration::from_millis(100),
            jitter: 0.0,
        },
        ..SourceConfig::default()
    }
}

fn fetcher(chain: &[&str]) -> MultiSourceFetcher {
    let mut config = GateConfig::default();
    for source in chain {
        config.register_source(*source, quick_source());
    }
    config.fallback_chains = BTreeMap::from([(
        "quote".to_string(),
        chain.iter().map(|s| s.to_string()).collect(),
    )]);
    config.fallback_chains.insert(
        "default".to_string(),
        chain.iter().map(|s| s.to_string()).collect(),
    );

    let registry = SourceRegistry::new(config, Arc::new(MemoryCacheStore::new())).unwrap();
    MultiSourceFetcher::new(Arc::new(registry))
}

fn counting(
    counter: Arc<AtomicU32>,
    result: Result<f64, ProviderError>,
) -> impl Fn() -> futures::future::Ready<Result<f64, ProviderError>> + Send + Sync + 'static {
    move || {
        counter.fetch_add(1, Ordering::SeqCst);
        futures::future::ready(result.clone())
    }
}

#[tokio::test(start_paused = true)]
async fn test_third_source_answers_after_two_fail() {
    let fetcher = fetcher(&["a", "b", "c"]);
    let (a, b, c) = (
        Arc::new(AtomicU32::new(0)),
        Arc::new(AtomicU32::new(0)),
        Arc::new(AtomicU32::new(0)),
    );
    let calls = SourceCalls::new()
        .with("a", counting(Arc::clone(&a), Err(ProviderError::Network("reset".into()))))
        .with("b", counting(Arc::clone(&b), Err(ProviderError::BadRequest("bad".into()))))
        .with("c", counting(Arc::clone(&c), Ok(101.5)));

    let fetched = fetcher
        .fetch_with_fallback("quote", &calls, "AAPL", None)
        .await
        .unwrap();

    assert_eq!(fetched.value, 101.5);
    assert_eq!(fetched.source, "c");
    assert_eq!(a.load(Ordering::SeqCst), 2);
    assert_eq!(b.load(Ordering::SeqCst), 1);
    assert_eq!(c.load(Ordering::SeqCst), 1);

    let stats = fetcher.registry().stats();
    assert_eq!(stats.snapshot("a").unwrap().failures, 1);
    assert_eq!(stats.snapshot("b").unwrap().failures, 1);
    assert_eq!(stats.snapshot("c").unwrap().successes, 1);

    // Second request is answered from c's cache without touching a or b.
    let again = fetcher
        .fetch_with_fallback("quote", &calls, "AAPL", Some("c"))
        .await
        .unwrap();
    assert!(again.from_cache);
    assert_eq!(a.load(Ordering::SeqCst), 2);
    assert_eq!(c.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_chain_reports_every_source() {
    let fetcher = fetcher(&["a", "b"]);
    let calls: SourceCalls<f64> = SourceCalls::new()
        .with("a", || async {
            Err::<f64, _>(ProviderError::RateLimited("429".into()))
        })
        .with("b", || async {
            Err::<f64, _>(ProviderError::NotFound("no such symbol".into()))
        });

    let err = fetcher
        .fetch_with_fallback("quote", &calls, "ZZZZ", None)
        .await
        .unwrap_err();

    assert!(matches!(err, GateError::AllSourcesExhausted { .. }));
    let failures = err.source_failures();
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].source_id, "a");
    assert_eq!(failures[0].reason, FailureReason::RateLimited);
    assert!(failures[0].exhausted);
    assert_eq!(failures[1].source_id, "b");
    assert_eq!(failures[1].reason, FailureReason::PermanentError);
    assert_eq!(failures[1].attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_is_skipped_to_next_source() {
    let fetcher = fetcher(&["a", "b"]);
    let a = Arc::new(AtomicU32::new(0));
    let calls = SourceCalls::new()
        .with("a", counting(Arc::clone(&a), Ok(1.0)))
        .with("b", || async { Ok::<_, ProviderError>(2.0) });

    let threshold = fetcher.registry().config().source("a").circuit_breaker.failure_threshold;
    for _ in 0..threshold {
        fetcher.registry().breaker().record_failure("a");
    }
    assert_eq!(fetcher.registry().breaker().state("a"), CircuitState::Open);

    let (result, diagnostics) = fetcher
        .fetch_with_diagnostics("quote", &calls, "MSFT", None, Default::default())
        .await;

    assert_eq!(result.unwrap().source, "b");
    assert_eq!(a.load(Ordering::SeqCst), 0);
    assert_eq!(diagnostics.failures()[0].reason, FailureReason::CircuitOpen);
}

#[tokio::test]
async fn test_no_calls_for_chain() {
    let fetcher = fetcher(&["a", "b"]);
    let calls: SourceCalls<f64> = SourceCalls::new();

    let err = fetcher
        .fetch_with_fallback("quote", &calls, "AAPL", None)
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::NoSourcesAvailable { .. }));
}
