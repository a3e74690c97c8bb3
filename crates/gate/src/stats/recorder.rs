//! Per-source call statistics.
//!
//! Counters are atomics held per source behind a sharded map, so recording
//! never blocks another source. Each source also keeps a bounded history of
//! its most recent errors.

use std::collections::{BTreeMap, VecDeque};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::config::DEFAULT_ERROR_HISTORY;
use crate::errors::Result;

/// Something that happened while serving a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatEvent {
    /// A call reached the client.
    Call,
    /// Served from cache.
    Hit,
    /// Not in cache (or cache bypassed).
    Miss,
    /// The limiter made the call wait.
    Wait(Duration),
    /// A transient error is being retried.
    Retry,
    /// The call ended without a value.
    Failure,
    /// The provider returned a value after the given response time.
    Success(Duration),
    /// One provider invocation, retries included.
    ProviderCall,
    /// The circuit breaker rejected the call.
    CircuitRejected,
}

/// One entry of the recent-error history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub query_key: String,
    pub message: String,
}

#[derive(Debug, Default)]
struct SourceCounters {
    calls_total: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    rate_limit_waits: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
    successes: AtomicU64,
    provider_calls: AtomicU64,
    circuit_rejections: AtomicU64,
    total_wait_ms: AtomicU64,
    total_response_ms: AtomicU64,
    errors: Mutex<VecDeque<ErrorRecord>>,
}

impl SourceCounters {
    fn lock_errors(&self) -> MutexGuard<'_, VecDeque<ErrorRecord>> {
        self.errors.lock().unwrap_or_else(|poisoned| {
            warn!("Stats error history mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn snapshot(&self, source: &str) -> SourceStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        SourceStats::from_counts(
            source,
            Counts {
                calls_total: load(&self.calls_total),
                cache_hits: load(&self.cache_hits),
                cache_misses: load(&self.cache_misses),
                rate_limit_waits: load(&self.rate_limit_waits),
                retries: load(&self.retries),
                failures: load(&self.failures),
                successes: load(&self.successes),
                provider_calls: load(&self.provider_calls),
                circuit_rejections: load(&self.circuit_rejections),
                total_wait_ms: load(&self.total_wait_ms),
                total_response_ms: load(&self.total_response_ms),
            },
        )
    }
}

struct Counts {
    calls_total: u64,
    cache_hits: u64,
    cache_misses: u64,
    rate_limit_waits: u64,
    retries: u64,
    failures: u64,
    successes: u64,
    provider_calls: u64,
    circuit_rejections: u64,
    total_wait_ms: u64,
    total_response_ms: u64,
}

/// Point-in-time copy of one source's counters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceStats {
    pub source: String,
    pub calls_total: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub rate_limit_waits: u64,
    pub retries: u64,
    pub failures: u64,
    pub successes: u64,
    pub provider_calls: u64,
    pub circuit_rejections: u64,
    pub total_wait_ms: u64,
    pub total_response_ms: u64,
    /// Percentage of calls answered, from cache or provider, to one decimal.
    pub success_rate: f64,
    /// Mean provider response time over successful calls.
    pub avg_response_ms: f64,
}

impl SourceStats {
    fn from_counts(source: &str, c: Counts) -> Self {
        let success_rate = if c.calls_total == 0 {
            0.0
        } else {
            let answered = (c.successes + c.cache_hits) as f64;
            (answered / c.calls_total as f64 * 1000.0).round() / 10.0
        };
        let avg_response_ms = if c.successes == 0 {
            0.0
        } else {
            c.total_response_ms as f64 / c.successes as f64
        };

        Self {
            source: source.to_string(),
            calls_total: c.calls_total,
            cache_hits: c.cache_hits,
            cache_misses: c.cache_misses,
            rate_limit_waits: c.rate_limit_waits,
            retries: c.retries,
            failures: c.failures,
            successes: c.successes,
            provider_calls: c.provider_calls,
            circuit_rejections: c.circuit_rejections,
            total_wait_ms: c.total_wait_ms,
            total_response_ms: c.total_response_ms,
            success_rate,
            avg_response_ms,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Shared statistics recorder.
#[derive(Debug)]
pub struct StatsRecorder {
    sources: DashMap<String, Arc<SourceCounters>>,
    max_history: usize,
    clock: Arc<dyn Clock>,
}

impl StatsRecorder {
    pub fn new(max_history: usize) -> Self {
        Self::with_clock(max_history, Arc::new(SystemClock))
    }

    pub fn with_clock(max_history: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            sources: DashMap::new(),
            max_history,
            clock,
        }
    }

    fn counters(&self, source: &str) -> Arc<SourceCounters> {
        if let Some(counters) = self.sources.get(source) {
            return Arc::clone(counters.value());
        }
        let entry = self.sources.entry(source.to_string()).or_default();
        Arc::clone(entry.value())
    }

    pub fn record(&self, source: &str, event: StatEvent) {
        let counters = self.counters(source);
        let bump = |counter: &AtomicU64| {
            counter.fetch_add(1, Ordering::Relaxed);
        };

        match event {
            StatEvent::Call => bump(&counters.calls_total),
            StatEvent::Hit => bump(&counters.cache_hits),
            StatEvent::Miss => bump(&counters.cache_misses),
            StatEvent::Wait(waited) => {
                bump(&counters.rate_limit_waits);
                counters
                    .total_wait_ms
                    .fetch_add(millis(waited), Ordering::Relaxed);
            }
            StatEvent::Retry => bump(&counters.retries),
            StatEvent::Failure => bump(&counters.failures),
            StatEvent::Success(response_time) => {
                bump(&counters.successes);
                counters
                    .total_response_ms
                    .fetch_add(millis(response_time), Ordering::Relaxed);
            }
            StatEvent::ProviderCall => bump(&counters.provider_calls),
            StatEvent::CircuitRejected => bump(&counters.circuit_rejections),
        }
    }

    /// Appends to the source's error history, dropping the oldest entry when full.
    pub fn record_error(&self, source: &str, query_key: &str, message: &str) {
        let record = ErrorRecord {
            timestamp: self.clock.now(),
            source: source.to_string(),
            query_key: query_key.to_string(),
            message: message.to_string(),
        };

        let counters = self.counters(source);
        let mut errors = counters.lock_errors();
        while errors.len() >= self.max_history.max(1) {
            errors.pop_front();
        }
        errors.push_back(record);
    }

    pub fn snapshot(&self, source: &str) -> Option<SourceStats> {
        self.sources
            .get(source)
            .map(|counters| counters.snapshot(source))
    }

    pub fn snapshot_all(&self) -> BTreeMap<String, SourceStats> {
        self.sources
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot(entry.key())))
            .collect()
    }

    /// Up to `limit` most recent errors of a source, oldest first.
    pub fn recent_errors(&self, source: &str, limit: usize) -> Vec<ErrorRecord> {
        let Some(counters) = self.sources.get(source).map(|c| Arc::clone(c.value())) else {
            return Vec::new();
        };

        let errors = counters.lock_errors();
        let skip = errors.len().saturating_sub(limit);
        errors.iter().skip(skip).cloned().collect()
    }

    /// Writes every source's stats as pretty JSON keyed by source.
    pub fn export<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer_pretty(writer, &self.snapshot_all())?;
        Ok(())
    }

    pub fn export_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path.as_ref())?;
        let mut writer = std::io::BufWriter::new(file);
        self.export(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Forget every counter and error, starting a new recording epoch.
    pub fn clear(&self) {
        self.sources.clear();
    }
}

impl Default for StatsRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_HISTORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_rates() {
        let stats = StatsRecorder::default();

        for _ in 0..4 {
            stats.record("finnhub", StatEvent::Call);
        }
        stats.record("finnhub", StatEvent::Hit);
        stats.record("finnhub", StatEvent::Miss);
        stats.record("finnhub", StatEvent::Success(Duration::from_millis(120)));
        stats.record("finnhub", StatEvent::Miss);
        stats.record("finnhub", StatEvent::Success(Duration::from_millis(80)));
        stats.record("finnhub", StatEvent::Miss);
        stats.record("finnhub", StatEvent::Failure);
        stats.record("finnhub", StatEvent::Wait(Duration::from_millis(250)));

        let snapshot = stats.snapshot("finnhub").unwrap();
        assert_eq!(snapshot.calls_total, 4);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 3);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.rate_limit_waits, 1);
        assert_eq!(snapshot.total_wait_ms, 250);
        assert_eq!(snapshot.success_rate, 75.0);
        assert_eq!(snapshot.avg_response_ms, 100.0);

        assert!(stats.snapshot("yfinance").is_none());
    }

    #[test]
    fn test_success_rate_rounds_to_one_decimal() {
        let stats = StatsRecorder::default();
        for _ in 0..3 {
            stats.record("s", StatEvent::Call);
        }
        stats.record("s", StatEvent::Hit);

        assert_eq!(stats.snapshot("s").unwrap().success_rate, 33.3);
    }

    #[test]
    fn test_error_history_is_bounded_per_source() {
        let stats = StatsRecorder::new(3);
        for i in 0..5 {
            stats.record_error("a", &format!("k{}", i), "429");
        }
        stats.record_error("b", "k", "timeout");

        let recent = stats.recent_errors("a", 10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].query_key, "k2");
        assert_eq!(recent[2].query_key, "k4");

        assert_eq!(stats.recent_errors("a", 1)[0].query_key, "k4");
        assert_eq!(stats.recent_errors("b", 10).len(), 1);
        assert!(stats.recent_errors("c", 10).is_empty());
    }

    #[test]
    fn test_export_and_clear() {
        let stats = StatsRecorder::default();
        stats.record("finnhub", StatEvent::Call);
        stats.record("yfinance", StatEvent::Retry);

        let mut buffer = Vec::new();
        stats.export(&mut buffer).unwrap();
        let exported: BTreeMap<String, SourceStats> = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(exported.len(), 2);
        assert_eq!(exported["yfinance"].retries, 1);

        stats.clear();
        assert!(stats.snapshot_all().is_empty());
    }

    #[test]
    fn test_export_to_path() {
        let stats = StatsRecorder::default();
        stats.record("finnhub", StatEvent::Call);
        stats.record("finnhub", StatEvent::Hit);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_stats.json");
        stats.export_to_path(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let exported: BTreeMap<String, SourceStats> = serde_json::from_str(&contents).unwrap();
        assert_eq!(exported["finnhub"], stats.snapshot("finnhub").unwrap());
        assert_eq!(exported["finnhub"].cache_hits, 1);
    }

    #[test]
    fn test_concurrent_increments() {
        let stats = Arc::new(StatsRecorder::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record("s", StatEvent::ProviderCall);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.snapshot("s").unwrap().provider_calls, 8000);
    }
}
