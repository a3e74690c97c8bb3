//! Fallback across sources for one logical request.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{FetchDiagnostics, SkipReason, SourceCalls};
use crate::client::{CallOptions, Fetched};
use crate::errors::{GateError, Result};
use crate::registry::SourceRegistry;

/// Tries the sources of a request type in order until one answers.
///
/// Each source is called through its own client, so its cache, limiter,
/// breaker and retry policy apply. Nothing is retried at this level: once a
/// source has failed the next one is tried.
#[derive(Clone, Debug)]
pub struct MultiSourceFetcher {
    registry: Arc<SourceRegistry>,
}

impl MultiSourceFetcher {
    pub fn new(registry: Arc<SourceRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Sources to try, in order.
    ///
    /// `preferred` comes first when it has a call. Then the chain configured
    /// for `request_type` (or the default chain), then, when no chain exists at
    /// all, every supplied source in lexicographic order. Repeats and sources
    /// without a call are recorded in `diagnostics` and left out.
    fn attempt_order<T>(
        &self,
        request_type: &str,
        calls: &SourceCalls<T>,
        preferred: Option<&str>,
        diagnostics: &mut FetchDiagnostics,
    ) -> Vec<String> {
        let chain: Vec<&str> = match self.registry.config().chain(request_type) {
            Some(chain) => chain.iter().map(String::as_str).collect(),
            None => calls.sources(),
        };

        let mut seen = HashSet::new();
        let mut order = Vec::new();
        if let Some(source) = preferred.filter(|p| calls.contains(p)) {
            seen.insert(source);
            order.push(source.to_string());
        }

        for source in chain {
            if !calls.contains(source) {
                diagnostics.record_skip(source, SkipReason::NoProviderCall);
                continue;
            }
            if !seen.insert(source) {
                // The preferred source reappearing in its chain is expected.
                if Some(source) != preferred {
                    diagnostics.record_skip(source, SkipReason::AlreadyAttempted);
                }
                continue;
            }
            order.push(source.to_string());
        }
        order
    }

    /// First successful answer for `query_key` among the request type's sources.
    ///
    /// `Fetched::source` names the source that answered.
    pub async fn fetch_with_fallback<T>(
        &self,
        request_type: &str,
        calls: &SourceCalls<T>,
        query_key: &str,
        preferred: Option<&str>,
    ) -> Result<Fetched<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        self.fetch_with_diagnostics(request_type, calls, query_key, preferred, CallOptions::default())
            .await
            .0
    }

    /// Like [`fetch_with_fallback`](Self::fetch_with_fallback), with explicit
    /// call options, also returning the trail of every source considered.
    pub async fn fetch_with_diagnostics<T>(
        &self,
        request_type: &str,
        calls: &SourceCalls<T>,
        query_key: &str,
        preferred: Option<&str>,
        options: CallOptions,
    ) -> (Result<Fetched<T>>, FetchDiagnostics)
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let mut diagnostics = FetchDiagnostics::new();
        let order = self.attempt_order(request_type, calls, preferred, &mut diagnostics);

        if order.is_empty() {
            warn!(
                "No sources available for {} '{}' ({} calls supplied)",
                request_type,
                query_key,
                calls.len()
            );
            let err = GateError::NoSourcesAvailable {
                request_type: request_type.to_string(),
                query_key: query_key.to_string(),
            };
            return (Err(err), diagnostics);
        }

        for source in &order {
            let Some(provider) = calls.get(source) else {
                continue;
            };
            let client = self.registry.client(source);

            match client
                .call_with_cache_and_limit(provider.as_ref(), query_key, options.clone())
                .await
            {
                Ok(fetched) => {
                    diagnostics.record_success(source, fetched.from_cache);
                    debug!("{} '{}': {}", request_type, query_key, diagnostics.summary());
                    return (Ok(fetched), diagnostics);
                }
                Err(failure) => {
                    info!(
                        "{} '{}': source {} failed ({}), trying next",
                        request_type, query_key, source, failure.reason
                    );
                    diagnostics.record_failure(failure);
                }
            }
        }

        warn!(
            "All sources exhausted for {} '{}': {}",
            request_type,
            query_key,
            diagnostics.summary()
        );
        let err = GateError::AllSourcesExhausted {
            request_type: request_type.to_string(),
            query_key: query_key.to_string(),
            failures: diagnostics.failures(),
        };
        (Err(err), diagnostics)
    }
}
