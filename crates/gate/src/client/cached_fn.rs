//! Wrap a plain async function so every call goes through a source's client.

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{derive_query_key, CallOptions, Fetched, RateLimitedClient};
use crate::errors::{ProviderError, SourceFailure};

/// Function bound to a [`RateLimitedClient`] under a name.
///
/// Built with [`with_cache_and_limit`]. Each [`call`](Self::call) derives the
/// query key from the name and the arguments.
pub struct CachedFn<F> {
    client: Arc<RateLimitedClient>,
    name: String,
    func: F,
    options: CallOptions,
}

/// Binds `func` to `client`. Equivalent calls share one cache entry.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use quotegate::{with_cache_and_limit, MemoryCacheStore, ProviderError, SourceRegistry, GateConfig};
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let registry = SourceRegistry::new(GateConfig::default(), Arc::new(MemoryCacheStore::new()))?;
/// let quote = with_cache_and_limit(registry.client("finnhub"), "get_stock_quote", |ticker: String| async move {
///     Ok::<_, ProviderError>(format!("quote for {ticker}"))
/// });
/// let _fetched = quote.call("AAPL".to_string()).await?;
/// # Ok(())
/// # }
/// ```
pub fn with_cache_and_limit<F>(
    client: Arc<RateLimitedClient>,
    name: impl Into<String>,
    func: F,
) -> CachedFn<F> {
    CachedFn {
        client,
        name: name.into(),
        func,
        options: CallOptions::default(),
    }
}

impl<F> CachedFn<F> {
    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &RateLimitedClient {
        &self.client
    }

    /// Run `func(args)` through the client, serving repeats from cache.
    pub async fn call<A, T, Fut>(&self, args: A) -> Result<Fetched<T>, SourceFailure>
    where
        A: Serialize + Clone + Send + Sync,
        F: Fn(A) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, ProviderError>> + Send + 'static,
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let query_key = derive_query_key(&self.name, &args).map_err(|e| {
            SourceFailure::permanent(
                self.client.source(),
                0,
                format!("arguments of {} are not serializable: {}", self.name, e),
            )
        })?;

        let func = &self.func;
        let provider = move || func(args.clone());
        self.client
            .call_with_cache_and_limit(&provider, &query_key, self.options.clone())
            .await
    }
}
