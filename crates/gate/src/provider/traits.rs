use std::future::Future;

use async_trait::async_trait;

use crate::errors::ProviderError;

/// A raw call to one data source, returning `T`.
///
/// The gate decides when and how often a provider runs. Implementations only
/// perform the request and report failures as [`ProviderError`], leaving
/// retry decisions to the source's classification table.
///
/// Closures returning futures implement this trait:
///
/// ```
/// use quotegate::{Provider, ProviderError};
///
/// let quote = || async { Ok::<f64, ProviderError>(190.1) };
/// fn assert_provider<P: Provider<f64>>(_: &P) {}
/// assert_provider(&quote);
/// ```
#[async_trait]
pub trait Provider<T>: Send + Sync {
    async fn fetch(&self) -> Result<T, ProviderError>;
}

#[async_trait]
impl<T, F, Fut> Provider<T> for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, ProviderError>> + Send + 'static,
    T: Send + 'static,
{
    async fn fetch(&self) -> Result<T, ProviderError> {
        (self)().await
    }
}
