//! Error types and failure classification for the gate.
//!
//! This module provides:
//! - [`ProviderError`]: what a provider call reports when it fails
//! - [`ErrorClass`]: whether a provider failure is worth retrying
//! - [`SourceFailure`]: the structured failure of one source after the client gave up
//! - [`GateError`]: the error surfaced to callers of the gate
//! - [`CacheError`]: failures of a cache store

mod retry;

pub use retry::{ErrorClass, TransientKind};

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = GateError> = std::result::Result<T, E>;

/// Errors reported by a provider call.
///
/// Providers never need to decide whether an error is retryable. The
/// [`ClassificationTable`](crate::config::ClassificationTable) of the source
/// maps every variant to an [`ErrorClass`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider rejected the request because of its own rate limit.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The provider did not answer in time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Connection reset, refused or otherwise interrupted.
    #[error("Network error: {0}")]
    Network(String),

    /// Missing or invalid credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The request itself is malformed.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The requested resource does not exist at the provider.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A raw HTTP failure, classified by status code.
    #[error("HTTP {status}: {message}")]
    Http {
        /// The HTTP status code returned by the provider
        status: u16,
        /// The response body or reason phrase
        message: String,
    },

    /// Anything else, classified by message markers.
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        // Query strings carry tickers and timestamps that must not reach
        // marker matching.
        let err = err.without_url();
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_connect() || err.is_request() || err.is_body() {
            Self::Network(err.to_string())
        } else {
            Self::Other(err.to_string())
        }
    }
}

/// Reason tag attached to a failed source call.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Retries ran out while the provider kept rate limiting.
    RateLimited,
    /// Retries ran out while the provider kept timing out.
    Timeout,
    /// Retries ran out on network or server-side errors.
    TransientError,
    /// The provider returned an error that retrying cannot fix.
    PermanentError,
    /// The source's circuit breaker rejected the call.
    CircuitOpen,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::TransientError => "transient_error",
            Self::PermanentError => "permanent_error",
            Self::CircuitOpen => "circuit_open",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<TransientKind> for FailureReason {
    fn from(kind: TransientKind) -> Self {
        match kind {
            TransientKind::RateLimited => Self::RateLimited,
            TransientKind::Timeout => Self::Timeout,
            TransientKind::Network => Self::TransientError,
        }
    }
}

/// Structured failure of a single source.
///
/// Returned by [`RateLimitedClient`](crate::client::RateLimitedClient) instead
/// of the raw provider error.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{source_id}: {reason} after {attempts} attempt(s): {message}")]
pub struct SourceFailure {
    /// The source that failed
    pub source_id: String,
    /// Reason tag for the failure
    pub reason: FailureReason,
    /// Provider invocations made before giving up
    pub attempts: u32,
    /// True when the retry budget was used up on transient errors
    pub exhausted: bool,
    /// Message of the last provider error
    pub message: String,
}

impl SourceFailure {
    /// All attempts failed with transient errors.
    pub fn exhausted(
        source_id: impl Into<String>,
        kind: TransientKind,
        attempts: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            reason: kind.into(),
            attempts,
            exhausted: true,
            message: message.into(),
        }
    }

    /// The provider reported a permanent error.
    pub fn permanent(source_id: impl Into<String>, attempts: u32, message: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            reason: FailureReason::PermanentError,
            attempts,
            exhausted: false,
            message: message.into(),
        }
    }

    /// The circuit breaker rejected the call before any provider invocation.
    pub fn circuit_open(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            reason: FailureReason::CircuitOpen,
            attempts: 0,
            exhausted: false,
            message: "circuit breaker is open".to_string(),
        }
    }
}

/// Errors that can occur when using the gate.
#[derive(Error, Debug)]
pub enum GateError {
    /// Every source in the fallback chain failed.
    /// Carries one failure per attempted source, in attempt order.
    #[error("All sources exhausted for {request_type} '{query_key}': {}", summarize(.failures))]
    AllSourcesExhausted {
        request_type: String,
        query_key: String,
        failures: Vec<SourceFailure>,
    },

    /// No source in the chain had a provider call supplied.
    #[error("No sources available for {request_type} '{query_key}'")]
    NoSourcesAvailable {
        request_type: String,
        query_key: String,
    },

    /// Configuration rejected at startup.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GateError {
    /// Per-source failures attached to an exhausted chain.
    pub fn source_failures(&self) -> &[SourceFailure] {
        match self {
            Self::AllSourcesExhausted { failures, .. } => failures,
            _ => &[],
        }
    }
}

fn summarize(failures: &[SourceFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.source_id, f.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors raised by a [`CacheStore`](crate::cache::CacheStore).
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache storage error: {0}")]
    Storage(String),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache connection pool error: {0}")]
    Pool(String),

    #[error("Cache migration failed: {0}")]
    Migration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kind_maps_to_reason() {
        assert_eq!(
            FailureReason::from(TransientKind::RateLimited),
            FailureReason::RateLimited
        );
        assert_eq!(FailureReason::from(TransientKind::Timeout), FailureReason::Timeout);
        assert_eq!(
            FailureReason::from(TransientKind::Network),
            FailureReason::TransientError
        );
    }

    #[test]
    fn test_reason_serializes_as_tag() {
        let json = serde_json::to_string(&FailureReason::PermanentError).unwrap();
        assert_eq!(json, "\"permanent_error\"");
        assert_eq!(FailureReason::CircuitOpen.to_string(), "circuit_open");
    }

    #[test]
    fn test_source_failure_display() {
        let failure = SourceFailure::exhausted("finnhub", TransientKind::RateLimited, 3, "429");
        assert_eq!(
            failure.to_string(),
            "finnhub: rate_limited after 3 attempt(s): 429"
        );
        assert!(failure.exhausted);
    }

    #[test]
    fn test_all_sources_exhausted_lists_every_source() {
        let error = GateError::AllSourcesExhausted {
            request_type: "stock".to_string(),
            query_key: "quote_AAPL".to_string(),
            failures: vec![
                SourceFailure::permanent("finnhub", 1, "401"),
                SourceFailure::circuit_open("yfinance"),
            ],
        };

        let message = error.to_string();
        assert!(message.contains("finnhub (permanent_error)"));
        assert!(message.contains("yfinance (circuit_open)"));
        assert_eq!(error.source_failures().len(), 2);
    }

    #[test]
    fn test_provider_error_display() {
        let error = ProviderError::Http {
            status: 503,
            message: "Service Unavailable".to_string(),
        };
        assert_eq!(error.to_string(), "HTTP 503: Service Unavailable");
    }
}
