use serde::{Deserialize, Serialize};

/// Classification of a provider failure.
///
/// Used by the rate-limited client to decide whether another attempt against
/// the same source can succeed.
///
/// | Class | Retried on the same source? | Next source tried? |
/// |-------|-----------------------------|--------------------|
/// | `Transient` | Yes, with backoff, up to the attempt cap | Yes, once attempts run out |
/// | `Permanent` | No | Yes |
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Worth retrying after a delay.
    Transient(TransientKind),

    /// Retrying won't help: bad credentials, malformed request, unknown symbol.
    Permanent,
}

impl ErrorClass {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Kind of transient failure, kept so exhausted retries report a precise reason.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientKind {
    /// HTTP 429 or a provider-specific quota message.
    RateLimited,
    /// No answer within the deadline.
    Timeout,
    /// Connection failures and 5xx responses.
    Network,
}
