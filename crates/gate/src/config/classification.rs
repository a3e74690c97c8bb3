//! Per-source table deciding which provider errors are transient.

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorClass, ProviderError, TransientKind};

/// Maps provider errors to an [`ErrorClass`].
///
/// Structured [`ProviderError`] variants have a fixed class. Raw HTTP failures
/// are looked up by status code; the rate-limit markers are only consulted for
/// the body of a non-error status. Free-form errors are transient only when
/// their message contains one of the markers. Any status or message not
/// listed here is permanent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationTable {
    /// Statuses meaning "slow down" (retried as rate-limited).
    pub rate_limited_statuses: Vec<u16>,
    /// Statuses meaning the upstream timed out.
    pub timeout_statuses: Vec<u16>,
    /// Other statuses worth retrying (server-side hiccups).
    pub transient_statuses: Vec<u16>,
    /// Case-insensitive substrings marking a free-form error as rate-limited.
    pub rate_limit_markers: Vec<String>,
}

impl Default for ClassificationTable {
    fn default() -> Self {
        Self {
            rate_limited_statuses: vec![429],
            timeout_statuses: vec![408, 504],
            transient_statuses: vec![500, 502, 503],
            rate_limit_markers: ["rate limit", "429", "too many requests", "quota", "exceeded"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

impl ClassificationTable {
    /// Extends the default markers with provider-specific ones.
    pub fn with_markers(mut self, markers: &[&str]) -> Self {
        self.rate_limit_markers
            .extend(markers.iter().map(|m| m.to_string()));
        self
    }

    /// Classify a provider error.
    pub fn classify(&self, error: &ProviderError) -> ErrorClass {
        match error {
            ProviderError::RateLimited(_) => ErrorClass::Transient(TransientKind::RateLimited),
            ProviderError::Timeout(_) => ErrorClass::Transient(TransientKind::Timeout),
            ProviderError::Network(_) => ErrorClass::Transient(TransientKind::Network),

            ProviderError::Unauthorized(_)
            | ProviderError::BadRequest(_)
            | ProviderError::NotFound(_) => ErrorClass::Permanent,

            // Markers only apply to bodies of non-error responses; an error
            // status outside the table is permanent whatever its message says.
            ProviderError::Http { status, message } => self
                .classify_status(*status)
                .or_else(|| {
                    if *status < 400 {
                        self.classify_message(message)
                    } else {
                        None
                    }
                })
                .unwrap_or(ErrorClass::Permanent),

            ProviderError::Other(message) => self
                .classify_message(message)
                .unwrap_or(ErrorClass::Permanent),
        }
    }

    fn classify_status(&self, status: u16) -> Option<ErrorClass> {
        if self.rate_limited_statuses.contains(&status) {
            Some(ErrorClass::Transient(TransientKind::RateLimited))
        } else if self.timeout_statuses.contains(&status) {
            Some(ErrorClass::Transient(TransientKind::Timeout))
        } else if self.transient_statuses.contains(&status) {
            Some(ErrorClass::Transient(TransientKind::Network))
        } else {
            None
        }
    }

    fn classify_message(&self, message: &str) -> Option<ErrorClass> {
        let lowered = message.to_lowercase();
        self.rate_limit_markers
            .iter()
            .any(|marker| lowered.contains(&marker.to_lowercase()))
            .then_some(ErrorClass::Transient(TransientKind::RateLimited))
    }
}
