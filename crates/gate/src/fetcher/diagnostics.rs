//! Per-request trail of the sources a fetch considered.

use serde::Serialize;

use crate::errors::SourceFailure;

/// Why a source in the attempt order was not called.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The chain names the source but the caller supplied no call for it.
    NoProviderCall,
    /// The source already appeared earlier in the attempt order.
    AlreadyAttempted,
}

/// Record of a single source considered during a fetch.
#[derive(Clone, Debug, Serialize)]
pub struct SourceAttempt {
    pub source_id: String,
    pub skipped: Option<SkipReason>,
    pub failure: Option<SourceFailure>,
    pub success: bool,
    pub from_cache: bool,
}

/// Ordered record of a fetch, one entry per source considered.
#[derive(Clone, Debug, Default, Serialize)]
pub struct FetchDiagnostics {
    pub attempts: Vec<SourceAttempt>,
}

impl FetchDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_skip(&mut self, source_id: &str, reason: SkipReason) {
        self.attempts.push(SourceAttempt {
            source_id: source_id.to_string(),
            skipped: Some(reason),
            failure: None,
            success: false,
            from_cache: false,
        });
    }

    pub fn record_failure(&mut self, failure: SourceFailure) {
        self.attempts.push(SourceAttempt {
            source_id: failure.source_id.clone(),
            skipped: None,
            failure: Some(failure),
            success: false,
            from_cache: false,
        });
    }

    pub fn record_success(&mut self, source_id: &str, from_cache: bool) {
        self.attempts.push(SourceAttempt {
            source_id: source_id.to_string(),
            skipped: None,
            failure: None,
            success: true,
            from_cache,
        });
    }

    /// Summary for logging/debugging.
    pub fn summary(&self) -> String {
        self.attempts
            .iter()
            .map(|a| {
                if a.success && a.from_cache {
                    format!("{}: CACHED", a.source_id)
                } else if a.success {
                    format!("{}: SUCCESS", a.source_id)
                } else if let Some(skip) = &a.skipped {
                    format!("{}: SKIPPED ({:?})", a.source_id, skip)
                } else if let Some(failure) = &a.failure {
                    format!("{}: FAILED ({})", a.source_id, failure.reason)
                } else {
                    format!("{}: UNKNOWN", a.source_id)
                }
            })
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    pub fn has_success(&self) -> bool {
        self.attempts.iter().any(|a| a.success)
    }

    /// Sources that were actually called, in order.
    pub fn attempted_sources(&self) -> Vec<&str> {
        self.attempts
            .iter()
            .filter(|a| a.skipped.is_none())
            .map(|a| a.source_id.as_str())
            .collect()
    }

    pub fn failures(&self) -> Vec<SourceFailure> {
        self.attempts
            .iter()
            .filter_map(|a| a.failure.clone())
            .collect()
    }

    pub fn skip_reasons(&self) -> Vec<(&str, &SkipReason)> {
        self.attempts
            .iter()
            .filter_map(|a| a.skipped.as_ref().map(|s| (a.source_id.as_str(), s)))
            .collect()
    }
}
