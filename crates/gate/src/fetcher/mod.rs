//! Multi-source fetching with fallback.

mod diagnostics;
mod multi_source;
mod source_calls;

pub use diagnostics::{FetchDiagnostics, SkipReason, SourceAttempt};
pub use multi_source::MultiSourceFetcher;
pub use source_calls::SourceCalls;
