//! Call statistics and recent-error history.

mod recorder;

pub use recorder::{ErrorRecord, SourceStats, StatEvent, StatsRecorder};
