//! Run-level errors for the refresher.
//!
//! Per-indicator failures never surface here; they are recorded in the cache
//! and counted in the run report.

/// Errors that stop a refresh run before or between phases.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    /// A line of the indicator source could not be parsed.
    #[error("INVALID_SOURCE: line {line}: {reason}")]
    InvalidSource { line: usize, reason: String },

    /// The indicator source could not be read.
    #[error("SOURCE_IO: {0}")]
    Io(#[from] std::io::Error),

    /// Listing candidates from the cache failed.
    #[error(transparent)]
    Cache(#[from] intelcache_core::Error),
}
