//! # Delve History
//!
//! The append-only trace log. Every finished research query is appended as
//! one JSON Lines record; the loader rebuilds read-only [`Trace`]s from it
//! for the dashboard and usage reports.
//!
//! [`Trace`]: delve_telemetry::Trace

pub mod log;
pub mod summary;

pub use log::{LoadReport, TraceLog};
pub use summary::{HistorySummary, summarize};

/// Errors from reading or writing the trace log.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("trace log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize trace: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error(transparent)]
    Telemetry(#[from] delve_telemetry::TelemetryError),
}

/// A log line that could not be turned back into a trace.
///
/// Never fatal: the loader skips the line and keeps going.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {reason}")]
pub struct ReconstructionError {
    /// 1-based line number in the log file.
    pub line: usize,
    pub reason: String,
}
