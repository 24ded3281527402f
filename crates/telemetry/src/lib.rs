//! Token usage accounting for Delve research queries.
//!
//! Every model call made while answering a query is booked into a
//! [`UsageLedger`] as an immutable [`UsageEntry`], priced against a
//! per-1000-token [`PricingTable`]. Each [`Trace`] owns the ledger for its
//! query and serializes into the persisted [`PersistedTrace`] log record.

pub mod ledger;
pub mod model;
pub mod pricing;
pub mod trace;

pub use ledger::{NOMINAL_PROCESSING_SECS, UsageLedger, most_used_model, summarize_entries};
pub use model::{
    ModelUsage, NO_MODEL, ProcessingStats, PromptUsage, TokenCounts, TotalUsage, UsageEntry,
    UsageStats,
};
pub use pricing::{ModelRate, PricingTable};
pub use trace::{PersistedTrace, Trace};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid usage: {0}")]
    InvalidUsage(String),

    #[error("trace {0} was restored from history and is read-only")]
    ReadOnlyTrace(String),

    #[error("inconsistent trace record: {0}")]
    InconsistentRecord(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
