//! # Delve Research
//!
//! Research agents and the request pipeline that ties them to the trace
//! log, the output archive and report generation.

pub mod agent;
pub mod archive;
pub mod openai;
pub mod pipeline;

pub use agent::{AgentRegistry, ResearchAgent, run_tool};
pub use archive::ResearchArchive;
pub use openai::OpenAiCompatAgent;
pub use pipeline::{ResearchPipeline, ResearchResponse, ResearchRun, pricing_from_config};

use delve_core::{CollaboratorError, StorageError};
use delve_history::HistoryError;

/// Errors from handling a research request.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("query must not be empty")]
    EmptyQuery,

    #[error("{0} returned no result")]
    NoResult(String),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to record trace: {0}")]
    History(#[from] HistoryError),

    #[error("failed to archive research output: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize research output: {0}")]
    SerdeError(#[from] serde_json::Error),
}
