//! # Delve Core
//!
//! Domain types and collaborator error definitions shared across the Delve
//! research pipeline. This crate has no framework dependencies; the agent,
//! reporting and HTTP crates depend inward on it.

pub mod error;
pub mod research;

// Re-export key types at crate root for ergonomics
pub use error::{CollaboratorError, StorageError};
pub use research::{ContentItem, DEFAULT_TOOL, ResearchOutput, ResearchRequest, ResearchResult};
