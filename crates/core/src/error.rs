//! Error types for Delve's external collaborators.
//!
//! Uses `thiserror` for ergonomic error definitions. Usage accounting and
//! history loading have their own error types in their crates; these cover
//! the I/O wrappers around the research agent, the rendering subprocess and
//! object storage.

use std::path::PathBuf;
use thiserror::Error;

/// Failure of a research agent or the report renderer.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Unknown research tool: {0}")]
    UnknownTool(String),

    #[error("Research execution failed: {tool_name}: {reason}")]
    Execution { tool_name: String, reason: String },

    #[error("Report script not found at {}", .0.display())]
    ScriptMissing(PathBuf),

    #[error("Invalid report identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Report rendering failed (exit code {exit_code:?}): {stderr}")]
    RenderFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Renderer exited cleanly but produced no file at {}", .0.display())]
    OutputMissing(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to publish an artifact to durable storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage not configured: {0}")]
    NotConfigured(String),

    #[error("Upload of {key} failed: {reason}")]
    UploadFailed { key: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collaborator_error_displays_correctly() {
        let err = CollaboratorError::Execution {
            tool_name: "General Agent".into(),
            reason: "upstream returned 502".into(),
        };
        assert!(err.to_string().contains("General Agent"));
        assert!(err.to_string().contains("502"));

        let err = CollaboratorError::RenderFailed {
            exit_code: Some(1),
            stderr: "object 'species' not found".into(),
        };
        assert!(err.to_string().contains("Some(1)"));
        assert!(err.to_string().contains("species"));
    }

    #[test]
    fn storage_error_displays_correctly() {
        let err = StorageError::UploadFailed {
            key: "reports/koala.html".into(),
            reason: "403 Forbidden".into(),
        };
        assert!(err.to_string().contains("reports/koala.html"));
        assert!(err.to_string().contains("403"));
    }
}
