//! Research output archive.
//!
//! Every successful run is written to
//! `<research_dir>/research_<YYYYmmdd_HHMMSS>_<id>.json` for the report
//! template to read.

use crate::PipelineError;
use chrono::Utc;
use delve_core::ResearchOutput;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ResearchArchive {
    dir: PathBuf,
}

impl ResearchArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one output file and return its path.
    pub async fn write(&self, output: &ResearchOutput) -> Result<PathBuf, PipelineError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let short_id: String = output
            .trace_id
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .take(8)
            .collect();
        let file_name = format!(
            "research_{}_{short_id}.json",
            Utc::now().format("%Y%m%d_%H%M%S")
        );
        let path = self.dir.join(file_name);

        let json = serde_json::to_vec_pretty(output)?;
        tokio::fs::write(&path, json).await?;

        debug!(path = %path.display(), trace_id = %output.trace_id, "Archived research output");
        Ok(path)
    }
}
