//! Report rendering subprocess.
//!
//! Runs `Rscript -e "rmarkdown::render(...)"` against the configured
//! template, passing the species as a report parameter. Success means a
//! zero exit code and an HTML file at the expected output path.

use delve_config::ReportConfig;
use delve_core::CollaboratorError;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

/// Renders one HTML report per species.
#[derive(Debug, Clone)]
pub struct ReportRenderer {
    command: String,
    script_path: PathBuf,
    output_dir: PathBuf,
}

impl ReportRenderer {
    pub fn new(
        command: impl Into<String>,
        script_path: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            command: command.into(),
            script_path: script_path.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn from_config(config: &ReportConfig, output_dir: impl Into<PathBuf>) -> Self {
        Self::new(&config.command, &config.script_path, output_dir)
    }

    /// Where the report for `species` lands.
    pub fn output_path(&self, species: &str) -> PathBuf {
        self.output_dir.join(format!("{species}.html"))
    }

    /// Render the report for `species`, returning the HTML file path.
    pub async fn render(&self, species: &str) -> Result<PathBuf, CollaboratorError> {
        validate_identifier(species)?;

        if !self.script_path.is_file() {
            return Err(CollaboratorError::ScriptMissing(self.script_path.clone()));
        }

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let output = self.output_path(species);
        let expr = render_expression(&self.script_path, species, &output);

        debug!(
            command = %self.command,
            species = %species,
            output = %output.display(),
            "Rendering report"
        );

        let result = Command::new(&self.command)
            .arg("-e")
            .arg(&expr)
            .output()
            .await?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
            warn!(
                species = %species,
                exit_code = ?result.status.code(),
                stderr = %stderr,
                "Report renderer failed"
            );
            return Err(CollaboratorError::RenderFailed {
                exit_code: result.status.code(),
                stderr,
            });
        }

        if !output.is_file() {
            return Err(CollaboratorError::OutputMissing(output));
        }

        Ok(output)
    }
}

/// Species identifiers end up in a file name and an R string literal.
fn validate_identifier(species: &str) -> Result<(), CollaboratorError> {
    let valid = !species.trim().is_empty()
        && !species.starts_with('.')
        && species
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | ' '));
    if valid {
        Ok(())
    } else {
        Err(CollaboratorError::InvalidIdentifier(species.to_string()))
    }
}

fn render_expression(script: &Path, species: &str, output: &Path) -> String {
    format!(
        "rmarkdown::render({}, params = list(species = {}), output_file = {})",
        r_string(&script.to_string_lossy()),
        r_string(species),
        r_string(&output.to_string_lossy()),
    )
}

/// Single-quoted R string literal.
fn r_string(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}
