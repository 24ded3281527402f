//! Background report jobs: render, then publish.

use crate::renderer::ReportRenderer;
use crate::store::{ObjectStore, object_key};
use chrono::Utc;
use delve_core::{CollaboratorError, StorageError};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error(transparent)]
    Render(#[from] CollaboratorError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// What a finished report job produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportOutcome {
    pub species: String,
    pub local_path: PathBuf,
    /// Object key and public URL, when a store is configured.
    pub key: Option<String>,
    pub url: Option<String>,
}

pub struct ReportPipeline {
    renderer: ReportRenderer,
    store: Option<Arc<dyn ObjectStore>>,
    key_prefix: String,
}

impl ReportPipeline {
    pub fn new(renderer: ReportRenderer) -> Self {
        Self {
            renderer,
            store: None,
            key_prefix: "reports".into(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Render the report for `species` and upload it if a store is set.
    pub async fn generate(&self, species: &str) -> Result<ReportOutcome, ReportError> {
        let local_path = self.renderer.render(species).await?;

        let (key, url) = match &self.store {
            Some(store) => {
                let key = object_key(&self.key_prefix, species, Utc::now());
                let url = store.upload(&local_path, &key).await?;
                (Some(key), Some(url))
            }
            None => (None, None),
        };

        info!(
            species = %species,
            path = %local_path.display(),
            url = url.as_deref().unwrap_or("-"),
            "Report generated"
        );

        Ok(ReportOutcome {
            species: species.to_string(),
            local_path,
            key,
            url,
        })
    }

    /// Run [`generate`](Self::generate) in the background.
    ///
    /// Failures are logged and the job resolves to `None`.
    pub fn spawn(self: &Arc<Self>, species: impl Into<String>) -> JoinHandle<Option<ReportOutcome>> {
        let pipeline = Arc::clone(self);
        let species = species.into();
        tokio::spawn(async move {
            match pipeline.generate(&species).await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    error!(species = %species, error = %e, "Report generation failed");
                    None
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::TempDir;

    struct FailingStore;

    #[async_trait]
    impl ObjectStore for FailingStore {
        fn name(&self) -> &str {
            "failing"
        }

        async fn upload(&self, _local_path: &Path, key: &str) -> Result<String, StorageError> {
            Err(StorageError::UploadFailed {
                key: key.to_string(),
                reason: "503 Slow Down".into(),
            })
        }
    }

    #[tokio::test]
    async fn spawn_swallows_render_failure() {
        let dir = TempDir::new().unwrap();
        let renderer = ReportRenderer::new("Rscript", dir.path().join("missing.Rmd"), dir.path());
        let pipeline = Arc::new(ReportPipeline::new(renderer));

        assert!(matches!(
            pipeline.generate("koala").await,
            Err(ReportError::Render(CollaboratorError::ScriptMissing(_)))
        ));
        assert_eq!(pipeline.spawn("koala").await.unwrap(), None);
    }

    #[cfg(unix)]
    fn writing_renderer(dir: &TempDir) -> ReportRenderer {
        use std::os::unix::fs::PermissionsExt;

        let bin = dir.path().join("fake-rscript");
        std::fs::write(
            &bin,
            "#!/bin/sh\nout=$(printf '%s' \"$2\" | sed -n \"s/.*output_file = '\\([^']*\\)'.*/\\1/p\")\necho '<html></html>' > \"$out\"\n",
        )
        .unwrap();
        let mut perms = std::fs::metadata(&bin).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&bin, perms).unwrap();

        let script = dir.path().join("report.Rmd");
        std::fs::write(&script, "---\ntitle: test\n---\n").unwrap();
        ReportRenderer::new(bin.to_string_lossy(), script, dir.path().join("reports"))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn render_and_store_locally() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(crate::LocalObjectStore::new(dir.path().join("bucket")));
        let pipeline = Arc::new(ReportPipeline::new(writing_renderer(&dir)).with_store(store));

        let outcome = pipeline.spawn("koala").await.unwrap().unwrap();
        assert_eq!(outcome.species, "koala");
        assert!(outcome.local_path.is_file());
        let key = outcome.key.unwrap();
        assert!(key.starts_with("reports/koala_"));
        assert!(dir.path().join("bucket").join(&key).is_file());
        assert!(outcome.url.unwrap().starts_with("file://"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn upload_failure_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let pipeline = Arc::new(
            ReportPipeline::new(writing_renderer(&dir)).with_store(Arc::new(FailingStore)),
        );
        assert!(matches!(
            pipeline.generate("koala").await,
            Err(ReportError::Storage(StorageError::UploadFailed { .. }))
        ));
        assert_eq!(pipeline.spawn("koala").await.unwrap(), None);
    }
}
