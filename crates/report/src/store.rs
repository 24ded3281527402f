//! Durable storage for rendered reports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use delve_config::StorageConfig;
use delve_core::StorageError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Where rendered reports are published.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Backend name, for logs.
    fn name(&self) -> &str;

    /// Upload `local_path` under `key` and return its public URL.
    async fn upload(&self, local_path: &Path, key: &str) -> Result<String, StorageError>;
}

/// Object key for a species report: `<prefix>/<species>_<YYYYmmdd_HHMMSS>.html`.
pub fn object_key(prefix: &str, species: &str, at: DateTime<Utc>) -> String {
    let name = format!("{species}_{}.html", at.format("%Y%m%d_%H%M%S"));
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name
    } else {
        format!("{prefix}/{name}")
    }
}

/// Build the store selected by `[storage]`, or `None` when uploads are off.
pub fn store_from_config(
    config: &StorageConfig,
) -> Result<Option<Arc<dyn ObjectStore>>, StorageError> {
    match config.backend.as_str() {
        "none" => Ok(None),
        "local" => {
            let dir = config.local_dir.clone().ok_or_else(|| {
                StorageError::NotConfigured("storage.local_dir is required for the local backend".into())
            })?;
            Ok(Some(Arc::new(LocalObjectStore::new(dir))))
        }
        "http" => {
            let bucket = config.bucket.clone().ok_or_else(|| {
                StorageError::NotConfigured(
                    "storage.bucket (or AWS_BUCKET) is required for the http backend".into(),
                )
            })?;
            let endpoint = config
                .endpoint
                .clone()
                .unwrap_or_else(|| "https://s3.amazonaws.com".into());
            let mut store = HttpObjectStore::new(endpoint, bucket)?;
            if let Some(base) = &config.public_base_url {
                store = store.with_public_base_url(base.clone());
            }
            Ok(Some(Arc::new(store)))
        }
        other => Err(StorageError::NotConfigured(format!(
            "unknown storage backend {other:?}"
        ))),
    }
}

// ── HTTP (S3-style PUT) ───────────────────────────────────────────────────

/// Uploads with a plain `PUT {endpoint}/{bucket}/{key}`.
pub struct HttpObjectStore {
    endpoint: String,
    bucket: String,
    public_base_url: String,
    client: reqwest::Client,
}

impl HttpObjectStore {
    pub fn new(endpoint: impl Into<String>, bucket: impl Into<String>) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| StorageError::NotConfigured(format!("HTTP client: {e}")))?;
        let bucket = bucket.into();
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            public_base_url: format!("https://{bucket}.s3.amazonaws.com"),
            bucket,
            client,
        })
    }

    /// Override the base of returned URLs.
    pub fn with_public_base_url(mut self, base: impl Into<String>) -> Self {
        self.public_base_url = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{key}", self.public_base_url)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    fn name(&self) -> &str {
        "http"
    }

    async fn upload(&self, local_path: &Path, key: &str) -> Result<String, StorageError> {
        let body = tokio::fs::read(local_path).await?;
        let url = format!("{}/{}/{key}", self.endpoint, self.bucket);

        debug!(url = %url, bytes = body.len(), "Uploading report");

        let response = self
            .client
            .put(&url)
            .header("Content-Type", "text/html")
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::UploadFailed {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(StorageError::UploadFailed {
                key: key.to_string(),
                reason: format!("{status}: {error_body}"),
            });
        }

        let public = self.public_url(key);
        info!(key = %key, url = %public, "Report uploaded");
        Ok(public)
    }
}

// ── Local directory ───────────────────────────────────────────────────────

/// Copies reports into a directory and returns `file://` URLs.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn upload(&self, local_path: &Path, key: &str) -> Result<String, StorageError> {
        if key.split('/').any(|part| part == "..") {
            return Err(StorageError::UploadFailed {
                key: key.to_string(),
                reason: "key escapes the storage root".into(),
            });
        }

        let target = self.root.join(key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local_path, &target).await?;

        let absolute = std::path::absolute(&target)?;
        debug!(key = %key, path = %absolute.display(), "Report stored locally");
        Ok(format!("file://{}", absolute.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn key_layout() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            object_key("reports", "koala", at),
            "reports/koala_20240309_140507.html"
        );
        assert_eq!(object_key("/reports/", "koala", at), "reports/koala_20240309_140507.html");
        assert_eq!(object_key("", "koala", at), "koala_20240309_140507.html");
    }

    #[test]
    fn public_url_defaults_to_bucket_host() {
        let store = HttpObjectStore::new("https://s3.amazonaws.com", "field-reports").unwrap();
        assert_eq!(
            store.public_url("reports/koala.html"),
            "https://field-reports.s3.amazonaws.com/reports/koala.html"
        );
        let store = store.with_public_base_url("https://cdn.example.com/");
        assert_eq!(
            store.public_url("reports/koala.html"),
            "https://cdn.example.com/reports/koala.html"
        );
    }

    #[test]
    fn config_selection() {
        let mut config = StorageConfig::default();
        assert!(store_from_config(&config).unwrap().is_none());

        config.backend = "http".into();
        assert!(matches!(
            store_from_config(&config),
            Err(StorageError::NotConfigured(_))
        ));
        config.bucket = Some("b".into());
        assert_eq!(store_from_config(&config).unwrap().unwrap().name(), "http");

        config.backend = "local".into();
        assert!(store_from_config(&config).is_err());
        config.local_dir = Some(PathBuf::from("/tmp/delve-reports"));
        assert_eq!(store_from_config(&config).unwrap().unwrap().name(), "local");
    }

    #[tokio::test]
    async fn local_upload_copies_file() {
        let src_dir = TempDir::new().unwrap();
        let dst_dir = TempDir::new().unwrap();
        let src = src_dir.path().join("koala.html");
        std::fs::write(&src, "<html>koala</html>").unwrap();

        let store = LocalObjectStore::new(dst_dir.path());
        let url = store
            .upload(&src, "reports/koala_20240309_140507.html")
            .await
            .unwrap();

        let copied = dst_dir.path().join("reports/koala_20240309_140507.html");
        assert_eq!(std::fs::read_to_string(&copied).unwrap(), "<html>koala</html>");
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("reports/koala_20240309_140507.html"));
    }

    #[tokio::test]
    async fn local_upload_rejects_escaping_keys() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.html");
        std::fs::write(&src, "x").unwrap();
        let store = LocalObjectStore::new(dir.path().join("store"));
        let err = store.upload(&src, "../outside.html").await.unwrap_err();
        assert!(matches!(err, StorageError::UploadFailed { .. }));
    }

    #[tokio::test]
    async fn local_upload_missing_source_is_io_error() {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let err = store
            .upload(&dir.path().join("missing.html"), "reports/x.html")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
    }
}
