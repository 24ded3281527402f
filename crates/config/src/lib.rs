//! Configuration loading, validation, and management for Delve.
//!
//! Loads configuration from `~/.delve/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.delve/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root for research output, rendered reports and the trace log
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Research agent settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// HTTP API settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// History (trace log) settings
    #[serde(default)]
    pub history: HistoryConfig,

    /// Report rendering settings
    #[serde(default)]
    pub report: ReportConfig,

    /// Durable storage for rendered reports
    #[serde(default)]
    pub storage: StorageConfig,

    /// Usage accounting settings
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_data_dir() -> PathBuf {
    AppConfig::config_dir().join("data")
}
fn default_true() -> bool {
    true
}

/// Settings for the built-in OpenAI-compatible research agent.
#[derive(Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// API key; falls back to `DELVE_API_KEY` / `OPENAI_API_KEY`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Research style; recorded as the prompt id of every call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,

    /// System prompt sent ahead of the query
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default = "default_agent_timeout")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4".into()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_system_prompt() -> String {
    "You are a careful research assistant. Answer with a concise, well-sourced summary.".into()
}
fn default_agent_timeout() -> u64 {
    120
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            prompt_id: None,
            system_prompt: default_system_prompt(),
            timeout_secs: default_agent_timeout(),
        }
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("prompt_id", &self.prompt_id)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Trace log file name, relative to `data_dir` unless absolute
    #[serde(default = "default_traces_file")]
    pub traces_file: PathBuf,
}

fn default_traces_file() -> PathBuf {
    PathBuf::from("research_traces.jsonl")
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            traces_file: default_traces_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Whether research requests trigger report rendering
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Renderer executable
    #[serde(default = "default_render_command")]
    pub command: String,

    /// R Markdown template passed to the renderer
    #[serde(default = "default_script_path")]
    pub script_path: PathBuf,
}

fn default_render_command() -> String {
    "Rscript".into()
}
fn default_script_path() -> PathBuf {
    PathBuf::from("/app/report.Rmd")
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: default_render_command(),
            script_path: default_script_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "none", "local" or "http"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Bucket name; falls back to `AWS_BUCKET`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    /// Upload endpoint for the "http" backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Base of the returned public URL (defaults to the S3 virtual-host URL)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_base_url: Option<String>,

    /// Target directory for the "local" backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_dir: Option<PathBuf>,

    /// Key prefix for uploaded reports
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_storage_backend() -> String {
    "none".into()
}
fn default_key_prefix() -> String {
    "reports".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            bucket: None,
            endpoint: None,
            public_base_url: None,
            local_dir: None,
            key_prefix: default_key_prefix(),
        }
    }
}

/// Usage accounting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Seconds booked per model call
    #[serde(default = "default_processing_secs")]
    pub nominal_processing_secs: f64,

    /// Custom per-1K-token rates (model name → rates)
    #[serde(default)]
    pub custom_pricing: HashMap<String, RateOverrideConfig>,
}

fn default_processing_secs() -> f64 {
    0.5
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            nominal_processing_secs: default_processing_secs(),
            custom_pricing: HashMap::new(),
        }
    }
}

/// Custom per-1000-token rates for a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateOverrideConfig {
    /// Price per 1K prompt tokens in USD
    pub prompt_per_1k: f64,
    /// Price per 1K completion tokens in USD
    pub completion_per_1k: f64,
}

impl AppConfig {
    /// Load configuration from the default path (~/.delve/config.toml).
    ///
    /// Environment overrides:
    /// - `DELVE_DATA_DIR`
    /// - `DELVE_API_KEY`, then `OPENAI_API_KEY`
    /// - `DELVE_MODEL`
    /// - `AWS_BUCKET`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("DELVE_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }

        if self.agent.api_key.is_none() {
            self.agent.api_key = lookup("DELVE_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }

        if let Some(model) = lookup("DELVE_MODEL") {
            self.agent.model = model;
        }

        if self.storage.bucket.is_none() {
            self.storage.bucket = lookup("AWS_BUCKET");
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".delve")
    }

    /// Directory holding archived research output.
    pub fn research_dir(&self) -> PathBuf {
        self.data_dir.join("research")
    }

    /// Directory rendered reports are written to.
    pub fn reports_dir(&self) -> PathBuf {
        self.data_dir.join("reports")
    }

    /// Path of the JSON Lines trace log.
    pub fn traces_path(&self) -> PathBuf {
        self.data_dir.join(&self.history.traces_file)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.temperature < 0.0 || self.agent.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "agent.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        let secs = self.telemetry.nominal_processing_secs;
        if !secs.is_finite() || secs < 0.0 {
            return Err(ConfigError::ValidationError(
                "telemetry.nominal_processing_secs must be a non-negative number".into(),
            ));
        }

        for (model, rate) in &self.telemetry.custom_pricing {
            let valid = |r: f64| r.is_finite() && r >= 0.0;
            if !valid(rate.prompt_per_1k) || !valid(rate.completion_per_1k) {
                return Err(ConfigError::ValidationError(format!(
                    "telemetry.custom_pricing.{model}: rates must be finite and >= 0"
                )));
            }
        }

        match self.storage.backend.as_str() {
            "none" | "local" | "http" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "storage.backend must be \"none\", \"local\" or \"http\", got {other:?}"
                )));
            }
        }

        Ok(())
    }

    /// Check if an agent API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.agent.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            agent: AgentConfig::default(),
            gateway: GatewayConfig::default(),
            history: HistoryConfig::default(),
            report: ReportConfig::default(),
            storage: StorageConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gateway.port, 8000);
        assert_eq!(config.agent.model, "gpt-4");
        assert_eq!(config.storage.backend, "none");
        assert!((config.telemetry.nominal_processing_secs - 0.5).abs() < 1e-12);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.gateway.port, config.gateway.port);
        assert_eq!(parsed.data_dir, config.data_dir);
        assert_eq!(parsed.report.command, "Rscript");
    }

    #[test]
    fn derived_paths() {
        let config = AppConfig {
            data_dir: PathBuf::from("/data"),
            ..AppConfig::default()
        };
        assert_eq!(config.research_dir(), PathBuf::from("/data/research"));
        assert_eq!(config.reports_dir(), PathBuf::from("/data/reports"));
        assert_eq!(
            config.traces_path(),
            PathBuf::from("/data/research_traces.jsonl")
        );
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.agent.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn negative_custom_rate_rejected() {
        let mut config = AppConfig::default();
        config.telemetry.custom_pricing.insert(
            "house-model".into(),
            RateOverrideConfig {
                prompt_per_1k: -0.1,
                completion_per_1k: 0.1,
            },
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("house-model"));
    }

    #[test]
    fn non_finite_custom_rate_rejected() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(
            tmp,
            r#"
[telemetry.custom_pricing.house-model]
prompt_per_1k = inf
completion_per_1k = nan
"#
        )
        .unwrap();
        let err = AppConfig::load_from(tmp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(err.to_string().contains("house-model"));
    }

    #[test]
    fn unknown_storage_backend_rejected() {
        let mut config = AppConfig::default();
        config.storage.backend = "ftp".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.gateway.port, 8000);
    }

    #[test]
    fn parses_file_with_overrides() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(
            tmp,
            r#"
data_dir = "/srv/delve"

[agent]
model = "claude-3-sonnet"
prompt_id = "academic"

[storage]
backend = "http"
bucket = "field-reports"
endpoint = "https://storage.example.com"

[telemetry]
nominal_processing_secs = 1.0

[telemetry.custom_pricing.house-model]
prompt_per_1k = 0.001
completion_per_1k = 0.002
"#
        )
        .unwrap();

        let config = AppConfig::load_from(tmp.path()).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/delve"));
        assert_eq!(config.agent.model, "claude-3-sonnet");
        assert_eq!(config.agent.prompt_id.as_deref(), Some("academic"));
        assert_eq!(config.storage.bucket.as_deref(), Some("field-reports"));
        assert_eq!(config.telemetry.custom_pricing.len(), 1);
        assert!(config.report.enabled);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, "data_dir = [not toml").unwrap();
        let err = AppConfig::load_from(tmp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides() {
        let mut config = AppConfig::default();
        let env: HashMap<&str, &str> = [
            ("DELVE_DATA_DIR", "/tmp/delve-data"),
            ("OPENAI_API_KEY", "sk-test"),
            ("DELVE_MODEL", "gpt-4-turbo"),
            ("AWS_BUCKET", "reports-bucket"),
        ]
        .into_iter()
        .collect();

        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.data_dir, PathBuf::from("/tmp/delve-data"));
        assert_eq!(config.agent.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.agent.model, "gpt-4-turbo");
        assert_eq!(config.storage.bucket.as_deref(), Some("reports-bucket"));
        assert!(config.has_api_key());
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut config = AppConfig::default();
        config.agent.api_key = Some("sk-very-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("Rscript"));
        assert!(toml_str.contains("8000"));
    }
}
