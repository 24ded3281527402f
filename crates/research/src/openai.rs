//! General research agent backed by an OpenAI-compatible chat endpoint.
//!
//! Works with OpenAI, OpenRouter, Groq, Ollama, vLLM and anything else that
//! speaks `/chat/completions`. The reply becomes the research summary; the
//! reported token usage is booked on the trace.

use crate::agent::ResearchAgent;
use async_trait::async_trait;
use delve_config::AgentConfig;
use delve_core::{CollaboratorError, DEFAULT_TOOL, ResearchResult};
use delve_telemetry::Trace;
use serde::Deserialize;
use tracing::{debug, warn};

pub struct OpenAiCompatAgent {
    name: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    system_prompt: String,
    prompt_id: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatAgent {
    /// Build the default "General Agent" from `[agent]` settings.
    pub fn from_config(config: &AgentConfig) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CollaboratorError::Execution {
                tool_name: DEFAULT_TOOL.into(),
                reason: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            name: DEFAULT_TOOL.into(),
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            system_prompt: config.system_prompt.clone(),
            prompt_id: config.prompt_id.clone(),
            client,
        })
    }

    /// Register under a different tool name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn failure(&self, reason: impl Into<String>) -> CollaboratorError {
        CollaboratorError::Execution {
            tool_name: self.name.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ResearchAgent for OpenAiCompatAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn research(
        &self,
        query: &str,
        trace: &mut Trace,
    ) -> Result<ResearchResult, CollaboratorError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": self.system_prompt},
                {"role": "user", "content": query},
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": false,
        });

        debug!(model = %self.model, trace_id = %trace.trace_id(), "Sending research request");

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.failure(format!("network error: {e}")))?;

        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return Err(self.failure("invalid API key or insufficient permissions"));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Research endpoint returned error");
            return Err(self.failure(format!("HTTP {status}: {error_body}")));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| self.failure(format!("failed to parse response: {e}")))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| self.failure("no choices in response"))?;

        let model = api_response.model.unwrap_or_else(|| self.model.clone());
        if let Some(usage) = api_response.usage {
            trace
                .record_usage(
                    i64::from(usage.prompt_tokens),
                    i64::from(usage.completion_tokens),
                    model.as_str(),
                    self.prompt_id.clone(),
                )
                .map_err(|e| self.failure(e.to_string()))?;
        }

        trace.data.insert("tool".into(), self.name.clone().into());
        trace.data.insert("model".into(), model.into());
        if let Some(reason) = choice.finish_reason {
            trace.data.insert("finish_reason".into(), reason.into());
        }

        Ok(ResearchResult {
            summary: choice.message.content.unwrap_or_default(),
            content: Vec::new(),
        })
    }
}

// ── Wire types ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
