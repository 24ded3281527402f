//! The research request flow.
//!
//! run the tool → append the trace to the log → archive the output →
//! schedule the report job.

use crate::PipelineError;
use crate::agent::{AgentRegistry, run_tool};
use crate::archive::ResearchArchive;
use crate::openai::OpenAiCompatAgent;
use delve_config::{AppConfig, TelemetryConfig};
use delve_core::{ResearchOutput, ResearchRequest, ResearchResult};
use delve_history::TraceLog;
use delve_report::{ReportOutcome, ReportPipeline, ReportRenderer, store_from_config};
use delve_telemetry::{ModelRate, PricingTable, UsageStats};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Body returned for a successful research request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchResponse {
    pub status: String,
    pub file_path: String,
    pub trace_id: String,
    pub token_usage: UsageStats,
    /// Whether a report job was scheduled.
    pub report_scheduled: bool,
}

/// A finished run plus its background report job, if any.
#[derive(Debug)]
pub struct ResearchRun {
    pub response: ResearchResponse,
    pub result: ResearchResult,
    pub report: Option<JoinHandle<Option<ReportOutcome>>>,
}

pub struct ResearchPipeline {
    registry: Arc<AgentRegistry>,
    log: Arc<TraceLog>,
    archive: ResearchArchive,
    reports: Option<Arc<ReportPipeline>>,
}

impl ResearchPipeline {
    pub fn new(registry: Arc<AgentRegistry>, log: Arc<TraceLog>, archive: ResearchArchive) -> Self {
        Self {
            registry,
            log,
            archive,
            reports: None,
        }
    }

    /// Wire the whole pipeline from configuration: the built-in general
    /// agent, the trace log, the archive and (if enabled) report jobs.
    pub fn from_config(config: &AppConfig) -> Result<Self, PipelineError> {
        let pricing = Arc::new(pricing_from_config(&config.telemetry));
        let mut registry = AgentRegistry::with_pricing(pricing)
            .with_processing_time(config.telemetry.nominal_processing_secs);
        registry.register(Arc::new(OpenAiCompatAgent::from_config(&config.agent)?));

        let log = Arc::new(TraceLog::new(config.traces_path()));
        let archive = ResearchArchive::new(config.research_dir());
        let mut pipeline = Self::new(Arc::new(registry), log, archive);

        if config.report.enabled {
            let renderer = ReportRenderer::from_config(&config.report, config.reports_dir());
            let mut reports =
                ReportPipeline::new(renderer).with_key_prefix(config.storage.key_prefix.clone());
            if let Some(store) = store_from_config(&config.storage)? {
                reports = reports.with_store(store);
            }
            pipeline = pipeline.with_reports(Arc::new(reports));
        }

        Ok(pipeline)
    }

    pub fn with_reports(mut self, reports: Arc<ReportPipeline>) -> Self {
        self.reports = Some(reports);
        self
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn log(&self) -> &Arc<TraceLog> {
        &self.log
    }

    /// Handle one research request end to end.
    ///
    /// The report job is spawned, never awaited; callers that want the
    /// rendered report can await `ResearchRun::report`.
    pub async fn run(&self, request: &ResearchRequest) -> Result<ResearchRun, PipelineError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(PipelineError::EmptyQuery);
        }

        let (result, trace) = run_tool(&self.registry, &request.tool_name, query).await?;
        self.log.append(&trace)?;

        if result.summary.trim().is_empty() && result.content.is_empty() {
            return Err(PipelineError::NoResult(request.tool_name.clone()));
        }

        let output = ResearchOutput {
            trace_id: trace.trace_id().to_string(),
            summary: result.summary.clone(),
            content: result.content.clone(),
            trace_data: trace.data.clone(),
            species: request.species.clone(),
        };
        let file_path = self.archive.write(&output).await?;

        let report = match (&self.reports, &request.species) {
            (Some(reports), Some(species)) => Some(reports.spawn(species.clone())),
            _ => None,
        };

        let token_usage = trace.usage_summary();
        info!(
            trace_id = %trace.trace_id(),
            tool = %request.tool_name,
            total_tokens = token_usage.tokens.total,
            cost = token_usage.cost,
            report = report.is_some(),
            "Research complete"
        );

        Ok(ResearchRun {
            response: ResearchResponse {
                status: "success".into(),
                file_path: file_path.display().to_string(),
                trace_id: trace.trace_id().to_string(),
                token_usage,
                report_scheduled: report.is_some(),
            },
            result,
            report,
        })
    }
}

/// The built-in rate table with `[telemetry.custom_pricing]` applied.
pub fn pricing_from_config(config: &TelemetryConfig) -> PricingTable {
    let pricing = PricingTable::with_defaults();
    for (model, rate) in &config.custom_pricing {
        pricing.set(
            model.clone(),
            ModelRate::new(rate.prompt_per_1k, rate.completion_per_1k),
        );
    }
    pricing
}
