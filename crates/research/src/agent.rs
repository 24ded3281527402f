//! Research agent trait and tool registry.

use async_trait::async_trait;
use delve_core::{CollaboratorError, ResearchResult};
use delve_telemetry::{NOMINAL_PROCESSING_SECS, PricingTable, Trace, UsageLedger};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A research tool that answers a query.
///
/// Implementations book every model call they make on `trace` and may put
/// extra result data into `trace.data`.
#[async_trait]
pub trait ResearchAgent: Send + Sync {
    /// The tool name requests select this agent by (e.g. "General Agent").
    fn name(&self) -> &str;

    async fn research(
        &self,
        query: &str,
        trace: &mut Trace,
    ) -> Result<ResearchResult, CollaboratorError>;
}

/// Registered research tools plus the pricing new traces are booked with.
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn ResearchAgent>>,
    pricing: Arc<PricingTable>,
    processing_time: f64,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::with_pricing(Arc::new(PricingTable::with_defaults()))
    }

    pub fn with_pricing(pricing: Arc<PricingTable>) -> Self {
        Self {
            agents: HashMap::new(),
            pricing,
            processing_time: NOMINAL_PROCESSING_SECS,
        }
    }

    /// Seconds booked per model call on traces from this registry.
    pub fn with_processing_time(mut self, seconds: f64) -> Self {
        self.processing_time = seconds;
        self
    }

    /// Register an agent. Replaces any existing agent with the same name.
    pub fn register(&mut self, agent: Arc<dyn ResearchAgent>) {
        let name = agent.name().to_string();
        self.agents.insert(name, agent);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ResearchAgent>> {
        self.agents.get(name).cloned()
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.agents.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn pricing(&self) -> &Arc<PricingTable> {
        &self.pricing
    }

    /// A fresh trace with its own ledger.
    pub fn new_trace(&self, query: impl Into<String>) -> Trace {
        let ledger = UsageLedger::with_pricing(self.pricing.clone())
            .with_processing_time(self.processing_time);
        Trace::with_ledger(query, Arc::new(ledger))
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `query` through the tool named `tool_name`.
///
/// Returns the result together with the trace that recorded its usage.
/// Any agent failure is reported as [`CollaboratorError::Execution`].
pub async fn run_tool(
    registry: &AgentRegistry,
    tool_name: &str,
    query: &str,
) -> Result<(ResearchResult, Trace), CollaboratorError> {
    let agent = registry
        .get(tool_name)
        .ok_or_else(|| CollaboratorError::UnknownTool(tool_name.to_string()))?;

    let mut trace = registry.new_trace(query);
    debug!(tool = %tool_name, trace_id = %trace.trace_id(), "Running research tool");

    match agent.research(query, &mut trace).await {
        Ok(result) => Ok((result, trace)),
        Err(e) => {
            warn!(tool = %tool_name, trace_id = %trace.trace_id(), error = %e, "Research tool failed");
            Err(match e {
                err @ CollaboratorError::Execution { .. } => err,
                other => CollaboratorError::Execution {
                    tool_name: tool_name.to_string(),
                    reason: other.to_string(),
                },
            })
        }
    }
}
