//! Research domain types shared by the agent, archive and HTTP layers.

use serde::{Deserialize, Serialize};

/// Tool name used when a request does not pick one.
pub const DEFAULT_TOOL: &str = "General Agent";

/// One retrieved source in a research result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub content: String,
    #[serde(default)]
    pub source: String,
}

/// What a research agent returns for a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchResult {
    /// Condensed answer.
    pub summary: String,
    /// Retrieved sources, in the agent's ranking order.
    #[serde(default)]
    pub content: Vec<ContentItem>,
}

/// A request to run a research query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub query: String,

    #[serde(default = "default_tool")]
    pub tool_name: String,

    /// Report identifier. A report is rendered only when this is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub species: Option<String>,
}

fn default_tool() -> String {
    DEFAULT_TOOL.into()
}

impl ResearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            tool_name: default_tool(),
            species: None,
        }
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = tool_name.into();
        self
    }

    pub fn with_species(mut self, species: impl Into<String>) -> Self {
        self.species = Some(species.into());
        self
    }
}

/// The archived output of one research run, written to the research
/// directory for the report renderer to pick up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchOutput {
    pub trace_id: String,
    pub summary: String,
    pub content: Vec<ContentItem>,
    pub trace_data: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub species: Option<String>,
}
