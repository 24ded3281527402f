//! Cost-rate table for LLM models.
//!
//! Prices are in USD per 1,000 tokens, split into a prompt and a completion
//! rate. Lookups are exact: a model id that is not in the table costs
//! nothing. Overrides can be added at runtime from the TOML config.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Per-1000-token pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelRate {
    /// Price per 1K prompt tokens in USD.
    pub prompt_per_1k: f64,
    /// Price per 1K completion tokens in USD.
    pub completion_per_1k: f64,
}

impl ModelRate {
    /// Create a new rate entry.
    pub fn new(prompt_per_1k: f64, completion_per_1k: f64) -> Self {
        Self {
            prompt_per_1k,
            completion_per_1k,
        }
    }

    /// Compute cost for the given token counts.
    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 / 1000.0) * self.prompt_per_1k
            + (completion_tokens as f64 / 1000.0) * self.completion_per_1k
    }
}

/// Thread-safe cost-rate table with built-in defaults and custom overrides.
pub struct PricingTable {
    rates: RwLock<HashMap<String, ModelRate>>,
}

impl PricingTable {
    /// Create a table with the built-in model rates.
    pub fn with_defaults() -> Self {
        let mut rates = HashMap::new();

        // ── OpenAI ─────────────────────────────────────────────────
        rates.insert("gpt-3.5-turbo".into(), ModelRate::new(0.0015, 0.002));
        rates.insert("gpt-4".into(), ModelRate::new(0.03, 0.06));
        rates.insert("gpt-4-turbo".into(), ModelRate::new(0.01, 0.03));

        // ── Anthropic ──────────────────────────────────────────────
        rates.insert("claude-3-opus".into(), ModelRate::new(0.015, 0.075));
        rates.insert("claude-3-sonnet".into(), ModelRate::new(0.003, 0.015));

        // ── Meta (via Groq) ────────────────────────────────────────
        rates.insert("llama3-70b-8192".into(), ModelRate::new(0.0007, 0.0007));

        Self {
            rates: RwLock::new(rates),
        }
    }

    /// Create an empty table.
    pub fn empty() -> Self {
        Self {
            rates: RwLock::new(HashMap::new()),
        }
    }

    /// Look up the rate for a model. Returns None if not found.
    pub fn get(&self, model: &str) -> Option<ModelRate> {
        let rates = self.rates.read().unwrap_or_else(PoisonError::into_inner);
        rates.get(model).copied()
    }

    /// Add or replace the rate for a model.
    pub fn set(&self, model: impl Into<String>, rate: ModelRate) {
        let mut rates = self.rates.write().unwrap_or_else(PoisonError::into_inner);
        rates.insert(model.into(), rate);
    }

    /// Compute cost for a model call, returning 0.0 if the model is unknown.
    pub fn compute_cost(&self, model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        self.get(model)
            .map(|rate| rate.cost(prompt_tokens, completion_tokens))
            .unwrap_or(0.0)
    }

    /// List all known model names, sorted.
    pub fn models(&self) -> Vec<String> {
        let rates = self.rates.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = rates.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of models in the table.
    pub fn len(&self) -> usize {
        self.rates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for PricingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PricingTable")
            .field("models", &self.models())
            .finish()
    }
}
