//! Data model for usage entries and aggregated usage views.

use crate::TelemetryError;
use crate::pricing::PricingTable;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Model name reported by an empty ledger.
pub const NO_MODEL: &str = "no_model";

// ── Usage entry ───────────────────────────────────────────────────────────

/// One recorded model call.
///
/// Entries are immutable once built. All derived fields (`total_tokens`,
/// `cost`, `processing_speed`) are computed at construction, and
/// deserialization re-checks that `total_tokens` matches its parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawUsageEntry")]
pub struct UsageEntry {
    timestamp: DateTime<Utc>,
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
    model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prompt_id: Option<String>,
    cost: f64,
    processing_time: f64,
    processing_speed: f64,
}

impl UsageEntry {
    /// Build an entry, pricing it against `pricing`.
    ///
    /// Fails with [`TelemetryError::InvalidUsage`] if either count is
    /// negative, their sum does not fit in a `u64`, or the rate table
    /// yields a negative or non-finite cost.
    pub fn new(
        prompt_tokens: i64,
        completion_tokens: i64,
        model: impl Into<String>,
        prompt_id: Option<String>,
        pricing: &PricingTable,
        processing_time: f64,
    ) -> Result<Self, TelemetryError> {
        let prompt_tokens = non_negative("prompt_tokens", prompt_tokens)?;
        let completion_tokens = non_negative("completion_tokens", completion_tokens)?;
        let total_tokens = prompt_tokens.checked_add(completion_tokens).ok_or_else(|| {
            TelemetryError::InvalidUsage("prompt_tokens + completion_tokens overflows".into())
        })?;
        if !processing_time.is_finite() || processing_time < 0.0 {
            return Err(TelemetryError::InvalidUsage(format!(
                "processing_time must be a finite non-negative number, got {processing_time}"
            )));
        }

        let model = model.into();
        let cost = pricing.compute_cost(&model, prompt_tokens, completion_tokens);
        if !cost.is_finite() || cost < 0.0 {
            return Err(TelemetryError::InvalidUsage(format!(
                "rate for {model} gives cost {cost}"
            )));
        }

        Ok(Self {
            timestamp: Utc::now(),
            prompt_tokens,
            completion_tokens,
            total_tokens,
            model,
            prompt_id,
            cost,
            processing_time,
            processing_speed: throughput(total_tokens, processing_time),
        })
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn prompt_tokens(&self) -> u64 {
        self.prompt_tokens
    }

    pub fn completion_tokens(&self) -> u64 {
        self.completion_tokens
    }

    /// Always `prompt_tokens + completion_tokens`.
    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn prompt_id(&self) -> Option<&str> {
        self.prompt_id.as_deref()
    }

    /// Cost in USD; zero for models missing from the rate table.
    pub fn cost(&self) -> f64 {
        self.cost
    }

    /// Nominal processing time in seconds.
    pub fn processing_time(&self) -> f64 {
        self.processing_time
    }

    /// Tokens per second over `processing_time`.
    pub fn processing_speed(&self) -> f64 {
        self.processing_speed
    }
}

fn non_negative(field: &str, value: i64) -> Result<u64, TelemetryError> {
    u64::try_from(value)
        .map_err(|_| TelemetryError::InvalidUsage(format!("{field} must be >= 0, got {value}")))
}

/// Tokens per second, 0 when no time elapsed.
pub(crate) fn throughput(tokens: u64, seconds: f64) -> f64 {
    if seconds > 0.0 {
        tokens as f64 / seconds
    } else {
        0.0
    }
}

/// Wire shape of [`UsageEntry`], validated on the way in.
#[derive(Deserialize)]
struct RawUsageEntry {
    timestamp: DateTime<Utc>,
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
    model: String,
    #[serde(default)]
    prompt_id: Option<String>,
    cost: f64,
    processing_time: f64,
    processing_speed: f64,
}

impl TryFrom<RawUsageEntry> for UsageEntry {
    type Error = TelemetryError;

    fn try_from(raw: RawUsageEntry) -> Result<Self, Self::Error> {
        if raw.prompt_tokens.checked_add(raw.completion_tokens) != Some(raw.total_tokens) {
            return Err(TelemetryError::InvalidUsage(format!(
                "total_tokens {} != {} + {}",
                raw.total_tokens, raw.prompt_tokens, raw.completion_tokens
            )));
        }
        if !raw.cost.is_finite() || raw.cost < 0.0 {
            return Err(TelemetryError::InvalidUsage(format!(
                "cost must be a finite number >= 0, got {}",
                raw.cost
            )));
        }
        Ok(Self {
            timestamp: raw.timestamp,
            prompt_tokens: raw.prompt_tokens,
            completion_tokens: raw.completion_tokens,
            total_tokens: raw.total_tokens,
            model: raw.model,
            prompt_id: raw.prompt_id,
            cost: raw.cost,
            processing_time: raw.processing_time,
            processing_speed: raw.processing_speed,
        })
    }
}

// ── Aggregated views ──────────────────────────────────────────────────────

/// Token counts inside a [`UsageStats`] summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    /// Prompt tokens.
    pub input: u64,
    /// Completion tokens.
    pub output: u64,
    /// `input + output`.
    pub total: u64,
}

/// Timing figures inside a [`UsageStats`] summary.
///
/// `time` is the sum of nominal per-call processing times in seconds, not
/// measured wall-clock time; `speed` is `total tokens / time`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub time: f64,
    pub speed: f64,
}

/// Usage summary of a ledger. This is also the persisted `token_usage` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    /// Most frequently used model, or `"no_model"`.
    pub model: String,
    pub tokens: TokenCounts,
    pub processing: ProcessingStats,
    /// Total cost in USD.
    pub cost: f64,
}

impl UsageStats {
    /// The zeroed summary of an empty ledger.
    pub fn empty() -> Self {
        Self {
            model: NO_MODEL.into(),
            tokens: TokenCounts::default(),
            processing: ProcessingStats::default(),
            cost: 0.0,
        }
    }

    /// Whether this summary describes no usage at all.
    pub fn is_empty(&self) -> bool {
        self.model == NO_MODEL && self.tokens.total == 0
    }
}

impl Default for UsageStats {
    fn default() -> Self {
        Self::empty()
    }
}

/// Usage attributed to one prompt id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptUsage {
    pub total_tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_cost: f64,
}

impl PromptUsage {
    /// Add `other` into this total. Token counts saturate at `u64::MAX`.
    pub fn merge(&mut self, other: &PromptUsage) {
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
        self.total_cost += other.total_cost;
    }
}

/// Usage attributed to one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    /// Model name.
    pub model: String,
    /// Number of calls.
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
}

/// Cached running totals of a ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalUsage {
    pub total_tokens: u64,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
}
