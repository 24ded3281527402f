//! Thread-safe usage ledger. Records every model call, keeps running
//! totals, and serves usage summaries.

use crate::TelemetryError;
use crate::model::*;
use crate::pricing::PricingTable;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Processing time charged to every entry, in seconds.
///
/// Calls are not timed; each one is booked at this nominal value.
pub const NOMINAL_PROCESSING_SECS: f64 = 0.5;

/// An append-only ledger of token usage.
///
/// Entries and the cached totals live behind a single `RwLock`, so a reader
/// always sees totals that match some prefix of the entry sequence. Entries
/// are priced and validated before the lock is taken; nothing under the lock
/// can fail halfway.
pub struct UsageLedger {
    /// Cost-rate table used to price new entries.
    pricing: Arc<PricingTable>,
    /// Seconds booked per entry.
    processing_time: f64,
    state: RwLock<LedgerState>,
}

#[derive(Debug, Default)]
struct LedgerState {
    /// Insertion order is temporal order.
    entries: Vec<UsageEntry>,
    /// Cached fold of `entries`.
    totals: TotalUsage,
}

impl UsageLedger {
    /// Create an empty ledger with the built-in rate table.
    pub fn new() -> Self {
        Self::with_pricing(Arc::new(PricingTable::with_defaults()))
    }

    /// Create an empty ledger priced against a shared rate table.
    pub fn with_pricing(pricing: Arc<PricingTable>) -> Self {
        Self {
            pricing,
            processing_time: NOMINAL_PROCESSING_SECS,
            state: RwLock::new(LedgerState::default()),
        }
    }

    /// Override the nominal processing time booked per entry.
    pub fn with_processing_time(mut self, seconds: f64) -> Self {
        self.processing_time = seconds;
        self
    }

    /// The rate table this ledger prices against.
    pub fn pricing(&self) -> &Arc<PricingTable> {
        &self.pricing
    }

    fn read(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Recording ─────────────────────────────────────────────────────

    /// Record one model call.
    ///
    /// Fails with [`TelemetryError::InvalidUsage`] on negative counts or if
    /// the running totals would overflow; the ledger is unchanged on error.
    pub fn add_usage(
        &self,
        prompt_tokens: i64,
        completion_tokens: i64,
        model: impl Into<String>,
        prompt_id: Option<String>,
    ) -> Result<(), TelemetryError> {
        let entry = UsageEntry::new(
            prompt_tokens,
            completion_tokens,
            model,
            prompt_id,
            &self.pricing,
            self.processing_time,
        )?;

        let mut state = self.write();
        let totals = accumulate(state.totals, &entry).ok_or_else(|| {
            TelemetryError::InvalidUsage("running token totals would overflow".into())
        })?;
        state.totals = totals;
        state.entries.push(entry);
        Ok(())
    }

    /// Clear all entries and totals in one step.
    pub fn reset(&self) {
        let mut state = self.write();
        state.entries.clear();
        state.totals = TotalUsage::default();
    }

    // ── Queries ───────────────────────────────────────────────────────

    /// Summary of all usage recorded so far.
    pub fn get_usage_stats(&self) -> UsageStats {
        summarize_entries(&self.read().entries)
    }

    /// Usage grouped by prompt id. Entries without a prompt id are left out.
    pub fn get_usage_by_prompt(&self) -> BTreeMap<String, PromptUsage> {
        usage_by_prompt(&self.read().entries)
    }

    /// Usage grouped by model, in order of first use.
    pub fn get_usage_by_model(&self) -> Vec<ModelUsage> {
        usage_by_model(&self.read().entries)
    }

    /// Cached running totals.
    pub fn get_total_usage(&self) -> TotalUsage {
        self.read().totals
    }

    /// Recompute the totals by folding every entry.
    ///
    /// Always equal to [`get_total_usage`](Self::get_total_usage); kept for
    /// audits and debugging.
    pub fn replay_totals(&self) -> TotalUsage {
        self.read()
            .entries
            .iter()
            .fold(TotalUsage::default(), |acc, e| {
                // Cannot overflow: every prefix was checked on insert.
                accumulate(acc, e).unwrap_or(acc)
            })
    }

    /// Snapshot of the usage timeline, oldest first.
    pub fn entries(&self) -> Vec<UsageEntry> {
        self.read().entries.clone()
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for UsageLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for UsageLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("UsageLedger")
            .field("entries", &state.entries.len())
            .field("totals", &state.totals)
            .field("processing_time", &self.processing_time)
            .finish()
    }
}

fn accumulate(totals: TotalUsage, entry: &UsageEntry) -> Option<TotalUsage> {
    Some(TotalUsage {
        total_tokens: totals.total_tokens.checked_add(entry.total_tokens())?,
        total_prompt_tokens: totals.total_prompt_tokens.checked_add(entry.prompt_tokens())?,
        total_completion_tokens: totals
            .total_completion_tokens
            .checked_add(entry.completion_tokens())?,
    })
}

// ── Folds over a timeline ─────────────────────────────────────────────────

/// Build a [`UsageStats`] summary from a timeline.
///
/// The reported model is the most used one; ties go to the model that
/// appears first in the timeline.
pub fn summarize_entries(entries: &[UsageEntry]) -> UsageStats {
    if entries.is_empty() {
        return UsageStats::empty();
    }

    let mut input = 0u64;
    let mut output = 0u64;
    let mut cost = 0.0f64;
    let mut time = 0.0f64;
    for e in entries {
        input = input.saturating_add(e.prompt_tokens());
        output = output.saturating_add(e.completion_tokens());
        cost += e.cost();
        time += e.processing_time();
    }
    let total = input.saturating_add(output);

    UsageStats {
        model: most_used_model(entries.iter().map(UsageEntry::model))
            .unwrap_or(NO_MODEL)
            .to_string(),
        tokens: TokenCounts {
            input,
            output,
            total,
        },
        processing: ProcessingStats {
            time,
            speed: throughput(total, time),
        },
        cost,
    }
}

/// Stable argmax over first-seen order.
pub fn most_used_model<'a>(models: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut counts: Vec<(&str, u64)> = Vec::new();
    for model in models {
        match counts.iter_mut().find(|(m, _)| *m == model) {
            Some((_, n)) => *n += 1,
            None => counts.push((model, 1)),
        }
    }

    let mut best: Option<(&str, u64)> = None;
    for (model, n) in counts {
        if best.is_none_or(|(_, max)| n > max) {
            best = Some((model, n));
        }
    }
    best.map(|(model, _)| model)
}

/// Group a timeline by prompt id.
pub fn usage_by_prompt(entries: &[UsageEntry]) -> BTreeMap<String, PromptUsage> {
    let mut by_prompt: BTreeMap<String, PromptUsage> = BTreeMap::new();
    for e in entries {
        let Some(prompt_id) = e.prompt_id() else {
            continue;
        };
        by_prompt
            .entry(prompt_id.to_string())
            .or_default()
            .merge(&PromptUsage {
                total_tokens: e.total_tokens(),
                prompt_tokens: e.prompt_tokens(),
                completion_tokens: e.completion_tokens(),
                total_cost: e.cost(),
            });
    }
    by_prompt
}

/// Group a timeline by model, in order of first use.
pub fn usage_by_model(entries: &[UsageEntry]) -> Vec<ModelUsage> {
    let mut by_model: Vec<ModelUsage> = Vec::new();
    for e in entries {
        let idx = match by_model.iter().position(|m| m.model == e.model()) {
            Some(idx) => idx,
            None => {
                by_model.push(ModelUsage {
                    model: e.model().to_string(),
                    ..Default::default()
                });
                by_model.len() - 1
            }
        };
        let usage = &mut by_model[idx];
        usage.calls = usage.calls.saturating_add(1);
        usage.prompt_tokens = usage.prompt_tokens.saturating_add(e.prompt_tokens());
        usage.completion_tokens = usage.completion_tokens.saturating_add(e.completion_tokens());
        usage.cost += e.cost();
    }
    by_model
}
