//! Per-query execution trace with its own usage ledger.
//!
//! A live trace books usage into an [`UsageLedger`] that is created on the
//! first recorded call (or injected up front). A trace rebuilt from the
//! persisted log is read-only: it reports the stored summary and timeline
//! but never accepts new usage.

use crate::TelemetryError;
use crate::ledger::{UsageLedger, summarize_entries, usage_by_prompt};
use crate::model::{PromptUsage, UsageEntry, UsageStats};
use crate::pricing::PricingTable;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tracing::debug;
use uuid::Uuid;

/// Query text used for persisted records that lack one.
pub const UNKNOWN_QUERY: &str = "Unknown";

/// One research query's execution record.
#[derive(Debug)]
pub struct Trace {
    trace_id: String,
    query: String,
    created_at: DateTime<Utc>,
    /// Opaque result payload filled in by the research agent.
    pub data: serde_json::Map<String, serde_json::Value>,
    accounting: Accounting,
}

#[derive(Debug)]
enum Accounting {
    Live {
        pricing: Arc<PricingTable>,
        ledger: OnceLock<Arc<UsageLedger>>,
    },
    Restored {
        stats: Option<UsageStats>,
        timeline: Vec<UsageEntry>,
    },
}

impl Trace {
    /// Start a trace priced against the built-in rate table.
    pub fn new(query: impl Into<String>) -> Self {
        Self::with_pricing(query, Arc::new(PricingTable::with_defaults()))
    }

    /// Start a trace whose ledger (once created) uses `pricing`.
    pub fn with_pricing(query: impl Into<String>, pricing: Arc<PricingTable>) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            query: query.into(),
            created_at: Utc::now(),
            data: serde_json::Map::new(),
            accounting: Accounting::Live {
                pricing,
                ledger: OnceLock::new(),
            },
        }
    }

    /// Start a trace that books into an existing ledger.
    pub fn with_ledger(query: impl Into<String>, ledger: Arc<UsageLedger>) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            query: query.into(),
            created_at: Utc::now(),
            data: serde_json::Map::new(),
            accounting: Accounting::Live {
                pricing: ledger.pricing().clone(),
                ledger: OnceLock::from(ledger),
            },
        }
    }

    /// Rebuild a read-only trace from a persisted record.
    ///
    /// When the record carries both a `token_usage` summary and a timeline,
    /// their token counts must agree; a mismatch is
    /// [`TelemetryError::InconsistentRecord`].
    pub fn from_persisted(record: PersistedTrace) -> Result<Self, TelemetryError> {
        let stored = record
            .token_usage
            .as_ref()
            .filter(|_| !record.usage_timeline.is_empty());
        if let Some(stats) = stored {
            let folded = summarize_entries(&record.usage_timeline).tokens;
            if stats.tokens != folded {
                return Err(TelemetryError::InconsistentRecord(format!(
                    "trace {}: token_usage {:?} does not match timeline {:?}",
                    record.trace_id, stats.tokens, folded
                )));
            }
        }

        Ok(Self {
            trace_id: record.trace_id,
            query: record.query,
            created_at: record.created_at.unwrap_or_else(Utc::now),
            data: record.data,
            accounting: Accounting::Restored {
                stats: record.token_usage,
                timeline: record.usage_timeline,
            },
        })
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether this trace was rebuilt from the log.
    pub fn is_restored(&self) -> bool {
        matches!(self.accounting, Accounting::Restored { .. })
    }

    /// Shared handle to the live ledger, creating it if needed.
    ///
    /// Concurrent sub-tasks of one query record through this handle.
    /// Restored traces have no ledger.
    pub fn ledger_handle(&self) -> Option<Arc<UsageLedger>> {
        match &self.accounting {
            Accounting::Live { pricing, ledger } => Some(
                ledger
                    .get_or_init(|| Arc::new(UsageLedger::with_pricing(pricing.clone())))
                    .clone(),
            ),
            Accounting::Restored { .. } => None,
        }
    }

    /// Record one model call against this trace.
    pub fn record_usage(
        &self,
        prompt_tokens: i64,
        completion_tokens: i64,
        model: impl Into<String>,
        prompt_id: Option<String>,
    ) -> Result<(), TelemetryError> {
        let ledger = self
            .ledger_handle()
            .ok_or_else(|| TelemetryError::ReadOnlyTrace(self.trace_id.clone()))?;
        ledger.add_usage(prompt_tokens, completion_tokens, model, prompt_id)?;

        if tracing::enabled!(tracing::Level::DEBUG) {
            let stats = ledger.get_usage_stats();
            debug!(
                trace_id = %self.trace_id,
                model = %stats.model,
                total_tokens = stats.tokens.total,
                cost = stats.cost,
                "Updated token usage stats"
            );
        }
        Ok(())
    }

    /// Usage summary for this trace. Zeroed if nothing was recorded.
    pub fn usage_summary(&self) -> UsageStats {
        match &self.accounting {
            Accounting::Live { ledger, .. } => ledger
                .get()
                .map(|l| l.get_usage_stats())
                .unwrap_or_else(UsageStats::empty),
            Accounting::Restored { stats, timeline } => stats
                .clone()
                .unwrap_or_else(|| summarize_entries(timeline)),
        }
    }

    /// Usage grouped by prompt id.
    pub fn usage_by_prompt(&self) -> BTreeMap<String, PromptUsage> {
        match &self.accounting {
            Accounting::Live { ledger, .. } => ledger
                .get()
                .map(|l| l.get_usage_by_prompt())
                .unwrap_or_default(),
            Accounting::Restored { timeline, .. } => usage_by_prompt(timeline),
        }
    }

    /// The usage timeline, oldest first.
    pub fn timeline(&self) -> Vec<UsageEntry> {
        match &self.accounting {
            Accounting::Live { ledger, .. } => {
                ledger.get().map(|l| l.entries()).unwrap_or_default()
            }
            Accounting::Restored { timeline, .. } => timeline.clone(),
        }
    }

    /// Snapshot this trace as a log record.
    pub fn to_persistable(&self) -> PersistedTrace {
        let token_usage = match &self.accounting {
            Accounting::Restored { stats: None, timeline } if timeline.is_empty() => None,
            _ => Some(self.usage_summary()),
        };
        PersistedTrace {
            trace_id: self.trace_id.clone(),
            query: self.query.clone(),
            data: self.data.clone(),
            token_usage,
            created_at: Some(self.created_at),
            usage_timeline: self.timeline(),
        }
    }

    /// Serialize as one JSON Lines record, without the trailing newline.
    pub fn to_json_line(&self) -> Result<String, TelemetryError> {
        Ok(serde_json::to_string(&self.to_persistable())?)
    }
}

// ── Persisted record ──────────────────────────────────────────────────────

/// One line of the JSON Lines trace log.
///
/// Reading is lenient: every field is optional, and an empty or null
/// `token_usage` counts as absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedTrace {
    #[serde(default = "fresh_trace_id")]
    pub trace_id: String,
    #[serde(default = "unknown_query")]
    pub query: String,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    #[serde(
        default,
        deserialize_with = "lenient_stats",
        skip_serializing_if = "Option::is_none"
    )]
    pub token_usage: Option<UsageStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub usage_timeline: Vec<UsageEntry>,
}

fn fresh_trace_id() -> String {
    Uuid::new_v4().to_string()
}

fn unknown_query() -> String {
    UNKNOWN_QUERY.into()
}

fn lenient_stats<'de, D>(deserializer: D) -> Result<Option<UsageStats>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match &value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Object(map) if map.is_empty() => Ok(None),
        _ => serde_json::from_value(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NO_MODEL;

    #[test]
    fn summary_without_ledger_is_zeroed() {
        let trace = Trace::new("what is a quokka?");
        assert_eq!(trace.usage_summary(), UsageStats::empty());
        assert!(trace.usage_by_prompt().is_empty());
        assert!(trace.timeline().is_empty());
        assert!(!trace.is_restored());
    }

    #[test]
    fn ledger_created_on_first_use() {
        let trace = Trace::new("q");
        trace.record_usage(1000, 1000, "gpt-4", None).unwrap();
        trace.record_usage(10, 5, "gpt-4", Some("brief".into())).unwrap();

        let stats = trace.usage_summary();
        assert_eq!(stats.model, "gpt-4");
        assert_eq!(stats.tokens.total, 2015);
        assert_eq!(trace.timeline().len(), 2);
        assert_eq!(trace.usage_by_prompt()["brief"].total_tokens, 15);
    }

    #[test]
    fn invalid_usage_propagates() {
        let trace = Trace::new("q");
        let err = trace.record_usage(1, -1, "gpt-4", None).unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidUsage(_)));
    }

    #[test]
    fn injected_ledger_is_shared() {
        let ledger = Arc::new(UsageLedger::new());
        let trace = Trace::with_ledger("q", ledger.clone());
        trace.record_usage(4, 6, "gpt-4", None).unwrap();
        assert_eq!(ledger.get_total_usage().total_tokens, 10);

        let handle = trace.ledger_handle().unwrap();
        assert!(Arc::ptr_eq(&handle, &ledger));
    }

    #[test]
    fn persisted_shape_matches_log_format() {
        let mut trace = Trace::new("tell me about axolotls");
        trace.data.insert("tool".into(), "General Agent".into());
        trace.record_usage(1000, 1000, "gpt-4", None).unwrap();

        let value = serde_json::to_value(trace.to_persistable()).unwrap();
        assert_eq!(value["trace_id"], trace.trace_id());
        assert_eq!(value["query"], "tell me about axolotls");
        assert_eq!(value["data"]["tool"], "General Agent");

        let usage = &value["token_usage"];
        assert_eq!(usage["model"], "gpt-4");
        assert_eq!(usage["tokens"]["input"], 1000);
        assert_eq!(usage["tokens"]["output"], 1000);
        assert_eq!(usage["tokens"]["total"], 2000);
        assert_eq!(usage["processing"]["time"], 0.5);
        assert_eq!(usage["processing"]["speed"], 4000.0);
        assert!((usage["cost"].as_f64().unwrap() - 0.09).abs() < 1e-12);
    }

    #[test]
    fn restored_trace_reports_stored_stats() {
        let trace = Trace::new("q");
        trace.record_usage(300, 200, "claude-3-opus", Some("p1".into())).unwrap();
        trace.record_usage(100, 100, "gpt-4", None).unwrap();
        let original = trace.usage_summary();

        let line = serde_json::to_string(&trace.to_persistable()).unwrap();
        let record: PersistedTrace = serde_json::from_str(&line).unwrap();
        let restored = Trace::from_persisted(record).unwrap();

        assert!(restored.is_restored());
        assert_eq!(restored.trace_id(), trace.trace_id());
        assert_eq!(restored.usage_summary(), original);
        assert_eq!(restored.usage_by_prompt(), trace.usage_by_prompt());
        assert_eq!(restored.timeline(), trace.timeline());
        assert!(restored.ledger_handle().is_none());
    }

    #[test]
    fn restored_trace_is_read_only() {
        let restored = Trace::from_persisted(PersistedTrace {
            trace_id: "t-1".into(),
            query: "q".into(),
            data: serde_json::Map::new(),
            token_usage: None,
            created_at: None,
            usage_timeline: Vec::new(),
        })
        .unwrap();
        let err = restored.record_usage(1, 1, "gpt-4", None).unwrap_err();
        assert!(matches!(err, TelemetryError::ReadOnlyTrace(id) if id == "t-1"));
        assert_eq!(restored.usage_summary().model, NO_MODEL);
    }

    #[test]
    fn lenient_record_defaults() {
        let record: PersistedTrace = serde_json::from_str(r#"{"token_usage": {}}"#).unwrap();
        assert_eq!(record.query, UNKNOWN_QUERY);
        assert!(!record.trace_id.is_empty());
        assert!(record.data.is_empty());
        assert!(record.token_usage.is_none());

        let record: PersistedTrace =
            serde_json::from_str(r#"{"query": "x", "token_usage": null}"#).unwrap();
        assert!(record.token_usage.is_none());
    }

    #[test]
    fn partial_token_usage_is_rejected() {
        let result =
            serde_json::from_str::<PersistedTrace>(r#"{"query": "x", "token_usage": {"model": 3}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn restored_stats_fall_back_to_timeline() {
        let trace = Trace::new("q");
        trace.record_usage(10, 10, "gpt-4", None).unwrap();
        let mut record = trace.to_persistable();
        record.token_usage = None;

        let restored = Trace::from_persisted(record).unwrap();
        assert_eq!(restored.usage_summary(), trace.usage_summary());
    }

    #[test]
    fn stored_totals_must_match_timeline() {
        let trace = Trace::new("q");
        trace.record_usage(300, 200, "gpt-4", Some("p1".into())).unwrap();
        let mut record = trace.to_persistable();
        record.token_usage.as_mut().unwrap().tokens.input += 1;

        let err = Trace::from_persisted(record).unwrap_err();
        assert!(matches!(err, TelemetryError::InconsistentRecord(_)));
        assert!(err.to_string().contains(trace.trace_id()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn sub_tasks_share_trace_ledger() {
        let trace = Trace::new("parallel sub-queries");
        let ledger = trace.ledger_handle().unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    for _ in 0..25 {
                        ledger
                            .add_usage(100, 50, "gpt-4-turbo", Some(format!("step-{i}")))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        let stats = trace.usage_summary();
        assert_eq!(stats.tokens.total, 8 * 25 * 150);
        assert_eq!(trace.usage_by_prompt().len(), 8);
    }
}
