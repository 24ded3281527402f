//! Aggregate usage across loaded traces.

use delve_telemetry::{NO_MODEL, ProcessingStats, TokenCounts, Trace, most_used_model};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Process-wide usage figures computed from the trace history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySummary {
    pub trace_count: usize,
    pub tokens: TokenCounts,
    /// Summed nominal processing time; `speed` is overall tokens per second.
    pub processing: ProcessingStats,
    pub cost: f64,
    /// Dominant model that leads the most traces, or `"no_model"`.
    pub most_used_model: String,
    /// Number of traces led by each model.
    pub traces_by_model: BTreeMap<String, usize>,
}

/// Fold a set of traces into one [`HistorySummary`].
///
/// Traces without any recorded usage count toward `trace_count` only.
pub fn summarize(traces: &[Trace]) -> HistorySummary {
    let stats: Vec<_> = traces.iter().map(Trace::usage_summary).collect();

    let mut tokens = TokenCounts::default();
    let mut time = 0.0f64;
    let mut cost = 0.0f64;
    let mut traces_by_model: BTreeMap<String, usize> = BTreeMap::new();

    for s in stats.iter().filter(|s| !s.is_empty()) {
        tokens.input = tokens.input.saturating_add(s.tokens.input);
        tokens.output = tokens.output.saturating_add(s.tokens.output);
        tokens.total = tokens.total.saturating_add(s.tokens.total);
        time += s.processing.time;
        cost += s.cost;
        *traces_by_model.entry(s.model.clone()).or_default() += 1;
    }

    let speed = if time > 0.0 {
        tokens.total as f64 / time
    } else {
        0.0
    };

    let most_used = most_used_model(
        stats
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| s.model.as_str()),
    )
    .unwrap_or(NO_MODEL)
    .to_string();

    HistorySummary {
        trace_count: traces.len(),
        tokens,
        processing: ProcessingStats { time, speed },
        cost,
        most_used_model: most_used,
        traces_by_model,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace_with(calls: &[(&str, i64, i64)]) -> Trace {
        let trace = Trace::new("q");
        for (model, p, c) in calls {
            trace.record_usage(*p, *c, *model, None).unwrap();
        }
        trace
    }

    #[test]
    fn empty_history() {
        let summary = summarize(&[]);
        assert_eq!(summary.trace_count, 0);
        assert_eq!(summary.tokens.total, 0);
        assert_eq!(summary.most_used_model, "no_model");
        assert!(summary.traces_by_model.is_empty());
    }

    #[test]
    fn sums_across_traces() {
        let traces = vec![
            trace_with(&[("gpt-4", 1000, 1000)]),
            trace_with(&[("gpt-3.5-turbo", 100, 50), ("gpt-3.5-turbo", 100, 50)]),
            trace_with(&[("gpt-4", 10, 10)]),
            Trace::new("nothing recorded"),
        ];
        let summary = summarize(&traces);

        assert_eq!(summary.trace_count, 4);
        assert_eq!(summary.tokens.input, 1210);
        assert_eq!(summary.tokens.output, 1110);
        assert_eq!(summary.tokens.total, 2320);
        assert!((summary.processing.time - 2.0).abs() < 1e-9);
        assert!((summary.processing.speed - 1160.0).abs() < 1e-9);
        assert_eq!(summary.most_used_model, "gpt-4");
        assert_eq!(summary.traces_by_model["gpt-4"], 2);
        assert_eq!(summary.traces_by_model["gpt-3.5-turbo"], 1);
        assert!(!summary.traces_by_model.contains_key("no_model"));
    }

    #[test]
    fn dominant_model_tie_goes_to_earliest_trace() {
        let traces = vec![
            trace_with(&[("claude-3-opus", 1, 1)]),
            trace_with(&[("gpt-4", 1, 1)]),
        ];
        assert_eq!(summarize(&traces).most_used_model, "claude-3-opus");
    }
}
