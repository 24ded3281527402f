//! JSON Lines trace log.
//!
//! Storage location: `<data_dir>/research_traces.jsonl`
//!
//! Each record is written as a single complete line with one `write_all`
//! on an append-mode handle while holding the log's writer mutex, so
//! concurrent appenders never interleave partial records.

use crate::{HistoryError, ReconstructionError};
use delve_telemetry::{PersistedTrace, Trace};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

/// The append-only log of finished research traces.
#[derive(Debug)]
pub struct TraceLog {
    path: PathBuf,
    writer: Mutex<()>,
}

/// Result of a best-effort load: the traces that parsed, plus the lines
/// that did not.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub traces: Vec<Trace>,
    pub skipped: Vec<ReconstructionError>,
}

impl TraceLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one trace as a single JSON line.
    pub fn append(&self, trace: &Trace) -> Result<(), HistoryError> {
        let mut line = trace.to_json_line()?;
        line.push('\n');

        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;

        debug!(
            trace_id = %trace.trace_id(),
            path = %self.path.display(),
            "Appended trace to log"
        );
        Ok(())
    }

    /// Rebuild every trace in the log, oldest first.
    ///
    /// Malformed lines are logged and skipped. A missing log is empty.
    pub fn load_history(&self) -> Result<Vec<Trace>, HistoryError> {
        let report = self.load_report()?;
        for skipped in &report.skipped {
            warn!(
                path = %self.path.display(),
                line = skipped.line,
                reason = %skipped.reason,
                "Skipping malformed trace record"
            );
        }
        Ok(report.traces)
    }

    /// Like [`load_history`](Self::load_history), but hands back the
    /// skipped lines instead of logging them.
    pub fn load_report(&self) -> Result<LoadReport, HistoryError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LoadReport::default()),
            Err(e) => return Err(e.into()),
        };

        let mut report = LoadReport::default();
        for (idx, raw) in BufReader::new(file).split(b'\n').enumerate() {
            let raw = raw?;
            let line = idx + 1;
            match parse_line(&raw) {
                Ok(Some(trace)) => report.traces.push(trace),
                Ok(None) => {}
                Err(reason) => report.skipped.push(ReconstructionError { line, reason }),
            }
        }

        debug!(
            path = %self.path.display(),
            loaded = report.traces.len(),
            skipped = report.skipped.len(),
            "Loaded trace history"
        );
        Ok(report)
    }

    /// The `limit` most recent traces, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<Trace>, HistoryError> {
        let mut traces = self.load_history()?;
        traces.reverse();
        traces.truncate(limit);
        Ok(traces)
    }

    /// Delete the whole log.
    pub fn clear(&self) -> Result<(), HistoryError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Cleared research history");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// `Ok(None)` for blank lines.
fn parse_line(raw: &[u8]) -> Result<Option<Trace>, String> {
    let text = std::str::from_utf8(raw).map_err(|e| format!("invalid UTF-8: {e}"))?;
    if text.trim().is_empty() {
        return Ok(None);
    }
    let record: PersistedTrace = serde_json::from_str(text).map_err(|e| e.to_string())?;
    Trace::from_persisted(record)
        .map(Some)
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn log_in(dir: &TempDir) -> TraceLog {
        TraceLog::new(dir.path().join("research_traces.jsonl"))
    }

    fn finished_trace(query: &str, prompt: i64, completion: i64) -> Trace {
        let trace = Trace::new(query);
        trace.record_usage(prompt, completion, "gpt-4", None).unwrap();
        trace
    }

    #[test]
    fn missing_log_is_empty() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        assert!(log.load_history().unwrap().is_empty());
        assert!(log.load_report().unwrap().skipped.is_empty());
    }

    #[test]
    fn append_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let log = TraceLog::new(dir.path().join("nested/data/research_traces.jsonl"));
        log.append(&finished_trace("q", 10, 5)).unwrap();
        assert!(log.path().exists());
        assert_eq!(log.load_history().unwrap().len(), 1);
    }

    #[test]
    fn each_append_is_one_line() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        for i in 0..3 {
            log.append(&finished_trace(&format!("q{i}"), 10, 5)).unwrap();
        }
        let content = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(content.ends_with('\n'));
    }

    #[test]
    fn malformed_line_is_skipped_in_order() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        log.append(&finished_trace("first", 10, 5)).unwrap();
        {
            let mut f = OpenOptions::new().append(true).open(log.path()).unwrap();
            f.write_all(b"{\"trace_id\": \"broken\", \"query\": \n").unwrap();
        }
        log.append(&finished_trace("third", 20, 5)).unwrap();

        let traces = log.load_history().unwrap();
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].query(), "first");
        assert_eq!(traces[1].query(), "third");

        let report = log.load_report().unwrap();
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].line, 2);
    }

    #[test]
    fn tampered_totals_are_skipped() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        let mut record = finished_trace("tampered", 10, 5).to_persistable();
        record.token_usage.as_mut().unwrap().tokens.total = 1;
        std::fs::write(
            log.path(),
            format!("{}\n", serde_json::to_string(&record).unwrap()),
        )
        .unwrap();
        log.append(&finished_trace("intact", 10, 5)).unwrap();

        let report = log.load_report().unwrap();
        assert_eq!(report.traces.len(), 1);
        assert_eq!(report.traces[0].query(), "intact");
        assert_eq!(report.skipped[0].line, 1);
        assert!(report.skipped[0].reason.contains("does not match timeline"));
    }

    #[test]
    fn non_object_and_invalid_utf8_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        std::fs::write(log.path(), b"42\n\xff\xfe\n\n{\"query\": \"ok\"}\n").unwrap();

        let report = log.load_report().unwrap();
        assert_eq!(report.traces.len(), 1);
        assert_eq!(report.traces[0].query(), "ok");
        assert_eq!(
            report.skipped.iter().map(|s| s.line).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn lenient_record_defaults() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        std::fs::write(log.path(), "{\"trace_id\": \"t-1\", \"token_usage\": {}}\n").unwrap();

        let traces = log.load_history().unwrap();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].trace_id(), "t-1");
        assert_eq!(traces[0].query(), "Unknown");
        assert!(traces[0].usage_summary().is_empty());
        assert!(traces[0].is_restored());
    }

    #[test]
    fn recent_is_newest_first() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        for q in ["a", "b", "c"] {
            log.append(&finished_trace(q, 1, 1)).unwrap();
        }
        let recent = log.recent(2).unwrap();
        let queries: Vec<_> = recent.iter().map(|t| t.query().to_string()).collect();
        assert_eq!(queries, vec!["c", "b"]);
    }

    #[test]
    fn clear_removes_everything() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        log.append(&finished_trace("q", 1, 1)).unwrap();
        log.clear().unwrap();
        assert!(log.load_history().unwrap().is_empty());
        // Clearing twice is fine.
        log.clear().unwrap();
    }
}
