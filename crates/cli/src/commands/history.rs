//! `delve history` / `delve clear-history`: Inspect the trace log.

use delve_config::AppConfig;
use delve_history::TraceLog;
use delve_telemetry::Trace;

fn open_log() -> Result<TraceLog, Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    Ok(TraceLog::new(config.traces_path()))
}

/// List the most recent traces, newest first.
pub async fn list(limit: usize, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let log = open_log()?;
    let traces = log.recent(limit)?;

    if json {
        for trace in &traces {
            println!("{}", trace.to_json_line()?);
        }
        return Ok(());
    }

    if traces.is_empty() {
        println!("No research history at {}", log.path().display());
        return Ok(());
    }

    println!("📚 Research History ({} most recent)", traces.len());
    println!("─────────────────────────────────────────────────────────────────────────────");
    println!(
        "{:<20} {:<10} {:<18} {:>8} {:>10}  Query",
        "When", "Trace", "Model", "Tokens", "Cost"
    );
    for trace in &traces {
        println!("{}", history_row(trace));
    }

    Ok(())
}

fn history_row(trace: &Trace) -> String {
    let stats = trace.usage_summary();
    let short_id: String = trace.trace_id().chars().take(8).collect();
    format!(
        "{:<20} {:<10} {:<18} {:>8} {:>10}  {}",
        trace.created_at().format("%Y-%m-%d %H:%M:%S"),
        short_id,
        truncate(&stats.model, 18),
        stats.tokens.total,
        format!("${:.4}", stats.cost),
        truncate(trace.query(), 40),
    )
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

/// Delete the trace log.
pub async fn clear(yes: bool) -> Result<(), Box<dyn std::error::Error>> {
    let log = open_log()?;

    if !yes {
        println!("This deletes every trace in {}.", log.path().display());
        println!("Re-run with --yes to confirm.");
        return Ok(());
    }

    log.clear()?;
    println!("🧹 Research history cleared.");
    Ok(())
}
