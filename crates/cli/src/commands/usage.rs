//! CLI commands for usage and cost reporting.

use delve_config::AppConfig;
use delve_history::{HistorySummary, TraceLog, summarize};
use delve_research::pricing_from_config;

/// Show usage accumulated over the whole research history.
pub async fn usage() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    let log = TraceLog::new(config.traces_path());
    let report = log.load_report()?;
    let summary = summarize(&report.traces);

    print!("{}", render_summary(&summary));
    if !report.skipped.is_empty() {
        println!();
        println!("  ⚠ {} unreadable line(s) skipped:", report.skipped.len());
        for skipped in report.skipped.iter().take(5) {
            println!("    {skipped}");
        }
    }

    Ok(())
}

fn render_summary(summary: &HistorySummary) -> String {
    let mut out = String::new();
    out.push_str("📊 Usage Summary\n");
    out.push_str("─────────────────────────────────────\n");
    out.push_str(&format!("  Traces:          {}\n", summary.trace_count));
    out.push_str(&format!(
        "  Tokens:          {} ({} in / {} out)\n",
        summary.tokens.total, summary.tokens.input, summary.tokens.output
    ));
    out.push_str(&format!("  Total cost:      ${:.6}\n", summary.cost));
    out.push_str(&format!(
        "  Processing time: {:.1}s nominal ({:.1} tok/s)\n",
        summary.processing.time, summary.processing.speed
    ));
    out.push_str(&format!("  Most used model: {}\n", summary.most_used_model));

    if !summary.traces_by_model.is_empty() {
        out.push_str("\n  Traces by model:\n");
        for (model, count) in &summary.traces_by_model {
            out.push_str(&format!("    {model:<24} {count}\n"));
        }
    }
    out
}

/// List model pricing, including configured overrides.
pub async fn pricing() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    let table = pricing_from_config(&config.telemetry);
    let models = table.models();

    println!("💰 Model Pricing (per 1K tokens)");
    println!("─────────────────────────────────────────────────────");
    println!("{:<32} {:>10} {:>10}", "Model", "Prompt", "Completion");
    println!("{:<32} {:>10} {:>10}", "─────", "──────", "──────────");

    for name in &models {
        if let Some(rate) = table.get(name) {
            let marker = if config.telemetry.custom_pricing.contains_key(name) {
                " *"
            } else {
                ""
            };
            println!(
                "{:<32} ${:>9.4} ${:>9.4}{marker}",
                name, rate.prompt_per_1k, rate.completion_per_1k
            );
        }
    }

    println!();
    println!("  {} models with pricing data", models.len());
    if !config.telemetry.custom_pricing.is_empty() {
        println!("  * overridden in config");
    }

    Ok(())
}

/// Estimate cost for a given model and token counts.
pub async fn estimate(
    model: &str,
    prompt_tokens: u64,
    completion_tokens: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    let table = pricing_from_config(&config.telemetry);

    if table.get(model).is_none() {
        println!("⚠ Model '{model}' not found in pricing table; it is billed at $0.");
        println!("  Use `delve pricing` to see available models.");
        return Ok(());
    }

    let cost = table.compute_cost(model, prompt_tokens, completion_tokens);
    println!("💵 Cost estimate for {model}");
    println!("   Prompt tokens:     {prompt_tokens}");
    println!("   Completion tokens: {completion_tokens}");
    println!("   Estimated cost:    ${cost:.6}");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_telemetry::Trace;

    #[test]
    fn summary_rendering() {
        let trace = Trace::new("q");
        trace.record_usage(1000, 1000, "gpt-4", None).unwrap();
        let text = render_summary(&summarize(&[trace]));
        assert!(text.contains("Traces:          1"));
        assert!(text.contains("2000 (1000 in / 1000 out)"));
        assert!(text.contains("$0.090000"));
        assert!(text.contains("Most used model: gpt-4"));
    }

    #[test]
    fn empty_summary_rendering() {
        let text = render_summary(&summarize(&[]));
        assert!(text.contains("no_model"));
        assert!(!text.contains("Traces by model"));
    }
}
