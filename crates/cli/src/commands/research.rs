//! `delve research`: Run one research query from the command line.

use delve_config::AppConfig;
use delve_core::ResearchRequest;
use delve_research::ResearchPipeline;

pub async fn run(
    query: String,
    tool: Option<String>,
    species: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let pipeline = ResearchPipeline::from_config(&config)?;

    let mut request = ResearchRequest::new(query);
    if let Some(tool) = tool {
        request = request.with_tool(tool);
    }
    if let Some(species) = species {
        request = request.with_species(species);
    }

    tracing::debug!(tool = %request.tool_name, "Running research from the CLI");
    let run = pipeline.run(&request).await?;
    let usage = &run.response.token_usage;

    println!("🔎 {}", request.query.trim());
    println!("─────────────────────────────────────");
    println!("{}", run.result.summary);
    for (i, item) in run.result.content.iter().enumerate() {
        println!("  [{}] {} — {}", i + 1, item.title, item.url);
    }
    println!();
    println!("  Trace:   {}", run.response.trace_id);
    println!("  Output:  {}", run.response.file_path);
    println!(
        "  Tokens:  {} ({} in / {} out) on {}",
        usage.tokens.total, usage.tokens.input, usage.tokens.output, usage.model
    );
    println!("  Cost:    ${:.6}", usage.cost);

    // The CLI exits when this returns, so wait for the report here.
    if let Some(job) = run.report {
        println!();
        println!("📄 Rendering report...");
        match job.await? {
            Some(outcome) => {
                println!("   File: {}", outcome.local_path.display());
                if let Some(url) = outcome.url {
                    println!("   URL:  {url}");
                }
            }
            None => println!("   ⚠ Report generation failed (see logs)"),
        }
    }

    Ok(())
}
