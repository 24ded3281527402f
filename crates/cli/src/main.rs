//! Delve CLI entry point.
//!
//! Commands:
//! - `serve`: Start the research HTTP API
//! - `research`: Run one query and print the result
//! - `history`: List recent traces
//! - `usage`: Summarize token usage across the history
//! - `pricing`: Show the per-1K-token rate table
//! - `estimate`: Estimate the cost of a call
//! - `clear-history`: Delete the trace log

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "delve",
    about = "Delve — research pipeline with token usage accounting",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Override the bind address
        #[arg(long)]
        host: Option<String>,

        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run a research query
    Research {
        /// The question to research
        query: String,

        /// Research tool to use
        #[arg(short, long)]
        tool: Option<String>,

        /// Render a report for this species
        #[arg(short, long)]
        species: Option<String>,
    },

    /// List recent research traces
    History {
        /// Number of traces to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,

        /// Print raw JSON Lines records
        #[arg(long)]
        json: bool,
    },

    /// Show token usage and cost across the history
    Usage,

    /// Show model pricing
    Pricing,

    /// Estimate the cost of a model call
    Estimate {
        /// Model name (e.g. gpt-4)
        model: String,
        /// Prompt tokens
        prompt_tokens: u64,
        /// Completion tokens
        completion_tokens: u64,
    },

    /// Delete all research history
    ClearHistory {
        /// Skip the confirmation hint
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    match cli.command {
        Commands::Serve { host, port } => commands::serve::run(host, port).await?,
        Commands::Research {
            query,
            tool,
            species,
        } => commands::research::run(query, tool, species).await?,
        Commands::History { limit, json } => commands::history::list(limit, json).await?,
        Commands::Usage => commands::usage::usage().await?,
        Commands::Pricing => commands::usage::pricing().await?,
        Commands::Estimate {
            model,
            prompt_tokens,
            completion_tokens,
        } => commands::usage::estimate(&model, prompt_tokens, completion_tokens).await?,
        Commands::ClearHistory { yes } => commands::history::clear(yes).await?,
    }

    Ok(())
}
