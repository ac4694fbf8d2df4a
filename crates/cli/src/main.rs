//! TrackProbe CLI - Main Entry Point
//!
//! Runs, lists and validates declarative UI scenarios against a web app.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use trackprobe_e2e::HarnessConfig;

mod commands;
mod output;

use commands::{list, run, validate};

/// TrackProbe - UI scenario runner
#[derive(Parser)]
#[command(name = "trackprobe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Harness configuration file
    #[arg(long, env = "TRACKPROBE_CONFIG", default_value = "trackprobe.toml", global = true)]
    config: PathBuf,

    /// Directory holding scenario files
    #[arg(long, env = "TRACKPROBE_SCENARIOS", global = true)]
    scenarios: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scenarios and report verdicts
    Run(run::RunArgs),

    /// List scenarios
    List(list::ListArgs),

    /// Parse and check every scenario without running it
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match execute(cli).await {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            std::process::exit(2);
        }
    }
}

/// Run the selected command; `Ok(false)` means some scenario did not pass
async fn execute(cli: Cli) -> anyhow::Result<bool> {
    let mut config = HarnessConfig::load(&cli.config)?;
    if let Some(dir) = cli.scenarios {
        config.scenarios_dir = dir;
    }

    match cli.command {
        Commands::Run(args) => run::execute(args, config, cli.format).await,
        Commands::List(args) => list::execute(args, &config, cli.format),
        Commands::Validate => validate::execute(&config, cli.format),
    }
}
