//! Run Command

use anyhow::{bail, Result};
use clap::Args;
use std::sync::Arc;
use tracing::info;

use trackprobe_e2e::playwright::PlaywrightLauncher;
use trackprobe_e2e::{HarnessConfig, ScenarioRunner};

use crate::output::{print_report, OutputFormat};

#[derive(Args)]
pub struct RunArgs {
    /// Scenario names to run (all when empty)
    pub names: Vec<String>,

    /// Only run scenarios carrying this tag
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Scenarios to run at once
    #[arg(short, long, env = "TRACKPROBE_JOBS")]
    pub jobs: Option<usize>,

    /// Base URL of the application under test
    #[arg(long, env = "TRACKPROBE_BASE_URL")]
    pub base_url: Option<String>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Directory for results.json
    #[arg(long)]
    pub output_dir: Option<std::path::PathBuf>,
}

pub async fn execute(args: RunArgs, mut config: HarnessConfig, format: OutputFormat) -> Result<bool> {
    if let Some(url) = args.base_url {
        config.base_url = url;
    }
    if let Some(jobs) = args.jobs {
        config.jobs = jobs;
    }
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if args.headed {
        config.browser.headless = false;
    }
    config.validate()?;

    let launcher = PlaywrightLauncher::from_config(&config);
    launcher.check_installed().await?;

    let mut runner = ScenarioRunner::new(config, Arc::new(launcher));
    let scenarios = ScenarioRunner::select(runner.load_scenarios()?, &args.names, args.tag.as_deref())?;
    if scenarios.is_empty() {
        bail!("No scenarios matched");
    }

    runner.prepare_target().await?;
    let report = runner.run(&scenarios).await;
    runner.stop_target();

    let path = report.write_json(&runner.config().output_dir)?;
    print_report(&report, format);
    info!("Results written to {}", path.display());

    Ok(report.all_passed())
}
