//! List Command

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use trackprobe_e2e::{HarnessConfig, Scenario};

use crate::output::{print_list, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct ListArgs {
    /// Only list scenarios carrying this tag
    #[arg(short, long)]
    pub tag: Option<String>,
}

#[derive(Serialize)]
pub struct ScenarioDisplay {
    pub name: String,
    pub title: String,
    pub tags: Vec<String>,
    pub steps: usize,
    pub expectations: usize,
}

impl From<&Scenario> for ScenarioDisplay {
    fn from(scenario: &Scenario) -> Self {
        Self {
            name: scenario.name.clone(),
            title: scenario.display_title().to_string(),
            tags: scenario.tags.clone(),
            steps: scenario.steps.len(),
            expectations: scenario.expectations.len(),
        }
    }
}

impl TableDisplay for ScenarioDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "Title", "Tags", "Steps", "Expectations"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.title.clone(),
            self.tags.join(", "),
            self.steps.to_string(),
            self.expectations.to_string(),
        ]
    }
}

pub fn execute(args: ListArgs, config: &HarnessConfig, format: OutputFormat) -> Result<bool> {
    let scenarios = Scenario::load_all(&config.scenarios_dir)?;

    let selected: Vec<&Scenario> = match &args.tag {
        Some(tag) => Scenario::filter_by_tag(&scenarios, tag),
        None => scenarios.iter().collect(),
    };

    let rows: Vec<ScenarioDisplay> = selected.into_iter().map(ScenarioDisplay::from).collect();
    print_list(&rows, format);
    Ok(true)
}
