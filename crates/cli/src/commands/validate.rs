//! Validate Command

use anyhow::Result;
use serde::Serialize;

use trackprobe_e2e::spec::WaitTarget;
use trackprobe_e2e::{Expectation, HarnessConfig, Locator, Scenario, Step};

use crate::output::{print_list, print_success, print_warning, OutputFormat, TableDisplay};

#[derive(Serialize)]
pub struct ValidationDisplay {
    pub name: String,
    pub steps: usize,
    pub expectations: usize,
    pub locators: usize,
    /// Locators tied to page structure rather than role, label or text
    pub structural: usize,
}

impl TableDisplay for ValidationDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "Steps", "Expectations", "Locators", "Structural"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.steps.to_string(),
            self.expectations.to_string(),
            self.locators.to_string(),
            self.structural.to_string(),
        ]
    }
}

fn expectation_locators<'a>(expectation: &'a Expectation, out: &mut Vec<&'a Locator>) {
    match expectation {
        Expectation::Visible { locator }
        | Expectation::TextContains { locator, .. }
        | Expectation::Enabled { locator } => out.push(locator),
        Expectation::AnyOf(children) => {
            for child in children {
                expectation_locators(child, out);
            }
        }
    }
}

fn locators(scenario: &Scenario) -> Vec<&Locator> {
    let mut out = Vec::new();
    for step in &scenario.steps {
        match step {
            Step::Fill { locator, .. } | Step::Click { locator, .. } => out.push(locator),
            Step::WaitFor {
                target: WaitTarget::Element(locator),
                ..
            } => out.push(locator),
            Step::Expect { expectation, .. } => expectation_locators(expectation, &mut out),
            _ => {}
        }
    }
    for expectation in &scenario.expectations {
        expectation_locators(expectation, &mut out);
    }
    out
}

pub fn execute(config: &HarnessConfig, format: OutputFormat) -> Result<bool> {
    config.validate()?;
    let scenarios = Scenario::load_all(&config.scenarios_dir)?;

    let rows: Vec<ValidationDisplay> = scenarios
        .iter()
        .map(|scenario| {
            let all = locators(scenario);
            ValidationDisplay {
                name: scenario.name.clone(),
                steps: scenario.steps.len(),
                expectations: scenario.expectations.len(),
                locators: all.len(),
                structural: all.iter().filter(|l| !l.target.is_semantic()).count(),
            }
        })
        .collect();

    print_list(&rows, format);

    if let OutputFormat::Json = format {
        return Ok(true);
    }

    let structural: usize = rows.iter().map(|r| r.structural).sum();
    if structural > 0 {
        print_warning(&format!(
            "{} locator(s) depend on page structure; prefer role, label or test id",
            structural
        ));
    }
    print_success(&format!(
        "{} scenario(s) valid in {}",
        scenarios.len(),
        config.scenarios_dir.display()
    ));
    Ok(true)
}
