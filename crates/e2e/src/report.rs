//! Run results and the summary report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use crate::error::E2eResult;
use crate::executor::StepRecord;

/// Terminal status of one scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioVerdict {
    Passed,
    /// The app ran but did not match an expectation
    Failed,
    /// The harness could not drive the app (launch, locator, timeout, fault)
    Errored,
    /// The scenario ends in a placeholder rather than a real check
    Incomplete,
}

impl ScenarioVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioVerdict::Passed => "passed",
            ScenarioVerdict::Failed => "failed",
            ScenarioVerdict::Errored => "errored",
            ScenarioVerdict::Incomplete => "incomplete",
        }
    }
}

impl std::fmt::Display for ScenarioVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-scenario lifecycle states, recorded in the order they were entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    NotStarted,
    SessionAcquired,
    Running,
    Passed,
    Failed,
    Errored,
    Incomplete,
    SessionReleased,
}

impl From<ScenarioVerdict> for Phase {
    fn from(verdict: ScenarioVerdict) -> Self {
        match verdict {
            ScenarioVerdict::Passed => Phase::Passed,
            ScenarioVerdict::Failed => Phase::Failed,
            ScenarioVerdict::Errored => Phase::Errored,
            ScenarioVerdict::Incomplete => Phase::Incomplete,
        }
    }
}

/// Where a scenario went wrong and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expectation_index: Option<usize>,
    pub kind: String,
    /// Step name or expectation description
    pub location: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.step_index, self.expectation_index) {
            (Some(step), _) => write!(f, "step {} ({}): {}", step, self.location, self.message),
            (None, Some(expectation)) => {
                write!(f, "expectation {} ({}): {}", expectation, self.location, self.message)
            }
            (None, None) => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub title: String,
    pub verdict: ScenarioVerdict,
    pub duration_ms: u64,
    pub steps: Vec<StepRecord>,
    pub diagnostics: Vec<Diagnostic>,
    pub lifecycle: Vec<Phase>,
}

impl ScenarioResult {
    pub fn passed(&self) -> bool {
        self.verdict == ScenarioVerdict::Passed
    }

    /// The diagnostic that decided a non-passing verdict
    pub fn first_failure(&self) -> Option<&Diagnostic> {
        if self.passed() {
            return None;
        }
        self.diagnostics.first()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub incomplete: usize,
}

impl Summary {
    pub fn from_results(results: &[ScenarioResult]) -> Self {
        let mut summary = Summary { total: results.len(), ..Default::default() };
        for result in results {
            match result.verdict {
                ScenarioVerdict::Passed => summary.passed += 1,
                ScenarioVerdict::Failed => summary.failed += 1,
                ScenarioVerdict::Errored => summary.errored += 1,
                ScenarioVerdict::Incomplete => summary.incomplete += 1,
            }
        }
        summary
    }
}

/// Result of running a set of scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub summary: Summary,
    pub results: Vec<ScenarioResult>,
}

impl Report {
    pub fn new(started_at: DateTime<Utc>, duration_ms: u64, results: Vec<ScenarioResult>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            duration_ms,
            summary: Summary::from_results(&results),
            results,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.summary.passed == self.summary.total
    }

    pub fn result(&self, name: &str) -> Option<&ScenarioResult> {
        self.results.iter().find(|r| r.name == name)
    }

    /// Human-readable summary: counts, then the first failure of every
    /// scenario that did not pass.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let s = &self.summary;
        let _ = writeln!(
            out,
            "{} scenario(s): {} passed, {} failed, {} errored, {} incomplete ({} ms)",
            s.total, s.passed, s.failed, s.errored, s.incomplete, self.duration_ms
        );

        for result in self.results.iter().filter(|r| !r.passed()) {
            let _ = write!(out, "  {} [{}]", result.name, result.verdict);
            match result.first_failure() {
                Some(diagnostic) => {
                    let _ = writeln!(out, " {}", diagnostic);
                }
                None => {
                    let _ = writeln!(out);
                }
            }
        }

        out
    }

    /// Write the report as pretty JSON to `<dir>/results.json`
    pub fn write_json(&self, dir: &Path) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(dir)?;

        let path = dir.join("results.json");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}
