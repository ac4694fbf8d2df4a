//! Scenario runner: session per scenario, steps, expectations, verdict

use chrono::Utc;
use futures::{FutureExt, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::HarnessConfig;
use crate::driver::BrowserLauncher;
use crate::error::{E2eError, E2eResult};
use crate::executor::{ExecutionTrace, Halt, StepExecutor};
use crate::expect::{Evaluator, Verdict};
use crate::playwright::PlaywrightLauncher;
use crate::report::{Diagnostic, Phase, Report, ScenarioResult, ScenarioVerdict};
use crate::session::{BrowsingSession, SessionManager, SessionOutcome};
use crate::spec::Scenario;
use crate::target::AppServer;

/// What ran inside the session
struct ScenarioBody {
    trace: ExecutionTrace,
    /// Scenario-level expectation verdicts, by index
    verdicts: Vec<(usize, Verdict)>,
    /// A driver fault during expectation evaluation
    fault: Option<(usize, E2eError)>,
}

pub struct ScenarioRunner {
    config: Arc<HarnessConfig>,
    sessions: SessionManager,
    server: Option<AppServer>,
}

impl ScenarioRunner {
    pub fn new(config: HarnessConfig, launcher: Arc<dyn BrowserLauncher>) -> Self {
        let sessions = SessionManager::new(launcher, config.launch_options());
        Self {
            config: Arc::new(config),
            sessions,
            server: None,
        }
    }

    /// A runner driving real browsers through Playwright
    pub fn with_playwright(config: HarnessConfig) -> Self {
        let launcher = Arc::new(PlaywrightLauncher::from_config(&config));
        Self::new(config, launcher)
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Make sure the app under test answers, starting it first if a command
    /// is configured
    pub async fn prepare_target(&mut self) -> E2eResult<()> {
        if self.server.is_some() {
            return Ok(());
        }
        if !self.config.target.command.is_empty() {
            self.server = Some(AppServer::start(&self.config).await?);
            return Ok(());
        }
        crate::target::probe(&self.config).await
    }

    pub fn stop_target(&mut self) {
        if let Some(mut server) = self.server.take() {
            server.stop();
        }
    }

    /// Load every scenario under the configured directory
    pub fn load_scenarios(&self) -> E2eResult<Vec<Scenario>> {
        Scenario::load_all(&self.config.scenarios_dir)
    }

    /// Pick scenarios by name and tag. Unknown names are an error; an empty
    /// name list selects everything.
    pub fn select(scenarios: Vec<Scenario>, names: &[String], tag: Option<&str>) -> E2eResult<Vec<Scenario>> {
        for name in names {
            if !scenarios.iter().any(|s| &s.name == name) {
                return Err(E2eError::SpecParse(format!("Scenario not found: {}", name)));
            }
        }

        Ok(scenarios
            .into_iter()
            .filter(|s| names.is_empty() || names.contains(&s.name))
            .filter(|s| tag.map_or(true, |tag| s.tags.iter().any(|t| t == tag)))
            .collect())
    }

    /// Run scenarios and collect a report. Results keep the input order even
    /// when several scenarios run at once.
    pub async fn run(&self, scenarios: &[Scenario]) -> Report {
        let started_at = Utc::now();
        let start = Instant::now();
        let jobs = self.config.jobs.max(1);

        info!("Running {} scenario(s) with {} job(s)...", scenarios.len(), jobs);

        let results: Vec<ScenarioResult> = futures::stream::iter(scenarios)
            .map(|scenario| self.run_scenario(scenario))
            .buffered(jobs)
            .collect()
            .await;

        let report = Report::new(started_at, start.elapsed().as_millis() as u64, results);
        let s = &report.summary;
        info!(
            "Scenario results: {} passed, {} failed, {} errored, {} incomplete ({} ms)",
            s.passed, s.failed, s.errored, s.incomplete, report.duration_ms
        );
        report
    }

    /// Run one scenario in a fresh session. Never fails: every outcome,
    /// including a launch failure or a panic, becomes a verdict.
    pub async fn run_scenario(&self, scenario: &Scenario) -> ScenarioResult {
        let span = info_span!("scenario", name = %scenario.name);
        self.run_scenario_inner(scenario).instrument(span).await
    }

    async fn run_scenario_inner(&self, scenario: &Scenario) -> ScenarioResult {
        let start = Instant::now();
        debug!("Running scenario: {}", scenario.display_title());

        let config = Arc::clone(&self.config);
        let owned = scenario.clone().with_default_timeouts(&config.timeouts);
        let scoped = self
            .sessions
            .with_session(scenario.viewport, move |session| {
                async move { run_body(&config, session, &owned).await }.boxed()
            })
            .await;

        let mut lifecycle = vec![Phase::NotStarted];
        let mut diagnostics = Vec::new();
        let mut steps = Vec::new();

        let verdict = match scoped.outcome {
            SessionOutcome::LaunchFailed(e) => {
                diagnostics.push(Diagnostic {
                    step_index: None,
                    expectation_index: None,
                    kind: e.kind().to_string(),
                    location: "session".to_string(),
                    message: e.to_string(),
                });
                ScenarioVerdict::Errored
            }
            SessionOutcome::SetupFailed(e) => {
                lifecycle.push(Phase::SessionAcquired);
                diagnostics.push(Diagnostic {
                    step_index: None,
                    expectation_index: None,
                    kind: e.kind().to_string(),
                    location: "session".to_string(),
                    message: e.to_string(),
                });
                ScenarioVerdict::Errored
            }
            SessionOutcome::Panicked(message) => {
                lifecycle.extend([Phase::SessionAcquired, Phase::Running]);
                diagnostics.push(Diagnostic {
                    step_index: None,
                    expectation_index: None,
                    kind: "panic".to_string(),
                    location: "scenario".to_string(),
                    message,
                });
                ScenarioVerdict::Errored
            }
            SessionOutcome::Completed(body) => {
                lifecycle.extend([Phase::SessionAcquired, Phase::Running]);
                let verdict = judge(scenario, &body, &mut diagnostics);
                steps = body.trace.records;
                verdict
            }
        };

        lifecycle.push(verdict.into());

        if let Err(e) = scoped.release {
            warn!("Teardown failed: {}", e);
            diagnostics.push(Diagnostic {
                step_index: None,
                expectation_index: None,
                kind: "teardown".to_string(),
                location: "session".to_string(),
                message: e.to_string(),
            });
        }
        lifecycle.push(Phase::SessionReleased);

        let result = ScenarioResult {
            name: scenario.name.clone(),
            title: scenario.display_title().to_string(),
            verdict,
            duration_ms: start.elapsed().as_millis() as u64,
            steps,
            diagnostics,
            lifecycle,
        };

        match result.verdict {
            ScenarioVerdict::Passed => info!("✓ {} ({} ms)", result.name, result.duration_ms),
            verdict => error!(
                "✗ {} [{}] - {}",
                result.name,
                verdict,
                result
                    .first_failure()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "no diagnostic".to_string())
            ),
        }

        result
    }
}

async fn run_body(config: &HarnessConfig, session: &mut BrowsingSession, scenario: &Scenario) -> ScenarioBody {
    let trace = StepExecutor::new(config).execute(session, &scenario.steps).await;
    let mut body = ScenarioBody {
        trace,
        verdicts: Vec::new(),
        fault: None,
    };

    if body.trace.halt.is_some() {
        return body;
    }

    // Evaluation only reads the page, so every expectation is checked and
    // reported even after one fails.
    session.sync_pages();
    let evaluator = Evaluator::new(&config.timeouts);
    for (index, expectation) in scenario.expectations.iter().enumerate() {
        match evaluator.evaluate(session, expectation, config.timeouts.expectation()).await {
            Ok(verdict) => body.verdicts.push((index, verdict)),
            Err(e) => {
                body.fault = Some((index, e));
                break;
            }
        }
    }

    body
}

/// Derive the verdict from what ran. The diagnostic that decided the verdict
/// comes first.
fn judge(scenario: &Scenario, body: &ScenarioBody, diagnostics: &mut Vec<Diagnostic>) -> ScenarioVerdict {
    if let Some(halt) = &body.trace.halt {
        let index = halt.step_index();
        let location = scenario.steps.get(index).map(|s| s.name()).unwrap_or_default();
        let (verdict, kind, message) = match halt {
            Halt::Errored { error, .. } => (ScenarioVerdict::Errored, error.kind().to_string(), error.to_string()),
            Halt::Failed { verdict, .. } => (
                ScenarioVerdict::Failed,
                "expectation_failed".to_string(),
                verdict.diagnostic.clone(),
            ),
            Halt::Incomplete { reason, .. } => (ScenarioVerdict::Incomplete, "incomplete".to_string(), reason.clone()),
        };
        diagnostics.push(Diagnostic {
            step_index: Some(index),
            expectation_index: None,
            kind,
            location,
            message,
        });
        return verdict;
    }

    let describe = |index: usize| {
        scenario
            .expectations
            .get(index)
            .map(|e| e.describe())
            .unwrap_or_default()
    };

    let mut verdict = ScenarioVerdict::Passed;

    // A harness fault outranks an ordinary mismatch and leads the diagnostics.
    if let Some((index, error)) = &body.fault {
        diagnostics.push(Diagnostic {
            step_index: None,
            expectation_index: Some(*index),
            kind: error.kind().to_string(),
            location: describe(*index),
            message: error.to_string(),
        });
        verdict = ScenarioVerdict::Errored;
    }

    for (index, result) in body.verdicts.iter().filter(|(_, v)| !v.passed) {
        diagnostics.push(Diagnostic {
            step_index: None,
            expectation_index: Some(*index),
            kind: "expectation_failed".to_string(),
            location: describe(*index),
            message: result.diagnostic.clone(),
        });
        if verdict == ScenarioVerdict::Passed {
            verdict = ScenarioVerdict::Failed;
        }
    }

    verdict
}

impl Drop for ScenarioRunner {
    fn drop(&mut self) {
        self.stop_target();
    }
}
