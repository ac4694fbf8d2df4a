//! Sequential step execution
//!
//! Steps run strictly in order against the session's current page. A failed
//! non-tolerant step halts execution: later steps assume DOM state that no
//! longer holds. Tolerant waits record their timeout and move on.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::HarnessConfig;
use crate::driver::ElementState;
use crate::error::{E2eError, E2eResult};
use crate::expect::{Evaluator, Verdict};
use crate::locator::{self, Locator};
use crate::session::BrowsingSession;
use crate::spec::{Step, Viewport, WaitState, WaitTarget};
use crate::wait::Deadline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    /// Timed out on a tolerant wait; execution continued
    Tolerated,
    Failed,
    Errored,
    Incomplete,
}

/// Result of executing a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub step_name: String,
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Why execution stopped before the last step
#[derive(Debug)]
pub enum Halt {
    /// Infrastructure or locator failure
    Errored { step_index: usize, error: E2eError },
    /// An interleaved expectation did not hold
    Failed { step_index: usize, verdict: Verdict },
    /// The scenario was never finished
    Incomplete { step_index: usize, reason: String },
}

impl Halt {
    pub fn step_index(&self) -> usize {
        match self {
            Halt::Errored { step_index, .. }
            | Halt::Failed { step_index, .. }
            | Halt::Incomplete { step_index, .. } => *step_index,
        }
    }
}

#[derive(Debug, Default)]
pub struct ExecutionTrace {
    pub records: Vec<StepRecord>,
    pub halt: Option<Halt>,
}

enum StepOutcome {
    Done,
    Tolerated(E2eError),
    Failed(Verdict),
    Incomplete(String),
}

pub struct StepExecutor<'a> {
    config: &'a HarnessConfig,
}

impl<'a> StepExecutor<'a> {
    pub fn new(config: &'a HarnessConfig) -> Self {
        Self { config }
    }

    /// Run `steps` in order, stopping at the first fatal failure
    pub async fn execute(&self, session: &mut BrowsingSession, steps: &[Step]) -> ExecutionTrace {
        let mut trace = ExecutionTrace::default();

        for (index, step) in steps.iter().enumerate() {
            let start = Instant::now();
            let step_name = step.name();
            session.sync_pages();
            debug!(step = index, "Executing step: {}", step_name);

            let outcome = self.execute_step(session, step).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let mut record = StepRecord {
                index,
                step_name,
                status: StepStatus::Ok,
                duration_ms,
                detail: None,
            };

            let halt = match outcome {
                Ok(StepOutcome::Done) => None,
                Ok(StepOutcome::Tolerated(e)) => {
                    warn!(step = index, "Tolerated: {}", e);
                    record.status = StepStatus::Tolerated;
                    record.detail = Some(e.to_string());
                    None
                }
                Ok(StepOutcome::Failed(verdict)) => {
                    record.status = StepStatus::Failed;
                    record.detail = Some(verdict.diagnostic.clone());
                    Some(Halt::Failed { step_index: index, verdict })
                }
                Ok(StepOutcome::Incomplete(reason)) => {
                    record.status = StepStatus::Incomplete;
                    record.detail = Some(reason.clone());
                    Some(Halt::Incomplete { step_index: index, reason })
                }
                Err(error) => {
                    record.status = StepStatus::Errored;
                    record.detail = Some(error.to_string());
                    Some(Halt::Errored { step_index: index, error })
                }
            };

            trace.records.push(record);
            if let Some(halt) = halt {
                info!(step = index, "Stopping after step {}", index);
                trace.halt = Some(halt);
                break;
            }
        }

        trace
    }

    async fn execute_step(&self, session: &mut BrowsingSession, step: &Step) -> E2eResult<StepOutcome> {
        let timeouts = &self.config.timeouts;
        let bound = step.timeout().unwrap_or(Duration::from_millis(timeouts.action_ms));
        let grace = timeouts.driver_grace();

        if step.is_interactive() && timeouts.settle_ms > 0 {
            tokio::time::sleep(timeouts.settle()).await;
        }

        match step {
            Step::Navigate { url, wait_until, .. } => {
                let url = self.config.resolve_url(url);
                let page = session.current_page();
                let action = format!("navigate {}", url);
                bounded(session.driver()?.goto(page, &url, *wait_until, bound), bound, grace, action).await?;
                Ok(StepOutcome::Done)
            }

            Step::Fill { locator, value, .. } => {
                let deadline = Deadline::after(bound);
                let element = locator::resolve(session, locator, bound, timeouts.resolve_policy()).await?;
                let action = format!("fill {}", locator);
                let remaining = remaining_or_timeout(&deadline, &action, bound)?;
                bounded(session.driver()?.fill(&element, value, remaining), bound, grace, action).await?;
                Ok(StepOutcome::Done)
            }

            Step::Click { locator, .. } => {
                let deadline = Deadline::after(bound);
                let element = locator::resolve(session, locator, bound, timeouts.resolve_policy()).await?;
                let action = format!("click {}", locator);
                let remaining = remaining_or_timeout(&deadline, &action, bound)?;
                bounded(session.driver()?.click(&element, remaining), bound, grace, action).await?;
                Ok(StepOutcome::Done)
            }

            Step::WaitFor { target, state, tolerate_failure, .. } => {
                let result = self.wait_for(session, target, *state, bound, *tolerate_failure).await;
                match result {
                    Ok(None) => Ok(StepOutcome::Done),
                    Ok(Some(transient)) => Ok(StepOutcome::Tolerated(transient)),
                    Err(e) if *tolerate_failure && e.is_transient_load() => Ok(StepOutcome::Tolerated(
                        E2eError::TransientLoadTimeout {
                            what: step.name(),
                            timeout_ms: bound.as_millis() as u64,
                        },
                    )),
                    Err(e) => Err(e),
                }
            }

            Step::Scroll { delta_x, delta_y, .. } => {
                let page = session.current_page();
                let wheel = session.driver()?.mouse_wheel(page, *delta_x, *delta_y, bound);
                bounded(wheel, bound, grace, "scroll".to_string()).await?;
                Ok(StepOutcome::Done)
            }

            Step::Sleep { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Ok(StepOutcome::Done)
            }

            Step::Reload { .. } => {
                let page = session.current_page();
                bounded(session.driver()?.reload(page, bound), bound, grace, "reload".to_string()).await?;
                Ok(StepOutcome::Done)
            }

            Step::SetViewport { width, height, .. } => {
                let viewport = Viewport { width: *width, height: *height };
                let page = session.current_page();
                let action = format!("set viewport {}x{}", width, height);
                bounded(session.driver()?.set_viewport(page, viewport, bound), bound, grace, action).await?;
                session.set_viewport(viewport);
                Ok(StepOutcome::Done)
            }

            Step::Expect { expectation, .. } => {
                let verdict = Evaluator::new(timeouts).evaluate(session, expectation, bound).await?;
                if verdict.passed {
                    Ok(StepOutcome::Done)
                } else {
                    Ok(StepOutcome::Failed(verdict))
                }
            }

            Step::Incomplete { reason } => {
                let reason = if reason.is_empty() {
                    "scenario ends without a real check".to_string()
                } else {
                    reason.clone()
                };
                Ok(StepOutcome::Incomplete(reason))
            }
        }
    }

    /// Returns the first swallowed transient timeout, if any
    async fn wait_for(
        &self,
        session: &mut BrowsingSession,
        target: &WaitTarget,
        state: WaitState,
        bound: Duration,
        tolerant: bool,
    ) -> E2eResult<Option<E2eError>> {
        let page = session.current_page();
        let grace = self.config.timeouts.driver_grace();

        match (target, state) {
            (WaitTarget::Page, WaitState::Load(load)) => {
                let wait = session.driver()?.wait_for_load_state(page, 0, load, bound);
                bounded(wait, bound, grace, format!("page {}", load)).await?;
                Ok(None)
            }

            (WaitTarget::Frames, WaitState::Load(load)) => {
                let deadline = Deadline::after(bound);
                let frames = session.driver()?.frames(page).await?;
                let mut swallowed = None;

                // Frames share the step's bound; once it is spent the
                // remaining frames count as timed out without a driver call.
                for frame in frames {
                    let action = format!("frame {} {}", frame.index, load);
                    let result = match remaining_or_timeout(&deadline, &action, bound) {
                        Ok(remaining) => {
                            let wait = session.driver()?.wait_for_load_state(page, frame.index, load, remaining);
                            bounded(wait, remaining, grace, action).await
                        }
                        Err(e) => Err(e),
                    };
                    match result {
                        Ok(()) => {}
                        Err(e) if tolerant && e.is_transient_load() => {
                            let transient = E2eError::TransientLoadTimeout {
                                what: format!("frame {} ({}) {}", frame.index, frame.url, load),
                                timeout_ms: bound.as_millis() as u64,
                            };
                            warn!("{}", transient);
                            swallowed.get_or_insert(transient);
                        }
                        Err(e) => return Err(e),
                    }
                }

                debug!("Frame readiness checked in {} ms", deadline.elapsed().as_millis());
                Ok(swallowed)
            }

            (WaitTarget::Element(locator), WaitState::Element(element_state)) => {
                self.wait_for_element(session, locator, element_state, bound).await?;
                Ok(None)
            }

            (_, state) => Err(E2eError::SpecParse(format!(
                "wait state {} does not apply to this target",
                state
            ))),
        }
    }

    async fn wait_for_element(
        &self,
        session: &mut BrowsingSession,
        locator: &Locator,
        state: ElementState,
        bound: Duration,
    ) -> E2eResult<()> {
        let timeouts = &self.config.timeouts;
        let deadline = Deadline::after(bound);
        let mut frame_ready = Some(timeouts.frame_ready().min(bound));

        loop {
            let element = locator::probe(session, locator, frame_ready.take()).await?;
            let reached = match (&element, state) {
                (Some(_), ElementState::Attached) => true,
                (None, ElementState::Detached) => true,
                (Some(element), ElementState::Visible) => session.driver()?.is_visible(element).await?,
                (Some(element), ElementState::Hidden) => !session.driver()?.is_visible(element).await?,
                (None, ElementState::Hidden) => true,
                (None, ElementState::Visible | ElementState::Attached) => false,
                (Some(_), ElementState::Detached) => false,
            };

            if reached {
                return Ok(());
            }
            if !deadline.pause(timeouts.poll_interval()).await {
                return Err(match state {
                    ElementState::Visible | ElementState::Attached if element.is_none() => {
                        E2eError::LocatorNotFound {
                            locator: locator.to_string(),
                            timeout_ms: bound.as_millis() as u64,
                        }
                    }
                    _ => E2eError::ActionTimeout {
                        action: format!("wait for {} to be {}", locator, state),
                        timeout_ms: bound.as_millis() as u64,
                    },
                });
            }
        }
    }
}

/// Run a driver call under `bound` plus `grace`, so a driver that never
/// answers still ends the step
async fn bounded<T>(
    call: impl Future<Output = E2eResult<T>>,
    bound: Duration,
    grace: Duration,
    action: String,
) -> E2eResult<T> {
    match tokio::time::timeout(bound + grace, call).await {
        Ok(result) => result.map_err(|e| action_error(e, action, bound)),
        Err(_) => Err(E2eError::ActionTimeout {
            action,
            timeout_ms: bound.as_millis() as u64,
        }),
    }
}

/// Time left for the driver call, or `ActionTimeout` when resolution used it all
fn remaining_or_timeout(deadline: &Deadline, action: &str, bound: Duration) -> E2eResult<Duration> {
    let remaining = deadline.remaining();
    if remaining.is_zero() {
        return Err(E2eError::ActionTimeout {
            action: action.to_string(),
            timeout_ms: bound.as_millis() as u64,
        });
    }
    Ok(remaining)
}

/// Driver timeouts on an action become `ActionTimeout`; other errors pass through
fn action_error(error: E2eError, action: String, bound: Duration) -> E2eError {
    match error {
        E2eError::DriverTimeout { .. } => E2eError::ActionTimeout {
            action,
            timeout_ms: bound.as_millis() as u64,
        },
        other => other,
    }
}
