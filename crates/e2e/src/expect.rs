//! Expectation evaluation against rendered page state
//!
//! Evaluation only reads: it resolves locators, queries visibility, enabled
//! state and text, and never dispatches input. A locator that cannot be found
//! is a failed verdict, not an error, so alternative end states (`any_of`) can
//! be expressed with elements that are legitimately absent.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::Timeouts;
use crate::error::E2eResult;
use crate::locator::{self, Locator};
use crate::session::BrowsingSession;
use crate::spec::Expectation;
use crate::wait::Deadline;

/// Outcome of one expectation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub passed: bool,
    /// Why the expectation failed; empty when it passed
    pub diagnostic: String,
}

impl Verdict {
    pub fn pass() -> Self {
        Self { passed: true, diagnostic: String::new() }
    }

    pub fn fail(diagnostic: impl Into<String>) -> Self {
        Self { passed: false, diagnostic: diagnostic.into() }
    }
}

pub struct Evaluator<'a> {
    timeouts: &'a Timeouts,
}

impl<'a> Evaluator<'a> {
    pub fn new(timeouts: &'a Timeouts) -> Self {
        Self { timeouts }
    }

    /// Re-evaluate until the expectation passes or `timeout` elapses; the
    /// last verdict is returned either way.
    pub async fn evaluate(
        &self,
        session: &mut BrowsingSession,
        expectation: &Expectation,
        timeout: Duration,
    ) -> E2eResult<Verdict> {
        let deadline = Deadline::after(timeout);
        let mut frame_ready = Some(self.timeouts.frame_ready().min(timeout));

        loop {
            let verdict = self.evaluate_once(session, expectation, frame_ready.take()).await?;
            if verdict.passed || !deadline.pause(self.timeouts.poll_interval()).await {
                return Ok(verdict);
            }
        }
    }

    /// A single evaluation against the page as it is right now
    pub fn evaluate_once<'s>(
        &'s self,
        session: &'s mut BrowsingSession,
        expectation: &'s Expectation,
        frame_ready: Option<Duration>,
    ) -> BoxFuture<'s, E2eResult<Verdict>> {
        async move {
            match expectation {
                Expectation::Visible { locator } => self.check_visible(session, locator, frame_ready).await,
                Expectation::TextContains { locator, text, ignore_case } => {
                    self.check_text(session, locator, text, *ignore_case, frame_ready).await
                }
                Expectation::Enabled { locator } => self.check_enabled(session, locator, frame_ready).await,
                Expectation::AnyOf(children) => {
                    let mut failures = Vec::with_capacity(children.len());
                    for child in children {
                        let verdict = self.evaluate_once(session, child, frame_ready).await?;
                        if verdict.passed {
                            return Ok(Verdict::pass());
                        }
                        failures.push(verdict.diagnostic);
                    }
                    Ok(Verdict::fail(format!("none of the alternatives held: {}", failures.join("; "))))
                }
            }
        }
        .boxed()
    }

    async fn check_visible(
        &self,
        session: &mut BrowsingSession,
        locator: &Locator,
        frame_ready: Option<Duration>,
    ) -> E2eResult<Verdict> {
        let Some(element) = locator::probe(session, locator, frame_ready).await? else {
            return Ok(Verdict::fail(format!("{} not found", locator)));
        };
        if session.driver()?.is_visible(&element).await? {
            Ok(Verdict::pass())
        } else {
            Ok(Verdict::fail(format!("{} is present but not visible", locator)))
        }
    }

    async fn check_text(
        &self,
        session: &mut BrowsingSession,
        locator: &Locator,
        needle: &str,
        ignore_case: bool,
        frame_ready: Option<Duration>,
    ) -> E2eResult<Verdict> {
        let Some(element) = locator::probe(session, locator, frame_ready).await? else {
            return Ok(Verdict::fail(format!("{} not found", locator)));
        };

        let timeout = Duration::from_millis(self.timeouts.action_ms);
        let text = session.driver()?.inner_text(&element, timeout).await?;

        if text_contains(&text, needle, ignore_case) {
            Ok(Verdict::pass())
        } else {
            Ok(Verdict::fail(format!(
                "{} text {:?} does not contain {:?}",
                locator,
                truncate(&text, 120),
                needle
            )))
        }
    }

    async fn check_enabled(
        &self,
        session: &mut BrowsingSession,
        locator: &Locator,
        frame_ready: Option<Duration>,
    ) -> E2eResult<Verdict> {
        let Some(element) = locator::probe(session, locator, frame_ready).await? else {
            return Ok(Verdict::fail(format!("{} not found", locator)));
        };

        let timeout = Duration::from_millis(self.timeouts.action_ms);
        if session.driver()?.is_enabled(&element, timeout).await? {
            Ok(Verdict::pass())
        } else {
            Ok(Verdict::fail(format!("{} is disabled", locator)))
        }
    }
}

/// Substring containment; case-sensitive unless asked otherwise, in which
/// case both operands are lower-cased.
pub fn text_contains(haystack: &str, needle: &str, ignore_case: bool) -> bool {
    if ignore_case {
        haystack.to_lowercase().contains(&needle.to_lowercase())
    } else {
        haystack.contains(needle)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}…", cut)
}
