//! Declarative YAML scenario definitions

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::config::Timeouts;
use crate::driver::{ElementState, LoadState};
use crate::error::{E2eError, E2eResult};
use crate::locator::Locator;

/// One complete user flow: ordered steps plus the expectations checked after them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name for this scenario
    pub name: String,

    /// Human-readable title
    #[serde(default)]
    pub title: String,

    /// Tags for filtering scenarios
    #[serde(default)]
    pub tags: Vec<String>,

    /// Viewport override for this scenario's session
    #[serde(default)]
    pub viewport: Option<Viewport>,

    /// Steps to execute in order
    pub steps: Vec<Step>,

    /// Expectations evaluated once every step has run
    #[serde(default)]
    pub expectations: Vec<Expectation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Viewport { width: 1280, height: 720 }
    }
}

/// A single interaction step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Navigate to a URL (relative to the base URL unless absolute)
    Navigate {
        url: String,
        #[serde(default)]
        wait_until: LoadState,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Fill an input field
    Fill {
        locator: Locator,
        value: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Click an element
    Click {
        locator: Locator,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Wait for the page, every frame, or an element to reach a state
    WaitFor {
        target: WaitTarget,
        state: WaitState,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        tolerate_failure: bool,
    },

    /// Scroll with the mouse wheel
    Scroll {
        #[serde(default)]
        delta_x: f64,
        #[serde(default)]
        delta_y: f64,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Wait for a fixed amount of time (use sparingly)
    Sleep { ms: u64 },

    /// Reload the current page
    Reload {
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Resize the current page's viewport
    SetViewport {
        width: u32,
        height: u32,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Check an expectation mid-flow; a failure ends the scenario
    Expect {
        expectation: Expectation,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Marks a scenario whose authoring was never finished
    Incomplete {
        #[serde(default)]
        reason: String,
    },
}

/// `page`, `frames`, or `element: <locator>`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "WaitTargetDef", into = "WaitTargetDef")]
pub enum WaitTarget {
    Page,
    Frames,
    Element(Locator),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum WaitTargetDef {
    Named(String),
    Element { element: Locator },
}

impl TryFrom<WaitTargetDef> for WaitTarget {
    type Error = E2eError;

    fn try_from(def: WaitTargetDef) -> Result<Self, Self::Error> {
        match def {
            WaitTargetDef::Named(name) => match name.as_str() {
                "page" => Ok(WaitTarget::Page),
                "frames" => Ok(WaitTarget::Frames),
                other => Err(E2eError::SpecParse(format!(
                    "unknown wait target `{}`; expected page, frames or element",
                    other
                ))),
            },
            WaitTargetDef::Element { element } => Ok(WaitTarget::Element(element)),
        }
    }
}

impl From<WaitTarget> for WaitTargetDef {
    fn from(target: WaitTarget) -> Self {
        match target {
            WaitTarget::Page => WaitTargetDef::Named("page".to_string()),
            WaitTarget::Frames => WaitTargetDef::Named("frames".to_string()),
            WaitTarget::Element(element) => WaitTargetDef::Element { element },
        }
    }
}

/// Either a document load state or an element state, depending on the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WaitState {
    Load(LoadState),
    Element(ElementState),
}

/// A declarative check against rendered page state.
///
/// On disk each expectation is a map with a single key naming its kind,
/// e.g. `visible: {locator: text=Log Out}` or `any_of: [...]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ExpectationDef", into = "ExpectationDef")]
pub enum Expectation {
    Visible {
        locator: Locator,
    },
    TextContains {
        locator: Locator,
        text: String,
        ignore_case: bool,
    },
    Enabled {
        locator: Locator,
    },
    AnyOf(Vec<Expectation>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct LocatorArgs {
    locator: Locator,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TextContainsArgs {
    locator: Locator,
    text: String,
    #[serde(default, skip_serializing_if = "is_false")]
    ignore_case: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExpectationDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    visible: Option<LocatorArgs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text_contains: Option<TextContainsArgs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enabled: Option<LocatorArgs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    any_of: Option<Vec<Expectation>>,
}

impl TryFrom<ExpectationDef> for Expectation {
    type Error = E2eError;

    fn try_from(def: ExpectationDef) -> Result<Self, Self::Error> {
        let mut kinds = Vec::new();
        if let Some(args) = def.visible {
            kinds.push(Expectation::Visible { locator: args.locator });
        }
        if let Some(args) = def.text_contains {
            kinds.push(Expectation::TextContains {
                locator: args.locator,
                text: args.text,
                ignore_case: args.ignore_case,
            });
        }
        if let Some(args) = def.enabled {
            kinds.push(Expectation::Enabled { locator: args.locator });
        }
        if let Some(children) = def.any_of {
            kinds.push(Expectation::AnyOf(children));
        }

        if kinds.len() != 1 {
            return Err(E2eError::SpecParse(format!(
                "expectation must name exactly one of visible, text_contains, enabled, any_of; found {}",
                kinds.len()
            )));
        }
        Ok(kinds.remove(0))
    }
}

impl From<Expectation> for ExpectationDef {
    fn from(expectation: Expectation) -> Self {
        let mut def = ExpectationDef::default();
        match expectation {
            Expectation::Visible { locator } => def.visible = Some(LocatorArgs { locator }),
            Expectation::TextContains { locator, text, ignore_case } => {
                def.text_contains = Some(TextContainsArgs { locator, text, ignore_case })
            }
            Expectation::Enabled { locator } => def.enabled = Some(LocatorArgs { locator }),
            Expectation::AnyOf(children) => def.any_of = Some(children),
        }
        def
    }
}

impl Step {
    /// Short label used in traces and reports
    pub fn name(&self) -> String {
        match self {
            Step::Navigate { url, .. } => format!("navigate:{}", url),
            Step::Fill { locator, .. } => format!("fill:{}", locator),
            Step::Click { locator, .. } => format!("click:{}", locator),
            Step::WaitFor { target, state, .. } => match target {
                WaitTarget::Page => format!("wait_for:page:{}", state),
                WaitTarget::Frames => format!("wait_for:frames:{}", state),
                WaitTarget::Element(locator) => format!("wait_for:{}:{}", locator, state),
            },
            Step::Scroll { delta_x, delta_y, .. } => format!("scroll:{},{}", delta_x, delta_y),
            Step::Sleep { ms } => format!("sleep:{}ms", ms),
            Step::Reload { .. } => "reload".to_string(),
            Step::SetViewport { width, height, .. } => format!("set_viewport:{}x{}", width, height),
            Step::Expect { expectation, .. } => format!("expect:{}", expectation.describe()),
            Step::Incomplete { .. } => "incomplete".to_string(),
        }
    }

    /// Explicit timeout carried by the step; `None` only for `sleep` and `incomplete`
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms().map(Duration::from_millis)
    }

    fn timeout_ms(&self) -> Option<u64> {
        match self {
            Step::Navigate { timeout_ms, .. }
            | Step::Fill { timeout_ms, .. }
            | Step::Click { timeout_ms, .. }
            | Step::WaitFor { timeout_ms, .. }
            | Step::Scroll { timeout_ms, .. }
            | Step::Reload { timeout_ms }
            | Step::SetViewport { timeout_ms, .. }
            | Step::Expect { timeout_ms, .. } => *timeout_ms,
            Step::Sleep { .. } | Step::Incomplete { .. } => None,
        }
    }

    fn default_timeout(&mut self, timeouts: &Timeouts) {
        let (slot, default) = match self {
            Step::Navigate { timeout_ms, .. } | Step::Reload { timeout_ms } => {
                (timeout_ms, timeouts.navigation_ms)
            }
            Step::Fill { timeout_ms, .. }
            | Step::Click { timeout_ms, .. }
            | Step::WaitFor { timeout_ms, .. }
            | Step::Scroll { timeout_ms, .. }
            | Step::SetViewport { timeout_ms, .. } => (timeout_ms, timeouts.action_ms),
            Step::Expect { timeout_ms, .. } => (timeout_ms, timeouts.expectation_ms),
            Step::Sleep { .. } | Step::Incomplete { .. } => return,
        };
        slot.get_or_insert(default);
    }

    /// Whether a timeout on this step is recoverable
    pub fn is_tolerant(&self) -> bool {
        matches!(self, Step::WaitFor { tolerate_failure: true, .. })
    }

    /// Interactive steps get the settle delay before they run
    pub fn is_interactive(&self) -> bool {
        matches!(self, Step::Fill { .. } | Step::Click { .. })
    }
}

impl std::fmt::Display for WaitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitState::Load(state) => write!(f, "{}", state),
            WaitState::Element(state) => write!(f, "{}", state),
        }
    }
}

impl From<LoadState> for WaitState {
    fn from(state: LoadState) -> Self {
        WaitState::Load(state)
    }
}

impl From<ElementState> for WaitState {
    fn from(state: ElementState) -> Self {
        WaitState::Element(state)
    }
}

impl Expectation {
    /// One-line description for diagnostics
    pub fn describe(&self) -> String {
        match self {
            Expectation::Visible { locator } => format!("visible({})", locator),
            Expectation::TextContains { locator, text, ignore_case } => {
                let suffix = if *ignore_case { ", ignore_case" } else { "" };
                format!("text_contains({}, {:?}{})", locator, text, suffix)
            }
            Expectation::Enabled { locator } => format!("enabled({})", locator),
            Expectation::AnyOf(children) => {
                let inner: Vec<String> = children.iter().map(Expectation::describe).collect();
                format!("any_of[{}]", inner.join(" | "))
            }
        }
    }
}

impl Scenario {
    /// Parse a scenario from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let scenario: Self = serde_yaml::from_str(yaml)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))
    }

    /// Load every scenario under a directory, ordered by file path
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        if !dir.is_dir() {
            return Err(E2eError::SpecParse(format!(
                "scenario directory not found: {}",
                dir.display()
            )));
        }

        let mut scenarios = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            scenarios.push(Self::from_file(entry.path())?);
        }

        let mut seen = std::collections::HashSet::new();
        for scenario in &scenarios {
            if !seen.insert(scenario.name.as_str()) {
                return Err(E2eError::SpecParse(format!(
                    "duplicate scenario name: {}",
                    scenario.name
                )));
            }
        }

        Ok(scenarios)
    }

    /// Filter scenarios by tag
    pub fn filter_by_tag<'a>(scenarios: &'a [Self], tag: &str) -> Vec<&'a Self> {
        scenarios.iter().filter(|s| s.tags.iter().any(|t| t == tag)).collect()
    }

    /// Fill every missing step timeout from the configured defaults
    pub fn with_default_timeouts(mut self, timeouts: &Timeouts) -> Self {
        for step in &mut self.steps {
            step.default_timeout(timeouts);
        }
        self
    }

    /// Display title, falling back to the name
    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            &self.name
        } else {
            &self.title
        }
    }

    /// Check structural rules the type system does not capture
    pub fn validate(&self) -> E2eResult<()> {
        if self.name.trim().is_empty() {
            return Err(E2eError::SpecParse("scenario name must not be empty".into()));
        }
        if self.steps.is_empty() {
            return Err(E2eError::SpecParse(format!("{}: no steps", self.name)));
        }

        for (index, step) in self.steps.iter().enumerate() {
            let invalid = |reason: String| {
                E2eError::SpecParse(format!("{} step {} ({}): {}", self.name, index, step.name(), reason))
            };

            match step {
                Step::WaitFor { target, state, .. } => match (target, state) {
                    (WaitTarget::Page | WaitTarget::Frames, WaitState::Element(_)) => {
                        return Err(invalid("page and frame waits need a load state".into()));
                    }
                    (WaitTarget::Element(_), WaitState::Load(_)) => {
                        return Err(invalid("element waits need an element state".into()));
                    }
                    _ => {}
                },
                Step::SetViewport { width, height, .. } if *width == 0 || *height == 0 => {
                    return Err(invalid("viewport dimensions must be non-zero".into()));
                }
                Step::Expect { expectation, .. } => validate_expectation(expectation).map_err(invalid)?,
                _ => {}
            }

            if step.timeout_ms() == Some(0) {
                return Err(invalid("timeout must be greater than zero".into()));
            }
        }

        for expectation in &self.expectations {
            validate_expectation(expectation)
                .map_err(|reason| E2eError::SpecParse(format!("{}: {}", self.name, reason)))?;
        }

        Ok(())
    }
}

fn validate_expectation(expectation: &Expectation) -> Result<(), String> {
    match expectation {
        Expectation::AnyOf(children) if children.is_empty() => {
            Err("any_of needs at least one expectation".into())
        }
        Expectation::AnyOf(children) => children.iter().try_for_each(validate_expectation),
        _ => Ok(()),
    }
}
