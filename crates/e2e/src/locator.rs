//! Element locators and their resolution against the live page
//!
//! A [`Locator`] is static data: what to find, in which frame, and which
//! occurrence. Resolution happens fresh at every use because the DOM mutates
//! between steps; nothing here caches handles.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::driver::{ElementHandle, FrameInfo, LoadState};
use crate::error::{E2eError, E2eResult};
use crate::session::BrowsingSession;
use crate::wait::Deadline;

static ROLE_SHORTHAND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^role=([A-Za-z]+)(?:\[name=(?:"([^"]*)"|'([^']*)')\])?$"#)
        .expect("role shorthand pattern is valid")
});

/// What to match inside a frame
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Target {
    #[serde(rename = "xpath")]
    XPath(String),
    Css(String),
    /// Case-insensitive substring match on rendered text
    Text(String),
    /// ARIA role, optionally narrowed by accessible name
    Role { role: String, name: Option<String> },
    Label(String),
    TestId(String),
}

impl Target {
    pub fn xpath(path: impl Into<String>) -> Self {
        Target::XPath(path.into())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Target::Text(text.into())
    }

    pub fn role(role: impl Into<String>, name: impl Into<String>) -> Self {
        Target::Role { role: role.into(), name: Some(name.into()) }
    }

    /// Semantic anchors survive layout changes; structural paths do not.
    pub fn is_semantic(&self) -> bool {
        matches!(self, Target::Role { .. } | Target::Label(_) | Target::TestId(_) | Target::Text(_))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::XPath(path) => write!(f, "xpath={}", path),
            Target::Css(css) => write!(f, "css={}", css),
            Target::Text(text) => write!(f, "text={}", text),
            Target::Role { role, name: Some(name) } => write!(f, "role={}[name=\"{}\"]", role, name),
            Target::Role { role, name: None } => write!(f, "role={}", role),
            Target::Label(label) => write!(f, "label={}", label),
            Target::TestId(id) => write!(f, "test_id={}", id),
        }
    }
}

impl FromStr for Target {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(E2eError::SpecParse("empty locator".into()));
        }

        if s.starts_with("role=") {
            let caps = ROLE_SHORTHAND
                .captures(s)
                .ok_or_else(|| E2eError::SpecParse(format!("malformed role locator: {}", s)))?;
            let name = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str().to_string());
            return Ok(Target::Role { role: caps[1].to_string(), name });
        }

        let target = match s.split_once('=') {
            Some(("xpath", rest)) => Target::XPath(rest.to_string()),
            Some(("css", rest)) => Target::Css(rest.to_string()),
            Some(("text", rest)) => Target::Text(rest.to_string()),
            Some(("label", rest)) => Target::Label(rest.to_string()),
            Some(("test_id", rest)) | Some(("data-testid", rest)) => Target::TestId(rest.to_string()),
            _ if s.starts_with('/') || s.starts_with("html/") || s.starts_with("(") => {
                Target::XPath(s.to_string())
            }
            _ => Target::Css(s.to_string()),
        };

        Ok(target)
    }
}

/// Picks one frame among those attached to the current page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_contains: Option<String>,
    /// Index among the frames matching `name`/`url_contains` (0-based)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

impl FrameSelector {
    fn matches(&self, frame: &FrameInfo) -> bool {
        self.name.as_ref().map_or(true, |name| &frame.name == name)
            && self.url_contains.as_ref().map_or(true, |needle| frame.url.contains(needle.as_str()))
    }

    /// Pick the selected frame's index, if any frame matches
    pub fn select(&self, frames: &[FrameInfo]) -> Option<usize> {
        frames
            .iter()
            .filter(|frame| self.matches(frame))
            .nth(self.index.unwrap_or(0))
            .map(|frame| frame.index)
    }
}

impl fmt::Display for FrameSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(name) = &self.name {
            parts.push(format!("name={}", name));
        }
        if let Some(url) = &self.url_contains {
            parts.push(format!("url~{}", url));
        }
        if let Some(index) = self.index {
            parts.push(format!("#{}", index));
        }
        write!(f, "frame[{}]", parts.join(","))
    }
}

/// A declarative element reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LocatorDef", into = "LocatorDef")]
pub struct Locator {
    pub target: Target,
    pub frame: Option<FrameSelector>,
    /// Occurrence among matches (0-based)
    pub nth: usize,
}

impl Locator {
    pub fn new(target: Target) -> Self {
        Self { target, frame: None, nth: 0 }
    }

    pub fn in_frame(mut self, frame: FrameSelector) -> Self {
        self.frame = Some(frame);
        self
    }

    pub fn nth(mut self, nth: usize) -> Self {
        self.nth = nth;
        self
    }
}

impl FromStr for Locator {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Locator::new(s.parse()?))
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(frame) = &self.frame {
            write!(f, "{} >> ", frame)?;
        }
        write!(f, "{}", self.target)?;
        if self.nth > 0 {
            write!(f, " >> nth={}", self.nth)?;
        }
        Ok(())
    }
}

/// On-disk forms: a shorthand string or a map naming exactly one target kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum LocatorDef {
    Short(String),
    Full(FullLocator),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct FullLocator {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    xpath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    css: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    test_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    frame: Option<FrameSelector>,
    #[serde(default, skip_serializing_if = "is_zero")]
    nth: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl TryFrom<LocatorDef> for Locator {
    type Error = E2eError;

    fn try_from(def: LocatorDef) -> Result<Self, Self::Error> {
        let full = match def {
            LocatorDef::Short(s) => return s.parse(),
            LocatorDef::Full(full) => full,
        };

        let mut targets = Vec::new();
        if let Some(s) = full.selector {
            targets.push(s.parse()?);
        }
        if let Some(path) = full.xpath {
            targets.push(Target::XPath(path));
        }
        if let Some(css) = full.css {
            targets.push(Target::Css(css));
        }
        if let Some(text) = full.text {
            targets.push(Target::Text(text));
        }
        if let Some(role) = full.role {
            targets.push(Target::Role { role, name: full.name });
        } else if full.name.is_some() {
            return Err(E2eError::SpecParse("locator `name` requires `role`".into()));
        }
        if let Some(label) = full.label {
            targets.push(Target::Label(label));
        }
        if let Some(id) = full.test_id {
            targets.push(Target::TestId(id));
        }

        if targets.len() != 1 {
            return Err(E2eError::SpecParse(format!(
                "locator must name exactly one target, found {}",
                targets.len()
            )));
        }

        Ok(Locator { target: targets.remove(0), frame: full.frame, nth: full.nth })
    }
}

impl From<Locator> for LocatorDef {
    fn from(locator: Locator) -> Self {
        if locator.frame.is_none() && locator.nth == 0 {
            return LocatorDef::Short(locator.target.to_string());
        }

        let mut full = FullLocator {
            frame: locator.frame,
            nth: locator.nth,
            ..Default::default()
        };
        match locator.target {
            Target::XPath(path) => full.xpath = Some(path),
            Target::Css(css) => full.css = Some(css),
            Target::Text(text) => full.text = Some(text),
            Target::Role { role, name } => {
                full.role = Some(role);
                full.name = name;
            }
            Target::Label(label) => full.label = Some(label),
            Target::TestId(id) => full.test_id = Some(id),
        }
        LocatorDef::Full(full)
    }
}

/// Bounds applied while resolving
#[derive(Debug, Clone, Copy)]
pub struct ResolvePolicy {
    /// Upper bound on the readiness wait issued for a selected frame
    pub frame_ready: Duration,
    /// Delay between match-count polls
    pub poll_interval: Duration,
}

/// Pick the frame a locator addresses on the current page.
///
/// When `frame_ready` is set, a `domcontentloaded` wait is issued on the
/// selected frame. A timeout there is swallowed: embedded frames load
/// asynchronously and resolution continues against whatever is rendered.
async fn select_frame(
    session: &mut BrowsingSession,
    locator: &Locator,
    frame_ready: Option<Duration>,
) -> E2eResult<Option<usize>> {
    let page = session.current_page();

    let Some(selector) = &locator.frame else {
        return Ok(Some(0));
    };

    let frames = session.driver()?.frames(page).await?;
    let Some(index) = selector.select(&frames) else {
        debug!("No frame matches {} ({} attached)", selector, frames.len());
        return Ok(None);
    };

    if let Some(bound) = frame_ready {
        match session
            .driver()?
            .wait_for_load_state(page, index, LoadState::DomContentLoaded, bound)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_transient_load() => {
                let transient = E2eError::TransientLoadTimeout {
                    what: selector.to_string(),
                    timeout_ms: bound.as_millis() as u64,
                };
                warn!("{} ({}); continuing best-effort", transient, e);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(Some(index))
}

/// One resolution attempt with no waiting on the target itself
pub async fn probe(
    session: &mut BrowsingSession,
    locator: &Locator,
    frame_ready: Option<Duration>,
) -> E2eResult<Option<ElementHandle>> {
    let Some(frame) = select_frame(session, locator, frame_ready).await? else {
        return Ok(None);
    };
    let page = session.current_page();

    let count = match session.driver()?.count(page, frame, &locator.target).await {
        Ok(count) => count,
        // A frame can detach between enumeration and query; treat as a miss.
        Err(E2eError::Driver(reason)) => {
            debug!("Query for {} failed: {}", locator, reason);
            0
        }
        Err(e) => return Err(e),
    };

    if count > locator.nth {
        Ok(Some(ElementHandle {
            page,
            frame,
            target: locator.target.clone(),
            nth: locator.nth,
        }))
    } else {
        Ok(None)
    }
}

/// Resolve a locator to an actionable handle, polling until `timeout` elapses
pub async fn resolve(
    session: &mut BrowsingSession,
    locator: &Locator,
    timeout: Duration,
    policy: ResolvePolicy,
) -> E2eResult<ElementHandle> {
    let deadline = Deadline::after(timeout);
    let mut frame_ready = Some(policy.frame_ready.min(timeout));

    loop {
        if let Some(handle) = probe(session, locator, frame_ready.take()).await? {
            return Ok(handle);
        }
        if !deadline.pause(policy.poll_interval).await {
            return Err(E2eError::LocatorNotFound {
                locator: locator.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
    }
}
