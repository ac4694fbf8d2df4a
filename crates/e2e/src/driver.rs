//! Browser driver seam
//!
//! The session manager launches browsers through [`BrowserLauncher`] and talks
//! to the running browser only through [`BrowserDriver`]. The production
//! implementation is the Playwright bridge in [`crate::playwright`]; tests use
//! [`crate::mock`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::E2eResult;
use crate::locator::Target;
use crate::spec::Viewport;

/// Opaque identifier of a page within one browsing context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(pub u64);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page#{}", self.0)
    }
}

/// A frame attached to a page; index 0 is always the main frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub index: usize,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
}

/// Where a resolved element lives. Actions re-query through it, so a handle
/// never pins a stale DOM node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    pub page: PageId,
    pub frame: usize,
    pub target: Target,
    pub nth: usize,
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} frame {} {} (#{})", self.page, self.frame, self.target, self.nth)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadState {
    #[serde(rename = "commit")]
    Commit,
    #[serde(rename = "domcontentloaded")]
    DomContentLoaded,
    #[default]
    #[serde(rename = "load")]
    Load,
    #[serde(rename = "networkidle")]
    NetworkIdle,
}

impl LoadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadState::Commit => "commit",
            LoadState::DomContentLoaded => "domcontentloaded",
            LoadState::Load => "load",
            LoadState::NetworkIdle => "networkidle",
        }
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementState {
    Visible,
    Hidden,
    Attached,
    Detached,
}

impl fmt::Display for ElementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ElementState::Visible => "visible",
            ElementState::Hidden => "hidden",
            ElementState::Attached => "attached",
            ElementState::Detached => "detached",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserKind::Chromium => "chromium",
            BrowserKind::Firefox => "firefox",
            BrowserKind::Webkit => "webkit",
        }
    }
}

impl std::str::FromStr for BrowserKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chromium" | "chrome" => Ok(BrowserKind::Chromium),
            "firefox" => Ok(BrowserKind::Firefox),
            "webkit" => Ok(BrowserKind::Webkit),
            other => Err(format!("unknown browser: {}", other)),
        }
    }
}

/// Asynchronous notifications from the browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    PageOpened { page: PageId, url: String },
    PageClosed { page: PageId },
}

/// Deterministic startup parameters for one isolated browser
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub browser: BrowserKind,
    pub headless: bool,
    pub viewport: Viewport,
    pub args: Vec<String>,
    /// Context-wide default for Playwright operations without their own bound
    pub default_timeout: Duration,
    /// Upper bound on launching the browser and creating the context
    pub launch_timeout: Duration,
}

impl LaunchOptions {
    /// Flags that keep Chromium stable inside containers and CI sandboxes
    pub fn container_safe_args(viewport: Viewport) -> Vec<String> {
        vec![
            format!("--window-size={},{}", viewport.width, viewport.height),
            "--disable-dev-shm-usage".to_string(),
            "--ipc=host".to_string(),
            "--single-process".to_string(),
        ]
    }
}

impl Default for LaunchOptions {
    fn default() -> Self {
        let viewport = Viewport::default();
        Self {
            browser: BrowserKind::Chromium,
            headless: true,
            viewport,
            args: Self::container_safe_args(viewport),
            default_timeout: Duration::from_secs(5),
            launch_timeout: Duration::from_secs(30),
        }
    }
}

/// One live browser process with a single isolated context
#[async_trait]
pub trait BrowserDriver: Send {
    /// Open a page in the context and return its id
    async fn open_page(&mut self, timeout: Duration) -> E2eResult<PageId>;

    /// Take every event received since the last call
    fn drain_events(&mut self) -> Vec<DriverEvent>;

    async fn goto(&mut self, page: PageId, url: &str, wait_until: LoadState, timeout: Duration) -> E2eResult<()>;

    async fn reload(&mut self, page: PageId, timeout: Duration) -> E2eResult<()>;

    async fn wait_for_load_state(
        &mut self,
        page: PageId,
        frame: usize,
        state: LoadState,
        timeout: Duration,
    ) -> E2eResult<()>;

    async fn frames(&mut self, page: PageId) -> E2eResult<Vec<FrameInfo>>;

    /// Number of elements in the frame currently matching the target
    async fn count(&mut self, page: PageId, frame: usize, target: &Target) -> E2eResult<usize>;

    async fn fill(&mut self, element: &ElementHandle, value: &str, timeout: Duration) -> E2eResult<()>;

    async fn click(&mut self, element: &ElementHandle, timeout: Duration) -> E2eResult<()>;

    async fn inner_text(&mut self, element: &ElementHandle, timeout: Duration) -> E2eResult<String>;

    async fn is_visible(&mut self, element: &ElementHandle) -> E2eResult<bool>;

    async fn is_enabled(&mut self, element: &ElementHandle, timeout: Duration) -> E2eResult<bool>;

    async fn mouse_wheel(&mut self, page: PageId, delta_x: f64, delta_y: f64, timeout: Duration) -> E2eResult<()>;

    async fn set_viewport(&mut self, page: PageId, viewport: Viewport, timeout: Duration) -> E2eResult<()>;

    async fn close_context(&mut self) -> E2eResult<()>;

    async fn close_browser(&mut self) -> E2eResult<()>;

    /// Stop the driver itself; the last teardown stage
    async fn shutdown(&mut self) -> E2eResult<()>;
}

/// Starts browsers for the session manager
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> E2eResult<Box<dyn BrowserDriver>>;
}
