//! Harness configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::driver::{BrowserKind, LaunchOptions};
use crate::error::{E2eError, E2eResult};
use crate::locator::ResolvePolicy;
use crate::spec::Viewport;

/// Top-level configuration, loadable from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Base URL of the application under test
    pub base_url: String,

    /// Directory holding scenario YAML files
    pub scenarios_dir: PathBuf,

    /// Directory for results.json
    pub output_dir: PathBuf,

    /// Scenarios run concurrently, each in its own browser
    pub jobs: usize,

    pub browser: BrowserConfig,

    pub timeouts: Timeouts,

    pub target: TargetConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5173".to_string(),
            scenarios_dir: PathBuf::from("scenarios"),
            output_dir: PathBuf::from("test-results"),
            jobs: 1,
            browser: BrowserConfig::default(),
            timeouts: Timeouts::default(),
            target: TargetConfig::default(),
        }
    }
}

/// Browser launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub kind: BrowserKind,
    pub headless: bool,
    pub viewport: Viewport,

    /// Extra launch flags; the container-safe set is used when empty
    pub args: Vec<String>,

    /// Node.js binary running the Playwright bridge
    pub node_binary: PathBuf,

    /// Directory whose node_modules provides `playwright`
    pub node_project_dir: PathBuf,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            kind: BrowserKind::Chromium,
            headless: true,
            viewport: Viewport::default(),
            args: Vec::new(),
            node_binary: PathBuf::from("node"),
            node_project_dir: PathBuf::from("."),
        }
    }
}

/// Every bound used while running scenarios, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Default for fill, click, scroll and element waits
    pub action_ms: u64,
    /// Default for navigate and reload
    pub navigation_ms: u64,
    /// Bound on a frame's readiness wait during resolution
    pub frame_ready_ms: u64,
    /// Default for expectations
    pub expectation_ms: u64,
    /// Delay before every fill and click
    pub settle_ms: u64,
    pub poll_interval_ms: u64,
    /// Added on top of an operation's own timeout when waiting for the driver
    pub driver_grace_ms: u64,
    pub launch_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            action_ms: 5_000,
            navigation_ms: 10_000,
            frame_ready_ms: 3_000,
            expectation_ms: 5_000,
            settle_ms: 500,
            poll_interval_ms: 100,
            driver_grace_ms: 2_000,
            launch_ms: 30_000,
        }
    }
}

impl Timeouts {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn expectation(&self) -> Duration {
        Duration::from_millis(self.expectation_ms)
    }

    pub fn driver_grace(&self) -> Duration {
        Duration::from_millis(self.driver_grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn frame_ready(&self) -> Duration {
        Duration::from_millis(self.frame_ready_ms)
    }

    pub fn resolve_policy(&self) -> ResolvePolicy {
        ResolvePolicy {
            frame_ready: self.frame_ready(),
            poll_interval: self.poll_interval(),
        }
    }
}

/// Application-under-test reachability
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Probe the base URL before running any scenario
    pub probe: bool,

    /// Path requested by the probe
    pub health_path: String,

    pub startup_timeout_ms: u64,

    /// Command that starts the app (e.g. `["npm", "run", "dev"]`)
    pub command: Vec<String>,

    /// Working directory for `command`
    pub workdir: Option<PathBuf>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            probe: false,
            health_path: "/".to_string(),
            startup_timeout_ms: 30_000,
            command: Vec::new(),
            workdir: None,
        }
    }
}

impl HarnessConfig {
    /// Load configuration from file; a missing file yields the defaults
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> E2eResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| E2eError::InvalidConfig(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> E2eResult<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(E2eError::InvalidConfig(format!(
                "base_url must be http(s): {}",
                self.base_url
            )));
        }
        if self.jobs == 0 {
            return Err(E2eError::InvalidConfig("jobs must be at least 1".into()));
        }
        if self.timeouts.poll_interval_ms == 0 {
            return Err(E2eError::InvalidConfig("poll_interval_ms must be greater than zero".into()));
        }
        if self.browser.viewport.width == 0 || self.browser.viewport.height == 0 {
            return Err(E2eError::InvalidConfig("viewport dimensions must be non-zero".into()));
        }
        Ok(())
    }

    /// Startup parameters for every session of this run
    pub fn launch_options(&self) -> LaunchOptions {
        let viewport = self.browser.viewport;
        let args = if self.browser.args.is_empty() && self.browser.kind == BrowserKind::Chromium {
            LaunchOptions::container_safe_args(viewport)
        } else {
            self.browser.args.clone()
        };

        LaunchOptions {
            browser: self.browser.kind,
            headless: self.browser.headless,
            viewport,
            args,
            default_timeout: Duration::from_millis(self.timeouts.action_ms),
            launch_timeout: Duration::from_millis(self.timeouts.launch_ms),
        }
    }

    /// Join a scenario URL onto the base URL; absolute URLs pass through
    pub fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            url.trim_start_matches('/')
        )
    }
}
