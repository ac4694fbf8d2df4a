//! Error types for scenario execution

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Browser launch failed: {0}")]
    LaunchFailure(String),

    #[error("Playwright not found. Install with: npm install playwright && npx playwright install chromium")]
    PlaywrightNotFound,

    #[error("Locator not found: {locator} (waited {timeout_ms} ms)")]
    LocatorNotFound { locator: String, timeout_ms: u64 },

    #[error("Action timed out: {action} after {timeout_ms} ms")]
    ActionTimeout { action: String, timeout_ms: u64 },

    #[error("Transient load timeout: {what} not ready after {timeout_ms} ms")]
    TransientLoadTimeout { what: String, timeout_ms: u64 },

    #[error("Driver timeout: {op} after {timeout_ms} ms")]
    DriverTimeout { op: String, timeout_ms: u64 },

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Driver disconnected: {0}")]
    Disconnected(String),

    #[error("Session already released")]
    SessionReleased,

    #[error("Scenario spec error: {0}")]
    SpecParse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Target application unreachable at {url} after {attempts} attempts")]
    TargetUnreachable { url: String, attempts: usize },

    #[error("Target application failed to start: {0}")]
    TargetStartup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl E2eError {
    /// Whether this error came from a bounded wait expiring at the driver.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            E2eError::DriverTimeout { .. }
                | E2eError::ActionTimeout { .. }
                | E2eError::TransientLoadTimeout { .. }
                | E2eError::LocatorNotFound { .. }
        )
    }

    /// Whether an optional readiness wait may swallow this error: its bound
    /// expired, or the driver failed on the frame itself (e.g. it detached
    /// mid-wait). A lost driver is never transient.
    pub fn is_transient_load(&self) -> bool {
        self.is_timeout() || matches!(self, E2eError::Driver(_))
    }

    /// Short machine-readable category used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            E2eError::LaunchFailure(_) | E2eError::PlaywrightNotFound => "launch_failure",
            E2eError::LocatorNotFound { .. } => "locator_not_found",
            E2eError::ActionTimeout { .. } | E2eError::DriverTimeout { .. } => "action_timeout",
            E2eError::TransientLoadTimeout { .. } => "transient_load_timeout",
            E2eError::Driver(_) | E2eError::Disconnected(_) | E2eError::SessionReleased => "driver",
            E2eError::SpecParse(_) | E2eError::Yaml(_) => "spec",
            E2eError::InvalidConfig(_) | E2eError::Toml(_) => "config",
            E2eError::TargetUnreachable { .. } | E2eError::TargetStartup(_) | E2eError::Http(_) => {
                "target"
            }
            E2eError::Io(_) | E2eError::Json(_) => "io",
        }
    }
}

pub type E2eResult<T> = Result<T, E2eError>;
