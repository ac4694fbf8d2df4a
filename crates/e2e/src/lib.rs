//! TrackProbe scenario harness
//!
//! Drives a real browser through declarative YAML scenarios against a live
//! web application and reports a verdict per scenario:
//! - Launches one isolated browser session per scenario and always tears it down
//! - Resolves locators fresh at every use, polling within a bound
//! - Runs steps in order, tolerating slow embedded frames where asked
//! - Evaluates expectations without mutating the page
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ScenarioRunner                         │
//! │    ├── prepare_target() -> AppServer | probe                │
//! │    ├── run(&[Scenario]) -> Report                           │
//! │    └── run_scenario(&Scenario) -> ScenarioResult            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SessionManager::with_session                               │
//! │    ├── StepExecutor   (navigate, fill, click, wait_for ...) │
//! │    ├── locator::resolve (frame, target, nth; polled)        │
//! │    └── Evaluator      (visible, text_contains, any_of ...)  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  BrowserDriver                                              │
//! │    ├── PlaywrightDriver (node bridge over JSON lines)       │
//! │    └── MockDriver       (in-memory, for tests)              │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod expect;
pub mod locator;
pub mod mock;
pub mod playwright;
pub mod report;
pub mod runner;
pub mod session;
pub mod spec;
pub mod target;
pub mod wait;

pub use config::HarnessConfig;
pub use error::{E2eError, E2eResult};
pub use locator::{Locator, Target};
pub use report::{Report, ScenarioResult, ScenarioVerdict};
pub use runner::ScenarioRunner;
pub use spec::{Expectation, Scenario, Step};
