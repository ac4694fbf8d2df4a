//! Playwright browser automation
//!
//! Each session runs its own `node` process executing `bridge.js`, which
//! owns one browser and one context. Requests and responses are JSON lines
//! over the child's stdio, correlated by id; page lifecycle events arrive on
//! the same stream and are buffered until the session drains them.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::HarnessConfig;
use crate::driver::{
    BrowserDriver, BrowserLauncher, DriverEvent, ElementHandle, FrameInfo, LaunchOptions, LoadState, PageId,
};
use crate::error::{E2eError, E2eResult};
use crate::locator::Target;
use crate::spec::Viewport;

const BRIDGE_SCRIPT: &str = include_str!("bridge.js");

/// How long `shutdown` waits for the bridge to exit before signalling it
const EXIT_GRACE: Duration = Duration::from_millis(2_000);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<BridgeReply>>>>;

/// Launches browsers through a Node.js Playwright bridge
#[derive(Debug, Clone)]
pub struct PlaywrightLauncher {
    node_binary: PathBuf,
    project_dir: PathBuf,
    driver_grace: Duration,
}

impl PlaywrightLauncher {
    pub fn new(node_binary: impl Into<PathBuf>, project_dir: impl Into<PathBuf>, driver_grace: Duration) -> Self {
        Self {
            node_binary: node_binary.into(),
            project_dir: project_dir.into(),
            driver_grace,
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(
            &config.browser.node_binary,
            &config.browser.node_project_dir,
            Duration::from_millis(config.timeouts.driver_grace_ms),
        )
    }

    /// Check that node can resolve the `playwright` package from the project
    pub async fn check_installed(&self) -> E2eResult<()> {
        let status = Command::new(&self.node_binary)
            .args(["-e", "require.resolve('playwright')"])
            .current_dir(&self.project_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }
}

#[async_trait]
impl BrowserLauncher for PlaywrightLauncher {
    async fn launch(&self, options: &LaunchOptions) -> E2eResult<Box<dyn BrowserDriver>> {
        self.check_installed().await?;
        let driver = PlaywrightDriver::spawn(self, options).await?;
        Ok(Box::new(driver))
    }
}

#[derive(Debug, Deserialize)]
struct BridgeReply {
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<BridgeError>,
}

#[derive(Debug, Deserialize)]
struct BridgeError {
    kind: String,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum BridgeEvent {
    Page { page: PageId, url: String },
    PageClosed { page: PageId },
}

impl From<BridgeEvent> for DriverEvent {
    fn from(event: BridgeEvent) -> Self {
        match event {
            BridgeEvent::Page { page, url } => DriverEvent::PageOpened { page, url },
            BridgeEvent::PageClosed { page } => DriverEvent::PageClosed { page },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BridgeMessage {
    Reply {
        id: u64,
        #[serde(flatten)]
        reply: BridgeReply,
    },
    Event(BridgeEvent),
}

/// One bridge process: one browser, one context
pub struct PlaywrightDriver {
    child: Child,
    stdin: Option<ChildStdin>,
    next_id: u64,
    pending: Pending,
    events: mpsc::UnboundedReceiver<DriverEvent>,
    grace: Duration,
    reader: JoinHandle<()>,
    stderr: JoinHandle<()>,
    _script_dir: TempDir,
}

impl PlaywrightDriver {
    async fn spawn(launcher: &PlaywrightLauncher, options: &LaunchOptions) -> E2eResult<Self> {
        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("bridge.js");
        std::fs::write(&script_path, BRIDGE_SCRIPT)?;

        debug!("Starting Playwright bridge: {}", script_path.display());

        let mut child = Command::new(&launcher.node_binary)
            .arg(&script_path)
            .current_dir(&launcher.project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                E2eError::LaunchFailure(format!(
                    "failed to spawn {}: {}",
                    launcher.node_binary.display(),
                    e
                ))
            })?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::LaunchFailure("bridge stdout unavailable".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| E2eError::LaunchFailure("bridge stderr unavailable".into()))?;

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, events) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop(stdout, Arc::clone(&pending), event_tx));
        let stderr = tokio::spawn(log_stderr(stderr));

        let mut driver = Self {
            child,
            stdin,
            next_id: 1,
            pending,
            events,
            grace: launcher.driver_grace,
            reader,
            stderr,
            _script_dir: script_dir,
        };

        let params = json!({
            "browser": options.browser.as_str(),
            "headless": options.headless,
            "args": options.args,
            "viewport": { "width": options.viewport.width, "height": options.viewport.height },
            "default_timeout": options.default_timeout.as_millis() as u64,
        });

        match driver.call("launch", params, options.launch_timeout).await {
            Ok(result) => {
                info!(
                    "Launched {} {}",
                    options.browser.as_str(),
                    result.get("version").and_then(serde_json::Value::as_str).unwrap_or("")
                );
                Ok(driver)
            }
            Err(e) => {
                let _ = driver.child.start_kill();
                Err(E2eError::LaunchFailure(e.to_string()))
            }
        }
    }

    /// Send one request and wait for its reply. The wait is bounded by the
    /// operation's own timeout plus the configured grace, so a wedged bridge
    /// surfaces as a timeout rather than a hang.
    async fn call(&mut self, op: &str, params: Value, timeout: Duration) -> E2eResult<Value> {
        let id = self.next_id;
        self.next_id += 1;

        let timeout_ms = timeout.as_millis() as u64;
        let request = json!({ "id": id, "op": op, "timeout": timeout_ms, "params": params });
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| E2eError::Disconnected("bridge stdin closed".into()))?;
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = written {
            self.pending.lock().remove(&id);
            return Err(E2eError::Disconnected(format!("write to bridge failed: {}", e)));
        }

        debug!(id, op, "Sent bridge request");

        let reply = match tokio::time::timeout(timeout + self.grace, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(E2eError::Disconnected(format!("bridge exited during {}", op))),
            Err(_) => {
                self.pending.lock().remove(&id);
                return Err(E2eError::DriverTimeout { op: op.to_string(), timeout_ms });
            }
        };

        if reply.ok {
            return Ok(reply.result);
        }

        match reply.error {
            Some(error) if error.kind == "timeout" => Err(E2eError::DriverTimeout {
                op: format!("{}: {}", op, first_line(&error.message)),
                timeout_ms,
            }),
            Some(error) => Err(E2eError::Driver(format!("{}: {}", op, first_line(&error.message)))),
            None => Err(E2eError::Driver(format!("{}: failed without detail", op))),
        }
    }

    async fn call_element(
        &mut self,
        op: &str,
        element: &ElementHandle,
        extra: Option<(&str, Value)>,
        timeout: Duration,
    ) -> E2eResult<Value> {
        let mut params = element_params(element);
        if let (Some((key, value)), Value::Object(map)) = (extra, &mut params) {
            map.insert(key.to_string(), value);
        }
        self.call(op, params, timeout).await
    }
}

fn element_params(element: &ElementHandle) -> Value {
    json!({
        "page": element.page,
        "frame": element.frame,
        "target": element.target,
        "nth": element.nth,
    })
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or(message)
}

fn expect_bool(op: &str, value: Value) -> E2eResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| E2eError::Driver(format!("{}: expected boolean, got {}", op, value)))
}

async fn read_loop(stdout: ChildStdout, pending: Pending, events: mpsc::UnboundedSender<DriverEvent>) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Reading from Playwright bridge failed: {}", e);
                break;
            }
        };

        match serde_json::from_str::<BridgeMessage>(&line) {
            Ok(BridgeMessage::Reply { id, reply }) => {
                let waiter = pending.lock().remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(reply);
                    }
                    None => debug!(id, "Reply for abandoned request"),
                }
            }
            Ok(BridgeMessage::Event(event)) => {
                let _ = events.send(event.into());
            }
            Err(_) => debug!("bridge: {}", line),
        }
    }

    // Dropping the senders wakes every waiter with a disconnect.
    pending.lock().clear();
}

async fn log_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        warn!("bridge stderr: {}", line);
    }
}

#[async_trait]
impl BrowserDriver for PlaywrightDriver {
    async fn open_page(&mut self, timeout: Duration) -> E2eResult<PageId> {
        let result = self.call("new_page", json!({}), timeout).await?;
        let page: PageId = serde_json::from_value(result["page"].clone())?;
        Ok(page)
    }

    fn drain_events(&mut self) -> Vec<DriverEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    async fn goto(&mut self, page: PageId, url: &str, wait_until: LoadState, timeout: Duration) -> E2eResult<()> {
        self.call("goto", json!({ "page": page, "url": url, "wait_until": wait_until }), timeout)
            .await?;
        Ok(())
    }

    async fn reload(&mut self, page: PageId, timeout: Duration) -> E2eResult<()> {
        self.call("reload", json!({ "page": page }), timeout).await?;
        Ok(())
    }

    async fn wait_for_load_state(
        &mut self,
        page: PageId,
        frame: usize,
        state: LoadState,
        timeout: Duration,
    ) -> E2eResult<()> {
        self.call(
            "wait_for_load_state",
            json!({ "page": page, "frame": frame, "state": state }),
            timeout,
        )
        .await?;
        Ok(())
    }

    async fn frames(&mut self, page: PageId) -> E2eResult<Vec<FrameInfo>> {
        let result = self.call("frames", json!({ "page": page }), self.grace).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn count(&mut self, page: PageId, frame: usize, target: &Target) -> E2eResult<usize> {
        let result = self
            .call("count", json!({ "page": page, "frame": frame, "target": target }), self.grace)
            .await?;
        result
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| E2eError::Driver(format!("count: expected number, got {}", result)))
    }

    async fn fill(&mut self, element: &ElementHandle, value: &str, timeout: Duration) -> E2eResult<()> {
        self.call_element("fill", element, Some(("value", json!(value))), timeout)
            .await?;
        Ok(())
    }

    async fn click(&mut self, element: &ElementHandle, timeout: Duration) -> E2eResult<()> {
        self.call_element("click", element, None, timeout).await?;
        Ok(())
    }

    async fn inner_text(&mut self, element: &ElementHandle, timeout: Duration) -> E2eResult<String> {
        let result = self.call_element("inner_text", element, None, timeout).await?;
        Ok(result.as_str().unwrap_or_default().to_string())
    }

    async fn is_visible(&mut self, element: &ElementHandle) -> E2eResult<bool> {
        let grace = self.grace;
        let result = self.call_element("is_visible", element, None, grace).await?;
        expect_bool("is_visible", result)
    }

    async fn is_enabled(&mut self, element: &ElementHandle, timeout: Duration) -> E2eResult<bool> {
        let result = self.call_element("is_enabled", element, None, timeout).await?;
        expect_bool("is_enabled", result)
    }

    async fn mouse_wheel(&mut self, page: PageId, delta_x: f64, delta_y: f64, timeout: Duration) -> E2eResult<()> {
        self.call(
            "mouse_wheel",
            json!({ "page": page, "delta_x": delta_x, "delta_y": delta_y }),
            timeout,
        )
        .await?;
        Ok(())
    }

    async fn set_viewport(&mut self, page: PageId, viewport: Viewport, timeout: Duration) -> E2eResult<()> {
        self.call(
            "set_viewport",
            json!({ "page": page, "width": viewport.width, "height": viewport.height }),
            timeout,
        )
        .await?;
        Ok(())
    }

    async fn close_context(&mut self) -> E2eResult<()> {
        let grace = self.grace;
        self.call("close_context", json!({}), grace).await?;
        Ok(())
    }

    async fn close_browser(&mut self) -> E2eResult<()> {
        let grace = self.grace;
        self.call("close_browser", json!({}), grace).await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> E2eResult<()> {
        if let Err(e) = self.call("exit", json!({}), EXIT_GRACE).await {
            debug!("Bridge exit request: {}", e);
        }
        // Closing stdin ends the bridge's read loop even if `exit` was lost.
        self.stdin = None;

        match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => debug!("Bridge exited: {}", status),
            Ok(Err(e)) => warn!("Waiting for bridge failed: {}", e),
            Err(_) => {
                warn!("Bridge did not exit; terminating");
                #[cfg(unix)]
                {
                    use nix::sys::signal::{kill, Signal};
                    use nix::unistd::Pid;

                    if let Some(pid) = self.child.id() {
                        if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok() {
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                    }
                }
                self.child.kill().await?;
            }
        }

        self.reader.abort();
        self.stderr.abort();
        Ok(())
    }
}

impl Drop for PlaywrightDriver {
    fn drop(&mut self) {
        self.reader.abort();
        self.stderr.abort();
    }
}
