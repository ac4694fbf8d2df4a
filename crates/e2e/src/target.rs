//! Application under test: reachability probing and an optional dev server

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::HarnessConfig;
use crate::error::{E2eError, E2eResult};

const PROBE_INTERVAL: Duration = Duration::from_millis(250);

/// Poll `url` until it answers with a non-server-error status.
///
/// Returns the number of attempts it took.
pub async fn wait_until_reachable(url: &str, timeout: Duration) -> E2eResult<usize> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;

    let start = Instant::now();
    let mut attempts = 0;

    loop {
        attempts += 1;

        match client.get(url).send().await {
            Ok(resp) if !resp.status().is_server_error() => {
                info!("Target reachable at {} ({})", url, resp.status());
                return Ok(attempts);
            }
            Ok(resp) => {
                warn!("Target returned {}", resp.status());
            }
            Err(e) => {
                if attempts == 1 {
                    info!("Waiting for target at {}...", url);
                }
                // Refused connections are expected while the app boots.
                if !e.is_connect() {
                    warn!("Probe error: {}", e);
                }
            }
        }

        if start.elapsed() + PROBE_INTERVAL >= timeout {
            return Err(E2eError::TargetUnreachable {
                url: url.to_string(),
                attempts,
            });
        }
        sleep(PROBE_INTERVAL).await;
    }
}

/// Probe the configured health URL when probing is enabled
pub async fn probe(config: &HarnessConfig) -> E2eResult<()> {
    if !config.target.probe {
        return Ok(());
    }
    let url = config.resolve_url(&config.target.health_path);
    wait_until_reachable(&url, Duration::from_millis(config.target.startup_timeout_ms)).await?;
    Ok(())
}

/// A dev server started for the duration of a run
pub struct AppServer {
    child: Child,
    pub base_url: String,
}

impl AppServer {
    /// Start `target.command` and wait until the base URL answers
    pub async fn start(config: &HarnessConfig) -> E2eResult<Self> {
        let Some((program, args)) = config.target.command.split_first() else {
            return Err(E2eError::InvalidConfig("target.command is empty".into()));
        };

        info!("Starting target: {}", config.target.command.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(args).stdout(Stdio::null()).stderr(Stdio::null());
        if let Some(dir) = &config.target.workdir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|e| {
            E2eError::TargetStartup(format!("failed to spawn {}: {}", PathBuf::from(program).display(), e))
        })?;

        let mut server = AppServer {
            child,
            base_url: config.base_url.clone(),
        };

        let url = config.resolve_url(&config.target.health_path);
        let timeout = Duration::from_millis(config.target.startup_timeout_ms);
        if let Err(e) = wait_until_reachable(&url, timeout).await {
            server.stop();
            return Err(e);
        }

        info!("Target is up at {}", server.base_url);
        Ok(server)
    }

    /// Stop the server: SIGTERM first, then kill
    pub fn stop(&mut self) {
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }
        info!("Stopping target (pid: {})", self.child.id());

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(self.child.id() as i32);
            if kill(pid, Signal::SIGTERM).is_ok() {
                std::thread::sleep(Duration::from_millis(500));
            }
        }

        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for AppServer {
    fn drop(&mut self) {
        self.stop();
    }
}
