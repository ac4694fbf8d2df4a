//! Browsing session lifecycle
//!
//! A [`BrowsingSession`] owns one browser process, one isolated context and
//! the pages opened in it. [`SessionManager`] creates sessions and tears them
//! down in a fixed order: context, then browser, then the driver itself.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::driver::{BrowserDriver, BrowserLauncher, DriverEvent, LaunchOptions, PageId};
use crate::error::{E2eError, E2eResult};
use crate::spec::Viewport;

pub struct BrowsingSession {
    driver: Box<dyn BrowserDriver>,
    current_page: PageId,
    open_pages: Vec<PageId>,
    viewport: Viewport,
    released: bool,
}

impl BrowsingSession {
    fn new(driver: Box<dyn BrowserDriver>, page: PageId, viewport: Viewport) -> Self {
        Self {
            driver,
            current_page: page,
            open_pages: vec![page],
            viewport,
            released: false,
        }
    }

    /// The page every step acts on
    pub fn current_page(&self) -> PageId {
        self.current_page
    }

    pub fn open_pages(&self) -> &[PageId] {
        &self.open_pages
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub(crate) fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn driver(&mut self) -> E2eResult<&mut dyn BrowserDriver> {
        if self.released {
            return Err(E2eError::SessionReleased);
        }
        Ok(self.driver.as_mut())
    }

    /// Apply page events from the driver. A newly opened page (popup, new
    /// tab) becomes current; closing the current page falls back to the most
    /// recently opened survivor.
    pub fn sync_pages(&mut self) {
        for event in self.driver.drain_events() {
            match event {
                DriverEvent::PageOpened { page, url } => {
                    if !self.open_pages.contains(&page) {
                        self.open_pages.push(page);
                    }
                    if self.current_page != page {
                        debug!("Current page is now {} ({})", page, url);
                        self.current_page = page;
                    }
                }
                DriverEvent::PageClosed { page } => {
                    self.open_pages.retain(|p| *p != page);
                    if self.current_page == page {
                        if let Some(last) = self.open_pages.last() {
                            debug!("{} closed; current page is now {}", page, last);
                            self.current_page = *last;
                        }
                    }
                }
            }
        }
    }
}

/// How a scoped session run ended
#[derive(Debug)]
pub enum SessionOutcome<T> {
    /// The browser never came up; nothing ran
    LaunchFailed(E2eError),
    /// The browser started but the page could not be opened; the browser
    /// was torn down and nothing ran
    SetupFailed(E2eError),
    Completed(T),
    /// The body panicked; teardown still ran
    Panicked(String),
}

/// Result of [`SessionManager::with_session`]
#[derive(Debug)]
pub struct ScopedRun<T> {
    pub outcome: SessionOutcome<T>,
    /// Teardown result; `Ok` when launch failed and nothing was left to release
    pub release: E2eResult<()>,
}

pub struct SessionManager {
    launcher: Arc<dyn BrowserLauncher>,
    options: LaunchOptions,
}

impl SessionManager {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, options: LaunchOptions) -> Self {
        Self { launcher, options }
    }

    pub fn options(&self) -> &LaunchOptions {
        &self.options
    }

    /// Launch an isolated browser and open its single active page
    pub async fn acquire(&self, viewport: Option<Viewport>) -> E2eResult<BrowsingSession> {
        let (driver, options) = self.launch(viewport).await?;
        match self.open(driver, &options).await {
            Ok(session) => Ok(session),
            Err((mut session, e)) => {
                if let Err(release_err) = self.release(&mut session).await {
                    warn!("Teardown after failed page open also failed: {}", release_err);
                }
                Err(e)
            }
        }
    }

    async fn launch(&self, viewport: Option<Viewport>) -> E2eResult<(Box<dyn BrowserDriver>, LaunchOptions)> {
        let mut options = self.options.clone();
        if let Some(viewport) = viewport {
            options.viewport = viewport;
            options.args = options
                .args
                .into_iter()
                .map(|arg| {
                    if arg.starts_with("--window-size=") {
                        format!("--window-size={},{}", viewport.width, viewport.height)
                    } else {
                        arg
                    }
                })
                .collect();
        }

        let launch = tokio::time::timeout(options.launch_timeout, self.launcher.launch(&options)).await;
        match launch {
            Ok(Ok(driver)) => Ok((driver, options)),
            Ok(Err(e @ E2eError::LaunchFailure(_))) => Err(e),
            Ok(Err(e)) => Err(E2eError::LaunchFailure(e.to_string())),
            Err(_) => Err(E2eError::LaunchFailure(format!(
                "browser did not start within {} ms",
                options.launch_timeout.as_millis()
            ))),
        }
    }

    /// Open the first page on a launched browser. On failure the browser is
    /// handed back wrapped in an unreleased session so the caller tears it down.
    async fn open(
        &self,
        mut driver: Box<dyn BrowserDriver>,
        options: &LaunchOptions,
    ) -> Result<BrowsingSession, (BrowsingSession, E2eError)> {
        match driver.open_page(options.launch_timeout).await {
            Ok(page) => {
                info!("Session acquired ({} {}x{})", options.browser.as_str(), options.viewport.width, options.viewport.height);
                let mut session = BrowsingSession::new(driver, page, options.viewport);
                session.sync_pages();
                Ok(session)
            }
            Err(e) => {
                let session = BrowsingSession::new(driver, PageId(0), options.viewport);
                Err((session, E2eError::LaunchFailure(format!("could not open page: {}", e))))
            }
        }
    }

    /// Tear the session down: context, then browser, then driver.
    ///
    /// Every stage is attempted even if an earlier one failed; the first
    /// failure is returned. Releasing an already released session is a no-op.
    pub async fn release(&self, session: &mut BrowsingSession) -> E2eResult<()> {
        if session.released {
            return Ok(());
        }
        session.released = true;

        let mut first_error = None;

        if let Err(e) = session.driver.close_context().await {
            warn!("Closing browser context failed: {}", e);
            first_error.get_or_insert(e);
        }
        if let Err(e) = session.driver.close_browser().await {
            warn!("Closing browser failed: {}", e);
            first_error.get_or_insert(e);
        }
        if let Err(e) = session.driver.shutdown().await {
            warn!("Driver shutdown failed: {}", e);
            first_error.get_or_insert(e);
        }

        debug!("Session released");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Scoped acquisition: run `body` against a fresh session and release it
    /// on every exit path, including a panic inside `body`.
    pub async fn with_session<T, F>(&self, viewport: Option<Viewport>, body: F) -> ScopedRun<T>
    where
        F: for<'s> FnOnce(&'s mut BrowsingSession) -> BoxFuture<'s, T>,
    {
        let (driver, options) = match self.launch(viewport).await {
            Ok(launched) => launched,
            Err(e) => {
                return ScopedRun {
                    outcome: SessionOutcome::LaunchFailed(e),
                    release: Ok(()),
                }
            }
        };
        let mut session = match self.open(driver, &options).await {
            Ok(session) => session,
            Err((mut session, e)) => {
                let release = self.release(&mut session).await;
                return ScopedRun {
                    outcome: SessionOutcome::SetupFailed(e),
                    release,
                };
            }
        };

        let result = AssertUnwindSafe(body(&mut session)).catch_unwind().await;
        let release = self.release(&mut session).await;

        let outcome = match result {
            Ok(value) => SessionOutcome::Completed(value),
            Err(payload) => SessionOutcome::Panicked(panic_message(payload.as_ref())),
        };

        ScopedRun { outcome, release }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
