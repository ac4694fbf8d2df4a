//! In-memory browser for exercising the harness without Node or a browser.
//!
//! A [`MockApp`] describes a small web application: routes that render
//! frames of elements, click handlers that mutate the page or a shared
//! [`Backend`], and optional faults. It implements [`BrowserLauncher`]; every
//! launch yields an independent session, while the backend and the call
//! journal are shared across sessions the way a real server outlives the
//! browsers that talk to it.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::driver::{
    BrowserDriver, BrowserLauncher, DriverEvent, ElementHandle, FrameInfo, LaunchOptions, LoadState, PageId,
};
use crate::error::{E2eError, E2eResult};
use crate::locator::Target;
use crate::spec::Viewport;

/// An element as the mock renders it
#[derive(Debug, Clone, PartialEq)]
pub struct MockElement {
    /// Every target this element answers to; text targets also match on `text`
    pub targets: Vec<Target>,
    pub text: String,
    pub value: String,
    pub visible: bool,
    pub enabled: bool,
}

impl MockElement {
    pub fn new(target: Target) -> Self {
        Self {
            targets: vec![target],
            text: String::new(),
            value: String::new(),
            visible: true,
            enabled: true,
        }
    }

    /// An element found by its rendered text
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            targets: Vec::new(),
            text,
            value: String::new(),
            visible: true,
            enabled: true,
        }
    }

    pub fn also(mut self, target: Target) -> Self {
        self.targets.push(target);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn matches(&self, target: &Target) -> bool {
        if self.targets.contains(target) {
            return true;
        }
        match target {
            Target::Text(needle) => !self.text.is_empty() && self.text.to_lowercase().contains(&needle.to_lowercase()),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockFrame {
    pub name: String,
    pub url: String,
    pub elements: Vec<MockElement>,
    /// Load-state waits on this frame run out their timeout
    pub stalled: bool,
    /// Load-state waits on this frame fail as if it was detached mid-wait
    pub detaching: bool,
}

impl MockFrame {
    pub fn main(elements: Vec<MockElement>) -> Self {
        Self {
            name: String::new(),
            url: String::new(),
            elements,
            stalled: false,
            detaching: false,
        }
    }

    pub fn child(name: impl Into<String>, url: impl Into<String>, elements: Vec<MockElement>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            elements,
            stalled: false,
            detaching: false,
        }
    }

    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    pub fn detaching(mut self) -> Self {
        self.detaching = true;
        self
    }

    fn matching(&self, target: &Target) -> impl Iterator<Item = &MockElement> {
        let target = target.clone();
        self.elements.iter().filter(move |e| e.matches(&target))
    }
}

#[derive(Debug, Clone)]
struct MockPage {
    url: String,
    frames: Vec<MockFrame>,
    viewport: Viewport,
}

/// Server-side state shared by every session of one app
#[derive(Debug, Default)]
pub struct Backend {
    pub records: BTreeMap<String, String>,
}

impl Backend {
    /// Insert unless the key exists; returns whether it was inserted
    pub fn insert_new(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if self.records.contains_key(&key) {
            return false;
        }
        self.records.insert(key, value.into());
        true
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.records.get(key).map(String::as_str)
    }
}

/// A driver call, as recorded in the journal
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Launch,
    OpenPage,
    Goto(String),
    Reload,
    Fill(Target, String),
    Click(Target),
    Scroll,
    SetViewport(Viewport),
    CloseContext,
    CloseBrowser,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub session: usize,
    pub call: Call,
}

/// What a click handler may do to the page it ran on
pub struct ClickContext<'a> {
    pub backend: &'a mut Backend,
    frames: &'a mut Vec<MockFrame>,
    navigate_to: Option<String>,
    popup: Option<String>,
    close: bool,
}

impl ClickContext<'_> {
    /// Current value of the first field answering to `target`
    pub fn value_of(&self, target: &Target) -> String {
        self.frames
            .iter()
            .flat_map(|frame| frame.matching(target))
            .map(|e| e.value.clone())
            .next()
            .unwrap_or_default()
    }

    /// Render an element in the main frame
    pub fn show(&mut self, element: MockElement) {
        if let Some(main) = self.frames.first_mut() {
            main.elements.push(element);
        }
    }

    /// Remove every element answering to `target`
    pub fn remove(&mut self, target: &Target) {
        for frame in self.frames.iter_mut() {
            frame.elements.retain(|e| !e.matches(target));
        }
    }

    pub fn navigate(&mut self, path: impl Into<String>) {
        self.navigate_to = Some(path.into());
    }

    /// Open a new page at `path`, as `target=_blank` links and OAuth flows do
    pub fn open_popup(&mut self, path: impl Into<String>) {
        self.popup = Some(path.into());
    }

    pub fn close_page(&mut self) {
        self.close = true;
    }
}

type Route = Arc<dyn Fn(&Backend) -> Vec<MockFrame> + Send + Sync>;
type ClickHandler = Arc<dyn Fn(&mut ClickContext<'_>) + Send + Sync>;

#[derive(Debug, Default, Clone)]
struct Faults {
    fail_launch: bool,
    fail_open_page: bool,
    fail_close_browser: bool,
    panic_on_click: Option<Target>,
    hang_on_click: Option<Target>,
    disconnect_on_read: bool,
}

struct AppInner {
    routes: HashMap<String, Route>,
    clicks: Vec<(Target, ClickHandler)>,
    faults: Faults,
    backend: Mutex<Backend>,
    journal: Mutex<Vec<JournalEntry>>,
    sessions: AtomicUsize,
}

/// Builder and launcher for an in-memory application
#[derive(Clone)]
pub struct MockApp {
    inner: Arc<AppInner>,
}

impl Default for MockApp {
    fn default() -> Self {
        Self::new()
    }
}

impl MockApp {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AppInner {
                routes: HashMap::new(),
                clicks: Vec::new(),
                faults: Faults::default(),
                backend: Mutex::new(Backend::default()),
                journal: Mutex::new(Vec::new()),
                sessions: AtomicUsize::new(0),
            }),
        }
    }

    fn inner_mut(&mut self) -> &mut AppInner {
        Arc::get_mut(&mut self.inner).expect("MockApp is configured before it is shared")
    }

    /// Render `path` with frames built from the current backend state
    pub fn route<F>(mut self, path: &str, render: F) -> Self
    where
        F: Fn(&Backend) -> Vec<MockFrame> + Send + Sync + 'static,
    {
        self.inner_mut().routes.insert(path.to_string(), Arc::new(render));
        self
    }

    /// Run `handler` when an element answering to `target` is clicked
    pub fn on_click<F>(mut self, target: Target, handler: F) -> Self
    where
        F: Fn(&mut ClickContext<'_>) + Send + Sync + 'static,
    {
        self.inner_mut().clicks.push((target, Arc::new(handler)));
        self
    }

    pub fn fail_launch(mut self) -> Self {
        self.inner_mut().faults.fail_launch = true;
        self
    }

    pub fn fail_open_page(mut self) -> Self {
        self.inner_mut().faults.fail_open_page = true;
        self
    }

    pub fn fail_close_browser(mut self) -> Self {
        self.inner_mut().faults.fail_close_browser = true;
        self
    }

    /// Clicking `target` panics inside the driver
    pub fn panic_on_click(mut self, target: Target) -> Self {
        self.inner_mut().faults.panic_on_click = Some(target);
        self
    }

    /// Clicking `target` never completes
    pub fn hang_on_click(mut self, target: Target) -> Self {
        self.inner_mut().faults.hang_on_click = Some(target);
        self
    }

    /// Reading text or enabled state reports a lost driver connection
    pub fn disconnect_on_read(mut self) -> Self {
        self.inner_mut().faults.disconnect_on_read = true;
        self
    }

    pub fn launcher(&self) -> Arc<dyn BrowserLauncher> {
        Arc::new(self.clone())
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.inner.journal.lock().clone()
    }

    /// Number of journal entries for which `pred` holds
    pub fn count(&self, pred: impl Fn(&JournalEntry) -> bool) -> usize {
        self.inner.journal.lock().iter().filter(|e| pred(e)).count()
    }

    pub fn sessions_launched(&self) -> usize {
        self.count(|e| e.call == Call::Launch)
    }

    pub fn with_backend<R>(&self, f: impl FnOnce(&mut Backend) -> R) -> R {
        f(&mut *self.inner.backend.lock())
    }

    fn record(&self, session: usize, call: Call) {
        self.inner.journal.lock().push(JournalEntry { session, call });
    }

    fn render(&self, url: &str) -> Vec<MockFrame> {
        let (_, path) = split_url(url);
        let path = path.split(['?', '#']).next().unwrap_or("/");
        let mut frames = match self.inner.routes.get(path) {
            Some(route) => route(&*self.inner.backend.lock()),
            None => vec![MockFrame::main(vec![MockElement::text("404 Not Found")])],
        };
        if frames.is_empty() {
            frames.push(MockFrame::main(Vec::new()));
        }
        if frames[0].url.is_empty() {
            frames[0].url = url.to_string();
        }
        frames
    }
}

#[async_trait]
impl BrowserLauncher for MockApp {
    async fn launch(&self, options: &LaunchOptions) -> E2eResult<Box<dyn BrowserDriver>> {
        let session = self.inner.sessions.fetch_add(1, Ordering::SeqCst);
        if self.inner.faults.fail_launch {
            return Err(E2eError::LaunchFailure("mock browser refused to start".into()));
        }
        self.record(session, Call::Launch);

        Ok(Box::new(MockDriver {
            app: self.clone(),
            session,
            viewport: options.viewport,
            pages: BTreeMap::new(),
            next_page: 1,
            events: Vec::new(),
        }))
    }
}

/// One mock browser session
pub struct MockDriver {
    app: MockApp,
    session: usize,
    viewport: Viewport,
    pages: BTreeMap<u64, MockPage>,
    next_page: u64,
    events: Vec<DriverEvent>,
}

impl MockDriver {
    fn new_page(&mut self, url: &str) -> PageId {
        let id = self.next_page;
        self.next_page += 1;
        let frames = if url == "about:blank" {
            vec![MockFrame::main(Vec::new())]
        } else {
            self.app.render(url)
        };
        self.pages.insert(
            id,
            MockPage {
                url: url.to_string(),
                frames,
                viewport: self.viewport,
            },
        );
        PageId(id)
    }

    fn page(&mut self, page: PageId) -> E2eResult<&mut MockPage> {
        self.pages
            .get_mut(&page.0)
            .ok_or_else(|| E2eError::Driver(format!("no such page: {}", page)))
    }

    fn frame(&mut self, page: PageId, frame: usize) -> E2eResult<&mut MockFrame> {
        self.page(page)?
            .frames
            .get_mut(frame)
            .ok_or_else(|| E2eError::Driver(format!("frame {} is not attached to {}", frame, page)))
    }

    fn read_fault(&self) -> E2eResult<()> {
        if self.app.inner.faults.disconnect_on_read {
            return Err(E2eError::Disconnected("mock driver connection dropped".into()));
        }
        Ok(())
    }

    fn element(&mut self, handle: &ElementHandle) -> E2eResult<&mut MockElement> {
        let frame = self.frame(handle.page, handle.frame)?;
        frame
            .elements
            .iter_mut()
            .filter(|e| e.matches(&handle.target))
            .nth(handle.nth)
            .ok_or_else(|| E2eError::Driver(format!("element detached: {}", handle)))
    }
}

#[async_trait]
impl BrowserDriver for MockDriver {
    async fn open_page(&mut self, _timeout: Duration) -> E2eResult<PageId> {
        if self.app.inner.faults.fail_open_page {
            return Err(E2eError::Driver("mock context refused to open a page".into()));
        }
        self.app.record(self.session, Call::OpenPage);
        Ok(self.new_page("about:blank"))
    }

    fn drain_events(&mut self) -> Vec<DriverEvent> {
        std::mem::take(&mut self.events)
    }

    async fn goto(&mut self, page: PageId, url: &str, _wait_until: LoadState, _timeout: Duration) -> E2eResult<()> {
        self.app.record(self.session, Call::Goto(url.to_string()));
        let frames = self.app.render(url);
        let page = self.page(page)?;
        page.url = url.to_string();
        page.frames = frames;
        Ok(())
    }

    async fn reload(&mut self, page: PageId, _timeout: Duration) -> E2eResult<()> {
        self.app.record(self.session, Call::Reload);
        let url = self.page(page)?.url.clone();
        let frames = self.app.render(&url);
        self.page(page)?.frames = frames;
        Ok(())
    }

    async fn wait_for_load_state(
        &mut self,
        page: PageId,
        frame: usize,
        state: LoadState,
        timeout: Duration,
    ) -> E2eResult<()> {
        let (stalled, detaching) = {
            let frame = self.frame(page, frame)?;
            (frame.stalled, frame.detaching)
        };
        if detaching {
            return Err(E2eError::Driver(format!(
                "wait_for_load_state {} on frame {}: frame was detached",
                state, frame
            )));
        }
        if stalled {
            tokio::time::sleep(timeout).await;
            return Err(E2eError::DriverTimeout {
                op: format!("wait_for_load_state {} on frame {}", state, frame),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        Ok(())
    }

    async fn frames(&mut self, page: PageId) -> E2eResult<Vec<FrameInfo>> {
        let page = self.page(page)?;
        Ok(page
            .frames
            .iter()
            .enumerate()
            .map(|(index, frame)| FrameInfo {
                index,
                name: frame.name.clone(),
                url: frame.url.clone(),
            })
            .collect())
    }

    async fn count(&mut self, page: PageId, frame: usize, target: &Target) -> E2eResult<usize> {
        Ok(self.frame(page, frame)?.matching(target).count())
    }

    async fn fill(&mut self, handle: &ElementHandle, value: &str, timeout: Duration) -> E2eResult<()> {
        self.app.record(self.session, Call::Fill(handle.target.clone(), value.to_string()));
        let element = self.element(handle)?;
        if !element.enabled {
            return Err(E2eError::DriverTimeout {
                op: format!("fill {} (disabled)", handle.target),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        element.value = value.to_string();
        Ok(())
    }

    async fn click(&mut self, handle: &ElementHandle, timeout: Duration) -> E2eResult<()> {
        let faults = self.app.inner.faults.clone();
        if faults.panic_on_click.as_ref() == Some(&handle.target) {
            panic!("mock driver crashed clicking {}", handle.target);
        }
        if faults.hang_on_click.as_ref() == Some(&handle.target) {
            self.app.record(self.session, Call::Click(handle.target.clone()));
            return futures::future::pending().await;
        }

        self.app.record(self.session, Call::Click(handle.target.clone()));
        let element = self.element(handle)?.clone();
        if !element.enabled {
            return Err(E2eError::DriverTimeout {
                op: format!("click {} (disabled)", handle.target),
                timeout_ms: timeout.as_millis() as u64,
            });
        }

        let handlers: Vec<ClickHandler> = self
            .app
            .inner
            .clicks
            .iter()
            .filter(|(target, _)| element.matches(target))
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        if handlers.is_empty() {
            return Ok(());
        }

        let app = self.app.clone();
        let page = self.page(handle.page)?;
        let mut backend = app.inner.backend.lock();
        let mut ctx = ClickContext {
            backend: &mut *backend,
            frames: &mut page.frames,
            navigate_to: None,
            popup: None,
            close: false,
        };
        for handler in handlers {
            handler(&mut ctx);
        }
        let (navigate_to, popup, close) = (ctx.navigate_to.take(), ctx.popup.take(), ctx.close);
        drop(backend);

        let origin = split_url(&page.url).0.to_string();
        if let Some(path) = navigate_to {
            let url = format!("{}{}", origin, path);
            page.frames = app.render(&url);
            page.url = url;
        }
        if let Some(path) = popup {
            let url = format!("{}{}", origin, path);
            let opened = self.new_page(&url);
            self.events.push(DriverEvent::PageOpened { page: opened, url });
        }
        if close {
            self.pages.remove(&handle.page.0);
            self.events.push(DriverEvent::PageClosed { page: handle.page });
        }
        Ok(())
    }

    async fn inner_text(&mut self, handle: &ElementHandle, _timeout: Duration) -> E2eResult<String> {
        self.read_fault()?;
        Ok(self.element(handle)?.text.clone())
    }

    async fn is_visible(&mut self, handle: &ElementHandle) -> E2eResult<bool> {
        Ok(self.element(handle).map(|e| e.visible).unwrap_or(false))
    }

    async fn is_enabled(&mut self, handle: &ElementHandle, _timeout: Duration) -> E2eResult<bool> {
        self.read_fault()?;
        Ok(self.element(handle)?.enabled)
    }

    async fn mouse_wheel(&mut self, page: PageId, _delta_x: f64, _delta_y: f64, _timeout: Duration) -> E2eResult<()> {
        self.page(page)?;
        self.app.record(self.session, Call::Scroll);
        Ok(())
    }

    async fn set_viewport(&mut self, page: PageId, viewport: Viewport, _timeout: Duration) -> E2eResult<()> {
        self.app.record(self.session, Call::SetViewport(viewport));
        self.page(page)?.viewport = viewport;
        Ok(())
    }

    async fn close_context(&mut self) -> E2eResult<()> {
        self.app.record(self.session, Call::CloseContext);
        self.pages.clear();
        Ok(())
    }

    async fn close_browser(&mut self) -> E2eResult<()> {
        self.app.record(self.session, Call::CloseBrowser);
        if self.app.inner.faults.fail_close_browser {
            return Err(E2eError::Driver("mock browser did not close".into()));
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> E2eResult<()> {
        self.app.record(self.session, Call::Shutdown);
        Ok(())
    }
}

/// Split `http://host:port/path` into origin and path
fn split_url(url: &str) -> (&str, &str) {
    let after_scheme = url.find("://").map(|i| i + 3).unwrap_or(0);
    match url[after_scheme..].find('/') {
        Some(i) => url.split_at(after_scheme + i),
        None => (url, "/"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_url() {
        assert_eq!(split_url("http://localhost:5173/register"), ("http://localhost:5173", "/register"));
        assert_eq!(split_url("http://localhost:5173"), ("http://localhost:5173", "/"));
    }

    #[test]
    fn test_text_match_is_case_insensitive_substring() {
        let element = MockElement::text("Email is already in use");
        assert!(element.matches(&Target::text("already in use")));
        assert!(element.matches(&Target::text("EMAIL")));
        assert!(!element.matches(&Target::xpath("html/body")));
    }

    #[tokio::test]
    async fn test_click_handler_updates_page_and_backend() {
        let submit = Target::Css("button[type=submit]".into());
        let email = Target::Css("#email".into());
        let app = MockApp::new()
            .route("/register", {
                let submit = submit.clone();
                let email = email.clone();
                move |_| {
                    vec![MockFrame::main(vec![
                        MockElement::new(email.clone()),
                        MockElement::new(submit.clone()).with_text("Register"),
                    ])]
                }
            })
            .on_click(submit.clone(), {
                let email = email.clone();
                move |ctx| {
                    let value = ctx.value_of(&email);
                    if ctx.backend.insert_new(format!("user:{}", value), "") {
                        ctx.show(MockElement::text("Registration successful!"));
                    }
                }
            });

        let mut driver = app.launch(&LaunchOptions::default()).await.unwrap();
        let page = driver.open_page(Duration::from_secs(1)).await.unwrap();
        driver
            .goto(page, "http://localhost:5173/register", LoadState::Load, Duration::from_secs(1))
            .await
            .unwrap();

        let field = ElementHandle { page, frame: 0, target: email, nth: 0 };
        driver.fill(&field, "a@example.com", Duration::from_secs(1)).await.unwrap();
        let button = ElementHandle { page, frame: 0, target: submit, nth: 0 };
        driver.click(&button, Duration::from_secs(1)).await.unwrap();

        let banner = Target::text("Registration successful");
        assert_eq!(driver.count(page, 0, &banner).await.unwrap(), 1);
        assert!(app.with_backend(|b| b.get("user:a@example.com").is_some()));
    }

    #[tokio::test]
    async fn test_frame_load_faults() {
        let app = MockApp::new().route("/embed", |_| {
            vec![
                MockFrame::main(Vec::new()),
                MockFrame::child("slow", "http://localhost:5173/slow", Vec::new()).stalled(),
                MockFrame::child("gone", "http://localhost:5173/gone", Vec::new()).detaching(),
            ]
        });
        let mut driver = app.launch(&LaunchOptions::default()).await.unwrap();
        let page = driver.open_page(Duration::from_secs(1)).await.unwrap();
        driver
            .goto(page, "http://localhost:5173/embed", LoadState::Load, Duration::from_secs(1))
            .await
            .unwrap();

        let timeout = Duration::from_millis(30);
        let start = std::time::Instant::now();
        let stalled = driver.wait_for_load_state(page, 1, LoadState::Load, timeout).await;
        assert!(matches!(stalled, Err(E2eError::DriverTimeout { .. })));
        assert!(start.elapsed() >= timeout);

        let detached = driver.wait_for_load_state(page, 2, LoadState::Load, timeout).await;
        assert!(matches!(detached, Err(E2eError::Driver(_))));
        assert!(driver.wait_for_load_state(page, 0, LoadState::Load, timeout).await.is_ok());
    }
}
