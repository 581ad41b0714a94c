//! In-memory browser for tests and dry runs
//!
//! [`FakeSessionFactory`] serves a scripted site: static pages by URL,
//! transient navigation failures, click-through page sequences, and
//! document-height growth on scroll. Every navigation is recorded.
//! Sessions count as active until closed or dropped.

use super::driver::{
    BrowserSession, Locator, NavigationOutcome, ScrollMetrics, ScrollTarget, SessionFactory,
    SessionLease,
};
use crate::error::{Error, FetchError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A scripted page
#[derive(Debug, Clone)]
pub struct FakePage {
    /// Markup served on navigation
    pub html: String,
    /// HTTP status reported
    pub status: u16,
    /// Markup shown after each successful click, in order
    pub click_sequence: Vec<String>,
    /// Document heights reported after each scroll, in order
    pub heights: Vec<f64>,
    /// Markup served once the document has grown
    pub grown_html: Option<String>,
}

impl FakePage {
    /// A 200 page with the given markup
    pub fn new<S: Into<String>>(html: S) -> Self {
        Self {
            html: html.into(),
            status: 200,
            click_sequence: Vec::new(),
            heights: Vec::new(),
            grown_html: None,
        }
    }

    /// Set the reported status
    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Pages revealed by successive clicks
    pub fn clicks(mut self, pages: Vec<String>) -> Self {
        self.click_sequence = pages;
        self
    }

    /// Heights reported after successive scrolls
    pub fn heights(mut self, heights: Vec<f64>, grown_html: Option<String>) -> Self {
        self.heights = heights;
        self.grown_html = grown_html;
        self
    }
}

#[derive(Default)]
struct SiteState {
    pages: HashMap<String, FakePage>,
    failures: HashMap<String, u32>,
    navigations: Vec<String>,
    scripts: Vec<String>,
    delay: Option<Duration>,
    failing_close: bool,
}

/// Session factory backed by an in-memory site
#[derive(Clone, Default)]
pub struct FakeSessionFactory {
    state: Arc<Mutex<SiteState>>,
    active: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
}

impl FakeSessionFactory {
    /// Empty site
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a page
    pub fn page<S: Into<String>>(self, url: S, page: FakePage) -> Self {
        self.state.lock().pages.insert(url.into(), page);
        self
    }

    /// Make the next `times` navigations to `url` time out
    pub fn fail_times<S: Into<String>>(self, url: S, times: u32) -> Self {
        self.state.lock().failures.insert(url.into(), times);
        self
    }

    /// Delay every navigation
    pub fn delay(self, delay: Duration) -> Self {
        self.state.lock().delay = Some(delay);
        self
    }

    /// Make every session close report an error (the session is still released)
    pub fn failing_close(self) -> Self {
        self.state.lock().failing_close = true;
        self
    }

    /// URLs navigated so far, in order
    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().navigations.clone()
    }

    /// Scripts evaluated so far
    pub fn scripts(&self) -> Vec<String> {
        self.state.lock().scripts.clone()
    }

    /// Sessions opened so far
    pub fn sessions_opened(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SessionFactory for FakeSessionFactory {
    async fn open(&self) -> Result<Box<dyn BrowserSession>> {
        self.opened.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(FakeSession {
            state: Arc::clone(&self.state),
            lease: SessionLease::acquire(&self.active),
            current: Mutex::new(None),
        }))
    }

    fn active_sessions(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

struct Current {
    url: String,
    page: FakePage,
    html: String,
    clicks: usize,
    scrolls: usize,
    scroll_y: f64,
}

/// One session on the fake site
pub struct FakeSession {
    state: Arc<Mutex<SiteState>>,
    lease: SessionLease,
    current: Mutex<Option<Current>>,
}

const VIEWPORT_HEIGHT: f64 = 1000.0;

fn find_in(html: &str, locator: &Locator) -> bool {
    let doc = Html::parse_document(html);
    match locator {
        Locator::Css(css) => Selector::parse(css)
            .map(|sel| doc.select(&sel).next().is_some())
            .unwrap_or(false),
        Locator::Text(text) => {
            let wanted = text.trim().to_lowercase();
            let Ok(sel) = Selector::parse("a, button, [role=\"button\"]") else {
                return false;
            };
            let found = doc
                .select(&sel)
                .any(|el| el.text().collect::<String>().trim().to_lowercase() == wanted);
            found
        }
        Locator::XPath(_) => false,
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<NavigationOutcome> {
        let delay = {
            let mut state = self.state.lock();
            state.navigations.push(url.to_string());
            state.delay
        };

        if let Some(delay) = delay {
            if delay > timeout {
                tokio::time::sleep(timeout).await;
                return Err(FetchError::Timeout(timeout.as_millis() as u64).into());
            }
            tokio::time::sleep(delay).await;
        }

        let page = {
            let mut state = self.state.lock();
            if let Some(remaining) = state.failures.get_mut(url) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(FetchError::Timeout(timeout.as_millis() as u64).into());
                }
            }
            state
                .pages
                .get(url)
                .cloned()
                .unwrap_or_else(|| FakePage::new("<html><body>Not Found</body></html>").status(404))
        };

        let status = page.status;
        *self.current.lock() = Some(Current {
            url: url.to_string(),
            html: page.html.clone(),
            page,
            clicks: 0,
            scrolls: 0,
            scroll_y: 0.0,
        });

        Ok(NavigationOutcome {
            final_url: url.to_string(),
            status: Some(status),
        })
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn wait_for_element(&self, locator: &Locator, _timeout: Duration) -> Result<bool> {
        let current = self.current.lock();
        Ok(current
            .as_ref()
            .map(|c| find_in(&c.html, locator))
            .unwrap_or(false))
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        self.state.lock().scripts.push(script.to_string());
        Ok(serde_json::Value::Null)
    }

    async fn scroll(&self, target: ScrollTarget) -> Result<()> {
        let mut current = self.current.lock();
        if let Some(c) = current.as_mut() {
            // Position is computed against the height before the scroll loads more.
            let height = height_at(&c.page, c.scrolls);
            c.scroll_y = match target {
                ScrollTarget::By(px) => (c.scroll_y + px).min(height),
                ScrollTarget::Bottom => (height - VIEWPORT_HEIGHT).max(0.0),
            };
            c.scrolls += 1;
            if height_at(&c.page, c.scrolls) > height_at(&c.page, 0) {
                if let Some(ref grown) = c.page.grown_html {
                    c.html = grown.clone();
                }
            }
        }
        Ok(())
    }

    async fn scroll_metrics(&self) -> Result<ScrollMetrics> {
        let current = self.current.lock();
        Ok(current
            .as_ref()
            .map(|c| ScrollMetrics {
                scroll_y: c.scroll_y,
                viewport_height: VIEWPORT_HEIGHT,
                document_height: height_at(&c.page, c.scrolls),
            })
            .unwrap_or_default())
    }

    async fn click(&self, locator: &Locator) -> Result<bool> {
        let mut current = self.current.lock();
        let Some(c) = current.as_mut() else {
            return Ok(false);
        };
        if !find_in(&c.html, locator) {
            return Ok(false);
        }
        if let Some(next) = c.page.click_sequence.get(c.clicks) {
            c.html = next.clone();
            c.clicks += 1;
        }
        Ok(true)
    }

    async fn content(&self) -> Result<String> {
        Ok(self
            .current
            .lock()
            .as_ref()
            .map(|c| c.html.clone())
            .unwrap_or_default())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self
            .current
            .lock()
            .as_ref()
            .map(|c| c.url.clone())
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn close(&self) -> Result<()> {
        if self.lease.release() && self.state.lock().failing_close {
            return Err(Error::cdp("target already detached"));
        }
        Ok(())
    }
}

fn height_at(page: &FakePage, scrolls: usize) -> f64 {
    if page.heights.is_empty() {
        return VIEWPORT_HEIGHT * 2.0;
    }
    let idx = scrolls.min(page.heights.len() - 1);
    page.heights[idx]
}
