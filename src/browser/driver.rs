//! Narrow browser-automation interface
//!
//! The crawl core only talks to a browser through [`SessionFactory`] and
//! [`BrowserSession`]. The Chromium implementation lives in
//! [`super::controller`]; [`super::fake`] provides an in-memory site.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How to find an element on the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Locator {
    /// CSS selector
    Css(String),
    /// XPath expression
    XPath(String),
    /// Visible text of an anchor or button (case-insensitive, trimmed)
    Text(String),
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(s) => write!(f, "css={}", s),
            Locator::XPath(s) => write!(f, "xpath={}", s),
            Locator::Text(s) => write!(f, "text={}", s),
        }
    }
}

/// Where to scroll
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollTarget {
    /// Scroll forward by a number of pixels
    By(f64),
    /// Jump to the bottom of the document
    Bottom,
}

/// Scroll position and document size
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrollMetrics {
    /// Current vertical offset
    pub scroll_y: f64,
    /// Viewport height
    pub viewport_height: f64,
    /// Full document height
    pub document_height: f64,
}

impl ScrollMetrics {
    /// Whether the viewport bottom is within `slack` pixels of the document end
    pub fn near_bottom(&self, slack: f64) -> bool {
        self.scroll_y + self.viewport_height >= self.document_height - slack
    }
}

/// Outcome of a navigation call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationOutcome {
    /// Final URL after redirects
    pub final_url: String,
    /// HTTP status, when the engine exposes it
    pub status: Option<u16>,
}

impl NavigationOutcome {
    /// Whether the response counts as a success (unknown status is accepted)
    pub fn is_success(&self) -> bool {
        self.status.map_or(true, |s| (200..400).contains(&s))
    }
}

/// One isolated browser session (context + page)
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Navigate to a URL, bounded by `timeout`
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<NavigationOutcome>;

    /// Wait until the network is quiet, bounded by `timeout`.
    /// Implementations may approximate quiescence; callers treat it as best-effort.
    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<()>;

    /// Wait for a visible element; `Ok(false)` when the timeout expires
    async fn wait_for_element(&self, locator: &Locator, timeout: Duration) -> Result<bool>;

    /// Evaluate a script and return its JSON value
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Scroll the document
    async fn scroll(&self, target: ScrollTarget) -> Result<()>;

    /// Read scroll position and document height
    async fn scroll_metrics(&self) -> Result<ScrollMetrics>;

    /// Scroll an element into view and click it; `Ok(false)` if it is missing
    async fn click(&self, locator: &Locator) -> Result<bool>;

    /// Serialized document markup
    async fn content(&self) -> Result<String>;

    /// Current page URL
    async fn current_url(&self) -> Result<String>;

    /// Tear the session down
    async fn close(&self) -> Result<()>;
}

/// Opens fresh, isolated sessions
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open a new session that shares no state with earlier ones
    async fn open(&self) -> Result<Box<dyn BrowserSession>>;

    /// Number of sessions currently open
    fn active_sessions(&self) -> usize;
}

/// Counts one session as open until it is released or dropped.
///
/// Sessions hold a lease so the factory's count stays right when a worker is
/// aborted mid-fetch and `close` never runs.
#[derive(Debug)]
pub struct SessionLease {
    active: Arc<AtomicUsize>,
    released: AtomicBool,
}

impl SessionLease {
    /// Count a new session against `active`
    pub fn acquire(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::Relaxed);
        Self {
            active: Arc::clone(active),
            released: AtomicBool::new(false),
        }
    }

    /// Release the lease; false if it was already released
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.active.fetch_sub(1, Ordering::Relaxed);
        true
    }

    /// Whether the lease is still held
    pub fn is_held(&self) -> bool {
        !self.released.load(Ordering::Acquire)
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_releases_once() {
        let active = Arc::new(AtomicUsize::new(0));
        let lease = SessionLease::acquire(&active);
        let other = SessionLease::acquire(&active);
        assert_eq!(active.load(Ordering::Relaxed), 2);

        assert!(lease.release());
        assert!(!lease.release());
        assert!(!lease.is_held());
        assert_eq!(active.load(Ordering::Relaxed), 1);

        drop(lease);
        assert_eq!(active.load(Ordering::Relaxed), 1);
        drop(other);
        assert_eq!(active.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_locator_display() {
        assert_eq!(Locator::Css("a.next".into()).to_string(), "css=a.next");
        assert_eq!(Locator::Text("Next".into()).to_string(), "text=Next");
    }

    #[test]
    fn test_near_bottom() {
        let m = ScrollMetrics {
            scroll_y: 900.0,
            viewport_height: 1000.0,
            document_height: 2000.0,
        };
        assert!(m.near_bottom(200.0));
        assert!(!m.near_bottom(50.0));
    }

    #[test]
    fn test_navigation_outcome_success() {
        let mut outcome = NavigationOutcome {
            final_url: "https://example.com".into(),
            status: None,
        };
        assert!(outcome.is_success());
        outcome.status = Some(404);
        assert!(!outcome.is_success());
        outcome.status = Some(301);
        assert!(outcome.is_success());
    }
}
