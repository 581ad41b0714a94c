//! Browser lifecycle management
//!
//! This module launches Chromium, hands out one isolated browser context per
//! session, and implements [`BrowserSession`] on top of chromiumoxide pages.

use super::driver::{
    BrowserSession, Locator, NavigationOutcome, ScrollMetrics, ScrollTarget, SessionFactory,
    SessionLease,
};
use crate::error::{BrowserError, Error, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as CdpBrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Configuration for browser launch
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Run in headless mode (default: true)
    pub headless: bool,
    /// Browser window width (default: 1920)
    pub width: u32,
    /// Browser window height (default: 1080)
    pub height: u32,
    /// Enable sandbox (default: true for production)
    pub sandbox: bool,
    /// User agent string (None = use default)
    pub user_agent: Option<String>,
    /// Launch/request timeout in milliseconds (default: 30000)
    pub timeout_ms: u64,
    /// Path to Chrome/Chromium executable (None = auto-detect)
    pub chrome_path: Option<String>,
    /// Additional Chrome arguments
    pub extra_args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            width: 1920,
            height: 1080,
            sandbox: true,
            user_agent: None,
            timeout_ms: 30000,
            chrome_path: None,
            extra_args: Vec::new(),
        }
    }
}

impl BrowserConfig {
    /// Create a new config builder
    pub fn builder() -> BrowserConfigBuilder {
        BrowserConfigBuilder::default()
    }
}

/// Builder for BrowserConfig
#[derive(Default)]
pub struct BrowserConfigBuilder {
    config: BrowserConfig,
}

impl BrowserConfigBuilder {
    /// Set headless mode
    pub fn headless(mut self, headless: bool) -> Self {
        self.config.headless = headless;
        self
    }

    /// Set viewport dimensions
    pub fn viewport(mut self, width: u32, height: u32) -> Self {
        self.config.width = width;
        self.config.height = height;
        self
    }

    /// Enable/disable sandbox
    pub fn sandbox(mut self, sandbox: bool) -> Self {
        self.config.sandbox = sandbox;
        self
    }

    /// Set user agent
    pub fn user_agent<S: Into<String>>(mut self, ua: S) -> Self {
        self.config.user_agent = Some(ua.into());
        self
    }

    /// Set request timeout
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeout_ms = ms;
        self
    }

    /// Set Chrome path
    pub fn chrome_path<S: Into<String>>(mut self, path: S) -> Self {
        self.config.chrome_path = Some(path.into());
        self
    }

    /// Add extra Chrome argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.config.extra_args.push(arg.into());
        self
    }

    /// Build the config
    pub fn build(self) -> BrowserConfig {
        self.config
    }
}

/// Launches Chromium and opens isolated sessions on it
pub struct ChromiumSessionFactory {
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
    config: BrowserConfig,
    active: Arc<AtomicUsize>,
}

impl ChromiumSessionFactory {
    /// Launch a browser with default config
    #[instrument]
    pub async fn new() -> Result<Self> {
        Self::launch(BrowserConfig::default()).await
    }

    /// Launch a browser with custom config
    #[instrument(skip(config))]
    pub async fn launch(config: BrowserConfig) -> Result<Self> {
        info!(
            "Launching browser with config: headless={}",
            config.headless
        );

        let mut builder = CdpBrowserConfig::builder()
            .viewport(chromiumoxide::handler::viewport::Viewport {
                width: config.width,
                height: config.height,
                device_scale_factor: None,
                emulating_mobile: false,
                is_landscape: true,
                has_touch: false,
            })
            .request_timeout(Duration::from_millis(config.timeout_ms));

        if !config.headless {
            builder = builder.with_head();
        }

        if !config.sandbox {
            builder = builder.arg("--no-sandbox");
        }

        if let Some(ref path) = config.chrome_path {
            builder = builder.chrome_executable(path);
        }

        for arg in &config.extra_args {
            builder = builder.arg(arg);
        }

        let cdp_config = builder
            .build()
            .map_err(|e| BrowserError::ConfigError(e.to_string()))?;

        let (browser, mut handler) = Browser::launch(cdp_config)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    warn!("Browser handler event error");
                    break;
                }
            }
            debug!("Browser handler finished");
        });

        info!("Browser launched successfully");

        Ok(Self {
            browser: Arc::new(browser),
            handler: handler_task,
            config,
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Get the browser configuration
    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    /// Close the browser once every session has been released
    #[instrument(skip(self))]
    pub async fn close(self) -> Result<()> {
        info!("Closing browser");

        match Arc::try_unwrap(self.browser) {
            Ok(mut browser) => {
                browser.close().await.map_err(|e| Error::cdp(e.to_string()))?;
            }
            Err(_) => warn!("Browser still referenced by open sessions; leaving it to drop"),
        }

        match tokio::time::timeout(Duration::from_secs(5), self.handler).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Browser handler task ended abnormally: {}", e),
            Err(_) => debug!("Browser handler did not finish within 5s"),
        }

        info!("Browser closed");
        Ok(())
    }
}

#[async_trait]
impl SessionFactory for ChromiumSessionFactory {
    async fn open(&self) -> Result<Box<dyn BrowserSession>> {
        let context_id = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|e| BrowserError::SessionFailed(e.to_string()))?
            .result
            .browser_context_id;

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(BrowserError::SessionFailed)?;

        let page = self
            .browser
            .new_page(target)
            .await
            .map_err(|e| BrowserError::SessionFailed(e.to_string()))?;

        if let Some(ref ua) = self.config.user_agent {
            page.set_user_agent(SetUserAgentOverrideParams::new(ua.clone()))
                .await
                .map_err(|e| BrowserError::SessionFailed(e.to_string()))?;
        }

        debug!("Opened isolated session");

        Ok(Box::new(ChromiumSession {
            page,
            browser: Arc::clone(&self.browser),
            context_id,
            lease: SessionLease::acquire(&self.active),
        }))
    }

    fn active_sessions(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

/// Resolves a locator to a visible element; shared by wait and click scripts.
const LOCATE_FN: &str = r#"
    const __siftVisible = (el) => {
        if (!el) return false;
        const style = window.getComputedStyle(el);
        if (style.display === 'none' || style.visibility === 'hidden') return false;
        const rect = el.getBoundingClientRect();
        return rect.width > 0 && rect.height > 0;
    };
    const __siftLocate = (kind, value) => {
        let candidates = [];
        if (kind === 'css') {
            candidates = Array.from(document.querySelectorAll(value));
        } else if (kind === 'xpath') {
            const snap = document.evaluate(value, document, null,
                XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
            for (let i = 0; i < snap.snapshotLength; i++) candidates.push(snap.snapshotItem(i));
        } else {
            const wanted = value.trim().toLowerCase();
            candidates = Array.from(document.querySelectorAll('a, button, [role="button"], input[type="button"], input[type="submit"]'))
                .filter(el => ((el.innerText || el.value || '').trim().toLowerCase() === wanted));
        }
        return candidates.find(__siftVisible) || null;
    };
"#;

fn locator_parts(locator: &Locator) -> (&'static str, String) {
    let (kind, value) = match locator {
        Locator::Css(v) => ("css", v),
        Locator::XPath(v) => ("xpath", v),
        Locator::Text(v) => ("text", v),
    };
    // serde_json string encoding is a valid JS string literal
    let literal = serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string());
    (kind, literal)
}

/// A single isolated Chromium context with one page
pub struct ChromiumSession {
    page: Page,
    browser: Arc<Browser>,
    context_id: BrowserContextId,
    lease: SessionLease,
}

impl ChromiumSession {
    async fn dispose(page: Page, browser: &Browser, context_id: BrowserContextId) {
        if let Err(e) = page.close().await {
            debug!("Page close failed: {}", e);
        }
        if let Err(e) = browser
            .execute(DisposeBrowserContextParams::new(context_id))
            .await
        {
            debug!("Context dispose failed: {}", e);
        }
    }

    async fn eval_value(&self, script: &str) -> Result<serde_json::Value> {
        let value = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::ScriptFailed(e.to_string()))?
            .into_value::<serde_json::Value>()
            .map_err(|e| BrowserError::ScriptFailed(e.to_string()))?;
        Ok(value)
    }

    async fn response_status(&self) -> Option<u16> {
        let script = r#"
            (() => {
                const entry = performance.getEntriesByType('navigation')[0];
                return entry && entry.responseStatus ? entry.responseStatus : null;
            })()
        "#;
        self.eval_value(script)
            .await
            .ok()
            .and_then(|v| v.as_u64())
            .and_then(|s| u16::try_from(s).ok())
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    #[instrument(skip(self))]
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<NavigationOutcome> {
        let timeout_ms = timeout.as_millis() as u64;
        tokio::time::timeout(timeout, self.page.goto(url))
            .await
            .map_err(|_| crate::error::FetchError::Timeout(timeout_ms))?
            .map_err(|e| crate::error::FetchError::NavigationRejected(e.to_string()))?;

        let final_url = self
            .page
            .url()
            .await
            .map_err(|e| Error::cdp(e.to_string()))?
            .unwrap_or_else(|| url.to_string());
        let status = self.response_status().await;

        debug!("Navigation complete: {} -> {} ({:?})", url, final_url, status);
        Ok(NavigationOutcome { final_url, status })
    }

    /// Approximates network quiescence as the load event plus 500ms of
    /// grace; in-flight XHR/fetch requests after that are not tracked.
    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<()> {
        let script = r#"
            new Promise(resolve => {
                if (document.readyState === 'complete') {
                    setTimeout(() => resolve(true), 500);
                } else {
                    window.addEventListener('load', () => {
                        setTimeout(() => resolve(true), 500);
                    });
                }
            })
        "#;
        tokio::time::timeout(timeout, self.page.evaluate(script))
            .await
            .map_err(|_| crate::error::FetchError::Timeout(timeout.as_millis() as u64))?
            .map_err(|e| Error::cdp(e.to_string()))?;
        Ok(())
    }

    async fn wait_for_element(&self, locator: &Locator, timeout: Duration) -> Result<bool> {
        let (kind, value) = locator_parts(locator);
        let timeout_ms = timeout.as_millis() as u64;
        let script = format!(
            r#"
            new Promise(resolve => {{
                {locate}
                const start = Date.now();
                const check = () => {{
                    if (__siftLocate('{kind}', {value})) {{
                        resolve(true);
                    }} else if (Date.now() - start > {timeout_ms}) {{
                        resolve(false);
                    }} else {{
                        setTimeout(check, 100);
                    }}
                }};
                check();
            }})
            "#,
            locate = LOCATE_FN,
        );

        let budget = timeout + Duration::from_millis(1000);
        match tokio::time::timeout(budget, self.eval_value(&script)).await {
            Ok(value) => Ok(value?.as_bool().unwrap_or(false)),
            Err(_) => Ok(false),
        }
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        self.eval_value(script).await
    }

    async fn scroll(&self, target: ScrollTarget) -> Result<()> {
        let script = match target {
            ScrollTarget::By(px) => format!("(() => {{ window.scrollBy(0, {}); return true; }})()", px),
            ScrollTarget::Bottom => {
                "(() => { window.scrollTo(0, document.body.scrollHeight); return true; })()".to_string()
            }
        };
        self.eval_value(&script).await?;
        Ok(())
    }

    async fn scroll_metrics(&self) -> Result<ScrollMetrics> {
        let script = r#"
            (() => ({
                scroll_y: window.scrollY || window.pageYOffset || 0,
                viewport_height: window.innerHeight,
                document_height: Math.max(
                    document.body ? document.body.scrollHeight : 0,
                    document.documentElement.scrollHeight
                )
            }))()
        "#;
        let value = self.eval_value(script).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn click(&self, locator: &Locator) -> Result<bool> {
        let (kind, value) = locator_parts(locator);
        let script = format!(
            r#"
            (() => {{
                {locate}
                const el = __siftLocate('{kind}', {value});
                if (!el) return false;
                el.scrollIntoView({{ block: 'center' }});
                el.click();
                return true;
            }})()
            "#,
            locate = LOCATE_FN,
        );
        let clicked = self.eval_value(&script).await?;
        Ok(clicked.as_bool().unwrap_or(false))
    }

    async fn content(&self) -> Result<String> {
        self.page.content().await.map_err(|e| Error::cdp(e.to_string()))
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self
            .page
            .url()
            .await
            .map_err(|e| Error::cdp(e.to_string()))?
            .unwrap_or_default())
    }

    async fn close(&self) -> Result<()> {
        if !self.lease.release() {
            return Ok(());
        }
        Self::dispose(self.page.clone(), &self.browser, self.context_id.clone()).await;
        Ok(())
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        if !self.lease.release() {
            return;
        }
        // Dropped without close (aborted worker): dispose in the background
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let page = self.page.clone();
                let browser = Arc::clone(&self.browser);
                let context_id = self.context_id.clone();
                runtime.spawn(async move {
                    Self::dispose(page, &browser, context_id).await;
                });
            }
            Err(_) => warn!("Session dropped outside a runtime; context left to browser shutdown"),
        }
    }
}
