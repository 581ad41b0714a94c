//! Pagination strategy resolution
//!
//! Link strategies (selector, XPath, button text, auto-detect, model) resolve
//! to the absolute URL of the next page; the crawl loop enqueues it like any
//! other link. The click loop advances in place within the fetched session
//! and returns every content snapshot. Numbered pagination is URL
//! construction and is driven by the crawl loop.

use crate::browser::{BrowserSession, Locator};
use crate::config::{PaginationConfig, PaginationStrategy};
use crate::crawl::lazy_load::LazyLoader;
use crate::error::PaginationError;
use crate::extraction::ai::{self, LinkCandidate, TextModel};
use crate::extraction::links::{normalize_url, LinkExtractor};
use crate::metrics::global_metrics;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Candidate links offered to the model
const MAX_MODEL_CANDIDATES: usize = 150;

/// Pagination state computed for one page
#[derive(Debug, Clone, PartialEq)]
pub struct PaginationState {
    /// Strategy used
    pub strategy: PaginationStrategy,
    /// Labels tried by the click loop
    pub labels: Vec<String>,
    /// Minimum model confidence
    pub confidence_threshold: u8,
    /// Resolved next page, if any
    pub next_url: Option<String>,
    /// Markup after an infinite-scroll probe grew the page
    pub grown_html: Option<String>,
}

/// Why the click loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickStop {
    /// Page cap reached
    PageCap,
    /// No label resolved to a visible element
    NotFound,
    /// The element could not be clicked
    ClickFailed,
    /// A click did not change the content
    Unchanged,
    /// Job cancelled
    Cancelled,
}

/// Outcome of the click loop
#[derive(Debug, Clone)]
pub struct ClickLoopReport {
    /// Content snapshots, starting with the initial page
    pub snapshots: Vec<String>,
    /// Successful clicks
    pub clicks: usize,
    /// Why the loop ended
    pub stop: ClickStop,
    /// Error that ended the loop, if any
    pub error: Option<PaginationError>,
}

/// Resolves and advances pagination
pub struct PaginationResolver {
    config: PaginationConfig,
    model: Option<Arc<dyn TextModel>>,
    tiers: [Duration; 3],
    click_attempts: u32,
    settle: Duration,
    loader: LazyLoader,
}

impl PaginationResolver {
    /// Resolver for a pagination config
    pub fn new(config: PaginationConfig, model: Option<Arc<dyn TextModel>>) -> Self {
        let settle = Duration::from_millis(config.settle_ms);
        let tiers = config.lookup_tiers_ms.map(Duration::from_millis);
        Self {
            config,
            model,
            tiers,
            click_attempts: 3,
            settle,
            loader: LazyLoader::default(),
        }
    }

    /// Override lookup tiers and waits
    pub fn with_timing(mut self, tiers: [Duration; 3], settle: Duration, loader: LazyLoader) -> Self {
        self.tiers = tiers;
        self.settle = settle;
        self.loader = loader;
        self
    }

    /// Use this loader for the infinite-scroll probe
    pub fn with_loader(mut self, loader: LazyLoader) -> Self {
        self.loader = loader;
        self
    }

    /// Configured strategy
    pub fn strategy(&self) -> PaginationStrategy {
        self.config.strategy
    }

    /// Page cap per pagination chain
    pub fn max_pages(&self) -> usize {
        self.config.max_pages
    }

    fn state(&self, next_url: Option<String>, grown_html: Option<String>) -> PaginationState {
        PaginationState {
            strategy: self.config.strategy,
            labels: self.config.labels.clone(),
            confidence_threshold: self.config.confidence_threshold,
            next_url,
            grown_html,
        }
    }

    /// Resolve the next page of a fetched page.
    ///
    /// `ElementNotFound` ends pagination for this page only. The click loop
    /// and numbered pagination are not link strategies and resolve to none.
    /// Cancellation during a model call or scroll probe also resolves to none.
    #[instrument(skip(self, session, html, cancel))]
    pub async fn resolve(
        &self,
        session: &dyn BrowserSession,
        html: &str,
        page_url: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<PaginationState, PaginationError> {
        let strategy = self.config.strategy;
        if cancel.is_cancelled()
            || matches!(
                strategy,
                PaginationStrategy::None
                    | PaginationStrategy::ButtonClickLoop
                    | PaginationStrategy::NumberedUrl
            )
        {
            return Ok(self.state(None, None));
        }

        let base = Url::parse(page_url)
            .map_err(|e| PaginationError::ElementNotFound(format!("bad page URL {}: {}", page_url, e)))?;

        let found = match strategy {
            PaginationStrategy::SelectorBased => match self.config.selector.as_deref() {
                Some(css) => NextLinkFinder::by_selector(html, &base, css),
                None => None,
            },
            PaginationStrategy::XPathBased => match self.config.xpath.as_deref() {
                Some(expr) => match NextLinkFinder::by_xpath(html, &base, expr) {
                    Some(url) => Some(url),
                    None => self.xpath_in_page(session, &base, expr).await,
                },
                None => None,
            },
            PaginationStrategy::ButtonTextBased => match self.config.button_text.as_deref() {
                Some(text) => NextLinkFinder::by_text(html, &base, text),
                None => None,
            },
            PaginationStrategy::AutoDetect => NextLinkFinder::auto_detect(html, &base),
            PaginationStrategy::AiConfidence => {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Model pagination on {} cancelled", page_url);
                        return Ok(self.state(None, None));
                    }
                    found = self.ask_model(html, &base) => found,
                }
            }
            _ => None,
        };

        if let Some(url) = found {
            if self.config.validate && !looks_like_pagination(&url) {
                info!("Next page {} does not match a known pagination shape", url);
            }
            debug!("Resolved next page {} -> {}", page_url, url);
            return Ok(self.state(Some(url), None));
        }

        if self.config.infinite_scroll {
            let probed = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Scroll probe on {} cancelled", page_url);
                    return Ok(self.state(None, None));
                }
                probed = self.loader.probe_growth(session) => probed,
            };
            match probed {
                Ok(true) => {
                    let grown = session.content().await.ok();
                    info!("No next link on {}; scroll probe loaded more content", page_url);
                    return Ok(self.state(None, grown));
                }
                Ok(false) => debug!("Scroll probe on {} found no growth", page_url),
                Err(e) => warn!("Scroll probe on {} failed: {}", page_url, e),
            }
        }

        Err(PaginationError::ElementNotFound(self.describe_target()))
    }

    fn describe_target(&self) -> String {
        match self.config.strategy {
            PaginationStrategy::SelectorBased => {
                Locator::Css(self.config.selector.clone().unwrap_or_default()).to_string()
            }
            PaginationStrategy::XPathBased => {
                Locator::XPath(self.config.xpath.clone().unwrap_or_default()).to_string()
            }
            PaginationStrategy::ButtonTextBased => {
                Locator::Text(self.config.button_text.clone().unwrap_or_default()).to_string()
            }
            PaginationStrategy::AiConfidence => "model-proposed next link".to_string(),
            _ => "next-page link".to_string(),
        }
    }

    /// Evaluate an XPath the static translator cannot handle
    async fn xpath_in_page(&self, session: &dyn BrowserSession, base: &Url, expr: &str) -> Option<String> {
        let literal = serde_json::to_string(expr).ok()?;
        let script = format!(
            r#"(() => {{
                const node = document.evaluate({expr}, document, null,
                    XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue;
                if (!node || !node.getAttribute) return null;
                const anchor = node.closest('a[href]') || node.querySelector('a[href]');
                return anchor ? anchor.getAttribute('href') : node.getAttribute('href');
            }})()"#,
            expr = literal
        );
        match session.evaluate(&script).await {
            Ok(serde_json::Value::String(href)) => resolve_href(base, &href),
            Ok(_) => None,
            Err(e) => {
                warn!("XPath evaluation failed for {}: {}", expr, e);
                None
            }
        }
    }

    async fn ask_model(&self, html: &str, base: &Url) -> Option<String> {
        let Some(model) = self.model.as_ref() else {
            warn!("Model pagination configured without a text model");
            return None;
        };

        let own = normalize_url(base);
        let mut seen = HashSet::new();
        let candidates: Vec<LinkCandidate> = LinkExtractor::extract_all(html, base)
            .into_iter()
            .filter(|l| l.link_type.is_followable() && l.url != own)
            .filter(|l| seen.insert(l.url.clone()))
            .take(MAX_MODEL_CANDIDATES)
            .map(|l| LinkCandidate {
                url: l.url,
                text: l.text,
            })
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let prompt = ai::build_pagination_prompt(base.as_str(), &candidates);
        let reply = match model.complete(ai::PAGINATION_SYSTEM_PROMPT, &prompt).await {
            Ok(r) => r,
            Err(e) => {
                warn!("Model {} failed to propose a next page: {}", model.model_name(), e);
                return None;
            }
        };
        match ai::parse_pagination(&reply, &candidates) {
            Ok(answer) if answer.confidence >= self.config.confidence_threshold => answer.next_url,
            Ok(answer) => {
                info!(
                    "Model proposal {:?} below confidence threshold ({} < {})",
                    answer.next_url, answer.confidence, self.config.confidence_threshold
                );
                None
            }
            Err(e) => {
                warn!("Unusable pagination reply: {}", e);
                None
            }
        }
    }

    /// Click through "next"/"load more" controls within one session
    #[instrument(skip_all)]
    pub async fn click_through(
        &self,
        session: &dyn BrowserSession,
        initial_html: String,
        cancel: &CancellationToken,
    ) -> ClickLoopReport {
        let mut report = ClickLoopReport {
            snapshots: vec![initial_html],
            clicks: 0,
            stop: ClickStop::PageCap,
            error: None,
        };

        loop {
            if report.snapshots.len() >= self.config.max_pages {
                report.stop = ClickStop::PageCap;
                break;
            }
            if cancel.is_cancelled() {
                report.stop = ClickStop::Cancelled;
                break;
            }

            let locator = tokio::select! {
                _ = cancel.cancelled() => {
                    report.stop = ClickStop::Cancelled;
                    break;
                }
                found = self.find_clickable(session) => found,
            };
            let Some(locator) = locator else {
                report.stop = ClickStop::NotFound;
                report.error = Some(PaginationError::ElementNotFound(self.config.labels.join(" | ")));
                break;
            };

            let mut clicked = false;
            for attempt in 1..=self.click_attempts {
                match session.click(&locator).await {
                    Ok(true) => {
                        clicked = true;
                        break;
                    }
                    Ok(false) => debug!("Click attempt {} on {} found nothing", attempt, locator),
                    Err(e) => debug!("Click attempt {} on {} failed: {}", attempt, locator, e),
                }
            }
            if !clicked {
                report.stop = ClickStop::ClickFailed;
                report.error = Some(PaginationError::ClickFailed {
                    locator: locator.to_string(),
                    attempts: self.click_attempts,
                });
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    report.stop = ClickStop::Cancelled;
                    break;
                }
                _ = tokio::time::sleep(self.settle) => {}
            }

            let html = match session.content().await {
                Ok(h) => h,
                Err(e) => {
                    warn!("Could not read content after click: {}", e);
                    report.stop = ClickStop::ClickFailed;
                    break;
                }
            };
            if report.snapshots.last().map_or(false, |last| *last == html) {
                report.stop = ClickStop::Unchanged;
                break;
            }
            report.clicks += 1;
            global_metrics().record_pagination_hop();
            report.snapshots.push(html);
        }

        info!(
            "Click loop ended after {} clicks ({:?})",
            report.clicks, report.stop
        );
        report
    }

    /// First label visible within the escalating tiers
    async fn find_clickable(&self, session: &dyn BrowserSession) -> Option<Locator> {
        for tier in self.tiers {
            for label in &self.config.labels {
                let locator = Locator::Text(label.clone());
                match session.wait_for_element(&locator, tier).await {
                    Ok(true) => return Some(locator),
                    Ok(false) => {}
                    Err(e) => debug!("Lookup of {} failed: {}", locator, e),
                }
            }
        }
        None
    }
}

/// `base` with its `page` query parameter set to `n`
pub fn numbered_page_url(base: &str, n: usize) -> Option<String> {
    let mut url = Url::parse(base).ok()?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "page")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("page", &n.to_string());
    Some(url.to_string())
}

/// `?page=1` through `?page=max_pages`
pub fn numbered_urls(base: &str, max_pages: usize) -> Vec<String> {
    (1..=max_pages)
        .filter_map(|n| numbered_page_url(base, n))
        .collect()
}

/// Whether a URL has a recognizable pagination shape
pub fn looks_like_pagination(url: &str) -> bool {
    static SHAPE: OnceLock<Regex> = OnceLock::new();
    SHAPE
        .get_or_init(|| {
            Regex::new(r"(?i)([?&]page=\d+|/page/\d+|/p/\d+|-page-\d+|_\d+\.html?)")
                .expect("static pattern compiles")
        })
        .is_match(url)
}

/// Absolute, followable form of an href
fn resolve_href(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    let lower = href.to_lowercase();
    if href.is_empty()
        || href.starts_with('#')
        || lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
    {
        return None;
    }
    let url = base.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https" | "file") {
        return None;
    }
    let url = normalize_url(&url);
    (url != normalize_url(base)).then_some(url)
}

/// The href an element leads to: its own, an enclosing anchor's, or a
/// contained anchor's
fn href_of(el: ElementRef<'_>) -> Option<&str> {
    if let Some(href) = el.value().attr("href") {
        return Some(href);
    }
    for ancestor in el.ancestors() {
        if let Some(a) = ElementRef::wrap(ancestor) {
            if a.value().name() == "a" {
                if let Some(href) = a.value().attr("href") {
                    return Some(href);
                }
            }
        }
    }
    let anchors = Selector::parse("a[href]").ok()?;
    el.select(&anchors).find_map(|a| a.value().attr("href"))
}

fn squashed_text(el: ElementRef<'_>) -> String {
    el.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Static next-link matchers over fetched markup
pub struct NextLinkFinder;

impl NextLinkFinder {
    /// First element matching a CSS selector
    pub fn by_selector(html: &str, base: &Url, css: &str) -> Option<String> {
        let selector = match Selector::parse(css) {
            Ok(s) => s,
            Err(e) => {
                warn!("Invalid pagination selector {}: {}", css, e);
                return None;
            }
        };
        let document = Html::parse_document(html);
        let found = document
            .select(&selector)
            .find_map(|el| href_of(el).and_then(|h| resolve_href(base, h)));
        found
    }

    /// First element matching an XPath expression, when it translates to CSS
    pub fn by_xpath(html: &str, base: &Url, expr: &str) -> Option<String> {
        let query = xpath_to_css(expr)?;
        let selector = Selector::parse(&query.css).ok()?;
        let document = Html::parse_document(html);
        let found = document
            .select(&selector)
            .filter(|el| query.text.as_ref().map_or(true, |t| t.matches(&squashed_text(*el))))
            .find_map(|el| href_of(el).and_then(|h| resolve_href(base, h)));
        found
    }

    /// First anchor or button whose visible text matches (case-insensitive)
    pub fn by_text(html: &str, base: &Url, text: &str) -> Option<String> {
        let wanted = text.trim().to_lowercase();
        let selector = Selector::parse("a, button, [role=\"button\"]").ok()?;
        let document = Html::parse_document(html);
        let found = document
            .select(&selector)
            .filter(|el| squashed_text(*el).to_lowercase() == wanted)
            .find_map(|el| href_of(el).and_then(|h| resolve_href(base, h)));
        found
    }

    /// Ordered patterns: `rel=next`, next-like class or id, the page number
    /// after the current one, then textual "Next"/"»"
    pub fn auto_detect(html: &str, base: &Url) -> Option<String> {
        let document = Html::parse_document(html);
        let anchors = Selector::parse("a[href]").ok()?;
        let rel_next = Selector::parse("a[rel~=\"next\"], link[rel~=\"next\"]").ok()?;

        if let Some(url) = document
            .select(&rel_next)
            .find_map(|el| el.value().attr("href").and_then(|h| resolve_href(base, h)))
        {
            debug!("Auto-detected rel=next");
            return Some(url);
        }

        let next_like = |el: ElementRef<'_>| {
            let marks = |e: ElementRef<'_>| {
                let attrs = format!(
                    "{} {}",
                    e.value().attr("class").unwrap_or_default(),
                    e.value().attr("id").unwrap_or_default()
                )
                .to_lowercase();
                attrs.contains("next") && !attrs.contains("disabled")
            };
            marks(el) || el.parent().and_then(ElementRef::wrap).map_or(false, marks)
        };
        if let Some(url) = document
            .select(&anchors)
            .filter(|el| next_like(*el))
            .find_map(|el| el.value().attr("href").and_then(|h| resolve_href(base, h)))
        {
            debug!("Auto-detected next-like class/id");
            return Some(url);
        }

        if let Some(url) = Self::next_page_number(&document, base) {
            debug!("Auto-detected page-number link");
            return Some(url);
        }

        let textual = |text: &str| {
            let t = text.to_lowercase();
            matches!(t.as_str(), "»" | "›" | ">" | ">>" | "next" | "next page")
                || t.starts_with("next ")
                || t.starts_with("next»")
                || t.starts_with("next›")
        };
        let found = document
            .select(&anchors)
            .filter(|el| textual(&squashed_text(*el)))
            .find_map(|el| el.value().attr("href").and_then(|h| resolve_href(base, h)));
        if found.is_some() {
            debug!("Auto-detected textual next link");
        }
        found
    }

    /// Link whose text is the current page number plus one
    fn next_page_number(document: &Html, base: &Url) -> Option<String> {
        let anchors = Selector::parse("a[href]").ok()?;
        let markers = Selector::parse("[aria-current], .active, .current, .selected").ok()?;

        let numbers: Vec<(u32, ElementRef<'_>)> = document
            .select(&anchors)
            .filter_map(|el| squashed_text(el).parse::<u32>().ok().map(|n| (n, el)))
            .collect();
        if numbers.len() < 2 {
            return None;
        }

        let current = document
            .select(&markers)
            .find_map(|el| squashed_text(el).parse::<u32>().ok())
            .unwrap_or(1);
        numbers
            .into_iter()
            .find(|(n, _)| *n == current + 1)
            .and_then(|(_, el)| el.value().attr("href"))
            .and_then(|h| resolve_href(base, h))
    }
}

/// Text predicate carried by a translated XPath
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextMatch {
    /// Whitespace-normalized text equals
    Equals(String),
    /// Text contains
    Contains(String),
}

impl TextMatch {
    fn matches(&self, text: &str) -> bool {
        match self {
            TextMatch::Equals(v) => text == v.trim(),
            TextMatch::Contains(v) => text.contains(v.as_str()),
        }
    }
}

/// CSS equivalent of a simple XPath
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XPathQuery {
    /// Selector for the element steps
    pub css: String,
    /// Text filter on the final step
    pub text: Option<TextMatch>,
}

enum Predicate {
    Css(String),
    Text(TextMatch),
}

const TEXT_NODES: &[&str] = &[
    "text()",
    ".",
    "normalize-space()",
    "normalize-space(.)",
    "normalize-space(text())",
];

/// Translate the common XPath subset (`//` and `/` steps, attribute
/// equality/contains/presence, positional index, and text predicates on the
/// last step) to CSS. Anything else returns `None`.
pub fn xpath_to_css(expr: &str) -> Option<XPathQuery> {
    let mut rest = expr.trim();
    let mut css = String::new();
    let mut text = None;
    let mut first = true;

    while !rest.is_empty() {
        let (combinator, after) = if let Some(r) = rest.strip_prefix("//") {
            (" ", r)
        } else if let Some(r) = rest.strip_prefix('/') {
            (" > ", r)
        } else if first {
            ("", rest)
        } else {
            return None;
        };
        if text.is_some() {
            return None;
        }

        let end = step_end(after)?;
        let (name, predicates) = split_step(&after[..end])?;
        rest = &after[end..];

        if !first {
            css.push_str(combinator);
        }
        css.push_str(name);
        for raw in predicates {
            match parse_predicate(raw)? {
                Predicate::Css(s) => css.push_str(&s),
                Predicate::Text(t) => {
                    if text.is_some() {
                        return None;
                    }
                    text = Some(t);
                }
            }
        }
        first = false;
    }

    (!css.is_empty()).then_some(XPathQuery { css, text })
}

/// Index of the next top-level `/`
fn step_end(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '[' | '(') => depth += 1,
            (None, ']' | ')') => depth = depth.checked_sub(1)?,
            (None, '/') if depth == 0 => return Some(i),
            _ => {}
        }
    }
    (quote.is_none() && depth == 0).then_some(s.len())
}

fn split_step(step: &str) -> Option<(&str, Vec<&str>)> {
    let name_end = step.find('[').unwrap_or(step.len());
    let name = step[..name_end].trim();
    let valid_name = name == "*"
        || (!name.is_empty()
            && name.chars().next().map_or(false, |c| c.is_ascii_alphabetic())
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    if !valid_name {
        return None;
    }

    let mut predicates = Vec::new();
    let mut rest = &step[name_end..];
    while !rest.is_empty() {
        rest = rest.strip_prefix('[')?;
        let mut quote: Option<char> = None;
        let mut depth = 0usize;
        let mut close = None;
        for (i, c) in rest.char_indices() {
            match (quote, c) {
                (Some(q), c) if c == q => quote = None,
                (Some(_), _) => {}
                (None, '\'' | '"') => quote = Some(c),
                (None, '[') => depth += 1,
                (None, ']') if depth == 0 => {
                    close = Some(i);
                    break;
                }
                (None, ']') => depth -= 1,
                _ => {}
            }
        }
        let close = close?;
        predicates.push(rest[..close].trim());
        rest = rest[close + 1..].trim_start();
    }
    Some((name, predicates))
}

fn unquote(s: &str) -> Option<String> {
    let s = s.trim();
    let mut chars = s.chars();
    let open = chars.next()?;
    if s.len() >= 2 && (open == '\'' || open == '"') && s.ends_with(open) {
        Some(s[1..s.len() - 1].to_string())
    } else {
        None
    }
}

fn css_attr_value(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"")
}

fn is_attr_name(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':')
}

fn parse_predicate(raw: &str) -> Option<Predicate> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<usize>() {
        return (n > 0).then(|| Predicate::Css(format!(":nth-of-type({})", n)));
    }

    if let Some(inner) = raw.strip_prefix("contains(").and_then(|r| r.strip_suffix(')')) {
        let (subject, value) = inner.split_once(',')?;
        let subject = subject.trim();
        let value = unquote(value)?;
        if let Some(attr) = subject.strip_prefix('@') {
            if !is_attr_name(attr) {
                return None;
            }
            return Some(Predicate::Css(format!("[{}*=\"{}\"]", attr, css_attr_value(&value))));
        }
        return TEXT_NODES
            .contains(&subject)
            .then_some(Predicate::Text(TextMatch::Contains(value)));
    }

    if let Some((left, right)) = raw.split_once('=') {
        let left = left.trim();
        let value = unquote(right)?;
        if let Some(attr) = left.strip_prefix('@') {
            if !is_attr_name(attr) {
                return None;
            }
            return Some(Predicate::Css(format!("[{}=\"{}\"]", attr, css_attr_value(&value))));
        }
        return TEXT_NODES
            .contains(&left)
            .then_some(Predicate::Text(TextMatch::Equals(value)));
    }

    let attr = raw.strip_prefix('@')?;
    is_attr_name(attr).then(|| Predicate::Css(format!("[{}]", attr)))
}
