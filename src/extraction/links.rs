//! Link extraction and frontier discovery
//!
//! Anchors are read from fetched markup, resolved against the page URL, and
//! classified. Discovery keeps only followable http(s) targets, optionally
//! restricted to the seed's registrable domain.

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;
use url::Url;

/// Type of link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    /// Internal link (same registrable domain)
    Internal,
    /// External link (different domain)
    External,
    /// Fragment-only link (same page)
    Anchor,
    /// mailto: link
    Email,
    /// tel: link
    Phone,
    /// JavaScript link
    JavaScript,
    /// Other/unknown
    Other,
}

impl LinkType {
    /// Whether a crawler can navigate to this link
    pub fn is_followable(&self) -> bool {
        matches!(self, LinkType::Internal | LinkType::External)
    }
}

/// An extracted link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedLink {
    /// Absolute URL (raw href when it cannot be resolved)
    pub url: String,
    /// Link text content
    pub text: String,
    /// Type of link
    pub link_type: LinkType,
    /// Rel attribute
    pub rel: Option<String>,
    /// Position in document (order found)
    pub position: usize,
}

/// Registrable domain of a host: the last two labels, or three for
/// two-letter country TLDs with a generic second level (`example.co.uk`).
pub fn registrable_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_lowercase();
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 || host.parse::<std::net::IpAddr>().is_ok() {
        return host;
    }
    let n = labels.len();
    let tld = labels[n - 1];
    let second = labels[n - 2];
    let generic_second = matches!(second, "co" | "com" | "org" | "net" | "ac" | "gov" | "edu");
    let keep = if tld.len() == 2 && generic_second { 3 } else { 2 };
    labels[n - keep..].join(".")
}

/// Canonical form used for frontier and visited keys (fragment dropped)
pub fn normalize_url(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

/// Link extraction functionality
pub struct LinkExtractor;

impl LinkExtractor {
    /// Extract and classify all anchors
    pub fn extract_all(html: &str, base: &Url) -> Vec<ExtractedLink> {
        let document = Html::parse_document(html);
        let Ok(selector) = Selector::parse("a[href]") else {
            return Vec::new();
        };
        let base_domain = base.host_str().map(registrable_domain);

        document
            .select(&selector)
            .enumerate()
            .filter_map(|(position, el)| {
                let href = el.value().attr("href")?.trim();
                let text: String = el.text().collect::<Vec<_>>().join(" ");
                let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
                let rel = el.value().attr("rel").map(String::from);
                let (url, link_type) = Self::classify(href, base, base_domain.as_deref());
                Some(ExtractedLink {
                    url,
                    text,
                    link_type,
                    rel,
                    position,
                })
            })
            .collect()
    }

    fn classify(href: &str, base: &Url, base_domain: Option<&str>) -> (String, LinkType) {
        let lower = href.to_lowercase();
        if href.is_empty() || href.starts_with('#') {
            return (href.to_string(), LinkType::Anchor);
        }
        if lower.starts_with("mailto:") {
            return (href.to_string(), LinkType::Email);
        }
        if lower.starts_with("tel:") {
            return (href.to_string(), LinkType::Phone);
        }
        if lower.starts_with("javascript:") {
            return (href.to_string(), LinkType::JavaScript);
        }
        match base.join(href) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                let same = match (url.host_str(), base_domain) {
                    (Some(host), Some(domain)) => registrable_domain(host) == domain,
                    _ => false,
                };
                let kind = if same {
                    LinkType::Internal
                } else {
                    LinkType::External
                };
                (normalize_url(&url), kind)
            }
            Ok(url) => (url.to_string(), LinkType::Other),
            Err(_) => (href.to_string(), LinkType::Other),
        }
    }

    /// Followable, unique, absolute targets in document order.
    ///
    /// With `stay_on_domain`, only links on the registrable domain of `base`
    /// are kept.
    pub fn discover(html: &str, base: &Url, stay_on_domain: bool) -> Vec<String> {
        let mut seen = HashSet::new();
        let links: Vec<String> = Self::extract_all(html, base)
            .into_iter()
            .filter(|l| l.link_type.is_followable())
            .filter(|l| !stay_on_domain || l.link_type == LinkType::Internal)
            .filter(|l| l.url != normalize_url(base))
            .filter(|l| seen.insert(l.url.clone()))
            .map(|l| l.url)
            .collect();
        debug!("Discovered {} followable links on {}", links.len(), base);
        links
    }
}
