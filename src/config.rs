//! Job configuration
//!
//! Everything a crawl job consumes: seeds, requested fields, limits,
//! pagination and extraction choices, retry budgets, and persistence knobs.
//! All sections deserialize from JSON with defaults for omitted keys.

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Semantic type of a requested field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Email address
    Email,
    /// North American phone number
    Phone,
    /// Person name
    Name,
    /// Currency amount
    Price,
    /// Street address
    Address,
    /// Calendar date
    Date,
    /// `Label: value` text keyed by the field name
    Generic,
}

const KIND_KEYWORDS: &[(FieldKind, &[&str])] = &[
    (FieldKind::Email, &["email", "mail"]),
    (FieldKind::Phone, &["phone", "tel", "telephone", "mobile", "cell"]),
    (FieldKind::Price, &["price", "cost", "amount"]),
    (FieldKind::Address, &["address", "location", "street"]),
    (FieldKind::Date, &["date"]),
    (FieldKind::Name, &["name"]),
];

impl FieldKind {
    /// Infer the kind from a field name
    ///
    /// The name is split into words at `_`, `-`, `.` and whitespace. A word
    /// matches a keyword when equal to it; keywords of five or more letters
    /// also match as a word prefix or suffix (`telephone`, `contactemail`).
    pub fn infer(name: &str) -> Self {
        let lower = name.to_lowercase().replace("e-mail", "email");
        let words: Vec<&str> = lower
            .split(|c: char| c == '_' || c == '-' || c == '.' || c.is_whitespace())
            .filter(|w| !w.is_empty())
            .collect();

        KIND_KEYWORDS
            .iter()
            .find(|(_, keywords)| {
                words.iter().any(|word| {
                    keywords.iter().any(|kw| {
                        *word == *kw
                            || (kw.len() >= 5 && (word.starts_with(kw) || word.ends_with(kw)))
                    })
                })
            })
            .map(|(kind, _)| *kind)
            .unwrap_or(FieldKind::Generic)
    }
}

/// A requested output field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FieldSpecRepr")]
pub struct FieldSpec {
    /// Column name
    pub name: String,
    /// Explicit kind (inferred from the name when absent)
    pub kind: Option<FieldKind>,
    /// CSS selector for selector-based extraction
    pub selector: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FieldSpecRepr {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        kind: Option<FieldKind>,
        #[serde(default)]
        selector: Option<String>,
    },
}

impl From<FieldSpecRepr> for FieldSpec {
    fn from(repr: FieldSpecRepr) -> Self {
        match repr {
            FieldSpecRepr::Name(name) => FieldSpec::new(name),
            FieldSpecRepr::Full {
                name,
                kind,
                selector,
            } => FieldSpec {
                name,
                kind,
                selector,
            },
        }
    }
}

impl FieldSpec {
    /// Field with an inferred kind and no selector
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            kind: None,
            selector: None,
        }
    }

    /// Field bound to a CSS selector
    pub fn with_selector<S: Into<String>, T: Into<String>>(name: S, selector: T) -> Self {
        Self {
            name: name.into(),
            kind: None,
            selector: Some(selector.into()),
        }
    }

    /// Effective kind
    pub fn kind(&self) -> FieldKind {
        self.kind.unwrap_or_else(|| FieldKind::infer(&self.name))
    }
}

/// How the next page is found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationStrategy {
    /// No pagination
    #[default]
    None,
    /// Click a labelled button repeatedly within one session
    ButtonClickLoop,
    /// Construct `?page=N` URLs
    NumberedUrl,
    /// Follow the anchor matched by a CSS selector
    SelectorBased,
    /// Follow the anchor matched by an XPath expression
    #[serde(rename = "xpath_based")]
    XPathBased,
    /// Follow the anchor whose text matches
    ButtonTextBased,
    /// Try common next-page patterns in order
    AutoDetect,
    /// Ask a text model and accept only confident answers
    AiConfidence,
}

/// Pagination parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Selected strategy
    pub strategy: PaginationStrategy,
    /// Button labels tried by the click loop
    pub labels: Vec<String>,
    /// Selector for [`PaginationStrategy::SelectorBased`]
    pub selector: Option<String>,
    /// Expression for [`PaginationStrategy::XPathBased`]
    pub xpath: Option<String>,
    /// Text for [`PaginationStrategy::ButtonTextBased`]
    pub button_text: Option<String>,
    /// Page cap per pagination chain
    pub max_pages: usize,
    /// Minimum model confidence (0-100)
    pub confidence_threshold: u8,
    /// Probe scroll growth when no next page is found
    pub infinite_scroll: bool,
    /// Log resolved URLs that do not look like pagination
    pub validate: bool,
    /// Wait after each click in milliseconds
    pub settle_ms: u64,
    /// Escalating element lookup timeouts for the click loop
    pub lookup_tiers_ms: [u64; 3],
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            strategy: PaginationStrategy::None,
            labels: vec![
                "Next".to_string(),
                "Load more".to_string(),
                "Show more".to_string(),
            ],
            selector: None,
            xpath: None,
            button_text: None,
            max_pages: 5,
            confidence_threshold: 70,
            infinite_scroll: false,
            validate: true,
            settle_ms: 2000,
            lookup_tiers_ms: [3000, 5000, 8000],
        }
    }
}

/// Field extraction strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    /// Precompiled patterns per field kind
    #[default]
    Pattern,
    /// User-supplied CSS selectors
    Selector,
    /// Text-model extraction
    Ai,
}

/// Phone output formatting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PhoneFormat {
    /// Prefix with `+1`
    pub country_code: bool,
    /// Group as `XXX-XXX-XXXX`
    pub hyphenate: bool,
}

/// Navigation retry budget
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per URL
    pub attempts: u32,
    /// Navigation timeout per attempt
    pub navigation_timeout_ms: u64,
    /// Best-effort network quiescence wait
    pub quiescence_timeout_ms: u64,
    /// Content below this size is rejected
    pub min_content_bytes: usize,
    /// Pause between attempts
    pub retry_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            navigation_timeout_ms: 30000,
            quiescence_timeout_ms: 5000,
            min_content_bytes: 500,
            retry_delay_ms: 1000,
        }
    }
}

/// Lazy-load scrolling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollConfig {
    /// Hard cap on scroll steps
    pub max_iterations: usize,
    /// Wait after a regular step
    pub settle_ms: u64,
    /// Wait after a forced scroll to the bottom
    pub bottom_settle_ms: u64,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            settle_ms: 1500,
            bottom_settle_ms: 3000,
        }
    }
}

/// Text-model endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Bearer token
    pub api_key: Option<String>,
    /// Model name
    pub model: String,
    /// OpenAI-compatible base URL
    pub base_url: String,
    /// Characters of page text sent per request
    pub max_input_chars: usize,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1/".to_string(),
            max_input_chars: 12000,
        }
    }
}

/// Detail-page enrichment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetailConfig {
    /// Anchors matching this selector are fetched as detail pages
    pub selector: Option<String>,
    /// Concurrent detail fetches
    pub concurrency: usize,
}

impl Default for DetailConfig {
    fn default() -> Self {
        Self {
            selector: None,
            concurrency: 4,
        }
    }
}

/// Persistence batching
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    /// Records per flush
    pub batch_size: usize,
    /// Resident memory that forces an early flush
    pub memory_ceiling_mb: Option<u64>,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            memory_ceiling_mb: None,
        }
    }
}

/// Complete configuration for one crawl job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Starting URLs
    pub seeds: Vec<String>,
    /// Requested fields, in output order
    pub fields: Vec<FieldSpec>,
    /// Link-following depth (0 = seeds only)
    pub max_depth: usize,
    /// Total page budget for the job
    pub max_pages: usize,
    /// Enqueue discovered links
    pub follow_links: bool,
    /// Only follow links on the seed's registrable domain
    pub stay_on_domain: bool,
    /// Pagination
    pub pagination: PaginationConfig,
    /// Scroll to trigger lazy loading before extraction
    pub lazy_load: bool,
    /// Scroll timing
    pub scroll: ScrollConfig,
    /// Extraction strategy
    pub extraction: ExtractionMethod,
    /// Reduce pages to their relevance fragment before pattern/AI extraction
    pub relevance_filter: bool,
    /// Phone formatting
    pub phone: PhoneFormat,
    /// Text-model endpoint
    pub ai: AiConfig,
    /// Retry budget
    pub retry: RetryConfig,
    /// Detail-page enrichment
    pub detail: DetailConfig,
    /// Persistence batching
    pub flush: FlushConfig,
    /// JSON-lines output file
    pub output: Option<PathBuf>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            fields: Vec::new(),
            max_depth: 0,
            max_pages: 50,
            follow_links: true,
            stay_on_domain: true,
            pagination: PaginationConfig::default(),
            lazy_load: false,
            scroll: ScrollConfig::default(),
            extraction: ExtractionMethod::Pattern,
            relevance_filter: true,
            phone: PhoneFormat::default(),
            ai: AiConfig::default(),
            retry: RetryConfig::default(),
            detail: DetailConfig::default(),
            flush: FlushConfig::default(),
            output: None,
        }
    }
}

impl JobConfig {
    /// Config with seeds and field names, everything else default
    pub fn new<I, S, F, T>(seeds: I, fields: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            seeds: seeds.into_iter().map(Into::into).collect(),
            fields: fields.into_iter().map(FieldSpec::new).collect(),
            ..Default::default()
        }
    }

    /// Load from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Field names in schema order
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Reject configurations the crawler cannot run
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.seeds.is_empty() {
            return Err(ConfigError::Missing("seeds".to_string()));
        }
        for seed in &self.seeds {
            let parsed = Url::parse(seed).map_err(|e| ConfigError::Invalid {
                field: "seeds".to_string(),
                reason: format!("{}: {}", seed, e),
            })?;
            if !matches!(parsed.scheme(), "http" | "https" | "file") {
                return Err(ConfigError::Invalid {
                    field: "seeds".to_string(),
                    reason: format!("unsupported scheme in {}", seed),
                });
            }
        }
        if self.fields.is_empty() {
            return Err(ConfigError::Missing("fields".to_string()));
        }
        if self.extraction == ExtractionMethod::Selector {
            if let Some(f) = self.fields.iter().find(|f| f.selector.is_none()) {
                return Err(ConfigError::Invalid {
                    field: f.name.clone(),
                    reason: "selector extraction needs a selector per field".to_string(),
                });
            }
        }
        let needs_model = self.extraction == ExtractionMethod::Ai
            || self.pagination.strategy == PaginationStrategy::AiConfidence;
        if needs_model && self.ai.api_key.is_none() {
            return Err(ConfigError::Missing("ai.api_key".to_string()));
        }
        if self.pagination.strategy != PaginationStrategy::None && self.pagination.max_pages == 0 {
            return Err(ConfigError::Invalid {
                field: "pagination.max_pages".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.retry.attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.attempts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        let required = match self.pagination.strategy {
            PaginationStrategy::SelectorBased => Some(("pagination.selector", self.pagination.selector.is_some())),
            PaginationStrategy::XPathBased => Some(("pagination.xpath", self.pagination.xpath.is_some())),
            PaginationStrategy::ButtonTextBased => {
                Some(("pagination.button_text", self.pagination.button_text.is_some()))
            }
            _ => None,
        };
        if let Some((name, false)) = required {
            return Err(ConfigError::Missing(name.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_kind_inference() {
        assert_eq!(FieldKind::infer("Email"), FieldKind::Email);
        assert_eq!(FieldKind::infer("phone_number"), FieldKind::Phone);
        assert_eq!(FieldKind::infer("full name"), FieldKind::Name);
        assert_eq!(FieldKind::infer("price"), FieldKind::Price);
        assert_eq!(FieldKind::infer("street address"), FieldKind::Address);
        assert_eq!(FieldKind::infer("posted date"), FieldKind::Date);
        assert_eq!(FieldKind::infer("company"), FieldKind::Generic);
        assert_eq!(FieldKind::infer("E-Mail"), FieldKind::Email);
        assert_eq!(FieldKind::infer("tel"), FieldKind::Phone);
        assert_eq!(FieldKind::infer("telephone"), FieldKind::Phone);
    }

    #[test]
    fn test_field_kind_ignores_embedded_short_keywords() {
        assert_eq!(FieldKind::infer("hotel_name"), FieldKind::Name);
        assert_eq!(FieldKind::infer("motel-address"), FieldKind::Address);
        assert_eq!(FieldKind::infer("hostel"), FieldKind::Generic);
        assert_eq!(FieldKind::infer("intel score"), FieldKind::Generic);
        assert_eq!(FieldKind::infer("mailing_address"), FieldKind::Address);
        assert_eq!(FieldKind::infer("contactEmail"), FieldKind::Email);
    }

    #[test]
    fn test_field_spec_from_json() {
        let fields: Vec<FieldSpec> = serde_json::from_str(
            r#"["email", {"name": "title", "selector": "h2.title"}, {"name": "x", "kind": "phone"}]"#,
        )
        .unwrap();
        assert_eq!(fields[0], FieldSpec::new("email"));
        assert_eq!(fields[1].selector.as_deref(), Some("h2.title"));
        assert_eq!(fields[2].kind(), FieldKind::Phone);
    }

    #[test]
    fn test_job_config_defaults_from_json() {
        let config: JobConfig =
            serde_json::from_str(r#"{"seeds": ["https://example.com"], "fields": ["email"]}"#).unwrap();
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.retry.min_content_bytes, 500);
        assert_eq!(config.pagination.confidence_threshold, 70);
        assert_eq!(config.flush.batch_size, 100);
        assert_eq!(config.extraction, ExtractionMethod::Pattern);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pagination_strategy_names() {
        let s: PaginationStrategy = serde_json::from_str("\"numbered_url\"").unwrap();
        assert_eq!(s, PaginationStrategy::NumberedUrl);
        let s: PaginationStrategy = serde_json::from_str("\"xpath_based\"").unwrap();
        assert_eq!(s, PaginationStrategy::XPathBased);
    }

    #[test]
    fn test_validate_rejects_missing_pieces() {
        let config = JobConfig::default();
        assert_eq!(config.validate(), Err(ConfigError::Missing("seeds".into())));

        let config = JobConfig::new(["not a url"], ["email"]);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        let mut config = JobConfig::new(["https://example.com"], ["email"]);
        config.extraction = ExtractionMethod::Selector;
        assert!(config.validate().is_err());

        let mut config = JobConfig::new(["https://example.com"], ["email"]);
        config.extraction = ExtractionMethod::Ai;
        assert_eq!(config.validate(), Err(ConfigError::Missing("ai.api_key".into())));

        let mut config = JobConfig::new(["https://example.com"], ["email"]);
        config.pagination.strategy = PaginationStrategy::SelectorBased;
        assert_eq!(
            config.validate(),
            Err(ConfigError::Missing("pagination.selector".into()))
        );
    }
}
