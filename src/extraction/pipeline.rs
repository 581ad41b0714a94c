//! Field extraction pipeline
//!
//! A job picks one [`ExtractionStrategy`]; the [`ExtractionPipeline`] feeds it
//! page snapshots, applies job-wide deduplication, and produces one
//! [`ExtractionRecord`] per page. Every requested field is present in a
//! record, possibly with an empty list.

use crate::config::{ExtractionMethod, FieldSpec, JobConfig, PhoneFormat};
use crate::error::{ExtractionError, Result};
use crate::extraction::ai::{self, TextModel};
use crate::extraction::patterns::{dedup_key, normalize_value, text_groups, FieldPattern};
use crate::extraction::relevance::{html_to_text, visible_text, ContentFragment, RelevanceScorer};
use crate::metrics::global_metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Values extracted for one page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    /// Page URL
    pub url: String,
    /// When the record was produced
    pub timestamp: DateTime<Utc>,
    /// Field name to deduplicated values, in discovery order
    pub fields: BTreeMap<String, Vec<String>>,
}

impl ExtractionRecord {
    /// Whether no field produced a value
    pub fn is_empty(&self) -> bool {
        self.fields.values().all(Vec::is_empty)
    }

    /// Total value count across fields
    pub fn value_count(&self) -> usize {
        self.fields.values().map(Vec::len).sum()
    }
}

/// Raw output of one strategy run
#[derive(Debug, Clone, Default)]
pub struct FieldExtraction {
    /// Field name to values (not yet deduplicated)
    pub values: BTreeMap<String, Vec<String>>,
    /// Field-scoped failures; the affected fields are empty
    pub errors: Vec<ExtractionError>,
}

impl FieldExtraction {
    /// Empty lists for every field
    pub fn empty(fields: &[FieldSpec]) -> Self {
        Self {
            values: fields.iter().map(|f| (f.name.clone(), Vec::new())).collect(),
            errors: Vec::new(),
        }
    }

    fn push(&mut self, field: &str, value: String) {
        self.values.entry(field.to_string()).or_default().push(value);
    }
}

/// Per-field record of emitted normalized values
#[derive(Debug, Clone, Default)]
pub struct DedupSet {
    seen: HashMap<String, HashSet<String>>,
}

impl DedupSet {
    /// Admit a value; false if an equal value was already emitted for the field
    pub fn admit(&mut self, field: &str, value: &str) -> bool {
        self.seen
            .entry(field.to_string())
            .or_default()
            .insert(dedup_key(value))
    }

    /// Number of distinct values seen for a field
    pub fn count(&self, field: &str) -> usize {
        self.seen.get(field).map_or(0, HashSet::len)
    }
}

/// Input handed to a strategy
#[derive(Debug, Clone, Copy)]
pub struct PageInput<'a> {
    /// Page URL
    pub url: &'a str,
    /// Full page markup
    pub html: &'a str,
    /// Relevance-reduced markup, or the full page when filtering is off
    pub focus: &'a str,
}

/// One interchangeable extraction strategy
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    /// Strategy name for logs
    fn name(&self) -> &'static str;

    /// Extract values for every field from one page
    async fn extract(&self, fields: &[FieldSpec], page: PageInput<'_>) -> FieldExtraction;
}

/// Precompiled patterns over text grouped by card
pub struct PatternStrategy {
    phone: PhoneFormat,
}

impl PatternStrategy {
    /// Strategy with the job's phone formatting
    pub fn new(phone: PhoneFormat) -> Self {
        Self { phone }
    }

    /// Synchronous core, usable without a runtime
    pub fn extract_sync(&self, fields: &[FieldSpec], html: &str) -> FieldExtraction {
        let mut out = FieldExtraction::empty(fields);
        let mut patterns = Vec::with_capacity(fields.len());
        for field in fields {
            match FieldPattern::for_field(field) {
                Ok(p) => patterns.push((field.name.as_str(), p)),
                Err(e) => {
                    warn!("Pattern for '{}' unusable: {}", field.name, e);
                    out.errors.push(e);
                }
            }
        }

        for group in text_groups(html) {
            for (name, pattern) in &patterns {
                if let Some(value) = pattern.first_match(&group, self.phone) {
                    out.push(name, value);
                }
            }
        }
        out
    }
}

#[async_trait]
impl ExtractionStrategy for PatternStrategy {
    fn name(&self) -> &'static str {
        "pattern"
    }

    async fn extract(&self, fields: &[FieldSpec], page: PageInput<'_>) -> FieldExtraction {
        self.extract_sync(fields, page.focus)
    }
}

/// User-supplied CSS selectors per field
pub struct SelectorStrategy {
    phone: PhoneFormat,
}

impl SelectorStrategy {
    /// Strategy with the job's phone formatting
    pub fn new(phone: PhoneFormat) -> Self {
        Self { phone }
    }

    /// Synchronous core
    pub fn extract_sync(&self, fields: &[FieldSpec], html: &str) -> FieldExtraction {
        let document = Html::parse_document(html);
        let mut out = FieldExtraction::empty(fields);

        for field in fields {
            let Some(raw_selector) = field.selector.as_deref() else {
                out.errors.push(ExtractionError::PatternFailure {
                    field: field.name.clone(),
                    reason: "no selector configured".to_string(),
                });
                continue;
            };
            let selector = match Selector::parse(raw_selector) {
                Ok(s) => s,
                Err(e) => {
                    out.errors.push(ExtractionError::PatternFailure {
                        field: field.name.clone(),
                        reason: format!("invalid selector {}: {}", raw_selector, e),
                    });
                    continue;
                }
            };

            // Matches grouped by their shared parent, deduplicated per group
            let mut order = Vec::new();
            let mut groups: HashMap<_, Vec<String>> = HashMap::new();
            for el in document.select(&selector) {
                let Some(value) = normalize_value(field.kind(), &visible_text(el), self.phone) else {
                    continue;
                };
                let parent = el.parent().map(|p| p.id()).unwrap_or_else(|| el.id());
                let group = groups.entry(parent).or_insert_with(|| {
                    order.push(parent);
                    Vec::new()
                });
                if !group.iter().any(|v| dedup_key(v) == dedup_key(&value)) {
                    group.push(value);
                }
            }
            for id in order {
                for value in groups.remove(&id).unwrap_or_default() {
                    out.push(&field.name, value);
                }
            }
        }
        out
    }
}

#[async_trait]
impl ExtractionStrategy for SelectorStrategy {
    fn name(&self) -> &'static str {
        "selector"
    }

    async fn extract(&self, fields: &[FieldSpec], page: PageInput<'_>) -> FieldExtraction {
        self.extract_sync(fields, page.html)
    }
}

/// Text-model extraction with presence verification
pub struct AiStrategy {
    model: Arc<dyn TextModel>,
    max_input_chars: usize,
    phone: PhoneFormat,
}

impl AiStrategy {
    /// Strategy over a text model
    pub fn new(model: Arc<dyn TextModel>, max_input_chars: usize, phone: PhoneFormat) -> Self {
        Self {
            model,
            max_input_chars,
            phone,
        }
    }
}

#[async_trait]
impl ExtractionStrategy for AiStrategy {
    fn name(&self) -> &'static str {
        "ai"
    }

    async fn extract(&self, fields: &[FieldSpec], page: PageInput<'_>) -> FieldExtraction {
        let text: String = html_to_text(page.focus)
            .chars()
            .take(self.max_input_chars)
            .collect();
        let mut out = FieldExtraction::empty(fields);
        if text.is_empty() {
            return out;
        }

        let prompt = ai::build_extraction_prompt(fields, &text);
        let reply = match self.model.complete(ai::EXTRACTION_SYSTEM_PROMPT, &prompt).await {
            Ok(r) => r,
            Err(e) => {
                warn!("Model {} failed on {}: {}", self.model.model_name(), page.url, e);
                out.errors.push(ExtractionError::ParseFailure(e.to_string()));
                return out;
            }
        };

        match ai::parse_extraction(&reply, fields, &text) {
            Ok(parsed) => {
                for field in fields {
                    for raw in parsed.get(&field.name).into_iter().flatten() {
                        if let Some(value) = normalize_value(field.kind(), raw, self.phone) {
                            out.push(&field.name, value);
                        }
                    }
                }
            }
            Err(e) => {
                warn!("Unusable model reply for {}: {}", page.url, e);
                out.errors.push(e);
            }
        }
        out
    }
}

/// Result of extracting one page
#[derive(Debug, Clone)]
pub struct PageExtraction {
    /// The appended record
    pub record: ExtractionRecord,
    /// Relevance score of the last snapshot's fragment
    pub fragment_score: i64,
    /// Snapshots whose relevance fragment came back empty
    pub empty_fragments: usize,
    /// Field-scoped failures
    pub errors: Vec<ExtractionError>,
}

/// Strategy + schema + job-wide dedup
pub struct ExtractionPipeline {
    strategy: Box<dyn ExtractionStrategy>,
    fields: Vec<FieldSpec>,
    relevance_filter: bool,
    dedup: DedupSet,
}

impl ExtractionPipeline {
    /// Pipeline with an explicit strategy
    pub fn new(
        strategy: Box<dyn ExtractionStrategy>,
        fields: Vec<FieldSpec>,
        relevance_filter: bool,
    ) -> Self {
        Self {
            strategy,
            fields,
            relevance_filter,
            dedup: DedupSet::default(),
        }
    }

    /// Pipeline for a job; `model` is required for the AI method
    pub fn for_job(config: &JobConfig, model: Option<Arc<dyn TextModel>>) -> Result<Self> {
        let strategy: Box<dyn ExtractionStrategy> = match config.extraction {
            ExtractionMethod::Pattern => Box::new(PatternStrategy::new(config.phone)),
            ExtractionMethod::Selector => Box::new(SelectorStrategy::new(config.phone)),
            ExtractionMethod::Ai => {
                let model = model.ok_or_else(|| {
                    crate::error::ConfigError::Missing("ai.api_key".to_string())
                })?;
                Box::new(AiStrategy::new(model, config.ai.max_input_chars, config.phone))
            }
        };
        Ok(Self::new(strategy, config.fields.clone(), config.relevance_filter))
    }

    /// Requested fields
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Job-wide dedup state
    pub fn dedup(&self) -> &DedupSet {
        &self.dedup
    }

    /// Extract one page from one or more markup snapshots
    pub async fn extract(&mut self, url: &str, snapshots: &[String]) -> PageExtraction {
        let mut fields: BTreeMap<String, Vec<String>> = self
            .fields
            .iter()
            .map(|f| (f.name.clone(), Vec::new()))
            .collect();
        let mut errors = Vec::new();
        let mut empty_fragments = 0;
        let mut fragment_score = 0;

        for html in snapshots {
            let fragment = if self.relevance_filter {
                let fragment = RelevanceScorer::select(html);
                if fragment.is_empty() {
                    empty_fragments += 1;
                    global_metrics().record_empty_fragment();
                    debug!("No relevant fragment on {} (best score {})", url, fragment.score);
                }
                fragment
            } else {
                ContentFragment {
                    html: String::new(),
                    size: html.len(),
                    score: 0,
                }
            };
            fragment_score = fragment.score;
            let focus = if self.relevance_filter {
                fragment.html.as_str()
            } else {
                html.as_str()
            };

            let raw = self
                .strategy
                .extract(&self.fields, PageInput { url, html, focus })
                .await;
            errors.extend(raw.errors);
            for (name, values) in raw.values {
                for value in values {
                    if self.dedup.admit(&name, &value) {
                        fields.entry(name.clone()).or_default().push(value);
                    }
                }
            }
        }

        let record = ExtractionRecord {
            url: url.to_string(),
            timestamp: Utc::now(),
            fields,
        };
        debug!(
            "{} extraction on {}: {} values",
            self.strategy.name(),
            url,
            record.value_count()
        );
        PageExtraction {
            record,
            fragment_score,
            empty_fragments,
            errors,
        }
    }
}

/// Tabular export keyed by a stable schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportTable {
    /// `url`, `timestamp`, then the schema fields
    pub columns: Vec<String>,
    /// One row per value index per record
    pub rows: Vec<Vec<String>>,
}

/// Flatten records into rows: row `i` of a record holds the `i`th value of
/// each field, padded with empty strings. A record with no values still
/// yields one row.
pub fn export_rows(records: &[ExtractionRecord], schema: &[String]) -> ExportTable {
    let mut columns = vec!["url".to_string(), "timestamp".to_string()];
    columns.extend(schema.iter().cloned());

    let mut rows = Vec::new();
    for record in records {
        let height = schema
            .iter()
            .map(|f| record.fields.get(f).map_or(0, Vec::len))
            .max()
            .unwrap_or(0)
            .max(1);
        for i in 0..height {
            let mut row = vec![record.url.clone(), record.timestamp.to_rfc3339()];
            row.extend(schema.iter().map(|f| {
                record
                    .fields
                    .get(f)
                    .and_then(|values| values.get(i))
                    .cloned()
                    .unwrap_or_default()
            }));
            rows.push(row);
        }
    }
    ExportTable { columns, rows }
}
