//! Content extraction module
//!
//! Relevance reduction, field extraction strategies, and link discovery.

pub mod ai;
pub mod links;
pub mod patterns;
pub mod phone;
pub mod pipeline;
pub mod relevance;

pub use ai::{OpenAiModel, TextModel};
pub use links::{normalize_url, registrable_domain, ExtractedLink, LinkExtractor, LinkType};
pub use phone::format_phone;
pub use pipeline::{
    export_rows, AiStrategy, DedupSet, ExportTable, ExtractionPipeline, ExtractionRecord,
    ExtractionStrategy, FieldExtraction, PageExtraction, PageInput, PatternStrategy,
    SelectorStrategy,
};
pub use relevance::{ContentFragment, RelevanceScorer, Score};
