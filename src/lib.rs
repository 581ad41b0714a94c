//! SiteSift - Browser-Driven Structured Crawling
//!
//! This crate drives a headless browser through a crawl, reduces each page
//! to its most content-relevant region, follows pagination and lazy-load
//! triggers, and extracts deduplicated, normalized fields.
//!
//! # Features
//!
//! - **Navigation & Retry**: fresh isolated browser session per attempt
//! - **Pagination**: click loops, numbered URLs, selector/XPath/text matchers,
//!   auto-detection, and model-proposed links behind a confidence threshold
//! - **Lazy Loading**: scroll-and-settle until the document stops growing
//! - **Relevance Scoring**: picks the one container that holds the content
//! - **Field Extraction**: pattern, selector, or text-model strategies
//! - **Jobs**: one active crawl per process with cooperative cancellation
//!
//! # Architecture
//!
//! ```text
//! JobManager ──▶ CrawlJob (driving loop) ──▶ Fetcher ──▶ SessionFactory (CDP)
//!                    │                          │
//!                    ▼                          ▼
//!              ┌───────────┐            ┌──────────────┐
//!              │ Frontier  │◀── links ──│ LazyLoader   │
//!              └───────────┘            │ Pagination   │
//!                    │                  └──────┬───────┘
//!                    ▼                         ▼
//!              BatchWriter ◀── records ── ExtractionPipeline
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use sitesift::browser::ChromiumSessionFactory;
//! use sitesift::config::JobConfig;
//! use sitesift::job::JobManager;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let factory = ChromiumSessionFactory::new().await?;
//!     let manager = JobManager::new(Arc::new(factory));
//!
//!     let config = JobConfig::new(["https://example.com"], ["email", "phone"]);
//!     let handle = manager.start(config).await?;
//!     manager.wait(&handle).await?;
//!
//!     for record in manager.results(&handle)? {
//!         println!("{}: {:?}", record.url, record.fields);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod browser;
pub mod config;
pub mod crawl;
pub mod error;
pub mod extraction;
pub mod job;
pub mod metrics;

// Re-exports for convenience
pub use browser::{BrowserSession, ChromiumSessionFactory, SessionFactory};
pub use config::JobConfig;
pub use error::{Error, Result};
pub use extraction::{export_rows, ExtractionRecord, LinkExtractor, RelevanceScorer};
pub use job::{JobHandle, JobManager, JobPhase, JobStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
