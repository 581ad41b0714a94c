//! The driving crawl loop
//!
//! A [`CrawlJob`] owns the frontier, the extraction pipeline, and the batch
//! writer for one job. URLs at a depth are processed one at a time: fetch,
//! lazy-load, paginate, extract, enqueue. Only detail-page enrichment fans
//! out, under a fixed-size gate, into pre-allocated result slots.

use crate::browser::SessionFactory;
use crate::config::{JobConfig, PaginationStrategy};
use crate::crawl::{
    numbered_urls, FetchedPage, Fetcher, Frontier, FrontierEntry, LazyLoader, Origin,
    PaginationResolver,
};
use crate::error::{FetchError, Result};
use crate::extraction::{
    normalize_url, registrable_domain, ExtractionPipeline, ExtractionRecord, LinkExtractor,
    PageExtraction, TextModel,
};
use crate::job::sink::{BatchWriter, FlushReason, MemoryProbe, RecordSink};
use crate::job::state::{JobPhase, JobShared, ProgressSnapshot};
use crate::metrics::global_metrics;
use futures::future::join_all;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

/// One crawl job, owned by its worker
pub struct CrawlJob {
    config: JobConfig,
    frontier: Frontier,
    factory: Arc<dyn SessionFactory>,
    shared: Arc<JobShared>,
    pipeline: ExtractionPipeline,
    resolver: PaginationResolver,
    loader: LazyLoader,
    writer: BatchWriter,
    cancel: CancellationToken,
    started: Instant,
    processed: usize,
    failed: usize,
}

impl CrawlJob {
    /// Assemble a job from a validated config
    pub fn new(
        config: JobConfig,
        factory: Arc<dyn SessionFactory>,
        model: Option<Arc<dyn TextModel>>,
        sink: Box<dyn RecordSink>,
        shared: Arc<JobShared>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let pipeline = ExtractionPipeline::for_job(&config, model.clone())?;
        let loader = LazyLoader::from_config(&config.scroll);
        let resolver = PaginationResolver::new(config.pagination.clone(), model).with_loader(loader.clone());
        let probe = config.flush.memory_ceiling_mb.map(MemoryProbe::new);
        let writer = BatchWriter::new(sink, config.flush.batch_size, probe);
        let frontier = Frontier::with_seeds(config.seeds.iter().map(|s| canonical(s)));

        Ok(Self {
            config,
            frontier,
            factory,
            shared,
            pipeline,
            resolver,
            loader,
            writer,
            cancel,
            started: Instant::now(),
            processed: 0,
            failed: 0,
        })
    }

    /// Pages processed so far, failures included
    pub fn processed(&self) -> usize {
        self.processed
    }

    fn budget_left(&self) -> usize {
        self.config.max_pages.saturating_sub(self.processed)
    }

    fn snapshot(&self) -> ProgressSnapshot {
        let queued = self.frontier.current_len() + self.frontier.next_len();
        let estimated = (self.processed + queued)
            .min(self.config.max_pages)
            .max(self.processed);
        ProgressSnapshot::new(
            self.processed,
            estimated,
            self.shared.result_count(),
            self.frontier.depth(),
            self.started.elapsed(),
        )
    }

    fn publish_progress(&self) {
        self.shared.set_progress(self.snapshot());
    }

    /// Crawl until the frontier is exhausted, the budget is spent, or the
    /// job is cancelled. Returns the terminal phase.
    #[instrument(skip(self), fields(job = %self.shared.id()))]
    pub async fn run(mut self) -> Result<JobPhase> {
        self.shared.set_phase(JobPhase::Crawling);
        self.shared.log.process(format!(
            "Crawl started: {} seeds, depth {}, budget {} pages",
            self.config.seeds.len(),
            self.config.max_depth,
            self.config.max_pages
        ));

        loop {
            loop {
                if self.cancel.is_cancelled() || self.budget_left() == 0 {
                    break;
                }
                let Some(entry) = self.frontier.pop() else {
                    break;
                };
                self.process_entry(entry).await;
                debug_assert!(self.frontier.is_consistent());
                self.publish_progress();
            }

            if self.cancel.is_cancelled() {
                self.shared.log.warning("Cancellation requested; stopping crawl");
                break;
            }
            if self.budget_left() == 0 {
                self.shared
                    .log
                    .info(format!("Page budget of {} reached", self.config.max_pages));
                break;
            }
            if self.frontier.depth() >= self.config.max_depth || !self.frontier.advance_depth() {
                break;
            }
            self.shared.log.process(format!(
                "Depth {}: {} URLs queued",
                self.frontier.depth(),
                self.frontier.current_len()
            ));
        }

        let cancelled = self.cancel.is_cancelled();
        self.shared.set_phase(JobPhase::Finalizing);
        let progress = self.snapshot();
        self.shared.set_progress(progress.clone());
        self.writer.flush(&progress, FlushReason::Final).await?;

        let phase = if cancelled {
            JobPhase::Cancelled
        } else {
            JobPhase::Completed
        };
        let summary = format!(
            "Crawl {}: {} pages ({} failed), {} records",
            if cancelled { "cancelled" } else { "completed" },
            self.processed,
            self.failed,
            progress.records
        );
        if cancelled {
            self.shared.log.warning(summary);
        } else {
            self.shared.log.success(summary);
        }
        self.shared.set_phase(phase);
        Ok(phase)
    }

    async fn process_entry(&mut self, entry: FrontierEntry) {
        let numbered = self.resolver.strategy() == PaginationStrategy::NumberedUrl
            && !matches!(entry.origin, Origin::Pagination { .. });
        if !numbered {
            self.process_page(&entry).await;
            return;
        }

        // The base URL itself is never fetched; pages 1..N stand in for it.
        for (index, url) in numbered_urls(&entry.url, self.resolver.max_pages())
            .into_iter()
            .enumerate()
        {
            if self.cancel.is_cancelled() || self.budget_left() == 0 {
                break;
            }
            if !self.frontier.mark_visited(&url) {
                debug!("Numbered page {} already visited", url);
                continue;
            }
            let page = FrontierEntry {
                url,
                depth: entry.depth,
                origin: Origin::Pagination { hop: index },
            };
            if !self.process_page(&page).await {
                self.shared
                    .log
                    .info(format!("Numbered pagination stopped at {}", page.url));
                break;
            }
            self.publish_progress();
        }
    }

    /// Fetch, enrich, extract, and enqueue one URL. Returns false if the
    /// fetch failed or was cancelled.
    async fn process_page(&mut self, entry: &FrontierEntry) -> bool {
        self.shared.log.process(format!("Fetching {}", entry.url));
        let factory = Arc::clone(&self.factory);
        let fetcher = Fetcher::new(factory.as_ref(), self.config.retry.clone());
        let fetched = match fetcher.fetch(&entry.url, &self.cancel).await {
            Ok(page) => page,
            Err(FetchError::Cancelled) => {
                debug!("Fetch of {} cancelled", entry.url);
                return false;
            }
            Err(e) => {
                self.record_failure(&entry.url, &e);
                return false;
            }
        };
        self.processed += 1;
        global_metrics().record_page_fetch(fetched.elapsed);

        let (snapshots, next_url, page_url) = self.enrich_page(fetched).await;

        let extraction = self.pipeline.extract(&entry.url, &snapshots).await;
        self.record_extraction(extraction).await;

        let Ok(base) = Url::parse(&page_url) else {
            warn!("Cannot resolve links against {}", page_url);
            return true;
        };

        if let Some(css) = self.config.detail.selector.clone() {
            match detail_links(&snapshots, &base, &css) {
                Ok(urls) => self.enrich_details(urls, entry.depth).await,
                Err(e) => self
                    .shared
                    .log
                    .warning(format!("Detail selector {} is unusable: {}", css, e)),
            }
        }

        if self.config.follow_links && self.frontier.depth() < self.config.max_depth {
            let mut queued = 0;
            for html in &snapshots {
                for link in LinkExtractor::discover(html, &base, self.config.stay_on_domain) {
                    if self.frontier.push_next(link) {
                        queued += 1;
                    }
                }
            }
            if queued > 0 {
                self.shared.log.info(format!(
                    "Queued {} links from {} for depth {}",
                    queued,
                    entry.url,
                    self.frontier.depth() + 1
                ));
            }
        }

        if let Some(next) = next_url {
            self.enqueue_next_page(entry, &base, next);
        }
        true
    }

    /// Lazy-load and paginate within the fetched session, then close it.
    /// Returns the content snapshots, the next page if one was resolved,
    /// and the URL links resolve against.
    async fn enrich_page(&self, fetched: FetchedPage) -> (Vec<String>, Option<String>, String) {
        let FetchedPage {
            url,
            final_url,
            mut html,
            session,
            ..
        } = fetched;

        if self.config.lazy_load {
            match self.loader.run(session.as_ref(), &self.cancel).await {
                Ok(report) if report.grew() => match session.content().await {
                    Ok(grown) => {
                        debug!(
                            "Lazy load on {} grew page {} -> {}",
                            url, report.initial_height, report.final_height
                        );
                        html = grown;
                    }
                    Err(e) => warn!("Could not read content after lazy load on {}: {}", url, e),
                },
                Ok(_) => {}
                Err(e) => self
                    .shared
                    .log
                    .warning(format!("Lazy load on {} failed: {}", url, e)),
            }
        }

        let (snapshots, next_url) = match self.resolver.strategy() {
            PaginationStrategy::ButtonClickLoop => {
                let report = self.resolver.click_through(session.as_ref(), html, &self.cancel).await;
                if let Some(e) = report.error {
                    self.shared
                        .log
                        .warning(format!("Click pagination on {} stopped: {}", url, e));
                } else if report.clicks > 0 {
                    self.shared
                        .log
                        .info(format!("Clicked through {} pages on {}", report.clicks, url));
                }
                (report.snapshots, None)
            }
            _ => {
                let resolved = self
                    .resolver
                    .resolve(session.as_ref(), &html, &final_url, &self.cancel)
                    .await;
                match resolved {
                    Ok(state) => (vec![state.grown_html.unwrap_or(html)], state.next_url),
                    Err(e) => {
                        self.shared
                            .log
                            .info(format!("No further pagination on {}: {}", url, e));
                        (vec![html], None)
                    }
                }
            }
        };

        if let Err(e) = session.close().await {
            debug!("Closing session for {} failed: {}", url, e);
        }
        (snapshots, next_url, final_url)
    }

    fn enqueue_next_page(&mut self, entry: &FrontierEntry, base: &Url, next: String) {
        let hop = match entry.origin {
            Origin::Pagination { hop } => hop + 1,
            _ => 1,
        };
        if hop >= self.resolver.max_pages() {
            self.shared.log.info(format!(
                "Pagination cap of {} pages reached at {}",
                self.resolver.max_pages(),
                entry.url
            ));
            return;
        }
        if self.config.stay_on_domain && !same_site(base, &next) {
            self.shared
                .log
                .warning(format!("Next page {} leaves the site; not following", next));
            return;
        }
        if self.frontier.push_current(next.clone(), Origin::Pagination { hop }) {
            global_metrics().record_pagination_hop();
            self.shared.log.info(format!("Queued next page {}", next));
        } else {
            debug!("Next page {} already seen", next);
        }
    }

    /// Fetch detail pages concurrently, then extract each in order
    #[instrument(skip(self, urls), fields(count = urls.len()))]
    async fn enrich_details(&mut self, urls: Vec<String>, depth: usize) {
        let budget = self.budget_left();
        let urls: Vec<String> = urls
            .into_iter()
            .filter(|u| !self.frontier.is_visited(u))
            .take(budget)
            .collect();
        if urls.is_empty() {
            return;
        }
        for url in &urls {
            self.frontier.mark_visited(url);
        }
        self.shared.log.process(format!(
            "Fetching {} detail pages at depth {}",
            urls.len(),
            depth
        ));

        let concurrency = self.config.detail.concurrency.max(1);
        let batch = concurrency * 2;
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut slots: Vec<Option<std::result::Result<String, FetchError>>> = vec![None; urls.len()];

        for (batch_index, chunk) in urls.chunks(batch).enumerate() {
            if self.cancel.is_cancelled() {
                self.shared.log.warning("Detail enrichment cancelled");
                break;
            }
            let factory = self.factory.as_ref();
            let retry = &self.config.retry;
            let cancel = &self.cancel;
            let fetches = chunk.iter().map(|url| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let _permit = semaphore.acquire().await.ok();
                    let page = Fetcher::new(factory, retry.clone()).fetch(url, cancel).await?;
                    if let Err(e) = page.session.close().await {
                        debug!("Closing detail session for {} failed: {}", url, e);
                    }
                    Ok::<_, FetchError>(page.html)
                }
            });
            let offset = batch_index * batch;
            for (i, result) in join_all(fetches).await.into_iter().enumerate() {
                slots[offset + i] = Some(result);
            }
        }

        for (url, slot) in urls.iter().zip(slots) {
            match slot {
                Some(Ok(html)) => {
                    self.processed += 1;
                    let extraction = self.pipeline.extract(url, std::slice::from_ref(&html)).await;
                    self.record_extraction(extraction).await;
                }
                Some(Err(FetchError::Cancelled)) | None => {}
                Some(Err(e)) => self.record_failure(url, &e),
            }
        }
        self.publish_progress();
    }

    fn record_failure(&mut self, url: &str, error: &FetchError) {
        self.processed += 1;
        self.failed += 1;
        global_metrics().record_error("fetch");
        self.shared
            .log
            .error(format!("Failed to fetch {}: {}", url, error));
    }

    async fn record_extraction(&mut self, extraction: PageExtraction) {
        let PageExtraction {
            record,
            fragment_score,
            empty_fragments,
            errors,
        } = extraction;

        for error in &errors {
            global_metrics().record_error("extraction");
            self.shared
                .log
                .warning(format!("Extraction on {}: {}", record.url, error));
        }
        if empty_fragments > 0 {
            self.shared.log.warning(format!(
                "No relevant content on {} (best score {})",
                record.url, fragment_score
            ));
        }
        self.append(record).await;
    }

    async fn append(&mut self, record: ExtractionRecord) {
        if record.is_empty() {
            self.shared
                .log
                .warning(format!("No data found on {}", record.url));
        } else {
            self.shared.log.success(format!(
                "Extracted {} values from {}",
                record.value_count(),
                record.url
            ));
        }
        global_metrics().record_record();
        self.shared.append(record.clone());

        let progress = self.snapshot();
        match self.writer.push(record, &progress).await {
            Ok(Some(reason)) => debug!("Flushed records ({:?})", reason),
            Ok(None) => {}
            Err(e) => {
                global_metrics().record_error("sink");
                self.shared
                    .log
                    .error(format!("Could not persist records: {}", e));
            }
        }
    }
}

/// Canonical frontier key for a configured seed
fn canonical(seed: &str) -> String {
    match Url::parse(seed) {
        Ok(url) => normalize_url(&url),
        Err(_) => seed.to_string(),
    }
}

fn same_site(base: &Url, target: &str) -> bool {
    let target_host = Url::parse(target)
        .ok()
        .and_then(|u| u.host_str().map(registrable_domain));
    match (base.host_str().map(registrable_domain), target_host) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Absolute, unique targets of anchors matching a selector
fn detail_links(snapshots: &[String], base: &Url, css: &str) -> std::result::Result<Vec<String>, String> {
    let selector = Selector::parse(css).map_err(|e| e.to_string())?;
    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for html in snapshots {
        let document = Html::parse_document(html);
        for el in document.select(&selector) {
            let Some(href) = el.value().attr("href") else {
                continue;
            };
            let href = href.trim();
            if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
                continue;
            }
            if let Ok(url) = base.join(href) {
                let url = normalize_url(&url);
                if seen.insert(url.clone()) {
                    urls.push(url);
                }
            }
        }
    }
    Ok(urls)
}
