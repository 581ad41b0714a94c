//! SiteSift CLI
//!
//! Runs one crawl job against a headless Chromium and prints the records.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use sitesift::browser::{BrowserConfig, ChromiumSessionFactory, SessionFactory};
use sitesift::config::{ExtractionMethod, FieldSpec, JobConfig, PaginationStrategy};
use sitesift::job::{JobManager, JobPhase};
use sitesift::metrics::global_metrics;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// SiteSift crawler
#[derive(Parser, Debug)]
#[command(name = "sift")]
#[command(author = "SiteSift Team")]
#[command(version)]
#[command(about = "Browser-driven crawler with structured field extraction")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl seeds and extract fields
    Crawl(CrawlArgs),
}

#[derive(Args, Debug)]
struct CrawlArgs {
    /// JSON job config; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed URL (repeatable)
    #[arg(short, long = "seed")]
    seeds: Vec<String>,

    /// Field to extract (repeatable)
    #[arg(short, long = "field")]
    fields: Vec<String>,

    /// Link-following depth
    #[arg(short, long)]
    depth: Option<usize>,

    /// Total page budget
    #[arg(short, long)]
    pages: Option<usize>,

    /// Follow links to other domains
    #[arg(long)]
    any_domain: bool,

    /// Do not follow discovered links
    #[arg(long)]
    no_follow: bool,

    /// Scroll pages to trigger lazy loading
    #[arg(long)]
    lazy_load: bool,

    /// Pagination strategy
    #[arg(long, value_enum)]
    pagination: Option<PaginationArg>,

    /// Page cap per pagination chain
    #[arg(long)]
    pagination_pages: Option<usize>,

    /// Selector, XPath, or button text for the matching pagination strategy
    #[arg(long)]
    pagination_target: Option<String>,

    /// Extraction method
    #[arg(short, long, value_enum)]
    method: Option<MethodArg>,

    /// Text-model API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Append records to this JSON-lines file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print export rows instead of records
    #[arg(long)]
    export: bool,

    /// Path to Chrome/Chromium executable
    #[arg(long)]
    chrome_path: Option<String>,

    /// Show the browser window
    #[arg(long)]
    headful: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PaginationArg {
    None,
    Click,
    Numbered,
    Selector,
    Xpath,
    Text,
    Auto,
    Ai,
}

impl From<PaginationArg> for PaginationStrategy {
    fn from(arg: PaginationArg) -> Self {
        match arg {
            PaginationArg::None => PaginationStrategy::None,
            PaginationArg::Click => PaginationStrategy::ButtonClickLoop,
            PaginationArg::Numbered => PaginationStrategy::NumberedUrl,
            PaginationArg::Selector => PaginationStrategy::SelectorBased,
            PaginationArg::Xpath => PaginationStrategy::XPathBased,
            PaginationArg::Text => PaginationStrategy::ButtonTextBased,
            PaginationArg::Auto => PaginationStrategy::AutoDetect,
            PaginationArg::Ai => PaginationStrategy::AiConfidence,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum MethodArg {
    Pattern,
    Selector,
    Ai,
}

impl From<MethodArg> for ExtractionMethod {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::Pattern => ExtractionMethod::Pattern,
            MethodArg::Selector => ExtractionMethod::Selector,
            MethodArg::Ai => ExtractionMethod::Ai,
        }
    }
}

impl CrawlArgs {
    fn job_config(&self) -> anyhow::Result<JobConfig> {
        let mut config = match &self.config {
            Some(path) => JobConfig::from_json_file(path)
                .with_context(|| format!("reading {}", path.display()))?,
            None => JobConfig::default(),
        };

        if !self.seeds.is_empty() {
            config.seeds = self.seeds.clone();
        }
        if !self.fields.is_empty() {
            config.fields = self.fields.iter().map(FieldSpec::new).collect();
        }
        if let Some(depth) = self.depth {
            config.max_depth = depth;
        }
        if let Some(pages) = self.pages {
            config.max_pages = pages;
        }
        if self.any_domain {
            config.stay_on_domain = false;
        }
        if self.no_follow {
            config.follow_links = false;
        }
        if self.lazy_load {
            config.lazy_load = true;
        }
        if let Some(strategy) = self.pagination {
            config.pagination.strategy = strategy.into();
        }
        if let Some(pages) = self.pagination_pages {
            config.pagination.max_pages = pages;
        }
        if let Some(target) = &self.pagination_target {
            match config.pagination.strategy {
                PaginationStrategy::SelectorBased => config.pagination.selector = Some(target.clone()),
                PaginationStrategy::XPathBased => config.pagination.xpath = Some(target.clone()),
                PaginationStrategy::ButtonTextBased => {
                    config.pagination.button_text = Some(target.clone())
                }
                PaginationStrategy::ButtonClickLoop => config.pagination.labels = vec![target.clone()],
                _ => bail!("--pagination-target does not apply to the selected strategy"),
            }
        }
        if let Some(method) = self.method {
            config.extraction = method.into();
        }
        if self.api_key.is_some() {
            config.ai.api_key = self.api_key.clone();
        }
        if self.output.is_some() {
            config.output = self.output.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Crawl(args) => crawl(args).await,
    }
}

async fn crawl(args: CrawlArgs) -> anyhow::Result<()> {
    let config = args.job_config()?;

    let mut browser = BrowserConfig::builder().headless(!args.headful);
    if let Some(path) = &args.chrome_path {
        browser = browser.chrome_path(path.clone());
    }
    let factory = Arc::new(
        ChromiumSessionFactory::launch(browser.build())
            .await
            .context("launching browser")?,
    );
    let manager = JobManager::new(Arc::clone(&factory) as Arc<dyn SessionFactory>);

    let handle = manager.start(config).await?;
    info!("SiteSift {} running job {}", sitesift::VERSION, handle);

    let phase = tokio::select! {
        phase = manager.wait(&handle) => phase?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; cancelling job {}", handle);
            manager.cancel(&handle).await?;
            manager.poll(&handle)?.phase
        }
    };

    if args.export {
        println!("{}", serde_json::to_string_pretty(&manager.export(&handle)?)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&manager.results(&handle)?)?);
    }

    let status = manager.poll(&handle)?;
    eprintln!(
        "Job {} {:?}: {} pages processed, {} records in {:.1}s",
        handle,
        phase,
        status.progress.processed,
        status.progress.records,
        status.progress.elapsed_secs
    );
    if let Some(failure) = &status.failure {
        eprintln!("Failure: {}", failure);
    }
    tracing::debug!("Metrics:\n{}", global_metrics().to_prometheus_format());

    manager.shutdown().await;
    drop(manager);
    match Arc::try_unwrap(factory) {
        Ok(factory) => factory.close().await?,
        Err(_) => warn!("Browser still in use at exit"),
    }

    if phase == JobPhase::Failed {
        bail!("job {} failed", handle);
    }
    Ok(())
}
