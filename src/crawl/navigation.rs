//! Page fetching with retry
//!
//! Each attempt runs in a fresh isolated session: navigate with a bounded
//! timeout, wait (best-effort) for network quiescence, read the markup and
//! reject it if it is below the size floor. The session of the successful
//! attempt is handed to the caller for lazy loading and click pagination.

use crate::browser::{BrowserSession, SessionFactory};
use crate::config::RetryConfig;
use crate::error::{Error, FetchError};
use crate::metrics::global_metrics;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// URL validation utilities
pub struct UrlValidator;

impl UrlValidator {
    /// Validate a URL for navigation
    pub fn validate(url: &str) -> std::result::Result<(), String> {
        if url.is_empty() {
            return Err("URL cannot be empty".to_string());
        }

        if !url.starts_with("http://")
            && !url.starts_with("https://")
            && !url.starts_with("file://")
        {
            return Err(format!(
                "URL must start with http://, https://, or file://: {}",
                url
            ));
        }

        if url.len() > 2048 {
            return Err("URL exceeds maximum length of 2048 characters".to_string());
        }

        Ok(())
    }
}

/// Record of one navigation attempt
#[derive(Debug, Clone)]
pub struct FetchAttempt {
    /// Target URL
    pub url: String,
    /// 1-based attempt index
    pub attempt: u32,
    /// Content size on success, error otherwise
    pub outcome: std::result::Result<usize, FetchError>,
    /// Time spent on this attempt
    pub elapsed: Duration,
}

/// A successfully fetched page with its live session
pub struct FetchedPage {
    /// Requested URL
    pub url: String,
    /// URL after redirects
    pub final_url: String,
    /// Page markup
    pub html: String,
    /// Session that produced the markup; the caller closes it
    pub session: Box<dyn BrowserSession>,
    /// Attempts made, including the successful one
    pub attempts: Vec<FetchAttempt>,
    /// Total time across attempts
    pub elapsed: Duration,
}

impl std::fmt::Debug for FetchedPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedPage")
            .field("url", &self.url)
            .field("final_url", &self.final_url)
            .field("size", &self.html.len())
            .field("attempts", &self.attempts.len())
            .finish()
    }
}

/// Navigation & retry controller
pub struct Fetcher<'a> {
    factory: &'a dyn SessionFactory,
    retry: RetryConfig,
}

fn into_fetch_error(err: Error) -> FetchError {
    match err {
        Error::Fetch(fe) => fe,
        other => FetchError::NavigationRejected(other.to_string()),
    }
}

impl<'a> Fetcher<'a> {
    /// Create a fetcher over a session factory
    pub fn new(factory: &'a dyn SessionFactory, retry: RetryConfig) -> Self {
        Self { factory, retry }
    }

    /// Fetch a URL, retrying with a fresh session per attempt
    #[instrument(skip(self, cancel))]
    pub async fn fetch(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<FetchedPage, FetchError> {
        UrlValidator::validate(url).map_err(FetchError::NavigationRejected)?;

        let start = Instant::now();
        let attempts_allowed = self.retry.attempts.max(1);
        let mut attempts = Vec::with_capacity(attempts_allowed as usize);
        let mut last_error = FetchError::NavigationRejected("no attempt made".to_string());

        for attempt in 1..=attempts_allowed {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            if attempt > 1 {
                global_metrics().record_retry();
                warn!("Navigation retry attempt {} of {} for {}", attempt, attempts_allowed, url);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_millis(self.retry.retry_delay_ms)) => {}
                }
            }

            let attempt_start = Instant::now();
            let session = match self.factory.open().await {
                Ok(s) => s,
                Err(e) => {
                    warn!("Could not open a session for {} (attempt {}): {}", url, attempt, e);
                    last_error = FetchError::Session(e.to_string());
                    attempts.push(FetchAttempt {
                        url: url.to_string(),
                        attempt,
                        outcome: Err(last_error.clone()),
                        elapsed: attempt_start.elapsed(),
                    });
                    continue;
                }
            };

            global_metrics().record_navigation();
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(FetchError::Cancelled),
                r = self.attempt(session.as_ref(), url) => r,
            };

            match result {
                Ok((final_url, html)) => {
                    attempts.push(FetchAttempt {
                        url: url.to_string(),
                        attempt,
                        outcome: Ok(html.len()),
                        elapsed: attempt_start.elapsed(),
                    });
                    info!("Fetched {} ({} bytes, attempt {})", url, html.len(), attempt);
                    return Ok(FetchedPage {
                        url: url.to_string(),
                        final_url,
                        html,
                        session,
                        attempts,
                        elapsed: start.elapsed(),
                    });
                }
                Err(e) => {
                    if let Err(close_err) = session.close().await {
                        debug!("Closing session for {} after a failed attempt: {}", url, close_err);
                    }
                    warn!("Navigation attempt {} for {} failed: {}", attempt, url, e);
                    attempts.push(FetchAttempt {
                        url: url.to_string(),
                        attempt,
                        outcome: Err(e.clone()),
                        elapsed: attempt_start.elapsed(),
                    });
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    last_error = e;
                }
            }
        }

        global_metrics().record_fetch_failure();
        Err(last_error)
    }

    /// Perform a single navigation attempt
    async fn attempt(
        &self,
        session: &dyn BrowserSession,
        url: &str,
    ) -> std::result::Result<(String, String), FetchError> {
        let nav_timeout = Duration::from_millis(self.retry.navigation_timeout_ms);
        let outcome = session
            .navigate(url, nav_timeout)
            .await
            .map_err(into_fetch_error)?;

        if !outcome.is_success() {
            return Err(FetchError::NavigationRejected(format!(
                "HTTP {}",
                outcome.status.unwrap_or_default()
            )));
        }

        let quiet = Duration::from_millis(self.retry.quiescence_timeout_ms);
        if let Err(e) = session.wait_for_network_idle(quiet).await {
            debug!("Network quiescence not reached for {}: {}", url, e);
        }

        let html = session.content().await.map_err(into_fetch_error)?;
        if html.len() < self.retry.min_content_bytes {
            return Err(FetchError::EmptyContent {
                size: html.len(),
                floor: self.retry.min_content_bytes,
            });
        }

        Ok((outcome.final_url, html))
    }
}
