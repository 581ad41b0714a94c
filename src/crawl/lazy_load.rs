//! Lazy-load scrolling
//!
//! Progressive scroll-and-wait: scroll forward by a viewport fraction, let the
//! page settle, and keep going while the document grows. Every third step
//! jumps to the bottom with a longer wait to trip intersection observers.

use crate::browser::{BrowserSession, ScrollTarget};
use crate::config::ScrollConfig;
use crate::error::Result;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Why the scroll loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollStop {
    /// Viewport reached the document end
    ReachedBottom,
    /// Height did not change after a step
    Stalled,
    /// Iteration cap hit
    IterationCap,
    /// Job cancelled
    Cancelled,
}

/// Summary of a scroll run
#[derive(Debug, Clone, PartialEq)]
pub struct LazyLoadReport {
    /// Steps performed
    pub iterations: usize,
    /// Document height before the first step
    pub initial_height: f64,
    /// Document height after the last step
    pub final_height: f64,
    /// Why the loop ended
    pub stop: ScrollStop,
}

impl LazyLoadReport {
    /// Whether any new content appeared
    pub fn grew(&self) -> bool {
        self.final_height > self.initial_height
    }
}

/// Lazy-load scroll controller
#[derive(Debug, Clone)]
pub struct LazyLoader {
    /// Hard cap on steps
    pub max_iterations: usize,
    /// Fraction of the viewport scrolled per step
    pub step_fraction: f64,
    /// Wait after a regular step
    pub settle: Duration,
    /// Wait after a forced scroll-to-bottom
    pub bottom_settle: Duration,
    /// Distance from the end that counts as "at the bottom"
    pub bottom_slack: f64,
}

impl Default for LazyLoader {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            step_fraction: 0.8,
            settle: Duration::from_millis(1500),
            bottom_settle: Duration::from_millis(3000),
            bottom_slack: 100.0,
        }
    }
}

impl LazyLoader {
    /// Loader with custom waits
    pub fn with_delays(settle: Duration, bottom_settle: Duration) -> Self {
        Self {
            settle,
            bottom_settle,
            ..Default::default()
        }
    }

    /// Loader from job config
    pub fn from_config(config: &ScrollConfig) -> Self {
        Self {
            max_iterations: config.max_iterations.max(1),
            settle: Duration::from_millis(config.settle_ms),
            bottom_settle: Duration::from_millis(config.bottom_settle_ms),
            ..Default::default()
        }
    }

    /// Scroll until the page stops growing
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        session: &dyn BrowserSession,
        cancel: &CancellationToken,
    ) -> Result<LazyLoadReport> {
        let initial = session.scroll_metrics().await?;
        let mut height = initial.document_height;
        let mut iterations = 0;
        let mut stop = ScrollStop::IterationCap;

        while iterations < self.max_iterations {
            if cancel.is_cancelled() {
                stop = ScrollStop::Cancelled;
                break;
            }

            let metrics = session.scroll_metrics().await?;
            if metrics.near_bottom(self.bottom_slack) {
                stop = ScrollStop::ReachedBottom;
                break;
            }

            iterations += 1;
            let wait = if iterations % 3 == 0 {
                session.scroll(ScrollTarget::Bottom).await?;
                self.bottom_settle
            } else {
                let step = metrics.viewport_height * self.step_fraction;
                session.scroll(ScrollTarget::By(step)).await?;
                self.settle
            };
            tokio::select! {
                _ = cancel.cancelled() => {
                    stop = ScrollStop::Cancelled;
                    break;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            let new_height = session.scroll_metrics().await?.document_height;
            debug!("Scroll step {}: height {} -> {}", iterations, height, new_height);
            if new_height <= height {
                stop = ScrollStop::Stalled;
                break;
            }
            height = new_height;
        }

        Ok(LazyLoadReport {
            iterations,
            initial_height: initial.document_height,
            final_height: height,
            stop,
        })
    }

    /// Single scroll-to-bottom probe; true if the document grew
    pub async fn probe_growth(&self, session: &dyn BrowserSession) -> Result<bool> {
        let before = session.scroll_metrics().await?.document_height;
        session.scroll(ScrollTarget::Bottom).await?;
        tokio::time::sleep(self.bottom_settle).await;
        let after = session.scroll_metrics().await?.document_height;
        Ok(after > before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{FakePage, FakeSessionFactory, SessionFactory};

    fn instant() -> LazyLoader {
        LazyLoader::with_delays(Duration::ZERO, Duration::ZERO)
    }

    async fn session_for(page: FakePage) -> Box<dyn BrowserSession> {
        let factory = FakeSessionFactory::new().page("https://a.test/", page);
        let session = factory.open().await.unwrap();
        session
            .navigate("https://a.test/", Duration::from_secs(1))
            .await
            .unwrap();
        session
    }

    #[tokio::test]
    async fn test_stops_when_height_stalls() {
        let session = session_for(
            FakePage::new("<p>a</p>").heights(vec![5000.0, 6000.0, 7000.0, 7000.0], None),
        )
        .await;
        let report = instant().run(session.as_ref(), &CancellationToken::new()).await.unwrap();
        assert_eq!(report.stop, ScrollStop::Stalled);
        assert_eq!(report.iterations, 3);
        assert_eq!(report.final_height, 7000.0);
        assert!(report.grew());
    }

    #[tokio::test]
    async fn test_short_page_needs_no_scrolling() {
        let session = session_for(FakePage::new("<p>a</p>").heights(vec![300.0], None)).await;
        let report = instant().run(session.as_ref(), &CancellationToken::new()).await.unwrap();
        assert_eq!(report.iterations, 0);
        assert_eq!(report.stop, ScrollStop::ReachedBottom);
        assert_eq!(report.final_height, 300.0);
        assert_eq!(session.scroll_metrics().await.unwrap().scroll_y, 0.0);
    }

    #[tokio::test]
    async fn test_caps_iterations() {
        let heights: Vec<f64> = (0..20).map(|i| 100_000.0 + i as f64 * 1000.0).collect();
        let session = session_for(FakePage::new("<p>a</p>").heights(heights, None)).await;
        let report = instant().run(session.as_ref(), &CancellationToken::new()).await.unwrap();
        assert_eq!(report.iterations, 10);
        assert_eq!(report.stop, ScrollStop::IterationCap);
    }

    #[tokio::test]
    async fn test_cancelled_loop_stops_immediately() {
        let session = session_for(FakePage::new("<p>a</p>").heights(vec![5000.0, 6000.0], None)).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = instant().run(session.as_ref(), &cancel).await.unwrap();
        assert_eq!(report.iterations, 0);
        assert_eq!(report.stop, ScrollStop::Cancelled);
    }

    #[tokio::test]
    async fn test_probe_growth() {
        let session = session_for(
            FakePage::new("<p>a</p>").heights(vec![2000.0, 3000.0], Some("<p>a</p><p>b</p>".into())),
        )
        .await;
        assert!(instant().probe_growth(session.as_ref()).await.unwrap());
        assert!(session.content().await.unwrap().contains("<p>b</p>"));
    }
}
