//! Crawl counters
//!
//! Process-wide atomic counters for navigation, pagination, and extraction,
//! plus a bounded sample of page fetch durations. Rendered in Prometheus
//! text format for whoever wants to scrape or log them.
//!
//! ```rust
//! use sitesift::metrics::global_metrics;
//! use std::time::Duration;
//!
//! global_metrics().record_page_fetch(Duration::from_millis(420));
//! let text = global_metrics().to_prometheus_format();
//! assert!(text.contains("sitesift_navigations_total"));
//! ```

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

/// Page fetch duration samples kept for percentiles
const MAX_DURATION_SAMPLES: usize = 1000;

/// Crawl counters
#[derive(Debug)]
pub struct Metrics {
    /// Navigation attempts started
    pub navigations_total: AtomicU64,
    /// Attempts beyond the first for a URL
    pub retries_total: AtomicU64,
    /// URLs that exhausted their retries
    pub fetch_failures_total: AtomicU64,
    /// Next pages followed or clicked
    pub pagination_hops_total: AtomicU64,
    /// Records appended to job results
    pub records_total: AtomicU64,
    /// Pages whose relevance fragment came back empty
    pub empty_fragments_total: AtomicU64,

    fetch_durations: RwLock<Samples>,
    errors_by_kind: RwLock<HashMap<String, u64>>,
}

/// Fixed-capacity ring of duration samples
#[derive(Debug)]
struct Samples {
    data: Vec<Duration>,
    write_pos: usize,
}

impl Samples {
    fn push(&mut self, value: Duration) {
        if self.data.len() < MAX_DURATION_SAMPLES {
            self.data.push(value);
        } else {
            self.data[self.write_pos] = value;
        }
        self.write_pos = (self.write_pos + 1) % MAX_DURATION_SAMPLES;
    }

    fn percentile(&self, p: f64) -> Option<Duration> {
        if self.data.is_empty() {
            return None;
        }
        let mut sorted = self.data.clone();
        sorted.sort();
        let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted.get(idx).copied()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Zeroed counters
    pub fn new() -> Self {
        Self {
            navigations_total: AtomicU64::new(0),
            retries_total: AtomicU64::new(0),
            fetch_failures_total: AtomicU64::new(0),
            pagination_hops_total: AtomicU64::new(0),
            records_total: AtomicU64::new(0),
            empty_fragments_total: AtomicU64::new(0),
            fetch_durations: RwLock::new(Samples {
                data: Vec::new(),
                write_pos: 0,
            }),
            errors_by_kind: RwLock::new(HashMap::new()),
        }
    }

    /// A navigation attempt started
    pub fn record_navigation(&self) {
        self.navigations_total.fetch_add(1, Ordering::Relaxed);
    }

    /// A retry was scheduled
    pub fn record_retry(&self) {
        self.retries_total.fetch_add(1, Ordering::Relaxed);
    }

    /// A URL failed after all attempts
    pub fn record_fetch_failure(&self) {
        self.fetch_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    /// A next page was reached
    pub fn record_pagination_hop(&self) {
        self.pagination_hops_total.fetch_add(1, Ordering::Relaxed);
    }

    /// A record was appended
    pub fn record_record(&self) {
        self.records_total.fetch_add(1, Ordering::Relaxed);
    }

    /// A page produced no relevance fragment
    pub fn record_empty_fragment(&self) {
        self.empty_fragments_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Time spent fetching one page, retries included
    pub fn record_page_fetch(&self, elapsed: Duration) {
        self.fetch_durations.write().push(elapsed);
    }

    /// A typed error surfaced to the job log
    pub fn record_error(&self, kind: &str) {
        *self.errors_by_kind.write().entry(kind.to_string()).or_insert(0) += 1;
    }

    /// Count of errors of one kind
    pub fn errors_of(&self, kind: &str) -> u64 {
        self.errors_by_kind.read().get(kind).copied().unwrap_or(0)
    }

    /// Prometheus text exposition
    pub fn to_prometheus_format(&self) -> String {
        let mut output = String::new();
        let counters = [
            ("sitesift_navigations_total", &self.navigations_total),
            ("sitesift_retries_total", &self.retries_total),
            ("sitesift_fetch_failures_total", &self.fetch_failures_total),
            ("sitesift_pagination_hops_total", &self.pagination_hops_total),
            ("sitesift_records_total", &self.records_total),
            ("sitesift_empty_fragments_total", &self.empty_fragments_total),
        ];
        for (name, counter) in counters {
            output.push_str(&format!("{} {}\n", name, counter.load(Ordering::Relaxed)));
        }

        let mut kinds: Vec<(String, u64)> = self
            .errors_by_kind
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        kinds.sort();
        for (kind, count) in kinds {
            output.push_str(&format!("sitesift_errors_total{{kind=\"{}\"}} {}\n", kind, count));
        }

        let durations = self.fetch_durations.read();
        for (label, p) in [("p50", 0.5), ("p95", 0.95), ("p99", 0.99)] {
            if let Some(d) = durations.percentile(p) {
                output.push_str(&format!(
                    "sitesift_page_fetch_duration_{}_ms {}\n",
                    label,
                    d.as_millis()
                ));
            }
        }

        output
    }
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Process-wide counters
pub fn global_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_rendering() {
        let metrics = Metrics::new();
        metrics.record_navigation();
        metrics.record_navigation();
        metrics.record_retry();
        metrics.record_error("fetch_timeout");
        metrics.record_page_fetch(Duration::from_millis(100));
        metrics.record_page_fetch(Duration::from_millis(300));

        assert_eq!(metrics.navigations_total.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.errors_of("fetch_timeout"), 1);

        let text = metrics.to_prometheus_format();
        assert!(text.contains("sitesift_navigations_total 2\n"));
        assert!(text.contains("sitesift_retries_total 1\n"));
        assert!(text.contains("sitesift_errors_total{kind=\"fetch_timeout\"} 1\n"));
        assert!(text.contains("sitesift_page_fetch_duration_p99_ms 300\n"));
    }

    #[test]
    fn test_samples_wrap() {
        let mut samples = Samples {
            data: Vec::new(),
            write_pos: 0,
        };
        for i in 0..(MAX_DURATION_SAMPLES + 10) {
            samples.push(Duration::from_millis(i as u64));
        }
        assert_eq!(samples.data.len(), MAX_DURATION_SAMPLES);
        assert_eq!(samples.percentile(0.0), Some(Duration::from_millis(10)));
    }
}
