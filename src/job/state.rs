//! Job phase, progress, and the state shared with pollers
//!
//! The driving loop owns the crawl; pollers only ever see what it publishes
//! here: the phase, the latest progress snapshot, an append-only copy of the
//! results, and the activity log.

use crate::error::JobError;
use crate::extraction::ExtractionRecord;
use crate::job::activity::ActivityLog;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// Lifecycle phase of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    /// Accepted, worker not yet running
    Queued,
    /// Fetching and extracting
    Crawling,
    /// Flushing remaining output
    Finalizing,
    /// Frontier exhausted or page cap reached
    Completed,
    /// Stopped by request
    Cancelled,
    /// Stopped by an unexpected error; results so far are kept
    Failed,
}

impl JobPhase {
    /// Whether the job has stopped for good
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Cancelled | JobPhase::Failed)
    }
}

/// Progress for external polling
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Pages processed, failures included
    pub processed: usize,
    /// Processed plus queued, capped by the page budget
    pub estimated_total: usize,
    /// Records appended
    pub records: usize,
    /// Current crawl depth
    pub depth: usize,
    /// Seconds since the job started
    pub elapsed_secs: f64,
    /// Projected seconds left, once there is a rate to project from
    pub remaining_secs: Option<f64>,
}

impl ProgressSnapshot {
    /// Snapshot with a remaining-time projection from the average page rate
    pub fn new(
        processed: usize,
        estimated_total: usize,
        records: usize,
        depth: usize,
        elapsed: Duration,
    ) -> Self {
        let elapsed_secs = elapsed.as_secs_f64();
        let remaining_secs = (processed > 0).then(|| {
            let per_page = elapsed_secs / processed as f64;
            per_page * estimated_total.saturating_sub(processed) as f64
        });
        Self {
            processed,
            estimated_total,
            records,
            depth,
            elapsed_secs,
            remaining_secs,
        }
    }
}

/// What `poll` returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    /// Job id
    pub id: Uuid,
    /// Current phase
    pub phase: JobPhase,
    /// Latest progress
    pub progress: ProgressSnapshot,
    /// Failure description when the phase is `Failed`
    pub failure: Option<String>,
}

/// State published by a job's worker
#[derive(Debug)]
pub struct JobShared {
    id: Uuid,
    phase: watch::Sender<JobPhase>,
    progress: RwLock<ProgressSnapshot>,
    results: RwLock<Vec<ExtractionRecord>>,
    failure: RwLock<Option<String>>,
    /// Activity stream
    pub log: ActivityLog,
}

impl JobShared {
    /// Fresh queued state
    pub fn new(id: Uuid) -> Self {
        let (phase, _) = watch::channel(JobPhase::Queued);
        Self {
            id,
            phase,
            progress: RwLock::new(ProgressSnapshot::default()),
            results: RwLock::new(Vec::new()),
            failure: RwLock::new(None),
            log: ActivityLog::default(),
        }
    }

    /// Job id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current phase
    pub fn phase(&self) -> JobPhase {
        *self.phase.borrow()
    }

    /// Move to a new phase; terminal phases are final
    pub fn set_phase(&self, phase: JobPhase) {
        self.phase.send_if_modified(|current| {
            if current.is_terminal() || *current == phase {
                return false;
            }
            *current = phase;
            true
        });
    }

    /// Resolve once the job reaches a terminal phase
    pub async fn wait_terminal(&self) -> JobPhase {
        let mut rx = self.phase.subscribe();
        let result = rx.wait_for(JobPhase::is_terminal).await.map(|p| *p);
        match result {
            Ok(phase) => phase,
            Err(_) => self.phase(),
        }
    }

    /// Record an unexpected failure and stop the job
    pub fn fail(&self, error: JobError) {
        self.log.error(format!("Job failed: {}", error));
        *self.failure.write() = Some(error.to_string());
        self.set_phase(JobPhase::Failed);
    }

    /// Publish a progress snapshot
    pub fn set_progress(&self, progress: ProgressSnapshot) {
        *self.progress.write() = progress;
    }

    /// Latest progress snapshot
    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.read().clone()
    }

    /// Append a record; earlier records are never touched
    pub fn append(&self, record: ExtractionRecord) {
        self.results.write().push(record);
    }

    /// Copy of all records appended so far
    pub fn results(&self) -> Vec<ExtractionRecord> {
        self.results.read().clone()
    }

    /// Number of records appended so far
    pub fn result_count(&self) -> usize {
        self.results.read().len()
    }

    /// Phase, progress, and failure in one read
    pub fn status(&self) -> JobStatus {
        JobStatus {
            id: self.id,
            phase: self.phase(),
            progress: self.progress(),
            failure: self.failure.read().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_phase_is_sticky() {
        let shared = JobShared::new(Uuid::new_v4());
        shared.set_phase(JobPhase::Crawling);
        shared.set_phase(JobPhase::Cancelled);
        shared.set_phase(JobPhase::Completed);
        assert_eq!(shared.phase(), JobPhase::Cancelled);
    }

    #[test]
    fn test_progress_projection() {
        let p = ProgressSnapshot::new(2, 6, 2, 0, Duration::from_secs(10));
        assert_eq!(p.remaining_secs, Some(20.0));
        assert_eq!(ProgressSnapshot::new(0, 6, 0, 0, Duration::from_secs(1)).remaining_secs, None);
    }

    #[tokio::test]
    async fn test_wait_terminal() {
        let shared = std::sync::Arc::new(JobShared::new(Uuid::new_v4()));
        let waiter = {
            let shared = shared.clone();
            tokio::spawn(async move { shared.wait_terminal().await })
        };
        shared.set_phase(JobPhase::Crawling);
        shared.fail(JobError::Unexpected("boom".into()));
        assert_eq!(waiter.await.unwrap(), JobPhase::Failed);
        assert_eq!(shared.status().failure.as_deref(), Some("Unexpected job failure: boom"));
    }
}
