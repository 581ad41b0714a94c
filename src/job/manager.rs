//! Job lifecycle: start, cancel, poll, results
//!
//! At most one job runs per manager. Starting a job cancels the one in
//! flight and waits for its worker to exit first, so sessions of two jobs
//! never coexist. Workers run under a supervisor that turns an error or a
//! panic in the driving loop into a `Failed` phase with partial results
//! kept.

use crate::browser::SessionFactory;
use crate::config::{ExtractionMethod, JobConfig, PaginationStrategy};
use crate::error::{JobError, Result};
use crate::extraction::{export_rows, ExportTable, ExtractionRecord, OpenAiModel, TextModel};
use crate::job::activity::LogEntry;
use crate::job::runner::CrawlJob;
use crate::job::sink::{JsonLinesSink, MemorySink, RecordSink};
use crate::job::state::{JobPhase, JobShared, JobStatus};
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// How long a cancelled worker gets before it is aborted
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Opaque reference to a started job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    id: Uuid,
}

impl JobHandle {
    /// Job id
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

struct JobEntry {
    shared: Arc<JobShared>,
    schema: Vec<String>,
}

struct ActiveJob {
    id: Uuid,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
}

/// Owns the single active job of a process
pub struct JobManager {
    factory: Arc<dyn SessionFactory>,
    model: Option<Arc<dyn TextModel>>,
    active: Mutex<Option<ActiveJob>>,
    current: RwLock<Option<JobEntry>>,
}

impl JobManager {
    /// Manager over a session factory
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            factory,
            model: None,
            active: Mutex::new(None),
            current: RwLock::new(None),
        }
    }

    /// Use this model instead of building one from each job's config
    pub fn with_model(mut self, model: Arc<dyn TextModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Start a job, writing records to `config.output` when set
    pub async fn start(&self, config: JobConfig) -> Result<JobHandle> {
        config.validate()?;
        let sink: Box<dyn RecordSink> = match &config.output {
            Some(path) => Box::new(JsonLinesSink::open(path).await?),
            None => Box::new(MemorySink::new()),
        };
        self.start_with_sink(config, sink).await
    }

    /// Start a job writing to the given sink
    #[instrument(skip_all)]
    pub async fn start_with_sink(
        &self,
        config: JobConfig,
        sink: Box<dyn RecordSink>,
    ) -> Result<JobHandle> {
        config.validate()?;
        let model = self.model_for(&config)?;

        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            info!("Superseding job {}", previous.id);
            self.stop(previous).await;
        }

        let id = Uuid::new_v4();
        let shared = Arc::new(JobShared::new(id));
        let cancel = CancellationToken::new();
        let schema = config.field_names();
        let job = CrawlJob::new(
            config,
            Arc::clone(&self.factory),
            model,
            sink,
            Arc::clone(&shared),
            cancel.clone(),
        )?;

        *self.current.write() = Some(JobEntry {
            shared: Arc::clone(&shared),
            schema,
        });
        shared.log.process(format!("Job {} queued", id));
        let worker = tokio::spawn(supervise(job, shared));
        *active = Some(ActiveJob { id, cancel, worker });

        info!("Started job {}", id);
        Ok(JobHandle { id })
    }

    fn model_for(&self, config: &JobConfig) -> Result<Option<Arc<dyn TextModel>>> {
        let needs_model = config.extraction == ExtractionMethod::Ai
            || config.pagination.strategy == PaginationStrategy::AiConfidence;
        if !needs_model {
            return Ok(None);
        }
        if let Some(model) = &self.model {
            return Ok(Some(Arc::clone(model)));
        }
        let model: Arc<dyn TextModel> = Arc::new(OpenAiModel::from_config(&config.ai)?);
        Ok(Some(model))
    }

    /// Signal cancellation and wait for the worker to exit
    async fn stop(&self, job: ActiveJob) {
        let ActiveJob {
            id,
            cancel,
            mut worker,
        } = job;
        cancel.cancel();
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut worker).await {
            Ok(Ok(())) => debug!("Worker for job {} exited", id),
            Ok(Err(e)) => warn!("Worker for job {} ended abnormally: {}", id, e),
            Err(_) => {
                warn!("Worker for job {} ignored cancellation; aborting", id);
                worker.abort();
                match worker.await {
                    Ok(()) => debug!("Worker for job {} finished before abort", id),
                    Err(e) if e.is_cancelled() => debug!("Worker for job {} aborted", id),
                    Err(e) => warn!("Worker for job {} ended abnormally: {}", id, e),
                }
                if let Ok(shared) = self.shared(id) {
                    shared.set_phase(JobPhase::Cancelled);
                }
            }
        }
    }

    fn shared(&self, id: Uuid) -> std::result::Result<Arc<JobShared>, JobError> {
        match self.current.read().as_ref() {
            Some(entry) if entry.shared.id() == id => Ok(Arc::clone(&entry.shared)),
            _ => Err(JobError::NotFound(id.to_string())),
        }
    }

    /// Cancel a job and wait for it to stop. Finished jobs are left as they
    /// are.
    pub async fn cancel(&self, handle: &JobHandle) -> Result<()> {
        let shared = self.shared(handle.id)?;
        let mut active = self.active.lock().await;
        if active.as_ref().map_or(false, |a| a.id == handle.id) {
            if let Some(job) = active.take() {
                shared.log.warning("Cancellation requested");
                self.stop(job).await;
            }
        }
        Ok(())
    }

    /// Phase and progress
    pub fn poll(&self, handle: &JobHandle) -> Result<JobStatus> {
        Ok(self.shared(handle.id)?.status())
    }

    /// Records appended so far
    pub fn results(&self, handle: &JobHandle) -> Result<Vec<ExtractionRecord>> {
        Ok(self.shared(handle.id)?.results())
    }

    /// Activity entries, oldest first
    pub fn activity(&self, handle: &JobHandle) -> Result<Vec<LogEntry>> {
        Ok(self.shared(handle.id)?.log.entries())
    }

    /// Results as rows keyed by the job's field schema
    pub fn export(&self, handle: &JobHandle) -> Result<ExportTable> {
        let current = self.current.read();
        match current.as_ref() {
            Some(entry) if entry.shared.id() == handle.id => {
                Ok(export_rows(&entry.shared.results(), &entry.schema))
            }
            _ => Err(JobError::NotFound(handle.id.to_string()).into()),
        }
    }

    /// Wait until the job reaches a terminal phase
    pub async fn wait(&self, handle: &JobHandle) -> Result<JobPhase> {
        let shared = self.shared(handle.id)?;
        Ok(shared.wait_terminal().await)
    }

    /// Stop the job if it is running and forget it
    pub async fn clear(&self, handle: &JobHandle) -> Result<()> {
        self.cancel(handle).await?;
        *self.current.write() = None;
        debug!("Cleared job {}", handle);
        Ok(())
    }

    /// Stop whatever is running
    pub async fn shutdown(&self) {
        if let Some(job) = self.active.lock().await.take() {
            self.stop(job).await;
        }
    }
}

/// Run a job and map whatever escapes the loop onto a terminal phase
async fn supervise(job: CrawlJob, shared: Arc<JobShared>) {
    let outcome = AssertUnwindSafe(job.run()).catch_unwind().await;
    match outcome {
        Ok(Ok(phase)) => debug!("Job {} ended in {:?}", shared.id(), phase),
        Ok(Err(e)) => {
            error!("Job {} failed: {}", shared.id(), e);
            shared.fail(JobError::Unexpected(e.to_string()));
        }
        Err(panic) => {
            let message = panic_message(&panic);
            error!("Job {} panicked: {}", shared.id(), message);
            shared.fail(JobError::Panicked(message));
        }
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
