//! Crawl jobs
//!
//! The driving loop, its shared state, persistence, and the manager that
//! starts, cancels, and reports on jobs.

pub mod activity;
pub mod manager;
pub mod runner;
pub mod sink;
pub mod state;

pub use activity::{ActivityLog, LogEntry, LogLevel, ACTIVITY_CAPACITY};
pub use manager::{JobHandle, JobManager, SHUTDOWN_GRACE};
pub use runner::CrawlJob;
pub use sink::{BatchWriter, FlushReason, JsonLinesSink, MemoryProbe, MemorySink, RecordSink};
pub use state::{JobPhase, JobShared, JobStatus, ProgressSnapshot};
