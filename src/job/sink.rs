//! Batched, append-only persistence
//!
//! Records are buffered by a [`BatchWriter`] and handed to a [`RecordSink`]
//! every `batch_size` records, when resident memory crosses a ceiling, and
//! once more when the job ends.

use crate::error::Result;
use crate::extraction::ExtractionRecord;
use crate::job::state::ProgressSnapshot;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Destination for flushed records
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Append a batch of records
    async fn write_batch(&mut self, records: &[ExtractionRecord]) -> Result<()>;

    /// Append a progress snapshot
    async fn write_progress(&mut self, progress: &ProgressSnapshot) -> Result<()>;
}

/// JSON-lines files: one record per line, progress in a `.progress.jsonl`
/// file next to it
pub struct JsonLinesSink {
    path: PathBuf,
    records: File,
    progress: File,
}

impl JsonLinesSink {
    /// Open (or create) the output files for appending
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let records = OpenOptions::new().create(true).append(true).open(path).await?;
        let progress = OpenOptions::new()
            .create(true)
            .append(true)
            .open(Self::progress_path(path))
            .await?;
        info!("Writing records to {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            records,
            progress,
        })
    }

    /// Progress file for an output path
    pub fn progress_path(path: &Path) -> PathBuf {
        let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".progress.jsonl");
        path.with_file_name(name)
    }

    /// Record file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSink for JsonLinesSink {
    async fn write_batch(&mut self, records: &[ExtractionRecord]) -> Result<()> {
        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }
        self.records.write_all(&buf).await?;
        self.records.flush().await?;
        Ok(())
    }

    async fn write_progress(&mut self, progress: &ProgressSnapshot) -> Result<()> {
        let mut line = serde_json::to_vec(progress)?;
        line.push(b'\n');
        self.progress.write_all(&line).await?;
        self.progress.flush().await?;
        Ok(())
    }
}

/// In-memory sink; clones share storage
#[derive(Clone, Default)]
pub struct MemorySink {
    batches: Arc<Mutex<Vec<Vec<ExtractionRecord>>>>,
    progress: Arc<Mutex<Vec<ProgressSnapshot>>>,
}

impl MemorySink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Batches received, in order
    pub fn batches(&self) -> Vec<Vec<ExtractionRecord>> {
        self.batches.lock().clone()
    }

    /// All records received
    pub fn records(&self) -> Vec<ExtractionRecord> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    /// Progress snapshots received
    pub fn progress(&self) -> Vec<ProgressSnapshot> {
        self.progress.lock().clone()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn write_batch(&mut self, records: &[ExtractionRecord]) -> Result<()> {
        self.batches.lock().push(records.to_vec());
        Ok(())
    }

    async fn write_progress(&mut self, progress: &ProgressSnapshot) -> Result<()> {
        self.progress.lock().push(progress.clone());
        Ok(())
    }
}

/// Resident-memory check for the current process
pub struct MemoryProbe {
    ceiling_bytes: u64,
    pid: Pid,
    system: System,
}

impl MemoryProbe {
    /// Probe against a ceiling in megabytes
    pub fn new(ceiling_mb: u64) -> Self {
        Self {
            ceiling_bytes: ceiling_mb.saturating_mul(1024 * 1024),
            pid: Pid::from_u32(std::process::id()),
            system: System::new(),
        }
    }

    /// Current resident set size in bytes (0 if unavailable)
    pub fn rss_bytes(&mut self) -> u64 {
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        match self.system.process(self.pid) {
            Some(process) => process.memory(),
            None => {
                debug!("Could not find current process in sysinfo");
                0
            }
        }
    }

    /// Whether resident memory is above the ceiling
    pub fn over_ceiling(&mut self) -> bool {
        self.rss_bytes() > self.ceiling_bytes
    }
}

/// Why a flush happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Batch filled up
    BatchFull,
    /// Memory ceiling crossed
    Memory,
    /// Job ended
    Final,
}

/// Buffers records and flushes them to a sink in batches
pub struct BatchWriter {
    sink: Box<dyn RecordSink>,
    buffer: Vec<ExtractionRecord>,
    batch_size: usize,
    probe: Option<MemoryProbe>,
    flushed: usize,
}

impl BatchWriter {
    /// Writer over a sink
    pub fn new(sink: Box<dyn RecordSink>, batch_size: usize, probe: Option<MemoryProbe>) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            sink,
            buffer: Vec::with_capacity(batch_size),
            batch_size,
            probe,
            flushed: 0,
        }
    }

    /// Buffer a record; flushes when the batch fills or memory is high
    pub async fn push(
        &mut self,
        record: ExtractionRecord,
        progress: &ProgressSnapshot,
    ) -> Result<Option<FlushReason>> {
        self.buffer.push(record);
        let reason = if self.buffer.len() >= self.batch_size {
            Some(FlushReason::BatchFull)
        } else if self.probe.as_mut().map_or(false, MemoryProbe::over_ceiling) {
            Some(FlushReason::Memory)
        } else {
            None
        };
        if let Some(reason) = reason {
            self.flush(progress, reason).await?;
        }
        Ok(reason)
    }

    /// Write out whatever is buffered
    pub async fn flush(&mut self, progress: &ProgressSnapshot, reason: FlushReason) -> Result<()> {
        if !self.buffer.is_empty() {
            self.sink.write_batch(&self.buffer).await?;
            self.flushed += self.buffer.len();
            debug!("Flushed {} records ({:?})", self.buffer.len(), reason);
            self.buffer.clear();
        }
        self.sink.write_progress(progress).await
    }

    /// Records handed to the sink so far
    pub fn flushed(&self) -> usize {
        self.flushed
    }

    /// Records waiting for the next flush
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn record(i: usize) -> ExtractionRecord {
        ExtractionRecord {
            url: format!("https://a.test/{}", i),
            timestamp: Utc::now(),
            fields: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_batches_at_size_and_end() {
        let sink = MemorySink::new();
        let mut writer = BatchWriter::new(Box::new(sink.clone()), 2, None);
        let progress = ProgressSnapshot::default();
        assert_eq!(writer.push(record(0), &progress).await.unwrap(), None);
        assert_eq!(
            writer.push(record(1), &progress).await.unwrap(),
            Some(FlushReason::BatchFull)
        );
        writer.push(record(2), &progress).await.unwrap();
        assert_eq!(writer.pending(), 1);
        writer.flush(&progress, FlushReason::Final).await.unwrap();

        let batches = sink.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1][0].url, "https://a.test/2");
        assert_eq!(writer.flushed(), 3);
        assert_eq!(sink.progress().len(), 2);
    }

    #[tokio::test]
    async fn test_memory_ceiling_forces_flush() {
        let sink = MemorySink::new();
        let mut writer = BatchWriter::new(Box::new(sink.clone()), 100, Some(MemoryProbe::new(0)));
        let reason = writer.push(record(0), &ProgressSnapshot::default()).await.unwrap();
        assert_eq!(reason, Some(FlushReason::Memory));
        assert_eq!(sink.records().len(), 1);
    }

    #[tokio::test]
    async fn test_json_lines_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("records.jsonl");
        {
            let mut sink = JsonLinesSink::open(&path).await.unwrap();
            sink.write_batch(&[record(0), record(1)]).await.unwrap();
            sink.write_progress(&ProgressSnapshot::default()).await.unwrap();
        }
        {
            let mut sink = JsonLinesSink::open(&path).await.unwrap();
            sink.write_batch(&[record(2)]).await.unwrap();
        }
        let text = std::fs::read_to_string(&path).unwrap();
        let urls: Vec<String> = text
            .lines()
            .map(|l| serde_json::from_str::<ExtractionRecord>(l).unwrap().url)
            .collect();
        assert_eq!(urls, vec!["https://a.test/0", "https://a.test/1", "https://a.test/2"]);
        let progress = std::fs::read_to_string(JsonLinesSink::progress_path(&path)).unwrap();
        assert_eq!(progress.lines().count(), 1);
    }
}
