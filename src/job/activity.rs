//! Leveled activity stream for external display
//!
//! A bounded ring of timestamped entries per job. Every entry is mirrored to
//! `tracing` at the matching level.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, error, info, warn};

/// Entries kept per job
pub const ACTIVITY_CAPACITY: usize = 1000;

/// Display level of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Routine progress
    Info,
    /// Something worked
    Success,
    /// Recoverable problem
    Warning,
    /// Failure
    Error,
    /// Phase or step change
    Process,
}

/// One activity entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When it was logged
    pub timestamp: DateTime<Utc>,
    /// Level
    pub level: LogLevel,
    /// Text
    pub message: String,
}

/// Bounded activity ring
#[derive(Debug)]
pub struct ActivityLog {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::with_capacity(ACTIVITY_CAPACITY)
    }
}

impl ActivityLog {
    /// Ring holding at most `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(ACTIVITY_CAPACITY))),
            capacity: capacity.max(1),
        }
    }

    /// Append an entry, evicting the oldest when full
    pub fn push<S: Into<String>>(&self, level: LogLevel, message: S) {
        let message = message.into();
        match level {
            LogLevel::Error => error!("{}", message),
            LogLevel::Warning => warn!("{}", message),
            LogLevel::Process => debug!("{}", message),
            LogLevel::Info | LogLevel::Success => info!("{}", message),
        }

        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(LogEntry {
            timestamp: Utc::now(),
            level,
            message,
        });
    }

    /// Log at info
    pub fn info<S: Into<String>>(&self, message: S) {
        self.push(LogLevel::Info, message);
    }

    /// Log at success
    pub fn success<S: Into<String>>(&self, message: S) {
        self.push(LogLevel::Success, message);
    }

    /// Log at warning
    pub fn warning<S: Into<String>>(&self, message: S) {
        self.push(LogLevel::Warning, message);
    }

    /// Log at error
    pub fn error<S: Into<String>>(&self, message: S) {
        self.push(LogLevel::Error, message);
    }

    /// Log a step change
    pub fn process<S: Into<String>>(&self, message: S) {
        self.push(LogLevel::Process, message);
    }

    /// Snapshot of all retained entries, oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Number of retained entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing has been logged
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retained entries at one level
    pub fn count(&self, level: LogLevel) -> usize {
        self.entries.lock().iter().filter(|e| e.level == level).count()
    }
}
