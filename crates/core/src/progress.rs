use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use chrono::{Local, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::logging::{LogLevel, LogRecord, LogSink};

pub const ACTIVITY_LOG_CAPACITY: usize = 50;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub time: NaiveTime,
    pub level: LogLevel,
    pub message: String,
}

impl fmt::Display for ActivityEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.time.format("%H:%M:%S"), self.message)
    }
}

/// Fixed-capacity log, newest entry first. Pushing past capacity evicts the
/// oldest entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityLog {
    entries: VecDeque<ActivityEntry>,
    capacity: usize,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::with_capacity(ACTIVITY_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, level: LogLevel, message: impl Into<String>) {
        self.push_entry(ActivityEntry {
            time: Local::now().time(),
            level,
            message: message.into(),
        });
    }

    pub fn push_entry(&mut self, entry: ActivityEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_back();
        }
        self.entries.push_front(entry);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&ActivityEntry> {
        self.entries.front()
    }

    /// Newest first.
    pub fn iter(&self) -> impl Iterator<Item = &ActivityEntry> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AssemblyStage {
    Idle,
    Running { chapter_index: usize },
    Failed,
    Completed,
}

impl AssemblyStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Completed)
    }
}

impl fmt::Display for AssemblyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Running { chapter_index } => write!(f, "running chapter {}", chapter_index + 1),
            Self::Failed => f.write_str("failed"),
            Self::Completed => f.write_str("completed"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    /// 1-based; 0 until the first chapter starts.
    pub current_chapter_index: usize,
    pub total_chapters: usize,
    pub percent_complete: f32,
    pub stage: AssemblyStage,
    pub log: ActivityLog,
    pub last_error: Option<String>,
}

impl ProgressState {
    pub fn new(total_chapters: usize) -> Self {
        Self {
            current_chapter_index: 0,
            total_chapters,
            percent_complete: 0.0,
            stage: AssemblyStage::Idle,
            log: ActivityLog::new(),
            last_error: None,
        }
    }
}

/// Sink that records into an [`ActivityLog`] and forwards to another sink.
pub struct ActivityLogSink<'a> {
    log: Mutex<ActivityLog>,
    forward: &'a dyn LogSink,
}

impl<'a> ActivityLogSink<'a> {
    pub fn new(forward: &'a dyn LogSink) -> Self {
        Self {
            log: Mutex::new(ActivityLog::new()),
            forward,
        }
    }

    pub fn snapshot(&self) -> ActivityLog {
        self.log
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl LogSink for ActivityLogSink<'_> {
    fn log(&self, record: LogRecord) {
        // Debug chatter stays out of the user-facing log.
        if record.level != LogLevel::Debug && record.level != LogLevel::Trace {
            if let Ok(mut guard) = self.log.lock() {
                guard.push(record.level, record.message.clone());
            }
        }
        self.forward.log(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::VecLogSink;

    #[test]
    fn newest_entry_comes_first() {
        let mut log = ActivityLog::new();
        log.push(LogLevel::Info, "first");
        log.push(LogLevel::Info, "second");
        let messages: Vec<_> = log.iter().map(|entry| entry.message.as_str()).collect();
        assert_eq!(messages, ["second", "first"]);
    }

    #[test]
    fn capacity_is_never_exceeded() {
        let mut log = ActivityLog::new();
        for n in 0..120 {
            log.push(LogLevel::Info, format!("line {n}"));
        }
        assert_eq!(log.len(), ACTIVITY_LOG_CAPACITY);
        assert_eq!(log.latest().unwrap().message, "line 119");
        assert_eq!(log.iter().last().unwrap().message, "line 70");
    }

    #[test]
    fn entry_display_has_timestamp_prefix() {
        let entry = ActivityEntry {
            time: NaiveTime::from_hms_opt(9, 5, 7).unwrap(),
            level: LogLevel::Info,
            message: "PDF Exported.".into(),
        };
        assert_eq!(entry.to_string(), "[09:05:07] PDF Exported.");
    }

    #[test]
    fn sink_records_and_forwards() {
        let forward = VecLogSink::new();
        let sink = ActivityLogSink::new(&forward);
        sink.log(LogRecord::info("visible"));
        sink.log(LogRecord::new(LogLevel::Debug, "hidden"));

        let snapshot = sink.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.latest().unwrap().message, "visible");
        assert_eq!(forward.records().len(), 2);
    }
}
