use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::tailer::LineEvent;

/// Lines kept by a log view unless configured otherwise.
pub const DEFAULT_LOG_CAPACITY: usize = 5000;

/// First tokens at least this long are taken to be a timestamp.
const MIN_TIMESTAMP_LEN: usize = 21;

static NEXT_LOG_ID: AtomicU64 = AtomicU64::new(0);

/// A container log line, split into the timestamp docker prefixes with `-t`
/// and the message itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub id: u64,
    pub timestamp: String,
    pub content: String,
}

impl LogLine {
    /// `"2023-10-27T10:00:00.000000000Z message"` becomes timestamp and
    /// content; anything else is all content with an empty timestamp.
    pub fn parse(raw: &str) -> Self {
        let (timestamp, content) = match raw.split_once(' ') {
            Some((first, rest)) if first.len() >= MIN_TIMESTAMP_LEN => (first, rest),
            _ => ("", raw),
        };
        Self {
            id: NEXT_LOG_ID.fetch_add(1, Ordering::Relaxed),
            timestamp: timestamp.to_string(),
            content: content.to_string(),
        }
    }
}

impl From<&LineEvent> for LogLine {
    fn from(event: &LineEvent) -> Self {
        LogLine::parse(&event.line)
    }
}

/// The most recent log lines, oldest first.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    capacity: usize,
    lines: VecDeque<LogLine>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            lines: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Append, dropping the oldest line once full.
    pub fn push(&mut self, line: LogLine) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogLine> {
        self.lines.iter()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
