//! # Activity Log
//!
//! A bounded ring of human-readable lines for the admin display. Every line
//! is also emitted as a `tracing` event so nothing shown on screen is
//! missing from the structured log.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

/// Lines kept before the oldest is dropped.
pub const DEFAULT_ACTIVITY_CAPACITY: usize = 100;

/// One recorded event.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub at: DateTime<Utc>,
    pub line: String,
}

impl std::fmt::Display for ActivityEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.at.format("%H:%M:%S"), self.line)
    }
}

/// Bounded, shared activity ring.
///
/// Uses a std mutex: the critical sections never await.
#[derive(Debug)]
pub struct ActivityLog {
    role: &'static str,
    capacity: usize,
    entries: Mutex<VecDeque<ActivityEntry>>,
}

impl ActivityLog {
    pub fn new(role: &'static str) -> Self {
        Self::with_capacity(role, DEFAULT_ACTIVITY_CAPACITY)
    }

    pub fn with_capacity(role: &'static str, capacity: usize) -> Self {
        ActivityLog {
            role,
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    /// Appends a line, evicting the oldest when full.
    pub fn record(&self, line: impl Into<String>) {
        let line = line.into();
        info!(role = self.role, "{}", line);

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(ActivityEntry {
            at: Utc::now(),
            line,
        });
    }

    /// Returns up to `limit` most recent entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<ActivityEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_evicts_oldest() {
        let log = ActivityLog::with_capacity("test", 3);
        for i in 0..5 {
            log.record(format!("event {}", i));
        }

        let lines: Vec<String> = log.recent(10).into_iter().map(|e| e.line).collect();
        assert_eq!(lines, vec!["event 2", "event 3", "event 4"]);
    }

    #[test]
    fn test_recent_limit() {
        let log = ActivityLog::new("test");
        assert!(log.is_empty());
        log.record("a");
        log.record("b");
        log.record("c");

        let lines: Vec<String> = log.recent(2).into_iter().map(|e| e.line).collect();
        assert_eq!(lines, vec!["b", "c"]);
        assert_eq!(log.len(), 3);
        assert!(log.recent(0).is_empty());
    }
}
