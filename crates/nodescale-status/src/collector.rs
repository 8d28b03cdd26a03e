//! Bounded, time-limited log of human-readable autoscaler events.
//!
//! Every append compacts the log: the oldest entries go first until at most
//! `max_items` remain, then every leading entry older than `now - lifetime`
//! is dropped. Reads compact too, so stale entries never come back.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nodescale_core::config::LogsConfig;
use nodescale_core::{epoch_secs, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::trace;

pub const DEFAULT_MAX_ITEMS: usize = 50;
pub const DEFAULT_ITEM_LIFETIME: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogItem {
    pub message: String,
    pub level: LogLevel,
    /// Seconds since the Unix epoch.
    pub timestamp: Timestamp,
}

pub struct LogCollector {
    items: Mutex<VecDeque<LogItem>>,
    max_items: usize,
    item_lifetime: Duration,
}

impl Default for LogCollector {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITEMS, DEFAULT_ITEM_LIFETIME)
    }
}

impl LogCollector {
    pub fn new(max_items: usize, item_lifetime: Duration) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(max_items + 1)),
            max_items,
            item_lifetime,
        }
    }

    pub fn from_config(config: &LogsConfig, item_lifetime: Duration) -> Self {
        Self::new(config.max_items, item_lifetime)
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    pub fn item_lifetime(&self) -> Duration {
        self.item_lifetime
    }

    pub fn log(&self, message: impl Into<String>, level: LogLevel) {
        self.log_at(message, level, epoch_secs());
    }

    pub fn log_at(&self, message: impl Into<String>, level: LogLevel, now: Timestamp) {
        let mut items = self.lock();
        items.push_back(LogItem {
            message: message.into(),
            level,
            timestamp: now,
        });
        self.compact(&mut items, now);
    }

    pub fn get_logs(&self) -> Vec<LogItem> {
        self.get_logs_at(epoch_secs())
    }

    pub fn get_logs_at(&self, now: Timestamp) -> Vec<LogItem> {
        let mut items = self.lock();
        self.compact(&mut items, now);
        items.iter().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LogItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn compact(&self, items: &mut VecDeque<LogItem>, now: Timestamp) {
        let before = items.len();
        while items.len() > self.max_items {
            items.pop_front();
        }
        let cutoff = now.saturating_sub(self.item_lifetime.as_secs());
        while items.front().is_some_and(|item| item.timestamp < cutoff) {
            items.pop_front();
        }
        if items.len() != before {
            trace!(dropped = before - items.len(), kept = items.len(), "compacted status log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: u64 = 60;

    #[test]
    fn size_limit_keeps_newest() {
        let collector = LogCollector::new(3, DEFAULT_ITEM_LIFETIME);
        for i in 0..5 {
            collector.log_at(format!("e{i}"), LogLevel::Info, 100);
        }
        let messages: Vec<_> = collector
            .get_logs_at(100)
            .into_iter()
            .map(|item| item.message)
            .collect();
        assert_eq!(messages, vec!["e2", "e3", "e4"]);
    }

    #[test]
    fn expired_entries_are_dropped_on_read() {
        let collector = LogCollector::default();
        collector.log_at("old", LogLevel::Warning, 0);
        collector.log_at("new", LogLevel::Error, 14 * MINUTE);
        let logs = collector.get_logs_at(16 * MINUTE);
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "new");
        assert_eq!(logs[0].level, LogLevel::Error);
    }

    #[test]
    fn entry_exactly_at_cutoff_is_kept() {
        let collector = LogCollector::default();
        collector.log_at("edge", LogLevel::Info, 0);
        assert_eq!(collector.get_logs_at(15 * MINUTE).len(), 1);
        assert!(collector.get_logs_at(15 * MINUTE + 1).is_empty());
    }

    #[test]
    fn defaults() {
        let collector = LogCollector::from_config(&LogsConfig::default(), DEFAULT_ITEM_LIFETIME);
        assert_eq!(collector.max_items(), DEFAULT_MAX_ITEMS);
        assert_eq!(collector.item_lifetime(), DEFAULT_ITEM_LIFETIME);
    }

    #[test]
    fn items_serialize_with_lowercase_levels() {
        let item = LogItem {
            message: "scale-up".into(),
            level: LogLevel::Warning,
            timestamp: 7,
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["level"], "warning");
        assert_eq!(json["timestamp"], 7);
    }
}
