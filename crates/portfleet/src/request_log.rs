//! Bounded request log shared by every listener.
//!
//! Entries are kept newest-first in a fixed-capacity ring; once full, each
//! append silently evicts the oldest entry. Readers get cloned snapshots, so
//! a reader never observes a half-written entry.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// Default number of retained entries
pub const DEFAULT_LOG_CAPACITY: usize = 500;

/// Default page size for log queries
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Terminal outcome of one proxied request. Exactly one of `statusCode` or
/// `errorMessage` appears in the serialized entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LogOutcome {
    Completed {
        #[serde(rename = "statusCode")]
        status_code: u16,
    },
    Failed {
        #[serde(rename = "errorMessage")]
        error_message: String,
    },
}

/// One completed or failed proxied request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub local_port: u16,
    pub method: String,
    pub path: String,
    pub target_url: String,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub outcome: LogOutcome,
}

impl LogEntry {
    /// Build an entry stamped with a fresh id and the current time
    pub fn new(
        local_port: u16,
        method: impl Into<String>,
        path: impl Into<String>,
        target_url: impl Into<String>,
        duration: Duration,
        outcome: LogOutcome,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            timestamp: Utc::now(),
            local_port,
            method: method.into(),
            path: path.into(),
            target_url: target_url.into(),
            duration_ms: duration.as_millis() as u64,
            outcome,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self.outcome {
            LogOutcome::Completed { status_code } => Some(status_code),
            LogOutcome::Failed { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            LogOutcome::Completed { .. } => None,
            LogOutcome::Failed { error_message } => Some(error_message),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, LogOutcome::Failed { .. })
    }
}

/// Filter and paging for log queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub port: Option<u16>,
    pub status_code: Option<u16>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            port: None,
            status_code: None,
            limit: DEFAULT_QUERY_LIMIT,
            offset: 0,
        }
    }
}

impl LogQuery {
    fn matches(&self, entry: &LogEntry) -> bool {
        self.port.map_or(true, |p| entry.local_port == p)
            && self
                .status_code
                .map_or(true, |s| entry.status_code() == Some(s))
    }
}

/// Aggregate statistics over the retained entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStats {
    pub total_logs: usize,
    pub error_count: usize,
    pub average_duration_ms: u64,
}

/// Fixed-capacity, newest-first request log
pub struct RequestLog {
    entries: RwLock<VecDeque<LogEntry>>,
    capacity: usize,
}

impl RequestLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert at the front, evicting the oldest entry when full
    pub fn append(&self, entry: LogEntry) {
        let mut entries = self.entries.write();
        if entries.len() == self.capacity {
            entries.pop_back();
        }
        entries.push_front(entry);
    }

    /// Page through all entries, newest first
    pub fn list(&self, limit: usize, offset: usize) -> Vec<LogEntry> {
        let entries = self.entries.read();
        entries.iter().skip(offset).take(limit).cloned().collect()
    }

    pub fn by_port(&self, port: u16, limit: usize) -> Vec<LogEntry> {
        self.query(&LogQuery {
            port: Some(port),
            limit,
            ..Default::default()
        })
    }

    pub fn by_status(&self, status_code: u16, limit: usize) -> Vec<LogEntry> {
        self.query(&LogQuery {
            status_code: Some(status_code),
            limit,
            ..Default::default()
        })
    }

    /// Filter, then page
    pub fn query(&self, query: &LogQuery) -> Vec<LogEntry> {
        let entries = self.entries.read();
        entries
            .iter()
            .filter(|e| query.matches(e))
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect()
    }

    /// Copy of every retained entry, newest first
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.read().iter().cloned().collect()
    }

    pub fn stats(&self) -> LogStats {
        let entries = self.entries.read();
        let total_logs = entries.len();
        let error_count = entries.iter().filter(|e| e.is_error()).count();
        let average_duration_ms = if total_logs == 0 {
            0
        } else {
            let sum: u64 = entries.iter().map(|e| e.duration_ms).sum();
            (sum as f64 / total_logs as f64).round() as u64
        };
        LogStats {
            total_logs,
            error_count,
            average_duration_ms,
        }
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for RequestLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ok_entry(port: u16, path: &str, status: u16, ms: u64) -> LogEntry {
        LogEntry::new(
            port,
            "GET",
            path,
            "http://localhost:4000",
            Duration::from_millis(ms),
            LogOutcome::Completed { status_code: status },
        )
    }

    fn err_entry(port: u16, path: &str, ms: u64) -> LogEntry {
        LogEntry::new(
            port,
            "GET",
            path,
            "http://localhost:4000",
            Duration::from_millis(ms),
            LogOutcome::Failed {
                error_message: "connection refused".to_string(),
            },
        )
    }

    #[test]
    fn test_newest_first_and_eviction() {
        let log = RequestLog::new(3);
        for i in 0..4 {
            log.append(ok_entry(3000, &format!("/{i}"), 200, 1));
        }
        assert_eq!(log.len(), 3);
        let all = log.snapshot();
        assert_eq!(all[0].path, "/3");
        assert_eq!(all[2].path, "/1");
        assert!(all.iter().all(|e| e.path != "/0"));
    }

    #[test]
    fn test_default_capacity_overflow() {
        let log = RequestLog::default();
        assert_eq!(log.capacity(), DEFAULT_LOG_CAPACITY);
        for i in 0..=DEFAULT_LOG_CAPACITY {
            log.append(ok_entry(3000, &format!("/{i}"), 200, 1));
        }
        assert_eq!(log.len(), DEFAULT_LOG_CAPACITY);
        let newest = log.list(1, 0);
        assert_eq!(newest[0].path, format!("/{DEFAULT_LOG_CAPACITY}"));
        assert!(log.snapshot().iter().all(|e| e.path != "/0"));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let log = RequestLog::new(0);
        log.append(ok_entry(3000, "/a", 200, 1));
        log.append(ok_entry(3000, "/b", 200, 1));
        assert_eq!(log.len(), 1);
        assert_eq!(log.list(10, 0)[0].path, "/b");
    }

    #[test]
    fn test_list_paging() {
        let log = RequestLog::new(10);
        for i in 0..5 {
            log.append(ok_entry(3000, &format!("/{i}"), 200, 1));
        }
        let page: Vec<_> = log.list(2, 1).into_iter().map(|e| e.path).collect();
        assert_eq!(page, vec!["/3", "/2"]);
        assert!(log.list(10, 10).is_empty());
    }

    #[test]
    fn test_filters() {
        let log = RequestLog::new(10);
        log.append(ok_entry(3000, "/a", 200, 1));
        log.append(ok_entry(3001, "/b", 404, 1));
        log.append(err_entry(3000, "/c", 1));
        log.append(ok_entry(3000, "/d", 404, 1));

        let port_3000: Vec<_> = log.by_port(3000, 10).into_iter().map(|e| e.path).collect();
        assert_eq!(port_3000, vec!["/d", "/c", "/a"]);

        let not_found: Vec<_> = log.by_status(404, 10).into_iter().map(|e| e.path).collect();
        assert_eq!(not_found, vec!["/d", "/b"]);

        let combined = log.query(&LogQuery {
            port: Some(3000),
            status_code: Some(404),
            ..Default::default()
        });
        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].path, "/d");

        assert_eq!(log.by_port(3000, 1).len(), 1);
    }

    #[test]
    fn test_stats_and_clear() {
        let log = RequestLog::new(10);
        assert_eq!(
            log.stats(),
            LogStats {
                total_logs: 0,
                error_count: 0,
                average_duration_ms: 0
            }
        );

        log.append(ok_entry(3000, "/a", 200, 10));
        log.append(err_entry(3000, "/b", 21));
        let stats = log.stats();
        assert_eq!(stats.total_logs, 2);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.average_duration_ms, 16);

        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.stats().total_logs, 0);
    }

    #[test]
    fn test_entry_serialization_has_exactly_one_outcome_field() {
        let ok = serde_json::to_value(ok_entry(3000, "/a", 201, 5)).unwrap();
        assert_eq!(ok["statusCode"], 201);
        assert!(ok.get("errorMessage").is_none());
        assert_eq!(ok["localPort"], 3000);
        assert_eq!(ok["durationMs"], 5);
        assert!(ok["timestamp"].is_i64());

        let err = serde_json::to_value(err_entry(3000, "/a", 5)).unwrap();
        assert_eq!(err["errorMessage"], "connection refused");
        assert!(err.get("statusCode").is_none());
    }

    #[test]
    fn test_concurrent_appends_respect_capacity() {
        let log = Arc::new(RequestLog::new(50));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        log.append(ok_entry(3000 + t, &format!("/{t}/{i}"), 200, 1));
                        assert!(log.len() <= 50);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(log.len(), 50);
    }
}
