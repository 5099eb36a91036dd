//! Per-channel execution counters

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lock-free per-channel counters. Times are milliseconds since the owning
/// instance's epoch; zero means "never".
#[derive(Debug, Default)]
pub struct ChannelMetrics {
    pub total_calls: AtomicU64,
    pub total_executions: AtomicU64,
    pub total_errors: AtomicU64,
    pub last_call_time: AtomicU64,
    pub last_execution_time: AtomicU64,
}

impl ChannelMetrics {
    pub fn record_call(&self, now_ms: u64) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        // zero is the "never" sentinel
        self.last_call_time.store(now_ms.max(1), Ordering::Relaxed);
    }

    pub fn record_execution(&self, now_ms: u64) {
        self.total_executions.fetch_add(1, Ordering::Relaxed);
        self.last_execution_time.store(now_ms.max(1), Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_execution(&self) -> u64 {
        self.last_execution_time.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_executions: self.total_executions.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            last_call_time: self.last_call_time.load(Ordering::Relaxed),
            last_execution_time: self.last_execution_time.load(Ordering::Relaxed),
        }
    }
}

/// Read-only copy of a channel's counters
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_calls: u64,
    pub total_executions: u64,
    pub total_errors: u64,
    pub last_call_time: u64,
    pub last_execution_time: u64,
}

/// Counter store keyed by global channel id
#[derive(Debug, Default)]
pub struct MetricsStore {
    channels: DashMap<String, Arc<ChannelMetrics>>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters for a channel, created on first use
    pub fn channel(&self, id: &str) -> Arc<ChannelMetrics> {
        self.channels
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(ChannelMetrics::default()))
            .clone()
    }

    pub fn get(&self, id: &str) -> Option<Arc<ChannelMetrics>> {
        self.channels.get(id).map(|entry| entry.clone())
    }

    pub fn remove(&self, id: &str) {
        self.channels.remove(id);
    }

    pub fn clear(&self) {
        self.channels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_counters_accumulate() {
        let store = MetricsStore::new();
        let metrics = store.channel("ch");
        metrics.record_call(10);
        metrics.record_call(20);
        metrics.record_execution(20);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_calls, 2);
        assert_eq!(snapshot.total_executions, 1);
        assert_eq!(snapshot.last_call_time, 20);
        assert_eq!(snapshot.last_execution_time, 20);
    }

    #[test]
    fn test_concurrent_increments_are_exact() {
        let store = Arc::new(MetricsStore::new());
        let mut handles = vec![];
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                let metrics = store.channel("shared");
                for i in 0..1000 {
                    metrics.record_call(i);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.channel("shared").snapshot().total_calls, 8000);
    }
}
