//! Per-channel payload history and last-forwarded tracking
//!
//! Holds the payload last forwarded to handlers (change detection and
//! `get_previous`) plus a bounded newest-first ring of dispatch records.

use crate::types::Payload;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;

/// Compact dispatch outcome stored with each history entry
#[derive(Debug, Clone, Serialize)]
pub struct HistoryResult {
    pub ok: bool,
    pub message: Option<String>,
}

/// One dispatch record
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub action_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Payload,
    pub result: HistoryResult,
}

#[derive(Debug, Default)]
struct ChannelHistory {
    /// Payload forwarded to the most recent successful dispatch
    last_forwarded: Option<Payload>,
    /// Newest-first ring of dispatch records
    entries: VecDeque<HistoryEntry>,
}

/// History store keyed by global channel id
#[derive(Debug)]
pub struct HistoryStore {
    capacity: usize,
    channels: DashMap<String, RwLock<ChannelHistory>>,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, channels: DashMap::new() }
    }

    /// Record a dispatch. Successful dispatches also update the
    /// last-forwarded payload used by change detection.
    pub fn record(&self, id: &str, payload: Payload, ok: bool, message: Option<String>) {
        let cell = self
            .channels
            .entry(id.to_string())
            .or_insert_with(|| RwLock::new(ChannelHistory::default()));
        let mut history = cell.write();

        if ok {
            history.last_forwarded = Some(payload.clone());
        }
        history.entries.push_front(HistoryEntry {
            action_id: id.to_string(),
            timestamp: Utc::now(),
            payload,
            result: HistoryResult { ok, message },
        });
        history.entries.truncate(self.capacity);
    }

    /// Last forwarded payload for a channel
    pub fn last_forwarded(&self, id: &str) -> Option<Payload> {
        self.channels.get(id).and_then(|cell| cell.read().last_forwarded.clone())
    }

    /// Newest-first entries for one channel, or across all channels
    pub fn entries(&self, id: Option<&str>) -> Vec<HistoryEntry> {
        match id {
            Some(id) => self
                .channels
                .get(id)
                .map(|cell| cell.read().entries.iter().cloned().collect())
                .unwrap_or_default(),
            None => {
                let mut all: Vec<HistoryEntry> = self
                    .channels
                    .iter()
                    .flat_map(|cell| cell.read().entries.iter().cloned().collect::<Vec<_>>())
                    .collect();
                all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                all
            }
        }
    }

    /// Clear one channel's history, or everything
    pub fn clear(&self, id: Option<&str>) {
        match id {
            Some(id) => {
                self.channels.remove(id);
            }
            None => self.channels.clear(),
        }
    }

    pub fn remove(&self, id: &str) {
        self.channels.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_updates_last_forwarded_on_success_only() {
        let store = HistoryStore::new(10);
        store.record("ch", json!({"a": 1}), true, None);
        store.record("ch", json!({"a": 2}), false, Some("Handler execution failed".into()));

        assert_eq!(store.last_forwarded("ch"), Some(json!({"a": 1})));
        assert_eq!(store.entries(Some("ch")).len(), 2);
    }

    #[test]
    fn test_entries_are_newest_first_and_bounded() {
        let store = HistoryStore::new(3);
        for i in 0..5 {
            store.record("ch", json!(i), true, None);
        }
        let entries = store.entries(Some("ch"));
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].payload, json!(4));
        assert_eq!(entries[2].payload, json!(2));
    }

    #[test]
    fn test_clear_scopes() {
        let store = HistoryStore::new(10);
        store.record("a", json!(1), true, None);
        store.record("b", json!(2), true, None);

        store.clear(Some("a"));
        assert!(store.entries(Some("a")).is_empty());
        assert_eq!(store.entries(Some("b")).len(), 1);

        store.clear(None);
        assert!(store.entries(None).is_empty());
    }
}
