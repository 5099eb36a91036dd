//! Channel, handler, and branch stores keyed by global id

use crate::pipeline::Operator;
use crate::types::{ChannelConfig, DispatchStrategy, HandlerFn};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// A registered channel with its compiled pipeline
pub struct ChannelRecord {
    pub config: ChannelConfig,
    pub pipeline: Vec<Operator>,
    pub has_fast_path: bool,
}

/// A subscribed handler; `id` supports targeted unsubscribe
#[derive(Clone)]
pub struct HandlerEntry {
    pub id: u64,
    pub func: HandlerFn,
}

/// Branch membership record; channels are not owned here, only the
/// namespace path and its active flag
#[derive(Debug)]
pub struct BranchRecord {
    pub path: String,
    pub active: Arc<AtomicBool>,
}

/// Stores for channels, handlers, execution-operator selection, and branches
#[derive(Default)]
pub struct Registry {
    channels: DashMap<String, Arc<ChannelRecord>>,
    handlers: DashMap<String, Vec<HandlerEntry>>,
    executors: DashMap<String, DispatchStrategy>,
    branches: DashMap<String, Arc<BranchRecord>>,
    next_handler_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- channels ----

    /// Insert or replace a channel record
    pub fn insert_channel(&self, record: ChannelRecord) {
        let id = record.config.id.clone();
        self.channels.insert(id.clone(), Arc::new(record));
        // a re-registration may change the declared dispatch strategy
        self.recompute_executor(&id);
    }

    pub fn get_channel(&self, id: &str) -> Option<Arc<ChannelRecord>> {
        self.channels.get(id).map(|entry| entry.clone())
    }

    pub fn contains_channel(&self, id: &str) -> bool {
        self.channels.contains_key(id)
    }

    pub fn remove_channel(&self, id: &str) -> bool {
        let existed = self.channels.remove(id).is_some();
        self.handlers.remove(id);
        self.executors.remove(id);
        existed
    }

    pub fn channel_ids(&self) -> Vec<String> {
        self.channels.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    // ---- handlers ----

    /// Append a handler in insertion order; returns its id
    pub fn add_handler(&self, channel_id: &str, func: HandlerFn) -> u64 {
        let id = self.next_handler_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.handlers
            .entry(channel_id.to_string())
            .or_default()
            .push(HandlerEntry { id, func });
        self.recompute_executor(channel_id);
        id
    }

    /// Remove a handler by id; returns whether it was present
    pub fn remove_handler(&self, channel_id: &str, handler_id: u64) -> bool {
        let mut removed = false;
        if let Some(mut entry) = self.handlers.get_mut(channel_id) {
            let before = entry.len();
            entry.retain(|h| h.id != handler_id);
            removed = entry.len() != before;
        }
        if removed {
            self.recompute_executor(channel_id);
        }
        removed
    }

    /// Consistent snapshot of a channel's handlers for one dispatch
    pub fn handler_snapshot(&self, channel_id: &str) -> Vec<HandlerEntry> {
        self.handlers.get(channel_id).map(|entry| entry.clone()).unwrap_or_default()
    }

    pub fn handler_count(&self, channel_id: &str) -> usize {
        self.handlers.get(channel_id).map(|entry| entry.len()).unwrap_or(0)
    }

    /// Execution operator currently selected for a channel
    pub fn executor_for(&self, channel_id: &str) -> DispatchStrategy {
        self.executors
            .get(channel_id)
            .map(|entry| *entry)
            .unwrap_or(DispatchStrategy::Single)
    }

    /// Recompute execution-operator selection from handler count and the
    /// declared dispatch strategy: one handler always runs `single`; with
    /// two or more, a declared `single` upgrades to `parallel`, any other
    /// declared strategy is honoured.
    fn recompute_executor(&self, channel_id: &str) {
        let count = self.handler_count(channel_id);
        let declared = self
            .get_channel(channel_id)
            .map(|channel| channel.config.dispatch)
            .unwrap_or_default();

        let selected = match count {
            0 | 1 => DispatchStrategy::Single,
            _ => match declared {
                DispatchStrategy::Single => DispatchStrategy::Parallel,
                other => other,
            },
        };
        self.executors.insert(channel_id.to_string(), selected);
    }

    // ---- branches ----

    pub fn insert_branch(&self, path: &str) -> Arc<BranchRecord> {
        let record = Arc::new(BranchRecord {
            path: path.to_string(),
            active: Arc::new(AtomicBool::new(true)),
        });
        self.branches.insert(path.to_string(), record.clone());
        record
    }

    pub fn get_branch(&self, path: &str) -> Option<Arc<BranchRecord>> {
        self.branches.get(path).map(|entry| entry.clone())
    }

    /// Channel ids under a branch path prefix
    pub fn channels_under(&self, path: &str) -> Vec<String> {
        let prefix = format!("{}/", path);
        self.channels
            .iter()
            .filter(|entry| entry.key().starts_with(&prefix))
            .map(|entry| entry.key().clone())
            .collect()
    }

    // ---- lifecycle ----

    /// Drop channels, handlers, and executor selections; branch records stay
    pub fn clear(&self) {
        self.channels.clear();
        self.handlers.clear();
        self.executors.clear();
    }
}
