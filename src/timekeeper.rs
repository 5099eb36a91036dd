//! Formation scheduler ("TimeKeeper")
//!
//! A single cooperative quartz loop drives every delayed, repeated, and
//! debounced dispatch. Formations are keyed by owner id with replacement
//! semantics: keeping a new formation under an existing id cancels the old
//! one. Due formations fire in `next_fire` order, ties broken by insertion
//! order, and callbacks are awaited inline so per-owner ordering holds.

use crate::breathing::BreathingMonitor;
use crate::error::{CyreError, CyreResult};
use crate::types::{Priority, Repeat};
use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Work executed when a formation fires
pub type TimerCallback = Arc<dyn Fn() -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// Stress-adaptation settings for a formation
#[derive(Debug, Clone, Copy)]
pub struct BreathingAdaptation {
    pub adapt_to_stress: bool,
    pub stress_multiplier: f64,
    pub pause_threshold: f64,
    pub resume_threshold: f64,
}

impl Default for BreathingAdaptation {
    fn default() -> Self {
        Self {
            adapt_to_stress: true,
            stress_multiplier: 2.0,
            pause_threshold: 0.85,
            resume_threshold: 0.60,
        }
    }
}

struct Formation {
    id: String,
    callback: TimerCallback,
    /// Next fire time, ms since the keeper epoch
    next_fire: u64,
    /// Cadence between fires after the first
    interval: u64,
    /// Remaining fires; `None` is unbounded
    remaining: Option<u64>,
    /// Insertion order, tie-break for simultaneous fires
    seq: u64,
    adaptation: Option<BreathingAdaptation>,
    priority: Priority,
    /// First call of the burst for debounce maxWait accounting
    burst_start: Option<u64>,
    errors: u64,
}

/// Read-only snapshot of one formation
#[derive(Debug, Clone, Serialize)]
pub struct FormationSnapshot {
    pub id: String,
    pub next_fire_in_ms: u64,
    pub interval: u64,
    pub remaining: Option<u64>,
    pub errors: u64,
}

/// Scheduler status
#[derive(Debug, Clone, Serialize)]
pub struct TimeKeeperStatus {
    pub formations: usize,
    pub active_formations: usize,
    pub quartz_running: bool,
    pub in_recuperation: bool,
}

/// The formation registry plus its quartz loop
pub struct TimeKeeper {
    formations: DashMap<String, Formation>,
    seq: AtomicU64,
    breathing: Arc<BreathingMonitor>,
    epoch: Instant,
    min_sleep_ms: u64,
    running: Arc<AtomicBool>,
    quartz: Mutex<Option<JoinHandle<()>>>,
    /// Wakes the quartz when a formation lands inside its current sleep
    wakeup: Arc<Notify>,
    /// Handed to the quartz task so a dropped keeper winds it down
    self_ref: std::sync::Weak<TimeKeeper>,
}

impl TimeKeeper {
    pub fn new(
        breathing: Arc<BreathingMonitor>,
        epoch: Instant,
        min_sleep_ms: u64,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            formations: DashMap::new(),
            seq: AtomicU64::new(0),
            breathing,
            epoch,
            min_sleep_ms: min_sleep_ms.max(1),
            running: Arc::new(AtomicBool::new(false)),
            quartz: Mutex::new(None),
            wakeup: Arc::new(Notify::new()),
            self_ref: self_ref.clone(),
        })
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Create or replace the formation `id`, firing every `duration_ms`.
    ///
    /// A negative duration is rejected. `Repeat::Times(0)` is a no-op that
    /// succeeds without scheduling anything (exactly zero executions).
    pub fn keep(
        &self,
        duration_ms: i64,
        callback: TimerCallback,
        repeat: Repeat,
        id: &str,
    ) -> CyreResult<FormationSnapshot> {
        if duration_ms < 0 {
            return Err(CyreError::Scheduler(format!(
                "negative duration: {}",
                duration_ms
            )));
        }
        let duration = duration_ms as u64;
        self.keep_with_initial(duration, duration, repeat, id, callback, None, Priority::Medium)?;
        Ok(self.formation_snapshot(id).unwrap_or(FormationSnapshot {
            id: id.to_string(),
            next_fire_in_ms: 0,
            interval: duration,
            remaining: Some(0),
            errors: 0,
        }))
    }

    /// Create or replace a formation with distinct first-fire and cadence
    /// intervals. This is the channel scheduling entry point: `initial_ms`
    /// models "first after delay", `interval_ms` the subsequent cadence.
    pub(crate) fn keep_with_initial(
        &self,
        initial_ms: u64,
        interval_ms: u64,
        repeat: Repeat,
        id: &str,
        callback: TimerCallback,
        adaptation: Option<BreathingAdaptation>,
        priority: Priority,
    ) -> CyreResult<()> {
        if repeat.is_zero() {
            // exactly-zero semantics: tear down anything pending and return ok
            self.formations.remove(id);
            return Ok(());
        }
        let now = self.now_ms();
        let formation = Formation {
            id: id.to_string(),
            callback,
            next_fire: now + initial_ms,
            interval: interval_ms.max(1),
            remaining: match repeat {
                Repeat::Forever => None,
                Repeat::Times(n) => Some(n),
            },
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            adaptation,
            priority,
            burst_start: None,
            errors: 0,
        };
        debug!(id, initial_ms, interval_ms, "formation kept");
        self.formations.insert(id.to_string(), formation);
        self.wakeup.notify_one();
        Ok(())
    }

    /// Schedule (or reschedule) a one-shot debounce flush for `id`.
    ///
    /// Each call resets the window relative to now and replaces the stored
    /// callback; the `max_wait` deadline is anchored to the first call of
    /// the burst and survives replacement. Returns the effective delay.
    pub(crate) fn keep_debounce(
        &self,
        id: &str,
        window_ms: u64,
        max_wait_ms: Option<u64>,
        callback: TimerCallback,
    ) -> u64 {
        let now = self.now_ms();
        let burst_start = self
            .formations
            .get(id)
            .and_then(|f| f.burst_start)
            .unwrap_or(now);

        let mut next_fire = now + window_ms;
        if let Some(max_wait) = max_wait_ms {
            next_fire = next_fire.min(burst_start + max_wait);
        }

        let formation = Formation {
            id: id.to_string(),
            callback,
            next_fire,
            interval: window_ms.max(1),
            remaining: Some(1),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            adaptation: None,
            priority: Priority::Medium,
            burst_start: Some(burst_start),
            errors: 0,
        };
        self.formations.insert(id.to_string(), formation);
        self.wakeup.notify_one();
        next_fire.saturating_sub(now)
    }

    /// Remove a formation if present; idempotent, never fails
    pub fn forget(&self, id: &str) -> bool {
        let removed = self.formations.remove(id).is_some();
        if removed {
            debug!(id, "formation forgotten");
        }
        removed
    }

    pub fn has_formation(&self, id: &str) -> bool {
        self.formations.contains_key(id)
    }

    pub fn formation_snapshot(&self, id: &str) -> Option<FormationSnapshot> {
        let now = self.now_ms();
        self.formations.get(id).map(|f| FormationSnapshot {
            id: f.id.clone(),
            next_fire_in_ms: f.next_fire.saturating_sub(now),
            interval: f.interval,
            remaining: f.remaining,
            errors: f.errors,
        })
    }

    /// Scheduler snapshot
    pub fn status(&self) -> TimeKeeperStatus {
        let stress = self.breathing.stress();
        let stretched = self
            .formations
            .iter()
            .filter(|f| {
                f.adaptation
                    .map(|a| a.adapt_to_stress && stress > a.pause_threshold)
                    .unwrap_or(false)
            })
            .count();
        let total = self.formations.len();
        TimeKeeperStatus {
            formations: total,
            active_formations: total - stretched,
            quartz_running: self.running.load(Ordering::Relaxed),
            in_recuperation: self.breathing.is_recuperating(),
        }
    }

    /// Cancel every formation
    pub fn reset(&self) {
        self.formations.clear();
    }

    /// Real-time sleep helper for tests and orchestration delays
    pub async fn wait(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    /// Start the quartz loop; idempotent. The loop holds only a weak
    /// reference, so a dropped keeper winds it down on its own.
    pub(crate) fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let weak = self.self_ref.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Some(keeper) = weak.upgrade() else {
                    break;
                };
                if !keeper.running.load(Ordering::Relaxed) {
                    break;
                }
                let sleep_ms = keeper.next_sleep_ms();
                let wakeup = Arc::clone(&keeper.wakeup);
                drop(keeper);
                if sleep_ms > 0 {
                    // a keep() during the sleep re-arms the schedule early
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {}
                        _ = wakeup.notified() => {}
                    }
                }

                let Some(keeper) = weak.upgrade() else {
                    break;
                };
                if !keeper.running.load(Ordering::Relaxed) {
                    break;
                }
                keeper.tick().await;
            }
        });
        *self.quartz.lock() = Some(handle);
    }

    /// Stop the quartz loop
    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.quartz.lock().take() {
            handle.abort();
        }
    }

    /// Sleep until the nearest formation, clamped between the minimum
    /// sleep and the breathing rate
    fn next_sleep_ms(&self) -> u64 {
        let now = self.now_ms();
        let rate = self.breathing.current_rate_ms().max(self.min_sleep_ms);
        let nearest = self.formations.iter().map(|f| f.next_fire).min();
        match nearest {
            Some(due) if due <= now => 0,
            Some(due) => (due - now).clamp(self.min_sleep_ms, rate),
            None => rate,
        }
    }

    /// Fire every due formation once, in `next_fire` order
    async fn tick(&self) {
        let now = self.now_ms();
        let stress = self.breathing.stress();

        let mut due: Vec<(u64, u64, String)> = self
            .formations
            .iter()
            .filter(|f| f.next_fire <= now)
            .map(|f| (f.next_fire, f.seq, f.id.clone()))
            .collect();
        due.sort();

        for (_, seq, id) in due {
            let Some(callback) = self.advance(&id, seq, now, stress) else {
                continue;
            };
            if let Err(cause) = callback().await {
                warn!(id = %id, %cause, "formation callback failed");
                if let Some(mut formation) = self.formations.get_mut(&id) {
                    formation.errors += 1;
                }
            }
        }
    }

    /// Update one due formation's schedule and hand back its callback, or
    /// `None` when it was replaced or is being stretched by stress.
    fn advance(&self, id: &str, seq: u64, now: u64, stress: f64) -> Option<TimerCallback> {
        let mut entry = self.formations.get_mut(id)?;
        if entry.seq != seq {
            // replaced since the due-scan; the new formation owns the slot
            return None;
        }

        let mut effective_interval = entry.interval;
        if entry.priority != Priority::Critical {
            if let Some(adaptation) = entry.adaptation {
                if adaptation.adapt_to_stress && stress > adaptation.pause_threshold {
                    effective_interval =
                        (entry.interval as f64 * adaptation.stress_multiplier) as u64;
                }
            }
        }

        let callback = entry.callback.clone();
        let scheduled = entry.next_fire;
        entry.remaining = entry.remaining.map(|r| r.saturating_sub(1));
        let exhausted = entry.remaining == Some(0);
        if exhausted {
            drop(entry);
            self.formations.remove(id);
        } else {
            // anchor to the scheduled time so cadence does not drift
            entry.next_fire = (scheduled + effective_interval).max(now + 1);
        }
        Some(callback)
    }
}

impl std::fmt::Debug for TimeKeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeKeeper")
            .field("formations", &self.formations.len())
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}

impl Drop for TimeKeeper {
    fn drop(&mut self) {
        if let Some(handle) = self.quartz.lock().take() {
            handle.abort();
        }
    }
}
