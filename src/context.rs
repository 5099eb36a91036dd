//! The `Cyre` context: public surface and call path
//!
//! A `Cyre` value is one isolated bus instance owning its registry,
//! scheduler, breathing monitor, metrics, and history. Cloning is cheap
//! and shares the instance. `init` idempotently starts the background
//! loops; everything else works through the instance state.

use crate::branch::Branch;
use crate::breathing::{BreathingMonitor, BreathingSnapshot};
use crate::config::CyreConfig;
use crate::dispatch;
use crate::history::{HistoryEntry, HistoryStore};
use crate::metrics::{MetricsSnapshot, MetricsStore};
use crate::orchestration::{OrchestrationApi, OrchestrationRecord};
use crate::pipeline::{self, PipelineVerdict};
use crate::registry::{ChannelRecord, Registry};
use crate::timekeeper::{BreathingAdaptation, TimeKeeper, TimeKeeperStatus, TimerCallback};
use crate::types::{
    CallResult, ChannelConfig, HandlerFn, Payload, RegisterResult, Repeat,
};
use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Shared instance state
pub(crate) struct CyreInner {
    pub(crate) config: CyreConfig,
    pub(crate) epoch: Instant,
    pub(crate) registry: Registry,
    pub(crate) breathing: Arc<BreathingMonitor>,
    pub(crate) timekeeper: Arc<TimeKeeper>,
    pub(crate) metrics: MetricsStore,
    pub(crate) history: HistoryStore,
    pub(crate) orchestrations: DashMap<String, Arc<OrchestrationRecord>>,
    /// Self-reference for formation callbacks and boxed call futures
    self_ref: Weak<CyreInner>,
    locked: AtomicBool,
    initialized: AtomicBool,
    running: Arc<AtomicBool>,
    sampler: Mutex<Option<JoinHandle<()>>>,
}

impl CyreInner {
    pub(crate) fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// The call path, boxed so intra-link chains can recurse
    pub(crate) fn call_with_depth(
        &self,
        id: &str,
        payload: Payload,
        depth: usize,
    ) -> BoxFuture<'static, CallResult> {
        let Some(inner) = self.self_ref.upgrade() else {
            return Box::pin(async { CallResult::rejected("instance shut down") });
        };
        let id = id.to_string();
        Box::pin(async move { inner.call_impl(&id, payload, depth).await })
    }

    async fn call_impl(&self, id: &str, payload: Payload, depth: usize) -> CallResult {
        let Some(channel) = self.registry.get_channel(id) else {
            return CallResult::rejected(format!("Channel {} not found", id));
        };

        self.metrics.channel(id).record_call(self.now_ms());
        self.breathing.record_call();

        if channel.has_fast_path {
            return dispatch::dispatch(self, &channel, payload, depth).await;
        }

        match pipeline::run(self, &channel, payload, false).await {
            PipelineVerdict::Terminal(result) => result,
            PipelineVerdict::Pass(forwarded) => {
                self.apply_timing(&channel, forwarded, depth).await
            }
        }
    }

    /// Timing decision after the pipeline passes (delay / interval /
    /// repeat semantics). A fresh call replaces any live formation with
    /// the newest payload.
    async fn apply_timing(
        &self,
        channel: &Arc<ChannelRecord>,
        payload: Payload,
        depth: usize,
    ) -> CallResult {
        let config = &channel.config;
        let id = config.id.as_str();

        match (config.delay, config.interval) {
            (None, None) => dispatch::dispatch(self, channel, payload, depth).await,

            (Some(0), None) => dispatch::dispatch(self, channel, payload, depth).await,

            // immediate first dispatch, remaining fires at interval cadence
            (Some(0), Some(interval)) => {
                let mut response = dispatch::dispatch(self, channel, payload.clone(), depth).await;
                let total = config.repeat.unwrap_or(Repeat::Forever);
                let remaining = match total {
                    Repeat::Forever => Repeat::Forever,
                    Repeat::Times(n) => Repeat::Times(n.saturating_sub(1)),
                };
                if !remaining.is_zero() {
                    let callback = self.flush_callback(id, payload);
                    let _ = self.timekeeper.keep_with_initial(
                        interval,
                        interval,
                        remaining,
                        id,
                        callback,
                        Some(BreathingAdaptation::default()),
                        config.priority,
                    );
                    let metadata = response.metadata_mut();
                    metadata.scheduled = Some(true);
                    metadata.delay = Some(interval);
                }
                response
            }

            // first dispatch after the delay, then interval cadence
            (Some(delay), interval) => {
                let cadence = interval.unwrap_or(delay);
                let total = config.repeat.unwrap_or(if interval.is_some() {
                    Repeat::Forever
                } else {
                    Repeat::Times(1)
                });
                self.schedule_channel(channel, delay, cadence, total, payload);
                scheduled_result(delay)
            }

            // interval only: the first fire waits one full interval
            (None, Some(interval)) => {
                let total = config.repeat.unwrap_or(Repeat::Forever);
                self.schedule_channel(channel, interval, interval, total, payload);
                scheduled_result(interval)
            }
        }
    }

    fn schedule_channel(
        &self,
        channel: &Arc<ChannelRecord>,
        initial: u64,
        cadence: u64,
        repeat: Repeat,
        payload: Payload,
    ) {
        let id = channel.config.id.as_str();
        let callback = self.flush_callback(id, payload);
        let _ = self.timekeeper.keep_with_initial(
            initial,
            cadence,
            repeat,
            id,
            callback,
            Some(BreathingAdaptation::default()),
            channel.config.priority,
        );
    }

    /// Debounce deferral: schedule (or re-schedule) the flush carrying
    /// this call's payload; returns the effective delay
    pub(crate) fn schedule_debounce(
        &self,
        id: &str,
        payload: Payload,
        window: u64,
        max_wait: Option<u64>,
    ) -> u64 {
        let callback = self.flush_callback(id, payload);
        self.timekeeper.keep_debounce(id, window, max_wait, callback)
    }

    /// Formation callback dispatching a stored payload to a channel
    fn flush_callback(&self, id: &str, payload: Payload) -> TimerCallback {
        let weak: Weak<CyreInner> = self.self_ref.clone();
        let id = id.to_string();
        Arc::new(move || {
            let weak = weak.clone();
            let id = id.clone();
            let payload = payload.clone();
            Box::pin(async move {
                let Some(inner) = weak.upgrade() else {
                    return Ok(());
                };
                let result = inner.timer_fire(&id, payload).await;
                if result.ok {
                    Ok(())
                } else {
                    Err(result
                        .message
                        .or(result.error)
                        .unwrap_or_else(|| "dispatch failed".to_string()))
                }
            })
        })
    }

    /// A formation fire: counts as a call, re-runs the processing
    /// operators (protections are skipped), then dispatches
    async fn timer_fire(&self, id: &str, payload: Payload) -> CallResult {
        let Some(channel) = self.registry.get_channel(id) else {
            // channel was forgotten while the formation was in flight
            return CallResult::accepted(format!("Channel {} no longer registered", id));
        };
        self.metrics.channel(id).record_call(self.now_ms());
        self.breathing.record_call();

        match pipeline::run(self, &channel, payload, true).await {
            PipelineVerdict::Terminal(result) => result,
            PipelineVerdict::Pass(forwarded) => {
                dispatch::dispatch(self, &channel, forwarded, 0).await
            }
        }
    }
}

fn scheduled_result(delay: u64) -> CallResult {
    let mut result = CallResult::accepted("scheduled");
    let metadata = result.metadata_mut();
    metadata.scheduled = Some(true);
    metadata.delay = Some(delay);
    result
}

/// Handle returned by `on`; dropping it does not unsubscribe
#[derive(Debug, Clone)]
pub struct Subscription {
    pub ok: bool,
    pub message: Option<String>,
    inner: Weak<CyreInner>,
    channel_id: String,
    handler_id: u64,
}

impl Subscription {
    /// Remove the handler; returns whether it was still registered
    pub fn unsubscribe(&self) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.registry.remove_handler(&self.channel_id, self.handler_id),
            None => false,
        }
    }
}

/// One isolated action bus instance
#[derive(Clone)]
pub struct Cyre {
    inner: Arc<CyreInner>,
}

impl Default for Cyre {
    fn default() -> Self {
        Self::new()
    }
}

impl Cyre {
    pub fn new() -> Self {
        Self::with_config(CyreConfig::default())
    }

    pub fn with_config(config: CyreConfig) -> Self {
        let epoch = Instant::now();
        let breathing = Arc::new(BreathingMonitor::new(config.breathing.clone()));
        let timekeeper =
            TimeKeeper::new(Arc::clone(&breathing), epoch, config.quartz_min_sleep_ms);
        let history = HistoryStore::new(config.history_capacity);
        Self {
            inner: Arc::new_cyclic(|self_ref| CyreInner {
                config,
                epoch,
                registry: Registry::new(),
                breathing,
                timekeeper,
                metrics: MetricsStore::new(),
                history,
                orchestrations: DashMap::new(),
                self_ref: self_ref.clone(),
                locked: AtomicBool::new(false),
                initialized: AtomicBool::new(false),
                running: Arc::new(AtomicBool::new(false)),
                sampler: Mutex::new(None),
            }),
        }
    }

    /// Start the breathing sampler and the quartz loop; idempotent.
    /// Must run inside a tokio runtime.
    pub fn init(&self) {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.running.store(true, Ordering::SeqCst);
        self.inner.timekeeper.start();

        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            loop {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if !inner.running.load(Ordering::Relaxed) {
                    break;
                }
                let interval = inner.breathing.sampler_interval();
                drop(inner);

                let before = Instant::now();
                tokio::time::sleep(interval).await;

                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if !inner.running.load(Ordering::Relaxed) {
                    break;
                }
                let elapsed = before.elapsed();
                let lag_ms = elapsed.saturating_sub(interval).as_millis() as u64;
                let window_ms = elapsed.as_millis() as u64;
                let monitor = Arc::clone(&inner.breathing);
                let now = inner.now_ms();
                drop(inner);
                // system probes are blocking; keep them off the loop
                let _ = tokio::task::spawn_blocking(move || {
                    monitor.breathe(window_ms, lag_ms, now)
                })
                .await;
            }
        });
        *self.inner.sampler.lock() = Some(handle);
        info!("cyre initialized");
    }

    /// Register (or replace) a channel
    pub fn action(&self, config: ChannelConfig) -> RegisterResult {
        if self.inner.locked.load(Ordering::SeqCst) {
            return RegisterResult::rejected("System is locked; registration rejected");
        }
        if let Err(cause) = pipeline::validate(&config) {
            return RegisterResult::rejected(cause);
        }

        let id = config.id.clone();
        // re-registration cancels any outstanding formation first
        self.inner.timekeeper.forget(&id);

        let compiled = pipeline::compile(&config);
        let has_fast_path = pipeline::has_fast_path(&config);
        self.inner.registry.insert_channel(ChannelRecord {
            config,
            pipeline: compiled,
            has_fast_path,
        });

        debug!(id = %id, fast_path = has_fast_path, "channel registered");
        if has_fast_path {
            RegisterResult::ok(format!("Fast path enabled for channel {}", id))
        } else {
            RegisterResult::ok(format!("Channel {} registered", id))
        }
    }

    /// Subscribe a handler to a channel id (the channel may not exist yet)
    pub fn on(&self, id: &str, handler: HandlerFn) -> Subscription {
        let handler_id = self.inner.registry.add_handler(id, handler);
        Subscription {
            ok: true,
            message: None,
            inner: Arc::downgrade(&self.inner),
            channel_id: id.to_string(),
            handler_id,
        }
    }

    /// Submit a payload to a channel
    pub async fn call(&self, id: &str, payload: Payload) -> CallResult {
        self.inner.call_with_depth(id, payload, 0).await
    }

    /// Current payload snapshot: last forwarded, or the initial payload
    pub fn get(&self, id: &str) -> Option<Payload> {
        let channel = self.inner.registry.get_channel(id)?;
        self.inner
            .history
            .last_forwarded(id)
            .or_else(|| channel.config.payload.clone())
    }

    /// Payload forwarded to the most recent successful dispatch
    pub fn get_previous(&self, id: &str) -> Option<Payload> {
        self.inner.history.last_forwarded(id)
    }

    /// Remove a channel with its handlers, formation, metrics, and history
    pub fn forget(&self, id: &str) -> bool {
        let formation = self.inner.timekeeper.forget(id);
        let channel = self.inner.registry.remove_channel(id);
        self.inner.history.remove(id);
        self.inner.metrics.remove(id);
        channel || formation
    }

    /// Block further registrations; calls and subscriptions still work
    pub fn lock(&self) -> RegisterResult {
        self.inner.locked.store(true, Ordering::SeqCst);
        RegisterResult::ok("System locked")
    }

    /// Remove channels, handlers, formations, and history; breathing
    /// state survives
    pub fn clear(&self) {
        self.inner.registry.clear();
        self.inner.timekeeper.reset();
        self.inner.history.clear(None);
        self.inner.metrics.clear();
    }

    /// Stop the schedulers and release all state
    pub fn shutdown(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.timekeeper.stop();
        if let Some(handle) = self.inner.sampler.lock().take() {
            handle.abort();
        }
        self.clear();
        self.inner.orchestrations.clear();
        self.inner.initialized.store(false, Ordering::SeqCst);
        info!("cyre shut down");
    }

    // ---- breathing ----

    pub fn get_breathing_state(&self) -> BreathingSnapshot {
        self.inner.breathing.snapshot()
    }

    /// Deterministic stress override for tests
    pub fn inject_test_stress(&self, stress: f64) {
        self.inner.breathing.inject_test_stress(stress);
    }

    pub fn clear_test_stress(&self) {
        self.inner.breathing.clear_test_stress();
    }

    // ---- metrics & history ----

    pub fn get_metrics(&self, id: &str) -> Option<MetricsSnapshot> {
        self.inner.metrics.get(id).map(|metrics| metrics.snapshot())
    }

    /// Newest-first dispatch history for one channel, or all channels
    pub fn get_history(&self, id: Option<&str>) -> Vec<HistoryEntry> {
        self.inner.history.entries(id)
    }

    pub fn clear_history(&self, id: Option<&str>) {
        self.inner.history.clear(id);
    }

    // ---- scheduler ----

    pub fn timekeeper_status(&self) -> TimeKeeperStatus {
        self.inner.timekeeper.status()
    }

    /// Real-time sleep helper
    pub async fn wait(ms: u64) {
        TimeKeeper::wait(ms).await;
    }

    // ---- namespaces & orchestration ----

    /// A branch rooted at this instance
    pub fn use_branch(&self, id: &str) -> Branch {
        Branch::new(self.clone(), id)
    }

    /// The orchestration surface
    pub fn orchestration(&self) -> OrchestrationApi {
        OrchestrationApi { inner: Arc::clone(&self.inner) }
    }

    pub(crate) fn inner(&self) -> &Arc<CyreInner> {
        &self.inner
    }
}

impl std::fmt::Debug for Cyre {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cyre")
            .field("channels", &self.inner.registry.channel_count())
            .field("initialized", &self.inner.initialized.load(Ordering::Relaxed))
            .field("locked", &self.inner.locked.load(Ordering::Relaxed))
            .finish()
    }
}

/// Install a default `tracing` subscriber honouring `RUST_LOG`
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
