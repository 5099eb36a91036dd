//! Adaptive stress monitor ("breathing")
//!
//! A sampling loop combines process CPU load, memory pressure, event-loop
//! lag, and call-rate density into a single stress score in `[0, 1]`. The
//! score drives the quartz idle cadence and the recuperation gate that
//! sheds low-priority work under load.

use crate::config::BreathingConfig;
use crate::types::Priority;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use sysinfo::System;

/// Observable breathing pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BreathingPattern {
    Normal,
    Elevated,
    Recuperating,
}

/// Read-only snapshot of the breathing state
#[derive(Debug, Clone, Serialize)]
pub struct BreathingSnapshot {
    pub stress: f64,
    pub current_rate: u64,
    pub pattern: BreathingPattern,
    pub is_recuperating: bool,
    pub breath_count: u64,
    pub last_breath_ms: u64,
}

#[derive(Debug)]
struct BreathingState {
    stress: f64,
    current_rate: u64,
    pattern: BreathingPattern,
    is_recuperating: bool,
    breath_count: u64,
    last_breath_ms: u64,
}

/// Process-wide (per instance) stress sensor
pub struct BreathingMonitor {
    config: BreathingConfig,
    state: RwLock<BreathingState>,
    test_stress: RwLock<Option<f64>>,
    calls_in_window: AtomicU64,
    system: Mutex<System>,
    cores: usize,
}

impl BreathingMonitor {
    pub fn new(config: BreathingConfig) -> Self {
        let current_rate = config.rate_base_ms;
        Self {
            config,
            state: RwLock::new(BreathingState {
                stress: 0.0,
                current_rate,
                pattern: BreathingPattern::Normal,
                is_recuperating: false,
                breath_count: 0,
                last_breath_ms: 0,
            }),
            test_stress: RwLock::new(None),
            calls_in_window: AtomicU64::new(0),
            system: Mutex::new(System::new()),
            cores: num_cpus::get().max(1),
        }
    }

    /// Called on every accepted call; feeds call-rate density
    pub fn record_call(&self) {
        self.calls_in_window.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BreathingSnapshot {
        let state = self.state.read();
        BreathingSnapshot {
            stress: state.stress,
            current_rate: state.current_rate,
            pattern: state.pattern,
            is_recuperating: state.is_recuperating,
            breath_count: state.breath_count,
            last_breath_ms: state.last_breath_ms,
        }
    }

    pub fn stress(&self) -> f64 {
        self.state.read().stress
    }

    pub fn is_recuperating(&self) -> bool {
        self.state.read().is_recuperating
    }

    /// Quartz idle cadence in milliseconds, clamped to the configured band
    pub fn current_rate_ms(&self) -> u64 {
        self.state.read().current_rate
    }

    /// Recuperation admission: critical always passes; high passes until
    /// stress crosses the hard cutoff; everything else waits out recovery
    pub fn admits(&self, priority: Priority) -> bool {
        let state = self.state.read();
        if !state.is_recuperating {
            return true;
        }
        match priority {
            Priority::Critical => true,
            Priority::High => state.stress < crate::constants::RECUPERATION_HIGH_PRIORITY_CUTOFF,
            _ => false,
        }
    }

    /// Deterministic stress override for tests; applied immediately
    pub fn inject_test_stress(&self, stress: f64) {
        *self.test_stress.write() = Some(stress.clamp(0.0, 1.0));
        self.apply_stress(stress.clamp(0.0, 1.0), 0);
    }

    pub fn clear_test_stress(&self) {
        *self.test_stress.write() = None;
        self.apply_stress(0.0, 0);
    }

    /// Sampler interval for the next breath
    pub fn sampler_interval(&self) -> Duration {
        let state = self.state.read();
        if state.is_recuperating {
            Duration::from_millis(self.config.rate_recovery_ms)
        } else {
            Duration::from_millis(state.current_rate)
        }
    }

    /// Take one breath: sample the system and fold the components into the
    /// stress score. `window_ms` is the elapsed sample window, `lag_ms` how
    /// far the sampler overshot its intended sleep.
    pub fn breathe(&self, window_ms: u64, lag_ms: u64, now_ms: u64) {
        if let Some(injected) = *self.test_stress.read() {
            self.apply_stress(injected, now_ms);
            return;
        }

        let (cpu, memory) = {
            let mut system = self.system.lock();
            system.refresh_cpu_usage();
            system.refresh_memory();
            let cpu = f64::from(system.global_cpu_usage()) / 100.0;
            let total = system.total_memory().max(1);
            let memory = system.used_memory() as f64 / total as f64;
            (cpu.clamp(0.0, 1.0), memory.clamp(0.0, 1.0))
        };

        let window = window_ms.max(1) as f64;
        let lag = (lag_ms as f64 / window).clamp(0.0, 1.0);

        let calls = self.calls_in_window.swap(0, Ordering::Relaxed) as f64;
        let capacity =
            crate::constants::CALL_RATE_CAPACITY_PER_CORE * self.cores as f64 * window / 1000.0;
        let rate = (calls / capacity.max(1.0)).clamp(0.0, 1.0);

        let combined = (0.30 * cpu + 0.20 * memory + 0.30 * lag + 0.20 * rate).clamp(0.0, 1.0);
        self.apply_stress(combined, now_ms);
    }

    fn apply_stress(&self, stress: f64, now_ms: u64) {
        let config = &self.config;
        let mut state = self.state.write();

        if state.is_recuperating {
            if stress <= config.recuperation_exit {
                state.is_recuperating = false;
            }
        } else if stress >= config.recuperation_enter {
            state.is_recuperating = true;
        }

        state.stress = stress;
        state.pattern = if state.is_recuperating {
            BreathingPattern::Recuperating
        } else if stress >= config.elevated {
            BreathingPattern::Elevated
        } else {
            BreathingPattern::Normal
        };

        let span = config.rate_max_ms.saturating_sub(config.rate_base_ms) as f64;
        let rate = config.rate_base_ms + (span * stress) as u64;
        state.current_rate = rate.clamp(config.rate_min_ms, config.rate_max_ms);
        state.breath_count += 1;
        state.last_breath_ms = now_ms;
    }
}

impl std::fmt::Debug for BreathingMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreathingMonitor")
            .field("state", &*self.state.read())
            .field("cores", &self.cores)
            .finish()
    }
}
