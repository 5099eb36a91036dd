//! Runtime constants
//!
//! Centralized constants for the action bus including breathing rates,
//! recuperation thresholds, and scheduler defaults. The values here are the
//! compiled-in defaults; `config::CyreConfig` can override the tunable ones.

/// Baseline breathing sample interval in milliseconds
pub const RATE_BASE_MS: u64 = 200;

/// Minimum breathing rate (fastest cadence) in milliseconds
pub const RATE_MIN_MS: u64 = 50;

/// Maximum breathing rate (slowest cadence) in milliseconds
pub const RATE_MAX_MS: u64 = 1000;

/// Sampler cadence while the system is recuperating, in milliseconds
pub const RATE_RECOVERY_MS: u64 = 2000;

/// Stress level at which recuperation begins
pub const RECUPERATION_ENTER_STRESS: f64 = 0.90;

/// Stress level below which recuperation ends
pub const RECUPERATION_EXIT_STRESS: f64 = 0.60;

/// Stress level at which the breathing pattern reads as elevated
pub const ELEVATED_STRESS: f64 = 0.75;

/// During recuperation, high-priority calls are still admitted below this stress
pub const RECUPERATION_HIGH_PRIORITY_CUTOFF: f64 = 0.95;

/// Calls per second per core treated as call-rate saturation
pub const CALL_RATE_CAPACITY_PER_CORE: f64 = 200.0;

/// Maximum retained history entries per channel
pub const HISTORY_CAPACITY: usize = 100;

/// Maximum intra-link chain depth before the runtime cuts the chain
pub const INTRA_LINK_DEPTH_MAX: usize = 25;

/// Minimum quartz sleep in milliseconds (bounds formation firing error)
pub const QUARTZ_MIN_SLEEP_MS: u64 = 5;

/// Base delay for orchestration step retry backoff, in milliseconds
pub const RETRY_BACKOFF_BASE_MS: u64 = 100;

/// Multiplier applied to the retry backoff on each attempt
pub const RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Ceiling on loop-step iterations when no terminating condition fires
pub const LOOP_MAX_ITERATIONS: u64 = 1000;
