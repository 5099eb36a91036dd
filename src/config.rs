//! Configuration loading and management
//!
//! Loading hierarchy: env > file > defaults. The file path comes from the
//! `CYRE_CONFIG` environment variable; without it only defaults and `CYRE_*`
//! overrides apply.

use crate::constants;
use crate::error::{CyreError, CyreResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Breathing monitor tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreathingConfig {
    /// Baseline sample interval in milliseconds
    pub rate_base_ms: u64,
    /// Fastest breathing rate in milliseconds
    pub rate_min_ms: u64,
    /// Slowest breathing rate in milliseconds
    pub rate_max_ms: u64,
    /// Sampler cadence while recuperating, in milliseconds
    pub rate_recovery_ms: u64,
    /// Stress level that enters recuperation
    pub recuperation_enter: f64,
    /// Stress level that exits recuperation
    pub recuperation_exit: f64,
    /// Stress level reported as an elevated pattern
    pub elevated: f64,
}

impl Default for BreathingConfig {
    fn default() -> Self {
        Self {
            rate_base_ms: constants::RATE_BASE_MS,
            rate_min_ms: constants::RATE_MIN_MS,
            rate_max_ms: constants::RATE_MAX_MS,
            rate_recovery_ms: constants::RATE_RECOVERY_MS,
            recuperation_enter: constants::RECUPERATION_ENTER_STRESS,
            recuperation_exit: constants::RECUPERATION_EXIT_STRESS,
            elevated: constants::ELEVATED_STRESS,
        }
    }
}

/// Instance-level tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CyreConfig {
    pub breathing: BreathingConfig,
    /// Retained history entries per channel
    pub history_capacity: usize,
    /// Maximum intra-link chain depth
    pub intra_link_depth_max: usize,
    /// Minimum quartz sleep in milliseconds
    pub quartz_min_sleep_ms: u64,
}

impl Default for CyreConfig {
    fn default() -> Self {
        Self {
            breathing: BreathingConfig::default(),
            history_capacity: constants::HISTORY_CAPACITY,
            intra_link_depth_max: constants::INTRA_LINK_DEPTH_MAX,
            quartz_min_sleep_ms: constants::QUARTZ_MIN_SLEEP_MS,
        }
    }
}

/// Load configuration from file (if `CYRE_CONFIG` is set) and environment
pub fn load_config() -> CyreResult<CyreConfig> {
    let mut config = match std::env::var("CYRE_CONFIG") {
        Ok(path) => load_from_file(Path::new(&path))?,
        Err(_) => CyreConfig::default(),
    };

    apply_env_overrides(&mut config)?;
    validate_config(&config)?;

    Ok(config)
}

/// Load configuration from a TOML file
pub fn load_from_file(path: &Path) -> CyreResult<CyreConfig> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    Ok(config)
}

/// Apply `CYRE_*` environment variable overrides
pub fn apply_env_overrides(config: &mut CyreConfig) -> CyreResult<()> {
    override_u64("CYRE_RATE_BASE_MS", &mut config.breathing.rate_base_ms)?;
    override_u64("CYRE_RATE_MIN_MS", &mut config.breathing.rate_min_ms)?;
    override_u64("CYRE_RATE_MAX_MS", &mut config.breathing.rate_max_ms)?;
    override_u64("CYRE_RATE_RECOVERY_MS", &mut config.breathing.rate_recovery_ms)?;
    override_f64("CYRE_RECUPERATION_ENTER", &mut config.breathing.recuperation_enter)?;
    override_f64("CYRE_RECUPERATION_EXIT", &mut config.breathing.recuperation_exit)?;
    override_usize("CYRE_HISTORY_CAPACITY", &mut config.history_capacity)?;
    override_usize("CYRE_INTRA_LINK_DEPTH_MAX", &mut config.intra_link_depth_max)?;
    override_u64("CYRE_QUARTZ_MIN_SLEEP_MS", &mut config.quartz_min_sleep_ms)?;
    Ok(())
}

/// Validate configuration invariants
pub fn validate_config(config: &CyreConfig) -> CyreResult<()> {
    let b = &config.breathing;
    if b.rate_min_ms == 0 || b.rate_min_ms > b.rate_max_ms {
        return Err(CyreError::Config(format!(
            "breathing rates out of order: min {} max {}",
            b.rate_min_ms, b.rate_max_ms
        )));
    }
    if b.rate_base_ms < b.rate_min_ms || b.rate_base_ms > b.rate_max_ms {
        return Err(CyreError::Config(format!(
            "base rate {} outside [{}, {}]",
            b.rate_base_ms, b.rate_min_ms, b.rate_max_ms
        )));
    }
    if !(0.0..=1.0).contains(&b.recuperation_enter)
        || !(0.0..=1.0).contains(&b.recuperation_exit)
        || b.recuperation_exit >= b.recuperation_enter
    {
        return Err(CyreError::Config(
            "recuperation thresholds must satisfy 0 <= exit < enter <= 1".to_string(),
        ));
    }
    if config.history_capacity == 0 {
        return Err(CyreError::Config("history capacity must be positive".to_string()));
    }
    if config.intra_link_depth_max == 0 {
        return Err(CyreError::Config("intra-link depth must be positive".to_string()));
    }
    Ok(())
}

fn override_u64(key: &str, slot: &mut u64) -> CyreResult<()> {
    if let Ok(raw) = std::env::var(key) {
        *slot = raw
            .parse()
            .map_err(|_| CyreError::Config(format!("{} is not a valid integer: {}", key, raw)))?;
    }
    Ok(())
}

fn override_usize(key: &str, slot: &mut usize) -> CyreResult<()> {
    if let Ok(raw) = std::env::var(key) {
        *slot = raw
            .parse()
            .map_err(|_| CyreError::Config(format!("{} is not a valid integer: {}", key, raw)))?;
    }
    Ok(())
}

fn override_f64(key: &str, slot: &mut f64) -> CyreResult<()> {
    if let Ok(raw) = std::env::var(key) {
        *slot = raw
            .parse()
            .map_err(|_| CyreError::Config(format!("{} is not a valid number: {}", key, raw)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_validates() {
        let config = CyreConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "history_capacity = 7\n[breathing]\nrate_base_ms = 100\nrate_max_ms = 500"
        )
        .unwrap();

        let config = load_from_file(file.path()).unwrap();
        assert_eq!(config.history_capacity, 7);
        assert_eq!(config.breathing.rate_base_ms, 100);
        assert_eq!(config.breathing.rate_max_ms, 500);
        // untouched fields keep defaults
        assert_eq!(config.breathing.rate_min_ms, crate::constants::RATE_MIN_MS);
    }

    #[test]
    fn test_validation_rejects_inverted_thresholds() {
        let mut config = CyreConfig::default();
        config.breathing.recuperation_exit = 0.95;
        config.breathing.recuperation_enter = 0.90;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_rejects_zero_history() {
        let config = CyreConfig { history_capacity: 0, ..Default::default() };
        assert!(validate_config(&config).is_err());
    }
}
