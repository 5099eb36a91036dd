//! Operator pipeline compilation
//!
//! Builds the fixed, ordered list of operator steps for a channel. The
//! order is load-bearing: earlier steps short-circuit later ones, so
//! protections run before validation, validation before rewrites, and
//! change detection sees the fully rewritten payload.

use crate::types::{
    ChannelConfig, ConditionFn, MiddlewareFn, Priority, Repeat, SchemaFn, SelectorFn, TransformFn,
};
use std::fmt;

/// One compiled pipeline step
pub enum Operator {
    /// Sheds low-priority work while the system recuperates
    RecuperationGate,
    /// `repeat: 0` channels never dispatch
    RepeatZeroGate,
    Throttle(u64),
    Debounce { window: u64, max_wait: Option<u64> },
    Required,
    Schema(SchemaFn),
    Selector(SelectorFn),
    Condition(ConditionFn),
    Transform(TransformFn),
    DetectChanges,
    Middleware(Vec<MiddlewareFn>),
}

impl Operator {
    /// Protection steps are skipped when a formation flushes a dispatch
    pub fn is_protection(&self) -> bool {
        matches!(
            self,
            Operator::RecuperationGate
                | Operator::Throttle(_)
                | Operator::Debounce { .. }
        )
    }
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operator::RecuperationGate => "RecuperationGate",
            Operator::RepeatZeroGate => "RepeatZeroGate",
            Operator::Throttle(_) => "Throttle",
            Operator::Debounce { .. } => "Debounce",
            Operator::Required => "Required",
            Operator::Schema(_) => "Schema",
            Operator::Selector(_) => "Selector",
            Operator::Condition(_) => "Condition",
            Operator::Transform(_) => "Transform",
            Operator::DetectChanges => "DetectChanges",
            Operator::Middleware(_) => "Middleware",
        };
        f.write_str(name)
    }
}

/// Validate a channel config against the registration rejection table
pub fn validate(config: &ChannelConfig) -> Result<(), String> {
    if config.id.is_empty() {
        return Err("channel id must not be empty".to_string());
    }
    if config.block {
        return Err("blocked channels cannot be registered".to_string());
    }
    if config.throttle.is_some() && config.debounce.is_some() {
        return Err("throttle and debounce are mutually exclusive".to_string());
    }
    if config.max_wait.is_some() && config.debounce.is_none() {
        return Err("maxWait requires debounce".to_string());
    }
    if let (Some(max_wait), Some(debounce)) = (config.max_wait, config.debounce) {
        if max_wait <= debounce {
            return Err(format!(
                "maxWait ({}) must exceed debounce ({})",
                max_wait, debounce
            ));
        }
    }
    Ok(())
}

/// A channel is fast-path when no protection, processing, timing, or
/// non-default priority is configured; such calls bypass the pipeline
pub fn has_fast_path(config: &ChannelConfig) -> bool {
    config.throttle.is_none()
        && config.debounce.is_none()
        && config.max_wait.is_none()
        && !config.detect_changes
        && config.schema.is_none()
        && !config.required
        && config.condition.is_none()
        && config.selector.is_none()
        && config.transform.is_none()
        && config.middleware.is_empty()
        && config.delay.is_none()
        && config.interval.is_none()
        && config.repeat.is_none()
        && config.priority == Priority::Medium
}

/// Compile the ordered operator list for a channel
pub fn compile(config: &ChannelConfig) -> Vec<Operator> {
    let mut pipeline = Vec::new();

    if config.priority != Priority::Critical {
        pipeline.push(Operator::RecuperationGate);
    }
    if config.repeat == Some(Repeat::Times(0)) {
        pipeline.push(Operator::RepeatZeroGate);
    }
    if let Some(throttle) = config.throttle {
        pipeline.push(Operator::Throttle(throttle));
    }
    if let Some(window) = config.debounce {
        pipeline.push(Operator::Debounce { window, max_wait: config.max_wait });
    }
    if config.required {
        pipeline.push(Operator::Required);
    }
    if let Some(schema) = &config.schema {
        pipeline.push(Operator::Schema(schema.clone()));
    }
    if let Some(selector) = &config.selector {
        pipeline.push(Operator::Selector(selector.clone()));
    }
    if let Some(condition) = &config.condition {
        pipeline.push(Operator::Condition(condition.clone()));
    }
    if let Some(transform) = &config.transform {
        pipeline.push(Operator::Transform(transform.clone()));
    }
    if config.detect_changes {
        pipeline.push(Operator::DetectChanges);
    }
    if !config.middleware.is_empty() {
        pipeline.push(Operator::Middleware(config.middleware.clone()));
    }

    pipeline
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SchemaResult;

    #[test]
    fn test_rejection_table() {
        assert!(validate(&ChannelConfig::new("")).is_err());
        assert!(validate(&ChannelConfig::new("b").with_block()).is_err());
        assert!(validate(&ChannelConfig::new("td").with_throttle(10).with_debounce(10)).is_err());
        assert!(validate(&ChannelConfig::new("mw").with_max_wait(100)).is_err());
        assert!(
            validate(&ChannelConfig::new("mw2").with_debounce(200).with_max_wait(200)).is_err()
        );
        assert!(validate(&ChannelConfig::new("ok").with_debounce(200).with_max_wait(500)).is_ok());
        assert!(validate(&ChannelConfig::new("plain")).is_ok());
    }

    #[test]
    fn test_fast_path_detection() {
        assert!(has_fast_path(&ChannelConfig::new("plain")));
        assert!(!has_fast_path(&ChannelConfig::new("t").with_throttle(10)));
        assert!(!has_fast_path(&ChannelConfig::new("d").with_delay(10)));
        assert!(!has_fast_path(&ChannelConfig::new("r").with_repeat(Repeat::Times(2))));
        assert!(!has_fast_path(&ChannelConfig::new("p").with_priority(Priority::High)));
        assert!(!has_fast_path(&ChannelConfig::new("c").with_detect_changes()));
        assert!(!has_fast_path(
            &ChannelConfig::new("s").with_schema(|_| SchemaResult::pass())
        ));
    }

    #[test]
    fn test_operator_order_is_fixed() {
        let config = ChannelConfig::new("full")
            .with_throttle(100)
            .with_required()
            .with_schema(|_| SchemaResult::pass())
            .with_selector(|p| Ok(p.clone()))
            .with_condition(|_| Ok(true))
            .with_transform(|p| Ok(p.clone()))
            .with_detect_changes();

        let names: Vec<String> =
            compile(&config).iter().map(|op| format!("{:?}", op)).collect();
        assert_eq!(
            names,
            vec![
                "RecuperationGate",
                "Throttle",
                "Required",
                "Schema",
                "Selector",
                "Condition",
                "Transform",
                "DetectChanges"
            ]
        );
    }

    #[test]
    fn test_critical_priority_skips_recuperation_gate() {
        let config = ChannelConfig::new("crit")
            .with_priority(Priority::Critical)
            .with_throttle(100);
        let pipeline = compile(&config);
        assert!(!pipeline.iter().any(|op| matches!(op, Operator::RecuperationGate)));
    }

    #[test]
    fn test_repeat_zero_gate_present() {
        let config = ChannelConfig::new("z").with_repeat(Repeat::Times(0));
        let pipeline = compile(&config);
        assert!(pipeline.iter().any(|op| matches!(op, Operator::RepeatZeroGate)));
    }
}
