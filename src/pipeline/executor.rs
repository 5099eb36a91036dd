//! Per-call pipeline execution
//!
//! Runs a channel's compiled operators in order. Each step either passes
//! the (possibly rewritten) payload to the next step, terminates the call
//! with a response, or defers it by scheduling a formation.

use crate::context::CyreInner;
use crate::pipeline::Operator;
use crate::registry::ChannelRecord;
use crate::types::{CallResult, Payload};
use tracing::debug;

/// Outcome of running the pipeline for one call
pub(crate) enum PipelineVerdict {
    /// All steps passed; dispatch with this payload
    Pass(Payload),
    /// A step ended the call (rejection, block, or deferral)
    Terminal(CallResult),
}

/// Execute the compiled pipeline. `timer_flush` marks dispatches driven by
/// a formation fire, which skip protection steps so a flush cannot
/// re-defer itself.
pub(crate) async fn run(
    inner: &CyreInner,
    channel: &ChannelRecord,
    mut payload: Payload,
    timer_flush: bool,
) -> PipelineVerdict {
    let id = channel.config.id.as_str();

    for operator in &channel.pipeline {
        if timer_flush && operator.is_protection() {
            continue;
        }
        match operator {
            Operator::RecuperationGate => {
                if !inner.breathing.admits(channel.config.priority) {
                    debug!(id, "call shed during recuperation");
                    return PipelineVerdict::Terminal(CallResult::rejected(
                        "System is recuperating; call rejected",
                    ));
                }
            }

            Operator::RepeatZeroGate => {
                return PipelineVerdict::Terminal(CallResult::accepted(
                    "not executed (repeat: 0)",
                ));
            }

            Operator::Throttle(window) => {
                let last = inner.metrics.channel(id).last_execution();
                let now = inner.now_ms();
                if last > 0 && now.saturating_sub(last) < *window {
                    let remaining = *window - now.saturating_sub(last);
                    debug!(id, remaining, "call throttled");
                    return PipelineVerdict::Terminal(CallResult::rejected(format!(
                        "Throttled: {}ms remaining",
                        remaining
                    )));
                }
            }

            Operator::Debounce { window, max_wait } => {
                let delay =
                    inner.schedule_debounce(id, payload.clone(), *window, *max_wait);
                let mut result = CallResult::accepted("debounced; execution scheduled");
                let metadata = result.metadata_mut();
                metadata.scheduled = Some(true);
                metadata.delay = Some(delay);
                metadata.buffer_window = Some(*window);
                return PipelineVerdict::Terminal(result);
            }

            Operator::Required => {
                if is_deep_empty(&payload) {
                    return PipelineVerdict::Terminal(CallResult::rejected(
                        "Payload required but missing or empty",
                    ));
                }
            }

            Operator::Schema(schema) => {
                let outcome = schema(&payload);
                if !outcome.ok {
                    return PipelineVerdict::Terminal(CallResult::rejected(format!(
                        "Schema validation failed: {}",
                        outcome.errors.join("; ")
                    )));
                }
                // permissive contract: success without data keeps the payload
                if let Some(data) = outcome.data {
                    payload = data;
                }
            }

            Operator::Selector(selector) => match selector(&payload) {
                Ok(selected) => payload = selected,
                Err(cause) => {
                    return PipelineVerdict::Terminal(operator_failure("selector", &cause));
                }
            },

            Operator::Condition(condition) => match condition(&payload) {
                Ok(true) => {}
                Ok(false) => {
                    return PipelineVerdict::Terminal(CallResult::rejected("Condition not met"));
                }
                Err(cause) => {
                    return PipelineVerdict::Terminal(operator_failure("condition", &cause));
                }
            },

            Operator::Transform(transform) => match transform(&payload) {
                Ok(transformed) => payload = transformed,
                Err(cause) => {
                    return PipelineVerdict::Terminal(operator_failure("transform", &cause));
                }
            },

            Operator::DetectChanges => {
                if inner.history.last_forwarded(id).as_ref() == Some(&payload) {
                    debug!(id, "call skipped, payload unchanged");
                    return PipelineVerdict::Terminal(CallResult::rejected("No changes detected"));
                }
            }

            Operator::Middleware(chain) => {
                for link in chain {
                    match link(payload.clone()).await {
                        Ok(next) => payload = next,
                        Err(cause) => {
                            return PipelineVerdict::Terminal(operator_failure(
                                "middleware", &cause,
                            ));
                        }
                    }
                }
            }
        }
    }

    PipelineVerdict::Pass(payload)
}

fn operator_failure(operator: &str, cause: &str) -> CallResult {
    CallResult::failed(
        format!("{} execution failed: {}", operator, cause),
        cause.to_string(),
    )
}

/// The required gate rejects null, empty strings, empty arrays, and
/// objects whose members are all themselves empty
fn is_deep_empty(payload: &Payload) -> bool {
    match payload {
        Payload::Null => true,
        Payload::String(s) => s.is_empty(),
        Payload::Array(items) => items.is_empty(),
        Payload::Object(members) => members.values().all(is_deep_empty),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deep_empty_shapes() {
        assert!(is_deep_empty(&json!(null)));
        assert!(is_deep_empty(&json!("")));
        assert!(is_deep_empty(&json!([])));
        assert!(is_deep_empty(&json!({})));
        assert!(is_deep_empty(&json!({"a": {}, "b": null})));

        assert!(!is_deep_empty(&json!(0)));
        assert!(!is_deep_empty(&json!(false)));
        assert!(!is_deep_empty(&json!("x")));
        assert!(!is_deep_empty(&json!([0])));
        assert!(!is_deep_empty(&json!({"a": 1})));
    }
}
