//! Workflow step runner
//!
//! Executes an orchestration's step tree for one run: sequential by
//! default, with parallel groups, condition guards, delays, and loops.
//! Every step gets retries with exponential backoff, an optional timeout,
//! and a failure policy; the run records step history, updates aggregated
//! metrics, and applies the orchestration-level error handling and
//! monitoring hooks.

use super::{
    OrchestrationContext, OrchestrationRecord, StepKind, StepOnError, StepPayload, StepRecord,
    Targets, TriggerInfo, WorkflowStep,
};
use crate::constants::{RETRY_BACKOFF_BASE_MS, RETRY_BACKOFF_MULTIPLIER};
use crate::context::CyreInner;
use crate::timekeeper::TimeKeeper;
use crate::types::Payload;
use chrono::Utc;
use futures::future::{join_all, BoxFuture};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outcome of one orchestration run
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationRunResult {
    pub ok: bool,
    pub run_id: String,
    pub orchestration_id: String,
    pub error: Option<String>,
    pub steps: Vec<StepRecord>,
    /// Result of the last completed step
    pub payload: Option<Payload>,
}

impl OrchestrationRunResult {
    pub(super) fn not_found(id: &str) -> Self {
        Self {
            ok: false,
            run_id: String::new(),
            orchestration_id: id.to_string(),
            error: Some(format!("orchestration {} not found", id)),
            steps: Vec::new(),
            payload: None,
        }
    }
}

/// Execute one run of an orchestration
pub(super) async fn run_orchestration(
    inner: &Arc<CyreInner>,
    record: &Arc<OrchestrationRecord>,
    trigger: TriggerInfo,
) -> OrchestrationRunResult {
    let run_id = Uuid::new_v4().to_string();
    let started = std::time::Instant::now();
    record.running.store(true, Ordering::SeqCst);
    debug!(id = %record.config.id, run = %run_id, trigger = %trigger.trigger_type, "run started");

    let mut ctx = OrchestrationContext {
        orchestration_id: record.config.id.clone(),
        run_id: run_id.clone(),
        trigger,
        step_history: Vec::new(),
        variables: HashMap::new(),
        start_time: Utc::now(),
    };

    let outcome = match record.config.timeout_ms {
        Some(ms) => {
            match tokio::time::timeout(
                Duration::from_millis(ms),
                run_steps(inner, &record.config.workflow, &mut ctx),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err("orchestration run timed out".to_string()),
            }
        }
        None => run_steps(inner, &record.config.workflow, &mut ctx).await,
    };

    record.running.store(false, Ordering::SeqCst);
    *record.last_run.write() = Some(Utc::now());
    *record.step_history.write() = ctx.step_history.clone();

    let duration_ms = started.elapsed().as_millis() as u64;
    let failed = outcome.is_err();
    let metrics = {
        let mut metrics = record.metrics.write();
        metrics.runs += 1;
        metrics.last_duration_ms = duration_ms;
        metrics.avg_duration_ms = if metrics.runs == 1 {
            duration_ms
        } else {
            (metrics.avg_duration_ms * (metrics.runs - 1) + duration_ms) / metrics.runs
        };
        if failed {
            metrics.failures += 1;
            metrics.consecutive_failures += 1;
        } else {
            metrics.consecutive_failures = 0;
        }
        metrics.clone()
    };

    if let Err(cause) = &outcome {
        warn!(id = %record.config.id, run = %run_id, %cause, "run failed");
        apply_error_handling(inner, record, &ctx, cause).await;
    }
    apply_monitoring(inner, record, &metrics).await;

    match outcome {
        Ok(payload) => OrchestrationRunResult {
            ok: true,
            run_id,
            orchestration_id: record.config.id.clone(),
            error: None,
            steps: ctx.step_history,
            payload,
        },
        Err(cause) => OrchestrationRunResult {
            ok: false,
            run_id,
            orchestration_id: record.config.id.clone(),
            error: Some(cause),
            steps: ctx.step_history,
            payload: None,
        },
    }
}

/// Orchestration-level failure handling: fallback, notification channels,
/// escalation after consecutive failures
async fn apply_error_handling(
    inner: &Arc<CyreInner>,
    record: &Arc<OrchestrationRecord>,
    ctx: &OrchestrationContext,
    cause: &str,
) {
    let Some(handling) = &record.config.error_handling else {
        return;
    };

    if let Some(fallback) = &handling.fallback {
        fallback(ctx);
    }

    let failure_payload = json!({
        "orchestration": record.config.id,
        "runId": ctx.run_id,
        "error": cause,
    });
    for channel in &handling.notify {
        let _ = inner.call_with_depth(channel, failure_payload.clone(), 0).await;
    }

    if let Some(escalation) = &handling.escalation {
        let consecutive = record.metrics.read().consecutive_failures;
        if consecutive >= escalation.after {
            let _ = inner
                .call_with_depth(
                    &escalation.action,
                    json!({
                        "orchestration": record.config.id,
                        "consecutiveFailures": consecutive,
                        "error": cause,
                    }),
                    0,
                )
                .await;
        }
    }
}

/// Post-run monitoring: metric report and alert evaluation with cooldown
async fn apply_monitoring(
    inner: &Arc<CyreInner>,
    record: &Arc<OrchestrationRecord>,
    metrics: &super::OrchestrationMetrics,
) {
    let Some(monitoring) = &record.config.monitoring else {
        return;
    };

    if let Some(report_to) = &monitoring.report_to {
        let mut report = serde_json::to_value(metrics).unwrap_or(Payload::Null);
        if !monitoring.track_metrics.is_empty() {
            if let Some(all) = report.as_object() {
                let filtered: serde_json::Map<String, Payload> = all
                    .iter()
                    .filter(|(key, _)| monitoring.track_metrics.contains(key))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                report = Payload::Object(filtered);
            }
        }
        let _ = inner
            .call_with_depth(
                report_to,
                json!({"orchestration": record.config.id, "metrics": report}),
                0,
            )
            .await;
    }

    let now = inner.now_ms();
    for alert in &monitoring.alerts {
        if !(alert.predicate)(metrics) {
            continue;
        }
        {
            let mut last = record.alert_last.write();
            let previous = last.get(&alert.name).copied().unwrap_or(0);
            if previous > 0 && now.saturating_sub(previous) < alert.cooldown_ms {
                continue;
            }
            last.insert(alert.name.clone(), now);
        }
        warn!(orchestration = %record.config.id, alert = %alert.name, severity = %alert.severity, "alert fired");
        let _ = inner
            .call_with_depth(
                &alert.notify,
                json!({
                    "orchestration": record.config.id,
                    "alert": alert.name,
                    "severity": alert.severity,
                    "metrics": serde_json::to_value(metrics).unwrap_or(Payload::Null),
                }),
                0,
            )
            .await;
    }
}

/// Run a step list in order; returns the last step's result
pub(super) fn run_steps<'a>(
    inner: &'a Arc<CyreInner>,
    steps: &'a [WorkflowStep],
    ctx: &'a mut OrchestrationContext,
) -> BoxFuture<'a, Result<Option<Payload>, String>> {
    Box::pin(async move {
        let mut last = None;
        for step in steps {
            match run_step(inner, step, ctx).await {
                Ok(result) => {
                    if let (Some(key), Some(value)) = (&step.store_as, &result) {
                        ctx.variables.insert(key.clone(), value.clone());
                    }
                    last = result;
                }
                Err(cause) => match step.on_error {
                    StepOnError::Abort | StepOnError::Retry => {
                        return Err(format!("step {} failed: {}", step.name, cause));
                    }
                    StepOnError::Continue | StepOnError::Skip => {
                        debug!(step = %step.name, %cause, "step failed; continuing");
                    }
                },
            }
        }
        Ok(last)
    })
}

/// Run one step with its retry budget and timeout, recording history
async fn run_step(
    inner: &Arc<CyreInner>,
    step: &WorkflowStep,
    ctx: &mut OrchestrationContext,
) -> Result<Option<Payload>, String> {
    let started_at = Utc::now();
    let mut attempt: u32 = 0;
    let outcome = loop {
        let result = match step.timeout_ms {
            Some(ms) => {
                match tokio::time::timeout(
                    Duration::from_millis(ms),
                    execute_step(inner, step, ctx),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err("step timed out".to_string()),
                }
            }
            None => execute_step(inner, step, ctx).await,
        };

        match result {
            Ok(value) => break Ok(value),
            Err(cause) if attempt < step.retries => {
                attempt += 1;
                let backoff = (RETRY_BACKOFF_BASE_MS as f64
                    * RETRY_BACKOFF_MULTIPLIER.powi(attempt as i32 - 1))
                    as u64;
                debug!(step = %step.name, attempt, backoff, %cause, "retrying step");
                TimeKeeper::wait(backoff).await;
            }
            Err(cause) => break Err(cause),
        }
    };

    ctx.step_history.push(StepRecord {
        step_name: step.name.clone(),
        success: outcome.is_ok(),
        result: outcome.as_ref().ok().cloned().flatten(),
        error: outcome.as_ref().err().cloned(),
        started_at,
        finished_at: Utc::now(),
    });
    outcome
}

/// Execute one step body
fn execute_step<'a>(
    inner: &'a Arc<CyreInner>,
    step: &'a WorkflowStep,
    ctx: &'a mut OrchestrationContext,
) -> BoxFuture<'a, Result<Option<Payload>, String>> {
    Box::pin(async move {
        match &step.kind {
            StepKind::Action { targets, payload } => {
                let resolved_targets = match targets {
                    Targets::List(list) => list.clone(),
                    Targets::Select(select) => select(ctx),
                };
                if resolved_targets.is_empty() {
                    return Err("action step resolved no targets".to_string());
                }

                let call_payload = match payload {
                    StepPayload::FromTrigger => {
                        ctx.trigger.payload.clone().unwrap_or(Payload::Null)
                    }
                    StepPayload::Literal(value) => value.clone(),
                    StepPayload::Build(build) => build(ctx),
                };

                let mut results = Vec::with_capacity(resolved_targets.len());
                for target in &resolved_targets {
                    let response =
                        inner.call_with_depth(target, call_payload.clone(), 0).await;
                    if !response.ok {
                        return Err(response
                            .message
                            .or(response.error)
                            .unwrap_or_else(|| format!("call to {} failed", target)));
                    }
                    results.push(response.payload.unwrap_or(Payload::Null));
                }
                if results.len() == 1 {
                    Ok(results.pop())
                } else {
                    Ok(Some(Payload::Array(results)))
                }
            }

            StepKind::Condition { predicate, steps } => {
                if predicate(ctx) {
                    run_steps(inner, steps, ctx).await
                } else if step.on_error == StepOnError::Abort {
                    Err("Condition not met".to_string())
                } else {
                    // continue / skip: the guard simply gates the branch
                    Ok(None)
                }
            }

            StepKind::Parallel { steps } => {
                // each branch runs on a context clone; histories merge after
                let base_len = ctx.step_history.len();
                let branches = join_all(steps.iter().map(|nested| {
                    let mut branch_ctx = ctx.clone();
                    let nested = nested.clone();
                    let inner = Arc::clone(inner);
                    async move {
                        let outcome = run_step(&inner, &nested, &mut branch_ctx).await;
                        (outcome, branch_ctx)
                    }
                }))
                .await;

                let mut results = Vec::new();
                let mut first_error = None;
                for (outcome, branch_ctx) in branches {
                    ctx.step_history
                        .extend(branch_ctx.step_history.into_iter().skip(base_len));
                    for (key, value) in branch_ctx.variables {
                        ctx.variables.insert(key, value);
                    }
                    match outcome {
                        Ok(value) => results.push(value.unwrap_or(Payload::Null)),
                        Err(cause) => {
                            if first_error.is_none() {
                                first_error = Some(cause);
                            }
                        }
                    }
                }

                match first_error {
                    // continue preserves partial results
                    Some(_) if step.on_error == StepOnError::Continue => {
                        Ok(Some(Payload::Array(results)))
                    }
                    Some(cause) => Err(cause),
                    None => Ok(Some(Payload::Array(results))),
                }
            }

            StepKind::Sequential { steps } => run_steps(inner, steps, ctx).await,

            StepKind::Delay { duration_ms } => {
                TimeKeeper::wait(*duration_ms).await;
                Ok(None)
            }

            StepKind::Loop { steps, until, max_iterations } => {
                let cap = (*max_iterations).min(crate::constants::LOOP_MAX_ITERATIONS);
                let mut last = None;
                for _ in 0..cap {
                    last = run_steps(inner, steps, ctx).await?;
                    if until(ctx) {
                        break;
                    }
                }
                Ok(last)
            }
        }
    })
}
