//! Orchestration engine: triggers, workflows, lifecycle
//!
//! An orchestration is a named composition of channels. Triggers start a
//! run (channel calls, timers, condition polls, or explicit external
//! calls); the workflow is an ordered tree of steps executed by the
//! runner. Registration and activation are separate: `keep` stores the
//! config, `activate` wires the triggers.

mod runner;

pub use runner::OrchestrationRunResult;

use crate::context::CyreInner;
use crate::timekeeper::BreathingAdaptation;
use crate::types::{handler, Payload, Priority, RegisterResult, Repeat};
use chrono::{DateTime, Timelike, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Predicate over the run context
pub type OrchestrationPredicate = Arc<dyn Fn(&OrchestrationContext) -> bool + Send + Sync>;

/// Target selector for action steps
pub type TargetSelector = Arc<dyn Fn(&OrchestrationContext) -> Vec<String> + Send + Sync>;

/// Payload builder for action steps
pub type PayloadBuilder = Arc<dyn Fn(&OrchestrationContext) -> Payload + Send + Sync>;

/// Fallback invoked when a run fails
pub type FallbackFn = Arc<dyn Fn(&OrchestrationContext) + Send + Sync>;

/// Alert predicate over aggregated run metrics
pub type AlertPredicate = Arc<dyn Fn(&OrchestrationMetrics) -> bool + Send + Sync>;

/// Health-check probe
pub type HealthProbe = Arc<dyn Fn() -> bool + Send + Sync>;

/// What starts a run
#[derive(Clone)]
pub enum Trigger {
    /// Calls on any of these channels invoke the orchestration
    Channel {
        name: String,
        channels: Vec<String>,
        throttle_ms: Option<u64>,
        debounce_ms: Option<u64>,
    },
    /// Timer-driven runs
    Time { name: String, schedule: TimeSchedule, repeat: Repeat },
    /// Predicate polled on the breathing cadence
    Condition {
        name: String,
        predicate: OrchestrationPredicate,
        debounce_ms: Option<u64>,
    },
    /// Only `orchestration().call(id, payload)` starts a run
    External { name: String },
}

/// Time-trigger schedules
#[derive(Debug, Clone)]
pub enum TimeSchedule {
    /// Fixed interval in milliseconds
    Every(u64),
    /// Daily at a wall-clock time
    Daily { hour: u32, minute: u32 },
    /// Five-field cron expression; only the `"m h * * *"` daily form is
    /// accepted
    Cron(String),
}

impl TimeSchedule {
    /// Interval and first-fire offset in milliseconds from now
    fn cadence(&self) -> Result<(u64, u64), String> {
        match self {
            TimeSchedule::Every(ms) => {
                if *ms == 0 {
                    return Err("time trigger interval must be positive".to_string());
                }
                Ok((*ms, *ms))
            }
            TimeSchedule::Daily { hour, minute } => {
                if *hour > 23 || *minute > 59 {
                    return Err(format!("invalid daily time {:02}:{:02}", hour, minute));
                }
                Ok((86_400_000, ms_until_daily(*hour, *minute, Utc::now())))
            }
            TimeSchedule::Cron(expr) => {
                let (hour, minute) = parse_daily_cron(expr)?;
                Ok((86_400_000, ms_until_daily(hour, minute, Utc::now())))
            }
        }
    }
}

/// Milliseconds from `now` until the next daily `HH:MM`
fn ms_until_daily(hour: u32, minute: u32, now: DateTime<Utc>) -> u64 {
    let target_secs = i64::from(hour) * 3600 + i64::from(minute) * 60;
    let now_secs = i64::from(now.time().num_seconds_from_midnight());
    let mut delta = target_secs - now_secs;
    if delta <= 0 {
        delta += 86_400;
    }
    (delta as u64) * 1000
}

/// Accepts `"m h * * *"`; anything else is rejected at registration
fn parse_daily_cron(expr: &str) -> Result<(u32, u32), String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 || fields[2] != "*" || fields[3] != "*" || fields[4] != "*" {
        return Err(format!("unsupported cron expression: {}", expr));
    }
    let minute: u32 = fields[0]
        .parse()
        .map_err(|_| format!("invalid cron minute: {}", fields[0]))?;
    let hour: u32 = fields[1]
        .parse()
        .map_err(|_| format!("invalid cron hour: {}", fields[1]))?;
    if minute > 59 || hour > 23 {
        return Err(format!("cron time out of range: {}", expr));
    }
    Ok((hour, minute))
}

/// Action-step targets: a fixed list or a context-driven selection
#[derive(Clone)]
pub enum Targets {
    List(Vec<String>),
    Select(TargetSelector),
}

impl From<&str> for Targets {
    fn from(id: &str) -> Self {
        Targets::List(vec![id.to_string()])
    }
}

/// Action-step payload source
#[derive(Clone, Default)]
pub enum StepPayload {
    /// Forward the triggering payload
    #[default]
    FromTrigger,
    Literal(Payload),
    Build(PayloadBuilder),
}

/// Per-step failure policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepOnError {
    #[default]
    Abort,
    Retry,
    Continue,
    /// For condition steps: a not-met condition is skipped silently
    Skip,
}

/// One workflow step
#[derive(Clone)]
pub struct WorkflowStep {
    pub name: String,
    pub kind: StepKind,
    /// Retries with exponential backoff before the failure policy applies
    pub retries: u32,
    pub timeout_ms: Option<u64>,
    pub on_error: StepOnError,
    /// Store the step result in the run's variables bag under this key
    pub store_as: Option<String>,
}

impl WorkflowStep {
    pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            kind,
            retries: 0,
            timeout_ms: None,
            on_error: StepOnError::Abort,
            store_as: None,
        }
    }

    pub fn action(name: impl Into<String>, targets: Targets, payload: StepPayload) -> Self {
        Self::new(name, StepKind::Action { targets, payload })
    }

    pub fn delay(name: impl Into<String>, duration_ms: u64) -> Self {
        Self::new(name, StepKind::Delay { duration_ms })
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_timeout(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub fn with_on_error(mut self, policy: StepOnError) -> Self {
        self.on_error = policy;
        self
    }

    pub fn storing(mut self, key: impl Into<String>) -> Self {
        self.store_as = Some(key.into());
        self
    }
}

impl fmt::Debug for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowStep")
            .field("name", &self.name)
            .field("retries", &self.retries)
            .field("on_error", &self.on_error)
            .finish()
    }
}

/// Step kinds
#[derive(Clone)]
pub enum StepKind {
    Action { targets: Targets, payload: StepPayload },
    Condition { predicate: OrchestrationPredicate, steps: Vec<WorkflowStep> },
    Parallel { steps: Vec<WorkflowStep> },
    Sequential { steps: Vec<WorkflowStep> },
    Delay { duration_ms: u64 },
    Loop { steps: Vec<WorkflowStep>, until: OrchestrationPredicate, max_iterations: u64 },
}

/// Orchestration-level failure handling
#[derive(Clone, Default)]
pub struct ErrorHandling {
    pub fallback: Option<FallbackFn>,
    /// Channels notified with the failure payload
    pub notify: Vec<String>,
    pub escalation: Option<Escalation>,
}

/// Escalation after consecutive failures
#[derive(Debug, Clone)]
pub struct Escalation {
    pub after: u64,
    /// Channel called when the threshold is crossed
    pub action: String,
}

/// Monitoring configuration
#[derive(Clone, Default)]
pub struct Monitoring {
    pub track_metrics: Vec<String>,
    /// Channel receiving a metrics payload after every run
    pub report_to: Option<String>,
    pub alerts: Vec<Alert>,
    pub health_checks: Vec<HealthCheck>,
}

/// Metric alert with cooldown
#[derive(Clone)]
pub struct Alert {
    pub name: String,
    pub predicate: AlertPredicate,
    pub cooldown_ms: u64,
    pub severity: String,
    /// Channel called when the alert fires
    pub notify: String,
}

/// Periodic health probe
#[derive(Clone)]
pub struct HealthCheck {
    pub name: String,
    pub interval_ms: u64,
    pub timeout_ms: Option<u64>,
    pub condition: HealthProbe,
    /// Channel called when the probe fails
    pub on_failure: Option<String>,
}

/// Orchestration configuration submitted to `keep`
#[derive(Clone, Default)]
pub struct OrchestrationConfig {
    pub id: String,
    pub triggers: Vec<Trigger>,
    pub workflow: Vec<WorkflowStep>,
    pub error_handling: Option<ErrorHandling>,
    pub monitoring: Option<Monitoring>,
    pub priority: Priority,
    /// Deadline for a whole run
    pub timeout_ms: Option<u64>,
}

impl OrchestrationConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Default::default() }
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.workflow.push(step);
        self
    }

    pub fn with_error_handling(mut self, handling: ErrorHandling) -> Self {
        self.error_handling = Some(handling);
        self
    }

    pub fn with_monitoring(mut self, monitoring: Monitoring) -> Self {
        self.monitoring = Some(monitoring);
        self
    }

    pub fn with_timeout(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }
}

/// What started a run
#[derive(Debug, Clone, Serialize)]
pub struct TriggerInfo {
    pub trigger_type: String,
    pub name: String,
    pub payload: Option<Payload>,
}

impl TriggerInfo {
    pub fn external(payload: Option<Payload>) -> Self {
        Self { trigger_type: "external".to_string(), name: "external".to_string(), payload }
    }
}

/// One step's outcome in the run history
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step_name: String,
    pub success: bool,
    pub result: Option<Payload>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Per-run context threaded through step functions
#[derive(Debug, Clone)]
pub struct OrchestrationContext {
    pub orchestration_id: String,
    pub run_id: String,
    pub trigger: TriggerInfo,
    pub step_history: Vec<StepRecord>,
    /// Mutable per-run bag; action steps write via `store_as`
    pub variables: HashMap<String, Payload>,
    pub start_time: DateTime<Utc>,
}

/// Aggregated run metrics for alerts and reporting
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrchestrationMetrics {
    pub runs: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
    pub last_duration_ms: u64,
    pub avg_duration_ms: u64,
}

/// Live orchestration state
pub struct OrchestrationRecord {
    pub config: OrchestrationConfig,
    pub enabled: AtomicBool,
    pub running: AtomicBool,
    pub metrics: RwLock<OrchestrationMetrics>,
    pub last_run: RwLock<Option<DateTime<Utc>>>,
    pub step_history: RwLock<Vec<StepRecord>>,
    trigger_handles: RwLock<Vec<TriggerHandle>>,
    trigger_last: RwLock<HashMap<String, u64>>,
    alert_last: RwLock<HashMap<String, u64>>,
}

enum TriggerHandle {
    Handler { channel: String, handler_id: u64 },
    Formation(String),
}

/// Registry snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SystemOverview {
    pub total: usize,
    pub enabled: usize,
    pub running: usize,
    pub orchestrations: Vec<OrchestrationSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationSummary {
    pub id: String,
    pub enabled: bool,
    pub running: bool,
    pub metrics: OrchestrationMetrics,
    pub last_run: Option<DateTime<Utc>>,
}

/// Public orchestration surface, obtained from `Cyre::orchestration`
pub struct OrchestrationApi {
    pub(crate) inner: Arc<CyreInner>,
}

impl OrchestrationApi {
    /// Register an orchestration; triggers stay cold until `activate`
    pub fn keep(&self, config: OrchestrationConfig) -> RegisterResult {
        if config.id.is_empty() {
            return RegisterResult::rejected("orchestration id must not be empty");
        }
        for trigger in &config.triggers {
            if let Trigger::Time { schedule, .. } = trigger {
                if let Err(cause) = schedule.cadence() {
                    return RegisterResult::rejected(cause);
                }
            }
        }

        let id = config.id.clone();
        let record = Arc::new(OrchestrationRecord {
            config,
            enabled: AtomicBool::new(false),
            running: AtomicBool::new(false),
            metrics: RwLock::new(OrchestrationMetrics::default()),
            last_run: RwLock::new(None),
            step_history: RwLock::new(Vec::new()),
            trigger_handles: RwLock::new(Vec::new()),
            trigger_last: RwLock::new(HashMap::new()),
            alert_last: RwLock::new(HashMap::new()),
        });
        self.inner.orchestrations.insert(id.clone(), record);
        RegisterResult::ok(format!("orchestration {} registered", id))
    }

    /// Enable or disable an orchestration's triggers
    pub fn activate(&self, id: &str, enabled: bool) -> RegisterResult {
        let Some(record) = self.inner.orchestrations.get(id).map(|r| r.clone()) else {
            return RegisterResult::rejected(format!("orchestration {} not found", id));
        };

        let was_enabled = record.enabled.swap(enabled, Ordering::SeqCst);
        if enabled && !was_enabled {
            self.wire_triggers(&record);
            RegisterResult::ok(format!("orchestration {} activated", id))
        } else if !enabled && was_enabled {
            self.unwire_triggers(&record);
            RegisterResult::ok(format!("orchestration {} deactivated", id))
        } else {
            RegisterResult::ok(format!("orchestration {} unchanged", id))
        }
    }

    /// Run an orchestration once, externally
    pub async fn call(&self, id: &str, payload: Option<Payload>) -> OrchestrationRunResult {
        let Some(record) = self.inner.orchestrations.get(id).map(|r| r.clone()) else {
            return OrchestrationRunResult::not_found(id);
        };
        runner::run_orchestration(&self.inner, &record, TriggerInfo::external(payload)).await
    }

    /// Remove an orchestration, unwiring its triggers first
    pub fn forget(&self, id: &str) -> bool {
        if let Some(record) = self.inner.orchestrations.get(id).map(|r| r.clone()) {
            self.unwire_triggers(&record);
        }
        self.inner.orchestrations.remove(id).is_some()
    }

    /// Snapshot of every registered orchestration
    pub fn get_system_overview(&self) -> SystemOverview {
        let orchestrations: Vec<OrchestrationSummary> = self
            .inner
            .orchestrations
            .iter()
            .map(|entry| {
                let record = entry.value();
                OrchestrationSummary {
                    id: record.config.id.clone(),
                    enabled: record.enabled.load(Ordering::Relaxed),
                    running: record.running.load(Ordering::Relaxed),
                    metrics: record.metrics.read().clone(),
                    last_run: *record.last_run.read(),
                }
            })
            .collect();
        SystemOverview {
            total: orchestrations.len(),
            enabled: orchestrations.iter().filter(|o| o.enabled).count(),
            running: orchestrations.iter().filter(|o| o.running).count(),
            orchestrations,
        }
    }

    fn wire_triggers(&self, record: &Arc<OrchestrationRecord>) {
        let mut handles = record.trigger_handles.write();
        for trigger in &record.config.triggers {
            match trigger {
                Trigger::Channel { name, channels, throttle_ms, debounce_ms } => {
                    for channel in channels {
                        let handler_id = self.inner.registry.add_handler(
                            channel,
                            channel_trigger_handler(
                                &self.inner,
                                record,
                                name.clone(),
                                *throttle_ms,
                                *debounce_ms,
                            ),
                        );
                        handles.push(TriggerHandle::Handler {
                            channel: channel.clone(),
                            handler_id,
                        });
                    }
                }
                Trigger::Time { name, schedule, repeat } => {
                    let Ok((interval, initial)) = schedule.cadence() else {
                        continue;
                    };
                    let formation_id =
                        format!("orchestration:{}:time:{}", record.config.id, name);
                    let callback = run_trigger_callback(
                        &self.inner,
                        record,
                        TriggerInfo {
                            trigger_type: "time".to_string(),
                            name: name.clone(),
                            payload: None,
                        },
                    );
                    if self
                        .inner
                        .timekeeper
                        .keep_with_initial(
                            initial,
                            interval,
                            *repeat,
                            &formation_id,
                            callback,
                            Some(BreathingAdaptation::default()),
                            record.config.priority,
                        )
                        .is_ok()
                    {
                        handles.push(TriggerHandle::Formation(formation_id));
                    }
                }
                Trigger::Condition { name, predicate, debounce_ms } => {
                    let formation_id =
                        format!("orchestration:{}:condition:{}", record.config.id, name);
                    let callback = condition_trigger_callback(
                        &self.inner,
                        record,
                        name.clone(),
                        predicate.clone(),
                        debounce_ms.unwrap_or(0),
                    );
                    let poll = self.inner.config.breathing.rate_base_ms;
                    if self
                        .inner
                        .timekeeper
                        .keep_with_initial(
                            poll,
                            poll,
                            Repeat::Forever,
                            &formation_id,
                            callback,
                            Some(BreathingAdaptation::default()),
                            record.config.priority,
                        )
                        .is_ok()
                    {
                        handles.push(TriggerHandle::Formation(formation_id));
                    }
                }
                Trigger::External { .. } => {}
            }
        }

        if let Some(monitoring) = &record.config.monitoring {
            for check in &monitoring.health_checks {
                let formation_id =
                    format!("orchestration:{}:health:{}", record.config.id, check.name);
                let callback = health_check_callback(&self.inner, check.clone());
                if self
                    .inner
                    .timekeeper
                    .keep_with_initial(
                        check.interval_ms,
                        check.interval_ms,
                        Repeat::Forever,
                        &formation_id,
                        callback,
                        None,
                        Priority::High,
                    )
                    .is_ok()
                {
                    handles.push(TriggerHandle::Formation(formation_id));
                }
            }
        }
        debug!(id = %record.config.id, triggers = handles.len(), "orchestration wired");
    }

    fn unwire_triggers(&self, record: &Arc<OrchestrationRecord>) {
        let mut handles = record.trigger_handles.write();
        for handle in handles.drain(..) {
            match handle {
                TriggerHandle::Handler { channel, handler_id } => {
                    self.inner.registry.remove_handler(&channel, handler_id);
                }
                TriggerHandle::Formation(id) => {
                    self.inner.timekeeper.forget(&id);
                }
            }
        }
    }
}

/// Spawn a run when one of the trigger channels is called, honouring the
/// trigger-local throttle and debounce windows
fn channel_trigger_handler(
    inner: &Arc<CyreInner>,
    record: &Arc<OrchestrationRecord>,
    trigger_name: String,
    throttle_ms: Option<u64>,
    debounce_ms: Option<u64>,
) -> crate::types::HandlerFn {
    let weak_inner = Arc::downgrade(inner);
    let weak_record = Arc::downgrade(record);
    handler(move |payload| {
        let Some(inner) = weak_inner.upgrade() else {
            return Ok(Payload::Null);
        };
        let Some(record) = weak_record.upgrade() else {
            return Ok(Payload::Null);
        };
        if !record.enabled.load(Ordering::Relaxed) {
            return Ok(Payload::Null);
        }

        let now = inner.now_ms();
        if let Some(throttle) = throttle_ms {
            let mut last = record.trigger_last.write();
            let previous = last.get(&trigger_name).copied().unwrap_or(0);
            if previous > 0 && now.saturating_sub(previous) < throttle {
                return Ok(Payload::Null);
            }
            last.insert(trigger_name.clone(), now);
        }

        let info = TriggerInfo {
            trigger_type: "channel".to_string(),
            name: trigger_name.clone(),
            payload: Some(payload),
        };

        match debounce_ms {
            Some(window) if window > 0 => {
                let formation_id =
                    format!("orchestration:{}:debounce:{}", record.config.id, trigger_name);
                let callback = run_trigger_callback(&inner, &record, info);
                inner.timekeeper.keep_debounce(&formation_id, window, None, callback);
            }
            _ => {
                let callback = run_trigger_callback(&inner, &record, info);
                tokio::spawn(async move {
                    let _ = callback().await;
                });
            }
        }
        Ok(Payload::Null)
    })
}

/// Formation callback that runs the orchestration with the given trigger
fn run_trigger_callback(
    inner: &Arc<CyreInner>,
    record: &Arc<OrchestrationRecord>,
    info: TriggerInfo,
) -> crate::timekeeper::TimerCallback {
    let weak_inner = Arc::downgrade(inner);
    let weak_record = Arc::downgrade(record);
    Arc::new(move || {
        let weak_inner = weak_inner.clone();
        let weak_record = weak_record.clone();
        let info = info.clone();
        Box::pin(async move {
            let (Some(inner), Some(record)) = (weak_inner.upgrade(), weak_record.upgrade())
            else {
                return Ok(());
            };
            if !record.enabled.load(Ordering::Relaxed) {
                return Ok(());
            }
            let result = runner::run_orchestration(&inner, &record, info).await;
            if result.ok {
                Ok(())
            } else {
                Err(result.error.unwrap_or_else(|| "orchestration run failed".to_string()))
            }
        })
    })
}

/// Poll callback for condition triggers; fires a run when the predicate
/// turns true and the debounce gap has elapsed
fn condition_trigger_callback(
    inner: &Arc<CyreInner>,
    record: &Arc<OrchestrationRecord>,
    trigger_name: String,
    predicate: OrchestrationPredicate,
    debounce_ms: u64,
) -> crate::timekeeper::TimerCallback {
    let weak_inner = Arc::downgrade(inner);
    let weak_record = Arc::downgrade(record);
    Arc::new(move || {
        let weak_inner = weak_inner.clone();
        let weak_record = weak_record.clone();
        let trigger_name = trigger_name.clone();
        let predicate = predicate.clone();
        Box::pin(async move {
            let (Some(inner), Some(record)) = (weak_inner.upgrade(), weak_record.upgrade())
            else {
                return Ok(());
            };
            if !record.enabled.load(Ordering::Relaxed) {
                return Ok(());
            }

            let probe_ctx = OrchestrationContext {
                orchestration_id: record.config.id.clone(),
                run_id: String::new(),
                trigger: TriggerInfo {
                    trigger_type: "condition".to_string(),
                    name: trigger_name.clone(),
                    payload: None,
                },
                step_history: Vec::new(),
                variables: HashMap::new(),
                start_time: Utc::now(),
            };
            if !predicate(&probe_ctx) {
                return Ok(());
            }

            let now = inner.now_ms();
            {
                let mut last = record.trigger_last.write();
                let key = format!("condition:{}", trigger_name);
                let previous = last.get(&key).copied().unwrap_or(0);
                if previous > 0 && now.saturating_sub(previous) < debounce_ms {
                    return Ok(());
                }
                last.insert(key, now);
            }

            let _ = runner::run_orchestration(&inner, &record, probe_ctx.trigger).await;
            Ok(())
        })
    })
}

/// Health-check callback; a failed or timed-out probe calls the failure
/// channel
fn health_check_callback(
    inner: &Arc<CyreInner>,
    check: HealthCheck,
) -> crate::timekeeper::TimerCallback {
    let weak_inner = Arc::downgrade(inner);
    Arc::new(move || {
        let weak_inner = weak_inner.clone();
        let check = check.clone();
        Box::pin(async move {
            let Some(inner) = weak_inner.upgrade() else {
                return Ok(());
            };
            let probe = check.condition.clone();
            let probe_task = tokio::task::spawn_blocking(move || probe());
            let healthy = match check.timeout_ms {
                Some(ms) => {
                    match tokio::time::timeout(std::time::Duration::from_millis(ms), probe_task)
                        .await
                    {
                        Ok(Ok(result)) => result,
                        _ => false,
                    }
                }
                None => probe_task.await.unwrap_or(false),
            };

            if !healthy {
                warn!(check = %check.name, "health check failed");
                if let Some(target) = &check.on_failure {
                    let payload = serde_json::json!({
                        "healthCheck": check.name,
                        "healthy": false,
                    });
                    let _ = inner.call_with_depth(target, payload, 0).await;
                }
            }
            Ok(())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_daily_cron_accepts_daily_form() {
        assert_eq!(parse_daily_cron("30 6 * * *").unwrap(), (6, 30));
        assert!(parse_daily_cron("*/5 * * * *").is_err());
        assert!(parse_daily_cron("0 0 1 * *").is_err());
        assert!(parse_daily_cron("61 6 * * *").is_err());
    }

    #[test]
    fn test_ms_until_daily_wraps_to_tomorrow() {
        let now = Utc::now();
        let later = ms_until_daily(now.hour(), now.minute(), now);
        // same minute targets tomorrow, minus the seconds already elapsed
        assert!(later <= 86_400_000);
        assert!(later > 86_400_000 - 60_000);
    }

    #[test]
    fn test_time_schedule_cadence() {
        assert!(matches!(TimeSchedule::Every(5000).cadence(), Ok((5000, 5000))));
        assert!(TimeSchedule::Every(0).cadence().is_err());
        assert!(TimeSchedule::Daily { hour: 25, minute: 0 }.cadence().is_err());
        let (interval, _) = TimeSchedule::Cron("0 12 * * *".to_string()).cadence().unwrap();
        assert_eq!(interval, 86_400_000);
    }
}
