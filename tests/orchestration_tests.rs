//! Orchestration engine tests
//!
//! Workflows composed of real channels:
//! - External calls run the workflow and record step history
//! - Channel triggers start runs once activated, and stop when disabled
//! - Condition steps gate nested steps
//! - Parallel steps run branches concurrently
//! - Loop steps repeat until their terminating condition
//! - Retries recover from transient handler failures
//! - Variables flow between steps via store_as and payload builders

use cyre::orchestration::{StepOnError, StepPayload, Targets, Trigger};
use cyre::{handler, ChannelConfig, Cyre, OrchestrationConfig, Payload, StepKind, WorkflowStep};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn recording(log: Arc<Mutex<Vec<Payload>>>) -> cyre::HandlerFn {
    handler(move |payload| {
        log.lock().unwrap().push(payload.clone());
        Ok(payload)
    })
}

#[tokio::test]
async fn test_external_call_runs_workflow() {
    // Arrange: one action step targeting one channel
    let cyre = Cyre::new();
    cyre.init();
    cyre.action(ChannelConfig::new("worker"));
    let log = Arc::new(Mutex::new(Vec::new()));
    cyre.on("worker", recording(Arc::clone(&log)));

    let orchestration = cyre.orchestration();
    let kept = orchestration.keep(
        OrchestrationConfig::new("job")
            .with_step(WorkflowStep::action("notify", Targets::from("worker"), StepPayload::FromTrigger)),
    );
    assert!(kept.ok);

    // Act
    let result = orchestration.call("job", Some(json!({"task": 42}))).await;

    // Assert
    assert!(result.ok, "error: {:?}", result.error);
    assert_eq!(*log.lock().unwrap(), vec![json!({"task": 42})]);
    assert_eq!(result.steps.len(), 1);
    assert!(result.steps[0].success);
    assert_eq!(result.steps[0].step_name, "notify");
}

#[tokio::test]
async fn test_channel_trigger_requires_activation() {
    let cyre = Cyre::new();
    cyre.init();
    cyre.action(ChannelConfig::new("source"));
    cyre.action(ChannelConfig::new("sink"));
    cyre.on("source", handler(|p| Ok(p)));
    let log = Arc::new(Mutex::new(Vec::new()));
    cyre.on("sink", recording(Arc::clone(&log)));

    let orchestration = cyre.orchestration();
    orchestration.keep(
        OrchestrationConfig::new("relay")
            .with_trigger(Trigger::Channel {
                name: "on-source".to_string(),
                channels: vec!["source".to_string()],
                throttle_ms: None,
                debounce_ms: None,
            })
            .with_step(WorkflowStep::action("forward", Targets::from("sink"), StepPayload::FromTrigger)),
    );

    // not yet activated: the trigger is cold
    let _ = cyre.call("source", json!({"n": 1})).await;
    Cyre::wait(80).await;
    assert!(log.lock().unwrap().is_empty());

    // Act: activate, trigger again
    assert!(orchestration.activate("relay", true).ok);
    let _ = cyre.call("source", json!({"n": 2})).await;
    Cyre::wait(150).await;

    // Assert: exactly the post-activation call was forwarded
    assert_eq!(*log.lock().unwrap(), vec![json!({"n": 2})]);

    // deactivate: triggers go cold again
    orchestration.activate("relay", false);
    let _ = cyre.call("source", json!({"n": 3})).await;
    Cyre::wait(150).await;
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_condition_step_gates_nested_steps() {
    let cyre = Cyre::new();
    cyre.init();
    cyre.action(ChannelConfig::new("guarded"));
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_clone = Arc::clone(&counter);
    cyre.on(
        "guarded",
        handler(move |p| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            Ok(p)
        }),
    );

    let orchestration = cyre.orchestration();
    orchestration.keep(
        OrchestrationConfig::new("conditional").with_step(
            WorkflowStep::new(
                "when-large",
                StepKind::Condition {
                    predicate: Arc::new(|ctx| {
                        ctx.trigger
                            .payload
                            .as_ref()
                            .and_then(|p| p["size"].as_i64())
                            .map(|size| size > 10)
                            .unwrap_or(false)
                    }),
                    steps: vec![WorkflowStep::action(
                        "process",
                        Targets::from("guarded"),
                        StepPayload::FromTrigger,
                    )],
                },
            )
            .with_on_error(StepOnError::Skip),
        ),
    );

    // small payload: condition not met, run still succeeds under Skip
    let small = orchestration.call("conditional", Some(json!({"size": 3}))).await;
    assert!(small.ok);
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    let large = orchestration.call("conditional", Some(json!({"size": 50}))).await;
    assert!(large.ok);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_condition_step_abort_fails_the_run() {
    let cyre = Cyre::new();
    cyre.init();

    let orchestration = cyre.orchestration();
    orchestration.keep(
        OrchestrationConfig::new("strict").with_step(WorkflowStep::new(
            "must-hold",
            StepKind::Condition {
                predicate: Arc::new(|_| false),
                steps: vec![],
            },
        )),
    );

    let result = orchestration.call("strict", None).await;
    assert!(!result.ok);
    assert!(result.error.unwrap().contains("Condition not met"));
}

#[tokio::test]
async fn test_parallel_step_runs_branches() {
    let cyre = Cyre::new();
    cyre.init();
    cyre.action(ChannelConfig::new("left"));
    cyre.action(ChannelConfig::new("right"));
    let log = Arc::new(Mutex::new(Vec::new()));
    cyre.on("left", recording(Arc::clone(&log)));
    cyre.on("right", recording(Arc::clone(&log)));

    let orchestration = cyre.orchestration();
    orchestration.keep(
        OrchestrationConfig::new("fan").with_step(WorkflowStep::new(
            "both",
            StepKind::Parallel {
                steps: vec![
                    WorkflowStep::action("go-left", Targets::from("left"), StepPayload::Literal(json!("L"))),
                    WorkflowStep::action("go-right", Targets::from("right"), StepPayload::Literal(json!("R"))),
                ],
            },
        )),
    );

    let result = orchestration.call("fan", None).await;
    assert!(result.ok);

    let mut seen = log.lock().unwrap().clone();
    seen.sort_by_key(|v| v.as_str().map(str::to_string));
    assert_eq!(seen, vec![json!("L"), json!("R")]);
    // the parallel wrapper plus both branch records
    assert_eq!(result.steps.len(), 3);
}

#[tokio::test]
async fn test_loop_step_repeats_until_condition() {
    let cyre = Cyre::new();
    cyre.init();
    cyre.action(ChannelConfig::new("tick"));
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_clone = Arc::clone(&counter);
    cyre.on(
        "tick",
        handler(move |p| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            Ok(p)
        }),
    );

    let orchestration = cyre.orchestration();
    orchestration.keep(
        OrchestrationConfig::new("repeater").with_step(WorkflowStep::new(
            "loop",
            StepKind::Loop {
                steps: vec![WorkflowStep::action(
                    "pulse",
                    Targets::from("tick"),
                    StepPayload::Literal(json!(1)),
                )],
                until: Arc::new(|ctx| ctx.step_history.len() >= 3),
                max_iterations: 10,
            },
        )),
    );

    let result = orchestration.call("repeater", None).await;
    assert!(result.ok);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_step_retries_recover_from_transient_failures() {
    // the handler fails twice, then succeeds; three retries cover it
    let cyre = Cyre::new();
    cyre.init();
    cyre.action(ChannelConfig::new("flaky"));
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_clone = Arc::clone(&attempts);
    cyre.on(
        "flaky",
        handler(move |p| {
            let n = attempts_clone.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err("transient".to_string())
            } else {
                Ok(p)
            }
        }),
    );

    let orchestration = cyre.orchestration();
    orchestration.keep(
        OrchestrationConfig::new("resilient").with_step(
            WorkflowStep::action("try", Targets::from("flaky"), StepPayload::Literal(json!(1)))
                .with_retries(3),
        ),
    );

    let result = orchestration.call("resilient", None).await;
    assert!(result.ok, "error: {:?}", result.error);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_variables_flow_between_steps() {
    let cyre = Cyre::new();
    cyre.init();
    cyre.action(ChannelConfig::new("producer"));
    cyre.action(ChannelConfig::new("consumer"));
    cyre.on("producer", handler(|_| Ok(json!({"token": "abc123"}))));
    let log = Arc::new(Mutex::new(Vec::new()));
    cyre.on("consumer", recording(Arc::clone(&log)));

    let orchestration = cyre.orchestration();
    orchestration.keep(
        OrchestrationConfig::new("handoff")
            .with_step(
                WorkflowStep::action("produce", Targets::from("producer"), StepPayload::Literal(json!(null)))
                    .storing("credentials"),
            )
            .with_step(WorkflowStep::action(
                "consume",
                Targets::from("consumer"),
                StepPayload::Build(Arc::new(|ctx| {
                    json!({"got": ctx.variables["credentials"]["token"]})
                })),
            )),
    );

    let result = orchestration.call("handoff", None).await;
    assert!(result.ok, "error: {:?}", result.error);
    assert_eq!(*log.lock().unwrap(), vec![json!({"got": "abc123"})]);
}

#[tokio::test]
async fn test_delay_step_waits() {
    let cyre = Cyre::new();
    cyre.init();

    let orchestration = cyre.orchestration();
    orchestration.keep(
        OrchestrationConfig::new("paced").with_step(WorkflowStep::delay("breather", 120)),
    );

    let started = std::time::Instant::now();
    let result = orchestration.call("paced", None).await;
    assert!(result.ok);
    assert!(started.elapsed().as_millis() >= 110);
}

#[tokio::test]
async fn test_system_overview_reports_registrations() {
    let cyre = Cyre::new();
    cyre.init();

    let orchestration = cyre.orchestration();
    orchestration.keep(OrchestrationConfig::new("one"));
    orchestration.keep(OrchestrationConfig::new("two"));
    orchestration.activate("one", true);

    let overview = orchestration.get_system_overview();
    assert_eq!(overview.total, 2);
    assert_eq!(overview.enabled, 1);

    assert!(orchestration.forget("two"));
    assert_eq!(orchestration.get_system_overview().total, 1);
}

#[tokio::test]
async fn test_unknown_orchestration_rejected() {
    let cyre = Cyre::new();
    cyre.init();
    let result = cyre.orchestration().call("ghost", None).await;
    assert!(!result.ok);
    assert!(result.error.unwrap().contains("not found"));
}
