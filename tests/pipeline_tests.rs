//! Operator pipeline tests
//!
//! Covers the processing operators and their fixed ordering:
//! - Selector → condition → transform chains rewrite the forwarded payload
//! - Schema validation rewrites, rejects, or passes through permissively
//! - Operator failures surface the operator name and never reach handlers
//! - Channel middleware runs after the built-in operators
//! - Fast-path and pipeline-path hand handlers identical arguments

use cyre::{handler, ChannelConfig, Cyre, Payload, Priority, SchemaResult};
use serde_json::json;
use std::sync::{Arc, Mutex};

fn recording(log: Arc<Mutex<Vec<Payload>>>) -> cyre::HandlerFn {
    handler(move |payload| {
        log.lock().unwrap().push(payload.clone());
        Ok(payload)
    })
}

#[tokio::test]
async fn test_chained_operators_rewrite_payload() {
    // Arrange: required → selector → condition → transform
    let cyre = Cyre::new();
    cyre.init();
    cyre.action(
        ChannelConfig::new("chain")
            .with_required()
            .with_selector(|p| {
                p.get("data").cloned().ok_or_else(|| "missing data".to_string())
            })
            .with_condition(|p| Ok(p.as_str().map(|s| !s.is_empty()).unwrap_or(false)))
            .with_transform(|p| {
                Ok(json!(p.as_str().unwrap_or_default().to_uppercase()))
            }),
    );
    let log = Arc::new(Mutex::new(Vec::new()));
    cyre.on("chain", recording(Arc::clone(&log)));

    // Act
    let result = cyre
        .call("chain", json!({"data": "hello", "meta": "ignored"}))
        .await;

    // Assert: the handler saw the selected, transformed value
    assert!(result.ok);
    assert_eq!(*log.lock().unwrap(), vec![json!("HELLO")]);
    assert_eq!(cyre.get_metrics("chain").unwrap().total_executions, 1);
}

#[tokio::test]
async fn test_schema_success_replaces_payload() {
    let cyre = Cyre::new();
    cyre.init();
    cyre.action(ChannelConfig::new("typed").with_schema(|payload| {
        match payload.get("count").and_then(|v| v.as_i64()) {
            Some(count) => SchemaResult::valid(json!({"count": count})),
            None => SchemaResult::invalid(vec!["count must be a number".to_string()]),
        }
    }));
    let log = Arc::new(Mutex::new(Vec::new()));
    cyre.on("typed", recording(Arc::clone(&log)));

    let good = cyre.call("typed", json!({"count": 3, "junk": true})).await;
    let bad = cyre.call("typed", json!({"count": "three"})).await;

    assert!(good.ok);
    // schema output replaced the payload: junk stripped
    assert_eq!(*log.lock().unwrap(), vec![json!({"count": 3})]);
    assert!(!bad.ok);
    assert!(bad.message.unwrap().contains("Schema validation failed"));
}

#[tokio::test]
async fn test_schema_permissive_pass_keeps_original() {
    let cyre = Cyre::new();
    cyre.init();
    cyre.action(ChannelConfig::new("loose").with_schema(|_| SchemaResult::pass()));
    let log = Arc::new(Mutex::new(Vec::new()));
    cyre.on("loose", recording(Arc::clone(&log)));

    let original = json!({"untouched": [1, 2, 3]});
    assert!(cyre.call("loose", original.clone()).await.ok);
    assert_eq!(*log.lock().unwrap(), vec![original]);
}

#[tokio::test]
async fn test_condition_not_met_rejects() {
    let cyre = Cyre::new();
    cyre.init();
    cyre.action(
        ChannelConfig::new("gated")
            .with_condition(|p| Ok(p["allowed"].as_bool().unwrap_or(false))),
    );
    let log = Arc::new(Mutex::new(Vec::new()));
    cyre.on("gated", recording(Arc::clone(&log)));

    let denied = cyre.call("gated", json!({"allowed": false})).await;
    assert!(!denied.ok);
    assert_eq!(denied.message.unwrap(), "Condition not met");
    assert!(log.lock().unwrap().is_empty());

    assert!(cyre.call("gated", json!({"allowed": true})).await.ok);
}

#[tokio::test]
async fn test_operator_errors_carry_operator_name() {
    let cyre = Cyre::new();
    cyre.init();
    cyre.action(
        ChannelConfig::new("fragile").with_selector(|_| Err("boom".to_string())),
    );
    cyre.on("fragile", handler(|p| Ok(p)));

    let result = cyre.call("fragile", json!(1)).await;
    assert!(!result.ok);
    assert_eq!(result.message.unwrap(), "selector execution failed: boom");
    assert_eq!(cyre.get_metrics("fragile").unwrap().total_executions, 0);
}

#[tokio::test]
async fn test_condition_error_is_a_pipeline_failure() {
    let cyre = Cyre::new();
    cyre.init();
    cyre.action(
        ChannelConfig::new("brittle").with_condition(|_| Err("bad predicate".to_string())),
    );
    cyre.on("brittle", handler(|p| Ok(p)));

    let result = cyre.call("brittle", json!(1)).await;
    assert!(!result.ok);
    assert!(result.message.unwrap().starts_with("condition execution failed"));
}

#[tokio::test]
async fn test_middleware_chain_transforms_in_order() {
    let cyre = Cyre::new();
    cyre.init();
    cyre.action(
        ChannelConfig::new("piped")
            .with_middleware(cyre::middleware(|p| {
                Ok(json!({"wrapped": p}))
            }))
            .with_middleware(cyre::middleware(|p| {
                Ok(json!({"stamped": p, "stage": 2}))
            })),
    );
    let log = Arc::new(Mutex::new(Vec::new()));
    cyre.on("piped", recording(Arc::clone(&log)));

    assert!(cyre.call("piped", json!("seed")).await.ok);
    assert_eq!(
        *log.lock().unwrap(),
        vec![json!({"stamped": {"wrapped": "seed"}, "stage": 2})]
    );
}

#[tokio::test]
async fn test_middleware_error_stops_pipeline() {
    let cyre = Cyre::new();
    cyre.init();
    cyre.action(
        ChannelConfig::new("blocked")
            .with_middleware(cyre::middleware(|_| Err("denied".to_string()))),
    );
    let log = Arc::new(Mutex::new(Vec::new()));
    cyre.on("blocked", recording(Arc::clone(&log)));

    let result = cyre.call("blocked", json!(1)).await;
    assert!(!result.ok);
    assert!(result.message.unwrap().starts_with("middleware execution failed"));
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_fast_path_and_pipeline_path_hand_equal_arguments() {
    // a fast-path channel and a pipeline channel with no rewriting
    // operators must hand handlers the identical payload
    let cyre = Cyre::new();
    cyre.init();
    cyre.action(ChannelConfig::new("fast"));
    cyre.action(ChannelConfig::new("slow").with_priority(Priority::High));

    let fast_log = Arc::new(Mutex::new(Vec::new()));
    let slow_log = Arc::new(Mutex::new(Vec::new()));
    cyre.on("fast", recording(Arc::clone(&fast_log)));
    cyre.on("slow", recording(Arc::clone(&slow_log)));

    let payload = json!({"nested": {"values": [1, 2, 3]}, "flag": true});
    assert!(cyre.call("fast", payload.clone()).await.ok);
    assert!(cyre.call("slow", payload.clone()).await.ok);

    assert_eq!(*fast_log.lock().unwrap(), *slow_log.lock().unwrap());
    assert_eq!(fast_log.lock().unwrap()[0], payload);
}

#[tokio::test]
async fn test_missing_channel_is_rejected() {
    let cyre = Cyre::new();
    cyre.init();
    let result = cyre.call("ghost", json!(1)).await;
    assert!(!result.ok);
    assert!(result.message.unwrap().contains("not found"));
}
