//! Handler dispatch strategies
//!
//! Executes a channel's handler snapshot under the selected execution
//! operator, applies the group timeout, aggregates results per the error
//! strategy, records metrics and history, and follows intra-link chains.

use crate::context::CyreInner;
use crate::registry::{ChannelRecord, HandlerEntry};
use crate::types::{
    CallResult, CollectResults, DispatchStrategy, ErrorStrategy, Payload,
};
use futures::future::{join_all, select_all};
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Dispatch one accepted call to the channel's handlers
pub(crate) async fn dispatch(
    inner: &CyreInner,
    channel: &ChannelRecord,
    payload: Payload,
    depth: usize,
) -> CallResult {
    let id = channel.config.id.as_str();
    let handlers = inner.registry.handler_snapshot(id);
    if handlers.is_empty() {
        return CallResult::rejected(format!("no handler registered for channel {}", id));
    }

    let strategy = if handlers.len() == 1 {
        DispatchStrategy::Single
    } else {
        inner.registry.executor_for(id)
    };
    let handler_count = handlers.len();
    let started = Instant::now();

    let outcome = run_group(
        strategy,
        handlers,
        payload.clone(),
        channel.config.error_strategy,
        channel.config.collect_results,
        channel.config.dispatch_timeout,
    )
    .await;

    let elapsed_ms = started.elapsed().as_millis() as u64;
    let now = inner.now_ms();

    match outcome {
        Ok(result) => {
            inner.metrics.channel(id).record_execution(now);
            inner.history.record(id, payload, true, None);

            let mut response = CallResult::success(Some(result.clone()));
            let metadata = response.metadata_mut();
            metadata.execution_operator = Some(strategy);
            metadata.handler_count = Some(handler_count);
            metadata.execution_time_ms = Some(elapsed_ms);

            // intra-link: a result of `{id, payload}` tail-calls that channel
            if let Some((next_id, next_payload)) = link_target(inner, &result) {
                if depth < inner.config.intra_link_depth_max {
                    debug!(from = id, to = %next_id, depth, "following intra-link");
                    let chained =
                        inner.call_with_depth(&next_id, next_payload, depth + 1).await;
                    response.metadata_mut().chain_result = Some(Box::new(chained));
                } else {
                    warn!(from = id, depth, "intra-link depth bound reached; chain cut");
                }
            }
            response
        }
        Err(GroupError::Handler(cause)) => {
            inner.metrics.channel(id).record_error();
            inner
                .history
                .record(id, payload, false, Some("Handler execution failed".to_string()));
            warn!(id, %cause, "handler execution failed");

            let mut response = CallResult::failed("Handler execution failed", cause);
            let metadata = response.metadata_mut();
            metadata.execution_operator = Some(strategy);
            metadata.handler_count = Some(handler_count);
            metadata.execution_time_ms = Some(elapsed_ms);
            response
        }
        Err(GroupError::Timeout) => {
            inner.metrics.channel(id).record_error();
            warn!(id, "dispatch timed out; in-flight handlers detached");
            let mut response =
                CallResult::failed("Dispatch timed out", "dispatch timeout exceeded");
            let metadata = response.metadata_mut();
            metadata.execution_operator = Some(strategy);
            metadata.handler_count = Some(handler_count);
            metadata.execution_time_ms = Some(elapsed_ms);
            response
        }
    }
}

enum GroupError {
    Handler(String),
    Timeout,
}

/// Run the handler group under its strategy and optional group timeout.
/// With a timeout the group runs as a spawned task so expiry detaches it
/// rather than aborting running handlers.
async fn run_group(
    strategy: DispatchStrategy,
    handlers: Vec<HandlerEntry>,
    payload: Payload,
    error_strategy: ErrorStrategy,
    collect: CollectResults,
    timeout_ms: Option<u64>,
) -> Result<Payload, GroupError> {
    match timeout_ms {
        None => run_strategy(strategy, handlers, payload, error_strategy, collect)
            .await
            .map_err(GroupError::Handler),
        Some(ms) => {
            let task = tokio::spawn(run_strategy(
                strategy,
                handlers,
                payload,
                error_strategy,
                collect,
            ));
            match tokio::time::timeout(Duration::from_millis(ms), task).await {
                Ok(Ok(result)) => result.map_err(GroupError::Handler),
                Ok(Err(join_error)) => Err(GroupError::Handler(join_error.to_string())),
                Err(_) => Err(GroupError::Timeout),
            }
        }
    }
}

async fn run_strategy(
    strategy: DispatchStrategy,
    handlers: Vec<HandlerEntry>,
    payload: Payload,
    error_strategy: ErrorStrategy,
    collect: CollectResults,
) -> Result<Payload, String> {
    match strategy {
        DispatchStrategy::Single => {
            let handler = &handlers[0];
            (handler.func)(payload).await
        }
        DispatchStrategy::Parallel => run_parallel(handlers, payload, error_strategy).await,
        DispatchStrategy::Sequential => {
            run_sequential(handlers, payload, error_strategy, collect).await
        }
        DispatchStrategy::Race => run_race(handlers, payload).await,
        DispatchStrategy::Waterfall => run_waterfall(handlers, payload).await,
    }
}

/// All handlers concurrently. `continue` collects per-handler envelopes;
/// `fail-fast` rejects on the first failure.
async fn run_parallel(
    handlers: Vec<HandlerEntry>,
    payload: Payload,
    error_strategy: ErrorStrategy,
) -> Result<Payload, String> {
    let futures: Vec<_> = handlers
        .iter()
        .map(|handler| (handler.func)(payload.clone()))
        .collect();
    let results = join_all(futures).await;

    match error_strategy {
        ErrorStrategy::Continue => {
            let envelopes: Vec<Payload> = results
                .into_iter()
                .map(|result| match result {
                    Ok(value) => json!({"ok": true, "payload": value}),
                    Err(cause) => json!({"ok": false, "error": cause}),
                })
                .collect();
            Ok(Payload::Array(envelopes))
        }
        ErrorStrategy::FailFast => {
            let mut values = Vec::with_capacity(results.len());
            for result in results {
                values.push(result?);
            }
            Ok(Payload::Array(values))
        }
    }
}

/// Handlers in insertion order, each receiving the original call payload
async fn run_sequential(
    handlers: Vec<HandlerEntry>,
    payload: Payload,
    error_strategy: ErrorStrategy,
    collect: CollectResults,
) -> Result<Payload, String> {
    let mut results: Vec<Payload> = Vec::with_capacity(handlers.len());
    for handler in &handlers {
        match (handler.func)(payload.clone()).await {
            Ok(value) => results.push(value),
            Err(cause) => match error_strategy {
                ErrorStrategy::Continue => results.push(json!({"ok": false, "error": cause})),
                ErrorStrategy::FailFast => return Err(cause),
            },
        }
    }
    match collect {
        CollectResults::All => Ok(Payload::Array(results)),
        CollectResults::Last => Ok(results.pop().unwrap_or(Payload::Null)),
    }
}

/// First fulfilled handler wins; the rest keep running detached
async fn run_race(handlers: Vec<HandlerEntry>, payload: Payload) -> Result<Payload, String> {
    let mut tasks: Vec<_> = handlers
        .iter()
        .map(|handler| tokio::spawn((handler.func)(payload.clone())))
        .collect();

    let mut last_error = "race had no handlers".to_string();
    while !tasks.is_empty() {
        let (finished, _, rest) = select_all(tasks).await;
        tasks = rest;
        match finished {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(cause)) => last_error = cause,
            Err(join_error) => last_error = join_error.to_string(),
        }
    }
    Err(last_error)
}

/// Pipe each handler's result into the next handler's input
async fn run_waterfall(handlers: Vec<HandlerEntry>, payload: Payload) -> Result<Payload, String> {
    let mut current = payload;
    for handler in &handlers {
        current = (handler.func)(current).await?;
    }
    Ok(current)
}

/// A dispatch result chains onward when it is exactly `{id, payload}` and
/// `id` names a registered channel
fn link_target(inner: &CyreInner, value: &Payload) -> Option<(String, Payload)> {
    let object = value.as_object()?;
    if object.len() != 2 || !object.contains_key("payload") {
        return None;
    }
    let id = object.get("id")?.as_str()?;
    if !inner.registry.contains_channel(id) {
        return None;
    }
    let payload = object.get("payload").cloned().unwrap_or(Payload::Null);
    Some((id.to_string(), payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::handler;

    fn entries(funcs: Vec<crate::types::HandlerFn>) -> Vec<HandlerEntry> {
        funcs
            .into_iter()
            .enumerate()
            .map(|(i, func)| HandlerEntry { id: i as u64 + 1, func })
            .collect()
    }

    #[tokio::test]
    async fn test_waterfall_pipes_results() {
        let handlers = entries(vec![
            handler(|p| Ok(json!({"n": p.as_i64().unwrap_or(0) + 1}))),
            handler(|p| Ok(json!(p["n"].as_i64().unwrap_or(0) * 10))),
        ]);
        let result = run_waterfall(handlers, json!(4)).await.unwrap();
        assert_eq!(result, json!(50));
    }

    #[tokio::test]
    async fn test_sequential_uses_original_payload() {
        let handlers = entries(vec![
            handler(|p| Ok(json!(p.as_i64().unwrap_or(0) + 1))),
            handler(|p| Ok(json!(p.as_i64().unwrap_or(0) + 2))),
        ]);
        let result = run_sequential(
            handlers,
            json!(10),
            ErrorStrategy::FailFast,
            CollectResults::All,
        )
        .await
        .unwrap();
        assert_eq!(result, json!([11, 12]));
    }

    #[tokio::test]
    async fn test_parallel_continue_collects_failures() {
        let handlers = entries(vec![
            handler(|_| Ok(json!("fine"))),
            handler(|_| Err("broken".to_string())),
        ]);
        let result = run_parallel(handlers, json!(null), ErrorStrategy::Continue)
            .await
            .unwrap();
        assert_eq!(result[0], json!({"ok": true, "payload": "fine"}));
        assert_eq!(result[1], json!({"ok": false, "error": "broken"}));
    }

    #[tokio::test]
    async fn test_parallel_fail_fast_rejects() {
        let handlers = entries(vec![
            handler(|_| Ok(json!(1))),
            handler(|_| Err("broken".to_string())),
        ]);
        let result = run_parallel(handlers, json!(null), ErrorStrategy::FailFast).await;
        assert_eq!(result.unwrap_err(), "broken");
    }

    #[tokio::test]
    async fn test_race_first_fulfilled_wins() {
        let slow = crate::types::async_handler(|_| async {
            tokio::time::sleep(Duration::from_millis(80)).await;
            Ok(json!("slow"))
        });
        let fast = crate::types::async_handler(|_| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(json!("fast"))
        });
        let result = run_race(entries(vec![slow, fast]), json!(null)).await.unwrap();
        assert_eq!(result, json!("fast"));
    }

    #[tokio::test]
    async fn test_race_skips_early_failures() {
        let failing = handler(|_| Err("immediate".to_string()));
        let ok = crate::types::async_handler(|_| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(json!("eventual"))
        });
        let result = run_race(entries(vec![failing, ok]), json!(null)).await.unwrap();
        assert_eq!(result, json!("eventual"));
    }
}
