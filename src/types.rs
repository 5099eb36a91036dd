//! Core channel types: configuration, user-function handles, response envelope

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Payloads are opaque JSON values
pub type Payload = serde_json::Value;

/// Channel priority for recuperation admission and formation adaptation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
    Background,
}

impl Priority {
    /// Numeric rank, higher is more urgent
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Critical => 4,
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
            Priority::Background => 0,
        }
    }
}

/// Handler execution strategy across a channel's handler set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStrategy {
    #[default]
    Single,
    Parallel,
    Sequential,
    Race,
    Waterfall,
}

impl fmt::Display for DispatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatchStrategy::Single => "single",
            DispatchStrategy::Parallel => "parallel",
            DispatchStrategy::Sequential => "sequential",
            DispatchStrategy::Race => "race",
            DispatchStrategy::Waterfall => "waterfall",
        };
        f.write_str(name)
    }
}

/// How handler errors propagate within a dispatch group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorStrategy {
    Continue,
    #[default]
    FailFast,
}

/// Which results a sequential dispatch returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CollectResults {
    All,
    #[default]
    Last,
}

/// Repeat count for timed execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Repeat {
    /// Exactly this many total dispatches
    Times(u64),
    /// Unbounded repetition
    Forever,
}

impl Repeat {
    /// True when the repeat count blocks execution entirely
    pub fn is_zero(&self) -> bool {
        matches!(self, Repeat::Times(0))
    }

    /// Remaining fires after `n` have already happened, `None` for unbounded
    pub fn remaining_after(&self, n: u64) -> Option<u64> {
        match self {
            Repeat::Forever => None,
            Repeat::Times(total) => Some(total.saturating_sub(n)),
        }
    }
}

/// Outcome of a user schema validator.
///
/// `ok: true` with `data` replaces the forwarded payload; `ok: true` without
/// `data` forwards the original payload unchanged (the permissive contract).
#[derive(Debug, Clone)]
pub struct SchemaResult {
    pub ok: bool,
    pub data: Option<Payload>,
    pub errors: Vec<String>,
}

impl SchemaResult {
    /// Success that rewrites the forwarded payload
    pub fn valid(data: Payload) -> Self {
        Self { ok: true, data: Some(data), errors: Vec::new() }
    }

    /// Success that keeps the original payload
    pub fn pass() -> Self {
        Self { ok: true, data: None, errors: Vec::new() }
    }

    /// Failure with validation messages
    pub fn invalid(errors: Vec<String>) -> Self {
        Self { ok: false, data: None, errors }
    }
}

/// User schema validator
pub type SchemaFn = Arc<dyn Fn(&Payload) -> SchemaResult + Send + Sync>;

/// User condition predicate; `Err` becomes a pipeline failure
pub type ConditionFn = Arc<dyn Fn(&Payload) -> Result<bool, String> + Send + Sync>;

/// User payload selector; `Err` becomes a pipeline failure
pub type SelectorFn = Arc<dyn Fn(&Payload) -> Result<Payload, String> + Send + Sync>;

/// User payload transform; `Err` becomes a pipeline failure
pub type TransformFn = Arc<dyn Fn(&Payload) -> Result<Payload, String> + Send + Sync>;

/// Channel-local async middleware; receives the payload and returns the
/// payload for the next link, `Err` stops the pipeline
pub type MiddlewareFn =
    Arc<dyn Fn(Payload) -> BoxFuture<'static, Result<Payload, String>> + Send + Sync>;

/// Subscriber function bound to a channel id
pub type HandlerFn =
    Arc<dyn Fn(Payload) -> BoxFuture<'static, Result<Payload, String>> + Send + Sync>;

/// Wrap a synchronous closure as a channel handler
pub fn handler<F>(f: F) -> HandlerFn
where
    F: Fn(Payload) -> Result<Payload, String> + Send + Sync + 'static,
{
    Arc::new(move |payload| {
        let result = f(payload);
        Box::pin(async move { result })
    })
}

/// Wrap an async closure as a channel handler
pub fn async_handler<F, Fut>(f: F) -> HandlerFn
where
    F: Fn(Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Payload, String>> + Send + 'static,
{
    Arc::new(move |payload| Box::pin(f(payload)))
}

/// Wrap a synchronous closure as channel middleware
pub fn middleware<F>(f: F) -> MiddlewareFn
where
    F: Fn(Payload) -> Result<Payload, String> + Send + Sync + 'static,
{
    Arc::new(move |payload| {
        let result = f(payload);
        Box::pin(async move { result })
    })
}

/// Channel configuration submitted to `action`
#[derive(Clone, Default)]
pub struct ChannelConfig {
    /// Local channel id; the registering branch prefixes its path
    pub id: String,
    /// Optional type tag
    pub channel_type: Option<String>,
    /// Optional initial payload returned by `get` before the first dispatch
    pub payload: Option<Payload>,

    // protection
    pub throttle: Option<u64>,
    pub debounce: Option<u64>,
    pub max_wait: Option<u64>,
    pub detect_changes: bool,
    pub block: bool,

    // timing
    pub delay: Option<u64>,
    pub interval: Option<u64>,
    pub repeat: Option<Repeat>,

    // processing
    pub schema: Option<SchemaFn>,
    pub required: bool,
    pub condition: Option<ConditionFn>,
    pub selector: Option<SelectorFn>,
    pub transform: Option<TransformFn>,
    pub middleware: Vec<MiddlewareFn>,

    // dispatch
    pub dispatch: DispatchStrategy,
    pub error_strategy: ErrorStrategy,
    pub collect_results: CollectResults,
    pub dispatch_timeout: Option<u64>,

    // system
    pub priority: Priority,
    pub path: Option<String>,
    pub tags: Vec<String>,
}

impl ChannelConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Default::default() }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_throttle(mut self, ms: u64) -> Self {
        self.throttle = Some(ms);
        self
    }

    pub fn with_debounce(mut self, ms: u64) -> Self {
        self.debounce = Some(ms);
        self
    }

    pub fn with_max_wait(mut self, ms: u64) -> Self {
        self.max_wait = Some(ms);
        self
    }

    pub fn with_detect_changes(mut self) -> Self {
        self.detect_changes = true;
        self
    }

    pub fn with_block(mut self) -> Self {
        self.block = true;
        self
    }

    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay = Some(ms);
        self
    }

    pub fn with_interval(mut self, ms: u64) -> Self {
        self.interval = Some(ms);
        self
    }

    pub fn with_repeat(mut self, repeat: Repeat) -> Self {
        self.repeat = Some(repeat);
        self
    }

    pub fn with_schema<F>(mut self, f: F) -> Self
    where
        F: Fn(&Payload) -> SchemaResult + Send + Sync + 'static,
    {
        self.schema = Some(Arc::new(f));
        self
    }

    pub fn with_required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_condition<F>(mut self, f: F) -> Self
    where
        F: Fn(&Payload) -> Result<bool, String> + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(f));
        self
    }

    pub fn with_selector<F>(mut self, f: F) -> Self
    where
        F: Fn(&Payload) -> Result<Payload, String> + Send + Sync + 'static,
    {
        self.selector = Some(Arc::new(f));
        self
    }

    pub fn with_transform<F>(mut self, f: F) -> Self
    where
        F: Fn(&Payload) -> Result<Payload, String> + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(f));
        self
    }

    pub fn with_middleware(mut self, mw: MiddlewareFn) -> Self {
        self.middleware.push(mw);
        self
    }

    pub fn with_dispatch(mut self, strategy: DispatchStrategy) -> Self {
        self.dispatch = strategy;
        self
    }

    pub fn with_error_strategy(mut self, strategy: ErrorStrategy) -> Self {
        self.error_strategy = strategy;
        self
    }

    pub fn with_collect_results(mut self, collect: CollectResults) -> Self {
        self.collect_results = collect;
        self
    }

    pub fn with_dispatch_timeout(mut self, ms: u64) -> Self {
        self.dispatch_timeout = Some(ms);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

impl fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("id", &self.id)
            .field("channel_type", &self.channel_type)
            .field("throttle", &self.throttle)
            .field("debounce", &self.debounce)
            .field("max_wait", &self.max_wait)
            .field("detect_changes", &self.detect_changes)
            .field("block", &self.block)
            .field("delay", &self.delay)
            .field("interval", &self.interval)
            .field("repeat", &self.repeat)
            .field("required", &self.required)
            .field("has_schema", &self.schema.is_some())
            .field("has_condition", &self.condition.is_some())
            .field("has_selector", &self.selector.is_some())
            .field("has_transform", &self.transform.is_some())
            .field("middleware", &self.middleware.len())
            .field("dispatch", &self.dispatch)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Result of `action` registration and other synchronous surface calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResult {
    pub ok: bool,
    pub message: String,
}

impl RegisterResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { ok: true, message: message.into() }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self { ok: false, message: message.into() }
    }
}

/// Metadata attached to a call response
#[derive(Debug, Clone, Default, Serialize)]
pub struct CallMetadata {
    pub execution_operator: Option<DispatchStrategy>,
    pub handler_count: Option<usize>,
    pub execution_time_ms: Option<u64>,
    pub scheduled: Option<bool>,
    pub delay: Option<u64>,
    pub buffer_window: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_result: Option<Box<CallResult>>,
}

/// Response envelope for every `call`
#[derive(Debug, Clone, Serialize)]
pub struct CallResult {
    pub ok: bool,
    pub message: Option<String>,
    pub payload: Option<Payload>,
    pub error: Option<String>,
    pub metadata: Option<CallMetadata>,
}

impl CallResult {
    /// Successful dispatch carrying a handler result
    pub fn success(payload: Option<Payload>) -> Self {
        Self { ok: true, message: None, payload, error: None, metadata: None }
    }

    /// Successful terminal outcome with an explanatory message
    pub fn accepted(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: Some(message.into()),
            payload: None,
            error: None,
            metadata: None,
        }
    }

    /// Rejected call (protection or validation)
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
            payload: None,
            error: None,
            metadata: None,
        }
    }

    /// Failed call carrying an error cause
    pub fn failed(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
            payload: None,
            error: Some(error.into()),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: CallMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Metadata accessor that creates the record on first use
    pub fn metadata_mut(&mut self) -> &mut CallMetadata {
        self.metadata.get_or_insert_with(CallMetadata::default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_ranks_order() {
        assert!(Priority::Critical.rank() > Priority::High.rank());
        assert!(Priority::High.rank() > Priority::Medium.rank());
        assert!(Priority::Medium.rank() > Priority::Low.rank());
        assert!(Priority::Low.rank() > Priority::Background.rank());
    }

    #[test]
    fn test_repeat_remaining_accounting() {
        assert_eq!(Repeat::Times(3).remaining_after(1), Some(2));
        assert_eq!(Repeat::Times(3).remaining_after(5), Some(0));
        assert_eq!(Repeat::Forever.remaining_after(100), None);
        assert!(Repeat::Times(0).is_zero());
        assert!(!Repeat::Forever.is_zero());
    }

    #[test]
    fn test_schema_result_shapes() {
        let valid = SchemaResult::valid(json!({"a": 1}));
        assert!(valid.ok);
        assert!(valid.data.is_some());

        let pass = SchemaResult::pass();
        assert!(pass.ok);
        assert!(pass.data.is_none());

        let invalid = SchemaResult::invalid(vec!["missing field".to_string()]);
        assert!(!invalid.ok);
        assert_eq!(invalid.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_handler_wrappers_run() {
        let sync = handler(|p| Ok(p));
        let out = sync(json!(1)).await.unwrap();
        assert_eq!(out, json!(1));

        let asynchronous = async_handler(|p: Payload| async move { Ok(p) });
        let out = asynchronous(json!("x")).await.unwrap();
        assert_eq!(out, json!("x"));
    }
}
