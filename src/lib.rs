//! Cyre: a single-process reactive action bus
//!
//! Producers submit payloads to named channels; an operator pipeline
//! validates, protects, and transforms each payload; subscribed handlers
//! execute under dispatch strategies, timing policies, and adaptive
//! back-pressure driven by measured system stress. This crate provides:
//! - per-channel operator pipelines (validation → protection →
//!   processing → dispatch)
//! - the TimeKeeper scheduler (delay / interval / repeat / debounce
//!   formations with replacement semantics)
//! - the breathing stress monitor that modulates protection and cadence
//! - handler dispatch strategies (single, parallel, sequential, race,
//!   waterfall) with intra-link chaining
//! - an orchestration engine composing channels into triggered workflows
//! - hierarchical branch namespaces
//!
//! ```no_run
//! use cyre::{Cyre, ChannelConfig, handler};
//! use serde_json::json;
//!
//! # async fn demo() {
//! let cyre = Cyre::new();
//! cyre.init();
//!
//! cyre.action(ChannelConfig::new("greeting").with_throttle(1000));
//! cyre.on("greeting", handler(|payload| Ok(payload)));
//!
//! let result = cyre.call("greeting", json!({"hello": "world"})).await;
//! assert!(result.ok);
//! # }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod branch;
pub mod breathing;
pub mod config;
pub mod constants;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod metrics;
pub mod orchestration;
pub mod pipeline;
pub mod registry;
pub mod timekeeper;
pub mod types;

pub use branch::Branch;
pub use breathing::{BreathingPattern, BreathingSnapshot};
pub use config::{load_config, CyreConfig};
pub use context::{init_tracing, Cyre, Subscription};
pub use error::{CyreError, CyreResult};
pub use history::{HistoryEntry, HistoryResult};
pub use metrics::MetricsSnapshot;
pub use orchestration::{
    OrchestrationConfig, OrchestrationContext, StepKind, StepOnError, StepPayload, Targets,
    TimeSchedule, Trigger, WorkflowStep,
};
pub use timekeeper::{TimeKeeper, TimeKeeperStatus};
pub use types::{
    async_handler, handler, middleware, CallMetadata, CallResult, ChannelConfig, CollectResults,
    DispatchStrategy, ErrorStrategy, HandlerFn, MiddlewareFn, Payload, Priority, RegisterResult,
    Repeat, SchemaResult,
};
