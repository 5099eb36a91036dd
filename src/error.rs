//! Error types for the action bus

use thiserror::Error;

/// Result type for bus operations
pub type CyreResult<T> = Result<T, CyreError>;

/// Error kinds surfaced by the action bus
#[derive(Error, Debug)]
pub enum CyreError {
    /// Invalid channel or orchestration configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Registration attempted while the system is locked
    #[error("System is locked")]
    Locked,

    /// Channel lookup failed
    #[error("Channel {0} not found")]
    ChannelNotFound(String),

    /// Orchestration lookup failed
    #[error("Orchestration {0} not found")]
    OrchestrationNotFound(String),

    /// Payload rejected by a validation operator
    #[error("Validation error: {0}")]
    Validation(String),

    /// Call rejected by a protection operator
    #[error("Protection rejected call: {0}")]
    Protection(String),

    /// A user-supplied operator function failed
    #[error("{operator} execution failed: {cause}")]
    OperatorFailed { operator: String, cause: String },

    /// One or more handlers failed during dispatch
    #[error("Handler execution failed: {0}")]
    HandlerFailed(String),

    /// Scheduler rejected a formation request
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Dispatch or step execution exceeded its deadline
    #[error("Operation timed out")]
    Timeout,

    /// Unrecoverable internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for CyreError {
    fn from(err: std::io::Error) -> Self {
        CyreError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for CyreError {
    fn from(err: toml::de::Error) -> Self {
        CyreError::Config(format!("TOML parse error: {}", err))
    }
}
