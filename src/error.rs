//! Error types for the memory execution runtime

use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Error taxonomy for the engine
///
/// Transient infrastructure errors are retried or skipped at cycle
/// boundaries; per-block errors are logged with the block id and never
/// abort a cycle.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Point store / KV persistence error
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration repository error
    #[error("Repository error: {0}")]
    Repository(String),

    /// Historian error
    #[error("Historian error: {0}")]
    Historian(String),

    /// A block references a point or global that does not resolve
    #[error("Missing reference {reference} in block {block_id}")]
    MissingReference { block_id: String, reference: String },

    /// A cached value could not be parsed as a number
    #[error("Unparsable value {value:?} for point {point_id}")]
    UnparsableValue { point_id: String, value: String },

    /// Invalid block configuration
    #[error("Invalid configuration for block {block_id}: {reason}")]
    InvalidConfiguration { block_id: String, reason: String },

    /// Write refused at the dispatcher
    #[error("Write refused for point {point_id}: {reason}")]
    WriteRefused { point_id: String, reason: String },

    /// Conditional-memory expression error
    #[error("Expression error: {0}")]
    Expression(String),

    /// Cron expression error
    #[error("Cron error: {0}")]
    Cron(String),

    /// Auto-tuning safety abort
    #[error("Tuning aborted for PID {pid_id}: {reason}")]
    TuningAborted { pid_id: String, reason: String },

    /// Tuning session not in the state the operation requires
    #[error("Tuning session for PID {pid_id} is not {expected}")]
    TuningState { pid_id: String, expected: String },

    /// Block not found
    #[error("Block {0} not found")]
    BlockNotFound(String),

    /// Engine is shutting down
    #[error("Engine is shutting down")]
    Shutdown,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sled::Error> for EngineError {
    fn from(err: sled::Error) -> Self {
        EngineError::Store(format!("sled: {err}"))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Store(format!("serialization: {err}"))
    }
}

impl From<evalexpr::EvalexprError> for EngineError {
    fn from(err: evalexpr::EvalexprError) -> Self {
        EngineError::Expression(err.to_string())
    }
}
