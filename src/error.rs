//! Error types for the upkeep scheduler.

use std::time::Duration;

/// Top-level error type for the maintenance scheduler.
#[derive(Debug, thiserror::Error)]
pub enum UpkeepError {
    /// Maintenance or notification action failed. Retried on the next trigger.
    #[error("actuator error: {0}")]
    Actuator(String),

    /// Idle state could not be determined.
    #[error("idle probe error: {0}")]
    Probe(String),

    /// State read or write failed. Fatal for the current evaluation cycle.
    #[error("state store error: {0}")]
    Store(String),

    /// Named lock could not be created, read or released.
    #[error("lock error: {0}")]
    Lock(String),

    /// A deadline-bound run did not finish in time.
    #[error("deadline of {}s exceeded", .0.as_secs())]
    DeadlineExceeded(Duration),

    /// The run was cancelled by an external signal.
    #[error("cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, UpkeepError>;
