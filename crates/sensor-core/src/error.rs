//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors reported by a sensor module (physical or virtual).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    /// The hardware or input sensors could not be started.
    #[error("failed to start sensor: {0}")]
    StartFailed(String),

    /// The module was asked to stop while not running.
    #[error("sensor is not started")]
    NotStarted,

    /// The module does not implement the requested operation.
    #[error("operation not supported by sensor")]
    Unsupported,

    /// No sample is available yet.
    #[error("no sensor data available")]
    NoData,

    /// A parameter was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Device I/O failure.
    #[error("sensor I/O error: {0}")]
    Io(String),
}

/// Result type for module operations.
pub type ModuleResult<T> = Result<T, ModuleError>;
