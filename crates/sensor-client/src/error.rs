//! Error types for the sensor client library.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::io;

use sensor_core::{Handle, SensorType};
use sensor_protocol::{status, ProtocolError};
use thiserror::Error;

// ============================================================================
// Client Error Type
// ============================================================================

/// Errors returned by `SensorSession` calls.
///
/// Calls that fail with `InvalidHandle`, `UnsupportedSensor`,
/// `ResourceExhausted` or `InvalidState` generate no wire traffic. Any other
/// failure of a mutating call has already been rolled back locally.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Malformed frame or unexpected packet from the daemon.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The daemon refused access to the sensor.
    #[error("Permission denied for {0}")]
    PermissionDenied(SensorType),

    #[error("Invalid handle: {0}")]
    InvalidHandle(Handle),

    /// The daemon does not serve this sensor.
    #[error("Unsupported sensor: {0}")]
    UnsupportedSensor(SensorType),

    /// The daemon (or its sensor module) answered with a failure status.
    #[error("Daemon returned {status} ({description})", description = sensor_protocol::status::describe(*status))]
    Module { status: i64 },

    /// A local table is full.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// No reply within the command channel receive timeout.
    #[error("Timed out waiting for the daemon")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The channel was closed after an earlier hard error.
    #[error("Not connected to the daemon")]
    NotConnected,

    /// The call does not make sense in the handle's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl ClientError {
    /// Maps a failure status for a call on `sensor` to an error.
    pub fn from_status(value: i64, sensor: SensorType) -> Self {
        match value {
            status::PERMISSION_DENIED => Self::PermissionDenied(sensor),
            status::NO_DEVICE => Self::UnsupportedSensor(sensor),
            _ => Self::Module { status: value },
        }
    }

    /// True if the channel this error came from can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_) | Self::Timeout | Self::Io(_) | Self::NotConnected
        )
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Turns a reply status into a `Result`.
pub(crate) fn check_status(value: i64, sensor: SensorType) -> Result<()> {
    if status::is_ok(value) {
        Ok(())
    } else {
        Err(ClientError::from_status(value, sensor))
    }
}
