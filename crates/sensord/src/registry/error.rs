//! Registry errors.

use sensor_core::{ClientId, SensorType};
use sensor_protocol::status;
use thiserror::Error;

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown client: {0}")]
    UnknownClient(ClientId),

    #[error("{client_id} has not opened {sensor}")]
    SensorNotOpen {
        client_id: ClientId,
        sensor: SensorType,
    },

    #[error("{client_id} already opened {sensor}")]
    SensorAlreadyOpen {
        client_id: ClientId,
        sensor: SensorType,
    },

    #[error("Registry full (max: {max} clients)")]
    RegistryFull { max: usize },
}

impl RegistryError {
    /// Status reported to the client for this error.
    pub fn status(&self) -> i64 {
        match self {
            Self::UnknownClient(_) | Self::SensorAlreadyOpen { .. } => status::INVALID_ARGUMENT,
            Self::SensorNotOpen { .. } => status::NO_DEVICE,
            Self::RegistryFull { .. } => status::BUSY,
        }
    }
}
