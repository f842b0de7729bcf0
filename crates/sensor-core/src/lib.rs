//! Sensor Core - Shared types for the sensor daemon
//!
//! This crate provides the domain types shared between
//! the daemon (sensord) and the client library (sensor-client).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod data;
pub mod error;
pub mod ids;
pub mod permission;
pub mod sensor;
pub mod state;

// Re-exports for convenience
pub use data::{SensorData, SensorEvent, MAX_VALUE_COUNT};
pub use error::{ModuleError, ModuleResult};
pub use ids::{ClientId, Handle};
pub use permission::Permission;
pub use sensor::{attribute, EventType, SensorInfo, SensorType};
pub use state::{PowerState, SensorOption, SensorState, Situation};
