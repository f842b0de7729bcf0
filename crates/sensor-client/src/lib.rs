//! Sensor Client - Handle-based access to the sensor daemon
//!
//! Applications open a [`SensorSession`], connect handles to sensors, register
//! for event types and start delivery. The session keeps the daemon's view of
//! each sensor in step with its local handle table by sending only the
//! commands a change implies, and undoes local changes the daemon refused.
//!
//! - `channel` - command channel (request/reply) and event channel (stream)
//! - `handle` - handle table and per-registration delivery state
//! - `rep` - subscription snapshots and their command diff
//! - `session` - the public API
//! - `listener` / `power` - background tasks owned by a session

pub mod channel;
pub mod config;
pub mod error;
pub mod handle;
pub mod rep;
pub mod session;

mod listener;
mod power;

pub use channel::{CommandChannel, EventChannel};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use handle::{AccuracyCallback, EventCallback, HandleState, Registration, MAX_HANDLES};
pub use rep::{diff, Rep, WireOp};
pub use session::{EventRequest, SensorSession};
