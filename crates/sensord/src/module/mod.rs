//! Sensor Module contract.
//!
//! A Sensor Module owns one sensor (physical or derived). Many clients may use
//! it at once; the module reconciles their requests itself:
//! - `start`/`stop` are reference counted
//! - the effective sampling interval is the minimum requested interval
//! - the effective batch latency is the largest latency every client tolerates
//!
//! Requests are keyed by [`Requester`] so each contribution can be withdrawn
//! independently.
//!
//! # Panic-Free Guarantees
//!
//! Module methods never panic; failures are reported as [`ModuleError`].
//!
//! [`ModuleError`]: sensor_core::ModuleError

mod catalog;
mod state;
mod simulated;

pub use catalog::SensorCatalog;
pub use state::ModuleCore;
pub use simulated::{SimulatedSensor, Waveform};

use sensor_core::{ClientId, ModuleResult, Permission, SensorData, SensorInfo, SensorType};
use tracing::warn;

/// Who contributed an interval or latency request to a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Requester {
    /// A client subscription (`SET_BATCH`).
    Client(ClientId),
    /// A short-lived request made while waiting for the first sample of `GET_DATA`.
    WarmUp(ClientId),
    /// A virtual sensor driving one of its inputs.
    Virtual(SensorType),
}

/// Behaviour every sensor backend exposes to the daemon.
pub trait SensorModule: Send + Sync {
    fn info(&self) -> &SensorInfo;

    fn sensor_type(&self) -> SensorType {
        self.info().sensor_type
    }

    /// Permission a client must hold to open this sensor.
    fn permission(&self) -> Permission {
        self.info().permission
    }

    /// Adds one start reference; the device is powered on the first one.
    fn start(&self) -> ModuleResult<()>;

    /// Drops one start reference; the device is powered off on the last one.
    fn stop(&self) -> ModuleResult<()>;

    fn is_started(&self) -> bool;

    /// Records a requested sampling interval. `is_batch` marks requests made
    /// through `SET_BATCH` as opposed to transient polling requests.
    fn add_interval(&self, requester: Requester, interval_us: u32, is_batch: bool)
        -> ModuleResult<()>;

    fn delete_interval(&self, requester: Requester, is_batch: bool) -> ModuleResult<()>;

    fn add_batch(&self, requester: Requester, latency_us: u32) -> ModuleResult<()>;

    fn delete_batch(&self, requester: Requester) -> ModuleResult<()>;

    /// Latest sample; a zero timestamp means none has been produced yet.
    fn get_data(&self) -> ModuleResult<SensorData>;

    fn set_attribute_int(&self, attribute: i32, value: i32) -> ModuleResult<()>;

    fn set_attribute_str(&self, attribute: i32, value: &[u8]) -> ModuleResult<()>;

    fn flush(&self) -> ModuleResult<()>;
}

/// Logs a compensating step that failed while unwinding an earlier error.
///
/// The original error is what the caller reports; this one only gets logged.
pub(crate) fn log_undo<T>(result: ModuleResult<T>, sensor: SensorType, step: &'static str) {
    if let Err(e) = result {
        warn!(%sensor, step, error = %e, "Rollback step failed");
    }
}
