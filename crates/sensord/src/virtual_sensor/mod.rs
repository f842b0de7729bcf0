//! Virtual (derived) sensors.
//!
//! A virtual sensor declares the raw sensors it depends on and synthesizes
//! derived events from their raw events. [`VirtualSensorModule`] exposes it to
//! clients as an ordinary [`SensorModule`]: starting it starts its inputs, and
//! the dispatcher feeds it raw events only while it is active and every input
//! has produced at least one sample since activation.
//!
//! # Architecture
//!
//! ```text
//!  raw event ──▶ VirtualSensorModule::feed ──▶ ready? ──▶ VirtualSensor::synthesize
//!                     │                                         │
//!                     └── marks input as seen                   ▼
//!                                                        derived events
//! ```

mod auto_rotation;
mod gravity;
mod orientation;

pub use auto_rotation::AutoRotationSensor;
pub use gravity::GravitySensor;
pub use orientation::OrientationSensor;

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use sensor_core::{
    EventType, ModuleError, ModuleResult, SensorData, SensorEvent, SensorInfo, SensorType,
};

use crate::module::{log_undo, ModuleCore, Requester, SensorModule};

/// Interval requested from inputs when clients have not asked for one.
const DEFAULT_INPUT_INTERVAL_US: u32 = 100_000;

/// Synthesis contract of a derived sensor.
pub trait VirtualSensor: Send {
    fn info(&self) -> SensorInfo;

    /// Raw sensors whose events this sensor consumes.
    fn inputs(&self) -> &'static [SensorType];

    /// Derives zero or more events from one raw input event.
    fn synthesize(&mut self, event: &SensorEvent) -> Vec<SensorEvent>;

    /// Latest derived value for `event_type` (poll path).
    fn sensor_data(&self, event_type: EventType) -> ModuleResult<SensorData>;

    /// Clears filter state when the sensor is deactivated.
    fn reset(&mut self) {}
}

/// Builds the reference virtual sensor for `sensor_type`.
pub fn reference_sensor(sensor_type: SensorType) -> Option<Box<dyn VirtualSensor>> {
    match sensor_type {
        SensorType::Gravity => Some(Box::new(GravitySensor::new())),
        SensorType::AutoRotation => Some(Box::new(AutoRotationSensor::new())),
        SensorType::Orientation => Some(Box::new(OrientationSensor::new())),
        _ => None,
    }
}

// ============================================================================
// Module adapter
// ============================================================================

struct AdapterState {
    sensor: Box<dyn VirtualSensor>,
    /// Inputs that produced a sample since activation.
    seen: HashSet<SensorType>,
}

/// Exposes a [`VirtualSensor`] as a [`SensorModule`].
pub struct VirtualSensorModule {
    core: ModuleCore,
    inputs: Vec<Arc<dyn SensorModule>>,
    input_types: &'static [SensorType],
    state: Mutex<AdapterState>,
}

impl VirtualSensorModule {
    /// Wraps `sensor`, resolving each declared input to a module.
    pub fn new(sensor: Box<dyn VirtualSensor>, inputs: Vec<Arc<dyn SensorModule>>) -> Self {
        let info = sensor.info();
        let input_types = sensor.inputs();
        Self {
            core: ModuleCore::new(info),
            inputs,
            input_types,
            state: Mutex::new(AdapterState {
                sensor,
                seen: HashSet::new(),
            }),
        }
    }

    pub fn input_types(&self) -> &'static [SensorType] {
        self.input_types
    }

    fn requester(&self) -> Requester {
        Requester::Virtual(self.core.info().sensor_type)
    }

    fn input_interval(&self) -> u32 {
        self.core.interval_us().unwrap_or(DEFAULT_INPUT_INTERVAL_US)
    }

    fn push_input_interval(&self) -> ModuleResult<()> {
        let interval = self.input_interval();
        for input in &self.inputs {
            input.add_interval(self.requester(), interval, true)?;
        }
        Ok(())
    }

    fn start_inputs(&self) -> ModuleResult<()> {
        let mut started: Vec<&Arc<dyn SensorModule>> = Vec::new();
        for input in &self.inputs {
            let result = input
                .add_interval(self.requester(), self.input_interval(), true)
                .and_then(|()| input.start());
            if let Err(e) = result {
                warn!(
                    sensor = %self.core.info().sensor_type,
                    input = %input.sensor_type(),
                    error = %e,
                    "Failed to start virtual sensor input"
                );
                for prior in started {
                    log_undo(prior.stop(), prior.sensor_type(), "stop input");
                    log_undo(
                        prior.delete_interval(self.requester(), true),
                        prior.sensor_type(),
                        "withdraw input interval",
                    );
                }
                log_undo(
                    input.delete_interval(self.requester(), true),
                    input.sensor_type(),
                    "withdraw input interval",
                );
                return Err(ModuleError::StartFailed(format!(
                    "input {} failed: {e}",
                    input.sensor_type()
                )));
            }
            started.push(input);
        }
        Ok(())
    }

    fn stop_inputs(&self) {
        for input in &self.inputs {
            if let Err(e) = input.stop() {
                warn!(input = %input.sensor_type(), error = %e, "Failed to stop virtual sensor input");
            }
            log_undo(
                input.delete_interval(self.requester(), true),
                input.sensor_type(),
                "withdraw input interval",
            );
        }
    }

    /// True when active and every input has produced a sample.
    pub fn is_ready(&self) -> bool {
        if !self.core.is_started() {
            return false;
        }
        let state = self.state.lock();
        self.input_types.iter().all(|t| state.seen.contains(t))
    }

    /// Offers one raw event; returns whatever the sensor derives from it.
    ///
    /// Events from non-inputs, or arriving while inactive, yield nothing.
    pub fn feed(&self, event: &SensorEvent) -> Vec<SensorEvent> {
        if !self.core.is_started() {
            return Vec::new();
        }
        let Some(source) = event.sensor_type() else {
            return Vec::new();
        };
        if !self.input_types.contains(&source) {
            return Vec::new();
        }

        let mut state = self.state.lock();
        state.seen.insert(source);
        if !self.input_types.iter().all(|t| state.seen.contains(t)) {
            return Vec::new();
        }

        let derived = state.sensor.synthesize(event);
        if let Some(last) = derived.last() {
            self.core.store(last.data.clone());
        }
        derived
    }
}

impl SensorModule for VirtualSensorModule {
    fn info(&self) -> &SensorInfo {
        self.core.info()
    }

    fn start(&self) -> ModuleResult<()> {
        if self.core.acquire() {
            debug!(sensor = %self.core.info().sensor_type, "Activating virtual sensor");
            {
                let mut state = self.state.lock();
                state.seen.clear();
                state.sensor.reset();
            }
            if let Err(e) = self.start_inputs() {
                log_undo(self.core.release(), self.core.info().sensor_type, "release");
                return Err(e);
            }
        }
        Ok(())
    }

    fn stop(&self) -> ModuleResult<()> {
        if self.core.release()? {
            debug!(sensor = %self.core.info().sensor_type, "Deactivating virtual sensor");
            self.stop_inputs();
            let mut state = self.state.lock();
            state.seen.clear();
            state.sensor.reset();
        }
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.core.is_started()
    }

    fn add_interval(
        &self,
        requester: Requester,
        interval_us: u32,
        _is_batch: bool,
    ) -> ModuleResult<()> {
        self.core.add_interval(requester, interval_us)?;
        self.push_input_interval()
    }

    fn delete_interval(&self, requester: Requester, _is_batch: bool) -> ModuleResult<()> {
        self.core.delete_interval(requester);
        if self.core.is_started() {
            self.push_input_interval()?;
        }
        Ok(())
    }

    fn add_batch(&self, requester: Requester, latency_us: u32) -> ModuleResult<()> {
        self.core.add_batch(requester, latency_us);
        Ok(())
    }

    fn delete_batch(&self, requester: Requester) -> ModuleResult<()> {
        self.core.delete_batch(requester);
        Ok(())
    }

    fn get_data(&self) -> ModuleResult<SensorData> {
        let state = self.state.lock();
        let Some(event_type) = self.core.info().event_types.first().copied() else {
            return Err(ModuleError::Unsupported);
        };
        match state.sensor.sensor_data(event_type) {
            Ok(data) => Ok(data),
            Err(ModuleError::NoData) => Ok(SensorData::default()),
            Err(e) => Err(e),
        }
    }

    fn set_attribute_int(&self, _attribute: i32, _value: i32) -> ModuleResult<()> {
        Err(ModuleError::Unsupported)
    }

    fn set_attribute_str(&self, _attribute: i32, _value: &[u8]) -> ModuleResult<()> {
        Err(ModuleError::Unsupported)
    }

    fn flush(&self) -> ModuleResult<()> {
        for input in &self.inputs {
            input.flush()?;
        }
        Ok(())
    }
}
