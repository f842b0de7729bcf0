//! Client-side handle table.
//!
//! A handle is a process-local binding to one sensor. It carries the
//! application's view of the subscription: run state, option and the
//! registered event types with their callbacks and throttling state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use sensor_core::{EventType, Handle, SensorEvent, SensorOption, SensorState, SensorType};

use crate::error::{ClientError, Result};

/// Maximum number of handles one session may hold.
pub const MAX_HANDLES: usize = 256;

/// Invoked for every event delivered to a registration.
pub type EventCallback = Arc<dyn Fn(Handle, &SensorEvent) + Send + Sync>;

/// Invoked with `(handle, accuracy, timestamp)` when the accuracy changes.
pub type AccuracyCallback = Arc<dyn Fn(Handle, i32, u64) + Send + Sync>;

/// One registered event type on a handle.
#[derive(Clone)]
pub struct Registration {
    pub interval_us: u32,
    pub latency_us: u32,
    /// Fire once, then stay silent until registered again.
    pub one_shot: bool,
    pub callback: EventCallback,
    pub(crate) last_fired: Option<u64>,
    pub(crate) fired: bool,
}

impl Registration {
    pub fn new(interval_us: u32, latency_us: u32, one_shot: bool, callback: EventCallback) -> Self {
        Self {
            interval_us,
            latency_us,
            one_shot,
            callback,
            last_fired: None,
            fired: false,
        }
    }

    /// Decides whether an event at `timestamp` is delivered, and records it.
    pub(crate) fn admit(&mut self, timestamp: u64) -> bool {
        if self.one_shot && self.fired {
            return false;
        }
        if let Some(last) = self.last_fired {
            if timestamp < last.saturating_add(u64::from(self.interval_us)) {
                return false;
            }
        }
        self.last_fired = Some(timestamp);
        self.fired = true;
        true
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("interval_us", &self.interval_us)
            .field("latency_us", &self.latency_us)
            .field("one_shot", &self.one_shot)
            .field("last_fired", &self.last_fired)
            .field("fired", &self.fired)
            .finish_non_exhaustive()
    }
}

/// Local state of one handle.
#[derive(Clone)]
pub struct HandleState {
    pub sensor: SensorType,
    pub state: SensorState,
    pub option: SensorOption,
    pub registrations: BTreeMap<EventType, Registration>,
    pub accuracy_callback: Option<AccuracyCallback>,
    pub(crate) last_accuracy: Option<i32>,
}

impl HandleState {
    pub fn new(sensor: SensorType) -> Self {
        Self {
            sensor,
            state: SensorState::Stopped,
            option: SensorOption::Default,
            registrations: BTreeMap::new(),
            accuracy_callback: None,
            last_accuracy: None,
        }
    }

    /// Started or paused by the application.
    pub fn is_running(&self) -> bool {
        self.state != SensorState::Stopped
    }
}

impl fmt::Debug for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleState")
            .field("sensor", &self.sensor)
            .field("state", &self.state)
            .field("option", &self.option)
            .field("registrations", &self.registrations)
            .field("accuracy_callback", &self.accuracy_callback.is_some())
            .finish()
    }
}

/// All open handles, keyed by handle number.
#[derive(Debug, Default)]
pub struct HandleTable {
    entries: BTreeMap<Handle, HandleState>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Smallest handle number not in use.
    pub fn next_free(&self) -> Result<Handle> {
        if self.entries.len() >= MAX_HANDLES {
            return Err(ClientError::ResourceExhausted(format!(
                "handle table full ({MAX_HANDLES} handles)"
            )));
        }
        let mut candidate = 0;
        for handle in self.entries.keys() {
            if handle.as_i32() != candidate {
                break;
            }
            candidate += 1;
        }
        Ok(Handle::new(candidate))
    }

    /// Binds a new handle to `sensor`.
    pub fn insert(&mut self, sensor: SensorType) -> Result<Handle> {
        let handle = self.next_free()?;
        self.entries.insert(handle, HandleState::new(sensor));
        Ok(handle)
    }

    /// Puts a previously removed entry back under its old number.
    pub(crate) fn restore(&mut self, handle: Handle, state: HandleState) {
        self.entries.insert(handle, state);
    }

    pub fn get(&self, handle: Handle) -> Result<&HandleState> {
        self.entries
            .get(&handle)
            .ok_or(ClientError::InvalidHandle(handle))
    }

    pub fn get_mut(&mut self, handle: Handle) -> Result<&mut HandleState> {
        self.entries
            .get_mut(&handle)
            .ok_or(ClientError::InvalidHandle(handle))
    }

    pub fn remove(&mut self, handle: Handle) -> Result<HandleState> {
        self.entries
            .remove(&handle)
            .ok_or(ClientError::InvalidHandle(handle))
    }

    /// Handles bound to `sensor`.
    pub fn for_sensor(&self, sensor: SensorType) -> impl Iterator<Item = &HandleState> {
        self.entries
            .values()
            .filter(move |state| state.sensor == sensor)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &HandleState)> {
        self.entries.iter().map(|(handle, state)| (*handle, state))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle, &mut HandleState)> {
        self.entries.iter_mut().map(|(handle, state)| (*handle, state))
    }

    pub fn has_sensor(&self, sensor: SensorType) -> bool {
        self.for_sensor(sensor).next().is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
