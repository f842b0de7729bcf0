//! Server Session Registry.
//!
//! Maps each connected client to the sensors it has opened and the
//! subscription state of each. Command workers mutate it; the dispatcher reads
//! it to resolve listeners.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  open/close/update  ┌──────────────────────────────┐
//! │ CommandWorker   │────────────────────▶│ Registry (one mutex)         │
//! └─────────────────┘                     │  ClientId → ClientRecord     │
//! ┌─────────────────┐  attach/detach sink │    SensorType → SensorRecord │
//! │ EventChannel    │────────────────────▶│    EventSink                 │
//! └─────────────────┘                     └──────────────┬───────────────┘
//!                                                        │ listeners()
//!                                                        ▼
//!                                                   Dispatcher
//! ```
//!
//! A single mutex guards all state. Every method takes and releases it
//! internally, so the lock is never held across socket I/O.
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - Unknown clients and sensors are reported as `RegistryError`

mod error;
mod record;

pub use error::RegistryError;
pub use record::{ClientRecord, EventSink, SensorRecord, SinkError};

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, info};

use sensor_core::{ClientId, EventType, SensorOption, SensorState, SensorType, Situation};

/// Maximum number of simultaneously registered clients.
pub const MAX_CLIENTS: usize = 1024;

#[derive(Debug, Default)]
struct RegistryInner {
    next_id: i32,
    clients: HashMap<ClientId, ClientRecord>,
}

/// Registry of client records.
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Clients
    // ------------------------------------------------------------------

    /// Issues a fresh client id. Ids are never reused within a daemon run.
    pub fn create_client(&self, pid: i32, name: &str) -> Result<ClientId, RegistryError> {
        let mut inner = self.inner.lock();
        if inner.clients.len() >= MAX_CLIENTS {
            return Err(RegistryError::RegistryFull { max: MAX_CLIENTS });
        }
        inner.next_id = inner.next_id.wrapping_add(1).max(1);
        let client_id = ClientId::new(inner.next_id);
        inner.clients.insert(client_id, ClientRecord::new(pid, name));
        info!(%client_id, pid, name, "Client registered");
        Ok(client_id)
    }

    pub fn contains_client(&self, client_id: ClientId) -> bool {
        self.inner.lock().clients.contains_key(&client_id)
    }

    pub fn client_count(&self) -> usize {
        self.inner.lock().clients.len()
    }

    pub fn remove_client(&self, client_id: ClientId) -> Option<ClientRecord> {
        let removed = self.inner.lock().clients.remove(&client_id);
        if removed.is_some() {
            info!(%client_id, "Client removed");
        }
        removed
    }

    /// Removes the client if it has no open sensors. Returns true if removed.
    pub fn remove_client_if_idle(&self, client_id: ClientId) -> bool {
        let mut inner = self.inner.lock();
        let idle = inner
            .clients
            .get(&client_id)
            .is_some_and(|client| client.sensors.is_empty());
        if idle {
            inner.clients.remove(&client_id);
            info!(%client_id, "Idle client removed");
        }
        idle
    }

    // ------------------------------------------------------------------
    // Event sinks
    // ------------------------------------------------------------------

    /// Attaches the client's event channel, replacing any previous one.
    pub fn attach_sink(&self, client_id: ClientId, sink: EventSink) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        let client = inner
            .clients
            .get_mut(&client_id)
            .ok_or(RegistryError::UnknownClient(client_id))?;
        if client.sink.replace(sink).is_some() {
            debug!(%client_id, "Replaced event channel");
        }
        Ok(())
    }

    /// Detaches the sink with `sink_id`, leaving a newer sink in place.
    pub fn detach_sink(&self, client_id: ClientId, sink_id: u64) {
        let mut inner = self.inner.lock();
        if let Some(client) = inner.clients.get_mut(&client_id) {
            if client.sink.as_ref().is_some_and(|s| s.id() == sink_id) {
                client.sink = None;
            }
        }
    }

    pub fn sink(&self, client_id: ClientId) -> Option<EventSink> {
        self.inner
            .lock()
            .clients
            .get(&client_id)
            .and_then(|client| client.sink.clone())
    }

    // ------------------------------------------------------------------
    // Sensor records
    // ------------------------------------------------------------------

    /// Creates a stopped record for `sensor`.
    pub fn open_sensor(&self, client_id: ClientId, sensor: SensorType) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        let client = inner
            .clients
            .get_mut(&client_id)
            .ok_or(RegistryError::UnknownClient(client_id))?;
        if client.sensors.contains_key(&sensor) {
            return Err(RegistryError::SensorAlreadyOpen { client_id, sensor });
        }
        client.sensors.insert(sensor, SensorRecord::default());
        debug!(%client_id, %sensor, "Sensor record created");
        Ok(())
    }

    /// Removes the record. The client itself is removed with its last record.
    ///
    /// Returns the removed record and whether the client was removed too.
    pub fn close_sensor(
        &self,
        client_id: ClientId,
        sensor: SensorType,
    ) -> Result<(SensorRecord, bool), RegistryError> {
        let mut inner = self.inner.lock();
        let client = inner
            .clients
            .get_mut(&client_id)
            .ok_or(RegistryError::UnknownClient(client_id))?;
        let record = client
            .sensors
            .remove(&sensor)
            .ok_or(RegistryError::SensorNotOpen { client_id, sensor })?;
        let client_removed = client.sensors.is_empty();
        if client_removed {
            inner.clients.remove(&client_id);
            info!(%client_id, "Client removed with its last sensor");
        }
        debug!(%client_id, %sensor, "Sensor record removed");
        Ok((record, client_removed))
    }

    /// Runs `f` against the record while holding the lock.
    pub fn with_record<R>(
        &self,
        client_id: ClientId,
        sensor: SensorType,
        f: impl FnOnce(&mut SensorRecord) -> R,
    ) -> Result<R, RegistryError> {
        let mut inner = self.inner.lock();
        let client = inner
            .clients
            .get_mut(&client_id)
            .ok_or(RegistryError::UnknownClient(client_id))?;
        let record = client
            .sensors
            .get_mut(&sensor)
            .ok_or(RegistryError::SensorNotOpen { client_id, sensor })?;
        Ok(f(record))
    }

    pub fn record(&self, client_id: ClientId, sensor: SensorType) -> Option<SensorRecord> {
        self.with_record(client_id, sensor, |record| record.clone()).ok()
    }

    /// Marks the record started. Returns the previous state.
    pub fn start(&self, client_id: ClientId, sensor: SensorType) -> Result<SensorState, RegistryError> {
        self.with_record(client_id, sensor, |record| {
            std::mem::replace(&mut record.state, SensorState::Started)
        })
    }

    /// Marks the record stopped and drops its event registrations and option.
    /// Returns the previous state.
    pub fn stop(&self, client_id: ClientId, sensor: SensorType) -> Result<SensorState, RegistryError> {
        self.with_record(client_id, sensor, |record| {
            let previous = record.state;
            record.clear_subscription();
            previous
        })
    }

    pub fn set_option(
        &self,
        client_id: ClientId,
        sensor: SensorType,
        option: SensorOption,
    ) -> Result<(), RegistryError> {
        self.with_record(client_id, sensor, |record| record.option = option)
    }

    /// Returns true if the event type was not registered before.
    pub fn register_event(
        &self,
        client_id: ClientId,
        sensor: SensorType,
        event_type: EventType,
    ) -> Result<bool, RegistryError> {
        self.with_record(client_id, sensor, |record| record.events.insert(event_type))
    }

    /// Returns true if the event type was registered.
    pub fn unregister_event(
        &self,
        client_id: ClientId,
        sensor: SensorType,
        event_type: EventType,
    ) -> Result<bool, RegistryError> {
        self.with_record(client_id, sensor, |record| record.events.remove(&event_type))
    }

    pub fn set_batch(
        &self,
        client_id: ClientId,
        sensor: SensorType,
        interval_us: u32,
        latency_us: u32,
    ) -> Result<(), RegistryError> {
        self.with_record(client_id, sensor, |record| {
            record.interval_us = interval_us;
            record.latency_us = latency_us;
        })
    }

    pub fn unset_batch(&self, client_id: ClientId, sensor: SensorType) -> Result<(), RegistryError> {
        self.set_batch(client_id, sensor, 0, 0)
    }

    pub fn set_wakeup(
        &self,
        client_id: ClientId,
        sensor: SensorType,
        wakeup: bool,
    ) -> Result<(), RegistryError> {
        self.with_record(client_id, sensor, |record| record.wakeup = wakeup)
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Event sinks of every client entitled to `event_type` under `situation`.
    pub fn listeners(&self, event_type: EventType, situation: Situation) -> Vec<(ClientId, EventSink)> {
        let Some(sensor) = event_type.sensor_type() else {
            return Vec::new();
        };
        let inner = self.inner.lock();
        inner
            .clients
            .iter()
            .filter(|(_, client)| {
                client
                    .sensors
                    .get(&sensor)
                    .is_some_and(|record| record.accepts(event_type, situation))
            })
            .filter_map(|(id, client)| client.sink.clone().map(|sink| (*id, sink)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    const ACCEL: SensorType = SensorType::Accelerometer;
    const RAW: EventType = EventType::ACCELEROMETER_RAW_DATA;

    fn sink(id: u64) -> (EventSink, mpsc::Receiver<bytes::Bytes>) {
        let (tx, rx) = mpsc::channel(8);
        (EventSink::new(id, tx), rx)
    }

    #[test]
    fn test_client_ids_are_monotonic() {
        let registry = Registry::new();
        let a = registry.create_client(10, "a").unwrap();
        let b = registry.create_client(11, "b").unwrap();
        assert!(b > a);
        registry.remove_client(b);
        let c = registry.create_client(12, "c").unwrap();
        assert!(c > b);
    }

    #[test]
    fn test_last_sensor_removes_client() {
        let registry = Registry::new();
        let id = registry.create_client(1, "app").unwrap();
        registry.open_sensor(id, ACCEL).unwrap();
        registry.open_sensor(id, SensorType::Light).unwrap();

        let (_, removed) = registry.close_sensor(id, ACCEL).unwrap();
        assert!(!removed);
        let (_, removed) = registry.close_sensor(id, SensorType::Light).unwrap();
        assert!(removed);
        assert!(!registry.contains_client(id));
    }

    #[test]
    fn test_open_twice_fails() {
        let registry = Registry::new();
        let id = registry.create_client(1, "app").unwrap();
        registry.open_sensor(id, ACCEL).unwrap();
        assert!(matches!(
            registry.open_sensor(id, ACCEL),
            Err(RegistryError::SensorAlreadyOpen { .. })
        ));
    }

    #[test]
    fn test_unknown_client() {
        let registry = Registry::new();
        let err = registry.open_sensor(ClientId::new(99), ACCEL).unwrap_err();
        assert_eq!(err, RegistryError::UnknownClient(ClientId::new(99)));
    }

    #[test]
    fn test_stop_clears_subscription() {
        let registry = Registry::new();
        let id = registry.create_client(1, "app").unwrap();
        registry.open_sensor(id, ACCEL).unwrap();
        registry.set_option(id, ACCEL, SensorOption::AlwaysOn).unwrap();
        assert!(registry.register_event(id, ACCEL, RAW).unwrap());
        assert!(!registry.register_event(id, ACCEL, RAW).unwrap());
        registry.start(id, ACCEL).unwrap();

        assert_eq!(registry.stop(id, ACCEL).unwrap(), SensorState::Started);
        let record = registry.record(id, ACCEL).unwrap();
        assert_eq!(record.state, SensorState::Stopped);
        assert!(record.events.is_empty());
        assert_eq!(record.option, SensorOption::Default);
    }

    #[test]
    fn test_listeners_follow_state_and_situation() {
        let registry = Registry::new();
        let a = registry.create_client(1, "a").unwrap();
        let b = registry.create_client(2, "b").unwrap();
        for (id, sink_id) in [(a, 1), (b, 2)] {
            registry.open_sensor(id, ACCEL).unwrap();
            registry.register_event(id, ACCEL, RAW).unwrap();
            registry.start(id, ACCEL).unwrap();
            registry.attach_sink(id, sink(sink_id).0).unwrap();
        }
        registry.set_option(b, ACCEL, SensorOption::AlwaysOn).unwrap();

        assert_eq!(registry.listeners(RAW, Situation::ScreenOn).len(), 2);
        let off = registry.listeners(RAW, Situation::ScreenOff);
        assert_eq!(off.len(), 1);
        assert_eq!(off[0].0, b);
        assert!(registry.listeners(EventType::LIGHT_LUX_DATA, Situation::ScreenOn).is_empty());
    }

    #[test]
    fn test_detach_keeps_newer_sink() {
        let registry = Registry::new();
        let id = registry.create_client(1, "app").unwrap();
        registry.attach_sink(id, sink(1).0).unwrap();
        registry.attach_sink(id, sink(2).0).unwrap();
        registry.detach_sink(id, 1);
        assert_eq!(registry.sink(id).map(|s| s.id()), Some(2));
        registry.detach_sink(id, 2);
        assert!(registry.sink(id).is_none());
    }

    #[test]
    fn test_remove_if_idle() {
        let registry = Registry::new();
        let id = registry.create_client(1, "app").unwrap();
        registry.open_sensor(id, ACCEL).unwrap();
        assert!(!registry.remove_client_if_idle(id));
        registry.close_sensor(id, ACCEL).unwrap();
        // closing the last sensor already removed it
        assert!(!registry.remove_client_if_idle(id));

        let idle = registry.create_client(2, "idle").unwrap();
        assert!(registry.remove_client_if_idle(idle));
    }
}
