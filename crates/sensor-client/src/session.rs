//! Client session: the handle-based API over the daemon's sockets.
//!
//! A [`SensorSession`] is owned by the embedding application. It keeps one
//! command channel per opened sensor type, one event channel per session, and
//! a handle table guarded by a single async mutex.
//!
//! Every mutating call follows the same transaction:
//!
//! 1. take the session lock
//! 2. back up the handle's state and apply the change locally
//! 3. diff the sensor's acknowledged [`Rep`] against the one now implied by
//!    the handle table, and send only the implied commands
//! 4. on any failure, restore the backup and send the inverse of every
//!    command the daemon already acknowledged
//!
//! The lock is held across the wire round trip, so control calls from
//! different tasks of one process are serialized.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use sensor_core::{
    ClientId, EventType, Handle, PowerState, SensorData, SensorInfo, SensorOption, SensorState,
    SensorType,
};
use sensor_protocol::{PacketKind, ProtocolError, Reply, Request};

use crate::channel::{CommandChannel, EventChannel};
use crate::config::ClientConfig;
use crate::error::{check_status, ClientError, Result};
use crate::handle::{AccuracyCallback, EventCallback, HandleState, HandleTable, Registration};
use crate::listener::EventListener;
use crate::power::PowerObserver;
use crate::rep::{diff, Rep, WireOp};

// ============================================================================
// Public API
// ============================================================================

/// Parameters of one event registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventRequest {
    /// Requested sampling interval in microseconds; zero leaves the module's
    /// default in place.
    pub interval_us: u32,
    /// Tolerated delivery latency in microseconds.
    pub latency_us: u32,
    /// Deliver a single event, then stay silent until registered again.
    pub one_shot: bool,
}

impl EventRequest {
    pub fn interval(interval_us: u32) -> Self {
        Self {
            interval_us,
            ..Self::default()
        }
    }
}

/// Connection of one process to the sensor daemon.
///
/// Cloning is cheap; clones share the same handles and sockets.
///
/// # Example
///
/// ```no_run
/// use sensor_client::{ClientConfig, EventRequest, SensorSession};
/// use sensor_core::{EventType, SensorOption, SensorType};
/// use std::sync::Arc;
///
/// # async fn demo() -> sensor_client::Result<()> {
/// let session = SensorSession::new(ClientConfig::default());
/// let handle = session.connect(SensorType::Accelerometer).await?;
/// session
///     .register_event(
///         handle,
///         EventType::ACCELEROMETER_RAW_DATA,
///         EventRequest::interval(100_000),
///         Arc::new(|_, event| println!("{:?}", event.data.values)),
///     )
///     .await?;
/// session.start(handle, SensorOption::Default).await?;
/// // ...
/// session.disconnect(handle).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SensorSession {
    config: Arc<ClientConfig>,
    inner: Arc<Mutex<SessionState>>,
}

impl SensorSession {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(SessionState::default())),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Client id assigned by the daemon, while any sensor is open.
    pub async fn client_id(&self) -> Option<ClientId> {
        self.inner.lock().await.client_id
    }

    /// Sensors served by the daemon. Fetched once and cached.
    pub async fn sensor_list(&self) -> Result<Vec<SensorInfo>> {
        let mut state = self.inner.lock().await;
        state.load_sensor_list(&self.config).await?;
        Ok(state.sensor_list.clone().unwrap_or_default())
    }

    /// Opens a new handle bound to `sensor`.
    pub async fn connect(&self, sensor: SensorType) -> Result<Handle> {
        let mut state = self.inner.lock().await;
        state.load_sensor_list(&self.config).await?;
        if !state.lists(sensor) {
            return Err(ClientError::UnsupportedSensor(sensor));
        }
        // Fail on a full table before any wire traffic.
        state.handles.next_free()?;

        if !state.links.contains_key(&sensor) {
            if let Err(e) = self.open_link(&mut state, sensor).await {
                if state.handles.is_empty() {
                    state.release_process(&self.config).await;
                }
                return Err(e);
            }
        }

        let handle = state.handles.insert(sensor)?;
        debug!(%handle, %sensor, "Handle connected");
        Ok(handle)
    }

    /// Closes `handle`, releasing the sensor (and the client id) once nothing
    /// else uses it.
    pub async fn disconnect(&self, handle: Handle) -> Result<()> {
        let mut state = self.inner.lock().await;
        state.disconnect(handle, &self.config).await
    }

    /// Starts delivery on `handle` with the given option.
    ///
    /// A `Default`-option handle started while the system saves power stays
    /// paused until power returns to normal.
    pub async fn start(&self, handle: Handle, option: SensorOption) -> Result<()> {
        let mut state = self.inner.lock().await;
        let run_state = if option == SensorOption::Default {
            state.power.desired_run_state()
        } else {
            SensorState::Started
        };
        state
            .transact(handle, |entry| {
                entry.option = option;
                entry.state = run_state;
                Ok(())
            })
            .await
    }

    pub async fn stop(&self, handle: Handle) -> Result<()> {
        let mut state = self.inner.lock().await;
        state
            .transact(handle, |entry| {
                entry.state = SensorState::Stopped;
                Ok(())
            })
            .await
    }

    /// Registers `callback` for `event_type` on `handle`.
    ///
    /// Registering again with the same parameters sends nothing; it only
    /// replaces the callback and resets one-shot and throttling state.
    pub async fn register_event(
        &self,
        handle: Handle,
        event_type: EventType,
        request: EventRequest,
        callback: EventCallback,
    ) -> Result<()> {
        let mut state = self.inner.lock().await;
        state
            .transact(handle, |entry| {
                if event_type.sensor_type() != Some(entry.sensor) {
                    return Err(ClientError::InvalidState(format!(
                        "{event_type} is not emitted by {}",
                        entry.sensor
                    )));
                }
                entry.registrations.insert(
                    event_type,
                    Registration::new(
                        request.interval_us,
                        request.latency_us,
                        request.one_shot,
                        callback,
                    ),
                );
                Ok(())
            })
            .await
    }

    /// Removes the registration for `event_type`. Unknown types are ignored.
    pub async fn unregister_event(&self, handle: Handle, event_type: EventType) -> Result<()> {
        let mut state = self.inner.lock().await;
        state
            .transact(handle, |entry| {
                entry.registrations.remove(&event_type);
                Ok(())
            })
            .await
    }

    pub async fn set_option(&self, handle: Handle, option: SensorOption) -> Result<()> {
        let mut state = self.inner.lock().await;
        let power = state.power;
        state
            .transact(handle, |entry| {
                entry.option = option;
                if entry.is_running() {
                    entry.state = match option {
                        SensorOption::AlwaysOn => SensorState::Started,
                        SensorOption::Default => power.desired_run_state(),
                    };
                }
                Ok(())
            })
            .await
    }

    pub async fn change_interval(
        &self,
        handle: Handle,
        event_type: EventType,
        interval_us: u32,
    ) -> Result<()> {
        let mut state = self.inner.lock().await;
        state
            .transact(handle, |entry| {
                registration_mut(entry, event_type)?.interval_us = interval_us;
                Ok(())
            })
            .await
    }

    pub async fn change_latency(
        &self,
        handle: Handle,
        event_type: EventType,
        latency_us: u32,
    ) -> Result<()> {
        let mut state = self.inner.lock().await;
        state
            .transact(handle, |entry| {
                registration_mut(entry, event_type)?.latency_us = latency_us;
                Ok(())
            })
            .await
    }

    /// Installs a callback fired whenever the accuracy of delivered events
    /// changes. Local only.
    pub async fn set_accuracy_callback(&self, handle: Handle, callback: AccuracyCallback) -> Result<()> {
        let mut state = self.inner.lock().await;
        let entry = state.handles.get_mut(handle)?;
        entry.accuracy_callback = Some(callback);
        entry.last_accuracy = None;
        Ok(())
    }

    pub async fn unset_accuracy_callback(&self, handle: Handle) -> Result<()> {
        let mut state = self.inner.lock().await;
        state.handles.get_mut(handle)?.accuracy_callback = None;
        Ok(())
    }

    /// Local run state of `handle`.
    pub async fn state(&self, handle: Handle) -> Result<SensorState> {
        Ok(self.inner.lock().await.handles.get(handle)?.state)
    }

    /// Latest sample of the handle's sensor. The sensor must be started.
    pub async fn get_data(&self, handle: Handle) -> Result<SensorData> {
        let mut state = self.inner.lock().await;
        let (sensor, link) = state.link_for(handle)?;
        match link.channel.request(&Request::GetData).await? {
            Reply::GetDataDone { state: status, data } => {
                check_status(status, sensor)?;
                Ok(data)
            }
            other => {
                check_status(other.status_value(), sensor)?;
                Err(unexpected(PacketKind::GetDataDone, &other))
            }
        }
    }

    /// Asks the sensor to deliver its buffered batch now.
    pub async fn flush(&self, handle: Handle) -> Result<()> {
        self.simple_request(handle, Request::Flush).await
    }

    pub async fn set_attribute_int(&self, handle: Handle, attribute: i32, value: i32) -> Result<()> {
        self.simple_request(handle, Request::SetAttributeInt { attribute, value })
            .await
    }

    pub async fn set_attribute_str(
        &self,
        handle: Handle,
        attribute: i32,
        value: impl Into<Bytes>,
    ) -> Result<()> {
        self.simple_request(
            handle,
            Request::SetAttributeStr {
                attribute,
                value: value.into(),
            },
        )
        .await
    }

    /// Follows `source` for system power changes.
    ///
    /// The observer runs while any handle is open; a later call replaces the
    /// source.
    pub async fn observe_power(&self, source: watch::Receiver<PowerState>) {
        let mut state = self.inner.lock().await;
        if let Some(observer) = state.power_observer.take() {
            observer.stop(self.config.listener_stop_timeout).await;
        }
        state.power_source = Some(source.clone());
        if !state.handles.is_empty() {
            state.power_observer = Some(PowerObserver::spawn(source, Arc::downgrade(&self.inner)));
        }
    }

    /// Disconnects every open handle.
    ///
    /// The daemon releases whatever a vanished process held, but an orderly
    /// shutdown lets it do so with the normal command sequence.
    pub async fn shutdown(&self) {
        let mut state = self.inner.lock().await;
        let handles: Vec<Handle> = state.handles.iter().map(|(handle, _)| handle).collect();
        for handle in handles {
            if let Err(e) = state.disconnect(handle, &self.config).await {
                warn!(%handle, error = %e, "Disconnect failed during shutdown");
                state.handles.remove(handle).ok();
            }
        }
        state.links.clear();
        state.release_process(&self.config).await;
        info!("Sensor session shut down");
    }

    async fn simple_request(&self, handle: Handle, request: Request) -> Result<()> {
        let mut state = self.inner.lock().await;
        let (sensor, link) = state.link_for(handle)?;
        let reply = link.channel.request(&request).await?;
        check_status(reply.status_value(), sensor)
    }

    /// Opens the command channel for `sensor`, obtaining the client id and the
    /// event channel first if this is the process's first sensor.
    async fn open_link(&self, state: &mut SessionState, sensor: SensorType) -> Result<()> {
        let mut channel =
            CommandChannel::connect(&self.config.command_socket, self.config.receive_timeout).await?;

        let client_id = match state.client_id {
            Some(client_id) => client_id,
            None => self.register_process(state, &mut channel).await?,
        };

        let reply = channel.request(&Request::Hello { client_id, sensor }).await?;
        check_status(reply.status_value(), sensor)?;
        debug!(%client_id, %sensor, "Sensor opened");

        state.links.insert(sensor, SensorLink::new(channel));
        Ok(())
    }

    async fn register_process(
        &self,
        state: &mut SessionState,
        channel: &mut CommandChannel,
    ) -> Result<ClientId> {
        let request = Request::GetId {
            pid: std::process::id() as i32,
            name: self.config.process_name.clone(),
        };
        let client_id = match channel.request(&request).await? {
            Reply::GetIdDone { client_id } => client_id,
            other => return Err(unexpected(PacketKind::GetIdDone, &other)),
        };

        let events = EventChannel::connect(
            &self.config.event_socket,
            client_id,
            self.config.receive_timeout,
        )
        .await?;

        let weak = Arc::downgrade(&self.inner);
        state.client_id = Some(client_id);
        state.listener = Some(EventListener::spawn(events, weak.clone()));
        if let Some(source) = state.power_source.clone() {
            state.power_observer = Some(PowerObserver::spawn(source, weak));
        }
        info!(%client_id, "Registered with sensor daemon");
        Ok(client_id)
    }
}

fn registration_mut(entry: &mut HandleState, event_type: EventType) -> Result<&mut Registration> {
    entry
        .registrations
        .get_mut(&event_type)
        .ok_or_else(|| ClientError::InvalidState(format!("{event_type} is not registered")))
}

fn unexpected(expected: PacketKind, reply: &Reply) -> ClientError {
    ProtocolError::UnexpectedPacket {
        expected,
        got: reply.kind(),
    }
    .into()
}

// ============================================================================
// Session state
// ============================================================================

/// Command channel of one sensor and the state the daemon acknowledged on it.
pub(crate) struct SensorLink {
    channel: CommandChannel,
    acked: Rep,
}

impl SensorLink {
    fn new(channel: CommandChannel) -> Self {
        Self {
            channel,
            acked: Rep::inactive(),
        }
    }

    async fn send(&mut self, op: WireOp, sensor: SensorType) -> Result<()> {
        let reply = self.channel.request(&op.to_request()).await?;
        check_status(reply.status_value(), sensor)
    }

    /// Undoes `applied`, newest first, returning the daemon to `acked`.
    async fn roll_back(&mut self, applied: &[WireOp], sensor: SensorType) {
        for op in applied.iter().rev() {
            let Some(inverse) = op.inverse(&self.acked) else {
                continue;
            };
            if let Err(e) = self.send(inverse, sensor).await {
                warn!(%sensor, op = ?inverse, error = %e, "Rollback command failed");
                return;
            }
        }
    }
}

/// Everything behind the session lock.
#[derive(Default)]
pub(crate) struct SessionState {
    pub(crate) client_id: Option<ClientId>,
    pub(crate) handles: HandleTable,
    links: HashMap<SensorType, SensorLink>,
    sensor_list: Option<Vec<SensorInfo>>,
    listener: Option<EventListener>,
    power: PowerState,
    power_source: Option<watch::Receiver<PowerState>>,
    power_observer: Option<PowerObserver>,
}

impl SessionState {
    async fn load_sensor_list(&mut self, config: &ClientConfig) -> Result<()> {
        if self.sensor_list.is_some() {
            return Ok(());
        }
        let mut channel = CommandChannel::connect(&config.command_socket, config.receive_timeout).await?;
        match channel.request(&Request::GetSensorList).await? {
            Reply::GetSensorListDone { sensors } => {
                debug!(count = sensors.len(), "Sensor list loaded");
                self.sensor_list = Some(sensors);
                Ok(())
            }
            other => Err(unexpected(PacketKind::GetSensorListDone, &other)),
        }
    }

    fn lists(&self, sensor: SensorType) -> bool {
        self.sensor_list
            .iter()
            .flatten()
            .any(|info| info.sensor_type == sensor)
    }

    fn link_for(&mut self, handle: Handle) -> Result<(SensorType, &mut SensorLink)> {
        let sensor = self.handles.get(handle)?.sensor;
        let link = self.links.get_mut(&sensor).ok_or(ClientError::NotConnected)?;
        Ok((sensor, link))
    }

    /// Applies `change` to one handle and brings the daemon in line with it,
    /// restoring the handle on any failure.
    async fn transact<F>(&mut self, handle: Handle, change: F) -> Result<()>
    where
        F: FnOnce(&mut HandleState) -> Result<()>,
    {
        let backup = self.handles.get(handle)?.clone();
        let sensor = backup.sensor;

        let result = match change(self.handles.get_mut(handle)?) {
            Ok(()) => self.sync_sensor(sensor).await,
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.handles.restore(handle, backup);
        }
        result
    }

    /// Sends the commands that move the daemon's view of `sensor` to what the
    /// handle table now implies.
    pub(crate) async fn sync_sensor(&mut self, sensor: SensorType) -> Result<()> {
        let target = Rep::from_handles(self.handles.for_sensor(sensor));
        let link = self.links.get_mut(&sensor).ok_or(ClientError::NotConnected)?;

        let ops = diff(&link.acked, &target);
        if ops.is_empty() {
            return Ok(());
        }
        debug!(%sensor, ?ops, "Syncing sensor");

        let mut applied = Vec::with_capacity(ops.len());
        for op in ops {
            if let Err(e) = link.send(op, sensor).await {
                warn!(%sensor, ?op, error = %e, "Command failed, rolling back");
                link.roll_back(&applied, sensor).await;
                return Err(e);
            }
            applied.push(op);
        }
        link.acked = target;
        Ok(())
    }

    async fn disconnect(&mut self, handle: Handle, config: &ClientConfig) -> Result<()> {
        let removed = self.handles.remove(handle)?;
        let sensor = removed.sensor;
        if let Err(e) = self.sync_sensor(sensor).await {
            self.handles.restore(handle, removed);
            return Err(e);
        }

        if !self.handles.has_sensor(sensor) {
            if let Some(mut link) = self.links.remove(&sensor) {
                match link.channel.request(&Request::ByeBye).await {
                    Ok(reply) => {
                        if let Err(e) = check_status(reply.status_value(), sensor) {
                            warn!(%sensor, error = %e, "BYEBYE refused");
                        }
                    }
                    Err(e) => warn!(%sensor, error = %e, "BYEBYE failed"),
                }
            }
            debug!(%sensor, "Sensor closed");
        }

        if self.handles.is_empty() {
            self.release_process(config).await;
        }
        debug!(%handle, "Handle disconnected");
        Ok(())
    }

    /// Forgets the client id and stops the per-process tasks.
    async fn release_process(&mut self, config: &ClientConfig) {
        if let Some(client_id) = self.client_id.take() {
            debug!(%client_id, "Client id released");
        }
        if let Some(listener) = self.listener.take() {
            listener.stop(config.listener_stop_timeout).await;
        }
        if let Some(observer) = self.power_observer.take() {
            observer.stop(config.listener_stop_timeout).await;
        }
    }

    /// Pauses or resumes `Default`-option handles for a new power state.
    pub(crate) async fn apply_power(&mut self, power: PowerState) {
        if self.power == power {
            return;
        }
        info!(?power, "Power state changed");
        self.power = power;
        let desired = power.desired_run_state();

        let mut backups = Vec::new();
        let mut touched = BTreeSet::new();
        for (handle, entry) in self.handles.iter_mut() {
            if entry.option != SensorOption::Default || !entry.is_running() || entry.state == desired {
                continue;
            }
            backups.push((handle, entry.clone()));
            entry.state = desired;
            touched.insert(entry.sensor);
        }

        for sensor in touched {
            if let Err(e) = self.sync_sensor(sensor).await {
                warn!(%sensor, error = %e, "Power change not applied");
                for (handle, backup) in backups.iter().filter(|(_, b)| b.sensor == sensor) {
                    self.handles.restore(*handle, backup.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let session = SensorSession::new(ClientConfig::with_socket_dir(dir.path()));
        assert!(matches!(
            session.connect(SensorType::Accelerometer).await,
            Err(ClientError::Io(_))
        ));
        assert!(session.client_id().await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_handle_sends_nothing() {
        let session = SensorSession::new(ClientConfig::with_socket_dir("/nonexistent"));
        let handle = Handle::new(3);
        assert!(matches!(
            session.start(handle, SensorOption::Default).await,
            Err(ClientError::InvalidHandle(_))
        ));
        assert!(matches!(session.get_data(handle).await, Err(ClientError::InvalidHandle(_))));
        assert!(matches!(session.disconnect(handle).await, Err(ClientError::InvalidHandle(_))));
    }

    #[tokio::test]
    async fn test_power_change_without_handles() {
        let mut state = SessionState::default();
        state.apply_power(PowerState::PowerSaving).await;
        assert_eq!(state.power, PowerState::PowerSaving);
    }
}
