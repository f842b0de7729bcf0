//! Command worker for a single command connection.
//!
//! Each accepted command connection gets its own `CommandWorker` that:
//! - Reads one request at a time and answers with exactly one reply
//! - Binds the connection to one (client, sensor) pair on `HELLO`
//! - Drives the bound Sensor Module and the Registry
//! - Releases everything it contributed when the peer vanishes
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Framing errors are logged and result in an implicit disconnect; a
//!   well-framed request with an out-of-range field gets `INVALID_ARGUMENT`

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio::time::{sleep, timeout};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use sensor_core::{
    attribute, ClientId, EventType, ModuleError, Permission, SensorData, SensorState, SensorType,
};
use sensor_protocol::{encode_event_frame, status, PacketCodec, ProtocolError, Reply, Request};

use crate::context::DaemonContext;
use crate::module::{Requester, SensorModule};
use crate::permission::PeerInfo;
use crate::registry::RegistryError;

/// Write timeout for one reply.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval requested while waiting for the first sample of `GET_DATA`.
const WARM_UP_INTERVAL_US: u32 = 10_000;

/// Attempts made to read a first sample before giving up.
const WARM_UP_RETRIES: u32 = 5;

/// Pause between warm-up attempts.
const WARM_UP_SLEEP: Duration = Duration::from_millis(20);

/// Errors that end a command connection.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Write timeout")]
    WriteTimeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The (client, sensor) pair a connection serves after `HELLO`.
struct Binding {
    client_id: ClientId,
    sensor: SensorType,
    module: Arc<dyn SensorModule>,
}

/// Whether the read loop keeps going after a request.
enum Flow {
    Continue,
    Close,
}

/// Serves requests on one command connection.
pub struct CommandWorker {
    framed: Framed<UnixStream, PacketCodec>,
    ctx: Arc<DaemonContext>,
    permission: Permission,
    peer: Option<PeerInfo>,
    /// Client id issued by `GET_ID` on this connection.
    issued: Option<ClientId>,
    binding: Option<Binding>,
    connection: u64,
    cancel_token: CancellationToken,
}

impl CommandWorker {
    pub fn new(
        stream: UnixStream,
        ctx: Arc<DaemonContext>,
        connection: u64,
        cancel_token: CancellationToken,
    ) -> Self {
        let peer = match PeerInfo::from_stream(&stream) {
            Ok(peer) => Some(peer),
            Err(e) => {
                warn!(connection, error = %e, "Failed to read peer credentials");
                None
            }
        };
        // Peers we cannot identify get no permission at all.
        let permission = peer
            .as_ref()
            .map(|peer| ctx.permissions.permission(peer))
            .unwrap_or(Permission::NONE);

        Self {
            framed: Framed::new(stream, PacketCodec::new()),
            ctx,
            permission,
            peer,
            issued: None,
            binding: None,
            connection,
            cancel_token,
        }
    }

    /// Runs the request loop until `BYEBYE`, peer close, error or shutdown.
    pub async fn run(mut self) {
        debug!(connection = self.connection, "Command connection opened");

        let outcome = self.serve().await;
        match &outcome {
            Ok(true) => debug!(connection = self.connection, "Command connection closed"),
            Ok(false) => {}
            Err(e) => warn!(connection = self.connection, error = %e, "Command connection error"),
        }

        if self.binding.is_some() {
            // The peer left without BYEBYE.
            warn!(connection = self.connection, "Implicit disconnect");
            self.release();
        }
        if let Some(client_id) = self.issued {
            self.ctx.registry.remove_client_if_idle(client_id);
        }
    }

    /// Returns Ok(true) on an orderly close.
    async fn serve(&mut self) -> Result<bool, WorkerError> {
        loop {
            let packet = tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!(connection = self.connection, "Worker shutting down");
                    return Ok(false);
                }
                next = self.framed.next() => match next {
                    Some(Ok(packet)) => packet,
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(true),
                },
            };

            let request = match Request::decode(&packet) {
                Ok(request) => request,
                // Well-framed but out of range: refuse it, keep the connection.
                Err(ProtocolError::InvalidValue { field, value }) => {
                    debug!(connection = self.connection, field, value, "Rejected request argument");
                    self.send(Reply::status(status::INVALID_ARGUMENT)).await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            trace!(connection = self.connection, kind = ?request.kind(), "Request");

            let (reply, flow) = self.handle(request).await;
            self.send(reply).await?;
            if matches!(flow, Flow::Close) {
                return Ok(true);
            }
        }
    }

    async fn send(&mut self, reply: Reply) -> Result<(), WorkerError> {
        match timeout(WRITE_TIMEOUT, self.framed.send(reply.encode())).await {
            Ok(result) => result.map_err(WorkerError::from),
            Err(_) => Err(WorkerError::WriteTimeout),
        }
    }

    async fn handle(&mut self, request: Request) -> (Reply, Flow) {
        let reply = match request {
            Request::GetId { pid, name } => self.handle_get_id(pid, &name),
            Request::GetSensorList => Reply::GetSensorListDone {
                sensors: self.ctx.catalog.sensor_list(),
            },
            Request::Hello { client_id, sensor } => self.handle_hello(client_id, sensor),
            Request::ByeBye => {
                let reply = self.handle_byebye();
                return (reply, Flow::Close);
            }
            Request::Start => self.with_binding(Self::handle_start),
            Request::Stop => self.with_binding(Self::handle_stop),
            Request::Reg { event_type } => {
                self.with_binding(|this, binding| this.handle_reg(binding, event_type))
            }
            Request::Unreg { event_type } => self.with_binding(|this, binding| {
                status_of(this.ctx.registry.unregister_event(
                    binding.client_id,
                    binding.sensor,
                    event_type,
                ))
            }),
            Request::SetOption { option } => self.with_binding(|this, binding| {
                status_of(this.ctx.registry.set_option(binding.client_id, binding.sensor, option))
            }),
            Request::SetBatch {
                interval_us,
                latency_us,
            } => self.with_binding(|this, binding| {
                this.handle_set_batch(binding, interval_us, latency_us)
            }),
            Request::UnsetBatch => self.with_binding(Self::handle_unset_batch),
            Request::GetData => self.handle_get_data().await,
            Request::SetAttributeInt { attribute, value } => self.with_binding(|this, binding| {
                this.handle_set_attribute_int(binding, attribute, value)
            }),
            Request::SetAttributeStr { attribute, value } => self.with_binding(|_, binding| {
                module_status(binding.module.set_attribute_str(attribute, &value))
            }),
            Request::Flush => self.with_binding(|_, binding| module_status(binding.module.flush())),
        };
        (reply, Flow::Continue)
    }

    /// Runs `f` against the bound sensor, or fails if `HELLO` has not succeeded.
    fn with_binding(&self, f: impl FnOnce(&Self, &Binding) -> Reply) -> Reply {
        match &self.binding {
            Some(binding) => f(self, binding),
            None => {
                debug!(connection = self.connection, "Command before HELLO");
                Reply::status(status::INVALID_ARGUMENT)
            }
        }
    }

    // ========================================================================
    // Handshake
    // ========================================================================

    fn handle_get_id(&mut self, pid: i32, name: &str) -> Reply {
        // Credentials beat whatever the peer claims.
        let pid = self.peer.and_then(|peer| peer.pid).unwrap_or(pid);
        match self.ctx.registry.create_client(pid, name) {
            Ok(client_id) => {
                self.issued = Some(client_id);
                Reply::GetIdDone { client_id }
            }
            Err(e) => {
                warn!(connection = self.connection, error = %e, "Failed to create client");
                Reply::status(e.status())
            }
        }
    }

    fn handle_hello(&mut self, client_id: ClientId, sensor: SensorType) -> Reply {
        if self.binding.is_some() {
            return Reply::status(status::INVALID_ARGUMENT);
        }
        let Some(module) = self.ctx.catalog.get(sensor) else {
            debug!(%client_id, %sensor, "HELLO for unavailable sensor");
            return Reply::status(status::NO_DEVICE);
        };
        if !self.permission.allows(module.permission()) {
            warn!(
                %client_id,
                %sensor,
                granted = self.permission.bits(),
                required = module.permission().bits(),
                "Permission denied"
            );
            return Reply::status(status::PERMISSION_DENIED);
        }
        if let Err(e) = self.ctx.registry.open_sensor(client_id, sensor) {
            return Reply::status(e.status());
        }

        info!(connection = self.connection, %client_id, %sensor, "Sensor opened");
        self.binding = Some(Binding {
            client_id,
            sensor,
            module,
        });
        Reply::ok()
    }

    fn handle_byebye(&mut self) -> Reply {
        match self.binding {
            Some(_) => {
                self.release();
                Reply::ok()
            }
            None => Reply::status(status::INVALID_ARGUMENT),
        }
    }

    /// Withdraws everything this connection contributed and closes the record.
    fn release(&mut self) {
        let Some(binding) = self.binding.take() else {
            return;
        };
        let Binding {
            client_id,
            sensor,
            module,
        } = binding;

        match self.ctx.registry.close_sensor(client_id, sensor) {
            Ok((record, client_removed)) => {
                if record.state == SensorState::Started {
                    if let Err(e) = module.stop() {
                        warn!(%client_id, %sensor, error = %e, "Failed to stop sensor on release");
                    }
                }
                if record.interval_us > 0 {
                    let requester = Requester::Client(client_id);
                    log_module_error(module.delete_interval(requester, true), client_id, sensor);
                    log_module_error(module.delete_batch(requester), client_id, sensor);
                }
                info!(%client_id, %sensor, client_removed, "Sensor closed");
            }
            Err(e) => debug!(%client_id, %sensor, error = %e, "Record already gone"),
        }
    }

    // ========================================================================
    // Subscription
    // ========================================================================

    fn handle_start(&self, binding: &Binding) -> Reply {
        let Some(record) = self.ctx.registry.record(binding.client_id, binding.sensor) else {
            return Reply::status(status::NO_DEVICE);
        };
        if record.state != SensorState::Started {
            if let Err(e) = binding.module.start() {
                warn!(client_id = %binding.client_id, sensor = %binding.sensor, error = %e, "Failed to start sensor");
                return Reply::status(status::from_module_error(&e));
            }
        }
        if let Err(e) = self.ctx.registry.start(binding.client_id, binding.sensor) {
            return Reply::status(e.status());
        }
        self.replay(binding);
        Reply::ok()
    }

    /// Delivers the cached last value of each replayable registered type.
    fn replay(&self, binding: &Binding) {
        let Some(sink) = self.ctx.registry.sink(binding.client_id) else {
            return;
        };
        let Some(record) = self.ctx.registry.record(binding.client_id, binding.sensor) else {
            return;
        };
        let situation = self.ctx.situation();
        for event in self.ctx.replay.replay_for(record.events.iter().copied()) {
            if !record.accepts(event.event_type, situation) {
                continue;
            }
            match sink.try_send(encode_event_frame(&event)) {
                Ok(()) => debug!(
                    client_id = %binding.client_id,
                    event_type = %event.event_type,
                    "Replayed cached event"
                ),
                Err(e) => debug!(client_id = %binding.client_id, error = ?e, "Replay not delivered"),
            }
        }
    }

    /// The record is only cleared once the module has let go, so a failed
    /// stop leaves the subscription exactly as the client last saw it.
    fn handle_stop(&self, binding: &Binding) -> Reply {
        let Some(record) = self.ctx.registry.record(binding.client_id, binding.sensor) else {
            return Reply::status(status::NO_DEVICE);
        };
        if record.state == SensorState::Started {
            if let Err(e) = binding.module.stop() {
                warn!(client_id = %binding.client_id, sensor = %binding.sensor, error = %e, "Failed to stop sensor");
                return Reply::status(status::from_module_error(&e));
            }
        }
        status_of(self.ctx.registry.stop(binding.client_id, binding.sensor))
    }

    fn handle_reg(&self, binding: &Binding, event_type: EventType) -> Reply {
        if !binding.module.info().supports_event(event_type) {
            debug!(sensor = %binding.sensor, %event_type, "Event type not offered by sensor");
            return Reply::status(status::INVALID_ARGUMENT);
        }
        status_of(
            self.ctx
                .registry
                .register_event(binding.client_id, binding.sensor, event_type),
        )
    }

    fn handle_set_batch(&self, binding: &Binding, interval_us: u32, latency_us: u32) -> Reply {
        if interval_us == 0 {
            return Reply::status(status::INVALID_ARGUMENT);
        }
        if let Err(e) =
            self.ctx
                .registry
                .set_batch(binding.client_id, binding.sensor, interval_us, latency_us)
        {
            return Reply::status(e.status());
        }
        let requester = Requester::Client(binding.client_id);
        if let Err(e) = binding.module.add_interval(requester, interval_us, true) {
            return Reply::status(status::from_module_error(&e));
        }
        module_status(binding.module.add_batch(requester, latency_us))
    }

    fn handle_unset_batch(&self, binding: &Binding) -> Reply {
        if let Err(e) = self.ctx.registry.unset_batch(binding.client_id, binding.sensor) {
            return Reply::status(e.status());
        }
        let requester = Requester::Client(binding.client_id);
        log_module_error(
            binding.module.delete_interval(requester, true),
            binding.client_id,
            binding.sensor,
        );
        log_module_error(
            binding.module.delete_batch(requester),
            binding.client_id,
            binding.sensor,
        );
        Reply::ok()
    }

    fn handle_set_attribute_int(&self, binding: &Binding, attr: i32, value: i32) -> Reply {
        if attr == attribute::WAKEUP {
            return status_of(
                self.ctx
                    .registry
                    .set_wakeup(binding.client_id, binding.sensor, value != 0),
            );
        }
        module_status(binding.module.set_attribute_int(attr, value))
    }

    // ========================================================================
    // Polling
    // ========================================================================

    async fn handle_get_data(&self) -> Reply {
        let Some(binding) = &self.binding else {
            return Reply::status(status::INVALID_ARGUMENT);
        };
        let started = self
            .ctx
            .registry
            .record(binding.client_id, binding.sensor)
            .is_some_and(|record| record.state == SensorState::Started);
        if !started {
            return data_reply(Err(ModuleError::NotStarted));
        }

        match binding.module.get_data() {
            Ok(data) if data.is_valid() => return data_reply(Ok(data)),
            Ok(_) => {}
            Err(e) => return data_reply(Err(e)),
        }

        // No sample yet: ask for a fast rate until one shows up.
        let warm_up = Requester::WarmUp(binding.client_id);
        if let Err(e) = binding.module.add_interval(warm_up, WARM_UP_INTERVAL_US, false) {
            debug!(sensor = %binding.sensor, error = %e, "Warm-up interval rejected");
        }
        let mut result = Err(ModuleError::NoData);
        for attempt in 1..=WARM_UP_RETRIES {
            sleep(WARM_UP_SLEEP).await;
            match binding.module.get_data() {
                Ok(data) if data.is_valid() => {
                    trace!(sensor = %binding.sensor, attempt, "First sample arrived");
                    result = Ok(data);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        log_module_error(
            binding.module.delete_interval(warm_up, false),
            binding.client_id,
            binding.sensor,
        );
        data_reply(result)
    }
}

fn status_of<T>(result: Result<T, RegistryError>) -> Reply {
    match result {
        Ok(_) => Reply::ok(),
        Err(e) => Reply::status(e.status()),
    }
}

fn module_status(result: Result<(), ModuleError>) -> Reply {
    match result {
        Ok(()) => Reply::ok(),
        Err(e) => Reply::status(status::from_module_error(&e)),
    }
}

fn data_reply(result: Result<SensorData, ModuleError>) -> Reply {
    match result {
        Ok(data) => Reply::GetDataDone {
            state: status::OK,
            data,
        },
        Err(e) => Reply::GetDataDone {
            state: status::from_module_error(&e),
            data: SensorData::default(),
        },
    }
}

fn log_module_error(result: Result<(), ModuleError>, client_id: ClientId, sensor: SensorType) {
    if let Err(e) = result {
        debug!(%client_id, %sensor, error = %e, "Module request not withdrawn");
    }
}
