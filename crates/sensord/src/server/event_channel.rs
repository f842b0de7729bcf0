//! Per-process event channel.
//!
//! After the handshake the channel is write-only from the daemon's side:
//! frames queued on the client's [`EventSink`] are written in order. The read
//! half is only watched for EOF so a vanished client is noticed promptly.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sensor_core::ClientId;
use sensor_protocol::{EventChannelHello, EventChannelReady, PacketCodec, ProtocolError};

use crate::context::DaemonContext;
use crate::registry::{EventSink, RegistryError};

/// Time allowed for the client to announce itself.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed for one frame write before the client is considered stuck.
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors that end an event channel.
#[derive(Debug, thiserror::Error)]
pub enum EventChannelError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Handshake timed out")]
    HandshakeTimeout,

    #[error("Connection closed before handshake")]
    Closed,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serves one event connection until the client leaves or shutdown.
pub(super) async fn serve(
    stream: UnixStream,
    ctx: Arc<DaemonContext>,
    cancel_token: CancellationToken,
) -> Result<(), EventChannelError> {
    let mut framed = Framed::new(stream, PacketCodec::new());

    let packet = match timeout(HANDSHAKE_TIMEOUT, framed.next()).await {
        Ok(Some(Ok(packet))) => packet,
        Ok(Some(Err(e))) => return Err(e.into()),
        Ok(None) => return Err(EventChannelError::Closed),
        Err(_) => return Err(EventChannelError::HandshakeTimeout),
    };
    let client_id = EventChannelHello::decode(&packet)?.client_id;

    let (tx, rx) = mpsc::channel(ctx.listener_queue_capacity());
    let sink = EventSink::new(ctx.next_sink_id(), tx);
    let sink_id = sink.id();
    // Unknown ids are rejected by closing without a ready packet.
    ctx.registry.attach_sink(client_id, sink)?;

    let ready = EventChannelReady::new(client_id).encode();
    let result = match timeout(WRITE_TIMEOUT, framed.send(ready)).await {
        Ok(Ok(())) => {
            info!(%client_id, "Event channel ready");
            pump(framed.into_inner(), rx, client_id, cancel_token).await
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(EventChannelError::WriteTimeout),
    };

    ctx.registry.detach_sink(client_id, sink_id);
    ctx.registry.remove_client_if_idle(client_id);
    debug!(%client_id, "Event channel closed");
    result
}

async fn pump(
    stream: UnixStream,
    mut rx: mpsc::Receiver<bytes::Bytes>,
    client_id: ClientId,
    cancel_token: CancellationToken,
) -> Result<(), EventChannelError> {
    let (mut reader, mut writer) = stream.into_split();
    let mut scratch = [0u8; 64];

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => return Ok(()),

            frame = rx.recv() => {
                let Some(frame) = frame else {
                    // client record gone (last sensor closed)
                    return Ok(());
                };
                match timeout(WRITE_TIMEOUT, writer.write_all(&frame)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => {
                        warn!(%client_id, "Event channel write timed out");
                        return Err(EventChannelError::WriteTimeout);
                    }
                }
            }

            read = reader.read(&mut scratch) => {
                match read? {
                    0 => return Ok(()),
                    n => debug!(%client_id, bytes = n, "Ignoring data on event channel"),
                }
            }
        }
    }
}
