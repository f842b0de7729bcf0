//! Socket channels to the daemon.
//!
//! Two disciplines are used:
//! - **Connection mode** (`CommandChannel`): one request, one reply, the
//!   round trip bounded by the receive timeout. Any hard error closes the
//!   channel for good.
//! - **Transfer mode** (`EventChannel`): the listener reads whatever frames
//!   are available. A zero-length read gets one readiness poll and a retry
//!   before it counts as the daemon going away.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::path::Path;
use std::time::Duration;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncReadExt;
use tokio::net::UnixStream;
use tokio::time::timeout;
use tokio_util::codec::{Decoder, Framed, FramedParts};
use tracing::{debug, warn};

use sensor_core::{ClientId, SensorEvent};
use sensor_protocol::{
    decode_event, EventChannelHello, EventChannelReady, PacketCodec, ProtocolError, Reply,
    Request,
};

use crate::error::{ClientError, Result};

// ============================================================================
// Connection mode
// ============================================================================

/// Request/reply channel for one sensor.
pub struct CommandChannel {
    framed: Option<Framed<UnixStream, PacketCodec>>,
    receive_timeout: Duration,
}

impl CommandChannel {
    pub async fn connect(path: &Path, receive_timeout: Duration) -> Result<Self> {
        let stream = match timeout(receive_timeout, UnixStream::connect(path)).await {
            Ok(stream) => stream?,
            Err(_) => return Err(ClientError::Timeout),
        };
        Ok(Self {
            framed: Some(Framed::new(stream, PacketCodec::new())),
            receive_timeout,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.framed.is_none()
    }

    /// Sends `request` and waits for its reply.
    pub async fn request(&mut self, request: &Request) -> Result<Reply> {
        let result = self.round_trip(request).await;
        if let Err(e) = &result {
            if e.is_fatal() && self.framed.take().is_some() {
                warn!(kind = ?request.kind(), error = %e, "Command channel closed after error");
            }
        }
        result
    }

    async fn round_trip(&mut self, request: &Request) -> Result<Reply> {
        let framed = self.framed.as_mut().ok_or(ClientError::NotConnected)?;
        match timeout(self.receive_timeout, exchange(framed, request)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout),
        }
    }
}

async fn exchange(framed: &mut Framed<UnixStream, PacketCodec>, request: &Request) -> Result<Reply> {
    framed.send(request.encode()).await?;
    match framed.next().await {
        Some(packet) => Ok(Reply::decode(&packet?)?),
        None => Err(ClientError::NotConnected),
    }
}

// ============================================================================
// Transfer mode
// ============================================================================

/// The process-wide event stream.
pub struct EventChannel {
    stream: UnixStream,
    buf: BytesMut,
    codec: PacketCodec,
}

impl EventChannel {
    /// Connects and completes the readiness handshake for `client_id`.
    pub async fn connect(path: &Path, client_id: ClientId, receive_timeout: Duration) -> Result<Self> {
        let parts = match timeout(receive_timeout, handshake(path, client_id)).await {
            Ok(parts) => parts?,
            Err(_) => return Err(ClientError::Timeout),
        };
        debug!(%client_id, "Event channel ready");
        Ok(Self {
            stream: parts.io,
            buf: parts.read_buf,
            codec: PacketCodec::new(),
        })
    }

    /// Next event, or `None` once the daemon has closed the channel.
    pub async fn recv(&mut self) -> Result<Option<SensorEvent>> {
        loop {
            if let Some(packet) = self.codec.decode(&mut self.buf)? {
                return Ok(Some(decode_event(&packet)?));
            }
            if self.stream.read_buf(&mut self.buf).await? > 0 {
                continue;
            }
            // Zero-length read: poll once, then retry before giving up.
            self.stream.readable().await?;
            if self.stream.read_buf(&mut self.buf).await? == 0 {
                if !self.buf.is_empty() {
                    return Err(ProtocolError::Truncated { what: "event frame" }.into());
                }
                return Ok(None);
            }
        }
    }
}

async fn handshake(path: &Path, client_id: ClientId) -> Result<FramedParts<UnixStream, PacketCodec>> {
    let stream = UnixStream::connect(path).await?;
    let mut framed = Framed::new(stream, PacketCodec::new());
    framed.send(EventChannelHello { client_id }.encode()).await?;
    let packet = match framed.next().await {
        Some(packet) => packet?,
        None => return Err(ClientError::NotConnected),
    };
    EventChannelReady::decode(&packet)?.verify(client_id)?;
    Ok(framed.into_parts())
}
