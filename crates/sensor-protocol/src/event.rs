//! Event channel handshake and event frames.
//!
//! After obtaining its client id, a client opens one event connection and
//! sends [`EventChannelHello`]. The daemon answers with [`EventChannelReady`]
//! carrying [`EVENT_CHANNEL_MAGIC`] and the same id; anything else is a hard
//! failure. From then on the daemon only writes `Event` packets.

use bytes::{BufMut, BytesMut};

use sensor_core::{ClientId, EventType, SensorEvent};

use crate::packet::{Packet, PacketKind};
use crate::wire::{put_sensor_data, Reader};
use crate::ProtocolError;

/// Marker proving the peer is a sensor daemon event channel.
pub const EVENT_CHANNEL_MAGIC: u32 = 0xCAFE_CAFE;

/// First packet a client writes on its event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventChannelHello {
    pub client_id: ClientId,
}

impl EventChannelHello {
    pub fn encode(&self) -> Packet {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_i32_ne(self.client_id.as_i32());
        Packet::new(PacketKind::EventChannelHello, buf.freeze())
    }

    pub fn decode(packet: &Packet) -> Result<Self, ProtocolError> {
        packet.expect_kind(PacketKind::EventChannelHello)?;
        let mut r = Reader::new(&packet.payload);
        Ok(Self {
            client_id: ClientId::new(r.i32("event_hello.client_id")?),
        })
    }
}

/// Daemon acknowledgement of an event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventChannelReady {
    pub magic: u32,
    pub client_id: ClientId,
}

impl EventChannelReady {
    pub fn new(client_id: ClientId) -> Self {
        Self {
            magic: EVENT_CHANNEL_MAGIC,
            client_id,
        }
    }

    pub fn encode(&self) -> Packet {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u32_ne(self.magic);
        buf.put_i32_ne(self.client_id.as_i32());
        Packet::new(PacketKind::EventChannelReady, buf.freeze())
    }

    pub fn decode(packet: &Packet) -> Result<Self, ProtocolError> {
        packet.expect_kind(PacketKind::EventChannelReady)?;
        let mut r = Reader::new(&packet.payload);
        Ok(Self {
            magic: r.u32("event_ready.magic")?,
            client_id: ClientId::new(r.i32("event_ready.client_id")?),
        })
    }

    /// Checks the acknowledgement against the id the client announced.
    pub fn verify(&self, expected: ClientId) -> Result<(), ProtocolError> {
        if self.magic != EVENT_CHANNEL_MAGIC {
            return Err(ProtocolError::Handshake(format!(
                "bad magic {:#x}",
                self.magic
            )));
        }
        if self.client_id != expected {
            return Err(ProtocolError::Handshake(format!(
                "expected {expected}, daemon acknowledged {}",
                self.client_id
            )));
        }
        Ok(())
    }
}

/// Encodes one event as an `Event` packet.
pub fn encode_event(event: &SensorEvent) -> Packet {
    let mut buf = BytesMut::new();
    buf.put_u32_ne(event.event_type.raw());
    put_sensor_data(&mut buf, &event.data);
    Packet::new(PacketKind::Event, buf.freeze())
}

/// Encodes one event straight to header+payload bytes, ready for a socket.
///
/// The daemon encodes each event once and shares the buffer among listeners.
pub fn encode_event_frame(event: &SensorEvent) -> bytes::Bytes {
    let packet = encode_event(event);
    let mut buf = BytesMut::with_capacity(crate::HEADER_SIZE + packet.payload.len());
    buf.put_slice(&packet.header().to_bytes());
    buf.put_slice(&packet.payload);
    buf.freeze()
}

pub fn decode_event(packet: &Packet) -> Result<SensorEvent, ProtocolError> {
    packet.expect_kind(PacketKind::Event)?;
    let mut r = Reader::new(&packet.payload);
    let event_type = EventType::from_raw(r.u32("event.event_type")?);
    let data = r.sensor_data()?;
    Ok(SensorEvent::new(event_type, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PacketCodec;
    use sensor_core::SensorData;
    use tokio_util::codec::Decoder;

    #[test]
    fn test_ready_verify() {
        let id = ClientId::new(4);
        let ready = EventChannelReady::decode(&EventChannelReady::new(id).encode()).unwrap();
        assert!(ready.verify(id).is_ok());
        assert!(matches!(
            ready.verify(ClientId::new(5)),
            Err(ProtocolError::Handshake(_))
        ));
    }

    #[test]
    fn test_ready_bad_magic() {
        let ready = EventChannelReady {
            magic: 0xDEAD_BEEF,
            client_id: ClientId::new(1),
        };
        assert!(ready.verify(ClientId::new(1)).is_err());
    }

    #[test]
    fn test_hello_wrong_kind() {
        let packet = EventChannelReady::new(ClientId::new(1)).encode();
        assert!(EventChannelHello::decode(&packet).is_err());
    }

    #[test]
    fn test_event_frame_decodes_with_codec() {
        let event = SensorEvent::new(
            EventType::ACCELEROMETER_RAW_DATA,
            SensorData::new(1000, 3, &[0.1, 9.8, 0.0]),
        );
        let mut buf = BytesMut::from(&encode_event_frame(&event)[..]);
        let packet = PacketCodec::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decode_event(&packet).unwrap(), event);
        assert!(buf.is_empty());
    }
}
